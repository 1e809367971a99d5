//! Coroutine Tests - Resume/Yield Across the Thread Boundary

mod common;

use common::{abc, loadi, proto, ret_one};
use aql_vm::{Instruction, OpCode, State, Status, TValue};

/// body: yield 1; yield 2; return 3
fn yielding_body(state: &mut State) -> TValue {
    state.load(proto(
        vec![
            loadi(0, 1),
            Instruction::abc(OpCode::Yield, 0, 2, 0, false),
            loadi(0, 2),
            Instruction::abc(OpCode::Yield, 0, 2, 0, false),
            loadi(0, 3),
            ret_one(0),
        ],
        1,
    ))
}

fn make_thread(state: &mut State, body: TValue) -> TValue {
    common::PushValue::push_value_for_test(state, body);
    state.new_thread().unwrap();
    let t = state.value_at(-1);
    state.pop(1);
    // Anchor the thread in the registry so collections keep it alive
    state.g.extra_roots.push(t.gc_ref().unwrap());
    t
}

#[test]
fn test_yield_sequence() {
    let mut state = State::new().unwrap();
    let body = yielding_body(&mut state);
    let thread = make_thread(&mut state, body);

    let (status, values) = state.resume(thread, &[]).unwrap();
    assert_eq!(status, Status::Yield);
    assert_eq!(values[0].as_int(), Some(1));

    let (status, values) = state.resume(thread, &[]).unwrap();
    assert_eq!(status, Status::Yield);
    assert_eq!(values[0].as_int(), Some(2));

    let (status, values) = state.resume(thread, &[]).unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(values[0].as_int(), Some(3));

    // Dead now
    let err = state.resume(thread, &[]).unwrap_err();
    assert!(err.to_string().contains("dead"), "got: {err}");
}

#[test]
fn test_resume_arguments_become_yield_results() {
    let mut state = State::new().unwrap();
    // body(a): x = yield a; return x + a
    let mut body = proto(
        vec![
            // R1 = yield R0 (1 value out, 1 value back at R1's window)
            Instruction::abc(OpCode::Move, 1, 0, 0, false),
            Instruction::abc(OpCode::Yield, 1, 2, 0, false),
            abc(OpCode::Add, 2, 1, 0),
            ret_one(2),
        ],
        3,
    );
    body.num_params = 1;
    let body = state.load(body);
    let thread = make_thread(&mut state, body);

    let (status, values) = state.resume(thread, &[TValue::Int(10)]).unwrap();
    assert_eq!(status, Status::Yield);
    assert_eq!(values[0].as_int(), Some(10));

    // The value passed here replaces the yield expression's result
    let (status, values) = state.resume(thread, &[TValue::Int(32)]).unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(values[0].as_int(), Some(42));
}

#[test]
fn test_coroutine_keeps_stack_across_yields() {
    let mut state = State::new().unwrap();
    // body: acc = 0; for i = 1..3 { acc += i; yield acc }; return acc
    let body = state.load(proto(
        vec![
            loadi(4, 0),
            loadi(0, 1),
            loadi(1, 3),
            loadi(2, 1),
            Instruction::asbx(OpCode::ForPrep, 0, 2),
            abc(OpCode::Add, 4, 4, 3),
            Instruction::abc(OpCode::Yield, 4, 2, 0, false),
            Instruction::asbx(OpCode::ForLoop, 0, -3),
            ret_one(4),
        ],
        5,
    ));
    let thread = make_thread(&mut state, body);

    let mut seen = Vec::new();
    loop {
        let (status, values) = state.resume(thread, &[]).unwrap();
        seen.push(values[0].as_int().unwrap());
        if status == Status::Ok {
            break;
        }
    }
    // 1, 1+2, 1+2+3, then the final return of the accumulator
    assert_eq!(seen, vec![1, 3, 6, 6]);
}

#[test]
fn test_yield_from_main_raises() {
    let mut state = State::new().unwrap();
    let chunk = state.load(proto(
        vec![
            loadi(0, 1),
            Instruction::abc(OpCode::Yield, 0, 2, 0, false),
            ret_one(0),
        ],
        1,
    ));
    let err = common::try_call(&mut state, chunk, &[]).unwrap_err();
    assert!(err.contains("outside a coroutine"), "got: {err}");
}

#[test]
fn test_error_in_coroutine_kills_it() {
    let mut state = State::new().unwrap();
    let body = state.load(proto(
        vec![
            loadi(0, 1),
            loadi(1, 0),
            abc(OpCode::IDiv, 2, 0, 1), // n//0 raises
            ret_one(2),
        ],
        3,
    ));
    let thread = make_thread(&mut state, body);
    let err = state.resume(thread, &[]).unwrap_err();
    assert!(err.to_string().contains("n//0"), "got: {err}");
    // Unwound and marked dead; a second resume reports that
    let err = state.resume(thread, &[]).unwrap_err();
    assert!(err.to_string().contains("dead"), "got: {err}");
}

#[test]
fn test_status_transitions() {
    let mut state = State::new().unwrap();
    let body = yielding_body(&mut state);
    let thread = make_thread(&mut state, body);

    assert_eq!(state.status_of(thread), Status::Yield); // suspended
    state.resume(thread, &[]).unwrap();
    assert_eq!(state.status_of(thread), Status::Yield); // suspended again
    state.resume(thread, &[]).unwrap();
    state.resume(thread, &[]).unwrap();
    assert_eq!(state.status_of(thread), Status::Ok); // dead
}
