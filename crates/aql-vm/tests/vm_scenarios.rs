//! End-to-End Execution Scenarios
//!
//! Literal bytecode in, expected values out: arithmetic semantics, string
//! concatenation, container opcodes, closures and upvalues, control flow,
//! varargs, tail calls, protected calls.

mod common;

use common::{abc, call, loadi, proto, proto_with_constants, ret_one, run, try_call};
use aql_vm::{Instruction, OpCode, State, TValue, UpvalDesc};

// === Scenario: arithmetic mix ===

#[test]
fn test_div_of_ints_is_float() {
    let mut state = State::new().unwrap();
    let results = run(
        &mut state,
        proto(
            vec![
                loadi(0, 7),
                loadi(1, 3),
                abc(OpCode::Div, 2, 0, 1),
                ret_one(2),
            ],
            3,
        ),
    );
    assert_eq!(results.len(), 1);
    let f = results[0].as_float().expect("float result");
    assert!((f - 7.0 / 3.0).abs() < 1e-15, "got {f}");
}

#[test]
fn test_idiv_of_ints_is_int() {
    let mut state = State::new().unwrap();
    let results = run(
        &mut state,
        proto(
            vec![
                loadi(0, 7),
                loadi(1, 3),
                abc(OpCode::IDiv, 2, 0, 1),
                ret_one(2),
            ],
            3,
        ),
    );
    assert_eq!(results[0].as_int(), Some(2));
}

#[test]
fn test_integer_wrap() {
    let mut state = State::new().unwrap();
    // R0 = (2^16-1) repeatedly squared wraps mod 2^64 without raising
    let results = run(
        &mut state,
        proto(
            vec![
                loadi(0, 65535),
                abc(OpCode::Mul, 0, 0, 0),
                abc(OpCode::Mul, 0, 0, 0),
                abc(OpCode::Mul, 0, 0, 0),
                ret_one(0),
            ],
            1,
        ),
    );
    let expected = 65535i64
        .wrapping_mul(65535)
        .wrapping_mul(65535i64.wrapping_mul(65535))
        .wrapping_mul(
            65535i64
                .wrapping_mul(65535)
                .wrapping_mul(65535i64.wrapping_mul(65535)),
        );
    assert_eq!(results[0].as_int(), Some(expected));
}

// === Scenario: string concat ===

#[test]
fn test_concat_hello_world() {
    let mut state = State::new().unwrap();
    let hello = TValue::Str(state.g.intern("Hello"));
    let space = TValue::Str(state.g.intern(" "));
    let world = TValue::Str(state.g.intern("World"));
    let results = run(
        &mut state,
        proto_with_constants(
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abx(OpCode::LoadK, 1, 1),
                Instruction::abx(OpCode::LoadK, 2, 2),
                abc(OpCode::Concat, 3, 0, 2),
                ret_one(3),
            ],
            vec![hello, space, world],
            4,
        ),
    );
    assert_eq!(state.display(results[0]), "Hello World");
    assert_eq!(state.len_of_value(results[0]), Some(11));
    // Two-phase concat performs exactly one string allocation
    assert_eq!(state.g.perf.named("concat_alloc"), 1);
}

#[test]
fn test_concat_coerces_numbers() {
    let mut state = State::new().unwrap();
    let results = run(
        &mut state,
        proto(
            vec![
                loadi(0, 4),
                Instruction::asbx(OpCode::LoadF, 1, 2),
                abc(OpCode::Concat, 2, 0, 1),
                ret_one(2),
            ],
            3,
        ),
    );
    assert_eq!(state.display(results[0]), "42.0");
}

#[test]
fn test_concat_non_string_raises() {
    let mut state = State::new().unwrap();
    let err = try_call_chunk(
        &mut state,
        proto(
            vec![
                Instruction::abc(OpCode::LoadTrue, 0, 0, 0, false),
                loadi(1, 1),
                abc(OpCode::Concat, 2, 0, 1),
                ret_one(2),
            ],
            3,
        ),
    )
    .unwrap_err();
    assert!(err.contains("concatenate"), "got: {err}");
}

// === Scenario: containers through opcodes ===

#[test]
fn test_newobject_set_get() {
    let mut state = State::new().unwrap();
    let results = run(
        &mut state,
        proto(
            vec![
                // R0 = new slice; R0[0] = 42; R3 = R0[0]
                abc(OpCode::NewObject, 0, 1, 0),
                loadi(1, 0),
                loadi(2, 42),
                abc(OpCode::SetProp, 0, 1, 2),
                abc(OpCode::GetProp, 3, 0, 1),
                ret_one(3),
            ],
            4,
        ),
    );
    assert_eq!(results[0].as_int(), Some(42));
}

#[test]
fn test_vector_elementwise_add_through_opcodes() {
    let mut state = State::new().unwrap();
    let results = run(
        &mut state,
        proto(
            vec![
                abc(OpCode::NewObject, 0, 3, 4), // vector[4] f64
                abc(OpCode::NewObject, 1, 3, 4),
                loadi(2, 0),
                loadi(3, 5),
                abc(OpCode::SetProp, 0, 2, 3), // a[0] = 5
                abc(OpCode::SetProp, 1, 2, 3), // b[0] = 5
                abc(OpCode::Add, 4, 0, 1),     // c = a + b
                abc(OpCode::GetProp, 5, 4, 2),
                ret_one(5),
            ],
            6,
        ),
    );
    assert_eq!(results[0].as_float(), Some(10.0));
}

#[test]
fn test_len_opcode() {
    let mut state = State::new().unwrap();
    let s = TValue::Str(state.g.intern("hello"));
    let results = run(
        &mut state,
        proto_with_constants(
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                abc(OpCode::Len, 1, 0, 0),
                ret_one(1),
            ],
            vec![s],
            2,
        ),
    );
    assert_eq!(results[0].as_int(), Some(5));
}

// === Scenario: closure and upvalue ===

#[test]
fn test_closure_counter_11_12_13() {
    let mut state = State::new().unwrap();

    // inner: increments and returns its captured upvalue
    let mut inner = proto(
        vec![
            abc(OpCode::GetUpval, 0, 0, 0),
            Instruction::abc(OpCode::AddI, 0, 0, 129, false), // +1
            abc(OpCode::SetUpval, 0, 0, 0),
            ret_one(0),
        ],
        1,
    );
    inner.upvalues = vec![UpvalDesc {
        name: Some("x".to_string()),
        in_stack: true,
        index: 0,
    }];
    let inner_ref = state.g.load_proto(inner);

    // outer: x = 10; return closure(inner)
    let mut outer = proto(
        vec![
            loadi(0, 10),
            Instruction::abx(OpCode::Closure, 1, 0),
            ret_one(1),
        ],
        2,
    );
    outer.protos = vec![inner_ref];

    let outer_results = run(&mut state, outer);
    let counter = outer_results[0];
    assert!(counter.is_function());

    // The upvalue was closed when outer returned, and survives in the
    // closure across collections
    state.collect_garbage();
    assert_eq!(call(&mut state, counter, &[])[0].as_int(), Some(11));
    assert_eq!(call(&mut state, counter, &[])[0].as_int(), Some(12));
    state.collect_garbage();
    assert_eq!(call(&mut state, counter, &[])[0].as_int(), Some(13));
}

#[test]
fn test_two_closures_share_one_upvalue() {
    let mut state = State::new().unwrap();

    let mut incr = proto(
        vec![
            abc(OpCode::GetUpval, 0, 0, 0),
            Instruction::abc(OpCode::AddI, 0, 0, 133, false), // +5
            abc(OpCode::SetUpval, 0, 0, 0),
            ret_one(0),
        ],
        1,
    );
    incr.upvalues = vec![UpvalDesc {
        name: None,
        in_stack: true,
        index: 0,
    }];
    let mut read = proto(vec![abc(OpCode::GetUpval, 0, 0, 0), ret_one(0)], 1);
    read.upvalues = vec![UpvalDesc {
        name: None,
        in_stack: true,
        index: 0,
    }];
    let incr_ref = state.g.load_proto(incr);
    let read_ref = state.g.load_proto(read);

    // outer: x = 0; return incr_closure, read_closure
    let mut outer = proto(
        vec![
            loadi(0, 0),
            Instruction::abx(OpCode::Closure, 1, 0),
            Instruction::abx(OpCode::Closure, 2, 1),
            Instruction::abc(OpCode::Ret, 1, 3, 0, false), // two results
        ],
        3,
    );
    outer.protos = vec![incr_ref, read_ref];

    let results = run(&mut state, outer);
    let (bump, peek) = (results[0], results[1]);
    call(&mut state, bump, &[]);
    call(&mut state, bump, &[]);
    // Both closures see the same closed binding
    assert_eq!(call(&mut state, peek, &[])[0].as_int(), Some(10));
}

// === Control flow ===

#[test]
fn test_eq_jump_pattern() {
    let mut state = State::new().unwrap();
    // R1 = (R0 == 5) ? 1 : 0
    let chunk = |init: i32| {
        proto(
            vec![
                loadi(0, init),
                Instruction::abc(OpCode::EqI, 1, 0, 133, false), // vs 5
                Instruction::asbx(OpCode::Jmp, 0, 2),
                loadi(1, 0),
                Instruction::asbx(OpCode::Jmp, 0, 1),
                loadi(1, 1),
                ret_one(1),
            ],
            2,
        )
    };
    assert_eq!(run(&mut state, chunk(5))[0].as_int(), Some(1));
    assert_eq!(run(&mut state, chunk(6))[0].as_int(), Some(0));
}

#[test]
fn test_numeric_for_sums() {
    let mut state = State::new().unwrap();
    // acc = 0; for i = 1, 10 do acc = acc + i end
    let results = run(
        &mut state,
        proto(
            vec![
                loadi(4, 0),
                loadi(0, 1),
                loadi(1, 10),
                loadi(2, 1),
                Instruction::asbx(OpCode::ForPrep, 0, 1),
                abc(OpCode::Add, 4, 4, 3),
                Instruction::asbx(OpCode::ForLoop, 0, -2),
                ret_one(4),
            ],
            5,
        ),
    );
    assert_eq!(results[0].as_int(), Some(55));
}

#[test]
fn test_for_loop_descending() {
    let mut state = State::new().unwrap();
    // count iterations of for i = 5, 1, -1
    let results = run(
        &mut state,
        proto(
            vec![
                loadi(4, 0),
                loadi(0, 5),
                loadi(1, 1),
                loadi(2, -1),
                Instruction::asbx(OpCode::ForPrep, 0, 1),
                Instruction::abc(OpCode::AddI, 4, 4, 129, false),
                Instruction::asbx(OpCode::ForLoop, 0, -2),
                ret_one(4),
            ],
            5,
        ),
    );
    assert_eq!(results[0].as_int(), Some(5));
}

#[test]
fn test_for_step_zero_raises() {
    let mut state = State::new().unwrap();
    let err = try_call_chunk(
        &mut state,
        proto(
            vec![
                loadi(0, 1),
                loadi(1, 10),
                loadi(2, 0),
                Instruction::asbx(OpCode::ForPrep, 0, 0),
                Instruction::asbx(OpCode::ForLoop, 0, -1),
                ret_one(0),
            ],
            4,
        ),
    )
    .unwrap_err();
    assert!(err.contains("step is zero"), "got: {err}");
}

// === Calls ===

#[test]
fn test_nested_call() {
    let mut state = State::new().unwrap();
    // callee(a, b) = a * b
    let mut callee = proto(vec![abc(OpCode::Mul, 2, 0, 1), ret_one(2)], 3);
    callee.num_params = 2;
    let callee_value = state.load(callee);

    // caller: R0 = callee; R1 = 6; R2 = 7; CALL R0, 2 args, 1 result
    let results = call_with_k(
        &mut state,
        vec![
            Instruction::abx(OpCode::LoadK, 0, 0),
            loadi(1, 6),
            loadi(2, 7),
            abc(OpCode::Call, 0, 3, 2),
            ret_one(0),
        ],
        vec![callee_value],
        3,
    );
    assert_eq!(results[0].as_int(), Some(42));
}

#[test]
fn test_tailcall() {
    let mut state = State::new().unwrap();
    let mut callee = proto(
        vec![Instruction::abc(OpCode::AddI, 1, 0, 128 + 1, false), ret_one(1)],
        2,
    );
    callee.num_params = 1;
    let callee_value = state.load(callee);

    // caller(n): return callee(n) as a tail call
    let results = call_with_k(
        &mut state,
        vec![
            Instruction::abx(OpCode::LoadK, 1, 0),
            loadi(2, 41),
            abc(OpCode::TailCall, 1, 2, 0),
        ],
        vec![callee_value],
        3,
    );
    assert_eq!(results[0].as_int(), Some(42));
}

#[test]
fn test_vararg_copies_extras() {
    let mut state = State::new().unwrap();
    let mut f = proto(
        vec![
            Instruction::abc(OpCode::Vararg, 0, 0, 3, false), // first two varargs
            abc(OpCode::Add, 2, 0, 1),
            ret_one(2),
        ],
        3,
    );
    f.is_vararg = true;
    let fv = state.load(f);
    let results = call(&mut state, fv, &[TValue::Int(30), TValue::Int(12)]);
    assert_eq!(results[0].as_int(), Some(42));
}

#[test]
fn test_deep_recursion_overflows_cleanly() {
    let mut state = State::new().unwrap();
    // f() = f() without tail call: must hit the depth guard, not the OS
    let mut f = proto(
        vec![
            abc(OpCode::GetUpval, 0, 0, 0),
            abc(OpCode::Call, 0, 1, 1),
            ret_one(0),
        ],
        2,
    );
    f.upvalues = vec![UpvalDesc {
        name: None,
        in_stack: false,
        index: 0,
    }];
    // Tie the knot through a closed upvalue holding the closure itself
    let fv = state.load_with_upvalues(f, vec![TValue::Nil]);
    if let TValue::Closure(c) = fv {
        let uv = aql_core::object::as_closure(&state.g.heap, c).unwrap().upvalues[0];
        if let Some(aql_core::Upvalue::Closed(slot)) =
            aql_core::object::as_upvalue_mut(&mut state.g.heap, uv)
        {
            *slot = fv;
        }
    }
    let err = try_call(&mut state, fv, &[]).unwrap_err();
    assert!(err.contains("stack overflow"), "got: {err}");
}

// === Protected calls ===

#[test]
fn test_pcall_catches_divide_by_zero() {
    let mut state = State::new().unwrap();
    let err = try_call_chunk(
        &mut state,
        proto(
            vec![
                loadi(0, 1),
                loadi(1, 0),
                abc(OpCode::IDiv, 2, 0, 1),
                ret_one(2),
            ],
            3,
        ),
    )
    .unwrap_err();
    assert!(err.contains("n//0"), "got: {err}");
    // The VM is intact after the unwind
    assert_eq!(state.get_top(), 0);
    let ok = run(&mut state, proto(vec![loadi(0, 9), ret_one(0)], 1));
    assert_eq!(ok[0].as_int(), Some(9));
}

#[test]
fn test_call_type_error_names_type() {
    let mut state = State::new().unwrap();
    let err = try_call_chunk(
        &mut state,
        proto(
            vec![loadi(0, 1), abc(OpCode::Call, 0, 1, 1), ret_one(0)],
            1,
        ),
    )
    .unwrap_err();
    assert!(err.contains("call a number"), "got: {err}");
}

// === Builtins ===

#[test]
fn test_builtin_len_and_type() {
    let mut state = State::new().unwrap();
    let s = TValue::Str(state.g.intern("four"));
    let results = call_with_k(
        &mut state,
        vec![
            Instruction::abx(OpCode::LoadK, 1, 0),
            Instruction::abc(OpCode::Builtin, 0, 2, 1, false), // len
            ret_one(0),
        ],
        vec![s],
        2,
    );
    assert_eq!(results[0].as_int(), Some(4));

    let results = call_with_k(
        &mut state,
        vec![
            loadi(1, 3),
            Instruction::abc(OpCode::Builtin, 0, 1, 1, false), // type
            ret_one(0),
        ],
        vec![],
        2,
    );
    assert_eq!(state.display(results[0]), "number");
}

#[test]
fn test_builtin_range_feeds_len() {
    let mut state = State::new().unwrap();
    let results = call_with_k(
        &mut state,
        vec![
            loadi(1, 10),
            Instruction::abc(OpCode::Builtin, 0, 5, 1, false), // range(10)
            abc(OpCode::Len, 0, 0, 0),
            ret_one(0),
        ],
        vec![],
        2,
    );
    assert_eq!(results[0].as_int(), Some(10));
}

// === Helpers ===

fn call_with_k(
    state: &mut State,
    code: Vec<Instruction>,
    constants: Vec<TValue>,
    max_stack: u8,
) -> Vec<TValue> {
    let p = proto_with_constants(code, constants, max_stack);
    run(state, p)
}

fn try_call_chunk(state: &mut State, p: aql_vm::Proto) -> Result<Vec<TValue>, String> {
    let f = state.load(p);
    try_call(state, f, &[])
}

trait LenOf {
    fn len_of_value(&self, v: TValue) -> Option<usize>;
}

impl LenOf for State {
    fn len_of_value(&self, v: TValue) -> Option<usize> {
        match v {
            TValue::Str(r) => aql_core::object::as_str(&self.g.heap, r).map(|s| s.len()),
            _ => None,
        }
    }
}
