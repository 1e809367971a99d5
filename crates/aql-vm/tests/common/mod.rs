//! Shared test fixtures: hand-assembled prototypes
#![allow(dead_code)]

use aql_vm::{Instruction, OpCode, Proto, ProtoId, State, TValue};
use std::rc::Rc;

/// Assemble a prototype from instructions
pub fn proto(code: Vec<Instruction>, max_stack: u8) -> Proto {
    let mut p = Proto::new(ProtoId(0), "test-chunk");
    p.code = Rc::new(code);
    p.max_stack_size = max_stack;
    p
}

pub fn proto_with_constants(
    code: Vec<Instruction>,
    constants: Vec<TValue>,
    max_stack: u8,
) -> Proto {
    let mut p = proto(code, max_stack);
    p.constants = Rc::new(constants);
    p
}

/// Run a zero-argument chunk, returning its results
pub fn run(state: &mut State, p: Proto) -> Vec<TValue> {
    let f = state.load(p);
    call(state, f, &[])
}

/// Call a loaded function value through the API stack
pub fn call(state: &mut State, f: TValue, args: &[TValue]) -> Vec<TValue> {
    try_call(state, f, args).expect("call failed")
}

pub fn try_call(
    state: &mut State,
    f: TValue,
    args: &[TValue],
) -> Result<Vec<TValue>, String> {
    let base = state.get_top();
    state.push_value_for_test(f);
    for &a in args {
        state.push_value_for_test(a);
    }
    let status = state.pcall(args.len(), -1, 0);
    if status != aql_vm::Status::Ok {
        let msg = state
            .to_string_x(-1)
            .map(|(s, _)| s)
            .unwrap_or_else(|| "unknown error".to_string());
        state.pop(1);
        return Err(msg);
    }
    let mut results = Vec::new();
    for i in base..state.get_top() {
        results.push(state.value_at(i as i32 + 1));
    }
    state.set_top(base).unwrap();
    Ok(results)
}

// Small extension so tests can push arbitrary values
pub trait PushValue {
    fn push_value_for_test(&mut self, v: TValue);
}

impl PushValue for State {
    fn push_value_for_test(&mut self, v: TValue) {
        match v {
            TValue::Nil => self.push_nil().unwrap(),
            TValue::Bool(b) => self.push_boolean(b).unwrap(),
            TValue::Int(i) => self.push_integer(i).unwrap(),
            TValue::Float(n) => self.push_number(n).unwrap(),
            other => {
                // Collectable values go through the raw stack
                assert!(self.main.push(other), "stack overflow in test push");
            }
        }
    }
}

/// Shorthand constructors
pub fn loadi(a: u32, v: i32) -> Instruction {
    Instruction::asbx(OpCode::LoadI, a, v)
}

pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Instruction {
    Instruction::abc(op, a, b, c, false)
}

pub fn ret_one(a: u32) -> Instruction {
    Instruction::abc(OpCode::RetOne, a, 0, 0, false)
}
