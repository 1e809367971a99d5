//! Native-Call Context
//!
//! The concrete [`NativeContext`] handed to native functions: argument
//! access over the caller's stack window, a result buffer, and the few
//! heap services natives legitimately need (interning, display, range
//! construction). Results are buffered and moved into place by the caller
//! so a native can never corrupt frame layout.

use crate::state::GlobalState;
use aql_core::containers::Container;
use aql_core::object::{self, Object};
use aql_core::{NativeContext, NativeResult, RangeObject, TValue, Thread};

pub(crate) struct NativeCallCtx<'a> {
    g: &'a mut GlobalState,
    th: &'a Thread,
    func: usize,
    nargs: usize,
    upvalues: Vec<TValue>,
    results: Vec<TValue>,
}

impl<'a> NativeCallCtx<'a> {
    pub fn new(
        g: &'a mut GlobalState,
        th: &'a mut Thread,
        func: usize,
        nargs: usize,
        upvalues: Vec<TValue>,
    ) -> Self {
        Self {
            g,
            th,
            func,
            nargs,
            upvalues,
            results: Vec::new(),
        }
    }

    pub fn take_results(self) -> Vec<TValue> {
        self.results
    }
}

impl NativeContext for NativeCallCtx<'_> {
    fn arg_count(&self) -> usize {
        self.nargs
    }

    fn arg(&self, index: usize) -> TValue {
        if index >= self.nargs {
            return TValue::Nil;
        }
        self.th.slot(self.func + 1 + index)
    }

    fn push_result(&mut self, value: TValue) {
        self.results.push(value);
    }

    fn upvalue(&self, index: usize) -> TValue {
        self.upvalues.get(index).copied().unwrap_or(TValue::Nil)
    }

    fn intern(&mut self, s: &str) -> TValue {
        TValue::Str(self.g.intern(s))
    }

    fn display_value(&self, value: TValue) -> String {
        object::display_value(&self.g.heap, &value)
    }

    fn make_range(&mut self, start: i64, stop: i64, step: i64) -> NativeResult {
        let range = RangeObject::new(start, stop, step)?;
        let r = object::alloc_object(&mut self.g.heap, Object::Range(range));
        self.results.push(TValue::Range(r));
        Ok(1)
    }

    fn value_len(&self, value: TValue) -> Option<i64> {
        match value {
            TValue::Str(r) => object::as_str(&self.g.heap, r).map(|s| s.len() as i64),
            TValue::Array(r) => object::as_array(&self.g.heap, r).map(|a| a.len() as i64),
            TValue::Slice(r) => object::as_slice_obj(&self.g.heap, r).map(|s| s.len() as i64),
            TValue::Dict(r) => object::as_dict(&self.g.heap, r).map(|d| d.len() as i64),
            TValue::Vector(r) => object::as_vector(&self.g.heap, r).map(|v| v.len() as i64),
            TValue::Range(r) => object::as_range(&self.g.heap, r).map(|x| x.len() as i64),
            _ => None,
        }
    }
}
