//! Builtin Functions
//!
//! The function set behind the BUILTIN opcode and, through
//! [`crate::api`], behind global names: print, type, len, tostring,
//! tonumber, range. All of them are plain native functions speaking the
//! [`NativeContext`] protocol, so embedders can also push them as values.

use aql_core::{CoreError, NativeContext, NativeFn, NativeResult, TValue};

/// BUILTIN operand ids
pub const BUILTIN_PRINT: u32 = 0;
pub const BUILTIN_TYPE: u32 = 1;
pub const BUILTIN_LEN: u32 = 2;
pub const BUILTIN_TOSTRING: u32 = 3;
pub const BUILTIN_TONUMBER: u32 = 4;
pub const BUILTIN_RANGE: u32 = 5;

/// print(...): renders every argument, space-separated, newline-terminated
pub fn builtin_print(ctx: &mut dyn NativeContext) -> NativeResult {
    let mut line = String::new();
    for i in 0..ctx.arg_count() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&ctx.display_value(ctx.arg(i)));
    }
    println!("{line}");
    Ok(0)
}

/// type(v): base type name
pub fn builtin_type(ctx: &mut dyn NativeContext) -> NativeResult {
    let name = ctx.arg(0).type_name();
    let s = ctx.intern(name);
    ctx.push_result(s);
    Ok(1)
}

/// len(v): byte length of strings, element count of containers
pub fn builtin_len(ctx: &mut dyn NativeContext) -> NativeResult {
    let v = ctx.arg(0);
    let n = ctx.value_len(v).ok_or(CoreError::TypeError {
        expected: "string or container",
        actual: v.type_name(),
    })?;
    ctx.push_result(TValue::Int(n));
    Ok(1)
}

/// tostring(v)
pub fn builtin_tostring(ctx: &mut dyn NativeContext) -> NativeResult {
    let rendered = ctx.display_value(ctx.arg(0));
    let s = ctx.intern(&rendered);
    ctx.push_result(s);
    Ok(1)
}

/// tonumber(v): numbers pass through, strings parse, everything else nil
pub fn builtin_tonumber(ctx: &mut dyn NativeContext) -> NativeResult {
    let v = ctx.arg(0);
    let result = match v {
        TValue::Int(_) | TValue::Float(_) => v,
        TValue::Str(_) => {
            let text = ctx.display_value(v);
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                TValue::Int(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                TValue::Float(f)
            } else {
                TValue::Nil
            }
        }
        _ => TValue::Nil,
    };
    ctx.push_result(result);
    Ok(1)
}

/// range(stop) / range(start, stop) / range(start, stop, step)
pub fn builtin_range(ctx: &mut dyn NativeContext) -> NativeResult {
    let int_arg = |ctx: &dyn NativeContext, i: usize| -> Result<i64, CoreError> {
        ctx.arg(i).coerce_int().ok_or(CoreError::TypeError {
            expected: "integer",
            actual: ctx.arg(i).type_name(),
        })
    };
    match ctx.arg_count() {
        1 => {
            let stop = int_arg(ctx, 0)?;
            ctx.make_range(0, stop, 1)
        }
        2 => {
            let start = int_arg(ctx, 0)?;
            let stop = int_arg(ctx, 1)?;
            ctx.make_range(start, stop, aql_core::RangeObject::infer_step(start, stop))
        }
        _ => {
            let start = int_arg(ctx, 0)?;
            let stop = int_arg(ctx, 1)?;
            let step = int_arg(ctx, 2)?;
            ctx.make_range(start, stop, step)
        }
    }
}

/// Resolve a BUILTIN opcode id
pub fn builtin_by_id(id: u32) -> Option<NativeFn> {
    Some(match id {
        BUILTIN_PRINT => builtin_print,
        BUILTIN_TYPE => builtin_type,
        BUILTIN_LEN => builtin_len,
        BUILTIN_TOSTRING => builtin_tostring,
        BUILTIN_TONUMBER => builtin_tonumber,
        BUILTIN_RANGE => builtin_range,
        _ => return None,
    })
}

/// Name table for registering builtins as globals
pub fn builtin_names() -> [(&'static str, NativeFn); 6] {
    [
        ("print", builtin_print as NativeFn),
        ("type", builtin_type as NativeFn),
        ("len", builtin_len as NativeFn),
        ("tostring", builtin_tostring as NativeFn),
        ("tonumber", builtin_tonumber as NativeFn),
        ("range", builtin_range as NativeFn),
    ]
}
