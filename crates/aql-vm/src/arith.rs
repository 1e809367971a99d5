//! Arithmetic and Comparison Semantics
//!
//! - Integer fast path when both operands are integers; wrapping two's
//!   complement (mod 2^64)
//! - Mixed operands coerce to float
//! - True division and exponentiation always compute in floats
//! - Integer `//` and `%` truncate toward zero (the `%` result takes the
//!   dividend's sign); float `//` and `%` are floored
//! - Integer division/modulo by zero raise; float division by zero follows
//!   IEEE (±inf, NaN)
//! - Bitwise operators require integers; shift counts ≥ 64 yield 0
//! - Int/float comparison is exact: no lossy coercion, ever

use crate::error::{Result, VmError};
use aql_core::TValue;

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
}

fn type_error(op: &str, v: &TValue) -> VmError {
    VmError::runtime(format!(
        "attempt to perform arithmetic ({op}) on a {} value",
        v.type_name()
    ))
}

/// Binary arithmetic dispatch
pub fn arith(op: ArithOp, a: TValue, b: TValue) -> Result<TValue> {
    match op {
        ArithOp::Add => numeric_op(a, b, "add", |x, y| x.wrapping_add(y), |x, y| x + y),
        ArithOp::Sub => numeric_op(a, b, "sub", |x, y| x.wrapping_sub(y), |x, y| x - y),
        ArithOp::Mul => numeric_op(a, b, "mul", |x, y| x.wrapping_mul(y), |x, y| x * y),
        ArithOp::Div => {
            // True division is always float
            let x = a.coerce_float().ok_or_else(|| type_error("div", &a))?;
            let y = b.coerce_float().ok_or_else(|| type_error("div", &b))?;
            Ok(TValue::Float(x / y))
        }
        ArithOp::IDiv => match (a, b) {
            (TValue::Int(x), TValue::Int(y)) => {
                if y == 0 {
                    return Err(VmError::runtime("attempt to perform 'n//0'"));
                }
                // C truncation toward zero; MIN // -1 wraps to MIN
                Ok(TValue::Int(x.wrapping_div(y)))
            }
            _ => {
                let x = a.coerce_float().ok_or_else(|| type_error("idiv", &a))?;
                let y = b.coerce_float().ok_or_else(|| type_error("idiv", &b))?;
                Ok(TValue::Float((x / y).floor()))
            }
        },
        ArithOp::Mod => match (a, b) {
            (TValue::Int(x), TValue::Int(y)) => {
                if y == 0 {
                    return Err(VmError::runtime("attempt to perform 'n%%0'"));
                }
                // C truncation: the result takes the dividend's sign
                Ok(TValue::Int(x.wrapping_rem(y)))
            }
            _ => {
                let x = a.coerce_float().ok_or_else(|| type_error("mod", &a))?;
                let y = b.coerce_float().ok_or_else(|| type_error("mod", &b))?;
                // Floored modulo, result takes the divisor's sign
                let r = x - (x / y).floor() * y;
                Ok(TValue::Float(r))
            }
        },
        ArithOp::Pow => {
            let x = a.coerce_float().ok_or_else(|| type_error("pow", &a))?;
            let y = b.coerce_float().ok_or_else(|| type_error("pow", &b))?;
            Ok(TValue::Float(x.powf(y)))
        }
    }
}

fn numeric_op(
    a: TValue,
    b: TValue,
    name: &str,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<TValue> {
    match (a, b) {
        (TValue::Int(x), TValue::Int(y)) => Ok(TValue::Int(int_op(x, y))),
        _ => {
            let x = a.coerce_float().ok_or_else(|| type_error(name, &a))?;
            let y = b.coerce_float().ok_or_else(|| type_error(name, &b))?;
            Ok(TValue::Float(float_op(x, y)))
        }
    }
}

/// Unary minus
pub fn unm(a: TValue) -> Result<TValue> {
    match a {
        TValue::Int(x) => Ok(TValue::Int(x.wrapping_neg())),
        TValue::Float(x) => Ok(TValue::Float(-x)),
        _ => Err(type_error("unm", &a)),
    }
}

// === Bitwise ===

/// Bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

fn to_bits(v: &TValue, op: &str) -> Result<i64> {
    v.coerce_int().ok_or_else(|| {
        VmError::runtime(format!(
            "attempt to perform bitwise operation ({op}) on a {} value",
            v.type_name()
        ))
    })
}

pub fn bitwise(op: BitOp, a: TValue, b: TValue) -> Result<TValue> {
    let x = to_bits(&a, bit_name(op))?;
    let y = to_bits(&b, bit_name(op))?;
    Ok(TValue::Int(match op {
        BitOp::And => x & y,
        BitOp::Or => x | y,
        BitOp::Xor => x ^ y,
        BitOp::Shl => shift_left(x, y),
        BitOp::Shr => shift_left(x, y.wrapping_neg()),
    }))
}

fn bit_name(op: BitOp) -> &'static str {
    match op {
        BitOp::And => "band",
        BitOp::Or => "bor",
        BitOp::Xor => "bxor",
        BitOp::Shl => "shl",
        BitOp::Shr => "shr",
    }
}

/// Shift with well-defined over-wide behavior: |n| >= 64 yields 0;
/// negative counts shift the other way; right shifts are logical
pub fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> -n) as i64
    }
}

pub fn bnot(a: TValue) -> Result<TValue> {
    Ok(TValue::Int(!to_bits(&a, "bnot")?))
}

// === Precise Comparison ===

/// 2^63 as f64, exactly representable
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// i < f without lossy coercion
fn int_lt_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        return false;
    }
    if f >= TWO_POW_63 {
        return true; // f is above every i64
    }
    if f < -TWO_POW_63 {
        return false;
    }
    // In range: floor(f) is exact in i64
    let floor = f.floor();
    let fi = floor as i64;
    i < fi || (i == fi && floor < f)
}

/// f < i without lossy coercion
fn float_lt_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        return false;
    }
    if f >= TWO_POW_63 {
        return false;
    }
    if f < -TWO_POW_63 {
        return true;
    }
    (f.floor() as i64) < i || (f.floor() < f && f.floor() as i64 == i)
}

/// i <= f without lossy coercion
fn int_le_float(i: i64, f: f64) -> bool {
    !f.is_nan() && !float_lt_int(f, i)
}

fn float_le_int(f: f64, i: i64) -> bool {
    !f.is_nan() && !int_lt_float(i, f)
}

/// Numeric less-than; None when either side is not a number
pub fn num_lt(a: &TValue, b: &TValue) -> Option<bool> {
    match (a, b) {
        (TValue::Int(x), TValue::Int(y)) => Some(x < y),
        (TValue::Float(x), TValue::Float(y)) => Some(x < y),
        (TValue::Int(x), TValue::Float(y)) => Some(int_lt_float(*x, *y)),
        (TValue::Float(x), TValue::Int(y)) => Some(float_lt_int(*x, *y)),
        _ => None,
    }
}

/// Numeric less-or-equal; None when either side is not a number
pub fn num_le(a: &TValue, b: &TValue) -> Option<bool> {
    match (a, b) {
        (TValue::Int(x), TValue::Int(y)) => Some(x <= y),
        (TValue::Float(x), TValue::Float(y)) => Some(x <= y),
        (TValue::Int(x), TValue::Float(y)) => Some(int_le_float(*x, *y)),
        (TValue::Float(x), TValue::Int(y)) => Some(float_le_int(*x, *y)),
        _ => None,
    }
}

/// Numeric equality, exact across int/float
pub fn num_eq(a: &TValue, b: &TValue) -> Option<bool> {
    match (a, b) {
        (TValue::Int(x), TValue::Int(y)) => Some(x == y),
        (TValue::Float(x), TValue::Float(y)) => Some(x == y),
        (TValue::Int(x), TValue::Float(y)) | (TValue::Float(y), TValue::Int(x)) => {
            // Equal only when the float is integral, in range, and matches
            Some(
                y.fract() == 0.0
                    && *y >= -TWO_POW_63
                    && *y < TWO_POW_63
                    && (*y as i64) == *x,
            )
        }
        _ => None,
    }
}
