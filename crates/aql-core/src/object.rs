//! Arena Objects
//!
//! [`Object`] is the single payload type stored in the GC arena; every
//! collectable value points at one. This module owns the operations that
//! must see both an object and the heap at once:
//!
//! - the unified container constructor
//! - dict get/set/delete with heap-aware key hashing and equality
//! - slice-view reads and writes that forward to the source container
//! - deep container equality
//! - value display for diagnostics and the string builtins
//!
//! Reentrant operations temporarily detach the object from its slot
//! (`with_detached`), leaving a placeholder. Detach windows are short and
//! never cross a GC safepoint.

use crate::containers::{
    Array, Container, ContainerKind, Dict, RangeObject, Slice, Vector,
};
use crate::dtype::DataType;
use crate::error::{CoreError, Result};
use crate::function::{Closure, NativeClosure, Proto, Upvalue};
use crate::string::StrObject;
use crate::thread::Thread;
use crate::value::{BaseType, TValue, Tag};
use agc::{GcRef, Trace, Tracer};

/// The heap every runtime structure allocates from
pub type Heap = agc::Gc<Object>;

/// Userdata: opaque bytes plus one associated value
pub struct Userdata {
    pub data: Box<[u8]>,
    pub user_value: TValue,
}

/// Arena object payload
pub enum Object {
    Str(StrObject),
    Array(Array),
    Slice(Slice),
    Dict(Dict),
    Vector(Vector),
    Range(RangeObject),
    Proto(Proto),
    Closure(Closure),
    NativeClosure(NativeClosure),
    Upvalue(Upvalue),
    Thread(Thread),
    Userdata(Userdata),
    /// Transient placeholder while the object is detached for a reentrant
    /// operation; never observable at a GC safepoint
    Detached,
}

/// Header tag for object kinds that are not value-visible
const TAG_INTERNAL_UPVALUE: u8 = 0x4D;
const TAG_INTERNAL_DETACHED: u8 = 0x4E;

impl Object {
    /// Header tag byte; matches the tag of values pointing at this object
    pub fn tag_byte(&self) -> u8 {
        match self {
            Object::Str(_) => Tag::make(BaseType::String, 0, true).0,
            Object::Array(_) => Tag::make(BaseType::Array, 0, true).0,
            Object::Slice(_) => Tag::make(BaseType::Slice, 0, true).0,
            Object::Dict(_) => Tag::make(BaseType::Dict, 0, true).0,
            Object::Vector(_) => Tag::make(BaseType::Vector, 0, true).0,
            Object::Range(_) => Tag::make(BaseType::Range, 0, true).0,
            Object::Proto(_) => Tag::make(BaseType::Function, 0, true).0,
            Object::Closure(_) => Tag::make(BaseType::Function, 1, true).0,
            Object::NativeClosure(_) => Tag::make(BaseType::Function, 2, true).0,
            Object::Upvalue(_) => TAG_INTERNAL_UPVALUE,
            Object::Thread(_) => Tag::make(BaseType::Thread, 0, true).0,
            Object::Userdata(_) => Tag::make(BaseType::Userdata, 0, true).0,
            Object::Detached => TAG_INTERNAL_DETACHED,
        }
    }

    /// Bytes owned beyond the object box, for allocation accounting
    pub fn extra_bytes(&self) -> usize {
        match self {
            Object::Str(s) => s.len(),
            Object::Array(a) => a.byte_size(),
            Object::Slice(s) => s.byte_size(),
            Object::Dict(d) => d.byte_size(),
            Object::Vector(v) => v.byte_size(),
            Object::Range(_) => 0,
            Object::Proto(p) => {
                p.code.len() * 4 + p.constants.len() * std::mem::size_of::<TValue>()
            }
            Object::Closure(c) => c.upvalues.len() * std::mem::size_of::<GcRef>(),
            Object::NativeClosure(c) => c.upvalues.len() * std::mem::size_of::<TValue>(),
            Object::Upvalue(_) => 0,
            Object::Thread(t) => t.stack.len() * std::mem::size_of::<TValue>(),
            Object::Userdata(u) => u.data.len(),
            Object::Detached => 0,
        }
    }
}

impl Trace for Object {
    fn trace(&self, tracer: &mut Tracer) {
        match self {
            Object::Str(_) | Object::Range(_) | Object::Vector(_) | Object::Detached => {}
            Object::Array(a) => {
                for v in a.as_slice() {
                    tracer.mark_opt(v.gc_ref());
                }
            }
            Object::Slice(s) => {
                if let Some(view) = s.view() {
                    tracer.mark(view.source);
                }
                for v in s.as_slice() {
                    tracer.mark_opt(v.gc_ref());
                }
            }
            Object::Dict(d) => {
                for entry in d.entries() {
                    tracer.mark_opt(entry.key.gc_ref());
                    tracer.mark_opt(entry.value.gc_ref());
                }
            }
            Object::Proto(p) => {
                for k in p.constants.iter() {
                    tracer.mark_opt(k.gc_ref());
                }
                for &nested in &p.protos {
                    tracer.mark(nested);
                }
            }
            Object::Closure(c) => {
                tracer.mark(c.proto);
                for &uv in &c.upvalues {
                    tracer.mark(uv);
                }
            }
            Object::NativeClosure(c) => {
                for v in &c.upvalues {
                    tracer.mark_opt(v.gc_ref());
                }
            }
            Object::Upvalue(u) => {
                if let Upvalue::Closed(v) = u {
                    tracer.mark_opt(v.gc_ref());
                }
            }
            Object::Thread(t) => {
                for v in &t.stack[..t.top] {
                    tracer.mark_opt(v.gc_ref());
                }
                for &uv in &t.open_upvalues {
                    tracer.mark(uv);
                }
            }
            Object::Userdata(u) => {
                tracer.mark_opt(u.user_value.gc_ref());
            }
        }
    }
}

// === Allocation ===

/// Allocate any object with its tag and size accounting filled in
pub fn alloc_object(heap: &mut Heap, obj: Object) -> GcRef {
    let tag = obj.tag_byte();
    let extra = obj.extra_bytes();
    heap.alloc(tag, obj, extra)
}

/// Unified container constructor: `(kind, dtype, capacity)`
pub fn new_container(
    heap: &mut Heap,
    kind: ContainerKind,
    dtype: DataType,
    capacity: usize,
) -> Result<GcRef> {
    let obj = match kind {
        ContainerKind::Array => Object::Array(Array::new(dtype, capacity)),
        ContainerKind::Slice => Object::Slice(Slice::new(dtype, capacity)),
        ContainerKind::Dict => Object::Dict(Dict::new(dtype, capacity)),
        ContainerKind::Vector => Object::Vector(Vector::new(dtype, capacity)?),
    };
    Ok(alloc_object(heap, obj))
}

/// Wrap a container reference in its value kind
pub fn container_value(kind: ContainerKind, r: GcRef) -> TValue {
    match kind {
        ContainerKind::Array => TValue::Array(r),
        ContainerKind::Slice => TValue::Slice(r),
        ContainerKind::Dict => TValue::Dict(r),
        ContainerKind::Vector => TValue::Vector(r),
    }
}

// === Typed Accessors ===

macro_rules! accessor {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(heap: &Heap, r: GcRef) -> Option<&$ty> {
            match heap.get(r) {
                Some(Object::$variant(x)) => Some(x),
                _ => None,
            }
        }

        pub fn $get_mut(heap: &mut Heap, r: GcRef) -> Option<&mut $ty> {
            match heap.get_mut(r) {
                Some(Object::$variant(x)) => Some(x),
                _ => None,
            }
        }
    };
}

accessor!(as_str, as_str_mut, Str, StrObject);
accessor!(as_array, as_array_mut, Array, Array);
accessor!(as_slice_obj, as_slice_obj_mut, Slice, Slice);
accessor!(as_dict, as_dict_mut, Dict, Dict);
accessor!(as_vector, as_vector_mut, Vector, Vector);
accessor!(as_range, as_range_mut, Range, RangeObject);
accessor!(as_proto, as_proto_mut, Proto, Proto);
accessor!(as_closure, as_closure_mut, Closure, Closure);
accessor!(as_native_closure, as_native_closure_mut, NativeClosure, NativeClosure);
accessor!(as_upvalue, as_upvalue_mut, Upvalue, Upvalue);
accessor!(as_thread, as_thread_mut, Thread, Thread);

/// String bytes behind a value, when it is a string
pub fn str_bytes<'a>(heap: &'a Heap, v: &'a TValue) -> Option<&'a [u8]> {
    match v {
        TValue::Str(r) => as_str(heap, *r).map(|s| s.as_bytes()),
        _ => None,
    }
}

// === Detached Operation ===

/// Run `f` with the object taken out of its slot, so `f` may walk the heap
/// while holding the object mutably. The object is restored afterwards.
///
/// The detach window must not cross a GC safepoint.
pub fn with_detached<R>(
    heap: &mut Heap,
    r: GcRef,
    f: impl FnOnce(&mut Heap, &mut Object) -> R,
) -> Result<R> {
    let slot = heap
        .get_mut(r)
        .ok_or(CoreError::DeadRef { reference: r.raw() })?;
    let mut obj = std::mem::replace(slot, Object::Detached);
    let out = f(heap, &mut obj);
    *heap.get_mut(r).expect("detached slot vanished") = obj;
    Ok(out)
}

// === Key Hashing and Equality ===

/// Mixing multiply for integer-like keys
#[inline]
fn int_hash(i: u64) -> u64 {
    i.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Hash a dict key. NaN keys are invalid; -0.0 hashes as 0.0.
pub fn hash_key(heap: &Heap, seed: u64, key: &TValue) -> Result<u64> {
    match key {
        TValue::Nil | TValue::Empty | TValue::AbsentKey => Ok(0),
        TValue::Bool(b) => Ok(*b as u64),
        TValue::Int(i) => Ok(int_hash(*i as u64)),
        TValue::Float(n) => {
            if n.is_nan() {
                return Err(CoreError::InvalidKey {
                    reason: "NaN is not a valid dict key",
                });
            }
            let normalized = if *n == 0.0 { 0.0 } else { *n };
            Ok(int_hash(normalized.to_bits()))
        }
        TValue::Str(r) => {
            let s = as_str(heap, *r).ok_or(CoreError::DeadRef { reference: r.raw() })?;
            Ok(s.hash(seed))
        }
        TValue::NativeFn(f) => Ok(int_hash(*f as usize as u64)),
        TValue::LightUserdata(p) => Ok(int_hash(*p as u64)),
        // Other GC objects hash by identity
        other => Ok(int_hash(other.gc_ref().map(|r| r.raw()).unwrap_or(0) as u64)),
    }
}

/// Dict key equality: interning identity for short strings, content for
/// long strings, strict tag equality otherwise
pub fn key_equal(heap: &Heap, a: &TValue, b: &TValue) -> bool {
    match (a, b) {
        (TValue::Str(ra), TValue::Str(rb)) => {
            if ra == rb {
                return true;
            }
            match (as_str(heap, *ra), as_str(heap, *rb)) {
                // Distinct ids can only be equal if both are long strings
                (Some(sa), Some(sb)) => {
                    sa.is_long() && sb.is_long() && sa.as_bytes() == sb.as_bytes()
                }
                _ => false,
            }
        }
        (TValue::Int(x), TValue::Int(y)) => x == y,
        (TValue::Float(x), TValue::Float(y)) => x == y,
        // Strict tag match: 1 and 1.0 are distinct keys even on hash
        // collision
        _ => a.tag().0 == b.tag().0 && a.raw_equal(b),
    }
}

// === Dict Operations ===

/// Dict lookup; missing keys read as nil
pub fn dict_get(heap: &Heap, dict: GcRef, key: &TValue, seed: u64) -> Result<TValue> {
    if key.is_nil() {
        return Ok(TValue::Nil);
    }
    let hash = hash_key(heap, seed, key)?;
    let d = as_dict(heap, dict).ok_or(CoreError::DeadRef {
        reference: dict.raw(),
    })?;
    let found = d.get_raw(key, hash, |a, b| key_equal(heap, a, b));
    Ok(if found.is_absent_key() {
        TValue::Nil
    } else {
        found
    })
}

/// Dict store; a nil value deletes the key
pub fn dict_set(
    heap: &mut Heap,
    dict: GcRef,
    key: TValue,
    value: TValue,
    seed: u64,
) -> Result<()> {
    if key.is_nil() {
        return Err(CoreError::InvalidKey {
            reason: "nil is not a valid dict key",
        });
    }
    let hash = hash_key(heap, seed, &key)?;
    with_detached(heap, dict, |heap, obj| {
        let Object::Dict(d) = obj else {
            return Err(CoreError::TypeError {
                expected: "dict",
                actual: "object",
            });
        };
        if value.is_strict_nil() {
            d.remove(&key, hash, |a, b| key_equal(heap, a, b))?;
        } else {
            d.insert(key, value, hash, |a, b| key_equal(heap, a, b))?;
        }
        Ok(())
    })??;
    // Size may have changed (growth), and new references were stored
    refresh_extra(heap, dict);
    heap.barrier_backward(dict);
    Ok(())
}

/// Dict delete; returns the removed value (nil when absent)
pub fn dict_remove(heap: &mut Heap, dict: GcRef, key: &TValue, seed: u64) -> Result<TValue> {
    if key.is_nil() {
        return Ok(TValue::Nil);
    }
    let hash = hash_key(heap, seed, key)?;
    let removed = with_detached(heap, dict, |heap, obj| {
        let Object::Dict(d) = obj else {
            return Err(CoreError::TypeError {
                expected: "dict",
                actual: "object",
            });
        };
        d.remove(key, hash, |a, b| key_equal(heap, a, b))
    })??;
    refresh_extra(heap, dict);
    Ok(if removed.is_absent_key() {
        TValue::Nil
    } else {
        removed
    })
}

/// Re-sync GC byte accounting after a container resized its storage
pub fn refresh_extra(heap: &mut Heap, r: GcRef) {
    if let Some(obj) = heap.get(r) {
        let extra = obj.extra_bytes();
        heap.adjust_extra(r, extra);
    }
}

// === Slice Operations (view-aware) ===

/// Slice read; forwards through a view window to the source
pub fn slice_get(heap: &Heap, slice: GcRef, index: i64) -> Result<TValue> {
    let s = as_slice_obj(heap, slice).ok_or(CoreError::DeadRef {
        reference: slice.raw(),
    })?;
    match s.view() {
        None => Ok(s.get(index)),
        Some(view) => {
            if index < 0 || index as usize >= view.len {
                return Ok(TValue::Nil);
            }
            let source_index = (view.offset + index as usize) as i64;
            container_get_index(heap, view.source, source_index)
        }
    }
}

/// Slice write; forwards through a view window to the source
pub fn slice_set(heap: &mut Heap, slice: GcRef, index: i64, value: TValue) -> Result<()> {
    let view = {
        let s = as_slice_obj(heap, slice).ok_or(CoreError::DeadRef {
            reference: slice.raw(),
        })?;
        s.view().copied()
    };
    match view {
        None => {
            let s = as_slice_obj_mut(heap, slice).expect("slice vanished");
            s.set(index, value)?;
            refresh_extra(heap, slice);
            if let Some(child) = value.gc_ref() {
                heap.barrier_forward(slice, child);
            }
            Ok(())
        }
        Some(view) => {
            // Views never extend their window
            if index < 0 || index as usize >= view.len {
                return Err(CoreError::IndexOutOfBounds {
                    index,
                    length: view.len,
                });
            }
            let source_index = (view.offset + index as usize) as i64;
            container_set_index(heap, view.source, source_index, value)
        }
    }
}

/// Indexed read on any indexable container object
pub fn container_get_index(heap: &Heap, r: GcRef, index: i64) -> Result<TValue> {
    match heap.get(r) {
        Some(Object::Array(a)) => Ok(a.get(index)),
        Some(Object::Slice(_)) => slice_get(heap, r, index),
        Some(Object::Vector(v)) => v.get(index),
        Some(Object::Range(rg)) => Ok(rg.get(index)),
        Some(_) => Err(CoreError::TypeError {
            expected: "indexable container",
            actual: "object",
        }),
        None => Err(CoreError::DeadRef { reference: r.raw() }),
    }
}

/// Indexed write on any indexable container object
pub fn container_set_index(heap: &mut Heap, r: GcRef, index: i64, value: TValue) -> Result<()> {
    enum Kind {
        Array,
        Slice,
        Vector,
        Range,
        Other,
    }
    let kind = match heap.get(r) {
        Some(Object::Array(_)) => Kind::Array,
        Some(Object::Slice(_)) => Kind::Slice,
        Some(Object::Vector(_)) => Kind::Vector,
        Some(Object::Range(_)) => Kind::Range,
        Some(_) => Kind::Other,
        None => return Err(CoreError::DeadRef { reference: r.raw() }),
    };
    match kind {
        Kind::Array => {
            let a = as_array_mut(heap, r).expect("array vanished");
            a.set(index, value)?;
            if let Some(child) = value.gc_ref() {
                heap.barrier_forward(r, child);
            }
            Ok(())
        }
        Kind::Slice => slice_set(heap, r, index, value),
        Kind::Vector => {
            let v = as_vector_mut(heap, r).expect("vector vanished");
            v.set(index, value)
        }
        Kind::Range => Err(CoreError::ReadOnly),
        Kind::Other => Err(CoreError::TypeError {
            expected: "indexable container",
            actual: "object",
        }),
    }
}

// === Deep Equality ===

/// Recursion guard for cyclic container graphs
const DEEP_EQUAL_MAX_DEPTH: usize = 32;

/// Structural equality with dtype specializations. `seed` is the VM's
/// string-hash seed (dict lookups need it).
pub fn deep_equal(heap: &Heap, seed: u64, a: &TValue, b: &TValue) -> bool {
    deep_equal_at(heap, seed, a, b, 0)
}

fn deep_equal_at(heap: &Heap, seed: u64, a: &TValue, b: &TValue, depth: usize) -> bool {
    if a.raw_equal(b) {
        return true;
    }
    if depth >= DEEP_EQUAL_MAX_DEPTH {
        return false;
    }
    match (a, b) {
        (TValue::Str(ra), TValue::Str(rb)) => match (as_str(heap, *ra), as_str(heap, *rb)) {
            (Some(sa), Some(sb)) => {
                sa.is_long() && sb.is_long() && sa.as_bytes() == sb.as_bytes()
            }
            _ => false,
        },
        (TValue::Array(ra), TValue::Array(rb)) => {
            match (as_array(heap, *ra), as_array(heap, *rb)) {
                (Some(xa), Some(xb)) => {
                    xa.dtype() == xb.dtype()
                        && xa.len() == xb.len()
                        && xa
                            .as_slice()
                            .iter()
                            .zip(xb.as_slice())
                            .all(|(x, y)| deep_equal_at(heap, seed, x, y, depth + 1))
                }
                _ => false,
            }
        }
        (TValue::Slice(ra), TValue::Slice(rb)) => {
            match (as_slice_obj(heap, *ra), as_slice_obj(heap, *rb)) {
                (Some(xa), Some(xb)) => {
                    if xa.dtype() != xb.dtype() || xa.len() != xb.len() {
                        return false;
                    }
                    (0..xa.len() as i64).all(|i| {
                        let va = slice_get(heap, *ra, i).unwrap_or(TValue::Nil);
                        let vb = slice_get(heap, *rb, i).unwrap_or(TValue::Nil);
                        deep_equal_at(heap, seed, &va, &vb, depth + 1)
                    })
                }
                _ => false,
            }
        }
        (TValue::Vector(ra), TValue::Vector(rb)) => {
            match (as_vector(heap, *ra), as_vector(heap, *rb)) {
                (Some(xa), Some(xb)) => {
                    if xa.dtype() != xb.dtype() || xa.len() != xb.len() {
                        return false;
                    }
                    if xa.dtype().is_integer() {
                        // Raw compare for integer storage
                        xa.raw_bytes() == xb.raw_bytes()
                    } else {
                        // IEEE compare per element: NaN breaks equality
                        (0..xa.len() as i64).all(|i| match (xa.get(i), xb.get(i)) {
                            (Ok(x), Ok(y)) => x.raw_equal(&y),
                            _ => false,
                        })
                    }
                }
                _ => false,
            }
        }
        (TValue::Dict(ra), TValue::Dict(rb)) => match (as_dict(heap, *ra), as_dict(heap, *rb)) {
            (Some(xa), Some(xb)) => {
                if xa.dtype() != xb.dtype() || xa.len() != xb.len() {
                    return false;
                }
                xa.iter().all(|(k, va)| {
                    let vb = dict_get(heap, *rb, k, seed).unwrap_or(TValue::Nil);
                    !vb.is_nil() && deep_equal_at(heap, seed, va, &vb, depth + 1)
                })
            }
            _ => false,
        },
        (TValue::Range(ra), TValue::Range(rb)) => {
            match (as_range(heap, *ra), as_range(heap, *rb)) {
                (Some(xa), Some(xb)) => {
                    xa.start == xb.start && xa.stop == xb.stop && xa.step == xb.step
                }
                _ => false,
            }
        }
        _ => false,
    }
}

// === Display ===

/// Canonical float rendering: integral floats keep a trailing ".0"
pub fn format_float(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Human-readable rendering for diagnostics, `print`, and `tostring`
pub fn display_value(heap: &Heap, v: &TValue) -> String {
    match v {
        TValue::Nil | TValue::Empty | TValue::AbsentKey => "nil".to_string(),
        TValue::Bool(b) => b.to_string(),
        TValue::Int(i) => i.to_string(),
        TValue::Float(n) => format_float(*n),
        TValue::Str(r) => as_str(heap, *r)
            .map(|s| s.to_display())
            .unwrap_or_else(|| "<dead string>".to_string()),
        TValue::NativeFn(_) => "<native function>".to_string(),
        TValue::LightUserdata(p) => format!("<lightuserdata {:#x}>", p),
        other => {
            let id = other.gc_ref().map(|r| r.raw()).unwrap_or(0);
            format!("<{} #{}>", other.type_name(), id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::StringTable;
    use agc::GcConfig;

    fn heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    // === Unified Constructor ===

    #[test]
    fn test_new_container_all_kinds() {
        let mut h = heap();
        for kind in [
            ContainerKind::Array,
            ContainerKind::Slice,
            ContainerKind::Dict,
            ContainerKind::Vector,
        ] {
            let dtype = if kind == ContainerKind::Vector {
                DataType::F64
            } else {
                DataType::Any
            };
            let r = new_container(&mut h, kind, dtype, 8).unwrap();
            assert!(h.contains(r));
            let value = container_value(kind, r);
            assert_eq!(h.tag(r).unwrap(), value.tag().0, "header/value tag mismatch");
        }
    }

    // === Dict Through the Heap ===

    #[test]
    fn test_dict_string_keys_roundtrip() {
        let mut h = heap();
        let mut table = StringTable::new(7);
        let d = new_container(&mut h, ContainerKind::Dict, DataType::Any, 16).unwrap();

        for i in 0..100 {
            let key = TValue::Str(table.intern(&mut h, format!("key-{i}").as_bytes()));
            dict_set(&mut h, d, key, TValue::Int(i), table.seed()).unwrap();
        }
        let dict = as_dict(&h, d).unwrap();
        assert_eq!(dict.len(), 100);
        assert!(dict.capacity() >= 128);
        assert!(dict.validate_distances());

        for i in 0..100 {
            let key = TValue::Str(table.intern(&mut h, format!("key-{i}").as_bytes()));
            let v = dict_get(&h, d, &key, table.seed()).unwrap();
            assert_eq!(v.as_int(), Some(i), "key-{i} lost");
        }
    }

    #[test]
    fn test_dict_delete_even_keys() {
        let mut h = heap();
        let mut table = StringTable::new(7);
        let d = new_container(&mut h, ContainerKind::Dict, DataType::Any, 16).unwrap();
        let seed = table.seed();

        for i in 0..100 {
            let key = TValue::Str(table.intern(&mut h, format!("key-{i}").as_bytes()));
            dict_set(&mut h, d, key, TValue::Int(i), seed).unwrap();
        }
        for i in (0..100).step_by(2) {
            let key = TValue::Str(table.intern(&mut h, format!("key-{i}").as_bytes()));
            dict_set(&mut h, d, key, TValue::Nil, seed).unwrap();
        }
        for i in 0..100 {
            let key = TValue::Str(table.intern(&mut h, format!("key-{i}").as_bytes()));
            let v = dict_get(&h, d, &key, seed).unwrap();
            if i % 2 == 0 {
                assert!(v.is_nil());
            } else {
                assert_eq!(v.as_int(), Some(i));
            }
        }
        assert!(as_dict(&h, d).unwrap().validate_distances());
    }

    #[test]
    fn test_dict_long_string_keys_compare_by_content() {
        let mut h = heap();
        let mut table = StringTable::new(7);
        let d = new_container(&mut h, ContainerKind::Dict, DataType::Any, 16).unwrap();
        let long = "x".repeat(60);
        let k1 = TValue::Str(table.intern(&mut h, long.as_bytes()));
        let k2 = TValue::Str(table.intern(&mut h, long.as_bytes()));
        assert!(!k1.raw_equal(&k2), "long strings are separate objects");

        dict_set(&mut h, d, k1, TValue::Int(1), table.seed()).unwrap();
        let v = dict_get(&h, d, &k2, table.seed()).unwrap();
        assert_eq!(v.as_int(), Some(1), "content-equal long key must hit");
    }

    #[test]
    fn test_dict_rejects_nan_and_nil_keys() {
        let mut h = heap();
        let d = new_container(&mut h, ContainerKind::Dict, DataType::Any, 16).unwrap();
        assert!(dict_set(&mut h, d, TValue::Float(f64::NAN), TValue::Int(1), 0).is_err());
        assert!(dict_set(&mut h, d, TValue::Nil, TValue::Int(1), 0).is_err());
    }

    #[test]
    fn test_dict_int_float_keys_distinct() {
        let mut h = heap();
        let d = new_container(&mut h, ContainerKind::Dict, DataType::Any, 16).unwrap();
        dict_set(&mut h, d, TValue::Int(1), TValue::Int(10), 0).unwrap();
        dict_set(&mut h, d, TValue::Float(1.0), TValue::Int(20), 0).unwrap();
        assert_eq!(dict_get(&h, d, &TValue::Int(1), 0).unwrap().as_int(), Some(10));
        assert_eq!(
            dict_get(&h, d, &TValue::Float(1.0), 0).unwrap().as_int(),
            Some(20)
        );
    }

    // === Slice Views ===

    #[test]
    fn test_view_reads_source() {
        let mut h = heap();
        let src = new_container(&mut h, ContainerKind::Slice, DataType::Any, 8).unwrap();
        for i in 0..8 {
            slice_set(&mut h, src, i, TValue::Int(i * 10)).unwrap();
        }
        let view_obj = Object::Slice(Slice::new_view(DataType::Any, src, 2, 4));
        let view = alloc_object(&mut h, view_obj);

        assert_eq!(slice_get(&h, view, 0).unwrap().as_int(), Some(20));
        assert_eq!(slice_get(&h, view, 3).unwrap().as_int(), Some(50));
        assert!(slice_get(&h, view, 4).unwrap().is_nil());
    }

    #[test]
    fn test_view_write_reflects_in_source() {
        let mut h = heap();
        let src = new_container(&mut h, ContainerKind::Slice, DataType::Any, 8).unwrap();
        for i in 0..8 {
            slice_set(&mut h, src, i, TValue::Int(0)).unwrap();
        }
        let view = alloc_object(
            &mut h,
            Object::Slice(Slice::new_view(DataType::Any, src, 2, 4)),
        );

        slice_set(&mut h, view, 1, TValue::Int(77)).unwrap();
        assert_eq!(slice_get(&h, src, 3).unwrap().as_int(), Some(77));
        // Out-of-window writes rejected
        assert!(slice_set(&mut h, view, 4, TValue::Int(1)).is_err());
    }

    #[test]
    fn test_view_is_traced_so_source_survives() {
        let mut h = heap();
        let src = new_container(&mut h, ContainerKind::Slice, DataType::Any, 4).unwrap();
        let view = alloc_object(
            &mut h,
            Object::Slice(Slice::new_view(DataType::Any, src, 0, 2)),
        );
        h.collect_full(&[view]);
        assert!(h.contains(src), "view must keep its source alive");
    }

    // === Deep Equality ===

    #[test]
    fn test_deep_equal_arrays() {
        let mut h = heap();
        let a = new_container(&mut h, ContainerKind::Array, DataType::Any, 3).unwrap();
        let b = new_container(&mut h, ContainerKind::Array, DataType::Any, 3).unwrap();
        for i in 0..3 {
            container_set_index(&mut h, a, i, TValue::Int(i)).unwrap();
            container_set_index(&mut h, b, i, TValue::Int(i)).unwrap();
        }
        assert!(deep_equal(&h, 0, &TValue::Array(a), &TValue::Array(b)));
        container_set_index(&mut h, b, 0, TValue::Int(9)).unwrap();
        assert!(!deep_equal(&h, 0, &TValue::Array(a), &TValue::Array(b)));
    }

    #[test]
    fn test_deep_equal_int_vectors_via_raw_bytes() {
        let mut h = heap();
        let a = new_container(&mut h, ContainerKind::Vector, DataType::I32, 4).unwrap();
        let b = new_container(&mut h, ContainerKind::Vector, DataType::I32, 4).unwrap();
        assert!(deep_equal(&h, 0, &TValue::Vector(a), &TValue::Vector(b)));
        as_vector_mut(&mut h, a).unwrap().set(1, TValue::Int(5)).unwrap();
        assert!(!deep_equal(&h, 0, &TValue::Vector(a), &TValue::Vector(b)));
    }

    #[test]
    fn test_deep_equal_nan_vector_not_equal_to_itself() {
        let mut h = heap();
        let a = new_container(&mut h, ContainerKind::Vector, DataType::F64, 1).unwrap();
        as_vector_mut(&mut h, a)
            .unwrap()
            .set(0, TValue::Float(f64::NAN))
            .unwrap();
        assert!(!deep_equal(&h, 0, &TValue::Vector(a), &TValue::Vector(a)));
    }

    #[test]
    fn test_cyclic_containers_terminate() {
        let mut h = heap();
        let a = new_container(&mut h, ContainerKind::Array, DataType::Any, 1).unwrap();
        let b = new_container(&mut h, ContainerKind::Array, DataType::Any, 1).unwrap();
        container_set_index(&mut h, a, 0, TValue::Array(b)).unwrap();
        container_set_index(&mut h, b, 0, TValue::Array(a)).unwrap();
        // Must not hang
        let _ = deep_equal(&h, 0, &TValue::Array(a), &TValue::Array(b));
    }

    // === Display ===

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_display_values() {
        let mut h = heap();
        let mut table = StringTable::new(7);
        let s = table.intern(&mut h, b"hi");
        assert_eq!(display_value(&h, &TValue::Str(s)), "hi");
        assert_eq!(display_value(&h, &TValue::Nil), "nil");
        assert_eq!(display_value(&h, &TValue::Int(-3)), "-3");
        assert_eq!(display_value(&h, &TValue::Bool(true)), "true");
    }
}
