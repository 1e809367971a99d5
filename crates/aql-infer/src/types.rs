//! Inference Type Lattice
//!
//! [`InferType`] is the inference-side view of runtime types, a small
//! lattice with `Any` on top and `Unknown` for registers the analysis has
//! not reached. [`TypeInfo`] is the per-register record.

use aql_core::{BaseType, TValue};

/// Inference-side type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferType {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Function,
    Userdata,
    Array,
    Slice,
    Dict,
    Vector,
    Range,
    Thread,
    /// Dynamically typed: any runtime value
    Any,
    /// Not yet computed
    Unknown,
}

impl InferType {
    /// Exact type of a constant value
    pub fn of_value(v: &TValue) -> InferType {
        match v.tag().base() {
            BaseType::Nil => InferType::Nil,
            BaseType::Boolean => InferType::Boolean,
            BaseType::Number => {
                if v.is_int() {
                    InferType::Integer
                } else {
                    InferType::Float
                }
            }
            BaseType::String => InferType::String,
            BaseType::Function => InferType::Function,
            BaseType::LightUserdata | BaseType::Userdata => InferType::Userdata,
            BaseType::Thread => InferType::Thread,
            BaseType::Array => InferType::Array,
            BaseType::Slice => InferType::Slice,
            BaseType::Dict => InferType::Dict,
            BaseType::Vector => InferType::Vector,
            BaseType::Range => InferType::Range,
        }
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, InferType::Integer | InferType::Float)
    }

    /// Join for control-flow merges: equal types keep themselves, numeric
    /// pairs promote to Float, everything else degrades to Any
    pub fn join(self, other: InferType) -> InferType {
        if self == other {
            return self;
        }
        match (self, other) {
            (InferType::Unknown, x) | (x, InferType::Unknown) => x,
            (a, b) if a.is_numeric() && b.is_numeric() => InferType::Float,
            _ => InferType::Any,
        }
    }
}

/// Per-register inference state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferState {
    Unknown,
    /// Queued in the batch buffer, not yet applied
    Pending,
    Computed,
    /// Computation failed; the fallback type is in force
    Invalid,
}

/// Degradation level when inference cannot proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackLevel {
    /// Keep the last known type
    ToKnown,
    /// Degrade to Any
    ToAny,
    /// Leave the decision to a runtime check
    ToRuntime,
    /// Unrecoverable; reported to the caller
    ToError,
}

/// One recorded degradation
#[derive(Debug, Clone)]
pub struct Fallback {
    pub level: FallbackLevel,
    pub fallback_type: InferType,
    pub reason: &'static str,
    /// pc that triggered it, when applicable
    pub pc: Option<usize>,
}

/// Per-register type record
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub inferred_type: InferType,
    /// Runtime-observed type, fed back by the profiler (Unknown until then)
    pub actual_type: InferType,
    /// Inference confidence, 0..100
    pub confidence: f64,
    pub usage_count: u32,
    pub mutation_count: u32,
    pub state: InferState,
    pub flags: u32,
}

/// Flag: entry marked for recomputation by a batch flush
pub const TYPEINFO_FLAG_RECOMPUTE: u32 = 1 << 0;

impl TypeInfo {
    pub fn unknown() -> Self {
        Self {
            inferred_type: InferType::Unknown,
            actual_type: InferType::Unknown,
            confidence: 0.0,
            usage_count: 0,
            mutation_count: 0,
            state: InferState::Unknown,
            flags: 0,
        }
    }

    /// Exact literal assignment
    pub fn exact(ty: InferType) -> Self {
        Self {
            inferred_type: ty,
            actual_type: InferType::Unknown,
            confidence: 100.0,
            usage_count: 0,
            mutation_count: 0,
            state: InferState::Computed,
            flags: 0,
        }
    }

    /// Computed assignment with the given confidence
    pub fn computed(ty: InferType, confidence: f64) -> Self {
        Self {
            inferred_type: ty,
            actual_type: InferType::Unknown,
            confidence: confidence.clamp(0.0, 100.0),
            usage_count: 0,
            mutation_count: 0,
            state: InferState::Computed,
            flags: 0,
        }
    }
}

impl Default for TypeInfo {
    fn default() -> Self {
        Self::unknown()
    }
}
