//! Function Objects
//!
//! - [`Proto`]: the immutable compilation result for one function
//! - [`Closure`]: script closure (prototype + captured upvalues)
//! - [`NativeClosure`]: native function pointer + inline upvalue values
//! - [`Upvalue`]: a captured binding, open (stack slot) or closed (inline)
//!
//! Prototypes arrive from the external parser fully formed; the runtime
//! only reads them. Each carries a `ProtoId`, the stable identity the JIT
//! hotspot table and code cache key on.

use crate::bytecode::Instruction;
use crate::error::CoreError;
use crate::value::TValue;
use agc::GcRef;
use std::rc::Rc;

aql_util::define_idx!(ProtoId);

/// Upvalue descriptor in a prototype
#[derive(Debug, Clone)]
pub struct UpvalDesc {
    /// Capture name, for debug info
    pub name: Option<String>,
    /// True: captured from the enclosing frame's stack; false: from the
    /// enclosing closure's upvalue list
    pub in_stack: bool,
    /// Stack slot or upvalue index, per `in_stack`
    pub index: u8,
}

/// Local-variable debug record
#[derive(Debug, Clone)]
pub struct LocVar {
    pub name: String,
    /// First pc where the variable is live
    pub start_pc: u32,
    /// First pc where the variable is dead
    pub end_pc: u32,
}

/// Immutable function prototype
pub struct Proto {
    /// Stable identity for hotspot counters and the code cache
    pub id: ProtoId,
    /// Shared handles: the executor and the JIT read bytecode without
    /// holding a heap borrow
    pub code: Rc<Vec<Instruction>>,
    pub constants: Rc<Vec<TValue>>,
    /// Nested prototypes (CLOSURE operands index this list)
    pub protos: Vec<GcRef>,
    pub upvalues: Vec<UpvalDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    /// Registers the function needs; frames reserve this much stack
    pub max_stack_size: u8,
    /// Debug info
    pub locvars: Vec<LocVar>,
    pub line_info: Vec<u32>,
    pub source: String,
}

impl Proto {
    pub fn new(id: ProtoId, source: impl Into<String>) -> Self {
        Self {
            id,
            code: Rc::new(Vec::new()),
            constants: Rc::new(Vec::new()),
            protos: Vec::new(),
            upvalues: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            locvars: Vec::new(),
            line_info: Vec::new(),
            source: source.into(),
        }
    }

    /// Source line for a pc, when debug info is present
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }
}

/// Script closure: prototype + captured upvalue objects
pub struct Closure {
    pub proto: GcRef,
    pub upvalues: Vec<GcRef>,
}

/// Result type native functions return: number of results pushed
pub type NativeResult = std::result::Result<usize, CoreError>;

/// Native function: operates on the calling state through the seam trait
pub type NativeFn = fn(&mut dyn NativeContext) -> NativeResult;

/// Native closure: function pointer + bound upvalue values
pub struct NativeClosure {
    pub func: NativeFn,
    pub upvalues: Vec<TValue>,
}

/// What a native function may do with the calling state
///
/// `aql-vm`'s `State` implements this; keeping the trait here lets value
/// payloads carry native function pointers without a dependency cycle.
pub trait NativeContext {
    /// Number of positional arguments
    fn arg_count(&self) -> usize;

    /// Argument by position (nil when out of range)
    fn arg(&self, index: usize) -> TValue;

    /// Push one result
    fn push_result(&mut self, value: TValue);

    /// Upvalue of the running native closure (nil when out of range)
    fn upvalue(&self, index: usize) -> TValue;

    /// Intern a string and return its value
    fn intern(&mut self, s: &str) -> TValue;

    /// Human-readable rendering of a value (for `print`/`tostring`)
    fn display_value(&self, value: TValue) -> String;

    /// Create a range object value
    fn make_range(&mut self, start: i64, stop: i64, step: i64) -> NativeResult;

    /// Length of a value per LEN semantics, when defined
    fn value_len(&self, value: TValue) -> Option<i64>;
}

/// A captured variable binding
pub enum Upvalue {
    /// Points at a live stack slot of its owning thread
    Open { slot: usize },
    /// Owns the value inline after close
    Closed(TValue),
}

impl Upvalue {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    /// Stack slot of an open upvalue
    pub fn open_slot(&self) -> Option<usize> {
        match self {
            Upvalue::Open { slot } => Some(*slot),
            Upvalue::Closed(_) => None,
        }
    }
}
