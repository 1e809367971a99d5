//! Forward Analyzer
//!
//! One pc-ordered pass per prototype. Each instruction reads the
//! `TypeInfo` of its source operands, computes the destination type from
//! the opcode rule, and queues the update through the batch buffer.
//! Overwrites of an already-computed register join with the existing type;
//! a join that degrades two concrete types to Any is recorded as a
//! conflict fallback.

use crate::batch::BatchBuffer;
use crate::error::{InferError, Result};
use crate::pool::TypeInfoPool;
use crate::types::{Fallback, FallbackLevel, InferState, InferType, TypeInfo};
use aql_core::object::{as_proto, Heap};
use aql_core::{GcRef, Instruction, OpCode, TValue};
use aql_util::{TimeStats, Timer};

/// Analyzer configuration
#[derive(Debug, Clone)]
pub struct InferConfig {
    /// Nested-prototype recursion limit
    pub max_recursion_depth: usize,
    /// Analyze nested prototypes reached through CLOSURE
    pub analyze_nested: bool,
}

impl InferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_recursion_depth == 0 {
            return Err(InferError::Configuration(
                "max_recursion_depth must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 16,
            analyze_nested: true,
        }
    }
}

/// Analysis result for one prototype
#[derive(Debug)]
pub struct TypeAnalysis {
    /// Final per-register records
    pub registers: Vec<TypeInfo>,
    /// Mean confidence of computed registers, 0..100
    pub stability: f64,
    /// Recorded degradations
    pub fallbacks: Vec<Fallback>,
    pub instructions_analyzed: usize,
}

impl TypeAnalysis {
    /// Registers that reached a computed state
    pub fn computed_count(&self) -> usize {
        self.registers
            .iter()
            .filter(|r| r.state == InferState::Computed)
            .count()
    }
}

/// Reusable analysis context (pool + batch buffer survive across calls)
pub struct TypeInferContext {
    config: InferConfig,
    pool: TypeInfoPool,
    /// Prototypes analyzed over this context's lifetime
    pub analyses: u64,
    /// Fallbacks recorded over this context's lifetime
    pub total_fallbacks: u64,
    /// Per-analysis wall-clock accounting
    pub analysis_time: TimeStats,
}

impl TypeInferContext {
    pub fn new(config: InferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: TypeInfoPool::new(),
            analyses: 0,
            total_fallbacks: 0,
            analysis_time: TimeStats::new(),
        })
    }

    /// Analyze one prototype
    pub fn infer(&mut self, heap: &Heap, proto: GcRef) -> Result<TypeAnalysis> {
        let timer = Timer::new();
        let analysis = self.infer_at(heap, proto, 0);
        self.analysis_time.record(timer.elapsed());
        analysis
    }

    fn infer_at(&mut self, heap: &Heap, proto: GcRef, depth: usize) -> Result<TypeAnalysis> {
        self.analyses += 1;
        let p = as_proto(heap, proto).ok_or(InferError::DeadProto)?;
        let nregs = p.max_stack_size as usize;

        // Working records come from the pool; results are copied out at
        // the end and the handles returned
        let handles: Vec<_> = (0..nregs).map(|_| self.pool.alloc()).collect();
        let mut registers = vec![TypeInfo::unknown(); nregs];
        let mut batch = BatchBuffer::new();
        let mut fallbacks = Vec::new();

        // Parameters arrive with unknown runtime types
        for reg in registers.iter_mut().take(p.num_params as usize) {
            *reg = TypeInfo::computed(InferType::Any, 50.0);
        }

        let code = p.code.clone();
        let constants = p.constants.clone();
        let nested = p.protos.clone();

        for (pc, inst) in code.iter().enumerate() {
            self.step(
                heap,
                *inst,
                pc,
                constants.as_slice(),
                &nested,
                depth,
                &mut registers,
                &mut batch,
                &mut fallbacks,
            );
        }
        batch.flush(&mut registers);

        for h in handles {
            self.pool.free(h);
        }
        self.total_fallbacks += fallbacks.len() as u64;

        let stability = stability_of(&registers);
        log::debug!(
            "inferred proto {:?}: {} regs, stability {:.1}, {} fallbacks",
            p.id,
            nregs,
            stability,
            fallbacks.len()
        );
        Ok(TypeAnalysis {
            registers,
            stability,
            fallbacks,
            instructions_analyzed: code.len(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        heap: &Heap,
        inst: Instruction,
        pc: usize,
        constants: &[TValue],
        nested: &[GcRef],
        depth: usize,
        registers: &mut Vec<TypeInfo>,
        batch: &mut BatchBuffer,
        fallbacks: &mut Vec<Fallback>,
    ) {
        let op = match inst.opcode() {
            Ok(op) => op,
            Err(_) => {
                fallbacks.push(Fallback {
                    level: FallbackLevel::ToAny,
                    fallback_type: InferType::Any,
                    reason: "unknown opcode",
                    pc: Some(pc),
                });
                return;
            }
        };
        let a = inst.a();

        let queue = |registers: &mut Vec<TypeInfo>,
                         batch: &mut BatchBuffer,
                         fallbacks: &mut Vec<Fallback>,
                         reg: u32,
                         info: TypeInfo| {
            merge_update(registers, batch, fallbacks, reg, info, pc);
        };

        let read = |registers: &mut Vec<TypeInfo>, batch: &BatchBuffer, reg: u32| -> TypeInfo {
            if let Some(r) = registers.get_mut(reg as usize) {
                r.usage_count += 1;
            }
            // Pending updates shadow the applied table
            if let Some(pending) = batch.lookup(reg) {
                let mut info = *pending;
                info.state = InferState::Computed;
                return info;
            }
            registers.get(reg as usize).copied().unwrap_or_default()
        };

        let const_type = |index: usize| -> InferType {
            constants
                .get(index)
                .map(InferType::of_value)
                .unwrap_or(InferType::Unknown)
        };

        match op {
            // === Literal loads ===
            OpCode::LoadI => queue(registers, batch, fallbacks, a, TypeInfo::exact(InferType::Integer)),
            OpCode::LoadF => queue(registers, batch, fallbacks, a, TypeInfo::exact(InferType::Float)),
            OpCode::LoadFalse | OpCode::LoadTrue => {
                queue(registers, batch, fallbacks, a, TypeInfo::exact(InferType::Boolean))
            }
            OpCode::LoadNil => {
                // LOADNIL A B: registers A..=A+B
                for reg in a..=a + inst.b() {
                    queue(registers, batch, fallbacks, reg, TypeInfo::exact(InferType::Nil));
                }
            }
            OpCode::LoadK | OpCode::LoadKx => {
                let ty = const_type(inst.bx() as usize);
                queue(registers, batch, fallbacks, a, TypeInfo::exact(ty));
            }

            // === Moves ===
            OpCode::Move => {
                let src = read(registers, batch, inst.b());
                queue(registers, batch, fallbacks, a, src);
            }
            OpCode::TestSet => {
                let src = read(registers, batch, inst.b());
                queue(
                    registers,
                    batch,
                    fallbacks,
                    a,
                    TypeInfo::computed(src.inferred_type, src.confidence * 0.9),
                );
            }

            // === Arithmetic ===
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Mod | OpCode::IDiv => {
                let lhs = read(registers, batch, inst.b());
                let rhs_ty = if inst.k() {
                    (const_type(inst.c() as usize), 100.0)
                } else {
                    let r = read(registers, batch, inst.c());
                    (r.inferred_type, r.confidence)
                };
                let info = arith_result(lhs.inferred_type, lhs.confidence, rhs_ty.0, rhs_ty.1);
                queue(registers, batch, fallbacks, a, info);
            }
            OpCode::AddK | OpCode::SubK | OpCode::MulK => {
                let lhs = read(registers, batch, inst.b());
                let rhs = const_type(inst.c() as usize);
                let info = arith_result(lhs.inferred_type, lhs.confidence, rhs, 100.0);
                queue(registers, batch, fallbacks, a, info);
            }
            OpCode::AddI | OpCode::SubI | OpCode::MulI => {
                let lhs = read(registers, batch, inst.b());
                let info =
                    arith_result(lhs.inferred_type, lhs.confidence, InferType::Integer, 100.0);
                queue(registers, batch, fallbacks, a, info);
            }
            OpCode::Div | OpCode::DivK | OpCode::DivI | OpCode::Pow => {
                // True division and exponentiation always produce floats
                let lhs = read(registers, batch, inst.b());
                let conf = if lhs.inferred_type.is_numeric() {
                    lhs.confidence * 0.95
                } else {
                    30.0
                };
                queue(
                    registers,
                    batch,
                    fallbacks,
                    a,
                    TypeInfo::computed(InferType::Float, conf),
                );
            }
            OpCode::Unm => {
                let src = read(registers, batch, inst.b());
                let ty = if src.inferred_type.is_numeric() {
                    src.inferred_type
                } else {
                    InferType::Any
                };
                queue(
                    registers,
                    batch,
                    fallbacks,
                    a,
                    TypeInfo::computed(ty, src.confidence * 0.95),
                );
            }
            OpCode::Len => {
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Integer, 90.0))
            }

            // === Bitwise: integers required ===
            OpCode::Band | OpCode::Bor | OpCode::Bxor | OpCode::Shl | OpCode::Shr => {
                let lhs = read(registers, batch, inst.b());
                let rhs = read(registers, batch, inst.c());
                let both_int = lhs.inferred_type == InferType::Integer
                    && rhs.inferred_type == InferType::Integer;
                if both_int {
                    let conf = lhs.confidence.min(rhs.confidence) * 0.95;
                    queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Integer, conf));
                } else {
                    fallbacks.push(Fallback {
                        level: FallbackLevel::ToRuntime,
                        fallback_type: InferType::Integer,
                        reason: "bitwise operand not provably integer",
                        pc: Some(pc),
                    });
                    queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Integer, 40.0));
                }
            }
            OpCode::Shri | OpCode::Bnot => {
                let lhs = read(registers, batch, inst.b());
                let conf = if lhs.inferred_type == InferType::Integer {
                    lhs.confidence * 0.95
                } else {
                    40.0
                };
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Integer, conf));
            }

            // === Logic ===
            OpCode::Not => {
                queue(registers, batch, fallbacks, a, TypeInfo::exact(InferType::Boolean))
            }
            OpCode::Test => {
                read(registers, batch, a);
            }

            // === Compare: no destination register ===
            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                read(registers, batch, inst.b());
                read(registers, batch, inst.c());
            }
            OpCode::EqI | OpCode::LtI => {
                read(registers, batch, inst.b());
            }

            // === Flow ===
            OpCode::Jmp => {}
            OpCode::ForPrep | OpCode::ForLoop => {
                // Loop control block: init, limit, step, control variable
                for reg in a..=a + 3 {
                    let existing = batch
                        .lookup(reg)
                        .or_else(|| registers.get(reg as usize))
                        .map(|r| r.inferred_type)
                        .unwrap_or(InferType::Unknown);
                    let ty = if existing == InferType::Integer {
                        InferType::Integer
                    } else if existing.is_numeric() {
                        InferType::Float
                    } else {
                        InferType::Float
                    };
                    queue(registers, batch, fallbacks, reg, TypeInfo::computed(ty, 85.0));
                }
            }

            // === Calls ===
            OpCode::Call | OpCode::Invoke => {
                // Results land at A.. with unknown types
                let nresults = inst.c();
                let count = if nresults == 0 { 1 } else { nresults };
                for reg in a..a + count {
                    queue(registers, batch, fallbacks, reg, TypeInfo::computed(InferType::Any, 30.0));
                }
            }
            OpCode::TailCall | OpCode::Ret | OpCode::RetVoid | OpCode::RetOne => {}

            // === Containers ===
            OpCode::NewObject => {
                let ty = match inst.b() {
                    0 => InferType::Array,
                    1 => InferType::Slice,
                    2 => InferType::Dict,
                    3 => InferType::Vector,
                    _ => InferType::Any,
                };
                queue(registers, batch, fallbacks, a, TypeInfo::exact(ty));
            }
            OpCode::GetProp => {
                read(registers, batch, inst.b());
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Any, 40.0));
            }
            OpCode::SetProp => {
                read(registers, batch, inst.b());
            }
            OpCode::Concat => {
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::String, 95.0))
            }

            // === Upvalues ===
            OpCode::GetUpval => {
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Any, 50.0))
            }
            OpCode::SetUpval => {
                read(registers, batch, a);
            }
            OpCode::GetTabUp => {
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Any, 40.0))
            }
            OpCode::SetTabUp => {}

            // === Closures ===
            OpCode::Closure => {
                queue(registers, batch, fallbacks, a, TypeInfo::exact(InferType::Function));
                if self.config.analyze_nested {
                    if depth + 1 >= self.config.max_recursion_depth {
                        fallbacks.push(Fallback {
                            level: FallbackLevel::ToKnown,
                            fallback_type: InferType::Function,
                            reason: "nested prototype recursion limit",
                            pc: Some(pc),
                        });
                    } else if let Some(&nested_ref) = nested.get(inst.bx() as usize) {
                        // Nested analysis informs its own prototype's record
                        let _ = self.infer_at(heap, nested_ref, depth + 1);
                    }
                }
            }

            // === Misc ===
            OpCode::Vararg => {
                let count = inst.c();
                let count = if count == 0 { 1 } else { count };
                for reg in a..a + count {
                    queue(registers, batch, fallbacks, reg, TypeInfo::computed(InferType::Any, 50.0));
                }
            }
            OpCode::Builtin => {
                let ty = match inst.b() {
                    0 => InferType::Nil,     // print
                    1 => InferType::String,  // type
                    2 => InferType::Integer, // len
                    3 => InferType::String,  // tostring
                    4 => InferType::Any,     // tonumber (nil on failure)
                    5 => InferType::Range,   // range
                    _ => InferType::Any,
                };
                queue(registers, batch, fallbacks, a, TypeInfo::computed(ty, 90.0));
            }
            OpCode::Close | OpCode::Tbc | OpCode::ExtraArg => {}
            OpCode::Yield | OpCode::Resume => {
                queue(registers, batch, fallbacks, a, TypeInfo::computed(InferType::Any, 30.0));
            }
        }

        if batch.pending() >= crate::batch::BATCH_FLUSH_THRESHOLD {
            batch.flush(registers);
        }
    }
}

/// Arithmetic result rule: int ∘ int → int, numeric → float, else any
fn arith_result(lt: InferType, lc: f64, rt: InferType, rc: f64) -> TypeInfo {
    let base = lc.min(rc);
    if lt == InferType::Integer && rt == InferType::Integer {
        TypeInfo::computed(InferType::Integer, base * 0.95)
    } else if lt.is_numeric() && rt.is_numeric() {
        TypeInfo::computed(InferType::Float, base * 0.9)
    } else if lt == InferType::Unknown || rt == InferType::Unknown {
        TypeInfo::computed(InferType::Any, 25.0)
    } else {
        TypeInfo::computed(InferType::Any, base.max(20.0) * 0.5)
    }
}

/// Apply an update, joining with an existing computed type
fn merge_update(
    registers: &mut [TypeInfo],
    batch: &mut BatchBuffer,
    fallbacks: &mut Vec<Fallback>,
    reg: u32,
    info: TypeInfo,
    pc: usize,
) {
    let Some(mut existing) = registers.get(reg as usize).copied() else {
        return;
    };
    if let Some(pending) = batch.lookup(reg) {
        existing = *pending;
        existing.state = InferState::Computed;
    }
    if existing.state == InferState::Computed
        && existing.inferred_type != info.inferred_type
        && existing.inferred_type != InferType::Unknown
    {
        let joined = existing.inferred_type.join(info.inferred_type);
        if joined == InferType::Any
            && existing.inferred_type != InferType::Any
            && info.inferred_type != InferType::Any
        {
            fallbacks.push(Fallback {
                level: FallbackLevel::ToAny,
                fallback_type: InferType::Any,
                reason: "conflicting types at join",
                pc: Some(pc),
            });
        }
        let confidence = existing.confidence.min(info.confidence) * 0.8;
        batch.push(reg, TypeInfo::computed(joined, confidence));
    } else {
        batch.push(reg, info);
    }
}

/// Mean confidence of computed registers
pub fn stability_of(registers: &[TypeInfo]) -> f64 {
    let computed: Vec<_> = registers
        .iter()
        .filter(|r| r.state == InferState::Computed)
        .collect();
    if computed.is_empty() {
        return 0.0;
    }
    computed.iter().map(|r| r.confidence).sum::<f64>() / computed.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use aql_core::object::{alloc_object, Object};
    use aql_core::{Proto, ProtoId};
    use agc::GcConfig;

    fn make_proto(heap: &mut Heap, code: Vec<Instruction>, max_stack: u8) -> GcRef {
        let mut p = Proto::new(ProtoId(0), "infer-test");
        p.code = std::rc::Rc::new(code);
        p.max_stack_size = max_stack;
        alloc_object(heap, Object::Proto(p))
    }

    fn ctx() -> TypeInferContext {
        TypeInferContext::new(InferConfig::default()).unwrap()
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let mut heap = Heap::new(GcConfig::default());
        let proto = make_proto(
            &mut heap,
            vec![
                Instruction::asbx(OpCode::LoadI, 0, 7),
                Instruction::asbx(OpCode::LoadI, 1, 3),
                Instruction::abc(OpCode::Add, 2, 0, 1, false),
            ],
            3,
        );
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert_eq!(analysis.registers[2].inferred_type, InferType::Integer);
        assert!(analysis.registers[2].confidence > 90.0);
    }

    #[test]
    fn test_division_is_float() {
        let mut heap = Heap::new(GcConfig::default());
        let proto = make_proto(
            &mut heap,
            vec![
                Instruction::asbx(OpCode::LoadI, 0, 7),
                Instruction::asbx(OpCode::LoadI, 1, 3),
                Instruction::abc(OpCode::Div, 2, 0, 1, false),
            ],
            3,
        );
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert_eq!(analysis.registers[2].inferred_type, InferType::Float);
    }

    #[test]
    fn test_idiv_of_ints_is_integer() {
        let mut heap = Heap::new(GcConfig::default());
        let proto = make_proto(
            &mut heap,
            vec![
                Instruction::asbx(OpCode::LoadI, 0, 7),
                Instruction::asbx(OpCode::LoadI, 1, 3),
                Instruction::abc(OpCode::IDiv, 2, 0, 1, false),
            ],
            3,
        );
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert_eq!(analysis.registers[2].inferred_type, InferType::Integer);
    }

    #[test]
    fn test_mixed_arithmetic_promotes_to_float() {
        let mut heap = Heap::new(GcConfig::default());
        let proto = make_proto(
            &mut heap,
            vec![
                Instruction::asbx(OpCode::LoadI, 0, 7),
                Instruction::asbx(OpCode::LoadF, 1, 3),
                Instruction::abc(OpCode::Mul, 2, 0, 1, false),
            ],
            3,
        );
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert_eq!(analysis.registers[2].inferred_type, InferType::Float);
    }

    #[test]
    fn test_conflicting_join_records_fallback() {
        let mut heap = Heap::new(GcConfig::default());
        let proto = make_proto(
            &mut heap,
            vec![
                Instruction::asbx(OpCode::LoadI, 0, 1),
                Instruction::abx(OpCode::LoadK, 1, 0), // no constants: Unknown
                Instruction::asbx(OpCode::LoadI, 1, 2),
                Instruction::abc(OpCode::LoadTrue, 1, 0, 0, false),
            ],
            2,
        );
        let analysis = ctx().infer(&heap, proto).unwrap();
        // Integer overwritten by Boolean joins to Any and records a conflict
        assert_eq!(analysis.registers[1].inferred_type, InferType::Any);
        assert!(analysis
            .fallbacks
            .iter()
            .any(|f| f.level == FallbackLevel::ToAny));
    }

    #[test]
    fn test_stability_high_for_monomorphic_code() {
        let mut heap = Heap::new(GcConfig::default());
        let code: Vec<_> = (0..8)
            .map(|i| Instruction::asbx(OpCode::LoadI, i, i as i32))
            .chain([Instruction::abc(OpCode::Add, 8, 0, 1, false)])
            .collect();
        let proto = make_proto(&mut heap, code, 9);
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert!(
            analysis.stability > 90.0,
            "stability {} too low",
            analysis.stability
        );
    }

    #[test]
    fn test_stability_low_for_dynamic_code() {
        let mut heap = Heap::new(GcConfig::default());
        let code = vec![
            Instruction::abc(OpCode::GetUpval, 0, 0, 0, false),
            Instruction::abc(OpCode::GetUpval, 1, 1, 0, false),
            Instruction::abc(OpCode::Add, 2, 0, 1, false),
            Instruction::abc(OpCode::Call, 0, 1, 1, false),
        ];
        let proto = make_proto(&mut heap, code, 3);
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert!(
            analysis.stability < 60.0,
            "stability {} too high",
            analysis.stability
        );
    }

    #[test]
    fn test_batching_flushes_large_function() {
        let mut heap = Heap::new(GcConfig::default());
        let code: Vec<_> = (0..100)
            .map(|i| Instruction::asbx(OpCode::LoadI, (i % 8) as u32, i))
            .collect();
        let proto = make_proto(&mut heap, code, 8);
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert_eq!(analysis.instructions_analyzed, 100);
        for reg in &analysis.registers {
            assert_eq!(reg.inferred_type, InferType::Integer);
        }
    }

    #[test]
    fn test_len_and_concat_types() {
        let mut heap = Heap::new(GcConfig::default());
        let proto = make_proto(
            &mut heap,
            vec![
                Instruction::abc(OpCode::Concat, 0, 0, 2, false),
                Instruction::abc(OpCode::Len, 1, 0, 0, false),
            ],
            3,
        );
        let analysis = ctx().infer(&heap, proto).unwrap();
        assert_eq!(analysis.registers[0].inferred_type, InferType::String);
        assert_eq!(analysis.registers[1].inferred_type, InferType::Integer);
    }
}
