//! Branch Precomputation Unit (`spec.md` §4.5), the intellectual core of
//! the simulator.
//!
//! Grounded directly on `original_source/component_def.py`:
//! `BranchPrecomputationUnit`, `BPUDecoder`, `Comparator`, `MinimalALU`.
//! The teacher's `src/pipelined/branch_predictor.rs` implements a different
//! kind of unit (a 2-bit saturating-counter *predictor*) and is not reused
//! here (see `DESIGN.md`).

use log::trace;

use crate::alu;
use crate::instruction::{Imm, Instruction, Op};
use crate::pipeline::latches::PipelineSlot;
use crate::program::Program;
use crate::register_file::RegisterFile;

/// One of the BPU's three forwarding inputs: a pending write from an
/// in-flight instruction, available to the BPU before it retires.
#[derive(Debug, Clone, Copy)]
pub struct ForwardRecord {
    pub reg: u8,
    pub value: i32,
    pub is_load: bool,
}

impl ForwardRecord {
    /// Builds a record from whatever instruction just completed a stage, if
    /// it writes a (non-zero) register.
    pub fn from_completed(slot: Option<&PipelineSlot>) -> Option<ForwardRecord> {
        let slot = slot?;
        let reg = slot.dest_reg()?;
        if reg == 0 {
            return None;
        }
        Some(ForwardRecord {
            reg,
            value: slot.result,
            is_load: slot.inst.op.is_load(),
        })
    }
}

/// What the BPU asks the controller to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpuOutcome {
    Stall,
    Taken(u32),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchClass {
    NotABranch,
    Conditional,
    RegisterIndirect,
    DirectUnconditional,
}

fn classify(op: Op) -> BranchClass {
    if op.is_conditional_branch() {
        BranchClass::Conditional
    } else if op == Op::Jalr {
        BranchClass::RegisterIndirect
    } else if op == Op::Jal {
        BranchClass::DirectUnconditional
    } else {
        BranchClass::NotABranch
    }
}

/// A branch/jump queued by S1 for S2 to resolve. `bta` is `None` for
/// register-indirect jumps, whose target depends on a register value only
/// S2's forwarding can supply.
#[derive(Debug, Clone)]
struct QueuedBranch {
    instr: Instruction,
    bta: Option<u32>,
}

fn compute_bta(pc: u32, label_target: u32) -> u32 {
    // An identity by construction (`pc + (label_target - pc)`); kept as an
    // explicit add-of-an-offset per `spec.md` §4.5 rather than collapsed to
    // `label_target`, to mirror the minimal adder the BPU's target math
    // stands in for.
    (pc as i64 + (label_target as i64 - pc as i64)) as u32
}

enum Stage1Result {
    /// Nothing to classify (no instruction at `pc`, or neither candidate is
    /// branch-class).
    Empty,
    Stall,
    /// A direct unconditional jump resolved immediately; `link` is the
    /// register/value to write (if the jump form links).
    Taken { target: u32, link: Option<(u8, i32)> },
    Queue(Vec<QueuedBranch>),
}

/// The Branch Precomputation Unit.
pub struct Bpu<'p> {
    program: &'p Program,
    last_checked_pc: Option<u32>,
    pending_branches: Vec<QueuedBranch>,
    forwarding_id_ex: Option<ForwardRecord>,
    pub forwarding_ex_mem: Option<ForwardRecord>,
    pub forwarding_mem_wb: Option<ForwardRecord>,
    stage1_calls: u32,
}

impl<'p> Bpu<'p> {
    pub fn new(program: &'p Program) -> Self {
        Bpu {
            program,
            last_checked_pc: None,
            pending_branches: Vec::new(),
            forwarding_id_ex: None,
            forwarding_ex_mem: None,
            forwarding_mem_wb: None,
            stage1_calls: 0,
        }
    }

    /// Clears memoization, forcing the next `run_cycle` to re-run S1 even
    /// if called again with the same `pc`. Invoked by the controller at
    /// exactly the points `spec.md` §4.6 steps 6 and 8 name.
    pub fn invalidate_memoization(&mut self) {
        self.last_checked_pc = None;
    }

    #[cfg(test)]
    fn stage1_calls(&self) -> u32 {
        self.stage1_calls
    }

    /// Runs one cycle of the BPU against the instruction(s) at `pc`/`pc+4`,
    /// the ID/EX-stage slots just processed this cycle (for hazard
    /// detection and `fwd_id_ex` precomputation), and the register file
    /// (for S2 resolution and for direct jump-with-link's register write).
    pub fn run_cycle(
        &mut self,
        pc: u32,
        id_completed: Option<&PipelineSlot>,
        ex_completed: Option<&PipelineSlot>,
        register_file: &mut RegisterFile,
    ) -> BpuOutcome {
        let id_inst = id_completed.map(|s| &s.inst);
        let ex_inst = ex_completed.map(|s| &s.inst);

        let s1 = if self.last_checked_pc == Some(pc) {
            Stage1Result::Queue(std::mem::take(&mut self.pending_branches))
        } else {
            self.stage1_calls += 1;
            self.stage1(pc, id_inst, ex_inst)
        };
        self.last_checked_pc = Some(pc);

        match s1 {
            Stage1Result::Empty => {
                self.pending_branches.clear();
            }
            Stage1Result::Stall => {
                self.pending_branches.clear();
                return BpuOutcome::Stall;
            }
            Stage1Result::Taken { target, link } => {
                if let Some((reg, value)) = link {
                    register_file.write(reg, value);
                }
                self.pending_branches.clear();
                trace!("BPU S1 resolved taken directive to pc={:#x}", target);
                return BpuOutcome::Taken(target);
            }
            Stage1Result::Queue(branches) => {
                self.pending_branches = branches;
            }
        }

        self.forwarding_id_ex = id_completed.and_then(|slot| {
            precompute_from_slot(&slot.inst, slot.rs1_val, slot.rs2_val)
        });

        match self.stage2(register_file) {
            Some(target) => {
                self.pending_branches.clear();
                trace!("BPU S2 resolved taken directive to pc={:#x}", target);
                BpuOutcome::Taken(target)
            }
            None => BpuOutcome::None,
        }
    }

    fn stage1(
        &self,
        pc: u32,
        id_completed: Option<&Instruction>,
        ex_completed: Option<&Instruction>,
    ) -> Stage1Result {
        let Some(instr1) = self.program.instruction_at(pc) else {
            return Stage1Result::Empty;
        };
        let instr2 = self.program.instruction_at(pc.wrapping_add(4));

        let is_load_producer = |candidate: Option<&Instruction>, reg: u8| {
            candidate
                .map(|i| i.op.is_load() && i.dest_reg() == Some(reg))
                .unwrap_or(false)
        };

        let mut branches = Vec::new();

        match classify(instr1.op) {
            BranchClass::DirectUnconditional => {
                let target = self.program.resolve_label(label_name(&instr1.imm));
                let link = instr1
                    .dest_reg()
                    .filter(|&r| r != 0)
                    .map(|r| (r, alu::execute(Op::Jal, instr1.pc, 0, 0, 0)));
                return Stage1Result::Taken { target, link };
            }
            BranchClass::RegisterIndirect => {
                let rs1 = instr1.rs1.expect("jalr always has rs1");
                if is_load_producer(id_completed, rs1) || is_load_producer(ex_completed, rs1) {
                    return Stage1Result::Stall;
                }
                branches.push(QueuedBranch {
                    instr: instr1.clone(),
                    bta: None,
                });
            }
            BranchClass::Conditional => {
                let rs1 = instr1.rs1.expect("conditional branch always has rs1");
                let rs2 = instr1.rs2.expect("conditional branch always has rs2");
                if is_load_producer(id_completed, rs1)
                    || is_load_producer(id_completed, rs2)
                    || is_load_producer(ex_completed, rs1)
                    || is_load_producer(ex_completed, rs2)
                {
                    return Stage1Result::Stall;
                }
                let target = self.program.resolve_label(label_name(&instr1.imm));
                branches.push(QueuedBranch {
                    instr: instr1.clone(),
                    bta: Some(compute_bta(instr1.pc, target)),
                });
            }
            BranchClass::NotABranch => {}
        }

        if let Some(instr2) = instr2 {
            if classify(instr2.op) == BranchClass::Conditional {
                let rs1 = instr2.rs1.expect("conditional branch always has rs1");
                let rs2 = instr2.rs2.expect("conditional branch always has rs2");
                let i1_dest = instr1.dest_reg();
                let hazard_from_instr1 = i1_dest
                    .map(|d| instr1.op.is_load() && (Some(d) == instr2.rs1 || Some(d) == instr2.rs2))
                    .unwrap_or(false);
                if hazard_from_instr1
                    || is_load_producer(id_completed, rs1)
                    || is_load_producer(id_completed, rs2)
                    || is_load_producer(ex_completed, rs1)
                    || is_load_producer(ex_completed, rs2)
                {
                    return Stage1Result::Stall;
                }
                let target = self.program.resolve_label(label_name(&instr2.imm));
                branches.push(QueuedBranch {
                    instr: instr2.clone(),
                    bta: Some(compute_bta(instr2.pc, target)),
                });
            }
        }

        if branches.is_empty() {
            Stage1Result::Empty
        } else {
            Stage1Result::Queue(branches)
        }
    }

    fn stage2(&self, register_file: &RegisterFile) -> Option<u32> {
        let get_value = |reg: Option<u8>| -> i32 {
            let Some(reg) = reg else { return 0 };
            if reg == 0 {
                return 0;
            }
            if let Some(fwd) = self.forwarding_id_ex {
                if fwd.reg == reg {
                    return fwd.value;
                }
            }
            if let Some(fwd) = self.forwarding_ex_mem {
                if fwd.reg == reg && !fwd.is_load {
                    return fwd.value;
                }
            }
            if let Some(fwd) = self.forwarding_mem_wb {
                if fwd.reg == reg {
                    return fwd.value;
                }
            }
            register_file.read(reg)
        };

        for queued in &self.pending_branches {
            let instr = &queued.instr;
            if instr.op == Op::Jalr {
                let target = (get_value(instr.rs1).wrapping_add(instr.imm.value())) & !1;
                return Some(target as u32);
            }
            let v1 = get_value(instr.rs1);
            let v2 = get_value(instr.rs2);
            if is_taken(instr.op, v1, v2) {
                return queued.bta;
            }
        }
        None
    }
}

fn label_name(imm: &Imm) -> &str {
    match imm {
        Imm::Label(name) => name,
        _ => panic!("branch/jump instruction without a symbolic label"),
    }
}

/// Comparator for conditional branches (`spec.md` §4.5). Missing opcodes
/// (i.e. anything not a conditional branch) yield "not taken".
fn is_taken(op: Op, v1: i32, v2: i32) -> bool {
    match op {
        Op::Beq => v1 == v2,
        Op::Bne => v1 != v2,
        Op::Blt => v1 < v2,
        Op::Bge => v1 >= v2,
        Op::Bltu => (v1 as u32) < (v2 as u32),
        Op::Bgeu => (v1 as u32) >= (v2 as u32),
        _ => false,
    }
}

/// ID-stage forwarding precompute: the BPU's `fwd_id_ex` input. Mirrors
/// `original_source::_precompute_id_stage_result`, using the ID-latched
/// (un-forwarded) operand values, same as the original.
pub fn precompute_from_slot(inst: &Instruction, rs1_val: i32, rs2_val: i32) -> Option<ForwardRecord> {
    if inst.op.is_load()
        || inst.op.is_store()
        || inst.op.is_conditional_branch()
        || matches!(inst.op, Op::Jal | Op::Jalr | Op::Ecall | Op::Ebreak | Op::Nop)
    {
        return None;
    }
    let reg = inst.dest_reg()?;
    if reg == 0 {
        return None;
    }
    let imm = inst.imm.value();
    let value = alu::execute(inst.op, inst.pc, rs1_val, rs2_val, imm);
    Some(ForwardRecord {
        reg,
        value,
        is_load: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    #[test]
    fn direct_unconditional_resolves_immediately_with_link() {
        let program = Program::assemble("addi r5, r0, 1\njal r1, L\naddi r6, r0, 2\nL: nop")
            .unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        let outcome = bpu.run_cycle(4, None, None, &mut rf);
        assert_eq!(outcome, BpuOutcome::Taken(12));
        assert_eq!(rf.read(1), 8); // link = pc(jal) + 4
    }

    #[test]
    fn conditional_not_taken_falls_through() {
        let program = Program::assemble("beq r1, r2, L\naddi r3, r0, 1\nL: nop").unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        rf.write(1, 1);
        rf.write(2, 2);
        let outcome = bpu.run_cycle(0, None, None, &mut rf);
        assert_eq!(outcome, BpuOutcome::None);
    }

    #[test]
    fn conditional_taken_resolves_via_s2() {
        let program = Program::assemble("beq r1, r2, L\naddi r3, r0, 1\nL: nop").unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        rf.write(1, 5);
        rf.write(2, 5);
        let outcome = bpu.run_cycle(0, None, None, &mut rf);
        assert_eq!(outcome, BpuOutcome::Taken(8));
    }

    #[test]
    fn load_use_hazard_on_branch_operand_stalls() {
        // A load into r1 sitting in EX, and the branch at `pc` reads r1.
        let program = Program::assemble("beq r1, r2, L\nnop\nL: nop").unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        let load_in_ex = PipelineSlot {
            inst: Instruction {
                op: Op::Lw,
                pc: 100,
                rs1: Some(3),
                rs2: None,
                rd: Some(1),
                imm: Imm::Value(0),
            },
            rs1_val: 0,
            rs2_val: 0,
            result: 0,
        };
        let outcome = bpu.run_cycle(0, None, Some(&load_in_ex), &mut rf);
        assert_eq!(outcome, BpuOutcome::Stall);
    }

    #[test]
    fn dual_conditional_branch_window_discards_second_on_first_taken() {
        let program = Program::assemble(
            "beq r1, r1, L1\n\
             beq r2, r2, L2\n\
             addi r3, r0, 1\n\
             L1: addi r4, r0, 2\n\
             L2: addi r5, r0, 3",
        )
        .unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        let outcome = bpu.run_cycle(0, None, None, &mut rf);
        // branch-1 (beq r1,r1,L1) is unconditionally equal -> taken to L1's pc.
        assert_eq!(outcome, BpuOutcome::Taken(program.resolve_label("L1")));
    }

    #[test]
    fn memoization_skips_stage1_on_repeated_pc() {
        let program = Program::assemble("beq r1, r2, L\nnop\nL: nop").unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        bpu.run_cycle(0, None, None, &mut rf);
        assert_eq!(bpu.stage1_calls(), 1);
        bpu.run_cycle(0, None, None, &mut rf);
        assert_eq!(bpu.stage1_calls(), 1, "second call at same pc must skip S1");
        bpu.invalidate_memoization();
        bpu.run_cycle(0, None, None, &mut rf);
        assert_eq!(bpu.stage1_calls(), 2, "invalidated memoization re-runs S1");
    }

    #[test]
    fn jalr_resolves_via_stage2_forwarding() {
        let program = Program::assemble("jalr r0, r1, 0\nnop").unwrap();
        let mut bpu = Bpu::new(&program);
        let mut rf = RegisterFile::new();
        rf.write(1, 40);
        let outcome = bpu.run_cycle(0, None, None, &mut rf);
        assert_eq!(outcome, BpuOutcome::Taken(40));
    }
}
