//! Pipeline slot and the five named latches (`spec.md` §3).
//!
//! Modeled on `original_source/sim.py`'s `pipeline = {s: None for s in
//! STAGES}` dict rather than the teacher's four typed `*Register` structs:
//! `spec.md`'s invariants are phrased in terms of these five slots. Per
//! `spec.md` §9's design note, the immutable decoded `Instruction` and the
//! mutable per-occurrence fields are split: `PipelineSlot` pairs an
//! `Instruction` with the operand/result scratch space a stage fills in.

use crate::instruction::Instruction;

/// One instruction's occupancy of a pipeline latch.
#[derive(Debug, Clone)]
pub struct PipelineSlot {
    pub inst: Instruction,
    pub rs1_val: i32,
    pub rs2_val: i32,
    pub result: i32,
}

impl PipelineSlot {
    /// Builds the slot freshly fetched into IF: operand/result fields are
    /// zeroed until ID/EX fill them in.
    pub fn fetch(inst: Instruction) -> Self {
        PipelineSlot {
            inst,
            rs1_val: 0,
            rs2_val: 0,
            result: 0,
        }
    }

    pub fn dest_reg(&self) -> Option<u8> {
        self.inst.dest_reg()
    }
}

/// The five named pipeline latches. Each holds at most one instruction
/// occupancy, or a bubble (`None`).
#[derive(Debug, Clone, Default)]
pub struct Latches {
    pub if_: Option<PipelineSlot>,
    pub id: Option<PipelineSlot>,
    pub ex: Option<PipelineSlot>,
    pub mem: Option<PipelineSlot>,
    pub wb: Option<PipelineSlot>,
}

impl Latches {
    pub fn all_bubbles(&self) -> bool {
        self.if_.is_none()
            && self.id.is_none()
            && self.ex.is_none()
            && self.mem.is_none()
            && self.wb.is_none()
    }
}
