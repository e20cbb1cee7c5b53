//! Data-hazard forwarding selector (`spec.md` §4.4).
//!
//! Grounded on the teacher's `src/pipelined/pipeline.rs` hazard-detection
//! methods (`ex_hazard_op1`/`mem_hazard_op1`/...) and
//! `original_source/code/stages_def.py::check_fwd`, generalized to a
//! `ForwardSource` enum instead of the original's `"00"/"10"/"01"` string
//! tags.

use crate::pipeline::latches::PipelineSlot;

/// Which source supplies an EX-stage operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardSource {
    /// Use the value latched in ID.
    None,
    /// Take the MEM latch's `result` (one stage ahead of EX).
    Near,
    /// Take the WB latch's `result` (two stages ahead of EX).
    Far,
}

/// Selects a forwarding source for register `reg` (an EX-stage operand),
/// given what currently occupies MEM and WB. Register 0 is never a
/// forwarding source (callers must short-circuit it themselves, since the
/// selector only decides *where*, not whether `reg == 0`).
///
/// Near is excluded for loads (their result isn't known until after MEM);
/// a load followed immediately by a consumer must instead cost a one-cycle
/// stall (`spec.md` §4.4, §REDESIGN FLAGS). Ties resolve to near.
pub fn select(reg: u8, mem: Option<&PipelineSlot>, wb: Option<&PipelineSlot>) -> ForwardSource {
    if let Some(mem_slot) = mem {
        if !mem_slot.inst.op.is_load() && mem_slot.dest_reg() == Some(reg) {
            return ForwardSource::Near;
        }
    }
    if let Some(wb_slot) = wb {
        if wb_slot.dest_reg() == Some(reg) {
            return ForwardSource::Far;
        }
    }
    ForwardSource::None
}
