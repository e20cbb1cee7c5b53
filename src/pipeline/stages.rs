//! ID/EX/MEM/WB stage functions (`spec.md` §4.3).
//!
//! Grounded on the teacher's `src/pipelined/stages.rs`
//! (`instruction_decode`/`execute`/`memory_access`/`write_back`) and
//! `original_source/code/stages_def.py`.

use crate::alu;
use crate::data_memory::DataMemory;
use crate::pipeline::forwarding::{self, ForwardSource};
use crate::pipeline::latches::PipelineSlot;
use crate::register_file::RegisterFile;

/// ID: reads the register file into the slot's latched operand values. No
/// hazard check happens here; the controller inspects the ID/EX pair
/// separately (`spec.md` §4.3).
pub fn id(register_file: &RegisterFile, slot: Option<&PipelineSlot>) -> Option<PipelineSlot> {
    let slot = slot?;
    let mut next = slot.clone();
    next.rs1_val = slot.inst.rs1.map(|r| register_file.read(r)).unwrap_or(0);
    next.rs2_val = slot.inst.rs2.map(|r| register_file.read(r)).unwrap_or(0);
    Some(next)
}

/// EX (with forwarding): consults the forwarding selector against the
/// pre-cycle MEM/WB latches, then invokes the ALU.
pub fn ex(
    slot: Option<&PipelineSlot>,
    mem: Option<&PipelineSlot>,
    wb: Option<&PipelineSlot>,
) -> Option<PipelineSlot> {
    let slot = slot?;
    let mut next = slot.clone();

    if let Some(rs1) = slot.inst.rs1.filter(|&r| r != 0) {
        next.rs1_val = match forwarding::select(rs1, mem, wb) {
            ForwardSource::Near => mem.unwrap().result,
            ForwardSource::Far => wb.unwrap().result,
            ForwardSource::None => slot.rs1_val,
        };
    }
    if let Some(rs2) = slot.inst.rs2.filter(|&r| r != 0) {
        next.rs2_val = match forwarding::select(rs2, mem, wb) {
            ForwardSource::Near => mem.unwrap().result,
            ForwardSource::Far => wb.unwrap().result,
            ForwardSource::None => slot.rs2_val,
        };
    }

    let imm = slot.inst.imm.value();
    next.result = alu::execute(slot.inst.op, slot.inst.pc, next.rs1_val, next.rs2_val, imm);
    Some(next)
}

/// MEM: for a load, replaces `result` (the effective address) with the
/// loaded value. For a store, writes `rs2_val` (already forwarded by this
/// instruction's own EX-stage pass, see `DESIGN.md` Open Question 4) to
/// memory. Other ops pass through unchanged.
pub fn mem(data_memory: &mut DataMemory, slot: Option<&PipelineSlot>) -> Option<PipelineSlot> {
    let slot = slot?;
    let mut next = slot.clone();
    let op = slot.inst.op;
    if op.is_load() {
        next.result = data_memory.load(slot.result as u32, op.mem_width(), op.load_signed());
    } else if op.is_store() {
        data_memory.store(slot.result as u32, slot.rs2_val, op.mem_width());
    }
    Some(next)
}

/// WB: writes `result` to the destination register, if the instruction has
/// one.
pub fn wb(register_file: &mut RegisterFile, slot: Option<&PipelineSlot>) {
    if let Some(slot) = slot {
        if let Some(reg) = slot.dest_reg() {
            register_file.write(reg, slot.result);
        }
    }
}
