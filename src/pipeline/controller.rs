//! The per-cycle orchestrator (`spec.md` §4.6). Grounded on the teacher's
//! `src/pipelined/mod.rs::run` loop shape and
//! `original_source/full_pipeline_risc32i.py::simulate` for the exact
//! stall/BPU interaction ordering.

use log::{debug, trace};

use crate::data_memory::DataMemory;
use crate::error::SimulatorError;
use crate::pipeline::bpu::{Bpu, BpuOutcome, ForwardRecord};
use crate::pipeline::latches::{Latches, PipelineSlot};
use crate::pipeline::stages;
use crate::program::Program;
use crate::register_file::RegisterFile;

const DEFAULT_MAX_CYCLES: u64 = 100_000;

/// One BPU decision worth reporting in a cycle's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpuEvent {
    Taken(u32),
}

/// A snapshot of one latch's contents, for tracing: the opcode name (or
/// "bubble") rather than the full slot, per `spec.md` §6's trace contract.
#[derive(Debug, Clone)]
pub struct LatchSnapshot(pub Option<String>);

/// One cycle's observable trace (`spec.md` §6 "Observable side effects").
#[derive(Debug, Clone)]
pub struct CycleTrace {
    pub cycle: u64,
    pub pc: u32,
    pub latches: [LatchSnapshot; 5],
    pub bpu_event: Option<BpuEvent>,
    pub stalled: bool,
}

/// What happened after one `tick()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Done,
}

pub struct Controller<'p> {
    program: &'p Program,
    register_file: RegisterFile,
    data_memory: DataMemory,
    pc: u32,
    latches: Latches,
    bpu: Bpu<'p>,
    cycle: u64,
    stall_count: u64,
    max_cycles: u64,
    trace: Vec<CycleTrace>,
    collect_trace: bool,
}

impl<'p> Controller<'p> {
    pub fn new(program: &'p Program) -> Self {
        let if_ = program.instruction_at(0).map(|i| PipelineSlot::fetch(i.clone()));
        Controller {
            program,
            register_file: RegisterFile::new(),
            data_memory: DataMemory::new(),
            pc: 0,
            latches: Latches {
                if_,
                ..Latches::default()
            },
            bpu: Bpu::new(program),
            cycle: 0,
            stall_count: 0,
            max_cycles: DEFAULT_MAX_CYCLES,
            trace: Vec::new(),
            collect_trace: false,
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn with_trace_collection(mut self, enabled: bool) -> Self {
        self.collect_trace = enabled;
        self
    }

    pub fn register_file(&self) -> &RegisterFile {
        &self.register_file
    }

    pub fn data_memory(&self) -> &DataMemory {
        &self.data_memory
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    pub fn trace(&self) -> &[CycleTrace] {
        &self.trace
    }

    /// Runs until the pipeline drains or a fatal error occurs.
    pub fn run(&mut self) -> Result<(), SimulatorError> {
        loop {
            if self.tick()? == TickOutcome::Done {
                return Ok(());
            }
        }
    }

    /// Runs exactly one cycle, implementing `spec.md` §4.6's nine steps.
    pub fn tick(&mut self) -> Result<TickOutcome, SimulatorError> {
        self.cycle += 1;
        if self.cycle > self.max_cycles {
            return Err(SimulatorError::RunawaySimulation { cycles: self.cycle });
        }

        // Step 1: snapshot. Reading the pre-advance latches directly below
        // *is* the snapshot; nothing in `self.latches` is mutated until
        // the end of this function.
        let snapshot = self.latches.clone();

        // Step 2: WB -> MEM -> EX -> ID, in that order.
        stages::wb(&mut self.register_file, snapshot.wb.as_ref());
        let mem_completed = stages::mem(&mut self.data_memory, snapshot.mem.as_ref());
        let ex_completed = stages::ex(snapshot.ex.as_ref(), snapshot.mem.as_ref(), snapshot.wb.as_ref());
        let id_completed = stages::id(&self.register_file, snapshot.id.as_ref());

        // Step 3: ID-stage load-use hazard check.
        let load_use_stall = ex_completed
            .as_ref()
            .map(|ex| ex.inst.op.is_load())
            .unwrap_or(false)
            && ex_completed
                .as_ref()
                .and_then(|ex| ex.dest_reg())
                .map(|dest| {
                    id_completed
                        .as_ref()
                        .map(|id| Some(dest) == id.inst.rs1 || Some(dest) == id.inst.rs2)
                        .unwrap_or(false)
                })
                .unwrap_or(false);

        if load_use_stall {
            // Step 4: advance the back end only; EX becomes a bubble, ID
            // and IF (and PC) are untouched.
            self.latches.wb = mem_completed;
            self.latches.mem = ex_completed;
            self.latches.ex = None;
            self.stall_count += 1;
            self.emit_trace(true, None);
            debug!("cycle {}: load-use hazard stall (ID stage)", self.cycle);
            return Ok(TickOutcome::Continue);
        }

        // Step 5: update BPU forwarding inputs, then invoke the BPU.
        self.bpu.forwarding_ex_mem = ForwardRecord::from_completed(ex_completed.as_ref());
        self.bpu.forwarding_mem_wb = ForwardRecord::from_completed(mem_completed.as_ref());
        let outcome = self.bpu.run_cycle(
            self.pc,
            id_completed.as_ref(),
            ex_completed.as_ref(),
            &mut self.register_file,
        );

        if outcome == BpuOutcome::Stall {
            // Step 6: BPU stall. Advance EX from ID, bubble ID, PC held.
            self.latches.wb = mem_completed;
            self.latches.mem = ex_completed;
            self.latches.ex = id_completed;
            self.latches.id = None;
            self.stall_count += 1;
            self.bpu.invalidate_memoization();
            self.emit_trace(true, None);
            debug!("cycle {}: BPU stall (branch operand dependency)", self.cycle);
            return Ok(TickOutcome::Continue);
        }

        // Step 7: normal advance.
        self.latches.wb = mem_completed;
        self.latches.mem = ex_completed;
        self.latches.ex = id_completed;

        // Step 8: apply the BPU's directive, then invalidate memoization.
        let bpu_event = match outcome {
            BpuOutcome::Taken(target) => {
                self.pc = target;
                self.latches.id = None;
                Some(BpuEvent::Taken(target))
            }
            BpuOutcome::None => {
                self.pc = self.pc.wrapping_add(4);
                self.latches.id = snapshot.if_.clone();
                None
            }
            BpuOutcome::Stall => unreachable!("handled above"),
        };
        self.bpu.invalidate_memoization();

        // Step 9: fetch.
        self.latches.if_ = self
            .program
            .instruction_at(self.pc)
            .map(|i| PipelineSlot::fetch(i.clone()));

        self.emit_trace(false, bpu_event);
        trace!("cycle {}: pc={:#x}", self.cycle, self.pc);

        if self.latches.all_bubbles() && self.latches.if_.is_none() {
            Ok(TickOutcome::Done)
        } else {
            Ok(TickOutcome::Continue)
        }
    }

    fn emit_trace(&mut self, stalled: bool, bpu_event: Option<BpuEvent>) {
        if !self.collect_trace {
            return;
        }
        let snap = |s: &Option<PipelineSlot>| LatchSnapshot(s.as_ref().map(|s| format!("{:?}", s.inst.op)));
        self.trace.push(CycleTrace {
            cycle: self.cycle,
            pc: self.pc,
            latches: [
                snap(&self.latches.if_),
                snap(&self.latches.id),
                snap(&self.latches.ex),
                snap(&self.latches.mem),
                snap(&self.latches.wb),
            ],
            bpu_event,
            stalled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_drains_immediately() {
        let program = Program::assemble("nop").unwrap();
        let mut controller = Controller::new(&program);
        controller.run().unwrap();
        assert!(controller.cycle_count() >= 5);
    }

    #[test]
    fn forwarding_chain_across_alu_ops() {
        let program =
            Program::assemble("addi r5, r0, 1\naddi r6, r5, 2\naddi r7, r6, 3").unwrap();
        let mut controller = Controller::new(&program);
        controller.run().unwrap();
        assert_eq!(controller.register_file().read(5), 1);
        assert_eq!(controller.register_file().read(6), 3);
        assert_eq!(controller.register_file().read(7), 6);
        assert_eq!(controller.stall_count(), 0);
    }

    #[test]
    fn load_use_hazard_costs_exactly_one_stall() {
        let program =
            Program::assemble("addi r1, r0, 42\nsw r1, 0(r0)\nlw r5, 0(r0)\naddi r6, r5, 1\nnop")
                .unwrap();
        let mut controller = Controller::new(&program);
        controller.run().unwrap();
        assert_eq!(controller.register_file().read(6), 43);
        assert_eq!(controller.stall_count(), 1);
    }
}
