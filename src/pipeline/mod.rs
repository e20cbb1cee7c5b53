//! The five-stage pipeline: latches, forwarding, the BPU, stage functions,
//! and the per-cycle controller that wires them together (`spec.md` §4).

pub mod bpu;
pub mod controller;
pub mod forwarding;
pub mod latches;
pub mod stages;

pub use controller::{BpuEvent, Controller, CycleTrace, TickOutcome};
pub use latches::{Latches, PipelineSlot};
