//! Integration tests for the pipeline's testable properties and named
//! scenarios.

use sim_lib::pipeline::{BpuEvent, Controller};
use sim_lib::program::Program;

macro_rules! run_to_completion {
    ($program:expr) => {{
        let mut controller = Controller::new($program);
        controller.run().unwrap();
        controller
    }};
}

#[test]
fn scenario_1_fall_through_conditional_not_taken() {
    let program = Program::assemble(
        "addi r5, r0, 5; addi r6, r0, 7; beq r5, r6, L; addi r7, r0, 1; nop; L: addi r8, r0, 2",
    )
    .unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(7), 1);
    assert_eq!(controller.register_file().read(8), 2);
}

#[test]
fn scenario_2_conditional_taken_resolved_early_by_bpu() {
    let program = Program::assemble(
        "addi r5, r0, 5; addi r6, r0, 5; beq r5, r6, L; addi r7, r0, 99; L: addi r8, r0, 2",
    )
    .unwrap();
    let mut controller = Controller::new(&program).with_trace_collection(true);
    controller.run().unwrap();
    assert_eq!(controller.register_file().read(7), 0, "skipped instruction must never reach WB");
    assert_eq!(controller.register_file().read(8), 2);

    let taken_count = controller
        .trace()
        .iter()
        .filter(|cycle| matches!(cycle.bpu_event, Some(BpuEvent::Taken(_))))
        .count();
    assert_eq!(taken_count, 1, "BPU must emit exactly one taken directive for this program");
}

#[test]
fn scenario_3_direct_unconditional_with_link_and_register_indirect_return() {
    let program = Program::assemble(
        "addi r5, r0, 5\n\
         jal r1, F\n\
         addi r6, r0, 10\n\
         j END\n\
         F: addi r7, r0, 20\n\
         jalr r0, r1, 0\n\
         END: nop",
    )
    .unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(5), 5);
    assert_eq!(controller.register_file().read(6), 10);
    assert_eq!(controller.register_file().read(7), 20);
    assert_eq!(controller.register_file().read(1), 8); // pc of instruction after jal
}

#[test]
fn scenario_4_load_use_hazard_induces_exactly_one_stall() {
    let program =
        Program::assemble("addi r1, r0, 42\nsw r1, 0(r0)\nlw r5, 0(r0)\naddi r6, r5, 1\nnop")
            .unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(6), 43);
    assert_eq!(controller.stall_count(), 1);
}

#[test]
fn scenario_5_forwarding_across_back_to_back_alu_ops() {
    let program = Program::assemble("addi r5, r0, 1\naddi r6, r5, 2\naddi r7, r6, 3").unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(5), 1);
    assert_eq!(controller.register_file().read(6), 3);
    assert_eq!(controller.register_file().read(7), 6);
    assert_eq!(controller.stall_count(), 0);
}

#[test]
fn scenario_6_dual_branch_fetch_window_first_taken_discards_second() {
    let program = Program::assemble(
        "beq r1, r1, L1\n\
         beq r2, r2, L2\n\
         addi r3, r0, 1\n\
         L1: addi r4, r0, 2\n\
         L2: addi r5, r0, 3",
    )
    .unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(3), 0, "fallen-through instruction must not run");
    assert_eq!(controller.register_file().read(4), 2);
    assert_eq!(controller.register_file().read(5), 3);
}

#[test]
fn invariant_register_zero_always_reads_zero() {
    let program = Program::assemble("addi r0, r0, 99\naddi r1, r0, 1").unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(0), 0);
}

#[test]
fn invariant_at_most_one_stall_or_flush_per_cycle() {
    let program = Program::assemble(
        "addi r1, r0, 42\nsw r1, 0(r0)\nlw r5, 0(r0)\naddi r6, r5, 1\nbeq r6, r6, L\nnop\nL: nop",
    )
    .unwrap();
    let mut controller = Controller::new(&program).with_trace_collection(true);
    controller.run().unwrap();
    for cycle in controller.trace() {
        let flushed = cycle.bpu_event.is_some();
        assert!(!(cycle.stalled && flushed), "cycle {} both stalled and flushed", cycle.cycle);
    }
}

#[test]
fn invariant_direct_jump_discards_instruction_fetched_alongside_it() {
    let program = Program::assemble("jal r1, L\naddi r9, r0, 999\nL: nop").unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(9), 0);
}

#[test]
fn load_use_hazard_applies_to_the_pc_plus_four_branch_candidate() {
    // `beq` sits at `pc + 4` relative to `addi r9` while `lw` is still in ID,
    // so the BPU must stall on this candidate too, not only on the primary
    // one at `pc`.
    let program = Program::assemble(
        "addi r1, r0, 7\n\
         sw r1, 0(r0)\n\
         lw r5, 0(r0)\n\
         addi r9, r0, 0\n\
         beq r5, r0, L\n\
         addi r10, r0, 999\n\
         L: nop",
    )
    .unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(5), 7);
    assert_eq!(
        controller.register_file().read(10),
        999,
        "beq must see the loaded value of r5, not a stale pre-load read"
    );
}

#[test]
fn round_trip_store_then_load_matches_width_and_sign() {
    let program = Program::assemble(
        "addi r1, r0, -1\nsb r1, 0(r0)\nlb r5, 0(r0)\nlbu r6, 0(r0)",
    )
    .unwrap();
    let controller = run_to_completion!(&program);
    assert_eq!(controller.register_file().read(5), -1);
    assert_eq!(controller.register_file().read(6), 0xFF);
}

#[test]
fn round_trip_bpu_precompute_matches_ex_stage_result() {
    use sim_lib::alu;
    use sim_lib::instruction::Op;
    use sim_lib::pipeline::bpu::precompute_from_slot;
    use sim_lib::instruction::{Imm, Instruction};

    let inst = Instruction {
        op: Op::Addi,
        pc: 0,
        rs1: Some(1),
        rs2: None,
        rd: Some(2),
        imm: Imm::Value(10),
    };
    let ex_result = alu::execute(inst.op, inst.pc, 5, 0, inst.imm.value());
    let fwd = precompute_from_slot(&inst, 5, 0).unwrap();
    assert_eq!(fwd.value, ex_result);
}
