//! CLI entry point. Built on `clap`'s derive API, following the dependency
//! choice of the pack's other CLI-fronted simulators (the teacher's own
//! `flags.rs` references an `xflags` crate never added to its `Cargo.toml`
//! and so can't be carried forward as-is, see `DESIGN.md`).

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use sim_lib::error::SimulatorError;
use sim_lib::pipeline::Controller;
use sim_lib::program::Program;

/// Cycle-accurate five-stage pipeline simulator with branch precomputation.
#[derive(Parser, Debug)]
#[command(name = "bpu-sim")]
struct Cli {
    /// Path to an assembly source file.
    program: String,

    /// Print final cycle/stall/instruction counts.
    #[arg(long)]
    history: bool,

    /// Raise the log level to debug and print the register/memory dump.
    #[arg(long)]
    verbose: bool,

    /// Override the runaway-cycle ceiling.
    #[arg(long)]
    max_cycles: Option<u64>,
}

fn run() -> Result<(), SimulatorError> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let source = fs::read_to_string(&cli.program)?;
    let program = Program::assemble(&source)?;
    info!("assembled {} instruction(s) from {}", program.len(), cli.program);

    let mut controller = Controller::new(&program);
    if let Some(max_cycles) = cli.max_cycles {
        controller = controller.with_max_cycles(max_cycles);
    }
    controller.run()?;

    if cli.history {
        println!(
            "cycles={} stalls={} instructions={}",
            controller.cycle_count(),
            controller.stall_count(),
            program.len()
        );
    }

    if cli.verbose {
        println!("registers: {:?}", controller.register_file().dump());
        for (addr, word) in controller.data_memory().dump_words() {
            println!("mem[{:#010x}] = {:#010x}", addr, word);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
