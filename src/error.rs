use thiserror::Error;

/// Top-level error type for the simulator.
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("program could not be assembled: {0}")]
    Program(#[from] ProgramError),

    #[error("simulation exceeded the cycle ceiling ({cycles} cycles)")]
    RunawaySimulation { cycles: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Parse/link errors raised by `program.rs` before simulation starts
/// (`spec.md` §7, "Parse/link errors"). Simulation never begins on one of
/// these.
#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("line {line}: unknown opcode '{opcode}'")]
    UnknownOpcode { line: usize, opcode: String },

    #[error("line {line}: malformed operand '{operand}' for '{opcode}'")]
    MalformedOperand {
        line: usize,
        opcode: String,
        operand: String,
    },

    #[error("line {line}: expected {expected} operand(s) for '{opcode}', found {found}")]
    WrongOperandCount {
        line: usize,
        opcode: String,
        expected: usize,
        found: usize,
    },

    #[error("undefined label '{0}'")]
    UndefinedLabel(String),

    #[error("register index {0} is out of range (0..31)")]
    RegisterIndexOutOfRange(u32),
}

/// Type alias for `Result` with `SimulatorError`.
pub type SimulatorResult<T> = Result<T, SimulatorError>;
