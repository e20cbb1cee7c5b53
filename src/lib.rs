pub mod alu;
pub mod data_memory;
pub mod error;
pub mod instruction;
pub mod pipeline;
pub mod program;
pub mod register_file;
