//! Textual assembler/loader: the external-parser collaborator `spec.md` §6
//! describes only by the decoded-record contract it must produce. Modeled on
//! `original_source/component_def.py::InstructionMemory.assemble`, same
//! per-line label capture and operand-splitting shape, reimplemented as a
//! closed-enum Rust decoder instead of Python string dispatch.
//!
//! Register operands are written `r0`..`r31` (the syntax `spec.md` §8's own
//! scenario programs use); `x0`..`x31` is accepted as a synonym. Statements
//! may be separated by newlines or by `;`, so a scenario written on one line
//! in `spec.md` parses unchanged. `#` starts a line comment. A line of the
//! form `label: rest` tags `rest`'s address with `label`.

use std::collections::HashMap;

use crate::error::ProgramError;
use crate::instruction::{Imm, Instruction, Op};

#[derive(Debug, Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, u32>,
}

impl Program {
    pub fn assemble(source: &str) -> Result<Program, ProgramError> {
        let statements = split_statements(source);

        let mut labels = HashMap::new();
        let mut bodies = Vec::with_capacity(statements.len());
        let mut pc: u32 = 0;
        for (line_no, raw) in statements.iter() {
            let mut body = raw.as_str();
            if let Some(colon) = body.find(':') {
                let label = body[..colon].trim().to_string();
                labels.insert(label, pc);
                body = body[colon + 1..].trim();
            }
            if body.is_empty() {
                continue;
            }
            bodies.push((*line_no, body.to_string(), pc));
            pc += 4;
        }

        let mut instructions = Vec::with_capacity(bodies.len());
        for (line_no, body, pc) in bodies {
            instructions.push(parse_instruction(line_no, &body, pc)?);
        }

        for instr in &instructions {
            if let Imm::Label(name) = &instr.imm {
                if !labels.contains_key(name) {
                    return Err(ProgramError::UndefinedLabel(name.clone()));
                }
            }
        }

        Ok(Program {
            instructions,
            labels,
        })
    }

    pub fn instruction_at(&self, pc: u32) -> Option<&Instruction> {
        if pc % 4 != 0 {
            return None;
        }
        self.instructions.get((pc / 4) as usize)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Resolves a label to its instruction's `pc`. Every label referenced by
    /// a parsed `Instruction` was already validated to exist in `assemble`,
    /// so this only panics on a label never produced by this loader.
    pub fn resolve_label(&self, name: &str) -> u32 {
        self.labels[name]
    }
}

fn split_statements(source: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        for stmt in line.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                out.push((line_no + 1, stmt.to_string()));
            }
        }
    }
    out
}

fn parse_reg(line: usize, opcode: &str, s: &str) -> Result<u8, ProgramError> {
    let s = s.trim();
    let digits = s.strip_prefix('r').or_else(|| s.strip_prefix('x')).unwrap_or(s);
    let index: u32 = digits
        .parse()
        .map_err(|_| ProgramError::MalformedOperand {
            line,
            opcode: opcode.to_string(),
            operand: s.to_string(),
        })?;
    if index > 31 {
        return Err(ProgramError::RegisterIndexOutOfRange(index));
    }
    Ok(index as u8)
}

fn parse_int(line: usize, opcode: &str, s: &str) -> Result<i32, ProgramError> {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    }
    .map_err(|_| ProgramError::MalformedOperand {
        line,
        opcode: opcode.to_string(),
        operand: s.to_string(),
    })?;
    Ok(if neg { -value } else { value } as i32)
}

/// Splits `imm(reg)` into its two parts, for loads/stores.
fn split_mem_operand<'a>(
    line: usize,
    opcode: &str,
    operand: &'a str,
) -> Result<(&'a str, &'a str), ProgramError> {
    let operand = operand.trim();
    let open = operand
        .find('(')
        .ok_or_else(|| ProgramError::MalformedOperand {
            line,
            opcode: opcode.to_string(),
            operand: operand.to_string(),
        })?;
    let close = operand
        .find(')')
        .ok_or_else(|| ProgramError::MalformedOperand {
            line,
            opcode: opcode.to_string(),
            operand: operand.to_string(),
        })?;
    Ok((&operand[..open], &operand[open + 1..close]))
}

fn expect_operands<'a>(
    line: usize,
    opcode: &str,
    operands: &'a [String],
    expected: usize,
) -> Result<(), ProgramError> {
    if operands.len() != expected {
        return Err(ProgramError::WrongOperandCount {
            line,
            opcode: opcode.to_string(),
            expected,
            found: operands.len(),
        });
    }
    Ok(())
}

fn parse_instruction(line: usize, body: &str, pc: u32) -> Result<Instruction, ProgramError> {
    let mut parts = body.splitn(2, char::is_whitespace);
    let mnemonic = parts.next().unwrap_or("").to_lowercase();
    let rest = parts.next().unwrap_or("").trim();
    let operands: Vec<String> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(|s| s.trim().to_string()).collect()
    };

    let reg_reg = |op: Op| -> Result<Instruction, ProgramError> {
        expect_operands(line, &mnemonic, &operands, 3)?;
        Ok(Instruction {
            op,
            pc,
            rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
            rs1: Some(parse_reg(line, &mnemonic, &operands[1])?),
            rs2: Some(parse_reg(line, &mnemonic, &operands[2])?),
            imm: Imm::None,
        })
    };
    let reg_imm = |op: Op| -> Result<Instruction, ProgramError> {
        expect_operands(line, &mnemonic, &operands, 3)?;
        Ok(Instruction {
            op,
            pc,
            rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
            rs1: Some(parse_reg(line, &mnemonic, &operands[1])?),
            rs2: None,
            imm: Imm::Value(parse_int(line, &mnemonic, &operands[2])?),
        })
    };
    let branch = |op: Op| -> Result<Instruction, ProgramError> {
        expect_operands(line, &mnemonic, &operands, 3)?;
        Ok(Instruction {
            op,
            pc,
            rd: None,
            rs1: Some(parse_reg(line, &mnemonic, &operands[0])?),
            rs2: Some(parse_reg(line, &mnemonic, &operands[1])?),
            imm: Imm::Label(operands[2].clone()),
        })
    };
    let load = |op: Op| -> Result<Instruction, ProgramError> {
        expect_operands(line, &mnemonic, &operands, 2)?;
        let (offset, base) = split_mem_operand(line, &mnemonic, &operands[1])?;
        Ok(Instruction {
            op,
            pc,
            rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
            rs1: Some(parse_reg(line, &mnemonic, base)?),
            rs2: None,
            imm: Imm::Value(parse_int(line, &mnemonic, offset)?),
        })
    };
    let store = |op: Op| -> Result<Instruction, ProgramError> {
        expect_operands(line, &mnemonic, &operands, 2)?;
        let (offset, base) = split_mem_operand(line, &mnemonic, &operands[1])?;
        Ok(Instruction {
            op,
            pc,
            rd: None,
            rs1: Some(parse_reg(line, &mnemonic, base)?),
            rs2: Some(parse_reg(line, &mnemonic, &operands[0])?),
            imm: Imm::Value(parse_int(line, &mnemonic, offset)?),
        })
    };

    match mnemonic.as_str() {
        "add" => reg_reg(Op::Add),
        "sub" => reg_reg(Op::Sub),
        "xor" => reg_reg(Op::Xor),
        "or" => reg_reg(Op::Or),
        "and" => reg_reg(Op::And),
        "sll" => reg_reg(Op::Sll),
        "slt" => reg_reg(Op::Slt),
        "sltu" => reg_reg(Op::Sltu),
        "srl" => reg_reg(Op::Srl),
        "sra" => reg_reg(Op::Sra),

        "addi" => reg_imm(Op::Addi),
        "xori" => reg_imm(Op::Xori),
        "ori" => reg_imm(Op::Ori),
        "andi" => reg_imm(Op::Andi),
        "slti" => reg_imm(Op::Slti),
        "sltiu" => reg_imm(Op::Sltiu),
        "slli" => reg_imm(Op::Slli),
        "srli" => reg_imm(Op::Srli),
        "srai" => reg_imm(Op::Srai),

        "lb" => load(Op::Lb),
        "lh" => load(Op::Lh),
        "lw" => load(Op::Lw),
        "lbu" => load(Op::Lbu),
        "lhu" => load(Op::Lhu),

        "sb" => store(Op::Sb),
        "sh" => store(Op::Sh),
        "sw" => store(Op::Sw),

        "beq" => branch(Op::Beq),
        "bne" => branch(Op::Bne),
        "blt" => branch(Op::Blt),
        "bge" => branch(Op::Bge),
        "bltu" => branch(Op::Bltu),
        "bgeu" => branch(Op::Bgeu),

        "jal" => {
            expect_operands(line, &mnemonic, &operands, 2)?;
            Ok(Instruction {
                op: Op::Jal,
                pc,
                rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
                rs1: None,
                rs2: None,
                imm: Imm::Label(operands[1].clone()),
            })
        }
        // `j LABEL`: pseudo-op for `jal x0, LABEL` (discards the link).
        "j" => {
            expect_operands(line, &mnemonic, &operands, 1)?;
            Ok(Instruction {
                op: Op::Jal,
                pc,
                rd: Some(0),
                rs1: None,
                rs2: None,
                imm: Imm::Label(operands[0].clone()),
            })
        }
        "jalr" => {
            if operands.len() != 2 && operands.len() != 3 {
                return Err(ProgramError::WrongOperandCount {
                    line,
                    opcode: mnemonic.clone(),
                    expected: 3,
                    found: operands.len(),
                });
            }
            let imm = if operands.len() == 3 {
                parse_int(line, &mnemonic, &operands[2])?
            } else {
                0
            };
            Ok(Instruction {
                op: Op::Jalr,
                pc,
                rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
                rs1: Some(parse_reg(line, &mnemonic, &operands[1])?),
                rs2: None,
                imm: Imm::Value(imm),
            })
        }

        "lui" => {
            expect_operands(line, &mnemonic, &operands, 2)?;
            Ok(Instruction {
                op: Op::Lui,
                pc,
                rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
                rs1: None,
                rs2: None,
                imm: Imm::Value(parse_int(line, &mnemonic, &operands[1])?),
            })
        }
        "auipc" => {
            expect_operands(line, &mnemonic, &operands, 2)?;
            Ok(Instruction {
                op: Op::Auipc,
                pc,
                rd: Some(parse_reg(line, &mnemonic, &operands[0])?),
                rs1: None,
                rs2: None,
                imm: Imm::Value(parse_int(line, &mnemonic, &operands[1])?),
            })
        }

        "nop" => Ok(Instruction {
            op: Op::Nop,
            pc,
            rs1: None,
            rs2: None,
            rd: None,
            imm: Imm::None,
        }),
        "ecall" => Ok(Instruction {
            op: Op::Ecall,
            pc,
            rs1: None,
            rs2: None,
            rd: None,
            imm: Imm::None,
        }),
        "ebreak" => Ok(Instruction {
            op: Op::Ebreak,
            pc,
            rs1: None,
            rs2: None,
            rd: None,
            imm: Imm::None,
        }),

        other => Err(ProgramError::UnknownOpcode {
            line,
            opcode: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_labels_and_branch_target() {
        let program = Program::assemble(
            "addi r5, r0, 5\n\
             beq r5, r5, L\n\
             addi r6, r0, 1\n\
             L: addi r7, r0, 2\n",
        )
        .unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(program.resolve_label("L"), 12);
        assert_eq!(program.instruction_at(4).unwrap().op, Op::Beq);
    }

    #[test]
    fn semicolon_separated_statements_on_one_line() {
        let program =
            Program::assemble("addi r5, r0, 5; addi r6, r0, 7; beq r5, r6, L; nop; L: nop")
                .unwrap();
        assert_eq!(program.len(), 5);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let err = Program::assemble("beq r1, r2, NOPE").unwrap_err();
        assert!(matches!(err, ProgramError::UndefinedLabel(name) if name == "NOPE"));
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let err = Program::assemble("frobnicate r1, r2, r3").unwrap_err();
        assert!(matches!(err, ProgramError::UnknownOpcode { .. }));
    }

    #[test]
    fn load_store_parse_offset_and_base() {
        let program = Program::assemble("lw r5, 8(r1)\nsw r5, -4(r2)").unwrap();
        let lw = program.instruction_at(0).unwrap();
        assert_eq!(lw.rs1, Some(1));
        assert_eq!(lw.imm, Imm::Value(8));
        let sw = program.instruction_at(4).unwrap();
        assert_eq!(sw.rs1, Some(2));
        assert_eq!(sw.rs2, Some(5));
        assert_eq!(sw.imm, Imm::Value(-4));
    }

    #[test]
    fn jalr_defaults_immediate_to_zero() {
        let program = Program::assemble("jalr r0, r1").unwrap();
        assert_eq!(program.instruction_at(0).unwrap().imm, Imm::Value(0));
    }
}
