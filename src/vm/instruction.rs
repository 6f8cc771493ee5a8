//! Bytecode instructions and their wire format
//!
//! An instruction is `(opcode, a, b, c)`. On the wire it is 8 bytes,
//! little-endian: `u8 opcode, u8 padding, i16 a, i16 b, i16 c`.

use super::error::LoadError;
use super::opcode::{register_flags, Encoding, Opcode};

/// Bytes per serialized instruction.
pub const INSTRUCTION_SIZE: usize = 8;

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub a: i16,
    pub b: i16,
    pub c: i16,
}

impl Instruction {
    pub fn new(
        opcode: Opcode,
        a: i16,
        b: i16,
        c: i16,
    ) -> Self {
        Instruction { opcode, a, b, c }
    }

    /// Append the 8-byte wire form.
    pub fn encode_to(
        &self,
        out: &mut Vec<u8>,
    ) {
        out.push(self.opcode as u8);
        out.push(0);
        out.extend_from_slice(&self.a.to_le_bytes());
        out.extend_from_slice(&self.b.to_le_bytes());
        out.extend_from_slice(&self.c.to_le_bytes());
    }

    /// Decode one instruction from an 8-byte record.
    pub fn decode(record: &[u8; INSTRUCTION_SIZE]) -> Result<Self, LoadError> {
        let opcode = Opcode::from_u8(record[0]).ok_or(LoadError::UnknownOpcode(record[0]))?;
        Ok(Instruction {
            opcode,
            a: i16::from_le_bytes([record[2], record[3]]),
            b: i16::from_le_bytes([record[4], record[5]]),
            c: i16::from_le_bytes([record[6], record[7]]),
        })
    }
}

/// Encode an instruction sequence to wire bytes.
pub fn encode_stream(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.len() * INSTRUCTION_SIZE);
    for instruction in instructions {
        instruction.encode_to(&mut out);
    }
    out
}

/// Decode a whole instruction stream; trailing bytes are an error.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Instruction>, LoadError> {
    let trailing = bytes.len() % INSTRUCTION_SIZE;
    if trailing != 0 {
        return Err(LoadError::TruncatedInstructions(trailing));
    }
    let mut instructions = Vec::with_capacity(bytes.len() / INSTRUCTION_SIZE);
    for chunk in bytes.chunks_exact(INSTRUCTION_SIZE) {
        let record: &[u8; INSTRUCTION_SIZE] = chunk.try_into().expect("chunk size checked");
        instructions.push(Instruction::decode(record)?);
    }
    Ok(instructions)
}

/// Render an instruction sequence for debugging.
pub fn disassemble(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for (pc, instruction) in instructions.iter().enumerate() {
        let info = instruction.opcode.info();
        let (a_is_reg, b_is_reg, c_is_reg) = register_flags(info.encoding);
        out.push_str(&format!("{:4}: {}", pc, info.name));
        let mut operands: Vec<(i16, bool)> = Vec::with_capacity(3);
        match info.encoding {
            Encoding::E0000 => {}
            Encoding::Er00 => operands.push((instruction.a, a_is_reg)),
            Encoding::E0i0 => operands.push((instruction.b, b_is_reg)),
            Encoding::Eri0 | Encoding::Eir0 | Encoding::Err0 | Encoding::Eii0 => {
                operands.push((instruction.a, a_is_reg));
                operands.push((instruction.b, b_is_reg));
            }
            Encoding::Errr | Encoding::Erri | Encoding::Erii => {
                operands.push((instruction.a, a_is_reg));
                operands.push((instruction.b, b_is_reg));
                operands.push((instruction.c, c_is_reg));
            }
        }
        for (value, is_reg) in operands {
            if is_reg {
                out.push_str(&format!(" r{}", value));
            } else {
                out.push_str(&format!(" {}", value));
            }
        }
        out.push('\n');
    }
    out
}
