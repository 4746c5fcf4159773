// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Operand decoding for a single instruction in a code stream.

use std::fmt::{Display, Formatter};

use crate::float::{FloatError, decode_float, encoded_len};
use crate::header::bytes_to_string;
use crate::opcode::{
    Arity, FIELD_LIST_END, Opcode, OpcodeInfo, OperandSpec, VARINT_WIDE, opcode_info,
};
use crate::types::VarType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub ty: VarType,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operands {
    None,
    Byte(u8),
    Word(u16),
    Str(String),
    /// Canonical decimal rendering of a compact float.
    Float(String),
    VarInt(u16),
    /// Absolute target of a branch, already resolved from its displacement.
    Branch { displacement: i16, target: usize },
    ProcCall { argc: u8, name: String },
    FieldList { file: u8, fields: Vec<Field> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub pc: usize,
    pub opcode: Opcode,
    pub operands: Operands,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("instruction at {pc} runs past the end of the code")]
    Truncated { pc: usize },
    #[error("unterminated field list at {pc}")]
    UnterminatedFieldList { pc: usize },
    #[error("bad field type {byte:#04x} at {pc}")]
    BadFieldType { pc: usize, byte: u8 },
    #[error("bad float operand at {pc}: {source}")]
    Float { pc: usize, source: FloatError },
}

impl Instruction {
    pub fn info(&self) -> Option<&'static OpcodeInfo> {
        opcode_info(self.opcode.0)
    }

    pub fn end(&self) -> usize {
        self.pc + self.len
    }

    /// Values popped from the stack, resolving operand-dependent counts.
    pub fn pops(&self) -> usize {
        match self.info().map(|i| i.pops) {
            Some(Arity::Fixed(n)) => n as usize,
            Some(Arity::FromOperand) => match &self.operands {
                Operands::ProcCall { argc, .. } => *argc as usize,
                Operands::VarInt(n) => *n as usize,
                _ => 0,
            },
            None => 0,
        }
    }

    pub fn pushes(&self) -> usize {
        self.info().map(|i| i.pushes as usize).unwrap_or(0)
    }

    pub fn branch_target(&self) -> Option<usize> {
        match self.operands {
            Operands::Branch { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Frame address operand of variable access opcodes.
    pub fn address(&self) -> Option<i16> {
        match self.operands {
            Operands::Word(w) => Some(w as i16),
            _ => None,
        }
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    pc: usize,
    pos: usize,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::Truncated { pc: self.pc })?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        let bytes = self
            .code
            .get(self.pos..self.pos + len)
            .ok_or(DecodeError::Truncated { pc: self.pc })?;
        self.pos += len;
        Ok(bytes_to_string(bytes))
    }
}

/// Decode the instruction starting at `pc`. Unknown opcodes decode as one-byte instructions with
/// no operands.
pub fn decode(code: &[u8], pc: usize) -> Result<Instruction, DecodeError> {
    let mut c = Cursor { code, pc, pos: pc };
    let opcode = Opcode(c.u8()?);
    let shape = opcode_info(opcode.0)
        .map(|i| i.operands)
        .unwrap_or(OperandSpec::None);
    let operands = match shape {
        OperandSpec::None => Operands::None,
        OperandSpec::Byte => Operands::Byte(c.u8()?),
        OperandSpec::Word => Operands::Word(c.u16()?),
        OperandSpec::Str => Operands::Str(c.str()?),
        OperandSpec::Float => {
            let first = *code.get(c.pos).ok_or(DecodeError::Truncated { pc })?;
            let len = encoded_len(first);
            let bytes = code
                .get(c.pos..c.pos + len)
                .ok_or(DecodeError::Truncated { pc })?;
            let (text, used) =
                decode_float(bytes).map_err(|source| DecodeError::Float { pc, source })?;
            c.pos += used;
            Operands::Float(text)
        }
        OperandSpec::VarInt => {
            let b0 = c.u8()?;
            if b0 < VARINT_WIDE {
                Operands::VarInt(b0 as u16)
            } else {
                let b1 = c.u8()?;
                Operands::VarInt((((b0 & 0x7F) as u16) << 8) | b1 as u16)
            }
        }
        OperandSpec::Branch => {
            let displacement = c.u16()? as i16;
            let target = (c.pos as isize + displacement as isize).max(0) as usize;
            Operands::Branch {
                displacement,
                target,
            }
        }
        OperandSpec::ProcCall => {
            let argc = c.u8()?;
            let name = c.str()?;
            Operands::ProcCall { argc, name }
        }
        OperandSpec::FieldList => {
            let file = c.u8()?;
            let mut fields = vec![];
            loop {
                let byte = c
                    .u8()
                    .map_err(|_| DecodeError::UnterminatedFieldList { pc })?;
                if byte == FIELD_LIST_END {
                    break;
                }
                let ty = VarType::from_byte(byte).ok_or(DecodeError::BadFieldType { pc, byte })?;
                let name = c.str()?;
                fields.push(Field { ty, name });
            }
            Operands::FieldList { file, fields }
        }
    };
    Ok(Instruction {
        pc,
        opcode,
        operands,
        len: c.pos - pc,
    })
}

/// Decode a whole code stream. Decoding stops at the first malformed instruction, which is
/// returned alongside everything decoded before it.
pub fn decode_all(code: &[u8]) -> (Vec<Instruction>, Option<DecodeError>) {
    let mut out = vec![];
    let mut pc = 0;
    while pc < code.len() {
        match decode(code, pc) {
            Ok(insn) => {
                pc = insn.end();
                out.push(insn);
            }
            Err(e) => return (out, Some(e)),
        }
    }
    (out, None)
}

/// Encode a `VarInt` operand.
pub fn encode_varint(n: u16) -> Vec<u8> {
    if n < VARINT_WIDE as u16 {
        vec![n as u8]
    } else {
        vec![((n >> 8) as u8 & 0x7F) | VARINT_WIDE, n as u8]
    }
}

/// Letter naming a logical file, `A` for 0. Numbers past `Z` render as `$xx`.
pub fn file_letter(file: u8) -> String {
    match file {
        0..=25 => char::from(b'A' + file).to_string(),
        _ => format!("${file:02X}"),
    }
}

impl Display for Operands {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operands::None => Ok(()),
            Operands::Byte(b) => write!(f, "{b:#04x}"),
            Operands::Word(w) => write!(f, "{w:#06x}"),
            Operands::Str(s) => write!(f, "{s:?}"),
            Operands::Float(t) => write!(f, "{t}"),
            Operands::VarInt(n) => write!(f, "{n}"),
            Operands::Branch {
                displacement,
                target,
            } => write!(f, "{displacement:+} -> {target:04x}"),
            Operands::ProcCall { argc, name } => write!(f, "{name}:({argc})"),
            Operands::FieldList { file, fields } => {
                write!(f, "{}", file_letter(*file))?;
                for field in fields {
                    write!(f, " {}", field.name)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}: {:02X} {}", self.pc, self.opcode.0, self.opcode)?;
        if self.operands != Operands::None {
            write!(f, " {}", self.operands)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn word_and_string_operands() {
        let code = [0x22, 0x00, 0x05, 0x24, 0x03, b'Y', b'E', b'S'];
        let a = decode(&code, 0).unwrap();
        assert_eq!(a.operands, Operands::Word(5));
        assert_eq!(a.len, 3);
        let b = decode(&code, 3).unwrap();
        assert_eq!(b.operands, Operands::Str("YES".into()));
        assert_eq!(b.len, 5);
    }

    #[test]
    fn branch_target_is_self_relative() {
        // BRAF -5 at pc 4 lands on 4 + 3 - 5 = 2.
        let code = [0x00, 0x00, 0x00, 0x00, 0x7E, 0xFF, 0xFB];
        let insn = decode(&code, 4).unwrap();
        assert_eq!(
            insn.operands,
            Operands::Branch {
                displacement: -5,
                target: 2
            }
        );
    }

    #[test]
    fn float_operand_length_from_first_byte() {
        let code = [0x23, 0x04, 0x50, 0x34, 0x12, 0x02, 0x7B];
        let insn = decode(&code, 0).unwrap();
        assert_eq!(insn.operands, Operands::Float("123.45".into()));
        assert_eq!(insn.len, 6);
    }

    #[test]
    fn varint_forms() {
        assert_eq!(encode_varint(5), vec![5]);
        assert_eq!(encode_varint(0x123), vec![0x81, 0x23]);
        let insn = decode(&[0xD8, 0x81, 0x23], 0).unwrap();
        assert_eq!(insn.operands, Operands::VarInt(0x123));
        assert_eq!(insn.pops(), 0x123);
    }

    #[test]
    fn proc_call_pops_its_arguments() {
        let code = [0x7D, 0x02, 0x03, b'F', b'O', b'O'];
        let insn = decode(&code, 0).unwrap();
        assert_eq!(
            insn.operands,
            Operands::ProcCall {
                argc: 2,
                name: "FOO".into()
            }
        );
        assert_eq!(insn.pops(), 2);
        assert_eq!(insn.pushes(), 1);
    }

    #[test]
    fn field_list_runs_to_sentinel() {
        let code = [0x65, 0x00, 0x02, 0x02, b'N', b'$', 0x00, 0x01, b'A', 0x88];
        let insn = decode(&code, 0).unwrap();
        assert_eq!(insn.len, code.len());
        let Operands::FieldList { file, fields } = insn.operands else {
            panic!("expected field list");
        };
        assert_eq!(file, 0);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1], Field { ty: VarType::Int, name: "A".into() });
        assert_eq!(
            decode(&code[..6], 0),
            Err(DecodeError::UnterminatedFieldList { pc: 0 })
        );
    }

    #[test]
    fn file_numbers_past_z_render_as_hex() {
        let insn = decode(&[0x65, 0xC8, 0x88], 0).unwrap();
        assert_eq!(insn.to_string(), "0000: 65 OPEN $C8");
        assert_eq!(file_letter(0), "A");
        assert_eq!(file_letter(25), "Z");
        assert_eq!(file_letter(0xFF), "$FF");
    }

    #[test]
    fn unknown_opcode_is_one_byte() {
        let insn = decode(&[0xFE, 0x00], 0).unwrap();
        assert_eq!(insn.len, 1);
        assert!(insn.info().is_none());
    }

    #[test]
    fn truncated_operand() {
        assert_eq!(decode(&[0x22, 0x00], 0), Err(DecodeError::Truncated { pc: 0 }));
    }
}
