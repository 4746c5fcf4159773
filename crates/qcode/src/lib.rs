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

//! QCode: the bytecode produced by the OPL compiler. Opcode table, instruction decoding, the
//! compact float representation, and the procedure header layout.

pub mod float;
pub mod header;
pub mod instruction;
pub mod opcode;
mod types;

pub use float::{FloatError, decode_float, encode_float, encode_float_text};
pub use header::{ArrayFixup, ExternalEntry, GlobalEntry, HeaderError, QcodeHeader, StringFixup};
pub use instruction::{DecodeError, Field, Instruction, Operands, decode, decode_all, file_letter};
pub use opcode::{OpClass, Opcode, OpcodeInfo, OperandSpec, Operator, PrintChannel, opcode_info};
pub use types::{
    DEFAULT_STRING_LENGTH, EXTENDED_SIGNATURE, EXTERNAL_SLOT_SIZE, GLOBAL_FRAME_BASE,
    LOCAL_FRAME_BASE, StorageClass, Target, VarType, strip_suffix,
};
