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

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Frame offset where locals, parameters and external slots start allocating downward.
pub const LOCAL_FRAME_BASE: i16 = 0;
/// Frame offset where globals start allocating downward. Kept below the local region so that
/// parameters, which are allocated first, always hold the highest frame addresses.
pub const GLOBAL_FRAME_BASE: i16 = -0x2000;

/// Bytes taken by an external indirection slot.
pub const EXTERNAL_SLOT_SIZE: i16 = 2;
/// Maximum payload for a string declared without an explicit length.
pub const DEFAULT_STRING_LENGTH: u8 = 255;

/// Signature bytes placed immediately before the code of procedures built for the extended
/// instruction set.
pub const EXTENDED_SIGNATURE: [u8; 2] = [0x59, 0xB2];

/// The static type of a variable, as stored in the header tables and implied by the opcode family
/// used to access it.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum VarType {
    Int = 0,
    Float = 1,
    Str = 2,
    IntArray = 3,
    FloatArray = 4,
    StrArray = 5,
}

impl VarType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => VarType::Int,
            1 => VarType::Float,
            2 => VarType::Str,
            3 => VarType::IntArray,
            4 => VarType::FloatArray,
            5 => VarType::StrArray,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Type from the suffix character of an identifier (`%`, `$`, or none for float).
    pub fn from_name(name: &str) -> Self {
        match name.chars().last() {
            Some('%') => VarType::Int,
            Some('$') => VarType::Str,
            _ => VarType::Float,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            VarType::IntArray | VarType::FloatArray | VarType::StrArray
        )
    }

    /// The element type of an array type, or the type itself for scalars.
    pub fn scalar(self) -> Self {
        match self {
            VarType::IntArray => VarType::Int,
            VarType::FloatArray => VarType::Float,
            VarType::StrArray => VarType::Str,
            t => t,
        }
    }

    pub fn array(self) -> Self {
        match self {
            VarType::Int => VarType::IntArray,
            VarType::Float => VarType::FloatArray,
            VarType::Str => VarType::StrArray,
            t => t,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self.scalar() {
            VarType::Int => "%",
            VarType::Str => "$",
            _ => "",
        }
    }

    /// Bytes per numeric element. Strings are sized by their declared maximum length instead.
    pub fn element_size(self) -> Option<i16> {
        match self.scalar() {
            VarType::Int => Some(2),
            VarType::Float => Some(8),
            _ => None,
        }
    }

    /// Offset of this type within a six-wide opcode group (int, float, str, int[], float[], str[]).
    pub(crate) fn group_index(self) -> u8 {
        self as u8
    }
}

/// Strip a trailing `%` or `$` from an identifier.
pub fn strip_suffix(name: &str) -> &str {
    name.strip_suffix(['%', '$']).unwrap_or(name)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum StorageClass {
    Global,
    Local,
    Parameter,
    External,
}

/// Which instruction set a procedure is built for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Base,
    Extended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_types() {
        assert_eq!(VarType::from_name("A%"), VarType::Int);
        assert_eq!(VarType::from_name("NAME$"), VarType::Str);
        assert_eq!(VarType::from_name("X"), VarType::Float);
        assert_eq!(strip_suffix("NAME$"), "NAME");
        assert_eq!(strip_suffix("X"), "X");
    }

    #[test]
    fn array_round_trip() {
        for ty in [VarType::Int, VarType::Float, VarType::Str] {
            assert!(ty.array().is_array());
            assert_eq!(ty.array().scalar(), ty);
            assert_eq!(ty.array().suffix(), ty.suffix());
        }
    }

    #[test]
    fn wire_bytes() {
        for b in 0..6 {
            assert_eq!(VarType::from_byte(b).map(VarType::as_byte), Some(b));
        }
        assert_eq!(VarType::from_byte(6), None);
    }

    #[test]
    fn iteration_follows_wire_order() {
        use strum::IntoEnumIterator;
        for (b, ty) in VarType::iter().enumerate() {
            assert_eq!(ty.as_byte() as usize, b);
        }
    }
}
