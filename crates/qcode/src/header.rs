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

//! Procedure header: the fixed-layout tables that precede the code of every compiled procedure.
//!
//! ```text
//! [varSpaceSize:2][codeSize:2][paramCount:1][paramTypes…]
//! [globalTableSize:2][globals…][externalTableSize:2][externals…]
//! [stringFixupSize:2][stringFixups…][arrayFixupSize:2][arrayFixups…]
//! [extended signature:2]? [code…]
//! ```
//!
//! All 16-bit fields are big-endian.

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::types::{EXTENDED_SIGNATURE, Target, VarType};

/// Leading byte marking an addressed external record instead of a name length.
pub const EXTERNAL_ADDRESS_MARKER: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntry {
    pub name: String,
    pub ty: VarType,
    pub offset: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalEntry {
    Named { name: String, ty: VarType },
    Addressed { address: i16, ty: VarType },
}

impl ExternalEntry {
    pub fn ty(&self) -> VarType {
        match self {
            ExternalEntry::Named { ty, .. } | ExternalEntry::Addressed { ty, .. } => *ty,
        }
    }
}

impl std::fmt::Display for ExternalEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalEntry::Named { name, ty } => write!(f, "{name}{}", ty.suffix()),
            ExternalEntry::Addressed { address, ty } => write!(f, "{ty} at {address}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringFixup {
    pub address: i16,
    pub max_len: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayFixup {
    pub address: i16,
    pub count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QcodeHeader {
    pub var_space_size: u16,
    pub code_size: u16,
    /// Parameter types in declaration order.
    pub param_types: Vec<VarType>,
    pub globals: Vec<GlobalEntry>,
    pub externals: Vec<ExternalEntry>,
    pub string_fixups: Vec<StringFixup>,
    pub array_fixups: Vec<ArrayFixup>,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error(
        "header truncated reading {what} at byte {offset}: needed {needed}, {available} available"
    )]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("bad variable type byte {byte:#04x} in {what}")]
    BadType { what: &'static str, byte: u8 },
    #[error("{what} table overruns its declared size")]
    TableOverrun { what: &'static str },
    #[error("code size {declared} exceeds the {available} bytes present")]
    CodeSizeMismatch { declared: usize, available: usize },
    #[error("{what} does not fit its length field ({len})")]
    TooLarge { what: &'static str, len: usize },
}

fn str_bytes(s: &str) -> impl Iterator<Item = u8> + '_ {
    s.chars().map(|c| u8::try_from(c).unwrap_or(b'?'))
}

/// Decode a byte string as Latin-1 text.
pub fn bytes_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn table_len(what: &'static str, len: usize) -> Result<u16, HeaderError> {
    u16::try_from(len).map_err(|_| HeaderError::TooLarge { what, len })
}

/// One-byte count, at most `max`.
fn byte_len(what: &'static str, len: usize, max: u8) -> Result<u8, HeaderError> {
    u8::try_from(len)
        .ok()
        .filter(|&n| n <= max)
        .ok_or(HeaderError::TooLarge { what, len })
}

impl QcodeHeader {
    /// Serialize the header followed by `code`. `code_size` is taken from `code`.
    pub fn encode(&self, code: &[u8]) -> Result<Vec<u8>, HeaderError> {
        let mut out = BytesMut::with_capacity(64 + code.len());
        out.put_u16(self.var_space_size);
        out.put_u16(table_len("code", code.len())?);
        out.put_u8(byte_len("parameter list", self.param_types.len(), u8::MAX)?);
        for ty in self.param_types.iter().rev() {
            out.put_u8(ty.as_byte());
        }

        let mut globals = BytesMut::new();
        for g in &self.globals {
            globals.put_u8(byte_len("global name", g.name.chars().count(), u8::MAX)?);
            globals.extend(str_bytes(&g.name));
            globals.put_u8(g.ty.as_byte());
            globals.put_i16(g.offset);
        }
        out.put_u16(table_len("global table", globals.len())?);
        out.extend_from_slice(&globals);

        let mut externals = BytesMut::new();
        for e in &self.externals {
            match e {
                ExternalEntry::Named { name, ty } => {
                    // A length of 0xFF would read back as the address marker.
                    let len = name.chars().count();
                    externals.put_u8(byte_len("external name", len, EXTERNAL_ADDRESS_MARKER - 1)?);
                    externals.extend(str_bytes(name));
                    externals.put_u8(ty.as_byte());
                }
                ExternalEntry::Addressed { address, ty } => {
                    externals.put_u8(EXTERNAL_ADDRESS_MARKER);
                    externals.put_i16(*address);
                    externals.put_u8(ty.as_byte());
                }
            }
        }
        out.put_u16(table_len("external table", externals.len())?);
        out.extend_from_slice(&externals);

        out.put_u16(table_len("string fixups", self.string_fixups.len() * 3)?);
        for f in &self.string_fixups {
            out.put_i16(f.address);
            out.put_u8(f.max_len);
        }
        out.put_u16(table_len("array fixups", self.array_fixups.len() * 4)?);
        for f in &self.array_fixups {
            out.put_i16(f.address);
            out.put_u16(f.count);
        }

        if self.target == Target::Extended {
            out.extend_from_slice(&EXTENDED_SIGNATURE);
        }
        out.extend_from_slice(code);
        Ok(out.to_vec())
    }

    /// Parse a header, returning it along with the offset at which the code starts.
    pub fn decode(bytes: &[u8]) -> Result<(QcodeHeader, usize), HeaderError> {
        let mut r = Reader { buf: bytes, start: bytes.len() };
        let var_space_size = r.u16("variable space size")?;
        let code_size = r.u16("code size")?;
        let param_count = r.u8("parameter count")? as usize;
        let mut param_types = r
            .take(param_count, "parameter types")?
            .iter()
            .map(|&byte| {
                VarType::from_byte(byte).ok_or(HeaderError::BadType {
                    what: "parameter types",
                    byte,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        param_types.reverse();

        let globals_len = r.u16("global table size")? as usize;
        let base = r.offset();
        let mut globals_buf = Reader::sub(r.take(globals_len, "global table")?, base);
        let mut globals = vec![];
        while globals_buf.buf.has_remaining() {
            let len = globals_buf.u8("global name length")? as usize;
            let name = bytes_to_string(globals_buf.take(len, "global name")?);
            let ty = globals_buf.ty("global table")?;
            let offset = globals_buf.u16("global offset")? as i16;
            globals.push(GlobalEntry { name, ty, offset });
        }

        let externals_len = r.u16("external table size")? as usize;
        let base = r.offset();
        let mut ext_buf = Reader::sub(r.take(externals_len, "external table")?, base);
        let mut externals = vec![];
        while ext_buf.buf.has_remaining() {
            let lead = ext_buf.u8("external record")?;
            if lead == EXTERNAL_ADDRESS_MARKER {
                let address = ext_buf.u16("external address")? as i16;
                let ty = ext_buf.ty("external table")?;
                externals.push(ExternalEntry::Addressed { address, ty });
            } else {
                let name = bytes_to_string(ext_buf.take(lead as usize, "external name")?);
                let ty = ext_buf.ty("external table")?;
                externals.push(ExternalEntry::Named { name, ty });
            }
        }

        let strings_len = r.u16("string fixup size")? as usize;
        if strings_len % 3 != 0 {
            return Err(HeaderError::TableOverrun { what: "string fixup" });
        }
        let base = r.offset();
        let mut strings_buf = Reader::sub(r.take(strings_len, "string fixups")?, base);
        let mut string_fixups = vec![];
        while strings_buf.buf.has_remaining() {
            let address = strings_buf.u16("string fixup address")? as i16;
            let max_len = strings_buf.u8("string fixup length")?;
            string_fixups.push(StringFixup { address, max_len });
        }

        let arrays_len = r.u16("array fixup size")? as usize;
        if arrays_len % 4 != 0 {
            return Err(HeaderError::TableOverrun { what: "array fixup" });
        }
        let base = r.offset();
        let mut arrays_buf = Reader::sub(r.take(arrays_len, "array fixups")?, base);
        let mut array_fixups = vec![];
        while arrays_buf.buf.has_remaining() {
            let address = arrays_buf.u16("array fixup address")? as i16;
            let count = arrays_buf.u16("array fixup count")?;
            array_fixups.push(ArrayFixup { address, count });
        }

        let mut code_offset = r.offset();
        let remaining = r.buf.remaining();
        let code_size_usize = code_size as usize;
        let target = if remaining >= code_size_usize + EXTENDED_SIGNATURE.len()
            && r.buf.starts_with(&EXTENDED_SIGNATURE)
        {
            code_offset += EXTENDED_SIGNATURE.len();
            Target::Extended
        } else {
            Target::Base
        };
        let available = bytes.len() - code_offset;
        if available < code_size_usize {
            return Err(HeaderError::CodeSizeMismatch {
                declared: code_size_usize,
                available,
            });
        }
        trace!(
            var_space_size,
            code_size,
            params = param_types.len(),
            globals = globals.len(),
            externals = externals.len(),
            ?target,
            "decoded procedure header"
        );

        Ok((
            QcodeHeader {
                var_space_size,
                code_size,
                param_types,
                globals,
                externals,
                string_fixups,
                array_fixups,
                target,
            },
            code_offset,
        ))
    }
}

/// Bounds-checked big-endian reader; `Buf` getters panic on underflow.
struct Reader<'a> {
    buf: &'a [u8],
    /// Absolute offset of the end of `buf`, for error positions.
    start: usize,
}

impl<'a> Reader<'a> {
    fn sub(buf: &'a [u8], base: usize) -> Self {
        Reader {
            buf,
            start: base + buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.start - self.buf.remaining()
    }

    fn need(&self, n: usize, what: &'static str) -> Result<(), HeaderError> {
        if self.buf.remaining() < n {
            return Err(HeaderError::Truncated {
                what,
                offset: self.offset(),
                needed: n,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, HeaderError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, HeaderError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn ty(&mut self, what: &'static str) -> Result<VarType, HeaderError> {
        let byte = self.u8(what)?;
        VarType::from_byte(byte).ok_or(HeaderError::BadType { what, byte })
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], HeaderError> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> QcodeHeader {
        QcodeHeader {
            var_space_size: 0x2040,
            code_size: 3,
            param_types: vec![VarType::Int, VarType::Str],
            globals: vec![GlobalEntry {
                name: "G".into(),
                ty: VarType::Float,
                offset: -0x2008,
            }],
            externals: vec![
                ExternalEntry::Named {
                    name: "X".into(),
                    ty: VarType::Int,
                },
                ExternalEntry::Addressed {
                    address: -6,
                    ty: VarType::Str,
                },
            ],
            string_fixups: vec![StringFixup {
                address: -20,
                max_len: 10,
            }],
            array_fixups: vec![ArrayFixup {
                address: -42,
                count: 10,
            }],
            target: Target::Base,
        }
    }

    #[test]
    fn encodes_byte_exact() {
        let bytes = sample().encode(&[0x22, 0x00, 0x01]).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0x20, 0x40,             // var space
            0x00, 0x03,             // code size
            0x02, 0x02, 0x00,       // params, reversed
            0x00, 0x05, 0x01, b'G', 0x01, 0xDF, 0xF8,
            0x00, 0x07, 0x01, b'X', 0x00, 0xFF, 0xFF, 0xFA, 0x02,
            0x00, 0x03, 0xFF, 0xEC, 0x0A,
            0x00, 0x04, 0xFF, 0xD6, 0x00, 0x0A,
            0x22, 0x00, 0x01,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let header = sample();
        let bytes = header.encode(&[0x22, 0x00, 0x01]).unwrap();
        let (decoded, code_offset) = QcodeHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&bytes[code_offset..], &[0x22, 0x00, 0x01]);
    }

    #[test]
    fn extended_signature_precedes_code() {
        let header = QcodeHeader {
            code_size: 1,
            target: Target::Extended,
            ..Default::default()
        };
        let bytes = header.encode(&[0x7B]).unwrap();
        assert_eq!(&bytes[bytes.len() - 3..], &[0x59, 0xB2, 0x7B]);
        let (decoded, code_offset) = QcodeHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.target, Target::Extended);
        assert_eq!(&bytes[code_offset..], &[0x7B]);
    }

    /// A 255-character external name cannot be told apart from the address marker, so it is
    /// refused on write, and such a record from elsewhere reads back as an addressed one.
    #[test]
    fn long_external_name_collides_with_address_marker() {
        let header = QcodeHeader {
            externals: vec![ExternalEntry::Named {
                name: "N".repeat(255),
                ty: VarType::Int,
            }],
            ..Default::default()
        };
        assert_eq!(
            header.encode(&[]).unwrap_err(),
            HeaderError::TooLarge {
                what: "external name",
                len: 255
            }
        );

        let mut bytes = vec![0, 0, 0, 0, 0, 0, 0, 0x01, 0x01, 0xFF];
        bytes.extend([b'N'; 255]);
        bytes.extend([0x00, 0, 0, 0, 0]);
        assert_eq!(
            QcodeHeader::decode(&bytes).unwrap_err(),
            HeaderError::BadType {
                what: "external table",
                byte: b'N'
            }
        );
    }

    #[test]
    fn overlong_names_are_refused() {
        let header = QcodeHeader {
            globals: vec![GlobalEntry {
                name: "A".repeat(300),
                ty: VarType::Int,
                offset: -0x2002,
            }],
            ..Default::default()
        };
        assert_eq!(
            header.encode(&[0x7B]).unwrap_err(),
            HeaderError::TooLarge {
                what: "global name",
                len: 300
            }
        );

        let header = QcodeHeader {
            externals: vec![ExternalEntry::Named {
                name: "N".repeat(254),
                ty: VarType::Int,
            }],
            ..Default::default()
        };
        let bytes = header.encode(&[]).unwrap();
        assert_eq!(QcodeHeader::decode(&bytes).unwrap().0, header);
    }

    #[test]
    fn truncation_is_reported() {
        let bytes = sample().encode(&[0x22, 0x00, 0x01]).unwrap();
        let err = QcodeHeader::decode(&bytes[..10]).unwrap_err();
        assert!(matches!(err, HeaderError::Truncated { .. }), "{err}");
        let err = QcodeHeader::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            HeaderError::CodeSizeMismatch {
                declared: 3,
                available: 2
            }
        );
    }
}
