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

//! Declaration pass: collects the procedure header and GLOBAL / LOCAL / EXTERNAL declarations,
//! assigns frame offsets and builds the string and array fixup tables.

use std::collections::HashMap;

use qcode::{
    ArrayFixup, DEFAULT_STRING_LENGTH, EXTERNAL_SLOT_SIZE, ExternalEntry, GLOBAL_FRAME_BASE,
    GlobalEntry, LOCAL_FRAME_BASE, QcodeHeader, StorageClass, StringFixup, Target, VarType,
    strip_suffix,
};
use tracing::debug;

use crate::errors::CompileError;
use crate::tokenizer::{Token, TokenCursor, TokenKind, unexpected};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Name with its type suffix stripped.
    pub name: String,
    pub ty: VarType,
    pub class: StorageClass,
    /// Frame offset of the lowest byte of the variable's storage. For externals, the offset of
    /// the indirection slot.
    pub offset: i16,
    pub max_len: Option<u8>,
    pub elements: Option<u16>,
}

impl Symbol {
    pub fn display_name(&self) -> String {
        format!("{}{}", self.name, self.ty.suffix())
    }

    pub fn is_external(&self) -> bool {
        self.class == StorageClass::External
    }
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    /// Upper-cased name including suffix -> index into `symbols`.
    index: HashMap<String, usize>,
    next_local: i32,
    next_global: i32,
    proc_name: Option<String>,
    params: Vec<VarType>,
    string_fixups: Vec<StringFixup>,
    array_fixups: Vec<ArrayFixup>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowest offset the local region may reach before running into the globals.
const LOCAL_FRAME_LIMIT: i32 = GLOBAL_FRAME_BASE as i32;
const GLOBAL_FRAME_LIMIT: i32 = i16::MIN as i32;

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols: vec![],
            index: HashMap::new(),
            next_local: LOCAL_FRAME_BASE as i32,
            next_global: GLOBAL_FRAME_BASE as i32,
            proc_name: None,
            params: vec![],
            string_fixups: vec![],
            array_fixups: vec![],
        }
    }

    /// Run the declaration pass over `tokens`.
    pub fn allocate(tokens: &[Token]) -> Result<Self, CompileError> {
        let mut table = SymbolTable::new();
        let mut cursor = TokenCursor::new(tokens);
        while let Some(first) = cursor.peek() {
            if first.is_keyword("PROC") && table.proc_name.is_none() {
                cursor.next();
                table.proc_header(&mut cursor)?;
            } else if let Some(class) = declaration_class(first) {
                cursor.next();
                table.declaration_list(&mut cursor, class)?;
            } else {
                cursor.skip_line();
            }
        }
        debug!(
            symbols = table.symbols.len(),
            params = table.params.len(),
            var_space = table.var_space_size(),
            "declaration pass complete"
        );
        Ok(table)
    }

    fn proc_header(&mut self, cursor: &mut TokenCursor) -> Result<(), CompileError> {
        let name = cursor.expect_identifier()?;
        self.proc_name = Some(name.upper());
        cursor.eat_punct(":");
        if cursor.eat_punct("(") {
            loop {
                let param = cursor.expect_identifier()?;
                let ty = VarType::from_name(&param.text);
                let size = scalar_size(ty, DEFAULT_STRING_LENGTH);
                let offset = self.alloc_local(size, param.line)?;
                self.insert(
                    param,
                    Symbol {
                        name: strip_suffix(&param.upper()).to_string(),
                        ty,
                        class: StorageClass::Parameter,
                        offset,
                        max_len: None,
                        elements: None,
                    },
                )?;
                self.params.push(ty);
                if cursor.eat_punct(")") {
                    break;
                }
                cursor.expect_punct(",")?;
            }
        }
        cursor.expect_eol()
    }

    fn declaration_list(
        &mut self,
        cursor: &mut TokenCursor,
        class: StorageClass,
    ) -> Result<(), CompileError> {
        loop {
            let ident = cursor.expect_identifier()?;
            let mut dims = vec![];
            if cursor.eat_punct("(") {
                loop {
                    dims.push(dimension(cursor.expect("a dimension")?)?);
                    if cursor.eat_punct(")") {
                        break;
                    }
                    cursor.expect_punct(",")?;
                }
            }
            self.declare(ident, class, &dims)?;
            if cursor.at_eol() {
                break;
            }
            cursor.expect_punct(",")?;
        }
        cursor.expect_eol()
    }

    fn declare(
        &mut self,
        ident: &Token,
        class: StorageClass,
        dims: &[u16],
    ) -> Result<(), CompileError> {
        let line = ident.line;
        let scalar = VarType::from_name(&ident.text);
        let name = strip_suffix(&ident.upper()).to_string();

        let (ty, max_len, elements, size) = if scalar == VarType::Str {
            match dims.split_last() {
                None => {
                    let size = DEFAULT_STRING_LENGTH as i32 + 1;
                    (VarType::Str, DEFAULT_STRING_LENGTH, None, size)
                }
                Some((&len, rest)) => {
                    let max_len = string_length(len, line)?;
                    if rest.is_empty() {
                        (VarType::Str, max_len, None, max_len as i32 + 1)
                    } else {
                        let slots = rest.iter().map(|&d| d as i32 + 1).product::<i32>();
                        let size = (max_len as i32 + 1) * slots;
                        (VarType::StrArray, max_len, Some(element_count(rest, line)?), size)
                    }
                }
            }
        } else if dims.is_empty() {
            (scalar, 0, None, scalar_size(scalar, 0))
        } else {
            let elem = scalar.element_size().unwrap_or(2) as i32;
            let size = elem * dims.iter().map(|&d| d as i32 + 1).product::<i32>();
            (scalar.array(), 0, Some(element_count(dims, line)?), size)
        };

        let offset = match class {
            StorageClass::Global => self.alloc_global(size, line)?,
            StorageClass::External => self.alloc_local(EXTERNAL_SLOT_SIZE as i32, line)?,
            _ => self.alloc_local(size, line)?,
        };
        let tracked = class != StorageClass::External;
        let max_len = (tracked && ty.scalar() == VarType::Str).then_some(max_len);
        let elements = elements.filter(|_| tracked);
        if let Some(max_len) = max_len {
            self.string_fixups.push(StringFixup {
                address: offset,
                max_len,
            });
        }
        if let Some(count) = elements {
            self.array_fixups.push(ArrayFixup {
                address: offset,
                count,
            });
        }
        self.insert(
            ident,
            Symbol {
                name,
                ty,
                class,
                offset,
                max_len,
                elements,
            },
        )
    }

    fn insert(&mut self, ident: &Token, symbol: Symbol) -> Result<(), CompileError> {
        let key = ident.upper();
        if self.index.contains_key(&key) {
            return Err(CompileError::DuplicateSymbol {
                line: ident.line,
                name: ident.text.clone(),
            });
        }
        self.index.insert(key, self.symbols.len());
        self.symbols.push(symbol);
        Ok(())
    }

    fn alloc_local(&mut self, size: i32, line: usize) -> Result<i16, CompileError> {
        self.next_local -= size;
        if self.next_local < LOCAL_FRAME_LIMIT {
            return Err(CompileError::FrameTooLarge {
                line,
                needed: (LOCAL_FRAME_BASE as i32 - self.next_local) as usize,
            });
        }
        Ok(self.next_local as i16)
    }

    fn alloc_global(&mut self, size: i32, line: usize) -> Result<i16, CompileError> {
        self.next_global -= size;
        if self.next_global < GLOBAL_FRAME_LIMIT {
            return Err(CompileError::FrameTooLarge {
                line,
                needed: (GLOBAL_FRAME_BASE as i32 - self.next_global) as usize,
            });
        }
        Ok(self.next_global as i16)
    }

    /// Look up a variable by its spelling, including any type suffix.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.index
            .get(&name.to_ascii_uppercase())
            .map(|&i| &self.symbols[i])
    }

    /// Materialize an undeclared identifier as an external, taking its indirection slot now.
    pub fn implicit_external(
        &mut self,
        ident: &Token,
        array: bool,
    ) -> Result<&Symbol, CompileError> {
        let scalar = VarType::from_name(&ident.text);
        let ty = if array { scalar.array() } else { scalar };
        let offset = self.alloc_local(EXTERNAL_SLOT_SIZE as i32, ident.line)?;
        debug!(name = %ident.upper(), ?ty, offset, "implicit external");
        self.insert(
            ident,
            Symbol {
                name: strip_suffix(&ident.upper()).to_string(),
                ty,
                class: StorageClass::External,
                offset,
                max_len: None,
                elements: None,
            },
        )?;
        Ok(&self.symbols[self.symbols.len() - 1])
    }

    pub fn proc_name(&self) -> Option<&str> {
        self.proc_name.as_deref()
    }

    /// Type returned by the procedure: from the suffix of its name, float without a header.
    pub fn return_type(&self) -> VarType {
        self.proc_name
            .as_deref()
            .map(VarType::from_name)
            .unwrap_or(VarType::Float)
    }

    pub fn params(&self) -> &[VarType] {
        &self.params
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn into_symbols(self) -> Vec<Symbol> {
        self.symbols
    }

    pub fn var_space_size(&self) -> u16 {
        let locals = LOCAL_FRAME_BASE as i32 - self.next_local;
        let globals = GLOBAL_FRAME_BASE as i32 - self.next_global;
        (locals + globals) as u16
    }

    /// Header describing this table. `code_size` is filled in when the header is encoded.
    pub fn header(&self, target: Target) -> QcodeHeader {
        let of_class = |class| self.symbols.iter().filter(move |s| s.class == class);
        QcodeHeader {
            var_space_size: self.var_space_size(),
            code_size: 0,
            param_types: self.params.clone(),
            globals: of_class(StorageClass::Global)
                .map(|s| GlobalEntry {
                    name: s.name.clone(),
                    ty: s.ty,
                    offset: s.offset,
                })
                .collect(),
            externals: of_class(StorageClass::External)
                .map(|s| ExternalEntry::Named {
                    name: s.name.clone(),
                    ty: s.ty,
                })
                .collect(),
            string_fixups: self.string_fixups.clone(),
            array_fixups: self.array_fixups.clone(),
            target,
        }
    }
}

fn declaration_class(t: &Token) -> Option<StorageClass> {
    if t.kind != TokenKind::Keyword {
        return None;
    }
    match t.upper().as_str() {
        "GLOBAL" => Some(StorageClass::Global),
        "LOCAL" => Some(StorageClass::Local),
        "EXTERNAL" => Some(StorageClass::External),
        _ => None,
    }
}

fn scalar_size(ty: VarType, max_len: u8) -> i32 {
    match ty.element_size() {
        Some(n) => n as i32,
        None => max_len as i32 + 1,
    }
}

fn dimension(t: &Token) -> Result<u16, CompileError> {
    if t.kind != TokenKind::Integer {
        return Err(unexpected(t, "an integer dimension"));
    }
    parse_integer(&t.text)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| unexpected(t, "an integer dimension"))
}

fn string_length(len: u16, line: usize) -> Result<u8, CompileError> {
    u8::try_from(len).map_err(|_| CompileError::InvalidImmediateArgument {
        line,
        keyword: "string length",
        found: len.to_string(),
    })
}

fn element_count(dims: &[u16], line: usize) -> Result<u16, CompileError> {
    let count = dims.iter().map(|&d| d as u32).product::<u32>();
    u16::try_from(count).map_err(|_| CompileError::FrameTooLarge {
        line,
        needed: count as usize,
    })
}

/// Value of a decimal or `$`-prefixed hexadecimal integer literal.
pub fn parse_integer(text: &str) -> Option<i64> {
    match text.strip_prefix('$') {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;
    use pretty_assertions::assert_eq;

    fn table(src: &str) -> SymbolTable {
        SymbolTable::allocate(&tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn params_are_highest_locals() {
        let t = table("PROC P:(A%,B)\nLOCAL C%\nENDP");
        assert_eq!(t.params(), &[VarType::Int, VarType::Float]);
        assert_eq!(t.lookup("A%").unwrap().offset, -2);
        assert_eq!(t.lookup("B").unwrap().offset, -10);
        assert_eq!(t.lookup("c%").unwrap().offset, -12);
        assert_eq!(t.lookup("C%").unwrap().class, StorageClass::Local);
        assert_eq!(t.var_space_size(), 12);
    }

    #[test]
    fn globals_allocate_from_their_own_base() {
        let t = table("GLOBAL G%,H\nLOCAL L%");
        assert_eq!(t.lookup("G%").unwrap().offset, GLOBAL_FRAME_BASE - 2);
        assert_eq!(t.lookup("H").unwrap().offset, GLOBAL_FRAME_BASE - 10);
        assert_eq!(t.lookup("L%").unwrap().offset, -2);
        let header = t.header(Target::Base);
        assert_eq!(header.globals.len(), 2);
        assert_eq!(header.globals[0].name, "G");
        assert_eq!(header.var_space_size, 12);
    }

    #[test]
    fn array_sizes_and_fixup_counts_differ_by_one() {
        let t = table("LOCAL A%(10),B(2,3),S$(4,20)");
        let a = t.lookup("A%").unwrap();
        assert_eq!(a.ty, VarType::IntArray);
        assert_eq!(a.offset, -22);
        assert_eq!(a.elements, Some(10));
        let b = t.lookup("B").unwrap();
        assert_eq!(b.offset, -22 - 8 * 3 * 4);
        assert_eq!(b.elements, Some(6));
        let s = t.lookup("S$").unwrap();
        assert_eq!(s.ty, VarType::StrArray);
        assert_eq!(s.offset, b.offset - 21 * 5);
        assert_eq!(s.max_len, Some(20));
        assert_eq!(s.elements, Some(4));

        let header = t.header(Target::Base);
        assert_eq!(
            header.array_fixups,
            vec![
                ArrayFixup { address: -22, count: 10 },
                ArrayFixup { address: b.offset, count: 6 },
                ArrayFixup { address: s.offset, count: 4 },
            ]
        );
        assert_eq!(
            header.string_fixups,
            vec![StringFixup { address: s.offset, max_len: 20 }]
        );
    }

    #[test]
    fn string_scalars_default_length() {
        let t = table("LOCAL A$,B$(10)");
        assert_eq!(t.lookup("A$").unwrap().offset, -256);
        assert_eq!(t.lookup("B$").unwrap().offset, -256 - 11);
        assert_eq!(t.lookup("B$").unwrap().max_len, Some(10));
    }

    #[test]
    fn externals_take_a_slot() {
        let mut t = table("EXTERNAL X%\nLOCAL A");
        assert_eq!(t.lookup("X%").unwrap().offset, -2);
        assert_eq!(t.lookup("A").unwrap().offset, -10);
        let tokens = tokenize("Y$").unwrap();
        let y = t.implicit_external(&tokens[0], false).unwrap();
        assert_eq!(y.offset, -12);
        assert_eq!(y.ty, VarType::Str);
        let header = t.header(Target::Base);
        assert_eq!(
            header.externals,
            vec![
                ExternalEntry::Named { name: "X".into(), ty: VarType::Int },
                ExternalEntry::Named { name: "Y".into(), ty: VarType::Str },
            ]
        );
    }

    #[test]
    fn duplicate_declaration() {
        let err = SymbolTable::allocate(&tokenize("LOCAL A%\nGLOBAL a%").unwrap()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                line: 2,
                name: "a%".into()
            }
        );
    }

    #[test]
    fn return_type_follows_proc_suffix() {
        assert_eq!(table("PROC F$:\nENDP").return_type(), VarType::Str);
        assert_eq!(table("PROC F%:\nENDP").return_type(), VarType::Int);
        assert_eq!(table("A=1").return_type(), VarType::Float);
    }
}
