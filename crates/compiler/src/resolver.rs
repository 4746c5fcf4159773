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

//! Maps the frame addresses used by a procedure's code back to names and types.
//!
//! The header only records offsets for globals; parameters, locals and externals have to be
//! inferred from how the code touches each address. Matching runs in phases (parameters, declared
//! globals, declared externals, then synthesized locals), and each phase picks from a ranked list
//! of candidates. When several candidates of the same rank exist the highest address wins, so the
//! outcome is deterministic but can still pair a declared name with the wrong slot when same-typed
//! variables are left unreferenced.

use std::collections::{BTreeMap, BTreeSet};

use qcode::{
    ExternalEntry, GLOBAL_FRAME_BASE, Instruction, LOCAL_FRAME_BASE, OpClass, QcodeHeader,
    StorageClass, VarType,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Display name including the type suffix.
    pub name: String,
    pub ty: VarType,
    pub class: StorageClass,
    pub max_len: Option<u8>,
    pub elements: Option<u16>,
}

/// Resolved variables keyed by frame address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarMap {
    entries: BTreeMap<i16, Variable>,
}

impl VarMap {
    pub fn get(&self, address: i16) -> Option<&Variable> {
        self.entries.get(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from the highest address down.
    pub fn iter(&self) -> impl Iterator<Item = (i16, &Variable)> {
        self.entries.iter().rev().map(|(a, v)| (*a, v))
    }

    pub fn of_class(&self, class: StorageClass) -> impl Iterator<Item = (i16, &Variable)> {
        self.iter().filter(move |(_, v)| v.class == class)
    }
}

/// Order in which accumulated access kinds decide an address's type.
const TYPE_PRIORITY: [VarType; 6] = [
    VarType::Int,
    VarType::IntArray,
    VarType::StrArray,
    VarType::FloatArray,
    VarType::Str,
    VarType::Float,
];

#[derive(Debug, Clone, Copy, Default)]
struct Access {
    /// Bit per `VarType` wire code.
    types: u8,
    external: bool,
}

impl Access {
    fn ty(self) -> VarType {
        TYPE_PRIORITY
            .into_iter()
            .find(|t| self.types & (1 << t.as_byte()) != 0)
            .unwrap_or(VarType::Float)
    }
}

fn in_global_region(address: i16) -> bool {
    address < GLOBAL_FRAME_BASE
}

struct Resolver<'a> {
    header: &'a QcodeHeader,
    accesses: BTreeMap<i16, Access>,
    claimed: BTreeSet<i16>,
    map: VarMap,
}

pub fn resolve(header: &QcodeHeader, instructions: &[Instruction]) -> VarMap {
    let mut accesses: BTreeMap<i16, Access> = BTreeMap::new();
    for insn in instructions {
        let (ty, external) = match insn.info().map(|i| i.class) {
            Some(OpClass::PushValue { ty, external } | OpClass::PushAddress { ty, external }) => {
                (ty, external)
            }
            _ => continue,
        };
        let Some(address) = insn.address() else {
            continue;
        };
        let access = accesses.entry(address).or_default();
        access.types |= 1 << ty.as_byte();
        access.external |= external;
    }

    let mut resolver = Resolver {
        header,
        accesses,
        claimed: BTreeSet::new(),
        map: VarMap::default(),
    };
    resolver.parameters();
    resolver.globals();
    resolver.externals();
    resolver.locals();
    resolver.sizes();
    debug!(
        accessed = resolver.accesses.len(),
        resolved = resolver.map.len(),
        "variable resolution complete"
    );
    resolver.map
}

impl Resolver<'_> {
    fn unclaimed(&self) -> impl Iterator<Item = (i16, Access)> + '_ {
        self.accesses
            .iter()
            .rev()
            .filter(|(a, _)| !self.claimed.contains(a))
            .map(|(a, acc)| (*a, *acc))
    }

    fn claim(&mut self, address: i16, name: String, ty: VarType, class: StorageClass) {
        self.claimed.insert(address);
        self.map.entries.insert(
            address,
            Variable {
                name,
                ty,
                class,
                max_len: None,
                elements: None,
            },
        );
    }

    /// The highest parameter-count accessed addresses in the local region become the parameters.
    fn parameters(&mut self) {
        let candidates: Vec<i16> = self
            .unclaimed()
            .filter(|(a, acc)| !acc.external && !in_global_region(*a))
            .map(|(a, _)| a)
            .take(self.header.param_types.len())
            .collect();
        for (i, (address, ty)) in candidates
            .into_iter()
            .zip(self.header.param_types.iter().copied())
            .enumerate()
        {
            self.claim(
                address,
                format!("P{}{}", i + 1, ty.suffix()),
                ty,
                StorageClass::Parameter,
            );
        }
    }

    /// Rank 1: a same-typed address reached through external opcodes. Rank 2: a same-typed
    /// address in the global region.
    fn ranked_candidate(&self, ty: VarType) -> Option<i16> {
        self.unclaimed()
            .find(|(_, acc)| acc.external && acc.ty() == ty)
            .or_else(|| {
                self.unclaimed()
                    .find(|(a, acc)| in_global_region(*a) && acc.ty() == ty)
            })
            .map(|(a, _)| a)
    }

    fn globals(&mut self) {
        let header = self.header;
        for g in &header.globals {
            let name = format!("{}{}", g.name, g.ty.suffix());
            if self.accesses.contains_key(&g.offset) && !self.claimed.contains(&g.offset) {
                self.claim(g.offset, name, g.ty, StorageClass::Global);
                continue;
            }
            if in_global_region(g.offset) {
                // Recorded in the frame but never touched by the code.
                continue;
            }
            if let Some(address) = self.ranked_candidate(g.ty) {
                self.claim(address, name, g.ty, StorageClass::Global);
            }
        }
    }

    fn externals(&mut self) {
        let header = self.header;
        for e in &header.externals {
            match e {
                ExternalEntry::Addressed { address, ty } => {
                    if self.accesses.contains_key(address) && !self.claimed.contains(address) {
                        let name = format!("X{}{}", -(*address as i32), ty.suffix());
                        self.claim(*address, name, *ty, StorageClass::External);
                    }
                }
                ExternalEntry::Named { name, ty } => {
                    if let Some(address) = self.ranked_candidate(*ty) {
                        let name = format!("{name}{}", ty.suffix());
                        self.claim(address, name, *ty, StorageClass::External);
                    }
                }
            }
        }
    }

    fn locals(&mut self) {
        let remaining: Vec<(i16, Access)> = self.unclaimed().collect();
        for (n, (address, access)) in remaining.into_iter().enumerate() {
            let ty = access.ty();
            let class = if access.external {
                StorageClass::External
            } else {
                StorageClass::Local
            };
            self.claim(address, format!("L{}{}", n + 1, ty.suffix()), ty, class);
        }
    }

    /// String lengths and array counts: from the fixup tables when they cover an address,
    /// otherwise inferred from the gap to the next higher resolved address.
    fn sizes(&mut self) {
        let addresses: Vec<i16> = self.map.entries.keys().copied().collect();
        for (i, &address) in addresses.iter().enumerate() {
            let region_top = if in_global_region(address) {
                GLOBAL_FRAME_BASE
            } else {
                LOCAL_FRAME_BASE
            };
            let next = addresses
                .get(i + 1)
                .copied()
                .filter(|n| in_global_region(*n) == in_global_region(address))
                .unwrap_or(region_top);
            let gap = (next as i32 - address as i32).max(1);

            let string_fixup = self
                .header
                .string_fixups
                .iter()
                .find(|f| f.address == address)
                .map(|f| f.max_len);
            let array_fixup = self
                .header
                .array_fixups
                .iter()
                .find(|f| f.address == address)
                .map(|f| f.count);
            let Some(var) = self.map.entries.get_mut(&address) else {
                continue;
            };
            if matches!(var.class, StorageClass::External | StorageClass::Parameter) {
                continue;
            }
            let max_len = if var.ty.scalar() == VarType::Str {
                Some(string_fixup.unwrap_or_else(|| {
                    if var.ty.is_array() {
                        qcode::DEFAULT_STRING_LENGTH
                    } else {
                        (gap - 1).clamp(1, 255) as u8
                    }
                }))
            } else {
                None
            };
            let elements = if var.ty.is_array() {
                Some(array_fixup.unwrap_or_else(|| {
                    let elem = match var.ty.element_size() {
                        Some(n) => n as i32,
                        None => max_len.map(|m| m as i32 + 1).unwrap_or(256),
                    };
                    (gap / elem - 1).clamp(1, u16::MAX as i32) as u16
                }))
            } else {
                None
            };
            var.max_len = max_len;
            var.elements = elements;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, compile_unit};
    use pretty_assertions::assert_eq;
    use qcode::{QcodeHeader, decode_all};

    fn resolve_source(src: &str) -> VarMap {
        let unit = compile_unit(src, &CompileOptions::default()).unwrap();
        let (header, code_offset) = QcodeHeader::decode(&unit.bytes).unwrap();
        let (insns, err) = decode_all(&unit.bytes[code_offset..]);
        assert!(err.is_none());
        resolve(&header, &insns)
    }

    #[test]
    fn only_referenced_globals_get_entries() {
        let map = resolve_source("PROC G:\nGLOBAL A%,B,C$,D%\nA%=1\nC$=\"X\"\nENDP");
        let globals: Vec<_> = map
            .of_class(StorageClass::Global)
            .map(|(_, v)| v.name.clone())
            .collect();
        assert_eq!(globals, vec!["A%".to_string(), "C$".to_string()]);
        assert_eq!(map.len(), 2);
        let (_, c) = map.of_class(StorageClass::Global).nth(1).unwrap();
        assert_eq!(c.max_len, Some(255));
    }

    #[test]
    fn parameters_take_the_highest_addresses() {
        let map = resolve_source("PROC F:(A%,B$)\nLOCAL C\nC=A%\nPRINT B$\nENDP");
        let params: Vec<_> = map
            .of_class(StorageClass::Parameter)
            .map(|(a, v)| (a, v.name.clone(), v.ty))
            .collect();
        assert_eq!(
            params,
            vec![
                (-2, "P1%".to_string(), VarType::Int),
                (-258, "P2$".to_string(), VarType::Str),
            ]
        );
        let (_, local) = map.of_class(StorageClass::Local).next().unwrap();
        assert_eq!(local.name, "L1");
        assert_eq!(local.ty, VarType::Float);
    }

    #[test]
    fn named_externals_match_external_accesses() {
        let map = resolve_source("PROC E:\nEXTERNAL X%\nLOCAL S$(12)\nS$=\"A\"\nX%=Y%\nENDP");
        let externals: Vec<_> = map
            .of_class(StorageClass::External)
            .map(|(_, v)| v.name.clone())
            .collect();
        assert_eq!(externals, vec!["X%".to_string(), "Y%".to_string()]);
        let (_, s) = map.of_class(StorageClass::Local).next().unwrap();
        assert_eq!(s.ty, VarType::Str);
        assert_eq!(s.max_len, Some(12));
    }

    #[test]
    fn array_counts_come_from_fixups() {
        let map = resolve_source("PROC A:\nLOCAL N%(10),F(3)\nN%(2)=1\nF(1)=2\nENDP");
        let locals: Vec<_> = map
            .of_class(StorageClass::Local)
            .map(|(_, v)| (v.ty, v.elements))
            .collect();
        assert_eq!(
            locals,
            vec![(VarType::IntArray, Some(10)), (VarType::FloatArray, Some(3))]
        );
    }

    #[test]
    fn addressed_external_matches_exactly() {
        use qcode::{Instruction, Opcode, Operands};
        let header = QcodeHeader {
            externals: vec![ExternalEntry::Addressed {
                address: -6,
                ty: VarType::Int,
            }],
            ..Default::default()
        };
        let insns = vec![Instruction {
            pc: 0,
            opcode: Opcode::push_value(VarType::Int, true),
            operands: Operands::Word((-6i16) as u16),
            len: 3,
        }];
        let map = resolve(&header, &insns);
        assert_eq!(map.get(-6).unwrap().class, StorageClass::External);
        assert_eq!(map.get(-6).unwrap().name, "X6%");
    }

    #[test]
    fn string_length_inferred_from_gap() {
        use qcode::{Instruction, Opcode, Operands};
        let insns: Vec<Instruction> = [(-2i16, VarType::Int), (-23, VarType::Str)]
            .into_iter()
            .map(|(a, ty)| Instruction {
                pc: 0,
                opcode: Opcode::push_value(ty, false),
                operands: Operands::Word(a as u16),
                len: 3,
            })
            .collect();
        let map = resolve(&QcodeHeader::default(), &insns);
        assert_eq!(map.get(-23).unwrap().max_len, Some(20));
    }
}
