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

//! Registry of built-in functions and argument-taking commands, drawn from the opcode table.

use lazy_static::lazy_static;
use std::collections::HashMap;

use qcode::opcode::{Arity, OpcodeInfo, OperandSpec, opcodes};
use qcode::{OpClass, Opcode, VarType};

lazy_static! {
    pub static ref BUILTINS: Vec<Builtin> = mk_builtin_table();
    pub static ref COMMANDS: Vec<Builtin> = mk_command_table();
    static ref BUILTIN_INDEX: HashMap<&'static str, usize> = BUILTINS
        .iter()
        .enumerate()
        .map(|(i, b)| (b.name, i))
        .collect();
    static ref COMMAND_INDEX: HashMap<&'static str, usize> = COMMANDS
        .iter()
        .enumerate()
        .map(|(i, b)| (b.name, i))
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgCount {
    /// Exactly these argument types.
    Q(&'static [VarType]),
    /// One or more arguments of a single type; the count is encoded after the opcode.
    List(VarType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub opcode: Opcode,
    pub args: ArgCount,
    /// `None` for commands.
    pub result: Option<VarType>,
    /// Only available on the extended instruction set.
    pub extended: bool,
}

impl Builtin {
    fn from_info(info: &'static OpcodeInfo, result: Option<VarType>) -> Self {
        let args = match info.pops {
            Arity::FromOperand => {
                ArgCount::List(info.args.first().copied().unwrap_or(VarType::Float))
            }
            Arity::Fixed(_) => ArgCount::Q(info.args),
        };
        Builtin {
            name: info.mnemonic,
            opcode: Opcode(info.code),
            args,
            result,
            extended: info.extended,
        }
    }
}

fn mk_builtin_table() -> Vec<Builtin> {
    opcodes()
        .filter_map(|info| match info.class {
            OpClass::Function(result) => Some(Builtin::from_info(info, Some(result))),
            _ => None,
        })
        .collect()
}

/// Commands whose arguments are all ordinary expressions. CURSOR, ESCAPE, USE, OPEN and CREATE
/// carry immediates and are compiled separately.
fn mk_command_table() -> Vec<Builtin> {
    opcodes()
        .filter(|info| info.class == OpClass::Command && info.operands == OperandSpec::None)
        .map(|info| Builtin::from_info(info, None))
        .collect()
}

pub fn find_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTIN_INDEX
        .get(name.to_ascii_uppercase().as_str())
        .map(|&i| &BUILTINS[i])
}

pub fn find_command(name: &str) -> Option<&'static Builtin> {
    COMMAND_INDEX
        .get(name.to_ascii_uppercase().as_str())
        .map(|&i| &COMMANDS[i])
}
