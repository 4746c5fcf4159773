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

//! Compiler and decompiler between OPL procedure source and QCode.

mod builtins;
mod codegen;
mod decompile;
mod errors;
mod options;
mod precedence;
mod resolver;
mod structure;
mod symbols;
mod tokenizer;


pub use crate::builtins::{ArgCount, BUILTINS, Builtin, COMMANDS, find_builtin, find_command};
pub use crate::codegen::{CompiledUnit, compile, compile_unit};
pub use crate::decompile::{decompile, decompile_with, disassemble};
pub use crate::errors::{CompileError, CompileWarning};
pub use crate::options::{CompileOptions, DecompileOptions};
pub use crate::precedence::Precedence;
pub use crate::resolver::{VarMap, Variable, resolve};
pub use crate::structure::{Arm, Node, Structure, recover, split_statements};
pub use crate::symbols::{Symbol, SymbolTable};
pub use crate::tokenizer::{Token, TokenKind, tokenize};
