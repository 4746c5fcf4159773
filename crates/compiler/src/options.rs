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

use qcode::Target;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Instruction set to compile for. Extended-only functions and commands are rejected for
    /// the base target.
    pub target: Target,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompileOptions {
    /// Spaces per nesting level in reconstructed source.
    pub indent: usize,
    /// Whether to emit GLOBAL / LOCAL / EXTERNAL lines for the resolved variables.
    pub emit_declarations: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            indent: 2,
            emit_declarations: true,
        }
    }
}
