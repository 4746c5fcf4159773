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

use qcode::HeaderError;
use thiserror::Error;

/// Fatal compilation errors. Compilation never partially succeeds past one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },
    #[error("line {line}: {block} block is never closed")]
    UnterminatedBlock { line: usize, block: &'static str },
    #[error("line {line}: {found} does not close the innermost open block")]
    MismatchedBlock { line: usize, found: String },
    #[error("line {line}: {keyword} outside of a loop")]
    ControlOutsideLoop { line: usize, keyword: &'static str },
    #[error("line {line}: {name} requires the extended instruction set")]
    TargetIncompatible { line: usize, name: String },
    #[error("line {line}: invalid argument {found:?} for {keyword}")]
    InvalidImmediateArgument {
        line: usize,
        keyword: &'static str,
        found: String,
    },
    #[error("line {line}: unexpected {found:?}, expected {expected}")]
    UnexpectedToken {
        line: usize,
        found: String,
        expected: &'static str,
    },
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("line {line}: type mismatch for {context}")]
    TypeMismatch { line: usize, context: String },
    #[error("line {line}: {name} is declared twice")]
    DuplicateSymbol { line: usize, name: String },
    #[error("line {line}: blocks nested too deeply")]
    NestingTooDeep { line: usize },
    #[error("procedure code is too large ({size} bytes)")]
    CodeTooLarge { size: usize },
    #[error("line {line}: variables need {needed} bytes of frame space")]
    FrameTooLarge { line: usize, needed: usize },
    #[error("procedure header cannot hold it: {0}")]
    HeaderOverflow(#[source] HeaderError),
}

/// Diagnostics that do not stop compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileWarning {
    #[error("line {line}: label {label} is never defined")]
    UndefinedLabel { line: usize, label: String },
    #[error("line {line}: unsupported implicit widening in {context}")]
    UnsupportedWidening { line: usize, context: String },
}
