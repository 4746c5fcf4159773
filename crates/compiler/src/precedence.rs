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

/// Shared operator precedence for parsing and unparsing.
/// Higher numbers = higher precedence (more tightly binding)
use qcode::Operator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    Or = 1,             // OR (lowest precedence)
    And = 2,            // AND
    Comparison = 3,     // = < > <= >= <>
    Additive = 4,       // + -
    Multiplicative = 5, // * /
    Power = 6,          // ** (right associative)
    Unary = 7,          // - NOT (prefix operators)
    Primary = 8,        // literals, variables, function and procedure calls
}

impl Precedence {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Get the precedence for an operator
pub fn operator_precedence(op: Operator) -> Precedence {
    match op {
        Operator::Or => Precedence::Or,
        Operator::And => Precedence::And,
        Operator::Lt
        | Operator::Le
        | Operator::Gt
        | Operator::Ge
        | Operator::Ne
        | Operator::Eq => Precedence::Comparison,
        Operator::Add | Operator::Sub => Precedence::Additive,
        Operator::Mul | Operator::Div => Precedence::Multiplicative,
        Operator::Pow => Precedence::Power,
        Operator::Neg | Operator::Not => Precedence::Unary,
    }
}

pub fn is_right_associative(op: Operator) -> bool {
    op == Operator::Pow
}

/// The binary operator spelled `text`, if any.
pub fn binary_operator(text: &str) -> Option<Operator> {
    Some(match text.to_ascii_uppercase().as_str() {
        "OR" => Operator::Or,
        "AND" => Operator::And,
        "<" => Operator::Lt,
        "<=" => Operator::Le,
        ">" => Operator::Gt,
        ">=" => Operator::Ge,
        "<>" => Operator::Ne,
        "=" => Operator::Eq,
        "+" => Operator::Add,
        "-" => Operator::Sub,
        "*" => Operator::Mul,
        "/" => Operator::Div,
        "**" => Operator::Pow,
        _ => return None,
    })
}
