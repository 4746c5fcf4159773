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

/// Takes the token stream and turns it into QCode.
use std::collections::HashMap;
use tracing::{debug, warn};

use qcode::opcode::FIELD_LIST_END;
use qcode::{
    HeaderError, Opcode, Operator, PrintChannel, QcodeHeader, StorageClass, Target, VarType,
    encode_float_text,
};

use crate::builtins::{ArgCount, Builtin, find_builtin, find_command};
use crate::errors::{CompileError, CompileWarning};
use crate::options::CompileOptions;
use crate::precedence::{Precedence, binary_operator, is_right_associative, operator_precedence};
use crate::symbols::{Symbol, SymbolTable, parse_integer};
use crate::tokenizer::{Token, TokenCursor, TokenKind, tokenize, unexpected};

/// Maximum number of simultaneously open blocks, and of pending branch fixups.
pub const MAX_NESTING: usize = 64;

/// A pending forward branch, identified by the offset of its 2-byte displacement placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixup {
    /// Conditional branch out of an IF or ELSEIF arm.
    IfExit(usize),
    /// Jump over the ELSE arm.
    ElseExit(usize),
    /// Conditional branch out of a WHILE loop.
    WhileExit(usize),
    /// Jump from the end of an arm to ENDIF, patched when the chain closes.
    EndifMerge(usize),
}

enum Loop {
    While {
        start: usize,
        breaks: Vec<usize>,
    },
    Do {
        start: usize,
        breaks: Vec<usize>,
        continues: Vec<usize>,
    },
}

struct LabelRef {
    name: String,
    placeholder: usize,
    line: usize,
}

/// The result of compiling one procedure.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub bytes: Vec<u8>,
    pub header: QcodeHeader,
    pub symbols: Vec<Symbol>,
    pub warnings: Vec<CompileWarning>,
}

/// A compiled sub-expression: its static type, where its code starts, and its value when it is
/// a bare integer literal (so it can be re-emitted in float form).
#[derive(Debug, Clone, Copy)]
struct Operand {
    ty: VarType,
    start: usize,
    int_literal: Option<i16>,
}

// Compiler code generation state.
pub struct CodegenState<'a> {
    cursor: TokenCursor<'a>,
    symbols: SymbolTable,
    options: CompileOptions,
    code: Vec<u8>,
    fixups: Vec<Fixup>,
    loops: Vec<Loop>,
    /// Open IF / WHILE / DO blocks with the line that opened them.
    blocks: Vec<(&'static str, usize)>,
    labels: HashMap<String, usize>,
    label_refs: Vec<LabelRef>,
    warnings: Vec<CompileWarning>,
}

impl<'a> CodegenState<'a> {
    pub fn new(tokens: &'a [Token], symbols: SymbolTable, options: CompileOptions) -> Self {
        Self {
            cursor: TokenCursor::new(tokens),
            symbols,
            options,
            code: vec![],
            fixups: vec![],
            loops: vec![],
            blocks: vec![],
            labels: HashMap::new(),
            label_refs: vec![],
            warnings: vec![],
        }
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn emit_op(&mut self, op: Opcode) {
        self.code.push(op.0);
    }

    fn emit_word(&mut self, w: i16) {
        self.code.extend_from_slice(&w.to_be_bytes());
    }

    fn emit_str(&mut self, s: &str, line: usize) -> Result<(), CompileError> {
        let bytes: Vec<u8> = s.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect();
        let len = u8::try_from(bytes.len()).map_err(|_| CompileError::InvalidImmediateArgument {
            line,
            keyword: "string literal",
            found: s.to_string(),
        })?;
        self.code.push(len);
        self.code.extend_from_slice(&bytes);
        Ok(())
    }

    /// Emit a branch opcode with a zero displacement, returning the placeholder's offset.
    fn emit_branch(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        let placeholder = self.here();
        self.emit_word(0);
        placeholder
    }

    fn emit_branch_to(&mut self, op: Opcode, target: usize) -> Result<(), CompileError> {
        let placeholder = self.emit_branch(op);
        self.patch(placeholder, target)
    }

    /// Store `target - (placeholder + 2)` in the placeholder.
    fn patch(&mut self, placeholder: usize, target: usize) -> Result<(), CompileError> {
        let displacement = target as i64 - (placeholder as i64 + 2);
        let displacement = i16::try_from(displacement).map_err(|_| CompileError::CodeTooLarge {
            size: self.code.len(),
        })?;
        self.code[placeholder..placeholder + 2].copy_from_slice(&displacement.to_be_bytes());
        Ok(())
    }

    fn push_fixup(&mut self, fixup: Fixup) -> Result<(), CompileError> {
        if self.fixups.len() >= MAX_NESTING {
            return Err(CompileError::NestingTooDeep {
                line: self.cursor.line(),
            });
        }
        self.fixups.push(fixup);
        Ok(())
    }

    fn open_block(&mut self, name: &'static str, line: usize) -> Result<(), CompileError> {
        if self.blocks.len() >= MAX_NESTING {
            return Err(CompileError::NestingTooDeep { line });
        }
        self.blocks.push((name, line));
        Ok(())
    }

    fn expect_block(&self, name: &'static str, t: &Token) -> Result<(), CompileError> {
        match self.blocks.last() {
            Some((open, _)) if *open == name => Ok(()),
            _ => Err(CompileError::MismatchedBlock {
                line: t.line,
                found: t.upper(),
            }),
        }
    }

    fn warn(&mut self, warning: CompileWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn generate(&mut self) -> Result<(), CompileError> {
        while let Some(t) = self.cursor.peek() {
            if t.is_eol() {
                self.cursor.next();
                continue;
            }
            if t.is_keyword("ENDP") {
                self.cursor.next();
                self.cursor.expect_eol()?;
                break;
            }
            self.statement()?;
        }
        if let Some((block, line)) = self.blocks.last() {
            return Err(CompileError::UnterminatedBlock {
                line: *line,
                block: *block,
            });
        }
        debug_assert!(self.fixups.is_empty());

        let ret = self.symbols.return_type();
        self.emit_op(Opcode::return_default(ret));
        self.resolve_labels()?;
        if self.code.len() > u16::MAX as usize {
            return Err(CompileError::CodeTooLarge {
                size: self.code.len(),
            });
        }
        Ok(())
    }

    fn resolve_labels(&mut self) -> Result<(), CompileError> {
        for r in std::mem::take(&mut self.label_refs) {
            match self.labels.get(&r.name) {
                Some(&target) => self.patch(r.placeholder, target)?,
                None => self.warn(CompileWarning::UndefinedLabel {
                    line: r.line,
                    label: r.name,
                }),
            }
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let Some(t) = self.cursor.peek() else {
            return Ok(());
        };
        match t.kind {
            TokenKind::Keyword => self.keyword_statement(t)?,
            TokenKind::Identifier => self.identifier_statement(t)?,
            _ => return Err(unexpected(t, "a statement")),
        }
        self.cursor.expect_eol()
    }

    fn keyword_statement(&mut self, t: &'a Token) -> Result<(), CompileError> {
        let kw = t.upper();
        match kw.as_str() {
            "PROC" | "GLOBAL" | "LOCAL" | "EXTERNAL" => {
                // Handled by the declaration pass.
                while !self.cursor.at_eol() {
                    self.cursor.next();
                }
            }
            "IF" => {
                self.cursor.next();
                self.condition()?;
                let exit = self.emit_branch(Opcode::BRANCH_IF_FALSE);
                self.push_fixup(Fixup::IfExit(exit))?;
                self.open_block("IF", t.line)?;
            }
            "ELSEIF" => {
                self.cursor.next();
                self.expect_block("IF", t)?;
                let merge = self.emit_branch(Opcode::GOTO);
                let Some(Fixup::IfExit(exit)) = self.fixups.pop() else {
                    return Err(mismatched(t));
                };
                let here = self.here();
                self.patch(exit, here)?;
                self.push_fixup(Fixup::EndifMerge(merge))?;
                self.condition()?;
                let exit = self.emit_branch(Opcode::BRANCH_IF_FALSE);
                self.push_fixup(Fixup::IfExit(exit))?;
            }
            "ELSE" => {
                self.cursor.next();
                self.expect_block("IF", t)?;
                let skip = self.emit_branch(Opcode::GOTO);
                let Some(Fixup::IfExit(exit)) = self.fixups.pop() else {
                    return Err(mismatched(t));
                };
                let here = self.here();
                self.patch(exit, here)?;
                self.push_fixup(Fixup::ElseExit(skip))?;
            }
            "ENDIF" => {
                self.cursor.next();
                self.expect_block("IF", t)?;
                let here = self.here();
                match self.fixups.pop() {
                    Some(Fixup::IfExit(p) | Fixup::ElseExit(p)) => self.patch(p, here)?,
                    _ => return Err(mismatched(t)),
                }
                while let Some(Fixup::EndifMerge(p)) = self.fixups.last().copied() {
                    self.fixups.pop();
                    self.patch(p, here)?;
                }
                self.blocks.pop();
            }
            "WHILE" => {
                self.cursor.next();
                let start = self.here();
                self.condition()?;
                let exit = self.emit_branch(Opcode::BRANCH_IF_FALSE);
                self.push_fixup(Fixup::WhileExit(exit))?;
                self.open_block("WHILE", t.line)?;
                self.loops.push(Loop::While {
                    start,
                    breaks: vec![],
                });
            }
            "ENDWH" => {
                self.cursor.next();
                self.expect_block("WHILE", t)?;
                let (Some(Loop::While { start, breaks }), Some(Fixup::WhileExit(exit))) =
                    (self.loops.pop(), self.fixups.pop())
                else {
                    return Err(mismatched(t));
                };
                self.emit_branch_to(Opcode::GOTO, start)?;
                let here = self.here();
                self.patch(exit, here)?;
                for b in breaks {
                    self.patch(b, here)?;
                }
                self.blocks.pop();
            }
            "DO" => {
                self.cursor.next();
                self.open_block("DO", t.line)?;
                self.loops.push(Loop::Do {
                    start: self.code.len(),
                    breaks: vec![],
                    continues: vec![],
                });
            }
            "UNTIL" => {
                self.cursor.next();
                self.expect_block("DO", t)?;
                let Some(Loop::Do {
                    start,
                    breaks,
                    continues,
                }) = self.loops.pop()
                else {
                    return Err(mismatched(t));
                };
                let check = self.here();
                for c in continues {
                    self.patch(c, check)?;
                }
                self.condition()?;
                self.emit_branch_to(Opcode::BRANCH_IF_FALSE, start)?;
                let here = self.here();
                for b in breaks {
                    self.patch(b, here)?;
                }
                self.blocks.pop();
            }
            "BREAK" | "CONTINUE" => {
                self.cursor.next();
                let keyword = if kw == "BREAK" { "BREAK" } else { "CONTINUE" };
                if self.loops.is_empty() {
                    return Err(CompileError::ControlOutsideLoop {
                        line: t.line,
                        keyword,
                    });
                }
                if let (false, Some(Loop::While { start, .. })) =
                    (kw == "BREAK", self.loops.last())
                {
                    let start = *start;
                    return self.emit_branch_to(Opcode::GOTO, start);
                }
                let placeholder = self.emit_branch(Opcode::GOTO);
                match (self.loops.last_mut(), kw == "BREAK") {
                    (Some(Loop::While { breaks, .. } | Loop::Do { breaks, .. }), true) => {
                        breaks.push(placeholder)
                    }
                    (Some(Loop::Do { continues, .. }), false) => continues.push(placeholder),
                    _ => {}
                }
            }
            "GOTO" => {
                self.cursor.next();
                let label = self.cursor.expect_identifier()?;
                self.cursor.eat_punct("::");
                self.jump_to_label(Opcode::GOTO, label);
            }
            "ONERR" => {
                self.cursor.next();
                if self.cursor.eat_keyword("OFF") {
                    self.emit_op(Opcode::ONERR);
                    self.emit_word(0);
                } else {
                    let label = self.cursor.expect_identifier()?;
                    self.cursor.eat_punct("::");
                    self.jump_to_label(Opcode::ONERR, label);
                }
            }
            "RETURN" => {
                self.cursor.next();
                let ret = self.symbols.return_type();
                if self.cursor.at_eol() {
                    self.emit_op(Opcode::return_default(ret));
                } else {
                    let value = self.expression()?;
                    self.coerce(value, ret, "RETURN", t.line)?;
                    self.emit_op(Opcode::RETURN);
                }
            }
            "PRINT" | "LPRINT" => {
                self.cursor.next();
                let channel = if kw == "PRINT" {
                    PrintChannel::Screen
                } else {
                    PrintChannel::Printer
                };
                self.print_list(channel)?;
            }
            "INPUT" => {
                self.cursor.next();
                let ty = self.lvalue()?;
                self.emit_op(Opcode::input(ty));
            }
            "EDIT" => {
                self.cursor.next();
                let ty = self.lvalue()?;
                if ty != VarType::Str {
                    return Err(CompileError::TypeMismatch {
                        line: t.line,
                        context: "EDIT".into(),
                    });
                }
                self.emit_op(Opcode::EDIT);
            }
            "CURSOR" | "ESCAPE" => {
                self.cursor.next();
                let (op, keyword) = if kw == "CURSOR" {
                    (Opcode::CURSOR, "CURSOR")
                } else {
                    (Opcode::ESCAPE, "ESCAPE")
                };
                let flag = match self.cursor.next() {
                    Some(a) if a.is_keyword("ON") => 1,
                    Some(a) if a.is_keyword("OFF") => 0,
                    other => return Err(invalid_immediate(t, keyword, other)),
                };
                self.emit_op(op);
                self.code.push(flag);
            }
            "USE" => {
                self.cursor.next();
                let file = self.file_letter(t, "USE")?;
                self.emit_op(Opcode::USE);
                self.code.push(file);
            }
            "OPEN" | "CREATE" => {
                self.cursor.next();
                let (op, keyword) = if kw == "OPEN" {
                    (Opcode::OPEN, "OPEN")
                } else {
                    (Opcode::CREATE, "CREATE")
                };
                self.open_file(op, keyword, t)?;
            }
            _ => match find_command(&kw) {
                Some(command) => {
                    self.cursor.next();
                    self.command(command, t)?;
                }
                None => return Err(unexpected(t, "a statement")),
            },
        }
        Ok(())
    }

    fn identifier_statement(&mut self, t: &'a Token) -> Result<(), CompileError> {
        if self.cursor.peek_nth(1).is_some_and(|n| n.is_punct("::")) {
            self.cursor.next();
            self.cursor.next();
            let name = t.upper();
            if self.labels.contains_key(&name) {
                return Err(CompileError::DuplicateSymbol {
                    line: t.line,
                    name: t.text.clone(),
                });
            }
            let here = self.here();
            self.labels.insert(name, here);
            return Ok(());
        }
        let is_call = self.cursor.peek_nth(1).is_some_and(|n| n.is_punct(":"));
        if is_call || find_builtin(&t.text).is_some() {
            // Procedure call or function evaluated for its side effect; the result is discarded.
            let value = self.expression()?;
            self.emit_op(Opcode::drop(value.ty));
            return Ok(());
        }

        let target = self.lvalue()?;
        match self.cursor.next() {
            Some(eq) if eq.is_op("=") => {}
            Some(other) => return Err(unexpected(other, "=")),
            None => return Err(CompileError::UnexpectedEnd { expected: "=" }),
        }
        let value = self.expression()?;
        self.coerce(value, target, "assignment", t.line)?;
        self.emit_op(Opcode::assign(target));
        Ok(())
    }

    fn jump_to_label(&mut self, op: Opcode, label: &Token) {
        let placeholder = self.emit_branch(op);
        self.label_refs.push(LabelRef {
            name: label.upper(),
            placeholder,
            line: label.line,
        });
    }

    fn print_list(&mut self, channel: PrintChannel) -> Result<(), CompileError> {
        loop {
            if self.cursor.at_eol() {
                self.emit_op(Opcode::print_newline(channel));
                return Ok(());
            }
            let item = self.expression()?;
            self.emit_op(Opcode::print_item(channel, item.ty));
            if self.cursor.eat_punct(";") {
                if self.cursor.at_eol() {
                    return Ok(());
                }
            } else if self.cursor.eat_punct(",") {
                self.emit_op(Opcode::print_comma(channel));
                if self.cursor.at_eol() {
                    return Ok(());
                }
            } else {
                self.emit_op(Opcode::print_newline(channel));
                return Ok(());
            }
        }
    }

    fn command(&mut self, command: &Builtin, t: &Token) -> Result<(), CompileError> {
        self.check_target(command, t)?;
        let ArgCount::Q(args) = &command.args else {
            return Err(unexpected(t, "a statement"));
        };
        for (i, ty) in args.iter().enumerate() {
            if i > 0 {
                self.cursor.expect_punct(",")?;
            }
            let value = self.expression()?;
            self.coerce(value, *ty, command.name, t.line)?;
        }
        self.emit_op(command.opcode);
        Ok(())
    }

    fn file_letter(&mut self, t: &Token, keyword: &'static str) -> Result<u8, CompileError> {
        let letter = self.cursor.next();
        match letter {
            Some(l) if l.kind == TokenKind::Identifier => match l.upper().as_str() {
                "A" => Ok(0),
                "B" => Ok(1),
                "C" => Ok(2),
                "D" => Ok(3),
                _ => Err(invalid_immediate(t, keyword, letter)),
            },
            _ => Err(invalid_immediate(t, keyword, letter)),
        }
    }

    fn open_file(
        &mut self,
        op: Opcode,
        keyword: &'static str,
        t: &Token,
    ) -> Result<(), CompileError> {
        let name = self.expression()?;
        if name.ty != VarType::Str {
            return Err(CompileError::TypeMismatch {
                line: t.line,
                context: keyword.into(),
            });
        }
        self.cursor.expect_punct(",")?;
        let file = self.file_letter(t, keyword)?;
        let mut fields = vec![];
        while self.cursor.eat_punct(",") {
            fields.push(self.cursor.expect_identifier()?);
        }
        self.emit_op(op);
        self.code.push(file);
        for field in fields {
            self.code.push(VarType::from_name(&field.text).as_byte());
            self.emit_str(&field.upper(), field.line)?;
        }
        self.code.push(FIELD_LIST_END);
        Ok(())
    }

    fn check_target(&self, builtin: &Builtin, t: &Token) -> Result<(), CompileError> {
        if builtin.extended && self.options.target == Target::Base {
            return Err(CompileError::TargetIncompatible {
                line: t.line,
                name: builtin.name.to_string(),
            });
        }
        Ok(())
    }

    /// Compile a condition, comparing float results against zero.
    fn condition(&mut self) -> Result<(), CompileError> {
        let line = self.cursor.line();
        let cond = self.expression()?;
        match cond.ty {
            VarType::Float => {
                self.emit_float_literal("0", line)?;
                if let Some(ne) = Opcode::operator(Operator::Ne, VarType::Float) {
                    self.emit_op(ne);
                }
                Ok(())
            }
            VarType::Str => Err(CompileError::TypeMismatch {
                line,
                context: "condition".into(),
            }),
            _ => Ok(()),
        }
    }

    fn expression(&mut self) -> Result<Operand, CompileError> {
        self.binary(Precedence::Or.as_u8())
    }

    /// Precedence climbing over the binary operators.
    fn binary(&mut self, min: u8) -> Result<Operand, CompileError> {
        let mut lhs = self.unary()?;
        while let Some(t) = self.cursor.peek() {
            if t.kind != TokenKind::Operator {
                break;
            }
            let Some(op) = binary_operator(&t.text) else {
                break;
            };
            let prec = operator_precedence(op).as_u8();
            if prec < min {
                break;
            }
            self.cursor.next();
            let next_min = if is_right_associative(op) { prec } else { prec + 1 };
            let rhs = self.binary(next_min)?;
            lhs = self.emit_binary(op, lhs, rhs, t.line)?;
        }
        Ok(lhs)
    }

    fn emit_binary(
        &mut self,
        op: Operator,
        lhs: Operand,
        rhs: Operand,
        line: usize,
    ) -> Result<Operand, CompileError> {
        let family = match (lhs.ty, rhs.ty) {
            (l, r) if l == r => l,
            (VarType::Float, VarType::Int) if rhs.int_literal.is_some() => {
                self.respecialize_tail(rhs, line)?;
                VarType::Float
            }
            (VarType::Int, VarType::Float) if lhs.int_literal.is_some() => {
                let value = lhs.int_literal.unwrap_or_default();
                let float = encode_float_text(&value.to_string()).map_err(|_| {
                    CompileError::TypeMismatch {
                        line,
                        context: value.to_string(),
                    }
                })?;
                let rhs_code = self.code.split_off(rhs.start);
                self.code.truncate(lhs.start);
                self.emit_op(Opcode::PUSH_FLOAT);
                self.code.extend(float);
                self.code.extend(rhs_code);
                VarType::Float
            }
            (VarType::Str, _) | (_, VarType::Str) => {
                return Err(CompileError::TypeMismatch {
                    line,
                    context: format!("operator {}", op.symbol()),
                });
            }
            (l, _) => {
                self.warn(CompileWarning::UnsupportedWidening {
                    line,
                    context: format!("operator {}", op.symbol()),
                });
                l
            }
        };
        let opcode = Opcode::operator(op, family).ok_or_else(|| CompileError::TypeMismatch {
            line,
            context: format!("operator {}", op.symbol()),
        })?;
        self.emit_op(opcode);
        Ok(Operand {
            ty: if op.is_comparison() { VarType::Int } else { family },
            start: lhs.start,
            int_literal: None,
        })
    }

    /// Re-emit the integer literal at the end of the code as a float literal.
    fn respecialize_tail(&mut self, operand: Operand, line: usize) -> Result<(), CompileError> {
        let value = operand.int_literal.unwrap_or_default();
        self.code.truncate(operand.start);
        self.emit_float_literal(&value.to_string(), line)
    }

    /// Bring `value` to `ty` for a destination of fixed type: integer literals are re-emitted,
    /// other numeric values go through an explicit conversion.
    fn coerce(
        &mut self,
        value: Operand,
        ty: VarType,
        context: &str,
        line: usize,
    ) -> Result<(), CompileError> {
        match (value.ty, ty.scalar()) {
            (a, b) if a == b => Ok(()),
            (VarType::Int, VarType::Float) if value.int_literal.is_some() => {
                self.respecialize_tail(value, line)
            }
            (VarType::Int, VarType::Float) => {
                self.emit_op(Opcode::INT_TO_FLOAT);
                Ok(())
            }
            (VarType::Float, VarType::Int) => {
                self.emit_op(Opcode::FLOAT_TO_INT);
                Ok(())
            }
            _ => Err(CompileError::TypeMismatch {
                line,
                context: context.to_string(),
            }),
        }
    }

    fn unary(&mut self) -> Result<Operand, CompileError> {
        let t = self.cursor.expect("an expression")?;
        let op = if t.is_op("-") {
            Operator::Neg
        } else if t.is_op("NOT") {
            Operator::Not
        } else {
            return self.primary(t);
        };
        if op == Operator::Neg
            && let Some(n) = self.cursor.peek()
            && matches!(n.kind, TokenKind::Integer | TokenKind::Float)
        {
            self.cursor.next();
            return self.numeric_literal(n, true);
        }
        let operand = self.unary()?;
        let opcode =
            Opcode::operator(op, operand.ty).ok_or_else(|| CompileError::TypeMismatch {
                line: t.line,
                context: format!("operator {}", op.symbol()),
            })?;
        self.emit_op(opcode);
        Ok(Operand {
            ty: operand.ty,
            start: operand.start,
            int_literal: None,
        })
    }

    fn primary(&mut self, t: &'a Token) -> Result<Operand, CompileError> {
        let start = self.here();
        match t.kind {
            TokenKind::Integer | TokenKind::Float => self.numeric_literal(t, false),
            TokenKind::Str => {
                self.emit_op(Opcode::PUSH_STR);
                self.emit_str(&t.text, t.line)?;
                Ok(Operand {
                    ty: VarType::Str,
                    start,
                    int_literal: None,
                })
            }
            TokenKind::Punctuation if t.is_punct("(") => {
                let inner = self.expression()?;
                self.cursor.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Identifier => {
                if self.cursor.peek().is_some_and(|n| n.is_punct(":")) {
                    return self.proc_call(t);
                }
                if let Some(file) = field_file(t)
                    && self.cursor.eat_punct(".")
                {
                    let ty = self.field_name()?;
                    self.emit_op(Opcode::field_value(ty));
                    self.code.push(file);
                    return Ok(Operand {
                        ty,
                        start,
                        int_literal: None,
                    });
                }
                if t.upper() == "ADDR" && self.cursor.peek().is_some_and(|n| n.is_punct("(")) {
                    self.cursor.next();
                    self.lvalue()?;
                    self.cursor.expect_punct(")")?;
                    self.emit_op(Opcode::ADDR);
                    return Ok(Operand {
                        ty: VarType::Int,
                        start,
                        int_literal: None,
                    });
                }
                if let Some(builtin) = find_builtin(&t.text) {
                    return self.function_call(builtin, t);
                }
                let ty = self.variable(t, false)?;
                Ok(Operand {
                    ty,
                    start,
                    int_literal: None,
                })
            }
            _ => Err(unexpected(t, "an expression")),
        }
    }

    fn numeric_literal(&mut self, t: &Token, negate: bool) -> Result<Operand, CompileError> {
        let start = self.here();
        if t.kind == TokenKind::Integer {
            let value = parse_integer(&t.text).ok_or_else(|| unexpected(t, "an integer"))?;
            let is_hex = t.text.starts_with('$');
            let value = if is_hex && (0..=0xFFFF).contains(&value) {
                Some(value as u16 as i16 as i64)
            } else if !is_hex {
                Some(value)
            } else {
                None
            };
            let Some(value) = value else {
                return Err(unexpected(t, "a 16-bit integer"));
            };
            let value = if negate { -value } else { value };
            if let Ok(word) = i16::try_from(value) {
                self.emit_op(Opcode::PUSH_INT);
                self.emit_word(word);
                return Ok(Operand {
                    ty: VarType::Int,
                    start,
                    int_literal: Some(word),
                });
            }
            self.emit_float_literal(&value.to_string(), t.line)?;
        } else {
            let text = if negate {
                format!("-{}", t.text)
            } else {
                t.text.clone()
            };
            self.emit_float_literal(&text, t.line)?;
        }
        Ok(Operand {
            ty: VarType::Float,
            start,
            int_literal: None,
        })
    }

    fn emit_float_literal(&mut self, text: &str, line: usize) -> Result<(), CompileError> {
        let bytes = encode_float_text(text).map_err(|e| CompileError::InvalidImmediateArgument {
            line,
            keyword: "float literal",
            found: format!("{text}: {e}"),
        })?;
        self.emit_op(Opcode::PUSH_FLOAT);
        self.code.extend(bytes);
        Ok(())
    }

    fn function_call(&mut self, builtin: &Builtin, t: &Token) -> Result<Operand, CompileError> {
        self.check_target(builtin, t)?;
        let start = self.here();
        let result = builtin.result.unwrap_or(VarType::Float);
        match &builtin.args {
            ArgCount::Q(args) if args.is_empty() => {
                if self.cursor.eat_punct("(") {
                    self.cursor.expect_punct(")")?;
                }
                self.emit_op(builtin.opcode);
            }
            ArgCount::Q(args) => {
                self.cursor.expect_punct("(")?;
                for (i, ty) in args.iter().enumerate() {
                    if i > 0 {
                        self.cursor.expect_punct(",")?;
                    }
                    let arg = self.expression()?;
                    self.coerce(arg, *ty, builtin.name, t.line)?;
                }
                self.cursor.expect_punct(")")?;
                self.emit_op(builtin.opcode);
            }
            ArgCount::List(ty) => {
                self.cursor.expect_punct("(")?;
                let mut count: u16 = 0;
                loop {
                    let arg = self.expression()?;
                    self.coerce(arg, *ty, builtin.name, t.line)?;
                    count += 1;
                    if self.cursor.eat_punct(")") {
                        break;
                    }
                    self.cursor.expect_punct(",")?;
                }
                self.emit_op(builtin.opcode);
                self.code.extend(qcode::instruction::encode_varint(count));
            }
        }
        Ok(Operand {
            ty: result,
            start,
            int_literal: None,
        })
    }

    fn proc_call(&mut self, t: &Token) -> Result<Operand, CompileError> {
        let start = self.here();
        self.cursor.expect_punct(":")?;
        let mut argc: usize = 0;
        if self.cursor.eat_punct("(") && !self.cursor.eat_punct(")") {
            loop {
                self.expression()?;
                argc += 1;
                if self.cursor.eat_punct(")") {
                    break;
                }
                self.cursor.expect_punct(",")?;
            }
        }
        let argc = u8::try_from(argc).map_err(|_| CompileError::InvalidImmediateArgument {
            line: t.line,
            keyword: "procedure call",
            found: argc.to_string(),
        })?;
        self.emit_op(Opcode::CALL);
        self.code.push(argc);
        self.emit_str(&t.upper(), t.line)?;
        Ok(Operand {
            ty: VarType::from_name(&t.text),
            start,
            int_literal: None,
        })
    }

    /// Push the name of a field reference and return its type. The file letter and `.` have
    /// already been consumed.
    fn field_name(&mut self) -> Result<VarType, CompileError> {
        let field = self.cursor.expect_identifier()?;
        self.emit_op(Opcode::PUSH_STR);
        self.emit_str(&field.upper(), field.line)?;
        Ok(VarType::from_name(&field.text))
    }

    /// Compile an assignable reference, pushing its address. Returns its scalar type.
    fn lvalue(&mut self) -> Result<VarType, CompileError> {
        let t = self.cursor.expect_identifier()?;
        if let Some(file) = field_file(t)
            && self.cursor.eat_punct(".")
        {
            let ty = self.field_name()?;
            self.emit_op(Opcode::field_address(ty));
            self.code.push(file);
            return Ok(ty);
        }
        self.variable(t, true)
    }

    /// Push the value (or address) of a variable, compiling its index first for arrays.
    fn variable(&mut self, t: &Token, address: bool) -> Result<VarType, CompileError> {
        let indexed = self.cursor.peek().is_some_and(|n| n.is_punct("("));
        let symbol = match self.symbols.lookup(&t.text) {
            Some(s) => s.clone(),
            None => self.symbols.implicit_external(t, indexed)?.clone(),
        };
        match (symbol.ty.is_array(), indexed) {
            (true, true) => {
                self.cursor.next();
                let index = self.expression()?;
                self.coerce(index, VarType::Int, "array index", t.line)?;
                self.cursor.expect_punct(")")?;
            }
            (false, false) => {}
            (true, false) => return Err(unexpected(t, "an array index")),
            (false, true) => {
                return Err(CompileError::TypeMismatch {
                    line: t.line,
                    context: format!("index on scalar {}", t.text),
                });
            }
        }
        let external = symbol.class == StorageClass::External;
        let op = if address {
            Opcode::push_address(symbol.ty, external)
        } else {
            Opcode::push_value(symbol.ty, external)
        };
        self.emit_op(op);
        self.emit_word(symbol.offset);
        Ok(symbol.ty.scalar())
    }
}

/// Logical file number for a one-letter field prefix `A`..`D`.
fn field_file(t: &Token) -> Option<u8> {
    match t.upper().as_str() {
        "A" => Some(0),
        "B" => Some(1),
        "C" => Some(2),
        "D" => Some(3),
        _ => None,
    }
}

fn mismatched(t: &Token) -> CompileError {
    CompileError::MismatchedBlock {
        line: t.line,
        found: t.upper(),
    }
}

fn invalid_immediate(t: &Token, keyword: &'static str, found: Option<&Token>) -> CompileError {
    CompileError::InvalidImmediateArgument {
        line: t.line,
        keyword,
        found: found.map(|f| f.to_string()).unwrap_or_default(),
    }
}

/// Compile one procedure, returning its bytes along with the header, symbols and any warnings.
pub fn compile_unit(
    source: &str,
    options: &CompileOptions,
) -> Result<CompiledUnit, CompileError> {
    let tokens = tokenize(source)?;
    let symbols = SymbolTable::allocate(&tokens)?;
    let mut state = CodegenState::new(&tokens, symbols, *options);
    state.generate()?;

    let CodegenState {
        code,
        symbols,
        warnings,
        ..
    } = state;
    let mut header = symbols.header(options.target);
    let bytes = header.encode(&code).map_err(|e| match e {
        HeaderError::TooLarge { what: "code", len } => CompileError::CodeTooLarge { size: len },
        e => CompileError::HeaderOverflow(e),
    })?;
    header.code_size = code.len() as u16;
    debug!(
        proc = symbols.proc_name().unwrap_or("<anonymous>"),
        code = code.len(),
        total = bytes.len(),
        warnings = warnings.len(),
        "compiled procedure"
    );
    Ok(CompiledUnit {
        bytes,
        header,
        symbols: symbols.into_symbols(),
        warnings,
    })
}

/// Compile source text into a complete QCode procedure (header and code).
pub fn compile(source: &str, options: &CompileOptions) -> Result<Vec<u8>, CompileError> {
    compile_unit(source, options).map(|unit| unit.bytes)
}
