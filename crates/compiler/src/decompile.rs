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

//! QCode back to OPL source: header decoding, variable resolution, structure recovery, and
//! expression reconstruction from a simulated stack of `{text, precedence}` entries.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::ops::Range;

use itertools::Itertools;
use qcode::{
    HeaderError, Instruction, OpClass, Opcode, Operands, Operator, PrintChannel, QcodeHeader,
    StorageClass, VarType, decode_all, file_letter,
};
use tracing::{debug, warn};

use crate::options::DecompileOptions;
use crate::precedence::{Precedence, is_right_associative, operator_precedence};
use crate::resolver::{VarMap, resolve};
use crate::structure::{Node, recover};

#[derive(Debug, Clone)]
struct Expr {
    text: String,
    prec: Precedence,
}

impl Expr {
    fn primary(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prec: Precedence::Primary,
        }
    }

    /// A numeric literal; negative ones bind like a unary minus.
    fn number(text: String) -> Self {
        let prec = if text.starts_with('-') {
            Precedence::Unary
        } else {
            Precedence::Primary
        };
        Self { text, prec }
    }

    fn wrapped(&self, wrap: bool) -> String {
        if wrap {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }

    fn string_literal(&self) -> Option<&str> {
        self.text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .filter(|t| !t.contains('"'))
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Float literal text that reads back as a float.
fn float_text(text: &str) -> String {
    if text.contains(['.', 'E']) {
        text.to_string()
    } else {
        format!("{text}.0")
    }
}

fn binary(op: Operator, l: Expr, r: Expr) -> Expr {
    let prec = operator_precedence(op);
    let (wrap_l, wrap_r) = if op.is_logical() {
        (l.prec != Precedence::Primary, r.prec != Precedence::Primary)
    } else if is_right_associative(op) {
        (l.prec <= prec, r.prec < prec)
    } else {
        (l.prec < prec, r.prec <= prec)
    };
    let (l, r) = (l.wrapped(wrap_l), r.wrapped(wrap_r));
    let text = if op.is_logical() {
        format!("{l} {} {r}", op.symbol())
    } else {
        format!("{l}{}{r}", op.symbol())
    };
    Expr { text, prec }
}

fn unary(op: Operator, operand: Expr) -> Expr {
    let text = match op {
        Operator::Not => format!(
            "NOT {}",
            operand.wrapped(operand.prec != Precedence::Primary)
        ),
        _ => format!("-{}", operand.wrapped(operand.prec < Precedence::Unary)),
    };
    Expr {
        text,
        prec: Precedence::Unary,
    }
}

#[derive(Default)]
struct PrintLine {
    channel: Option<PrintChannel>,
    items: String,
    after_item: bool,
}

impl PrintLine {
    fn item(&mut self, channel: PrintChannel, text: &str) {
        self.channel = Some(channel);
        if self.after_item {
            self.items.push(';');
        }
        self.items.push_str(text);
        self.after_item = true;
    }

    fn comma(&mut self, channel: PrintChannel) {
        self.channel = Some(channel);
        self.items.push(',');
        self.after_item = false;
    }

    fn render(&mut self, channel: PrintChannel, open: bool) -> String {
        let mut line = channel.keyword().to_string();
        if !self.items.is_empty() {
            line.push(' ');
            line.push_str(&self.items);
            if open && self.after_item {
                line.push(';');
            }
        }
        *self = PrintLine::default();
        line
    }

    /// Render a print statement that ended without a newline.
    fn flush(&mut self) -> Option<String> {
        let channel = self.channel?;
        Some(self.render(channel, true))
    }
}

#[derive(Default)]
struct Evaluation {
    stack: Vec<Expr>,
    lines: Vec<String>,
    print: PrintLine,
    underflow: bool,
}

impl Evaluation {
    fn pop(&mut self) -> Expr {
        self.stack.pop().unwrap_or_else(|| {
            self.underflow = true;
            Expr::primary("0")
        })
    }

    /// Pop `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Vec<Expr> {
        let mut values: Vec<Expr> = (0..n).map(|_| self.pop()).collect();
        values.reverse();
        values
    }
}

fn join(values: &[Expr]) -> String {
    values.iter().map(|v| v.text.as_str()).join(",")
}

struct Reconstructor<'a> {
    insns: &'a [Instruction],
    vars: &'a VarMap,
    labels: &'a BTreeMap<usize, usize>,
}

impl Reconstructor<'_> {
    fn label(&self, pc: usize) -> String {
        match self.labels.get(&pc) {
            Some(n) => format!("LBL{n}"),
            None => format!("LBL{pc:04X}"),
        }
    }

    fn var_name(&self, insn: &Instruction) -> String {
        let address = insn.address().unwrap_or_default();
        match self.vars.get(address) {
            Some(v) => v.name.clone(),
            None => format!("V{}", -(address as i32)),
        }
    }

    fn run(&self, range: Range<usize>) -> Evaluation {
        let mut ev = Evaluation::default();
        for insn in &self.insns[range] {
            self.step(insn, &mut ev);
        }
        ev
    }

    fn step(&self, insn: &Instruction, ev: &mut Evaluation) {
        let Some(info) = insn.info() else {
            ev.lines.push(format!("REM UNKNOWN ${:02X}", insn.opcode.0));
            return;
        };
        match info.class {
            OpClass::PushValue { ty, .. } | OpClass::PushAddress { ty, .. } => {
                let name = self.var_name(insn);
                let text = if ty.is_array() {
                    let index = ev.pop();
                    format!("{name}({})", index.text)
                } else {
                    name
                };
                ev.stack.push(Expr::primary(text));
            }
            OpClass::FieldValue(_) | OpClass::FieldAddress(_) => {
                let name = ev.pop();
                let file = match insn.operands {
                    Operands::Byte(b) => b,
                    _ => 0,
                };
                let field = match name.string_literal() {
                    Some(n) => n.to_string(),
                    None => format!("({})", name.text),
                };
                ev.stack
                    .push(Expr::primary(format!("{}.{field}", file_letter(file))));
            }
            OpClass::Literal(_) => {
                let expr = match &insn.operands {
                    Operands::Byte(b) => Expr::number((*b as i8).to_string()),
                    Operands::Word(w) => Expr::number((*w as i16).to_string()),
                    Operands::Float(text) => Expr::number(float_text(text)),
                    Operands::Str(s) => Expr::primary(quote(s)),
                    _ => Expr::primary("0"),
                };
                ev.stack.push(expr);
            }
            OpClass::Operator { op, .. } => {
                let expr = if op.is_unary() {
                    let operand = ev.pop();
                    unary(op, operand)
                } else {
                    let r = ev.pop();
                    let l = ev.pop();
                    binary(op, l, r)
                };
                ev.stack.push(expr);
            }
            OpClass::Command => {
                let line = self.command(insn, info.mnemonic, ev);
                ev.lines.push(line);
            }
            OpClass::PrintItem(channel, _) => {
                let value = ev.pop();
                ev.print.item(channel, &value.text);
            }
            OpClass::PrintComma(channel) => ev.print.comma(channel),
            OpClass::PrintNewline(channel) => {
                let line = ev.print.render(channel, false);
                ev.lines.push(line);
            }
            OpClass::Input(_) => {
                let target = ev.pop();
                ev.lines.push(format!("INPUT {}", target.text));
            }
            OpClass::Edit => {
                let target = ev.pop();
                ev.lines.push(format!("EDIT {}", target.text));
            }
            OpClass::ReturnValue => {
                let value = ev.pop();
                ev.lines.push(format!("RETURN {}", value.text));
            }
            OpClass::ReturnDefault(_) => ev.lines.push("RETURN".into()),
            OpClass::Call => {
                let args = ev.pop_n(insn.pops());
                let name = match &insn.operands {
                    Operands::ProcCall { name, .. } => name.clone(),
                    _ => String::new(),
                };
                let text = if args.is_empty() {
                    format!("{name}:")
                } else {
                    format!("{name}:({})", join(&args))
                };
                ev.stack.push(Expr::primary(text));
            }
            OpClass::BranchIfFalse => {
                let cond = ev.pop();
                let target = insn.branch_target().unwrap_or_default();
                ev.lines.push(format!(
                    "IF NOT ({}) : GOTO {} : ENDIF",
                    cond.text,
                    self.label(target)
                ));
            }
            OpClass::Goto => {
                let target = insn.branch_target().unwrap_or_default();
                ev.lines.push(format!("GOTO {}", self.label(target)));
            }
            // A zero displacement is both ONERR OFF and a handler label on the next
            // statement. Both compile to the same bytes, so the former is always chosen.
            OpClass::OnErr => match insn.operands {
                Operands::Branch {
                    displacement: 0, ..
                } => ev.lines.push("ONERR OFF".into()),
                _ => {
                    let target = insn.branch_target().unwrap_or_default();
                    ev.lines.push(format!("ONERR {}", self.label(target)));
                }
            },
            OpClass::Assign(_) => {
                let value = ev.pop();
                let target = ev.pop();
                ev.lines.push(format!("{}={}", target.text, value.text));
            }
            OpClass::Drop(_) => {
                let value = ev.pop();
                ev.lines.push(value.text);
            }
            OpClass::Convert { .. } => {}
            OpClass::Addr => {
                let target = ev.pop();
                ev.stack
                    .push(Expr::primary(format!("ADDR({})", target.text)));
            }
            OpClass::Function(_) => {
                let args = ev.pop_n(insn.pops());
                let text = if args.is_empty() {
                    info.mnemonic.to_string()
                } else {
                    format!("{}({})", info.mnemonic, join(&args))
                };
                ev.stack.push(Expr::primary(text));
            }
        }
    }

    fn command(&self, insn: &Instruction, keyword: &str, ev: &mut Evaluation) -> String {
        match (insn.opcode, &insn.operands) {
            (Opcode::CURSOR | Opcode::ESCAPE, Operands::Byte(flag)) => {
                format!("{keyword} {}", if *flag == 0 { "OFF" } else { "ON" })
            }
            (Opcode::USE, Operands::Byte(file)) => format!("USE {}", file_letter(*file)),
            (_, Operands::FieldList { file, fields }) => {
                let name = ev.pop();
                let mut line = format!("{keyword} {},{}", name.text, file_letter(*file));
                for field in fields {
                    let _ = write!(line, ",{}", field.name);
                }
                line
            }
            _ => {
                let args = ev.pop_n(insn.pops());
                if args.is_empty() {
                    keyword.to_string()
                } else {
                    format!("{keyword} {}", join(&args))
                }
            }
        }
    }

    fn statement(&self, range: Range<usize>) -> Vec<String> {
        let mut ev = self.run(range);
        if let Some(line) = ev.print.flush() {
            ev.lines.push(line);
        }
        if ev.underflow {
            ev.lines.push("REM stack underflow".into());
        }
        ev.lines
    }

    fn condition(&self, range: Range<usize>) -> (String, Vec<String>) {
        let mut ev = self.run(range);
        let cond = ev.pop();
        if ev.underflow {
            ev.lines.push("REM stack underflow".into());
        }
        (cond.text, ev.lines)
    }
}

struct Renderer<'a> {
    rec: Reconstructor<'a>,
    indent: usize,
    out: String,
    /// Labels not yet emitted, in address order.
    pending: Vec<(usize, usize)>,
}

impl Renderer<'_> {
    fn line(&mut self, depth: usize, text: &str) {
        let _ = writeln!(self.out, "{:width$}{text}", "", width = depth * self.indent);
    }

    fn labels_upto(&mut self, pc: usize, depth: usize) {
        while let Some(&(target, n)) = self.pending.first() {
            if target > pc {
                break;
            }
            self.pending.remove(0);
            self.line(depth, &format!("LBL{n}::"));
        }
    }

    fn pc(&self, insn: usize) -> usize {
        self.rec.insns.get(insn).map(|i| i.pc).unwrap_or(usize::MAX)
    }

    fn cond_line(&mut self, depth: usize, keyword: &str, cond: &Range<usize>) {
        let (text, remarks) = self.rec.condition(cond.clone());
        for r in remarks {
            self.line(depth, &r);
        }
        self.line(depth, &format!("{keyword} {text}"));
    }

    fn nodes(&mut self, nodes: &[Node], depth: usize) {
        for node in nodes {
            self.node(node, depth);
        }
    }

    fn node(&mut self, node: &Node, depth: usize) {
        self.labels_upto(self.pc(node.first_insn()), depth);
        match node {
            Node::Stmt(range) => {
                for line in self.rec.statement(range.clone()) {
                    self.line(depth, &line);
                }
            }
            Node::If { arms, otherwise } => {
                for (i, arm) in arms.iter().enumerate() {
                    let keyword = if i == 0 { "IF" } else { "ELSEIF" };
                    self.cond_line(depth, keyword, &arm.cond);
                    self.nodes(&arm.body, depth + 1);
                }
                if let Some(otherwise) = otherwise {
                    self.line(depth, "ELSE");
                    self.nodes(otherwise, depth + 1);
                }
                self.line(depth, "ENDIF");
            }
            Node::While { cond, body } => {
                self.cond_line(depth, "WHILE", cond);
                self.nodes(body, depth + 1);
                self.line(depth, "ENDWH");
            }
            Node::DoUntil { body, cond } => {
                self.line(depth, "DO");
                self.nodes(body, depth + 1);
                self.labels_upto(self.pc(cond.start), depth);
                self.cond_line(depth, "UNTIL", cond);
            }
            Node::Break(_) => self.line(depth, "BREAK"),
            Node::Continue(_) => self.line(depth, "CONTINUE"),
            Node::Goto(i) => {
                for line in self.rec.statement(*i..*i + 1) {
                    self.line(depth, &line);
                }
            }
            Node::BranchIfFalse { cond } => {
                let target = self.rec.insns[cond.end].branch_target().unwrap_or_default();
                let (text, remarks) = self.rec.condition(cond.clone());
                for r in remarks {
                    self.line(depth, &r);
                }
                self.line(depth, &format!("IF NOT ({text})"));
                self.line(depth + 1, &format!("GOTO {}", self.rec.label(target)));
                self.line(depth, "ENDIF");
            }
        }
    }
}

fn declaration(name: &str, ty: VarType, max_len: Option<u8>, elements: Option<u16>) -> String {
    match (ty.scalar(), elements, max_len) {
        (VarType::Str, Some(n), Some(len)) => format!("{name}({n},{len})"),
        (VarType::Str, None, Some(len)) => format!("{name}({len})"),
        (_, Some(n), _) => format!("{name}({n})"),
        _ => name.to_string(),
    }
}

fn declarations(header: &QcodeHeader, vars: &VarMap) -> Vec<String> {
    let mut lines = vec![];
    let globals: Vec<String> = header
        .globals
        .iter()
        .map(|g| {
            let max_len = header
                .string_fixups
                .iter()
                .find(|f| f.address == g.offset)
                .map(|f| f.max_len)
                .or_else(|| vars.get(g.offset).and_then(|v| v.max_len));
            let elements = header
                .array_fixups
                .iter()
                .find(|f| f.address == g.offset)
                .map(|f| f.count)
                .or_else(|| vars.get(g.offset).and_then(|v| v.elements));
            let max_len = max_len
                .or((g.ty.scalar() == VarType::Str).then_some(qcode::DEFAULT_STRING_LENGTH));
            let elements = elements.or(g.ty.is_array().then_some(1));
            declaration(&format!("{}{}", g.name, g.ty.suffix()), g.ty, max_len, elements)
        })
        .collect();
    if !globals.is_empty() {
        lines.push(format!("GLOBAL {}", globals.join(",")));
    }
    let of_class = |class| -> Vec<String> {
        vars.of_class(class)
            .map(|(_, v)| declaration(&v.name, v.ty, v.max_len, v.elements))
            .collect()
    };
    let locals = of_class(StorageClass::Local);
    if !locals.is_empty() {
        lines.push(format!("LOCAL {}", locals.join(",")));
    }
    let externals = of_class(StorageClass::External);
    if !externals.is_empty() {
        lines.push(format!("EXTERNAL {}", externals.join(",")));
    }
    lines
}

fn proc_line(name: &str, header: &QcodeHeader, vars: &VarMap) -> String {
    if header.param_types.is_empty() {
        return format!("PROC {name}:");
    }
    let mut params: Vec<String> = vars
        .of_class(StorageClass::Parameter)
        .map(|(_, v)| v.name.clone())
        .collect();
    // Unaccessed parameters still appear in the signature.
    for (i, ty) in header.param_types.iter().enumerate().skip(params.len()) {
        params.push(format!("P{}{}", i + 1, ty.suffix()));
    }
    format!("PROC {name}:({})", params.join(","))
}

fn split_code<'a>(bytes: &'a [u8], header: &QcodeHeader, offset: usize) -> &'a [u8] {
    let end = (offset + header.code_size as usize).min(bytes.len());
    &bytes[offset.min(end)..end]
}

/// Decompile a procedure with default options.
pub fn decompile(bytes: &[u8], name: &str) -> Result<String, HeaderError> {
    decompile_with(bytes, name, &DecompileOptions::default())
}

/// Decompile a procedure. Only a malformed header is an error; anything undecodable in the code
/// is rendered as remarks.
pub fn decompile_with(
    bytes: &[u8],
    name: &str,
    options: &DecompileOptions,
) -> Result<String, HeaderError> {
    let (header, offset) = QcodeHeader::decode(bytes)?;
    let code = split_code(bytes, &header, offset);
    let (mut insns, decode_error) = decode_all(code);
    if let Some(e) = &decode_error {
        warn!(error = %e, "code stops decoding early");
    }
    let vars = resolve(&header, &insns);

    // The trailing implicit return is not written back out, but its type is the procedure's.
    let mut name = name.to_string();
    let code_end = match insns.last().map(|last| (last.pc, last.info().map(|i| i.class))) {
        Some((pc, Some(OpClass::ReturnDefault(ty)))) => {
            if VarType::from_name(&name) == VarType::Float && ty != VarType::Float {
                name.push_str(ty.suffix());
            }
            insns.pop();
            pc
        }
        _ => code.len(),
    };
    let structure = recover(&insns, code_end);
    let labels: BTreeMap<usize, usize> = structure
        .label_targets
        .iter()
        .enumerate()
        .map(|(i, pc)| (*pc, i + 1))
        .collect();
    debug!(
        instructions = insns.len(),
        variables = vars.len(),
        labels = labels.len(),
        "decompiled {name}"
    );

    let mut renderer = Renderer {
        rec: Reconstructor {
            insns: &insns,
            vars: &vars,
            labels: &labels,
        },
        indent: options.indent,
        out: String::new(),
        pending: labels.iter().map(|(pc, n)| (*pc, *n)).collect(),
    };
    renderer.line(0, &proc_line(&name, &header, &vars));
    if options.emit_declarations {
        for line in declarations(&header, &vars) {
            renderer.line(1, &line);
        }
    }
    renderer.nodes(&structure.nodes, 1);
    renderer.labels_upto(usize::MAX, 1);
    if let Some(e) = decode_error {
        renderer.line(1, &format!("REM {e}"));
    }
    renderer.line(0, "ENDP");
    Ok(renderer.out)
}

/// Header summary followed by one line per instruction.
pub fn disassemble(bytes: &[u8]) -> Result<String, HeaderError> {
    let (header, offset) = QcodeHeader::decode(bytes)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "; var space {}, code {} bytes, {:?} target",
        header.var_space_size, header.code_size, header.target
    );
    if !header.param_types.is_empty() {
        let _ = writeln!(out, "; params {}", header.param_types.iter().join(", "));
    }
    for g in &header.globals {
        let _ = writeln!(out, "; global {}{} at {}", g.name, g.ty.suffix(), g.offset);
    }
    for e in &header.externals {
        let _ = writeln!(out, "; external {e}");
    }
    for f in &header.string_fixups {
        let _ = writeln!(out, "; string {} max {}", f.address, f.max_len);
    }
    for f in &header.array_fixups {
        let _ = writeln!(out, "; array {} count {}", f.address, f.count);
    }
    let (insns, decode_error) = decode_all(split_code(bytes, &header, offset));
    for insn in &insns {
        let _ = writeln!(out, "{insn}");
    }
    if let Some(e) = decode_error {
        let _ = writeln!(out, "; {e}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, compile};
    use pretty_assertions::assert_eq;
    use unindent::unindent;

    fn round(src: &str) -> String {
        let bytes = compile(&unindent(src), &CompileOptions::default()).unwrap();
        decompile(&bytes, "TEST").unwrap()
    }

    #[test]
    fn empty_procedure() {
        assert_eq!(round("PROC TEST:\nENDP"), "PROC TEST:\nENDP\n");
    }

    #[test]
    fn globals_and_expressions() {
        let out = round(
            r#"
            PROC TEST:
              GLOBAL A%,B
              A%=(1+2)*3
              B=A%-(4-5)
            ENDP
            "#,
        );
        assert_eq!(
            out,
            unindent(
                r#"
                PROC TEST:
                  GLOBAL A%,B
                  A%=(1+2)*3
                  B=A%-(4-5)
                ENDP
                "#
            )
        );
    }

    #[test]
    fn structures_and_print() {
        let src = r#"
            PROC TEST:
              LOCAL I%
              WHILE I%<10
                IF I%=3
                  PRINT "THREE";
                ELSEIF I%=4
                  PRINT "FOUR",I%
                ELSE
                  PRINT I%
                ENDIF
                I%=I%+1
              ENDWH
            ENDP
            "#;
        let expected = unindent(src).replace("I%", "L1%");
        assert_eq!(round(src), expected);
    }

    #[test]
    fn do_until_with_logical_condition() {
        let src = r#"
            PROC TEST:
              LOCAL A%,B%
              DO
                A%=A%+1
              UNTIL (A%>5) AND NOT (B%=0)
            ENDP
            "#;
        let out = round(src);
        assert!(out.contains("  DO\n    L1%=L1%+1\n"), "{out}");
        assert!(out.contains("  UNTIL (L1%>5) AND (NOT (L2%=0))\n"), "{out}");
    }

    #[test]
    fn goto_uses_numbered_labels() {
        let out = round(
            r#"
            PROC TEST:
              GLOBAL N%
              TOP::
              N%=N%+1
              IF N%<3
                GOTO TOP
              ENDIF
            ENDP
            "#,
        );
        assert!(out.contains("  LBL1::\n  N%=N%+1\n"), "{out}");
        assert!(out.contains("GOTO LBL1"), "{out}");
    }

    #[test]
    fn unknown_opcode_is_a_remark() {
        let header = QcodeHeader::default();
        let bytes = header.encode(&[0x5A, 0x7B]).unwrap();
        let out = decompile(&bytes, "X").unwrap();
        assert_eq!(out, "PROC X:\n  REM UNKNOWN $5A\nENDP\n");
    }

    #[test]
    fn stack_underflow_is_reported() {
        let header = QcodeHeader::default();
        // DROP.I with nothing pushed.
        let bytes = header.encode(&[0x82, 0x7B]).unwrap();
        let out = decompile(&bytes, "X").unwrap();
        assert_eq!(out, "PROC X:\n  0\n  REM stack underflow\nENDP\n");
    }

    #[test]
    fn disassembly_lists_instructions() {
        let bytes = compile("PROC T:\nGLOBAL A%\nA%=1\nENDP", &CompileOptions::default()).unwrap();
        let listing = disassemble(&bytes).unwrap();
        assert!(listing.contains("; global A% at"), "{listing}");
        assert!(listing.contains("ASSIGN"), "{listing}");
    }

    #[test]
    fn out_of_range_file_number() {
        let bytes = QcodeHeader::default()
            .encode(&[0x24, 0x01, b'F', 0x65, 0xC8, 0x88, 0x7B])
            .unwrap();
        let listing = disassemble(&bytes).unwrap();
        assert!(listing.contains("0003: 65 OPEN $C8\n"), "{listing}");
        assert_eq!(
            decompile(&bytes, "X").unwrap(),
            "PROC X:\n  OPEN \"F\",$C8\nENDP\n"
        );
    }

    #[test]
    fn onerr_to_the_next_statement_reads_as_off() {
        let src = "PROC TEST:\n  ONERR HANDLER\n  HANDLER::\n  PRINT 1\nENDP\n";
        let bytes = compile(src, &CompileOptions::default()).unwrap();
        let text = decompile(&bytes, "TEST").unwrap();
        assert_eq!(text, "PROC TEST:\n  ONERR OFF\n  PRINT 1\nENDP\n");
        assert_eq!(compile(&text, &CompileOptions::default()).unwrap(), bytes);
    }
}
