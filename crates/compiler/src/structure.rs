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

//! Recovers IF / ELSEIF / ELSE, WHILE and DO / UNTIL structure from the branch layout of decoded
//! code. Nothing in the bytecode tags a branch with the construct that produced it; the shapes
//! below are recognized purely from where branches point and what sits next to their targets.
//!
//! * A backward conditional branch to the start of a statement closes a DO loop. Inside the loop a
//!   jump to the start of the UNTIL condition is CONTINUE and a jump past the branch is BREAK.
//! * A forward conditional branch to `T`, where the instruction before `T` jumps back to the start
//!   of the condition, is a WHILE loop. A jump to the condition start is CONTINUE, one to `T` is
//!   BREAK.
//! * A forward conditional branch to `T`, where the instruction before `T` jumps forward to `E`,
//!   is IF / ELSE / ENDIF with ENDIF at `E`. An ELSE part made of a single IF becomes ELSEIF.
//!   With an empty THEN part and `E` at a loop exit, the jump is read as BREAK or CONTINUE.
//! * Any other forward conditional branch is IF / ENDIF.
//!
//! Branches that fit none of these, or that would not nest inside their enclosing structure, are
//! left as GOTOs to numbered labels.
//!
//! Recovering a structure hides its closing jumps (the jump over an ELSE part, the jump back at
//! ENDWH) and the boundary between ELSE and a flattened ELSEIF. A label at any of those places has
//! nowhere to go in the rendered source, so such places are pinned and recovery runs again with
//! the shapes that would hide them refused.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use qcode::{Instruction, OpClass};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm {
    /// Instructions computing the condition, excluding the conditional branch itself.
    pub cond: Range<usize>,
    pub body: Vec<Node>,
}

/// A recovered statement or structure. Ranges and positions are instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Stmt(Range<usize>),
    If {
        arms: Vec<Arm>,
        otherwise: Option<Vec<Node>>,
    },
    While {
        cond: Range<usize>,
        body: Vec<Node>,
    },
    DoUntil {
        body: Vec<Node>,
        cond: Range<usize>,
    },
    Break(usize),
    Continue(usize),
    /// An unstructured GOTO or ONERR.
    Goto(usize),
    /// An unstructured conditional branch; the branch instruction is at `cond.end`.
    BranchIfFalse { cond: Range<usize> },
}

impl Node {
    /// Index of the first instruction belonging to this node.
    pub fn first_insn(&self) -> usize {
        match self {
            Node::Stmt(r) => r.start,
            Node::If { arms, .. } => arms.first().map(|a| a.cond.start).unwrap_or_default(),
            Node::While { cond, .. } | Node::BranchIfFalse { cond } => cond.start,
            Node::DoUntil { body, cond } => {
                body.first().map(Node::first_insn).unwrap_or(cond.start)
            }
            Node::Break(i) | Node::Continue(i) | Node::Goto(i) => *i,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub nodes: Vec<Node>,
    /// Targets of unstructured branches, in address order.
    pub label_targets: BTreeSet<usize>,
}

impl Structure {
    /// Compact rendering of the nesting of control structures, ignoring plain statements.
    pub fn shape(&self) -> String {
        fn walk(nodes: &[Node], out: &mut String) {
            for node in nodes {
                match node {
                    Node::If { arms, otherwise } => {
                        out.push_str("IF{");
                        for (i, arm) in arms.iter().enumerate() {
                            if i > 0 {
                                out.push_str("ELSEIF{");
                            }
                            walk(&arm.body, out);
                            if i > 0 {
                                out.push('}');
                            }
                        }
                        if let Some(o) = otherwise {
                            out.push_str("ELSE{");
                            walk(o, out);
                            out.push('}');
                        }
                        out.push('}');
                    }
                    Node::While { body, .. } => {
                        out.push_str("WHILE{");
                        walk(body, out);
                        out.push('}');
                    }
                    Node::DoUntil { body, .. } => {
                        out.push_str("DO{");
                        walk(body, out);
                        out.push('}');
                    }
                    Node::Break(_) => out.push_str("BREAK;"),
                    Node::Continue(_) => out.push_str("CONTINUE;"),
                    Node::Goto(_) | Node::BranchIfFalse { .. } => out.push_str("GOTO;"),
                    Node::Stmt(_) => {}
                }
            }
        }
        let mut out = String::new();
        walk(&self.nodes, &mut out);
        out
    }
}

fn class(insn: &Instruction) -> Option<OpClass> {
    insn.info().map(|i| i.class)
}

fn is_branch(insn: &Instruction) -> bool {
    matches!(
        class(insn),
        Some(OpClass::BranchIfFalse | OpClass::Goto | OpClass::OnErr)
    )
}

/// Split instructions into statements: runs that start and end with an empty value stack.
/// Consecutive PRINT items of one channel are joined into a single statement.
pub fn split_statements(insns: &[Instruction]) -> Vec<Range<usize>> {
    let mut raw = vec![];
    let mut start = 0;
    let mut depth: usize = 0;
    for (i, insn) in insns.iter().enumerate() {
        depth = depth.saturating_sub(insn.pops()) + insn.pushes();
        if depth == 0 || is_branch(insn) {
            raw.push(start..i + 1);
            start = i + 1;
            depth = 0;
        }
    }
    if start < insns.len() {
        raw.push(start..insns.len());
    }

    let continues_print = |r: &Range<usize>| match class(&insns[r.end - 1]) {
        Some(OpClass::PrintItem(ch, _) | OpClass::PrintComma(ch)) => Some(ch),
        _ => None,
    };
    let print_channel = |r: &Range<usize>| match class(&insns[r.end - 1]) {
        Some(
            OpClass::PrintItem(ch, _) | OpClass::PrintComma(ch) | OpClass::PrintNewline(ch),
        ) => Some(ch),
        _ => None,
    };
    let mut merged: Vec<Range<usize>> = vec![];
    for r in raw {
        if let Some(prev) = merged.last_mut()
            && continues_print(prev).is_some()
            && continues_print(prev) == print_channel(&r)
        {
            prev.end = r.end;
            continue;
        }
        merged.push(r);
    }
    merged
}

struct LoopTargets {
    continue_pc: usize,
    break_pc: usize,
}

struct Recovery<'a> {
    insns: &'a [Instruction],
    stmts: &'a [Range<usize>],
    stmt_at_pc: &'a HashMap<usize, usize>,
    code_end: usize,
    /// Addresses that must stay visible in the output.
    pinned: &'a BTreeSet<usize>,
    loops: Vec<LoopTargets>,
    label_targets: BTreeSet<usize>,
    /// Addresses of instructions or boundaries absorbed into a recovered structure.
    hidden: BTreeSet<usize>,
}

/// Recover structure from `insns`, which cover code up to `code_end` (the offset reached by a
/// branch to the end of the procedure).
pub fn recover(insns: &[Instruction], code_end: usize) -> Structure {
    let stmts = split_statements(insns);
    let stmt_at_pc: HashMap<usize, usize> = stmts
        .iter()
        .enumerate()
        .map(|(i, r)| (insns[r.start].pc, i))
        .collect();
    let mut pinned = BTreeSet::new();
    loop {
        let mut recovery = Recovery {
            insns,
            stmts: &stmts,
            stmt_at_pc: &stmt_at_pc,
            code_end,
            pinned: &pinned,
            loops: vec![],
            label_targets: BTreeSet::new(),
            hidden: BTreeSet::new(),
        };
        let nodes = recovery.block(0, stmts.len());
        let Recovery {
            label_targets,
            hidden,
            ..
        } = recovery;
        let lost: Vec<usize> = hidden.intersection(&label_targets).copied().collect();
        if lost.is_empty() {
            return Structure {
                nodes,
                label_targets,
            };
        }
        // Each round pins at least one new address, and pinned addresses are never hidden.
        pinned.extend(lost);
    }
}

impl Recovery<'_> {
    fn stmt_pc(&self, s: usize) -> usize {
        match self.stmts.get(s) {
            Some(r) => self.insns[r.start].pc,
            None => self.code_end,
        }
    }

    fn stmt_index_at(&self, pc: usize) -> Option<usize> {
        if pc == self.code_end {
            return Some(self.stmts.len());
        }
        self.stmt_at_pc.get(&pc).copied()
    }

    fn last(&self, s: usize) -> &Instruction {
        &self.insns[self.stmts[s].end - 1]
    }

    fn is_goto(&self, s: usize) -> bool {
        self.stmts[s].len() == 1 && class(self.last(s)) == Some(OpClass::Goto)
    }

    /// The outermost statement in `[s, hi)` ending in a conditional branch back to the start of
    /// statement `s`.
    fn do_loop_at(&self, s: usize, hi: usize) -> Option<usize> {
        let start = self.stmt_pc(s);
        (s..hi).rev().find(|&k| {
            let last = self.last(k);
            class(last) == Some(OpClass::BranchIfFalse)
                && last.branch_target() == Some(start)
                && self.stmts[k].start < self.stmts[k].end - 1
        })
    }

    fn is_loop_exit(&self, pc: usize) -> bool {
        self.loops
            .last()
            .is_some_and(|l| l.break_pc == pc || l.continue_pc == pc)
    }

    fn block(&mut self, lo: usize, hi: usize) -> Vec<Node> {
        let mut nodes = vec![];
        let mut s = lo;
        while s < hi {
            if let Some(k) = self.do_loop_at(s, hi) {
                let cond = self.stmts[k].start..self.stmts[k].end - 1;
                self.loops.push(LoopTargets {
                    continue_pc: self.stmt_pc(k),
                    break_pc: self.stmt_pc(k + 1),
                });
                let body = self.block(s, k);
                self.loops.pop();
                nodes.push(Node::DoUntil { body, cond });
                s = k + 1;
                continue;
            }

            let range = self.stmts[s].clone();
            let last_idx = range.end - 1;
            let last = &self.insns[last_idx];
            match class(last) {
                Some(OpClass::BranchIfFalse) => {
                    let cond = range.start..last_idx;
                    let (next, node) = self.conditional(s, hi, cond);
                    nodes.push(node);
                    s = next;
                    continue;
                }
                Some(OpClass::Goto) => {
                    let target = last.branch_target().unwrap_or_default();
                    let node = match self.loops.last() {
                        Some(l) if l.break_pc == target => Node::Break(last_idx),
                        Some(l) if l.continue_pc == target => Node::Continue(last_idx),
                        _ => {
                            self.label_targets.insert(target);
                            Node::Goto(last_idx)
                        }
                    };
                    nodes.push(node);
                }
                // ONERR OFF, or a handler right after the ONERR; the two are indistinguishable.
                Some(OpClass::OnErr) => match last.operands {
                    qcode::Operands::Branch {
                        displacement: 0, ..
                    } => nodes.push(Node::Stmt(range)),
                    _ => {
                        self.label_targets
                            .insert(last.branch_target().unwrap_or_default());
                        nodes.push(Node::Goto(last_idx));
                    }
                },
                _ => nodes.push(Node::Stmt(range)),
            }
            s += 1;
        }
        nodes
    }

    /// Classify the forward conditional branch ending statement `s`. Returns the statement index
    /// following the recovered node.
    fn conditional(&mut self, s: usize, hi: usize, cond: Range<usize>) -> (usize, Node) {
        let branch = &self.insns[cond.end];
        let target = branch.branch_target().unwrap_or_default();
        let nested = if target > branch.pc {
            self.stmt_index_at(target).filter(|&t| t > s && t <= hi)
        } else {
            None
        };
        let Some(t) = nested else {
            self.label_targets.insert(target);
            return (s + 1, Node::BranchIfFalse { cond });
        };

        let jump_pc = self.stmt_pc(t - 1);
        if t - 1 > s && self.is_goto(t - 1) && !self.pinned.contains(&jump_pc) {
            let jump_target = self.last(t - 1).branch_target().unwrap_or_default();
            if jump_target == self.stmt_pc(s) {
                self.loops.push(LoopTargets {
                    continue_pc: self.stmt_pc(s),
                    break_pc: target,
                });
                let body = self.block(s + 1, t - 1);
                self.loops.pop();
                self.hidden.insert(jump_pc);
                return (t, Node::While { cond, body });
            }
            if jump_target >= target
                && let Some(e) = self.stmt_index_at(jump_target).filter(|&e| e <= hi)
                && !(t - 1 == s + 1 && self.is_loop_exit(jump_target))
            {
                let then = self.block(s + 1, t - 1);
                let otherwise = self.block(t, e);
                self.hidden.insert(jump_pc);
                let else_pc = self.stmt_pc(t);
                let mut arms = vec![Arm { cond, body: then }];
                let node = match otherwise.as_slice() {
                    [
                        Node::If {
                            arms: inner,
                            otherwise: inner_else,
                        },
                    ] if !self.pinned.contains(&else_pc) => {
                        self.hidden.insert(else_pc);
                        arms.extend(inner.iter().cloned());
                        Node::If {
                            arms,
                            otherwise: inner_else.clone(),
                        }
                    }
                    _ => Node::If {
                        arms,
                        otherwise: Some(otherwise),
                    },
                };
                return (e, node);
            }
        }

        let body = self.block(s + 1, t);
        (
            t,
            Node::If {
                arms: vec![Arm { cond, body }],
                otherwise: None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, compile};
    use pretty_assertions::assert_eq;
    use qcode::{QcodeHeader, decode_all};

    fn shape(src: &str) -> String {
        let bytes = compile(src, &CompileOptions::default()).unwrap();
        let (header, offset) = QcodeHeader::decode(&bytes).unwrap();
        let (insns, _) = decode_all(&bytes[offset..]);
        let body = &insns[..insns.len() - 1];
        recover(body, header.code_size as usize - 1).shape()
    }

    #[test]
    fn plain_if() {
        assert_eq!(shape("IF A%=1\nB%=2\nENDIF"), "IF{}");
    }

    #[test]
    fn if_else() {
        assert_eq!(shape("IF A%=1\nB%=2\nELSE\nB%=3\nENDIF"), "IF{ELSE{}}");
    }

    #[test]
    fn elseif_chain() {
        let src = "IF A%=1\nB%=1\nELSEIF A%=2\nB%=2\nELSEIF A%=3\nB%=3\nELSE\nB%=4\nENDIF";
        assert_eq!(shape(src), "IF{ELSEIF{}ELSEIF{}ELSE{}}");
    }

    #[test]
    fn while_with_break_and_continue() {
        let src = "WHILE A%<10\nA%=A%+1\nIF A%=3\nCONTINUE\nENDIF\nIF A%=7\nBREAK\nENDIF\nENDWH";
        assert_eq!(shape(src), "WHILE{IF{CONTINUE;}IF{BREAK;}}");
    }

    #[test]
    fn do_until_with_nested_if_else() {
        let src = "DO\nIF X>1\nX=X-1\nELSE\nX=X+2\nENDIF\nUNTIL X=5";
        assert_eq!(shape(src), "DO{IF{ELSE{}}}");
    }

    #[test]
    fn do_continue_and_break() {
        let src = "DO\nIF A%=1\nCONTINUE\nENDIF\nIF A%=2\nBREAK\nENDIF\nA%=A%+1\nUNTIL A%>9";
        assert_eq!(shape(src), "DO{IF{CONTINUE;}IF{BREAK;}}");
    }

    #[test]
    fn nested_loops() {
        let src = "WHILE A%<3\nDO\nB%=B%+1\nUNTIL B%=2\nA%=A%+1\nENDWH";
        assert_eq!(shape(src), "WHILE{DO{}}");
    }

    #[test]
    fn goto_falls_back_to_labels() {
        let src = "TOP::\nA%=A%+1\nGOTO TOP";
        let bytes = compile(src, &CompileOptions::default()).unwrap();
        let (header, offset) = QcodeHeader::decode(&bytes).unwrap();
        let (insns, _) = decode_all(&bytes[offset..]);
        let structure = recover(&insns[..insns.len() - 1], header.code_size as usize - 1);
        assert_eq!(structure.shape(), "GOTO;");
        assert_eq!(structure.label_targets.iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn label_on_else_jump_keeps_the_jump() {
        let src = "IF A%=1\nGOTO L\nB%=2\nL::\nELSE\nB%=3\nENDIF";
        assert_eq!(shape(src), "IF{GOTO;GOTO;}");
    }

    #[test]
    fn label_on_loop_back_jump_keeps_the_jump() {
        let src = "GOTO L\nWHILE A%<3\nA%=A%+1\nL::\nENDWH";
        assert_eq!(shape(src), "GOTO;IF{GOTO;}");
    }

    #[test]
    fn label_before_nested_if_keeps_else() {
        let src = "IF A%=1\nB%=1\nELSE\nL::\nIF A%=2\nB%=2\nENDIF\nENDIF\nGOTO L";
        assert_eq!(shape(src), "IF{ELSE{IF{}}}GOTO;");
    }

    #[test]
    fn print_items_form_one_statement() {
        let bytes = compile("PRINT 1;\"A\",2", &CompileOptions::default()).unwrap();
        let (_, offset) = QcodeHeader::decode(&bytes).unwrap();
        let (insns, _) = decode_all(&bytes[offset..]);
        let stmts = split_statements(&insns[..insns.len() - 1]);
        assert_eq!(stmts.len(), 1);
    }
}
