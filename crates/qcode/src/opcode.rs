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

//! The QCode instruction set: a static, read-only table describing, for every opcode byte, its
//! mnemonic, how its operands are laid out in the code stream, and how it affects the value stack.

use lazy_static::lazy_static;
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumIter, IntoEnumIterator};

use crate::types::VarType;
use crate::types::VarType::{Float as F, Int as I, Str as S};

/// Operand layout following an opcode byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandSpec {
    None,
    Byte,
    /// Big-endian 16-bit word (frame addresses, integer literals).
    Word,
    /// Length-prefixed byte string.
    Str,
    /// Compact float; the leading length byte (sign bit masked) gives the remaining byte count.
    Float,
    /// One byte when below `0x80`, otherwise two bytes with the top bit of the first cleared.
    VarInt,
    /// Signed 16-bit displacement relative to the end of the displacement word.
    Branch,
    /// Argument count byte followed by a length-prefixed procedure name.
    ProcCall,
    /// Logical-file byte, then `[type][name]` records up to `FIELD_LIST_END`.
    FieldList,
}

/// Sentinel closing the field list of `OPEN` / `CREATE`.
pub const FIELD_LIST_END: u8 = 0x88;

/// Threshold at which a `VarInt` operand switches to its two-byte form.
pub const VARINT_WIDE: u8 = 0x80;

/// How many values an instruction pops from the stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arity {
    Fixed(u8),
    /// The count comes from the instruction's operand (procedure calls, list functions).
    FromOperand,
}

/// Operators in the order their opcodes appear within each type family.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumIter)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Not,
    And,
    Or,
}

impl Operator {
    fn family_index(self) -> u8 {
        self as u8
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Ne => "<>",
            Operator::Eq => "=",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "**",
            Operator::Neg => "-",
            Operator::Not => "NOT",
            Operator::And => "AND",
            Operator::Or => "OR",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Neg | Operator::Not)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge | Operator::Ne | Operator::Eq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Operator::Not | Operator::And | Operator::Or)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrintChannel {
    Screen,
    Printer,
}

impl PrintChannel {
    pub fn keyword(self) -> &'static str {
        match self {
            PrintChannel::Screen => "PRINT",
            PrintChannel::Printer => "LPRINT",
        }
    }

    fn base(self) -> u8 {
        match self {
            PrintChannel::Screen => 0x6F,
            PrintChannel::Printer => 0x74,
        }
    }
}

/// What an instruction means, at the granularity the compiler and decompiler care about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpClass {
    PushValue { ty: VarType, external: bool },
    PushAddress { ty: VarType, external: bool },
    FieldValue(VarType),
    FieldAddress(VarType),
    Literal(VarType),
    Operator { op: Operator, family: VarType },
    /// A statement keyword taking its arguments from the stack (and possibly an immediate).
    Command,
    PrintItem(PrintChannel, VarType),
    PrintComma(PrintChannel),
    PrintNewline(PrintChannel),
    Input(VarType),
    Edit,
    ReturnValue,
    ReturnDefault(VarType),
    Call,
    BranchIfFalse,
    Goto,
    OnErr,
    Assign(VarType),
    Drop(VarType),
    Convert { to: VarType },
    Addr,
    Function(VarType),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub code: u8,
    pub mnemonic: &'static str,
    pub operands: OperandSpec,
    pub pops: Arity,
    pub pushes: u8,
    pub class: OpClass,
    /// Argument types of functions and commands, in source order.
    pub args: &'static [VarType],
    /// Only available on the extended instruction set.
    pub extended: bool,
}

/// A QCode opcode byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const PUSH_BYTE: Opcode = Opcode(0x20);
    pub const PUSH_INT: Opcode = Opcode(0x22);
    pub const PUSH_FLOAT: Opcode = Opcode(0x23);
    pub const PUSH_STR: Opcode = Opcode(0x24);
    pub const AT: Opcode = Opcode(0x4C);
    pub const CURSOR: Opcode = Opcode(0x4F);
    pub const ESCAPE: Opcode = Opcode(0x50);
    pub const GOTO: Opcode = Opcode(0x51);
    pub const ONERR: Opcode = Opcode(0x53);
    pub const CREATE: Opcode = Opcode(0x5E);
    pub const OPEN: Opcode = Opcode(0x65);
    pub const USE: Opcode = Opcode(0x69);
    pub const EDIT: Opcode = Opcode(0x6B);
    pub const RETURN: Opcode = Opcode(0x79);
    pub const CALL: Opcode = Opcode(0x7D);
    pub const BRANCH_IF_FALSE: Opcode = Opcode(0x7E);
    pub const INT_TO_FLOAT: Opcode = Opcode(0x85);
    pub const FLOAT_TO_INT: Opcode = Opcode(0x86);
    pub const ADDR: Opcode = Opcode(0x87);

    pub fn info(self) -> Option<&'static OpcodeInfo> {
        opcode_info(self.0)
    }

    pub fn push_value(ty: VarType, external: bool) -> Opcode {
        Opcode(if external { 0x06 } else { 0x00 } + ty.group_index())
    }

    pub fn push_address(ty: VarType, external: bool) -> Opcode {
        Opcode(if external { 0x15 } else { 0x0F } + ty.group_index())
    }

    pub fn field_value(ty: VarType) -> Opcode {
        Opcode(0x0C + ty.scalar().group_index())
    }

    pub fn field_address(ty: VarType) -> Opcode {
        Opcode(0x1B + ty.scalar().group_index())
    }

    /// The opcode for `op` in the family of `family`, if that family has one.
    pub fn operator(op: Operator, family: VarType) -> Option<Opcode> {
        let idx = op.family_index();
        match family.scalar() {
            VarType::Int => Some(Opcode(0x27 + idx)),
            VarType::Float => Some(Opcode(0x36 + idx)),
            VarType::Str if idx <= Operator::Add.family_index() => Some(Opcode(0x45 + idx)),
            _ => None,
        }
    }

    pub fn print_item(channel: PrintChannel, ty: VarType) -> Opcode {
        Opcode(channel.base() + ty.scalar().group_index())
    }

    pub fn print_comma(channel: PrintChannel) -> Opcode {
        Opcode(channel.base() + 3)
    }

    pub fn print_newline(channel: PrintChannel) -> Opcode {
        Opcode(channel.base() + 4)
    }

    pub fn input(ty: VarType) -> Opcode {
        Opcode(0x6C + ty.scalar().group_index())
    }

    pub fn return_default(ty: VarType) -> Opcode {
        Opcode(0x7A + ty.scalar().group_index())
    }

    pub fn assign(ty: VarType) -> Opcode {
        Opcode(0x7F + ty.scalar().group_index())
    }

    pub fn drop(ty: VarType) -> Opcode {
        Opcode(0x82 + ty.scalar().group_index())
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.info() {
            Some(info) => write!(f, "{}", info.mnemonic),
            None => write!(f, "${:02X}", self.0),
        }
    }
}

lazy_static! {
    static ref OPCODE_TABLE: [Option<OpcodeInfo>; 256] = mk_opcode_table();
}

pub fn opcode_info(code: u8) -> Option<&'static OpcodeInfo> {
    OPCODE_TABLE[code as usize].as_ref()
}

/// Every defined opcode, in byte order.
pub fn opcodes() -> impl Iterator<Item = &'static OpcodeInfo> {
    OPCODE_TABLE.iter().flatten()
}

const VALUE_MNEMONICS: [&str; 6] = ["VAL.I", "VAL.F", "VAL.S", "VAL.IA", "VAL.FA", "VAL.SA"];
const EXT_VALUE_MNEMONICS: [&str; 6] =
    ["XVAL.I", "XVAL.F", "XVAL.S", "XVAL.IA", "XVAL.FA", "XVAL.SA"];
const REF_MNEMONICS: [&str; 6] = ["REF.I", "REF.F", "REF.S", "REF.IA", "REF.FA", "REF.SA"];
const EXT_REF_MNEMONICS: [&str; 6] =
    ["XREF.I", "XREF.F", "XREF.S", "XREF.IA", "XREF.FA", "XREF.SA"];
const INT_OP_MNEMONICS: [&str; 15] = [
    "LT.I", "LE.I", "GT.I", "GE.I", "NE.I", "EQ.I", "ADD.I", "SUB.I", "MUL.I", "DIV.I", "POW.I",
    "NEG.I", "NOT.I", "AND.I", "OR.I",
];
const FLOAT_OP_MNEMONICS: [&str; 15] = [
    "LT.F", "LE.F", "GT.F", "GE.F", "NE.F", "EQ.F", "ADD.F", "SUB.F", "MUL.F", "DIV.F", "POW.F",
    "NEG.F", "NOT.F", "AND.F", "OR.F",
];
const STR_OP_MNEMONICS: [&str; 7] = ["LT.S", "LE.S", "GT.S", "GE.S", "NE.S", "EQ.S", "CAT.S"];

/// (code, name, argument types, result type, extended-only)
const FUNCTIONS: &[(u8, &str, &[VarType], VarType, bool)] = &[
    (0x88, "ASC", &[S], I, false),
    (0x89, "CLOCK", &[I], I, false),
    (0x8A, "DAY", &[], I, false),
    (0x8B, "DISP", &[I, S], I, false),
    (0x8C, "ERR", &[], I, false),
    (0x8D, "FIND", &[S], I, false),
    (0x8E, "FREE", &[], I, false),
    (0x8F, "GET", &[], I, false),
    (0x90, "HOUR", &[], I, false),
    (0x91, "IABS", &[I], I, false),
    (0x92, "INT", &[F], I, false),
    (0x93, "KEY", &[], I, false),
    (0x94, "LEN", &[S], I, false),
    (0x95, "LOC", &[S, S], I, false),
    (0x96, "MENU", &[S], I, false),
    (0x97, "MINUTE", &[], I, false),
    (0x98, "MONTH", &[], I, false),
    (0x99, "PEEKB", &[I], I, false),
    (0x9A, "PEEKW", &[I], I, false),
    (0x9B, "RECSIZE", &[], I, false),
    (0x9C, "SECOND", &[], I, false),
    (0x9D, "USR", &[I, I], I, false),
    (0x9E, "VIEW", &[I, S], I, false),
    (0x9F, "YEAR", &[], I, false),
    (0xA0, "COUNT", &[], I, false),
    (0xA1, "EOF", &[], I, false),
    (0xA2, "EXIST", &[S], I, false),
    (0xA3, "POS", &[], I, false),
    (0xA4, "ABS", &[F], F, false),
    (0xA5, "ATAN", &[F], F, false),
    (0xA6, "COS", &[F], F, false),
    (0xA7, "DEG", &[F], F, false),
    (0xA8, "EXP", &[F], F, false),
    (0xA9, "FLT", &[I], F, false),
    (0xAA, "INTF", &[F], F, false),
    (0xAB, "LN", &[F], F, false),
    (0xAC, "LOG", &[F], F, false),
    (0xAD, "PI", &[], F, false),
    (0xAE, "RAD", &[F], F, false),
    (0xAF, "RND", &[], F, false),
    (0xB0, "SIN", &[F], F, false),
    (0xB1, "SQR", &[F], F, false),
    (0xB2, "TAN", &[F], F, false),
    (0xB3, "VAL", &[S], F, false),
    (0xB4, "CHR$", &[I], S, false),
    (0xB5, "DATIM$", &[], S, false),
    (0xB6, "ERR$", &[I], S, false),
    (0xB7, "FIX$", &[F, I, I], S, false),
    (0xB8, "GEN$", &[F, I], S, false),
    (0xB9, "GET$", &[], S, false),
    (0xBA, "HEX$", &[I], S, false),
    (0xBB, "KEY$", &[], S, false),
    (0xBC, "LEFT$", &[S, I], S, false),
    (0xBD, "LOWER$", &[S], S, false),
    (0xBE, "MID$", &[S, I, I], S, false),
    (0xBF, "NUM$", &[F, I], S, false),
    (0xC0, "RIGHT$", &[S, I], S, false),
    (0xC1, "REPT$", &[S, I], S, false),
    (0xC2, "SCI$", &[F, I, I], S, false),
    (0xC3, "UPPER$", &[S], S, false),
    (0xC4, "USR$", &[I, I], S, false),
    (0xC5, "DIR$", &[S], S, false),
    (0xD1, "DOW", &[I, I, I], I, true),
    (0xD2, "FINDW", &[S], I, true),
    (0xD3, "MENUN", &[I, S], I, true),
    (0xD4, "WEEK", &[I, I, I], I, true),
    (0xD5, "ACOS", &[F], F, true),
    (0xD6, "ASIN", &[F], F, true),
    (0xD7, "DAYS", &[I, I, I], F, true),
    (0xDE, "DAYNAME$", &[I], S, true),
    (0xDF, "DIRW$", &[S], S, true),
    (0xE0, "MONTH$", &[I], S, true),
];

/// List functions taking any number of float arguments; the count is a `VarInt` operand.
const LIST_FUNCTIONS: &[(u8, &str)] = &[
    (0xD8, "MAX"),
    (0xD9, "MEAN"),
    (0xDA, "MIN"),
    (0xDB, "STD"),
    (0xDC, "SUM"),
    (0xDD, "VAR"),
];

const LIST_ARGS: &[VarType] = &[F];

/// (code, keyword, operands, argument types, extended-only)
const COMMANDS: &[(u8, &str, OperandSpec, &[VarType], bool)] = &[
    (0x4C, "AT", OperandSpec::None, &[I, I], false),
    (0x4D, "BEEP", OperandSpec::None, &[I, I], false),
    (0x4E, "CLS", OperandSpec::None, &[], false),
    (0x4F, "CURSOR", OperandSpec::Byte, &[], false),
    (0x50, "ESCAPE", OperandSpec::Byte, &[], false),
    (0x52, "OFF", OperandSpec::None, &[], false),
    (0x54, "PAUSE", OperandSpec::None, &[I], false),
    (0x55, "POKEB", OperandSpec::None, &[I, I], false),
    (0x56, "POKEW", OperandSpec::None, &[I, I], false),
    (0x57, "RAISE", OperandSpec::None, &[I], false),
    (0x58, "RANDOMIZE", OperandSpec::None, &[F], false),
    (0x59, "STOP", OperandSpec::None, &[], false),
    (0x5B, "APPEND", OperandSpec::None, &[], false),
    (0x5C, "CLOSE", OperandSpec::None, &[], false),
    (0x5D, "COPY", OperandSpec::None, &[S, S], false),
    (0x5E, "CREATE", OperandSpec::FieldList, &[S], false),
    (0x5F, "DELETE", OperandSpec::None, &[S], false),
    (0x60, "ERASE", OperandSpec::None, &[], false),
    (0x61, "FIRST", OperandSpec::None, &[], false),
    (0x62, "LAST", OperandSpec::None, &[], false),
    (0x63, "NEXT", OperandSpec::None, &[], false),
    (0x64, "BACK", OperandSpec::None, &[], false),
    (0x65, "OPEN", OperandSpec::FieldList, &[S], false),
    (0x66, "POSITION", OperandSpec::None, &[I], false),
    (0x67, "RENAME", OperandSpec::None, &[S, S], false),
    (0x68, "UPDATE", OperandSpec::None, &[], false),
    (0x69, "USE", OperandSpec::Byte, &[], false),
    (0x6A, "KSTAT", OperandSpec::None, &[I], false),
    (0xD0, "UDG", OperandSpec::None, &[I, I, I, I, I, I, I, I, I], true),
];

fn mk_opcode_table() -> [Option<OpcodeInfo>; 256] {
    let mut table: [Option<OpcodeInfo>; 256] = [None; 256];
    let mut def = |code: u8,
                   mnemonic: &'static str,
                   operands: OperandSpec,
                   pops: Arity,
                   pushes: u8,
                   class: OpClass| {
        table[code as usize] = Some(OpcodeInfo {
            code,
            mnemonic,
            operands,
            pops,
            pushes,
            class,
            args: &[],
            extended: false,
        });
    };

    for (i, ty) in VarType::iter().enumerate() {
        let index_pops = Arity::Fixed(if ty.is_array() { 1 } else { 0 });
        let n = i as u8;
        def(
            0x00 + n,
            VALUE_MNEMONICS[i],
            OperandSpec::Word,
            index_pops,
            1,
            OpClass::PushValue { ty, external: false },
        );
        def(
            0x06 + n,
            EXT_VALUE_MNEMONICS[i],
            OperandSpec::Word,
            index_pops,
            1,
            OpClass::PushValue { ty, external: true },
        );
        def(
            0x0F + n,
            REF_MNEMONICS[i],
            OperandSpec::Word,
            index_pops,
            1,
            OpClass::PushAddress { ty, external: false },
        );
        def(
            0x15 + n,
            EXT_REF_MNEMONICS[i],
            OperandSpec::Word,
            index_pops,
            1,
            OpClass::PushAddress { ty, external: true },
        );
    }

    let field_mnemonics = [("FLD.I", "FREF.I"), ("FLD.F", "FREF.F"), ("FLD.S", "FREF.S")];
    for (i, (ty, (value, address))) in VarType::iter().zip(field_mnemonics).enumerate() {
        let n = i as u8;
        def(0x0C + n, value, OperandSpec::Byte, Arity::Fixed(1), 1, OpClass::FieldValue(ty));
        def(0x1B + n, address, OperandSpec::Byte, Arity::Fixed(1), 1, OpClass::FieldAddress(ty));
    }

    def(0x20, "PUSH.B", OperandSpec::Byte, Arity::Fixed(0), 1, OpClass::Literal(VarType::Int));
    def(0x22, "PUSH.I", OperandSpec::Word, Arity::Fixed(0), 1, OpClass::Literal(VarType::Int));
    def(0x23, "PUSH.F", OperandSpec::Float, Arity::Fixed(0), 1, OpClass::Literal(VarType::Float));
    def(0x24, "PUSH.S", OperandSpec::Str, Arity::Fixed(0), 1, OpClass::Literal(VarType::Str));

    for (family, base, mnemonics) in [
        (VarType::Int, 0x27u8, &INT_OP_MNEMONICS[..]),
        (VarType::Float, 0x36, &FLOAT_OP_MNEMONICS[..]),
        (VarType::Str, 0x45, &STR_OP_MNEMONICS[..]),
    ] {
        for (i, (op, mnemonic)) in Operator::iter().zip(mnemonics.iter().copied()).enumerate() {
            let pops = if op.is_unary() { 1 } else { 2 };
            def(
                base + i as u8,
                mnemonic,
                OperandSpec::None,
                Arity::Fixed(pops),
                1,
                OpClass::Operator { op, family },
            );
        }
    }

    for &(code, keyword, operands, args, _) in COMMANDS {
        def(code, keyword, operands, Arity::Fixed(args.len() as u8), 0, OpClass::Command);
    }
    def(0x51, "GOTO", OperandSpec::Branch, Arity::Fixed(0), 0, OpClass::Goto);
    def(0x53, "ONERR", OperandSpec::Branch, Arity::Fixed(0), 0, OpClass::OnErr);
    def(0x6B, "EDIT", OperandSpec::None, Arity::Fixed(1), 0, OpClass::Edit);

    for (i, ty) in VarType::iter().take(3).enumerate() {
        let n = i as u8;
        def(0x6C + n, "INPUT", OperandSpec::None, Arity::Fixed(1), 0, OpClass::Input(ty));
        for channel in [PrintChannel::Screen, PrintChannel::Printer] {
            def(
                channel.base() + n,
                channel.keyword(),
                OperandSpec::None,
                Arity::Fixed(1),
                0,
                OpClass::PrintItem(channel, ty),
            );
        }
        let return_default = OpClass::ReturnDefault(ty);
        def(0x7A + n, "RETURN.Z", OperandSpec::None, Arity::Fixed(0), 0, return_default);
        def(0x7F + n, "ASSIGN", OperandSpec::None, Arity::Fixed(2), 0, OpClass::Assign(ty));
        def(0x82 + n, "DROP", OperandSpec::None, Arity::Fixed(1), 0, OpClass::Drop(ty));
    }
    for channel in [PrintChannel::Screen, PrintChannel::Printer] {
        def(
            channel.base() + 3,
            channel.keyword(),
            OperandSpec::None,
            Arity::Fixed(0),
            0,
            OpClass::PrintComma(channel),
        );
        def(
            channel.base() + 4,
            channel.keyword(),
            OperandSpec::None,
            Arity::Fixed(0),
            0,
            OpClass::PrintNewline(channel),
        );
    }

    def(0x79, "RETURN", OperandSpec::None, Arity::Fixed(1), 0, OpClass::ReturnValue);
    def(0x7D, "CALL", OperandSpec::ProcCall, Arity::FromOperand, 1, OpClass::Call);
    def(0x7E, "BRAF", OperandSpec::Branch, Arity::Fixed(1), 0, OpClass::BranchIfFalse);
    let to_float = OpClass::Convert { to: VarType::Float };
    def(0x85, "ITOF", OperandSpec::None, Arity::Fixed(1), 1, to_float);
    def(0x86, "FTOI", OperandSpec::None, Arity::Fixed(1), 1, OpClass::Convert { to: VarType::Int });
    def(0x87, "ADDR", OperandSpec::None, Arity::Fixed(1), 1, OpClass::Addr);

    for &(code, name, args, result, _) in FUNCTIONS {
        let pops = Arity::Fixed(args.len() as u8);
        def(code, name, OperandSpec::None, pops, 1, OpClass::Function(result));
    }
    for &(code, name) in LIST_FUNCTIONS {
        let class = OpClass::Function(VarType::Float);
        def(code, name, OperandSpec::VarInt, Arity::FromOperand, 1, class);
    }

    let arguments = COMMANDS
        .iter()
        .map(|c| (c.0, c.3))
        .chain(FUNCTIONS.iter().map(|f| (f.0, f.2)))
        .chain(LIST_FUNCTIONS.iter().map(|f| (f.0, LIST_ARGS)));
    for (code, args) in arguments {
        if let Some(info) = table[code as usize].as_mut() {
            info.args = args;
        }
    }

    let extended = COMMANDS
        .iter()
        .filter(|c| c.4)
        .map(|c| c.0)
        .chain(FUNCTIONS.iter().filter(|f| f.4).map(|f| f.0))
        .chain(LIST_FUNCTIONS.iter().map(|f| f.0))
        .collect::<Vec<_>>();
    for code in extended {
        if let Some(info) = table[code as usize].as_mut() {
            info.extended = true;
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn table_codes_are_consistent() {
        for info in opcodes() {
            assert_eq!(Opcode(info.code).info(), Some(info));
        }
    }

    #[test_case(VarType::Int, false, 0x00)]
    #[test_case(VarType::StrArray, false, 0x05)]
    #[test_case(VarType::Float, true, 0x07)]
    #[test_case(VarType::IntArray, true, 0x09)]
    fn push_value_codes(ty: VarType, external: bool, code: u8) {
        let op = Opcode::push_value(ty, external);
        assert_eq!(op, Opcode(code));
        assert_eq!(
            op.info().map(|i| i.class),
            Some(OpClass::PushValue { ty, external })
        );
    }

    #[test]
    fn operator_families() {
        assert_eq!(Opcode::operator(Operator::Add, VarType::Int), Some(Opcode(0x2D)));
        assert_eq!(Opcode::operator(Operator::Eq, VarType::Float), Some(Opcode(0x3B)));
        assert_eq!(Opcode::operator(Operator::Add, VarType::Str), Some(Opcode(0x4B)));
        assert_eq!(Opcode::operator(Operator::Mul, VarType::Str), None);
        for op in Operator::iter() {
            let code = Opcode::operator(op, VarType::Float).unwrap();
            assert_eq!(
                code.info().unwrap().class,
                OpClass::Operator { op, family: VarType::Float }
            );
        }
    }

    #[test]
    fn statement_opcodes_land_on_their_class() {
        assert_eq!(
            Opcode::print_item(PrintChannel::Screen, VarType::Str).info().unwrap().class,
            OpClass::PrintItem(PrintChannel::Screen, VarType::Str)
        );
        assert_eq!(
            Opcode::print_newline(PrintChannel::Printer).info().unwrap().class,
            OpClass::PrintNewline(PrintChannel::Printer)
        );
        assert_eq!(
            Opcode::assign(VarType::Float).info().unwrap().class,
            OpClass::Assign(VarType::Float)
        );
        assert_eq!(
            Opcode::return_default(VarType::Str).info().unwrap().class,
            OpClass::ReturnDefault(VarType::Str)
        );
    }

    #[test]
    fn extended_flags() {
        assert!(Opcode(0xD8).info().unwrap().extended);
        assert!(Opcode(0xD0).info().unwrap().extended);
        assert!(!Opcode(0x94).info().unwrap().extended);
        assert!(Opcode(0x5A).info().is_none());
    }

    #[test]
    fn argument_types_match_pops() {
        for info in opcodes() {
            match info.class {
                OpClass::Function(_) | OpClass::Command => match info.pops {
                    Arity::Fixed(n) => assert_eq!(info.args.len(), n as usize, "{}", info.mnemonic),
                    Arity::FromOperand => assert_eq!(info.args, &[VarType::Float]),
                },
                _ => assert!(info.args.is_empty(), "{}", info.mnemonic),
            }
        }
        let mid = Opcode(0xBE).info().unwrap();
        assert_eq!(mid.args, &[VarType::Str, VarType::Int, VarType::Int]);
        assert_eq!(Opcode::OPEN.info().unwrap().args, &[VarType::Str]);
        assert!(Opcode::USE.info().unwrap().args.is_empty());
    }
}
