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

//! Source text to a flat token stream, one `EndOfLine` per physical line.

use std::fmt::{Display, Formatter};

use crate::errors::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Integer,
    Float,
    Str,
    Identifier,
    Keyword,
    Operator,
    Punctuation,
    EndOfLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source spelling. For strings, the unquoted value.
    pub text: String,
    pub line: usize,
}

impl Token {
    /// Normalized spelling used for keyword, operator and symbol matching.
    pub fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(kw)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == p
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text.eq_ignore_ascii_case(op)
    }

    pub fn is_eol(&self) -> bool {
        self.kind == TokenKind::EndOfLine
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::EndOfLine => write!(f, "end of line"),
            TokenKind::Str => write!(f, "\"{}\"", self.text),
            _ => write!(f, "{}", self.text),
        }
    }
}

pub const COMMENT_KEYWORD: &str = "REM";

/// Prefix introducing a hexadecimal integer literal.
pub const HEX_PREFIX: char = '$';

const KEYWORDS: &[&str] = &[
    "PROC", "ENDP", "GLOBAL", "LOCAL", "EXTERNAL", "IF", "ELSEIF", "ELSE", "ENDIF", "WHILE",
    "ENDWH", "DO", "UNTIL", "BREAK", "CONTINUE", "GOTO", "ONERR", "RETURN", "PRINT", "LPRINT",
    "INPUT", "EDIT", "ON", "OFF", "AT", "BEEP", "CLS", "CURSOR", "ESCAPE", "PAUSE", "POKEB",
    "POKEW", "RAISE", "RANDOMIZE", "STOP", "APPEND", "CLOSE", "COPY", "CREATE", "DELETE",
    "ERASE", "FIRST", "LAST", "NEXT", "BACK", "OPEN", "POSITION", "RENAME", "UPDATE", "USE",
    "KSTAT", "UDG",
];

const WORD_OPERATORS: &[&str] = &["AND", "OR", "NOT"];

const TWO_CHAR_OPERATORS: &[&str] = &["<=", ">=", "<>", "**"];

pub fn is_keyword(upper: &str) -> bool {
    KEYWORDS.contains(&upper)
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = vec![];
    for (idx, line) in source.lines().enumerate() {
        tokenize_line(line, idx + 1, &mut tokens)?;
        tokens.push(Token {
            kind: TokenKind::EndOfLine,
            text: String::new(),
            line: idx + 1,
        });
    }
    Ok(tokens)
}

fn tokenize_line(line: &str, lineno: usize, out: &mut Vec<Token>) -> Result<(), CompileError> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let push = |out: &mut Vec<Token>, kind, text: String| {
        out.push(Token {
            kind,
            text,
            line: lineno,
        })
    };
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == '%' || chars[i] == '$') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let upper = text.to_ascii_uppercase();
            let preceded_by_space = start == 0 || chars[start - 1].is_whitespace();
            if upper == COMMENT_KEYWORD && preceded_by_space {
                return Ok(());
            }
            let kind = if WORD_OPERATORS.contains(&upper.as_str()) {
                TokenKind::Operator
            } else if is_keyword(&upper) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            push(out, kind, text);
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let (kind, len) = scan_number(&chars[i..]);
            push(out, kind, chars[i..i + len].iter().collect());
            i += len;
            continue;
        }

        if c == HEX_PREFIX && chars.get(i + 1).is_some_and(char::is_ascii_hexdigit) {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_hexdigit() {
                i += 1;
            }
            push(out, TokenKind::Integer, chars[start..i].iter().collect());
            continue;
        }

        if c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(CompileError::UnterminatedString { line: lineno }),
                    Some('"') if chars.get(i + 1) == Some(&'"') => {
                        value.push('"');
                        i += 2;
                    }
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            push(out, TokenKind::Str, value);
            continue;
        }

        if let Some(two) = chars.get(i..i + 2) {
            let two: String = two.iter().collect();
            if TWO_CHAR_OPERATORS.contains(&two.as_str()) {
                push(out, TokenKind::Operator, two);
                i += 2;
                continue;
            }
            if two == "::" {
                push(out, TokenKind::Punctuation, two);
                i += 2;
                continue;
            }
        }

        let kind = match c {
            '+' | '-' | '*' | '/' | '=' | '<' | '>' => TokenKind::Operator,
            '(' | ')' | ',' | ';' | ':' | '.' | '#' => TokenKind::Punctuation,
            _ => {
                return Err(CompileError::UnexpectedToken {
                    line: lineno,
                    found: c.to_string(),
                    expected: "a token",
                });
            }
        };
        push(out, kind, c.to_string());
        i += 1;
    }
    Ok(())
}

/// Length and kind of the numeric literal at the start of `chars`.
fn scan_number(chars: &[char]) -> (TokenKind, usize) {
    let digits = |from: usize| {
        chars[from..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .count()
    };
    let mut len = digits(0);
    let mut kind = TokenKind::Integer;
    if chars.get(len) == Some(&'.') {
        kind = TokenKind::Float;
        len += 1;
        len += digits(len);
    }
    if matches!(chars.get(len), Some('E') | Some('e')) {
        let mut exp = len + 1;
        if matches!(chars.get(exp), Some('+') | Some('-')) {
            exp += 1;
        }
        let n = digits(exp);
        if n > 0 {
            kind = TokenKind::Float;
            len = exp + n;
        }
    }
    (kind, len)
}

/// A cursor over a token slice, shared by the declaration pass and the code generator.
pub struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    pub fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// Line of the current token, or of the last one at end of input.
    pub fn line(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    pub fn expect(&mut self, expected: &'static str) -> Result<&'a Token, CompileError> {
        self.next().ok_or(CompileError::UnexpectedEnd { expected })
    }

    pub fn expect_punct(&mut self, p: &'static str) -> Result<(), CompileError> {
        let t = self.expect(p)?;
        if t.is_punct(p) {
            Ok(())
        } else {
            Err(unexpected(t, p))
        }
    }

    pub fn expect_identifier(&mut self) -> Result<&'a Token, CompileError> {
        let t = self.expect("an identifier")?;
        if t.kind == TokenKind::Identifier {
            Ok(t)
        } else {
            Err(unexpected(t, "an identifier"))
        }
    }

    pub fn expect_eol(&mut self) -> Result<(), CompileError> {
        match self.next() {
            None => Ok(()),
            Some(t) if t.is_eol() => Ok(()),
            Some(t) => Err(unexpected(t, "end of line")),
        }
    }

    /// Consume `p` if it is the next token.
    pub fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn at_eol(&self) -> bool {
        self.peek().is_none_or(Token::is_eol)
    }

    pub fn skip_line(&mut self) {
        while let Some(t) = self.next() {
            if t.is_eol() {
                break;
            }
        }
    }
}

pub fn unexpected(t: &Token, expected: &'static str) -> CompileError {
    CompileError::UnexpectedToken {
        line: t.line,
        found: t.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn greedy_two_char_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("A%<=B**2<>C"),
            vec![
                (Identifier, "A%".into()),
                (Operator, "<=".into()),
                (Identifier, "B".into()),
                (Operator, "**".into()),
                (Integer, "2".into()),
                (Operator, "<>".into()),
                (Identifier, "C".into()),
                (EndOfLine, "".into()),
            ]
        );
    }

    #[test]
    fn comments_and_empty_lines_still_end_lines() {
        let tokens = tokenize("REM whole line\n\nA=1 REM trailing").unwrap();
        let eols = tokens.iter().filter(|t| t.is_eol()).count();
        assert_eq!(eols, 3);
        assert_eq!(tokens[2].text, "A");
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn keywords_keep_display_case() {
        let tokens = tokenize("while x and Not y").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[0].text, "while");
        assert!(tokens[0].is_keyword("WHILE"));
        assert_eq!(tokens[2].kind, TokenKind::Operator);
        assert!(tokens[3].is_op("NOT"));
    }

    #[test]
    fn numeric_literals() {
        use TokenKind::*;
        assert_eq!(
            kinds("12 1.5 .25 1E-3 $1F"),
            vec![
                (Integer, "12".into()),
                (Float, "1.5".into()),
                (Float, ".25".into()),
                (Float, "1E-3".into()),
                (Integer, "$1F".into()),
                (EndOfLine, "".into()),
            ]
        );
    }

    #[test]
    fn strings_with_doubled_quotes() {
        let tokens = tokenize(r#"PRINT "SAY ""HI""""#).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Str);
        assert_eq!(tokens[1].text, r#"SAY "HI""#);
    }

    #[test]
    fn unterminated_string() {
        assert_eq!(
            tokenize("A$=\"OPEN\nB=1"),
            Err(CompileError::UnterminatedString { line: 1 })
        );
    }

    #[test]
    fn labels_and_calls() {
        let tokens = tokenize("LOOP:: FOO%:(1)").unwrap();
        assert!(tokens[1].is_punct("::"));
        assert!(tokens[3].is_punct(":"));
        assert!(tokens[4].is_punct("("));
    }
}
