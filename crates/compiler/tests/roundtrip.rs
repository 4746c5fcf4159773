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

//! Compile, decompile, recompile: the recovered source must rebuild the same procedure.

use opl_compiler::{CompileOptions, compile, decompile, recover};
use pretty_assertions::assert_eq;
use qcode::{Instruction, OpClass, QcodeHeader, decode_all, decode_float, encode_float_text};
use test_case::test_case;
use unindent::unindent;

fn code(bytes: &[u8]) -> Vec<u8> {
    let (header, offset) = QcodeHeader::decode(bytes).unwrap();
    bytes[offset..offset + header.code_size as usize].to_vec()
}

fn instructions(bytes: &[u8]) -> Vec<Instruction> {
    let (insns, err) = decode_all(&code(bytes));
    assert!(err.is_none(), "{err:?}");
    insns
}

fn shape(bytes: &[u8]) -> String {
    let insns = instructions(bytes);
    let end = insns.last().unwrap().pc;
    recover(&insns[..insns.len() - 1], end).shape()
}

fn round_trip(src: &str) -> (Vec<u8>, String, Vec<u8>) {
    let first = compile(&unindent(src), &CompileOptions::default()).unwrap();
    let text = decompile(&first, "T").unwrap();
    let second = compile(&text, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("decompiled source does not compile: {e}\n{text}"));
    (first, text, second)
}

const NESTED: &str = r#"
    PROC T:
      LOCAL I%,J%,S$(20),X
      I%=0
      WHILE I%<10
        J%=0
        DO
          IF J%=3
            CONTINUE
          ENDIF
          IF I%*J%>20
            BREAK
          ELSEIF J%=I%
            PRINT I%;" ";J%
          ELSE
            X=X/2
          ENDIF
          J%=J%+1
        UNTIL J%>=5
        I%=I%+1
      ENDWH
      S$="DONE"
      PRINT S$,X
    ENDP
"#;

const FILES: &str = r#"
    PROC T%:(N%)
      LOCAL K$(10)
      OPEN "DATA",A,NAME$,AGE%
      FIRST
      WHILE NOT EOF
        IF A.AGE%>N%
          K$=A.NAME$
          PRINT K$
        ENDIF
        NEXT
      ENDWH
      CLOSE
      RETURN COUNT
    ENDP
"#;

const ARITH: &str = r#"
    PROC T:
      GLOBAL A%,B,C$(5)
      A%=-(2+3)*4-(5-1)
      B=2**3**2
      B=(2**3)**2
      B=-1.5E-3*B+2
      C$="Q"+CHR$(65)
      IF (A%<0 OR B>1.0) AND NOT (C$="")
        RAISE 1
      ENDIF
    ENDP
"#;

const LABELS: &str = r#"
    PROC T:
      LOCAL N%
      ONERR FAIL
      TOP::
      N%=N%+1
      IF N%<3
        GOTO TOP
      ENDIF
      ONERR OFF
      RETURN
      FAIL::
      PRINT ERR$(ERR)
    ENDP
"#;

const LABEL_BEFORE_ELSE: &str = r#"
    PROC T:
      LOCAL A%,B%
      IF A%=1
        GOTO L
        B%=2
        L::
      ELSE
        B%=3
      ENDIF
    ENDP
"#;

const LABEL_BEFORE_ENDWH: &str = r#"
    PROC T:
      LOCAL A%
      GOTO L
      WHILE A%<3
        A%=A%+1
        L::
      ENDWH
    ENDP
"#;

#[test_case(NESTED; "nested loops and conditionals")]
#[test_case(FILES; "files fields and parameters")]
#[test_case(ARITH; "operators and precedence")]
#[test_case(LABELS; "labels and error handlers")]
#[test_case(LABEL_BEFORE_ELSE; "label on the jump over else")]
#[test_case(LABEL_BEFORE_ENDWH; "label on the jump back to while")]
fn recompiles_identically(src: &str) {
    let (first, text, second) = round_trip(src);
    assert_eq!(shape(&first), shape(&second), "{text}");
    assert_eq!(code(&first), code(&second), "{text}");
}

#[test]
fn label_before_else_stays_in_the_then_part() {
    let (_, text, _) = round_trip(LABEL_BEFORE_ELSE);
    assert_eq!(
        text,
        unindent(
            r#"
            PROC T:
              LOCAL L1%,L2%
              IF L1%=1
                GOTO LBL1
                L2%=2
                LBL1::
                GOTO LBL2
              ENDIF
              L2%=3
              LBL2::
            ENDP
            "#
        )
    );
}

#[test]
fn nested_shape_is_recovered() {
    let (first, _, _) = round_trip(NESTED);
    assert_eq!(
        shape(&first),
        "WHILE{DO{IF{CONTINUE;}IF{BREAK;ELSEIF{}ELSE{}}}}"
    );
}

#[test_case("3.14159")]
#[test_case("-0.5")]
#[test_case("1E10")]
#[test_case("123456789012")]
#[test_case("0.000001")]
fn floats_survive_decoding(text: &str) {
    let encoded = encode_float_text(text).unwrap();
    let (decoded, len) = decode_float(&encoded).unwrap();
    assert_eq!(len, encoded.len());
    assert_eq!(encode_float_text(&decoded).unwrap(), encoded);

    let (first, _, second) = round_trip(&format!("PROC T:\nLOCAL X\nX={text}\nENDP"));
    assert_eq!(code(&first), code(&second));
}

#[test_case(NESTED)]
#[test_case(LABELS)]
fn branches_land_on_instruction_boundaries(src: &str) {
    let bytes = compile(&unindent(src), &CompileOptions::default()).unwrap();
    let insns = instructions(&bytes);
    let code_len = code(&bytes).len();
    for insn in &insns {
        let Some(target) = insn.branch_target() else {
            continue;
        };
        assert!(
            target == code_len || insns.iter().any(|i| i.pc == target),
            "{insn} jumps into the middle of an instruction"
        );
    }
}

#[test]
fn yes_scenario_decompiles_to_if() {
    let (_, text, _) = round_trip(
        r#"
        PROC T:
          LOCAL A%
          A%=5
          IF A%=5
            PRINT "YES"
          ENDIF
        ENDP
        "#,
    );
    assert_eq!(
        text,
        unindent(
            r#"
            PROC T:
              LOCAL L1%
              L1%=5
              IF L1%=5
                PRINT "YES"
              ENDIF
            ENDP
            "#
        )
    );
}

#[test]
fn do_until_with_external_decompiles() {
    let (first, text, second) = round_trip("DO\n  X=X+1\nUNTIL X=5");
    assert_eq!(
        text,
        unindent(
            r#"
            PROC T:
              EXTERNAL X
              DO
                X=X+1.0
              UNTIL X=5.0
            ENDP
            "#
        )
    );
    assert_eq!(first, second);
}

#[test]
fn empty_body_is_a_single_return() {
    let (first, text, _) = round_trip("PROC T:\nENDP");
    assert_eq!(code(&first), vec![0x7B]);
    assert_eq!(text, "PROC T:\nENDP\n");
}

#[test]
fn unreferenced_globals_are_still_declared() {
    let (first, text, second) = round_trip(
        r#"
        PROC T:
          GLOBAL A%,B%,C%
          B%=7
        ENDP
        "#,
    );
    assert!(text.contains("GLOBAL A%,B%,C%\n"), "{text}");
    assert!(text.contains("  B%=7\n"), "{text}");
    assert_eq!(first, second);
}

#[test]
fn only_the_trailing_return_is_implicit() {
    let bytes = compile("PROC T:\nLOCAL A%\nIF A%\nRETURN\nENDIF\nENDP", &CompileOptions::default())
        .unwrap();
    let returns = instructions(&bytes)
        .iter()
        .filter(|i| matches!(i.info().map(|i| i.class), Some(OpClass::ReturnDefault(_))))
        .count();
    assert_eq!(returns, 2);
    let text = decompile(&bytes, "T").unwrap();
    assert!(text.contains("  IF L1%\n    RETURN\n  ENDIF\n"), "{text}");
}
