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

//! The compact decimal float format used by float literals in the code stream.
//!
//! Layout: `[sign | length][mantissa bytes, least significant first][exponent]`. The low seven
//! bits of the first byte count the bytes that follow it (mantissa plus exponent); the top bit is
//! the sign. The mantissa is packed BCD, two digits per byte with the leading digit in the high
//! nibble, and the byte order is reversed. The exponent is a signed byte giving the power of ten
//! of the first mantissa digit. Zero is the two bytes `[0x01, 0x00]`.

/// Maximum number of significant digits kept by the encoder.
pub const MAX_DIGITS: usize = 12;

const SIGN_BIT: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FloatError {
    #[error("not a decimal number: {0:?}")]
    NotANumber(String),
    #[error("exponent {0} does not fit the compact float format")]
    ExponentOutOfRange(i32),
    #[error("float literal truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("malformed float literal")]
    Malformed,
}

/// Encode a finite `f64`, rounded to `MAX_DIGITS` significant digits.
pub fn encode_float(value: f64) -> Result<Vec<u8>, FloatError> {
    if !value.is_finite() {
        return Err(FloatError::NotANumber(value.to_string()));
    }
    if value == 0.0 {
        return Ok(vec![0x01, 0x00]);
    }
    let text = format!("{:e}", value.abs());
    let mut bytes = encode_float_text(&text)?;
    if value.is_sign_negative() {
        bytes[0] |= SIGN_BIT;
    }
    Ok(bytes)
}

/// Encode a decimal literal as written in source (`12.5`, `.25`, `1E-3`, optionally signed).
pub fn encode_float_text(text: &str) -> Result<Vec<u8>, FloatError> {
    let bad = || FloatError::NotANumber(text.to_string());
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(i) => {
            let exp = unsigned[i + 1..].parse::<i32>().map_err(|_| bad())?;
            (&unsigned[..i], exp)
        }
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(bad());
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }

    let mut digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes())
        .map(|c| c - b'0')
        .collect();
    // Position of the decimal point, counted in digits from the left.
    let mut point = int_part.len() as i32 + exponent;
    let leading = digits.iter().take_while(|&&d| d == 0).count();
    digits.drain(..leading);
    point -= leading as i32;
    while digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        return Ok(vec![0x01, 0x00]);
    }
    if digits.len() > MAX_DIGITS {
        let round_up = digits[MAX_DIGITS] >= 5;
        digits.truncate(MAX_DIGITS);
        if round_up {
            let mut i = MAX_DIGITS;
            loop {
                if i == 0 {
                    digits.insert(0, 1);
                    digits.pop();
                    point += 1;
                    break;
                }
                i -= 1;
                if digits[i] == 9 {
                    digits[i] = 0;
                } else {
                    digits[i] += 1;
                    break;
                }
            }
        }
        while digits.last() == Some(&0) {
            digits.pop();
        }
    }

    let exponent = point - 1;
    let exponent = i8::try_from(exponent).map_err(|_| FloatError::ExponentOutOfRange(exponent))?;
    if digits.len() % 2 == 1 {
        digits.push(0);
    }
    let mut out = Vec::with_capacity(digits.len() / 2 + 2);
    let length = (digits.len() / 2 + 1) as u8;
    out.push(if negative { length | SIGN_BIT } else { length });
    out.extend(digits.chunks(2).rev().map(|pair| (pair[0] << 4) | pair[1]));
    out.push(exponent as u8);
    Ok(out)
}

/// Number of bytes a compact float occupies, read from its leading byte.
pub fn encoded_len(first: u8) -> usize {
    1 + (first & !SIGN_BIT) as usize
}

/// Decode a compact float at the start of `bytes`, returning its decimal text and the number of
/// bytes consumed.
pub fn decode_float(bytes: &[u8]) -> Result<(String, usize), FloatError> {
    let Some(&first) = bytes.first() else {
        return Err(FloatError::Truncated {
            needed: 1,
            available: 0,
        });
    };
    let total = encoded_len(first);
    if bytes.len() < total {
        return Err(FloatError::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }
    if total < 2 {
        return Err(FloatError::Malformed);
    }
    let negative = first & SIGN_BIT != 0;
    let mantissa = &bytes[1..total - 1];
    let exponent = bytes[total - 1] as i8 as i32;

    let mut digits = String::with_capacity(mantissa.len() * 2);
    for &b in mantissa.iter().rev() {
        for nibble in [b >> 4, b & 0x0F] {
            if nibble > 9 {
                return Err(FloatError::Malformed);
            }
            digits.push((b'0' + nibble) as char);
        }
    }
    let digits = digits.trim_end_matches('0');
    if digits.is_empty() {
        return Ok(("0".to_string(), total));
    }

    let mut text = String::new();
    if negative {
        text.push('-');
    }
    let point = 1 + exponent;
    if (-7..=14).contains(&exponent) {
        if point <= 0 {
            text.push_str("0.");
            text.extend(std::iter::repeat_n('0', (-point) as usize));
            text.push_str(digits);
        } else if point as usize >= digits.len() {
            text.push_str(digits);
            text.extend(std::iter::repeat_n('0', point as usize - digits.len()));
        } else {
            let (whole, frac) = digits.split_at(point as usize);
            text.push_str(whole);
            text.push('.');
            text.push_str(frac);
        }
    } else {
        let (first_digit, rest) = digits.split_at(1);
        text.push_str(first_digit);
        if !rest.is_empty() {
            text.push('.');
            text.push_str(rest);
        }
        text.push_str(&format!("E{exponent:+}"));
    }
    Ok((text, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("0", &[0x01, 0x00]; "zero")]
    #[test_case("0.000", &[0x01, 0x00]; "zero with fraction")]
    #[test_case("1", &[0x02, 0x10, 0x00]; "one")]
    #[test_case("123.45", &[0x04, 0x50, 0x34, 0x12, 0x02]; "mixed")]
    #[test_case("-0.5", &[0x82, 0x50, 0xFF]; "negative fraction")]
    #[test_case("1E20", &[0x02, 0x10, 0x14]; "exponent")]
    #[test_case(".25", &[0x02, 0x25, 0xFF]; "leading point")]
    fn encodes(text: &str, expected: &[u8]) {
        assert_eq!(encode_float_text(text).unwrap(), expected);
    }

    #[test_case(&[0x01, 0x00], "0")]
    #[test_case(&[0x02, 0x10, 0x00], "1")]
    #[test_case(&[0x04, 0x50, 0x34, 0x12, 0x02], "123.45")]
    #[test_case(&[0x82, 0x50, 0xFF], "-0.5")]
    #[test_case(&[0x02, 0x25, 0xFD], "0.0025")]
    #[test_case(&[0x02, 0x10, 0x14], "1E+20")]
    #[test_case(&[0x02, 0x15, 0xF6], "1.5E-10")]
    fn decodes(bytes: &[u8], expected: &str) {
        let (text, len) = decode_float(bytes).unwrap();
        assert_eq!(text, expected);
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn round_trips_values() {
        for v in [0.0, 1.0, -1.0, 0.5, 3.25, 123.456, 1e-9, 6.02e23, 99999.5, -7.125e-3] {
            let encoded = encode_float(v).unwrap();
            let (text, len) = decode_float(&encoded).unwrap();
            assert_eq!(len, encoded.len());
            assert_eq!(text.parse::<f64>().unwrap(), v, "{text}");
        }
    }

    #[test]
    fn rounds_to_twelve_digits() {
        let encoded = encode_float_text("0.99999999999999").unwrap();
        let (text, _) = decode_float(&encoded).unwrap();
        assert_eq!(text, "1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(encode_float_text("1.2.3").is_err());
        assert!(encode_float_text("").is_err());
        assert!(encode_float(f64::NAN).is_err());
        assert_eq!(
            decode_float(&[0x04, 0x12]),
            Err(FloatError::Truncated {
                needed: 5,
                available: 2
            })
        );
        assert_eq!(decode_float(&[0x02, 0xAB, 0x00]), Err(FloatError::Malformed));
    }
}
