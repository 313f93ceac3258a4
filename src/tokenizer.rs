//! Tokenizer: bytes → tokens
//!
//! Operates on one file's raw bytes at a time; the preprocessor is
//! responsible for splicing in `#include`d files.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::diagnostics::Diagnostic;
use crate::error::CompileError;
use crate::token::{empty_hideset, NumValue, Token, TokenKind};
use crate::types::{ty_double, ty_float, ty_int, ty_long, ty_uint, ty_ulong};

/// Punctuators tried in this order so that e.g. `<<=` is recognized before
/// `<<` and `<`.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "==", "!=", "<=", ">=", "->", "++", "--", "<<", ">>", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=",
];

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_cont(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Replaces `\` immediately followed by a newline with two spaces, so that
/// physical lines are joined without shifting any later byte offset or line
/// number (a backslash-newline pair and a two-space run are the same
/// length).
fn splice_lines(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
            out.push(' ');
            out.push(' ');
            i += 2;
        } else if bytes[i] == b'\\' && i + 2 < bytes.len() && bytes[i + 1] == b'\r' && bytes[i + 2] == b'\n' {
            out.push(' ');
            out.push(' ');
            out.push(' ');
            i += 3;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

pub fn tokenize_file(path: &Path, file_no: usize) -> Result<Vec<Token>, CompileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CompileError::io(path.to_path_buf(), format!("cannot open file: {e}")))?;
    tokenize(path.to_path_buf(), contents, file_no)
}

pub fn tokenize(file_name: PathBuf, raw: String, file_no: usize) -> Result<Vec<Token>, CompileError> {
    let file_name = Rc::new(file_name);
    let spliced = splice_lines(&raw);
    let source: Rc<str> = Rc::from(spliced.as_str());
    let bytes = spliced.as_bytes();

    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut line_no = 1usize;
    let mut line_start = 0usize;
    let mut at_bol = true;
    let mut has_space = false;

    macro_rules! err {
        ($line:expr, $col:expr, $msg:expr) => {
            return Err(CompileError::Lex(Diagnostic {
                file: file_name.as_ref().clone(),
                line: $line,
                column: $col,
                severity: crate::diagnostics::Severity::Error,
                message: $msg,
                line_text: spliced.lines().nth($line.saturating_sub(1)).unwrap_or("").to_string(),
            }))
        };
    }

    while i < bytes.len() {
        let c = bytes[i];

        if c == b'\n' {
            i += 1;
            line_no += 1;
            line_start = i;
            at_bol = true;
            has_space = false;
            continue;
        }
        if c == b' ' || c == b'\t' || c == b'\r' {
            i += 1;
            has_space = true;
            continue;
        }
        // Line comment.
        if c == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            has_space = true;
            continue;
        }
        // Block comment.
        if c == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            let start_line = line_no;
            let start_col = i - line_start;
            i += 2;
            let mut closed = false;
            while i + 1 < bytes.len() {
                if bytes[i] == b'\n' {
                    line_no += 1;
                    line_start = i + 1;
                }
                if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    i += 2;
                    closed = true;
                    break;
                }
                i += 1;
            }
            if !closed {
                err!(start_line, start_col, "unterminated block comment".to_string());
            }
            has_space = true;
            continue;
        }

        let col = i - line_start;

        // String literal.
        if c == b'"' {
            let (contents, len_consumed) = read_string_literal(bytes, i, line_no, line_start, &file_name, &spliced)?;
            let text = String::from_utf8_lossy(&bytes[i..i + len_consumed]).into_owned();
            tokens.push(Token {
                kind: TokenKind::Str,
                text,
                num_value: None,
                num_ty: None,
                str_contents: Some(contents),
                file_name: file_name.clone(),
                source: source.clone(),
                file_no,
                line_no,
                column: col,
                at_bol,
                has_space,
                hideset: empty_hideset(),
            });
            i += len_consumed;
            at_bol = false;
            has_space = false;
            continue;
        }

        // Character literal: evaluates to an int-typed Num token.
        if c == b'\'' {
            let (value, len_consumed) = read_char_literal(bytes, i, line_no, line_start, &file_name, &spliced)?;
            let text = String::from_utf8_lossy(&bytes[i..i + len_consumed]).into_owned();
            tokens.push(Token {
                kind: TokenKind::Num,
                text,
                num_value: Some(NumValue::Int(value)),
                num_ty: Some(ty_int()),
                str_contents: None,
                file_name: file_name.clone(),
                source: source.clone(),
                file_no,
                line_no,
                column: col,
                at_bol,
                has_space,
                hideset: empty_hideset(),
            });
            i += len_consumed;
            at_bol = false;
            has_space = false;
            continue;
        }

        // Preprocessing number: digit, or `.` followed by a digit.
        if c.is_ascii_digit() || (c == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit()) {
            let start = i;
            i += 1;
            while i < bytes.len() {
                let b = bytes[i];
                if (b == b'e' || b == b'E' || b == b'p' || b == b'P')
                    && i + 1 < bytes.len()
                    && (bytes[i + 1] == b'+' || bytes[i + 1] == b'-')
                {
                    i += 2;
                    continue;
                }
                if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' {
                    i += 1;
                    continue;
                }
                break;
            }
            let text = spliced[start..i].to_string();
            tokens.push(Token {
                kind: TokenKind::PpNum,
                text,
                num_value: None,
                num_ty: None,
                str_contents: None,
                file_name: file_name.clone(),
                source: source.clone(),
                file_no,
                line_no,
                column: col,
                at_bol,
                has_space,
                hideset: empty_hideset(),
            });
            at_bol = false;
            has_space = false;
            continue;
        }

        // Identifier.
        if is_ident_start(c) {
            let start = i;
            i += 1;
            while i < bytes.len() && is_ident_cont(bytes[i]) {
                i += 1;
            }
            let text = spliced[start..i].to_string();
            tokens.push(Token {
                kind: TokenKind::Ident,
                text,
                num_value: None,
                num_ty: None,
                str_contents: None,
                file_name: file_name.clone(),
                source: source.clone(),
                file_no,
                line_no,
                column: col,
                at_bol,
                has_space,
                hideset: empty_hideset(),
            });
            at_bol = false;
            has_space = false;
            continue;
        }

        // Punctuators, longest match first.
        let rest = &spliced[i..];
        let matched = PUNCTUATORS.iter().find(|p| rest.starts_with(**p));
        let punct_len = matched.map(|p| p.len()).unwrap_or(1);
        let is_known_single = b"+-*/%=<>!&|^~?:;,.(){}[]#".contains(&c);
        if matched.is_none() && !is_known_single {
            err!(line_no, col, format!("invalid token: '{}'", c as char));
        }
        let text = spliced[i..i + punct_len].to_string();
        tokens.push(Token {
            kind: TokenKind::Reserved,
            text,
            num_value: None,
            num_ty: None,
            str_contents: None,
            file_name: file_name.clone(),
            source: source.clone(),
            file_no,
            line_no,
            column: col,
            at_bol,
            has_space,
            hideset: empty_hideset(),
        });
        i += punct_len;
        at_bol = false;
        has_space = false;
    }

    tokens.push(Token::eof(file_name, source, file_no, line_no));
    Ok(tokens)
}

fn read_escape(bytes: &[u8], i: usize) -> (u8, usize) {
    // `bytes[i]` is the character following the backslash.
    match bytes[i] {
        b'a' => (0x07, 1),
        b'b' => (0x08, 1),
        b't' => (b'\t', 1),
        b'n' => (b'\n', 1),
        b'v' => (0x0b, 1),
        b'f' => (0x0c, 1),
        b'r' => (b'\r', 1),
        b'e' => (0x1b, 1),
        b'\\' => (b'\\', 1),
        b'\'' => (b'\'', 1),
        b'"' => (b'"', 1),
        b'x' => {
            let mut j = i + 1;
            let mut v: u32 = 0;
            while j < bytes.len() && bytes[j].is_ascii_hexdigit() {
                v = v * 16 + (bytes[j] as char).to_digit(16).unwrap();
                j += 1;
            }
            (v as u8, j - i)
        }
        b'0'..=b'7' => {
            let mut j = i;
            let mut v: u32 = 0;
            let mut count = 0;
            while j < bytes.len() && (b'0'..=b'7').contains(&bytes[j]) && count < 3 {
                v = v * 8 + (bytes[j] - b'0') as u32;
                j += 1;
                count += 1;
            }
            (v as u8, j - i)
        }
        other => (other, 1),
    }
}

fn read_string_literal(
    bytes: &[u8],
    start: usize,
    line_no: usize,
    line_start: usize,
    file_name: &Rc<PathBuf>,
    source: &str,
) -> Result<(Vec<u8>, usize), CompileError> {
    let mut i = start + 1;
    let mut contents = Vec::new();
    loop {
        if i >= bytes.len() || bytes[i] == b'\n' {
            return Err(CompileError::Lex(Diagnostic {
                file: file_name.as_ref().clone(),
                line: line_no,
                column: start - line_start,
                severity: crate::diagnostics::Severity::Error,
                message: "unterminated string literal".to_string(),
                line_text: source.lines().nth(line_no.saturating_sub(1)).unwrap_or("").to_string(),
            }));
        }
        if bytes[i] == b'"' {
            i += 1;
            break;
        }
        if bytes[i] == b'\\' {
            let (byte, len) = read_escape(bytes, i + 1);
            contents.push(byte);
            i += 1 + len;
        } else {
            contents.push(bytes[i]);
            i += 1;
        }
    }
    contents.push(0);
    Ok((contents, i - start))
}

fn read_char_literal(
    bytes: &[u8],
    start: usize,
    line_no: usize,
    line_start: usize,
    file_name: &Rc<PathBuf>,
    source: &str,
) -> Result<(i64, usize), CompileError> {
    let mut i = start + 1;
    if i >= bytes.len() {
        return Err(CompileError::Lex(Diagnostic {
            file: file_name.as_ref().clone(),
            line: line_no,
            column: start - line_start,
            severity: crate::diagnostics::Severity::Error,
            message: "unterminated character literal".to_string(),
            line_text: source.lines().nth(line_no.saturating_sub(1)).unwrap_or("").to_string(),
        }));
    }
    let value: i64 = if bytes[i] == b'\\' {
        let (byte, len) = read_escape(bytes, i + 1);
        i += 1 + len;
        byte as i64
    } else {
        let byte = bytes[i];
        i += 1;
        byte as i64
    };
    if i >= bytes.len() || bytes[i] != b'\'' {
        return Err(CompileError::Lex(Diagnostic {
            file: file_name.as_ref().clone(),
            line: line_no,
            column: start - line_start,
            severity: crate::diagnostics::Severity::Error,
            message: "unterminated character literal".to_string(),
            line_text: source.lines().nth(line_no.saturating_sub(1)).unwrap_or("").to_string(),
        }));
    }
    i += 1;
    Ok((value, i - start))
}

/// Resolves preprocessing numbers into typed integer or float literals.
/// Deferred until after macro expansion, since a macro may paste together
/// a number's digits and suffix across separate tokens.
pub fn convert_pp_tokens(tokens: &mut [Token]) -> Result<(), CompileError> {
    for tok in tokens.iter_mut() {
        if tok.kind != TokenKind::PpNum {
            continue;
        }
        let (value, ty) = convert_one(&tok.text).ok_or_else(|| {
            CompileError::Lex(Diagnostic::error_at_token(
                tok,
                format!("invalid numeric constant: '{}'", tok.text),
            ))
        })?;
        tok.kind = TokenKind::Num;
        tok.num_value = Some(value);
        tok.num_ty = Some(ty);
    }
    Ok(())
}

fn convert_one(text: &str) -> Option<(NumValue, crate::types::Type)> {
    let lower = text.to_ascii_lowercase();
    let is_float_literal = lower.contains('.')
        || (!lower.starts_with("0x") && (lower.contains('e')))
        || (lower.starts_with("0x") && lower.contains('p'));

    if is_float_literal {
        let (digits, is_f32) = if lower.ends_with('f') {
            (&text[..text.len() - 1], true)
        } else if lower.ends_with('l') {
            (&text[..text.len() - 1], false)
        } else {
            (text, false)
        };
        let value: f64 = digits.parse().ok()?;
        let ty = if is_f32 { ty_float() } else { ty_double() };
        return Some((NumValue::Float(value), ty));
    }

    // Integer literal: strip trailing u/U and l/L/ll/LL suffix combinations.
    let mut end = lower.len();
    let mut unsigned = false;
    let mut long_count = 0;
    while end > 0 {
        match lower.as_bytes()[end - 1] {
            b'u' => {
                unsigned = true;
                end -= 1;
            }
            b'l' => {
                long_count += 1;
                end -= 1;
            }
            _ => break,
        }
    }
    let digits = &text[..end];
    let value = parse_int_literal(digits)?;

    let ty = if unsigned && (long_count > 0 || value > i64::from(i32::MAX)) {
        ty_ulong()
    } else if long_count > 0 || value > i64::from(i32::MAX) {
        ty_long()
    } else if unsigned {
        ty_uint()
    } else {
        ty_int()
    };
    Some((NumValue::Int(value), ty))
}

fn parse_int_literal(digits: &str) -> Option<i64> {
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).ok();
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return i64::from_str_radix(&digits[1..], 8).ok();
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok_texts(src: &str) -> Vec<String> {
        let toks = tokenize(PathBuf::from("<test>"), src.to_string(), 0).unwrap();
        toks.into_iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn skips_comments() {
        let toks = tok_texts("int /* comment */ x; // trailing\n");
        assert_eq!(toks, vec!["int", "x", ";"]);
    }

    #[test]
    fn at_bol_tracks_physical_lines() {
        let toks = tokenize(PathBuf::from("<test>"), "int x;\nint y;\n".to_string(), 0).unwrap();
        let idents: Vec<_> = toks.iter().filter(|t| t.kind != TokenKind::Eof).collect();
        assert!(idents[0].at_bol);
        assert!(!idents[1].at_bol);
        assert!(idents[3].at_bol); // second `int`
    }

    #[test]
    fn has_space_detects_leading_whitespace() {
        let toks = tokenize(PathBuf::from("<test>"), "a+ b".to_string(), 0).unwrap();
        let toks: Vec<_> = toks.into_iter().filter(|t| t.kind != TokenKind::Eof).collect();
        assert!(!toks[0].has_space); // a
        assert!(!toks[1].has_space); // +
        assert!(toks[2].has_space); // b
    }

    #[test]
    fn multi_char_punctuators_greedy() {
        let toks = tok_texts("a <<= b >>= c");
        assert_eq!(toks, vec!["a", "<<=", "b", ">>=", "c"]);
    }

    #[test]
    fn string_literal_escapes() {
        let toks = tokenize(PathBuf::from("<test>"), "\"a\\nb\"".to_string(), 0).unwrap();
        let s = &toks[0];
        assert_eq!(s.str_contents.as_ref().unwrap(), &vec![b'a', b'\n', b'b', 0]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize(PathBuf::from("<test>"), "\"abc".to_string(), 0);
        assert!(err.is_err());
    }

    #[test]
    fn line_splicing_joins_backslash_newline() {
        let toks = tok_texts("int x \\\n= 1;");
        assert_eq!(toks, vec!["int", "x", "=", "1", ";"]);
    }

    #[test]
    fn convert_pp_tokens_resolves_suffixes() {
        let mut toks = tokenize(PathBuf::from("<test>"), "1 1u 1L 1.5 1.5f 0x10".to_string(), 0).unwrap();
        convert_pp_tokens(&mut toks).unwrap();
        assert!(matches!(toks[0].num_value, Some(NumValue::Int(1))));
        assert!(toks[1].num_ty.as_ref().unwrap().is_unsigned());
        assert_eq!(toks[2].num_ty.as_ref().unwrap().kind(), crate::types::TypeKind::Long);
        assert!(matches!(toks[3].num_value, Some(NumValue::Float(f)) if f == 1.5));
        assert_eq!(toks[4].num_ty.as_ref().unwrap().kind(), crate::types::TypeKind::Float);
        assert!(matches!(toks[5].num_value, Some(NumValue::Int(16))));
    }
}
