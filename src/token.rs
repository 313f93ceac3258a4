//! Token model
//!
//! A uniform representation for tokens produced by the tokenizer, threaded
//! through the preprocessor, and finally consumed by the parser. Tokens are
//! plain values (no arena, no shared mutable state) so that cloning a token
//! stream during macro expansion is just `Vec<Token>::clone`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

use crate::types::Type;

/// What kind of lexeme a [`Token`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keywords and punctuators (classified by string match in the parser).
    Reserved,
    /// Identifiers.
    Ident,
    /// String literals.
    Str,
    /// Fully resolved numeric literals (after `convert_pp_tokens`).
    Num,
    /// Preprocessing numbers, before suffix/base resolution.
    PpNum,
    /// End-of-input marker.
    Eof,
}

/// An immutable set of macro names a token is forbidden from re-expanding
/// through, per Prosser's algorithm. Hidesets are never mutated after
/// construction, so sharing the `Rc` across cloned tokens is always safe.
pub type Hideset = Rc<HashSet<String>>;

/// Returns the canonical empty hideset.
pub fn empty_hideset() -> Hideset {
    thread_local! {
        static EMPTY: Hideset = Rc::new(HashSet::new());
    }
    EMPTY.with(|e| e.clone())
}

/// Union of two hidesets: the set of names forbidden by either.
pub fn hideset_union(a: &Hideset, b: &Hideset) -> Hideset {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    Rc::new(a.union(b.as_ref()).cloned().collect())
}

/// Intersection of two hidesets: names forbidden by both.
pub fn hideset_intersection(a: &Hideset, b: &Hideset) -> Hideset {
    if a.is_empty() || b.is_empty() {
        return empty_hideset();
    }
    Rc::new(a.intersection(b.as_ref()).cloned().collect())
}

/// A resolved numeric value, produced once `convert_pp_tokens` has inspected
/// a preprocessing number's suffix and base prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumValue {
    Int(i64),
    Float(f64),
}

/// A token with full source position and macro-expansion bookkeeping.
///
/// Tokens are threaded as a `Vec<Token>` plus a cursor (see `parser::Parser`
/// and `preprocessor::Preprocessor`) rather than a linked list.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// The token's spelling, e.g. `"+="`, `"foo"`, `"42"`.
    pub text: String,
    /// Resolved numeric value and type, set after `convert_pp_tokens` for
    /// tokens of kind `Num`.
    pub num_value: Option<NumValue>,
    pub num_ty: Option<Type>,
    /// String literal payload, including a trailing NUL byte. `None` unless
    /// `kind == Str`.
    pub str_contents: Option<Vec<u8>>,
    pub file_name: Rc<PathBuf>,
    /// The owning file's full contents, kept alive for the whole
    /// compilation so diagnostics can show the offending source line.
    pub source: Rc<str>,
    pub file_no: usize,
    /// 1-based line number.
    pub line_no: usize,
    /// 0-based column, for caret diagnostics.
    pub column: usize,
    pub at_bol: bool,
    pub has_space: bool,
    pub hideset: Hideset,
}

impl Token {
    pub fn eof(file_name: Rc<PathBuf>, source: Rc<str>, file_no: usize, line_no: usize) -> Self {
        Token {
            kind: TokenKind::Eof,
            text: String::new(),
            num_value: None,
            num_ty: None,
            str_contents: None,
            file_name,
            source,
            file_no,
            line_no,
            column: 0,
            at_bol: true,
            has_space: false,
            hideset: empty_hideset(),
        }
    }

    /// A placeholder EOF token for tests that only need *a* token to
    /// satisfy a constructor and don't care about its source position.
    #[cfg(test)]
    pub fn dummy() -> Self {
        Token::eof(Rc::new(PathBuf::from("<test>")), Rc::from(""), 0, 1)
    }

    /// True if this token's spelling equals `s` (the usual way directives
    /// and punctuators are matched).
    pub fn is(&self, s: &str) -> bool {
        self.text == s
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }

    /// Extracts the full physical source line this token sits on, for
    /// caret-style diagnostics.
    pub fn source_line(&self) -> &str {
        self.source.lines().nth(self.line_no.saturating_sub(1)).unwrap_or("")
    }
}
