//! Top-level compile error type
//!
//! A small hand-written enum with manual `Display`/`Error`/`From` impls,
//! rather than a derive-macro error crate. Every kind except `warning` is
//! fatal and carries a [`Diagnostic`].

use std::fmt;
use std::path::PathBuf;

use crate::diagnostics::Diagnostic;

#[derive(Debug)]
pub enum CompileError {
    /// Could not open or read a source/include file.
    Io(Diagnostic),
    /// Bad token: unterminated string/comment, unrecognized byte.
    Lex(Diagnostic),
    /// Malformed directive, unterminated conditional, include not found,
    /// bad macro invocation, or a paste that yields an invalid token.
    Preproc(Diagnostic),
    /// Unexpected token, undeclared identifier, invalid type combination,
    /// invalid operand to an operator.
    Parse(Diagnostic),
    /// e.g. `ptr - ptr` with differing base types.
    Type(Diagnostic),
    /// A non-constant expression where a constant was required.
    ConstEval(Diagnostic),
}

impl CompileError {
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            CompileError::Io(d)
            | CompileError::Lex(d)
            | CompileError::Preproc(d)
            | CompileError::Parse(d)
            | CompileError::Type(d)
            | CompileError::ConstEval(d) => d,
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CompileError::Io(Diagnostic::simple(path, message))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diagnostic())
    }
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(Diagnostic::simple(PathBuf::new(), e.to_string()))
    }
}

impl From<std::fmt::Error> for CompileError {
    fn from(e: std::fmt::Error) -> Self {
        CompileError::Io(Diagnostic::simple(PathBuf::new(), format!("formatting error: {e}")))
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
