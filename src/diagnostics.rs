//! Diagnostic rendering
//!
//! Every fatal error and every warning is rendered the same way:
//! `<file>:<line>: error: <message>` (or `warning:`) followed by the
//! offending source line and a caret pointing at the column.

use std::fmt;
use std::path::PathBuf;

use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single diagnostic, already carrying everything needed to print itself
/// without re-reading the source file.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    pub message: String,
    pub line_text: String,
}

impl Diagnostic {
    pub fn at_token(tok: &Token, severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            file: tok.file_name.as_ref().clone(),
            line: tok.line_no,
            column: tok.column,
            severity,
            message: message.into(),
            line_text: tok.source_line().to_string(),
        }
    }

    pub fn error_at_token(tok: &Token, message: impl Into<String>) -> Self {
        Self::at_token(tok, Severity::Error, message)
    }

    pub fn warning_at_token(tok: &Token, message: impl Into<String>) -> Self {
        Self::at_token(tok, Severity::Warning, message)
    }

    pub fn simple(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Diagnostic {
            file: file.into(),
            line: 0,
            column: 0,
            severity: Severity::Error,
            message: message.into(),
            line_text: String::new(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            writeln!(f, "{}: {}: {}", self.file.display(), self.severity, self.message)?;
            return Ok(());
        }
        writeln!(
            f,
            "{}:{}: {}: {}",
            self.file.display(),
            self.line,
            self.severity,
            self.message
        )?;
        writeln!(f, "{}", self.line_text)?;
        write!(f, "{}^", " ".repeat(self.column))
    }
}
