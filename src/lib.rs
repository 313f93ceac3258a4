//! nsc: a compiler for a substantial subset of C
//!
//! Translates C source text to x86-64 assembly in the GAS/Intel dialect.
//! The pipeline is a straight-line sequence of phases, each its own module:
//! tokenizer → preprocessor → parser → code generator.
//!
//! # Compiling a file
//!
//! ```rust,ignore
//! use nsc::{compile_file, CompilerConfig};
//!
//! let config = CompilerConfig::new()
//!     .with_include_dir("/usr/local/include")
//!     .with_define("DEBUG", "1");
//! let asm = compile_file(std::path::Path::new("prog.c"), &config)?;
//! print!("{asm}");
//! # Ok::<(), nsc::CompileError>(())
//! ```
//!
//! Preprocessing alone (the `-E` CLI flag) is available as
//! [`preprocess_file`], which returns the expanded token stream rather than
//! assembly text.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod const_eval;
pub mod diagnostics;
pub mod error;
pub mod parser;
pub mod preprocessor;
pub mod scope;
pub mod token;
pub mod tokenizer;
pub mod types;

pub use ast::{Function, Program};
pub use config::{CompilerConfig, MacroOverride};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{CompileError, Result};
pub use token::Token;

use std::path::Path;

use preprocessor::Preprocessor;

/// Tokenizes, preprocesses, parses, and lowers `path` to assembly text.
///
/// This is the single entry point the `cc` binary drives; it is also the
/// entry point an embedder or integration test should use when it wants
/// the full pipeline rather than a single phase.
pub fn compile_file(path: &Path, config: &CompilerConfig) -> Result<String> {
    let tokens = preprocess_file(path, config)?;
    let program = parser::parse(tokens)?;
    let asm = codegen::generate(&program, config.pic)?;
    Ok(asm)
}

/// Tokenizes and preprocesses `path`, returning the expanded token stream.
///
/// Used by `compile_file` and directly by the `-E` CLI flag, which prints
/// the stream instead of continuing on to parsing and codegen.
pub fn preprocess_file(path: &Path, config: &CompilerConfig) -> Result<Vec<Token>> {
    let tokens = tokenizer::tokenize_file(path, 0)?;
    let mut pp = Preprocessor::new(config);
    pp.preprocess(tokens)
}

/// Renders a preprocessed token stream the way `-E` prints it: one line per
/// original source line, tokens separated by a single space, preserving
/// each token's `at_bol` boundary.
pub fn render_preprocessed(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut last_line = 0usize;
    for tok in tokens {
        if tok.is_eof() {
            break;
        }
        if tok.line_no != last_line {
            if last_line != 0 {
                out.push('\n');
            }
            last_line = tok.line_no;
        } else {
            out.push(' ');
        }
        out.push_str(&tok.text);
    }
    out.push('\n');
    out
}
