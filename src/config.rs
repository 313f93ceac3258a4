//! Compiler configuration
//!
//! `CompilerConfig` is a plain struct gathered once from CLI flags (or
//! assembled directly by a test or an embedder) and threaded into the
//! library entry points, so the pipeline never has to re-derive its
//! settings from `std::env::args`.

use std::path::PathBuf;

/// A predefined or undefined macro requested on the command line, applied
/// in argument order before the source file's own directives are seen.
#[derive(Debug, Clone)]
pub enum MacroOverride {
    /// `-D name[=value]`; `value` defaults to `"1"`.
    Define { name: String, value: String },
    /// `-U name`.
    Undefine(String),
}

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Ordered `-I` search path, with `INCLUDE_PATH` entries (if any)
    /// prepended by the driver before this struct is built.
    pub include_paths: Vec<PathBuf>,
    /// `-D`/`-U` overrides, applied in order.
    pub macro_overrides: Vec<MacroOverride>,
    /// `-E`: stop after preprocessing.
    pub preprocess_only: bool,
    /// `-fpic`: emit position-independent references for globals.
    pub pic: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_paths.push(dir.into());
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.macro_overrides.push(MacroOverride::Define {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_undefine(mut self, name: impl Into<String>) -> Self {
        self.macro_overrides.push(MacroOverride::Undefine(name.into()));
        self
    }

    pub fn with_preprocess_only(mut self, v: bool) -> Self {
        self.preprocess_only = v;
        self
    }

    pub fn with_pic(mut self, v: bool) -> Self {
        self.pic = v;
        self
    }
}
