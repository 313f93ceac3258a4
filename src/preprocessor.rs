//! Preprocessor: macro expansion and directive handling
//!
//! Implements Dave Prosser's macro-expansion algorithm (hidesets prevent a
//! macro from re-expanding through its own invocation) plus the directive
//! set: `#include`, `#define`, `#undef`,
//! `#if`/`#ifdef`/`#ifndef`/`#elif`/`#else`/`#endif`, `#error`, and the null
//! directive.
//!
//! The token stream is a `VecDeque<Token>`: expansion works by popping a
//! macro invocation off the front and pushing its replacement tokens back
//! on, without any raw list splicing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::{CompilerConfig, MacroOverride};
use crate::const_eval;
use crate::diagnostics::Diagnostic;
use crate::error::CompileError;
use crate::token::{empty_hideset, hideset_intersection, hideset_union, Hideset, NumValue, Token, TokenKind};
use crate::tokenizer;
use crate::types::ty_int;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialKind {
    None,
    File,
    Line,
}

#[derive(Debug, Clone)]
struct Macro {
    is_objlike: bool,
    params: Vec<String>,
    is_variadic: bool,
    body: Vec<Token>,
    deleted: bool,
    special: SpecialKind,
}

#[derive(Debug, Clone)]
struct MacroArg {
    name: String,
    tokens: Vec<Token>,
}

enum CondCtx {
    Then,
    Elif,
    Else,
}

struct CondIncl {
    ctx: CondCtx,
    tok: Token,
    included: bool,
}

/// Owns the macro table, conditional-inclusion stack, and include-path
/// search list for one compilation.
pub struct Preprocessor {
    macros: HashMap<String, Macro>,
    cond_incl: Vec<CondIncl>,
    include_paths: Vec<PathBuf>,
    next_file_no: usize,
}

fn is_hash(tok: &Token) -> bool {
    tok.at_bol && tok.is("#")
}

fn singleton_hideset(name: &str) -> Hideset {
    let mut s = HashSet::new();
    s.insert(name.to_string());
    Rc::new(s)
}

fn add_hideset(body: &[Token], hs: &Hideset) -> Vec<Token> {
    body.iter()
        .map(|t| {
            let mut c = t.clone();
            c.hideset = hideset_union(&c.hideset, hs);
            c
        })
        .collect()
}

fn join_tokens(toks: &[Token]) -> String {
    let mut s = String::new();
    for (i, t) in toks.iter().enumerate() {
        if i > 0 && t.has_space {
            s.push(' ');
        }
        s.push_str(&t.text);
    }
    s
}

fn make_num_token(tmpl: &Token, v: i64) -> Token {
    Token {
        kind: TokenKind::Num,
        text: v.to_string(),
        num_value: Some(NumValue::Int(v)),
        num_ty: Some(ty_int()),
        str_contents: None,
        file_name: tmpl.file_name.clone(),
        source: tmpl.source.clone(),
        file_no: tmpl.file_no,
        line_no: tmpl.line_no,
        column: tmpl.column,
        at_bol: false,
        has_space: tmpl.has_space,
        hideset: empty_hideset(),
    }
}

fn make_str_token(tmpl: &Token, s: &str) -> Token {
    let mut contents: Vec<u8> = s.bytes().collect();
    contents.push(0);
    Token {
        kind: TokenKind::Str,
        text: format!("{:?}", s),
        num_value: None,
        num_ty: None,
        str_contents: Some(contents),
        file_name: tmpl.file_name.clone(),
        source: tmpl.source.clone(),
        file_no: tmpl.file_no,
        line_no: tmpl.line_no,
        column: tmpl.column,
        at_bol: false,
        has_space: tmpl.has_space,
        hideset: empty_hideset(),
    }
}

fn preproc_err(tok: &Token, msg: impl Into<String>) -> CompileError {
    CompileError::Preproc(Diagnostic::error_at_token(tok, msg.into()))
}

impl Preprocessor {
    pub fn new(config: &CompilerConfig) -> Self {
        let mut pp = Preprocessor {
            macros: HashMap::new(),
            cond_incl: Vec::new(),
            include_paths: config.include_paths.clone(),
            next_file_no: 1,
        };
        pp.init_predefined_macros();
        for ov in &config.macro_overrides {
            match ov {
                MacroOverride::Define { name, value } => pp.define_macro(name, value),
                MacroOverride::Undefine(name) => pp.undefine_macro(name),
            }
        }
        pp
    }

    fn next_file_no(&mut self) -> usize {
        self.next_file_no += 1;
        self.next_file_no
    }

    fn define_macro(&mut self, name: &str, value: &str) {
        let mut body = tokenizer::tokenize(PathBuf::from("<built-in>"), value.to_string(), 0)
            .expect("predefined macro body must tokenize");
        body.pop();
        self.macros.insert(
            name.to_string(),
            Macro {
                is_objlike: true,
                params: Vec::new(),
                is_variadic: false,
                body,
                deleted: false,
                special: SpecialKind::None,
            },
        );
    }

    fn undefine_macro(&mut self, name: &str) {
        self.macros.insert(
            name.to_string(),
            Macro {
                is_objlike: true,
                params: Vec::new(),
                is_variadic: false,
                body: Vec::new(),
                deleted: true,
                special: SpecialKind::None,
            },
        );
    }

    /// Predefined macros: a self-identifying compiler macro plus the
    /// ABI/target-assumption macros a freestanding SysV x86-64 Linux target
    /// needs.
    fn init_predefined_macros(&mut self) {
        let simple = [
            ("__nsc__", "1"),
            ("_LP64", "1"),
            ("__ELF__", "1"),
            ("__LP64__", "1"),
            ("__SIZEOF_DOUBLE__", "8"),
            ("__SIZEOF_FLOAT__", "4"),
            ("__SIZEOF_INT__", "4"),
            ("__SIZEOF_LONG_LONG__", "8"),
            ("__SIZEOF_LONG__", "8"),
            ("__SIZEOF_POINTER__", "8"),
            ("__SIZEOF_PTRDIFF_T__", "8"),
            ("__SIZEOF_SHORT__", "2"),
            ("__SIZEOF_SIZE_T__", "8"),
            ("__STDC_HOSTED__", "1"),
            ("__STDC_NO_ATOMICS__", "1"),
            ("__STDC_NO_COMPLEX__", "1"),
            ("__STDC_NO_THREADS__", "1"),
            ("__STDC_NO_VLA__", "1"),
            ("__STDC_VERSION__", "201112L"),
            ("__STDC__", "1"),
            ("__amd64", "1"),
            ("__amd64__", "1"),
            ("__gnu_linux__", "1"),
            ("__linux", "1"),
            ("__linux__", "1"),
            ("__unix", "1"),
            ("__unix__", "1"),
            ("__x86_64", "1"),
            ("__x86_64__", "1"),
            ("linux", "1"),
            ("__alignof__", "alignof"),
            ("__const__", "const"),
            ("__inline__", "inline"),
            ("__restrict", "restrict"),
            ("__restrict__", "restrict"),
            ("__signed__", "signed"),
            ("__typeof__", "typeof"),
            ("__volatile__", "volatile"),
        ];
        for (name, value) in simple {
            self.define_macro(name, value);
        }
        self.macros.insert(
            "__FILE__".to_string(),
            Macro {
                is_objlike: true,
                params: Vec::new(),
                is_variadic: false,
                body: Vec::new(),
                deleted: false,
                special: SpecialKind::File,
            },
        );
        self.macros.insert(
            "__LINE__".to_string(),
            Macro {
                is_objlike: true,
                params: Vec::new(),
                is_variadic: false,
                body: Vec::new(),
                deleted: false,
                special: SpecialKind::Line,
            },
        );
    }

    /// Entry point: expand macros, process directives, resolve
    /// preprocessing numbers, and merge adjacent string literals.
    pub fn preprocess(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>, CompileError> {
        let mut expanded = self.preprocess2(tokens)?;
        if let Some(ci) = self.cond_incl.last() {
            return Err(preproc_err(&ci.tok, "unterminated conditional directive"));
        }
        tokenizer::convert_pp_tokens(&mut expanded)?;
        join_adjacent_string_literals(&mut expanded);
        Ok(expanded)
    }

    fn preprocess2(&mut self, input: Vec<Token>) -> Result<Vec<Token>, CompileError> {
        let mut stream: VecDeque<Token> = input.into();
        let mut out = Vec::new();

        while let Some(tok) = stream.front() {
            if tok.is_eof() {
                break;
            }
            if self.expand_macro(&mut stream)? {
                continue;
            }
            let tok = stream.front().unwrap();
            if !is_hash(tok) {
                out.push(stream.pop_front().unwrap());
                continue;
            }
            self.directive(&mut stream)?;
        }
        if let Some(eof) = stream.pop_front() {
            out.push(eof);
        }
        Ok(out)
    }

    fn directive(&mut self, stream: &mut VecDeque<Token>) -> Result<(), CompileError> {
        let hash_tok = stream.pop_front().expect("caller checked is_hash");
        let name = match stream.front() {
            None => return Ok(()),
            Some(t) if t.is_eof() || t.at_bol => return Ok(()), // null directive
            Some(t) => t.text.clone(),
        };

        match name.as_str() {
            "include" => {
                stream.pop_front();
                let path = self.read_include_path(stream, &hash_tok)?;
                let file_no = self.next_file_no();
                let mut included = tokenizer::tokenize_file(Path::new(&path), file_no)?;
                included.pop(); // drop the included file's own EOF
                for t in included.into_iter().rev() {
                    stream.push_front(t);
                }
            }
            "define" => {
                stream.pop_front();
                self.read_macro_definition(stream, &hash_tok)?;
            }
            "undef" => {
                stream.pop_front();
                let name_tok = stream.pop_front().ok_or_else(|| preproc_err(&hash_tok, "macro name must be an identifier"))?;
                if !name_tok.is_ident() {
                    return Err(preproc_err(&name_tok, "macro name must be an identifier"));
                }
                self.skip_line(stream);
                self.undefine_macro(&name_tok.text);
            }
            "if" => {
                stream.pop_front();
                let val = self.eval_const_expr(stream)?;
                self.cond_incl.push(CondIncl {
                    ctx: CondCtx::Then,
                    tok: hash_tok,
                    included: val != 0,
                });
                if val == 0 {
                    self.skip_cond_incl(stream);
                }
            }
            "ifdef" => {
                stream.pop_front();
                let name_tok = stream.pop_front().ok_or_else(|| preproc_err(&hash_tok, "macro name must be an identifier"))?;
                let defined = self.macro_is_defined(&name_tok.text);
                self.skip_line(stream);
                self.cond_incl.push(CondIncl {
                    ctx: CondCtx::Then,
                    tok: hash_tok,
                    included: defined,
                });
                if !defined {
                    self.skip_cond_incl(stream);
                }
            }
            "ifndef" => {
                stream.pop_front();
                let name_tok = stream.pop_front().ok_or_else(|| preproc_err(&hash_tok, "macro name must be an identifier"))?;
                let defined = self.macro_is_defined(&name_tok.text);
                self.skip_line(stream);
                self.cond_incl.push(CondIncl {
                    ctx: CondCtx::Then,
                    tok: hash_tok,
                    included: !defined,
                });
                if defined {
                    self.skip_cond_incl(stream);
                }
            }
            "elif" => {
                stream.pop_front();
                {
                    let top = self
                        .cond_incl
                        .last()
                        .ok_or_else(|| preproc_err(&hash_tok, "stray #elif"))?;
                    if matches!(top.ctx, CondCtx::Else) {
                        return Err(preproc_err(&hash_tok, "stray #elif"));
                    }
                }
                self.cond_incl.last_mut().unwrap().ctx = CondCtx::Elif;
                let already_included = self.cond_incl.last().unwrap().included;
                if !already_included {
                    let val = self.eval_const_expr(stream)?;
                    if val != 0 {
                        self.cond_incl.last_mut().unwrap().included = true;
                    } else {
                        self.skip_cond_incl(stream);
                    }
                } else {
                    self.skip_cond_incl(stream);
                }
            }
            "else" => {
                stream.pop_front();
                {
                    let top = self
                        .cond_incl
                        .last()
                        .ok_or_else(|| preproc_err(&hash_tok, "stray #else"))?;
                    if matches!(top.ctx, CondCtx::Else) {
                        return Err(preproc_err(&hash_tok, "stray #else"));
                    }
                }
                self.cond_incl.last_mut().unwrap().ctx = CondCtx::Else;
                self.skip_line(stream);
                if self.cond_incl.last().unwrap().included {
                    self.skip_cond_incl(stream);
                }
            }
            "endif" => {
                stream.pop_front();
                if self.cond_incl.pop().is_none() {
                    return Err(preproc_err(&hash_tok, "stray #endif"));
                }
                self.skip_line(stream);
            }
            "error" => {
                stream.pop_front();
                let line = self.copy_line(stream);
                let msg = join_tokens(&line);
                return Err(preproc_err(&hash_tok, format!("#error {}", msg)));
            }
            "pragma" => {
                // Recognized and silently discarded.
                stream.pop_front();
                self.copy_line(stream);
            }
            _ => return Err(preproc_err(&hash_tok, "invalid preprocessor directive")),
        }
        Ok(())
    }

    fn macro_is_defined(&self, name: &str) -> bool {
        self.macros.get(name).map(|m| !m.deleted).unwrap_or(false)
    }

    /// Consumes and discards tokens up to (not including) the next
    /// beginning-of-line token, warning if any were present.
    fn skip_line(&self, stream: &mut VecDeque<Token>) {
        let mut warned = false;
        while let Some(t) = stream.front() {
            if t.is_eof() || t.at_bol {
                break;
            }
            if !warned {
                eprintln!("{}", Diagnostic::warning_at_token(t, "extra token"));
                warned = true;
            }
            stream.pop_front();
        }
    }

    /// Collects tokens up to (not including) the next beginning-of-line
    /// token or EOF, without warning (used where the line's tokens are the
    /// payload, e.g. `#define`/`#if`/`#error`).
    fn copy_line(&self, stream: &mut VecDeque<Token>) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(t) = stream.front() {
            if t.is_eof() || t.at_bol {
                break;
            }
            out.push(stream.pop_front().unwrap());
        }
        out
    }

    fn skip_cond_incl(&mut self, stream: &mut VecDeque<Token>) {
        loop {
            match stream.front() {
                None => return,
                Some(t) if t.is_eof() => return,
                Some(t) if is_hash(t) => {
                    let directive = stream.get(1).map(|x| x.text.clone());
                    match directive.as_deref() {
                        Some("if") | Some("ifdef") | Some("ifndef") => {
                            stream.pop_front();
                            stream.pop_front();
                            self.skip_cond_incl2(stream);
                        }
                        Some("elif") | Some("else") | Some("endif") => return,
                        _ => {
                            stream.pop_front();
                        }
                    }
                }
                _ => {
                    stream.pop_front();
                }
            }
        }
    }

    /// Skips a single nested `#if ... #endif` block entirely (used while
    /// already skipping an outer conditional).
    fn skip_cond_incl2(&mut self, stream: &mut VecDeque<Token>) {
        loop {
            match stream.front() {
                None => return,
                Some(t) if t.is_eof() => return,
                Some(t) if is_hash(t) => {
                    let directive = stream.get(1).map(|x| x.text.clone());
                    match directive.as_deref() {
                        Some("if") | Some("ifdef") | Some("ifndef") => {
                            stream.pop_front();
                            stream.pop_front();
                            self.skip_cond_incl2(stream);
                        }
                        Some("endif") => {
                            stream.pop_front();
                            stream.pop_front();
                            return;
                        }
                        _ => {
                            stream.pop_front();
                        }
                    }
                }
                _ => {
                    stream.pop_front();
                }
            }
        }
    }

    fn eval_const_expr(&mut self, stream: &mut VecDeque<Token>) -> Result<i64, CompileError> {
        let line = self.copy_line(stream);
        let substituted = self.read_const_expr(line)?;
        let mut expanded = self.preprocess2(substituted)?;
        // The standard requires replacing remaining non-macro identifiers
        // with 0 before evaluating, so `#if SOME_UNDEFINED_FLAG` is false
        // rather than a parse error.
        for t in expanded.iter_mut() {
            if t.kind == TokenKind::Ident {
                t.kind = TokenKind::Num;
                t.num_value = Some(NumValue::Int(0));
                t.num_ty = Some(ty_int());
            }
        }
        tokenizer::convert_pp_tokens(&mut expanded)?;
        const_eval::eval(&expanded)
    }

    /// Rewrites `defined(X)`/`defined X` into `1`/`0` before the rest of the
    /// line is macro-expanded, since `defined` is evaluated against the
    /// macro table as it stands right now, not after expansion.
    fn read_const_expr(&self, line: Vec<Token>) -> Result<Vec<Token>, CompileError> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < line.len() {
            if line[i].is("defined") {
                let start = line[i].clone();
                i += 1;
                let has_paren = i < line.len() && line[i].is("(");
                if has_paren {
                    i += 1;
                }
                if i >= line.len() || !line[i].is_ident() {
                    return Err(preproc_err(&start, "macro name must be an identifier"));
                }
                let defined = self.macro_is_defined(&line[i].text);
                i += 1;
                if has_paren {
                    if i >= line.len() || !line[i].is(")") {
                        return Err(preproc_err(&start, "expected ')'"));
                    }
                    i += 1;
                }
                out.push(make_num_token(&start, defined as i64));
                continue;
            }
            out.push(line[i].clone());
            i += 1;
        }
        Ok(out)
    }

    fn read_macro_definition(&mut self, stream: &mut VecDeque<Token>, hash_tok: &Token) -> Result<(), CompileError> {
        let name_tok = match stream.pop_front() {
            Some(t) if t.is_ident() => t,
            Some(t) => return Err(preproc_err(&t, "macro name must be an identifier")),
            None => return Err(preproc_err(hash_tok, "macro name must be an identifier")),
        };

        if stream.front().map(|t| !t.has_space && t.is("(")).unwrap_or(false) {
            stream.pop_front(); // '('
            let (params, is_variadic) = self.read_macro_params(stream, &name_tok)?;
            let body = self.copy_line(stream);
            self.macros.insert(
                name_tok.text.clone(),
                Macro {
                    is_objlike: false,
                    params,
                    is_variadic,
                    body,
                    deleted: false,
                    special: SpecialKind::None,
                },
            );
        } else {
            let body = self.copy_line(stream);
            self.macros.insert(
                name_tok.text.clone(),
                Macro {
                    is_objlike: true,
                    params: Vec::new(),
                    is_variadic: false,
                    body,
                    deleted: false,
                    special: SpecialKind::None,
                },
            );
        }
        Ok(())
    }

    fn read_macro_params(&self, stream: &mut VecDeque<Token>, name_tok: &Token) -> Result<(Vec<String>, bool), CompileError> {
        let mut params = Vec::new();
        let mut is_variadic = false;
        loop {
            if stream.front().map(|t| t.is(")")).unwrap_or(true) {
                stream.pop_front();
                break;
            }
            if !params.is_empty() {
                match stream.pop_front() {
                    Some(t) if t.is(",") => {}
                    _ => return Err(preproc_err(name_tok, "expected ','")),
                }
            }
            if stream.front().map(|t| t.is("...")).unwrap_or(false) {
                stream.pop_front();
                is_variadic = true;
                match stream.pop_front() {
                    Some(t) if t.is(")") => {}
                    _ => return Err(preproc_err(name_tok, "expected ')'")),
                }
                break;
            }
            let p = stream
                .pop_front()
                .filter(|t| t.is_ident())
                .ok_or_else(|| preproc_err(name_tok, "expected an identifier"))?;
            params.push(p.text.clone());
        }
        Ok((params, is_variadic))
    }

    fn read_macro_arg_one(&self, stream: &mut VecDeque<Token>, read_rest: bool, call_tok: &Token) -> Result<Vec<Token>, CompileError> {
        let mut out = Vec::new();
        let mut level = 0i32;
        loop {
            let front = stream.front().ok_or_else(|| preproc_err(call_tok, "premature end of input"))?;
            if front.is_eof() {
                return Err(preproc_err(call_tok, "premature end of input"));
            }
            if level == 0 && front.is(")") {
                break;
            }
            if level == 0 && !read_rest && front.is(",") {
                break;
            }
            if front.is("(") {
                level += 1;
            } else if front.is(")") {
                level -= 1;
            }
            out.push(stream.pop_front().unwrap());
        }
        Ok(out)
    }

    fn read_macro_args(&self, stream: &mut VecDeque<Token>, params: &[String], is_variadic: bool, call_tok: &Token) -> Result<(Vec<MacroArg>, Token), CompileError> {
        stream.pop_front(); // '('
        let mut args = Vec::new();
        for (idx, pname) in params.iter().enumerate() {
            if idx > 0 {
                match stream.pop_front() {
                    Some(t) if t.is(",") => {}
                    _ => return Err(preproc_err(call_tok, "too few arguments")),
                }
            }
            let toks = self.read_macro_arg_one(stream, false, call_tok)?;
            args.push(MacroArg { name: pname.clone(), tokens: toks });
        }
        if is_variadic {
            if !params.is_empty() {
                match stream.pop_front() {
                    Some(t) if t.is(",") => {}
                    _ => return Err(preproc_err(call_tok, "too few arguments")),
                }
            }
            let toks = self.read_macro_arg_one(stream, true, call_tok)?;
            args.push(MacroArg {
                name: "__VA_ARGS__".to_string(),
                tokens: toks,
            });
        }
        let rparen = match stream.pop_front() {
            Some(t) if t.is(")") => t,
            _ => return Err(preproc_err(call_tok, "expected ')'")),
        };
        Ok((args, rparen))
    }

    fn expand_macro(&mut self, stream: &mut VecDeque<Token>) -> Result<bool, CompileError> {
        let tok = match stream.front() {
            Some(t) if t.kind == TokenKind::Ident => t.clone(),
            _ => return Ok(false),
        };
        if tok.hideset.contains(&tok.text) {
            return Ok(false);
        }
        let m = match self.macros.get(&tok.text) {
            Some(m) if !m.deleted => m.clone(),
            _ => return Ok(false),
        };

        stream.pop_front();

        if m.is_objlike {
            match m.special {
                SpecialKind::File => {
                    let t = make_str_token(&tok, &tok.file_name.to_string_lossy());
                    stream.push_front(t);
                }
                SpecialKind::Line => {
                    let t = make_num_token(&tok, tok.line_no as i64);
                    stream.push_front(t);
                }
                SpecialKind::None => {
                    let hs = hideset_union(&tok.hideset, &singleton_hideset(&tok.text));
                    let body = add_hideset(&m.body, &hs);
                    for t in body.into_iter().rev() {
                        stream.push_front(t);
                    }
                }
            }
            return Ok(true);
        }

        // Function-like macro not followed by `(` is just an identifier.
        if !stream.front().map(|t| t.is("(")).unwrap_or(false) {
            stream.push_front(tok);
            return Ok(false);
        }

        let (args, rparen) = self.read_macro_args(stream, &m.params, m.is_variadic, &tok)?;
        let hs = hideset_intersection(&tok.hideset, &rparen.hideset);
        let hs = hideset_union(&hs, &singleton_hideset(&tok.text));
        let body = self.subst(&m.body, &args)?;
        let body = add_hideset(&body, &hs);
        for t in body.into_iter().rev() {
            stream.push_front(t);
        }
        Ok(true)
    }

    /// Replaces macro parameters with their actual arguments, handling `#`
    /// (stringize) and `##` (paste) per Prosser's algorithm.
    fn subst(&self, body: &[Token], args: &[MacroArg]) -> Result<Vec<Token>, CompileError> {
        let find_arg = |name: &str| args.iter().find(|a| a.name == name).map(|a| &a.tokens);
        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            if let Some(arg_toks) = find_arg(&body[i].text) {
                if i + 1 < body.len() && body[i + 1].is("##") && arg_toks.is_empty() {
                    i += 2;
                    continue;
                }
                if !arg_toks.is_empty() {
                    out.extend(arg_toks.iter().cloned());
                }
                i += 1;
                continue;
            }

            if body[i].is("##") {
                i += 1;
                if i >= body.len() {
                    return Err(preproc_err(&body[i - 1], "'##' cannot appear at the end of a macro expansion"));
                }
                if let Some(rhs_arg) = find_arg(&body[i].text) {
                    i += 1;
                    if rhs_arg.is_empty() {
                        continue;
                    }
                    let lhs = out.pop().ok_or_else(|| preproc_err(&body[i - 1], "'##' has no preceding token"))?;
                    let pasted = paste(&lhs, &rhs_arg[0])?;
                    out.push(pasted);
                    out.extend(rhs_arg[1..].iter().cloned());
                } else {
                    let lhs = out.pop().ok_or_else(|| preproc_err(&body[i], "'##' has no preceding token"))?;
                    let rhs = body[i].clone();
                    let pasted = paste(&lhs, &rhs)?;
                    out.push(pasted);
                    i += 1;
                }
                continue;
            }

            if body[i].is("#") && i + 1 < body.len() {
                if let Some(arg_toks) = find_arg(&body[i + 1].text) {
                    out.push(stringize(&body[i], arg_toks));
                    i += 2;
                    continue;
                }
            }

            out.push(body[i].clone());
            i += 1;
        }
        Ok(out)
    }

    fn read_include_path(&mut self, stream: &mut VecDeque<Token>, start_tok: &Token) -> Result<String, CompileError> {
        match stream.front() {
            Some(t) if t.kind == TokenKind::Str => {
                let t = stream.pop_front().unwrap();
                self.skip_line(stream);
                let bytes = t.str_contents.clone().unwrap_or_default();
                let filename = String::from_utf8_lossy(&bytes[..bytes.len().saturating_sub(1)]).into_owned();
                if Path::new(&filename).exists() {
                    return Ok(filename);
                }
                self.search_include_paths(&filename, &t)
            }
            Some(t) if t.is("<") => {
                stream.pop_front();
                let mut collected = Vec::new();
                loop {
                    match stream.front() {
                        None => return Err(preproc_err(start_tok, "expected '>'")),
                        Some(t) if t.is_eof() => return Err(preproc_err(start_tok, "expected '>'")),
                        Some(t) if t.is(">") => {
                            stream.pop_front();
                            break;
                        }
                        _ => collected.push(stream.pop_front().unwrap()),
                    }
                }
                self.skip_line(stream);
                let filename = join_tokens(&collected);
                self.search_include_paths(&filename, start_tok)
            }
            Some(t) if t.is_ident() => {
                let line = self.copy_line(stream);
                let expanded = self.preprocess2(line)?;
                let mut expanded_stream: VecDeque<Token> = expanded.into();
                self.read_include_path(&mut expanded_stream, start_tok)
            }
            _ => Err(preproc_err(start_tok, "expected a filename")),
        }
    }

    fn search_include_paths(&self, filename: &str, start: &Token) -> Result<String, CompileError> {
        for dir in &self.include_paths {
            let candidate = dir.join(filename);
            if candidate.exists() {
                return Ok(candidate.to_string_lossy().into_owned());
            }
        }
        Err(preproc_err(start, format!("'{}': file not found", filename)))
    }
}

fn paste(lhs: &Token, rhs: &Token) -> Result<Token, CompileError> {
    let combined = format!("{}{}", lhs.text, rhs.text);
    let toks = tokenizer::tokenize(lhs.file_name.as_ref().clone(), combined.clone(), lhs.file_no)
        .map_err(|_| preproc_err(lhs, format!("pasting forms '{}', an invalid token", combined)))?;
    if toks.len() != 2 || toks[0].is_eof() {
        return Err(preproc_err(lhs, format!("pasting forms '{}', an invalid token", combined)));
    }
    let mut t = toks.into_iter().next().unwrap();
    t.file_name = lhs.file_name.clone();
    t.source = lhs.source.clone();
    t.file_no = lhs.file_no;
    t.line_no = lhs.line_no;
    t.column = lhs.column;
    t.has_space = lhs.has_space;
    t.hideset = empty_hideset();
    Ok(t)
}

fn stringize(hash: &Token, arg_toks: &[Token]) -> Token {
    let joined = join_tokens(arg_toks);
    let mut contents: Vec<u8> = Vec::new();
    for b in joined.bytes() {
        if b == b'\\' || b == b'"' {
            contents.push(b'\\');
        }
        contents.push(b);
    }
    contents.push(0);
    Token {
        kind: TokenKind::Str,
        text: format!("{:?}", joined),
        num_value: None,
        num_ty: None,
        str_contents: Some(contents),
        file_name: hash.file_name.clone(),
        source: hash.source.clone(),
        file_no: hash.file_no,
        line_no: hash.line_no,
        column: hash.column,
        at_bol: false,
        has_space: hash.has_space,
        hideset: empty_hideset(),
    }
}

fn join_adjacent_string_literals(tokens: &mut Vec<Token>) {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Str {
            let mut combined = tokens[i].str_contents.clone().unwrap_or_default();
            combined.pop();
            let mut j = i + 1;
            while j < tokens.len() && tokens[j].kind == TokenKind::Str {
                let mut next = tokens[j].str_contents.clone().unwrap_or_default();
                next.pop();
                combined.extend(next);
                j += 1;
            }
            combined.push(0);
            let mut t = tokens[i].clone();
            t.str_contents = Some(combined);
            out.push(t);
            i = j;
        } else {
            out.push(tokens[i].clone());
            i += 1;
        }
    }
    *tokens = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn run(src: &str) -> Vec<Token> {
        let toks = tokenize(PathBuf::from("<test>"), src.to_string(), 0).unwrap();
        let mut pp = Preprocessor::new(&CompilerConfig::new());
        pp.preprocess(toks).unwrap()
    }

    fn texts(toks: &[Token]) -> Vec<String> {
        toks.iter().filter(|t| !t.is_eof()).map(|t| t.text.clone()).collect()
    }

    #[test]
    fn object_like_macro_expands() {
        let toks = run("#define N 42\nN + 1\n");
        assert_eq!(texts(&toks), vec!["42", "+", "1"]);
    }

    #[test]
    fn function_like_macro_parenthesizes_arguments() {
        // MUL(1+2, 3) expanding to ((1+2)*(3)) depends on the macro body
        // itself carrying parens; this exercises substitution plumbing.
        let toks = run("#define MUL(a, b) ((a)*(b))\nMUL(1+2, 3)\n");
        assert_eq!(texts(&toks), vec!["(", "(", "1", "+", "2", ")", "*", "(", "3", ")", ")"]);
    }

    #[test]
    fn token_pasting() {
        let toks = run("#define CAT(a, b) a##b\nCAT(foo, bar)\n");
        assert_eq!(texts(&toks), vec!["foobar"]);
    }

    #[test]
    fn stringize_operator() {
        let toks = run("#define STR(x) #x\nSTR(hello world)\n");
        let s = toks.iter().find(|t| t.kind == TokenKind::Str).unwrap();
        let bytes = s.str_contents.as_ref().unwrap();
        assert_eq!(&bytes[..bytes.len() - 1], b"hello world");
    }

    #[test]
    fn conditional_compilation_respects_define_override() {
        let toks_off = {
            let toks = tokenize(PathBuf::from("<test>"), "#ifdef FOO\n1\n#else\n2\n#endif\n".to_string(), 0).unwrap();
            let mut pp = Preprocessor::new(&CompilerConfig::new());
            pp.preprocess(toks).unwrap()
        };
        assert_eq!(texts(&toks_off), vec!["2"]);

        let toks_on = {
            let toks = tokenize(PathBuf::from("<test>"), "#ifdef FOO\n1\n#else\n2\n#endif\n".to_string(), 0).unwrap();
            let cfg = CompilerConfig::new().with_define("FOO", "1");
            let mut pp = Preprocessor::new(&cfg);
            pp.preprocess(toks).unwrap()
        };
        assert_eq!(texts(&toks_on), vec!["1"]);
    }

    #[test]
    fn adjacent_string_literals_concatenate() {
        let toks = run("\"foo\" \"bar\"\n");
        let s = &toks[0];
        let bytes = s.str_contents.as_ref().unwrap();
        assert_eq!(&bytes[..bytes.len() - 1], b"foobar");
    }

    #[test]
    fn self_referential_macro_does_not_recurse() {
        let toks = run("#define X X + 1\nX\n");
        assert_eq!(texts(&toks), vec!["X", "+", "1"]);
    }

    #[test]
    fn pragma_is_silently_ignored() {
        let toks = run("#pragma once\nint x;\n");
        assert_eq!(texts(&toks), vec!["int", "x", ";"]);
    }

    #[test]
    fn defined_operator_in_if() {
        let toks = tokenize(PathBuf::from("<test>"), "#define FOO 1\n#if defined(FOO)\nyes\n#endif\n".to_string(), 0).unwrap();
        let mut pp = Preprocessor::new(&CompilerConfig::new());
        let out = pp.preprocess(toks).unwrap();
        assert_eq!(texts(&out), vec!["yes"]);
    }
}
