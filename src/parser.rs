//! Recursive-descent parser
//!
//! Builds a typed AST directly (no separate untyped-then-typed pass): every
//! expression node gets its `ty` filled in by [`types::add_type`] as soon as
//! its subtree is complete, so later siblings can already see it (needed for
//! things like `sizeof` applied to an expression just built, or the usual
//! arithmetic conversions).
//!
//! Declarators use a placeholder trick: `int (*fp)(void)` allocates an
//! empty [`types::placeholder`], recurses into the parenthesized inner
//! declarator with the placeholder as its base type, then patches the
//! placeholder in place (`Type::replace_with`) once the outer `(void)`
//! suffix is known. Every handle taken during the recursive descent observes
//! the patched result because they all alias the same placeholder.
//!
//! `switch`/`case` doesn't need a `case_next`/`default_case` pointer-linked
//! list: codegen walks a `switch`'s body once to discover its
//! `Case`/`default` children and assign each a label (cached in
//! `Node::unique_label`), then reuses those labels during the ordinary
//! sequential emission pass over the same tree.

use std::rc::Rc;

use crate::ast::{self, new_global_var, new_local_var, Function, Node, NodeKind, Program, Relocation, Var};
use crate::diagnostics::Diagnostic;
use crate::error::CompileError;
use crate::scope::{ScopeStack, VarScopeEntry};
use crate::token::Token;
use crate::types::{
    self, add_type, array_of, copy_type, func_type, incomplete_array_of, is_integer, is_numeric,
    is_ptr_like, placeholder, pointer_to, struct_type, ty_char, ty_double, ty_float, ty_int,
    ty_long, ty_uchar, ty_uint, ty_ulong, ty_void, union_type, Member, Type, TypeKind,
};

fn parse_err(tok: &Token, msg: impl Into<String>) -> CompileError {
    CompileError::Parse(Diagnostic::error_at_token(tok, msg.into()))
}

fn expr_stmt(e: Node) -> Node {
    let tok = e.tok.clone();
    Node::new_unary(NodeKind::ExprStmt, e, tok)
}

/// Storage-class specifiers gathered alongside a type specifier.
#[derive(Default, Clone, Copy)]
struct StorageClass {
    is_typedef: bool,
    is_static: bool,
    is_extern: bool,
}

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    scopes: ScopeStack,
    /// Locals of the function currently being parsed.
    locals: Vec<Var>,
    globals: Vec<Var>,
    /// Parameter names collected by the most recent `func_params` call, read
    /// back by the function-definition call site (declarators have no name
    /// field to carry them on).
    last_param_names: Vec<String>,
    anon_count: usize,
    tmp_count: usize,
}

pub fn parse(tokens: Vec<Token>) -> Result<Program, CompileError> {
    let mut p = Parser {
        toks: tokens,
        pos: 0,
        scopes: ScopeStack::new(),
        locals: Vec::new(),
        globals: Vec::new(),
        last_param_names: Vec::new(),
        anon_count: 0,
        tmp_count: 0,
    };
    p.program()
}

impl Parser {
    // ---- token-stream primitives -----------------------------------

    fn cur(&self) -> &Token {
        &self.toks[self.pos]
    }

    fn at_eof(&self) -> bool {
        self.cur().is_eof()
    }

    fn is(&self, s: &str) -> bool {
        self.cur().is(s)
    }

    fn consume(&mut self, s: &str) -> bool {
        if self.is(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Token {
        let t = self.cur().clone();
        if !t.is_eof() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, s: &str) -> Result<Token, CompileError> {
        if self.is(s) {
            Ok(self.advance())
        } else {
            Err(parse_err(self.cur(), format!("expected '{}'", s)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        if !self.cur().is_ident() {
            return Err(parse_err(self.cur(), "expected an identifier"));
        }
        Ok(self.advance().text)
    }

    fn find_typedef(&self, name: &str) -> Option<Type> {
        match self.scopes.find_var(name) {
            Some(VarScopeEntry::Typedef(ty)) => Some(ty.clone()),
            _ => None,
        }
    }

    fn is_typename(&self) -> bool {
        const KEYWORDS: &[&str] = &[
            "void", "_Bool", "char", "short", "int", "long", "float", "double", "struct", "union",
            "enum", "typedef", "static", "extern", "const", "volatile", "restrict", "inline",
            "register", "signed", "unsigned",
        ];
        let t = self.cur();
        if !t.is_ident() {
            return false;
        }
        KEYWORDS.contains(&t.text.as_str()) || self.find_typedef(&t.text).is_some()
    }

    fn fresh_tmp(&mut self, ty: Type) -> Var {
        self.tmp_count += 1;
        let v = new_local_var(format!(".L.tmp{}", self.tmp_count), ty);
        self.locals.push(v.clone());
        v
    }

    // ---- program ------------------------------------------------------

    fn program(&mut self) -> Result<Program, CompileError> {
        let mut prog = Program::new();
        while !self.at_eof() {
            let (base_ty, sc) = self.typespec()?;
            if sc.is_typedef {
                self.typedef_decl(base_ty)?;
                continue;
            }
            // Peek ahead: does this declarator chain end in a function body?
            let (ty, name) = self.declarator(base_ty.clone())?;
            if ty.kind() == TypeKind::Func {
                if self.is("{") {
                    let func = self.function_body(ty, name, sc)?;
                    prog.functions.push(func);
                } else {
                    // Prototype: register the name, don't emit a definition.
                    self.expect(";")?;
                    let var = new_global_var(name.clone(), ty.clone(), true);
                    self.scopes.push_var(&name, VarScopeEntry::Var(var));
                }
                continue;
            }
            self.global_var_tail(ty, name, sc)?;
        }
        prog.globals = std::mem::take(&mut self.globals);
        Ok(prog)
    }

    fn typedef_decl(&mut self, base_ty: Type) -> Result<(), CompileError> {
        let mut first = true;
        loop {
            if !first {
                if !self.consume(",") {
                    break;
                }
            }
            first = false;
            let (ty, name) = self.declarator(base_ty.clone())?;
            self.scopes.push_var(&name, VarScopeEntry::Typedef(ty));
        }
        self.expect(";")?;
        Ok(())
    }

    fn global_var_tail(&mut self, ty: Type, name: String, sc: StorageClass) -> Result<(), CompileError> {
        let mut ty = ty;
        let mut name = name;
        loop {
            let var = new_global_var(name.clone(), ty.clone(), sc.is_static);
            self.scopes.push_var(&name, VarScopeEntry::Var(var.clone()));
            if self.consume("=") {
                let (data, relocs) = self.global_initializer(&ty)?;
                {
                    let mut vd = var.borrow_mut();
                    vd.ty = ty.clone();
                    vd.init_data = Some(data);
                    vd.relocations = relocs;
                }
            }
            self.globals.push(var);
            if !self.consume(",") {
                break;
            }
            let base = self.base_of(&ty);
            let (ty2, name2) = self.declarator(base)?;
            ty = ty2;
            name = name2;
        }
        self.expect(";")?;
        Ok(())
    }

    /// Best-effort recovery of the "base type" a comma-separated declarator
    /// list shares; used only to re-run `declarator` for later names in a
    /// multi-declarator global (`int a, *b;`). Arrays/pointers are declarator
    /// suffixes, not part of the shared base, so stripping down to a
    /// non-derived type is always safe here.
    fn base_of(&self, ty: &Type) -> Type {
        let mut t = ty.clone();
        loop {
            match t.kind() {
                TypeKind::Ptr | TypeKind::Array => t = t.base().unwrap(),
                _ => return t,
            }
        }
    }

    // ---- declarations: typespec / declarator ---------------------------

    fn typespec(&mut self) -> Result<(Type, StorageClass), CompileError> {
        #[derive(Default)]
        struct Counts {
            void_: i32,
            bool_: i32,
            char_: i32,
            short_: i32,
            int_: i32,
            long_: i32,
            float_: i32,
            double_: i32,
            signed_: i32,
            unsigned_: i32,
        }
        let mut counts = Counts::default();
        let mut sc = StorageClass::default();
        let mut is_const = false;
        let mut explicit: Option<Type> = None;

        loop {
            if !self.cur().is_ident() {
                break;
            }
            let text = self.cur().text.clone();
            match text.as_str() {
                "typedef" => {
                    sc.is_typedef = true;
                    self.advance();
                }
                "static" => {
                    sc.is_static = true;
                    self.advance();
                }
                "extern" => {
                    sc.is_extern = true;
                    self.advance();
                }
                "const" => {
                    is_const = true;
                    self.advance();
                }
                "volatile" | "restrict" | "inline" | "register" => {
                    self.advance();
                }
                "struct" => {
                    explicit = Some(self.struct_union_decl(true)?);
                    break;
                }
                "union" => {
                    explicit = Some(self.struct_union_decl(false)?);
                    break;
                }
                "enum" => {
                    explicit = Some(self.enum_specifier()?);
                    break;
                }
                "void" => {
                    counts.void_ += 1;
                    self.advance();
                }
                "_Bool" => {
                    counts.bool_ += 1;
                    self.advance();
                }
                "char" => {
                    counts.char_ += 1;
                    self.advance();
                }
                "short" => {
                    counts.short_ += 1;
                    self.advance();
                }
                "int" => {
                    counts.int_ += 1;
                    self.advance();
                }
                "long" => {
                    counts.long_ += 1;
                    self.advance();
                }
                "float" => {
                    counts.float_ += 1;
                    self.advance();
                }
                "double" => {
                    counts.double_ += 1;
                    self.advance();
                }
                "signed" => {
                    counts.signed_ += 1;
                    self.advance();
                }
                "unsigned" => {
                    counts.unsigned_ += 1;
                    self.advance();
                }
                _ => {
                    let all_zero = counts.void_ == 0
                        && counts.bool_ == 0
                        && counts.char_ == 0
                        && counts.short_ == 0
                        && counts.int_ == 0
                        && counts.long_ == 0
                        && counts.float_ == 0
                        && counts.double_ == 0
                        && counts.signed_ == 0
                        && counts.unsigned_ == 0;
                    if all_zero && explicit.is_none() {
                        if let Some(ty) = self.find_typedef(&text) {
                            explicit = Some(ty);
                            self.advance();
                        }
                    }
                    break;
                }
            }
        }

        let mut ty = if let Some(ty) = explicit {
            ty
        } else if counts.void_ > 0 {
            ty_void()
        } else if counts.bool_ > 0 {
            types::ty_bool()
        } else if counts.double_ > 0 {
            ty_double()
        } else if counts.float_ > 0 {
            ty_float()
        } else if counts.char_ > 0 {
            if counts.unsigned_ > 0 {
                ty_uchar()
            } else {
                ty_char()
            }
        } else if counts.short_ > 0 {
            if counts.unsigned_ > 0 {
                types::ty_ushort()
            } else {
                types::ty_short()
            }
        } else if counts.long_ > 0 {
            if counts.unsigned_ > 0 {
                ty_ulong()
            } else {
                ty_long()
            }
        } else if counts.unsigned_ > 0 {
            ty_uint()
        } else {
            ty_int()
        };

        if is_const {
            let c = copy_type(&ty);
            c.set_const(true);
            ty = c;
        }
        Ok((ty, sc))
    }

    /// `declarator := "*"* ("(" declarator ")" | ident) type-suffix`
    fn declarator(&mut self, base: Type) -> Result<(Type, String), CompileError> {
        let mut ty = base;
        while self.consume("*") {
            ty = pointer_to(ty);
            while self.consume("const") || self.consume("volatile") || self.consume("restrict") {}
        }
        if self.consume("(") {
            let ph = placeholder();
            let (_, name) = self.declarator(ph.clone())?;
            self.expect(")")?;
            let suffixed = self.type_suffix(ty)?;
            ph.replace_with(&suffixed);
            return Ok((ph, name));
        }
        let name = self.expect_ident()?;
        let ty = self.type_suffix(ty)?;
        Ok((ty, name))
    }

    fn abstract_declarator(&mut self, base: Type) -> Result<Type, CompileError> {
        let mut ty = base;
        while self.consume("*") {
            ty = pointer_to(ty);
        }
        if self.consume("(") {
            let ph = placeholder();
            let inner = self.abstract_declarator(ph.clone())?;
            self.expect(")")?;
            let suffixed = self.type_suffix(ty)?;
            ph.replace_with(&suffixed);
            return Ok(inner);
        }
        self.type_suffix(ty)
    }

    /// `type-suffix := "(" func-params | "[" const-expr? "]" type-suffix | ε`
    fn type_suffix(&mut self, base: Type) -> Result<Type, CompileError> {
        if self.consume("(") {
            return self.func_params(base);
        }
        if self.consume("[") {
            if self.consume("]") {
                let elem = self.type_suffix(base)?;
                return Ok(incomplete_array_of(elem));
            }
            let tok = self.cur().clone();
            let len_node = self.conditional()?;
            let mut len_node = len_node;
            add_type(&mut len_node);
            let len = crate::const_eval::eval_const_node(&len_node)
                .map_err(|_| parse_err(&tok, "array length must be a constant expression"))?;
            self.expect("]")?;
            let elem = self.type_suffix(base)?;
            return Ok(array_of(elem, len as i32));
        }
        Ok(base)
    }

    fn func_params(&mut self, return_ty: Type) -> Result<Type, CompileError> {
        let mut params = Vec::new();
        let mut names = Vec::new();
        let mut is_variadic = false;
        if !self.is(")") {
            if self.is("void") && {
                // lookahead: "(void)" with nothing else
                let save = self.pos;
                self.advance();
                let is_close = self.is(")");
                self.pos = save;
                is_close
            } {
                self.advance();
            } else {
                loop {
                    if self.consume("...") {
                        is_variadic = true;
                        break;
                    }
                    let (base, _) = self.typespec()?;
                    let (mut ty, name) = self.declarator(base)?;
                    if ty.kind() == TypeKind::Array {
                        ty = pointer_to(ty.base().unwrap());
                    } else if ty.kind() == TypeKind::Func {
                        ty = pointer_to(ty);
                    }
                    params.push(ty);
                    names.push(name);
                    if !self.consume(",") {
                        break;
                    }
                }
            }
        }
        self.expect(")")?;
        self.last_param_names = names;
        Ok(func_type_with(return_ty, params, is_variadic))
    }

    fn typename(&mut self) -> Result<Type, CompileError> {
        let (base, _) = self.typespec()?;
        self.abstract_declarator(base)
    }

    // ---- struct / union / enum ------------------------------------------

    fn struct_union_decl(&mut self, is_struct: bool) -> Result<Type, CompileError> {
        self.advance(); // "struct" / "union"
        let tag = if self.cur().is_ident() && !self.is("{") {
            let name = self.advance().text;
            Some(name)
        } else {
            None
        };

        if let Some(ref name) = tag {
            if !self.is("{") {
                if let Some(ty) = self.scopes.find_tag(name) {
                    return Ok(ty.clone());
                }
                let ty = if is_struct { struct_type() } else { union_type() };
                ty.set_tag(name.clone());
                self.scopes.push_tag(name, ty.clone());
                return Ok(ty);
            }
        }

        self.expect("{")?;
        let mut members = self.struct_members()?;
        self.expect("}")?;

        let ty = match &tag {
            Some(name) => match self.scopes.find_tag_in_current_scope(name) {
                Some(existing) => existing.clone(),
                None => {
                    let t = if is_struct { struct_type() } else { union_type() };
                    t.set_tag(name.clone());
                    self.scopes.push_tag(name, t.clone());
                    t
                }
            },
            None => {
                if is_struct {
                    struct_type()
                } else {
                    union_type()
                }
            }
        };

        let (size, align) = if is_struct {
            types::layout_struct(&mut members)
        } else {
            types::layout_union(&mut members)
        };
        ty.set_members(members, size, align);
        Ok(ty)
    }

    fn struct_members(&mut self) -> Result<Vec<Member>, CompileError> {
        let mut members = Vec::new();
        while !self.is("}") {
            let (base, _) = self.typespec()?;
            let mut first = true;
            loop {
                if !first && !self.consume(",") {
                    break;
                }
                if first && self.is(":") {
                    self.advance();
                    let tok = self.cur().clone();
                    let mut w = self.conditional()?;
                    add_type(&mut w);
                    let width = crate::const_eval::eval_const_node(&w)
                        .map_err(|_| parse_err(&tok, "bit-field width must be constant"))?;
                    members.push(Member {
                        name: String::new(),
                        ty: base.clone(),
                        align: base.align(),
                        offset: 0,
                        is_bitfield: true,
                        bit_offset: 0,
                        bit_width: width as i32,
                    });
                    first = false;
                    continue;
                }
                let (ty, name) = self.declarator(base.clone())?;
                if self.consume(":") {
                    let tok = self.cur().clone();
                    let mut w = self.conditional()?;
                    add_type(&mut w);
                    let width = crate::const_eval::eval_const_node(&w)
                        .map_err(|_| parse_err(&tok, "bit-field width must be constant"))?;
                    members.push(Member {
                        name,
                        ty: ty.clone(),
                        align: ty.align(),
                        offset: 0,
                        is_bitfield: true,
                        bit_offset: 0,
                        bit_width: width as i32,
                    });
                } else {
                    members.push(Member {
                        name,
                        align: ty.align(),
                        ty,
                        offset: 0,
                        is_bitfield: false,
                        bit_offset: 0,
                        bit_width: 0,
                    });
                }
                first = false;
            }
            self.expect(";")?;
        }
        Ok(members)
    }

    fn enum_specifier(&mut self) -> Result<Type, CompileError> {
        self.advance(); // "enum"
        let tag = if self.cur().is_ident() && !self.is("{") {
            Some(self.advance().text)
        } else {
            None
        };

        if !self.is("{") {
            let name = tag.ok_or_else(|| parse_err(self.cur(), "expected enum tag or '{'"))?;
            return self
                .scopes
                .find_tag(&name)
                .cloned()
                .ok_or_else(|| parse_err(self.cur(), format!("unknown enum tag '{}'", name)));
        }

        self.expect("{")?;
        let ty = types::enum_type();
        let mut val = 0i64;
        loop {
            if self.is("}") {
                break;
            }
            let name = self.expect_ident()?;
            if self.consume("=") {
                let tok = self.cur().clone();
                let mut n = self.conditional()?;
                add_type(&mut n);
                val = crate::const_eval::eval_const_node(&n)
                    .map_err(|_| parse_err(&tok, "enumerator value must be constant"))?;
            }
            self.scopes.push_var(&name, VarScopeEntry::EnumConst(val));
            val += 1;
            if !self.consume(",") {
                break;
            }
        }
        self.expect("}")?;
        ty.set_incomplete(false);
        if let Some(name) = tag {
            ty.set_tag(name.clone());
            self.scopes.push_tag(&name, ty.clone());
        }
        Ok(ty)
    }

    // ---- function definitions -------------------------------------------

    fn function_body(&mut self, ty: Type, name: String, sc: StorageClass) -> Result<Function, CompileError> {
        self.locals = Vec::new();
        self.scopes.enter_scope();

        let param_tys = ty.params();
        let param_names = std::mem::take(&mut self.last_param_names);
        let mut params = Vec::new();
        for (pty, pname) in param_tys.iter().zip(param_names.iter()) {
            let var = new_local_var(pname.clone(), pty.clone());
            self.locals.push(var.clone());
            self.scopes.push_var(pname, VarScopeEntry::Var(var.clone()));
            params.push(var);
        }

        let body = self.compound_stmt()?;
        self.scopes.leave_scope();

        Ok(Function {
            name,
            params,
            is_static: sc.is_static,
            is_variadic: ty.is_variadic(),
            body,
            locals: std::mem::take(&mut self.locals),
            stack_size: 0,
        })
    }

    // ---- statements -------------------------------------------------------

    fn compound_stmt(&mut self) -> Result<Node, CompileError> {
        let tok = self.expect("{")?;
        self.scopes.enter_scope();
        let mut body = Vec::new();
        while !self.is("}") {
            if self.is_typename() {
                self.declaration(&mut body)?;
            } else {
                let mut s = self.stmt()?;
                add_type(&mut s);
                body.push(s);
            }
        }
        self.scopes.leave_scope();
        self.expect("}")?;
        let mut node = Node::new(NodeKind::Block, tok);
        node.body = body;
        Ok(node)
    }

    fn declaration(&mut self, out: &mut Vec<Node>) -> Result<(), CompileError> {
        let (base, sc) = self.typespec()?;
        if sc.is_typedef {
            self.typedef_decl(base)?;
            return Ok(());
        }
        let mut first = true;
        loop {
            if !first && !self.consume(",") {
                break;
            }
            first = false;
            if self.is(";") {
                break;
            }
            let (ty, name) = self.declarator(base.clone())?;
            if ty.is_incomplete() && ty.kind() != TypeKind::Array {
                return Err(parse_err(self.cur(), format!("variable '{}' has incomplete type", name)));
            }
            let var = new_local_var(name.clone(), ty.clone());
            self.locals.push(var.clone());
            self.scopes.push_var(&name, VarScopeEntry::Var(var.clone()));
            if self.consume("=") {
                self.lvar_initializer(out, var, &ty)?;
            }
        }
        self.expect(";")?;
        Ok(())
    }

    fn stmt(&mut self) -> Result<Node, CompileError> {
        let tok = self.cur().clone();

        if self.is("{") {
            return self.compound_stmt();
        }

        if self.consume_kw("return") {
            let mut n = Node::new(NodeKind::Return, tok);
            if !self.is(";") {
                let e = self.expr()?;
                n.lhs = Some(Box::new(e));
            }
            self.expect(";")?;
            add_type(&mut n);
            return Ok(n);
        }

        if self.consume_kw("if") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let then = self.stmt()?;
            let mut n = Node::new(NodeKind::If, tok);
            n.cond = Some(Box::new(cond));
            n.then = Some(Box::new(then));
            if self.consume_kw("else") {
                n.els = Some(Box::new(self.stmt()?));
            }
            return Ok(n);
        }

        if self.consume_kw("for") {
            self.expect("(")?;
            self.scopes.enter_scope();
            let mut n = Node::new(NodeKind::For, tok);
            if self.is_typename() {
                let mut inits = Vec::new();
                self.declaration(&mut inits)?;
                let mut blk = Node::new(NodeKind::Block, self.cur().clone());
                blk.body = inits;
                n.init = Some(Box::new(blk));
            } else if !self.is(";") {
                let e = self.expr()?;
                n.init = Some(Box::new(expr_stmt(e)));
                self.expect(";")?;
            } else {
                self.expect(";")?;
            }
            if !self.is(";") {
                n.cond = Some(Box::new(self.expr()?));
            }
            self.expect(";")?;
            if !self.is(")") {
                n.inc = Some(Box::new(self.expr()?));
            }
            self.expect(")")?;
            n.then = Some(Box::new(self.stmt()?));
            self.scopes.leave_scope();
            return Ok(n);
        }

        if self.consume_kw("while") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let mut n = Node::new(NodeKind::For, tok);
            n.cond = Some(Box::new(cond));
            n.then = Some(Box::new(self.stmt()?));
            return Ok(n);
        }

        if self.consume_kw("do") {
            let then = self.stmt()?;
            self.expect_kw("while")?;
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            self.expect(";")?;
            let mut n = Node::new(NodeKind::Do, tok);
            n.then = Some(Box::new(then));
            n.cond = Some(Box::new(cond));
            return Ok(n);
        }

        if self.consume_kw("switch") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let mut n = Node::new(NodeKind::Switch, tok);
            n.cond = Some(Box::new(cond));
            n.then = Some(Box::new(self.stmt()?));
            return Ok(n);
        }

        if self.consume_kw("case") {
            let vtok = self.cur().clone();
            let mut v = self.conditional()?;
            add_type(&mut v);
            let val = crate::const_eval::eval_const_node(&v)
                .map_err(|_| parse_err(&vtok, "case label does not reduce to a constant"))?;
            self.expect(":")?;
            let mut n = Node::new(NodeKind::Case, tok);
            n.case_val = val;
            n.lhs = Some(Box::new(self.stmt()?));
            return Ok(n);
        }

        if self.consume_kw("default") {
            self.expect(":")?;
            let mut n = Node::new(NodeKind::Case, tok);
            n.is_default_case = true;
            n.lhs = Some(Box::new(self.stmt()?));
            return Ok(n);
        }

        if self.consume_kw("break") {
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Break, tok));
        }

        if self.consume_kw("continue") {
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Continue, tok));
        }

        if self.consume_kw("goto") {
            let name = self.expect_ident()?;
            self.expect(";")?;
            let mut n = Node::new(NodeKind::Goto, tok);
            n.label_name = name;
            return Ok(n);
        }

        if self.cur().is_ident() && self.peek_is(1, ":") {
            let name = self.advance().text;
            self.advance(); // ':'
            let mut n = Node::new(NodeKind::Label, tok);
            n.label_name = name;
            n.lhs = Some(Box::new(self.stmt()?));
            return Ok(n);
        }

        self.expr_stmt_()
    }

    fn peek_is(&self, ahead: usize, s: &str) -> bool {
        self.toks.get(self.pos + ahead).map(|t| t.is(s)).unwrap_or(false)
    }

    /// Keywords aren't reserved punctuators, so matching them is a plain
    /// identifier-text compare (mirrors `is_typename`'s keyword list).
    fn consume_kw(&mut self, kw: &str) -> bool {
        if self.cur().is_ident() && self.is(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), CompileError> {
        if self.consume_kw(kw) {
            Ok(())
        } else {
            Err(parse_err(self.cur(), format!("expected '{}'", kw)))
        }
    }

    fn expr_stmt_(&mut self) -> Result<Node, CompileError> {
        let tok = self.cur().clone();
        if self.consume(";") {
            return Ok(Node::new(NodeKind::NullExpr, tok));
        }
        let e = self.expr()?;
        self.expect(";")?;
        Ok(expr_stmt(e))
    }

    // ---- initializers -------------------------------------------------

    fn lvar_initializer(&mut self, out: &mut Vec<Node>, var: Var, ty: &Type) -> Result<(), CompileError> {
        if ty.kind() == TypeKind::Array && ty.base().map(|b| b.kind()) == Some(TypeKind::Char) && self.cur().kind == crate::token::TokenKind::Str {
            let tok = self.advance();
            let bytes = tok.str_contents.clone().unwrap_or_default();
            if ty.is_incomplete() {
                ty.set_array_len(bytes.len() as i32);
            }
            self.emit_byte_assigns(out, &var, &bytes, ty.array_len());
            return Ok(());
        }
        if self.is("{") {
            self.advance();
            self.lvar_brace_initializer(out, &var, ty)?;
            if !self.consume(",") {
                self.expect("}")?;
            } else {
                self.expect("}")?;
            }
            return Ok(());
        }
        let tok = self.cur().clone();
        let rhs = self.assign()?;
        let lhs = Node::new_var_node(var, tok.clone());
        let mut n = Node::new_binary(NodeKind::Assign, lhs, rhs, tok);
        n.is_init = true;
        add_type(&mut n);
        out.push(expr_stmt(n));
        Ok(())
    }

    fn emit_byte_assigns(&mut self, out: &mut Vec<Node>, var: &Var, bytes: &[u8], len: i32) {
        let tok = var.borrow().ty.clone();
        let _ = tok; // type only, no token available here; use a synthetic eof-like token via var name is unnecessary
        for i in 0..len as usize {
            let b = *bytes.get(i).unwrap_or(&0) as i64;
            let t = self.toks[self.pos].clone();
            let idx = Node::new_num(i as i64, t.clone());
            let elem_ptr = Node::new_binary(
                NodeKind::Add,
                Node::new_var_node(var.clone(), t.clone()),
                idx,
                t.clone(),
            );
            let mut deref = Node::new_unary(NodeKind::Deref, elem_ptr, t.clone());
            add_type(&mut deref);
            let rhs = Node::new_num(b, t.clone());
            let mut assign = Node::new_binary(NodeKind::Assign, deref, rhs, t.clone());
            assign.is_init = true;
            add_type(&mut assign);
            out.push(expr_stmt(assign));
        }
    }

    fn lvar_brace_initializer(&mut self, out: &mut Vec<Node>, var: &Var, ty: &Type) -> Result<(), CompileError> {
        match ty.kind() {
            TypeKind::Array => {
                let elem_ty = ty.base().unwrap();
                let mut i = 0i32;
                while !self.is("}") {
                    let t = self.toks[self.pos].clone();
                    let idx = Node::new_num(i as i64, t.clone());
                    let elem_addr = Node::new_binary(
                        NodeKind::Add,
                        Node::new_var_node(var.clone(), t.clone()),
                        idx,
                        t.clone(),
                    );
                    let rhs = self.assign()?;
                    let mut deref = Node::new_unary(NodeKind::Deref, elem_addr, t.clone());
                    add_type(&mut deref);
                    let mut assign = Node::new_binary(NodeKind::Assign, deref, rhs, t.clone());
                    assign.is_init = true;
                    add_type(&mut assign);
                    out.push(expr_stmt(assign));
                    i += 1;
                    if !self.consume(",") {
                        break;
                    }
                }
                if ty.is_incomplete() {
                    ty.set_array_len(i.max(ty.array_len()));
                }
            }
            TypeKind::Struct | TypeKind::Union => {
                let members = ty.members();
                let mut idx = 0usize;
                while !self.is("}") && idx < members.len() {
                    let m = &members[idx];
                    let t = self.toks[self.pos].clone();
                    let rhs = self.assign()?;
                    let mem_node = Node {
                        member: Some(m.clone()),
                        ..Node::new_unary(NodeKind::Member, Node::new_var_node(var.clone(), t.clone()), t.clone())
                    };
                    let mut mem_node = mem_node;
                    add_type(&mut mem_node);
                    let mut assign = Node::new_binary(NodeKind::Assign, mem_node, rhs, t.clone());
                    assign.is_init = true;
                    add_type(&mut assign);
                    out.push(expr_stmt(assign));
                    idx += 1;
                    if !self.consume(",") {
                        break;
                    }
                }
            }
            _ => {
                self.lvar_initializer(out, var.clone(), ty)?;
            }
        }
        Ok(())
    }

    // ---- global initializers --------------------------------------------

    fn global_initializer(&mut self, ty: &Type) -> Result<(Vec<u8>, Vec<Relocation>), CompileError> {
        if ty.kind() == TypeKind::Array
            && ty.base().map(|b| b.kind()) == Some(TypeKind::Char)
            && self.cur().kind == crate::token::TokenKind::Str
        {
            let tok = self.advance();
            let mut bytes = tok.str_contents.clone().unwrap_or_default();
            if ty.is_incomplete() {
                ty.set_array_len(bytes.len() as i32);
            }
            bytes.resize(ty.size().max(bytes.len() as i32) as usize, 0);
            bytes.truncate(ty.size() as usize);
            return Ok((bytes, Vec::new()));
        }

        if self.is("{") {
            self.advance();
            let mut buf = vec![0u8; ty.size().max(0) as usize];
            let mut relocs = Vec::new();
            match ty.kind() {
                TypeKind::Array => {
                    let elem_ty = ty.base().unwrap();
                    let mut i = 0usize;
                    while !self.is("}") {
                        let (data, sub_relocs) = self.global_initializer(&elem_ty)?;
                        let off = i * elem_ty.size() as usize;
                        write_at(&mut buf, off, &data);
                        relocs.extend(sub_relocs.into_iter().map(|r| Relocation {
                            offset: r.offset + off as i32,
                            ..r
                        }));
                        i += 1;
                        if !self.consume(",") {
                            break;
                        }
                    }
                    if ty.is_incomplete() {
                        ty.set_array_len(i as i32);
                        buf.resize(elem_ty.size() as usize * i, 0);
                    }
                }
                TypeKind::Struct | TypeKind::Union => {
                    let members = ty.members();
                    let mut idx = 0usize;
                    while !self.is("}") && idx < members.len() {
                        let m = &members[idx];
                        let (data, sub_relocs) = self.global_initializer(&m.ty)?;
                        write_at(&mut buf, m.offset as usize, &data);
                        relocs.extend(sub_relocs.into_iter().map(|r| Relocation {
                            offset: r.offset + m.offset,
                            ..r
                        }));
                        idx += 1;
                        if !self.consume(",") {
                            break;
                        }
                    }
                }
                _ => {
                    let (data, sub_relocs) = self.global_initializer(ty)?;
                    write_at(&mut buf, 0, &data);
                    relocs = sub_relocs;
                }
            }
            self.expect("}")?;
            return Ok((buf, relocs));
        }

        // Scalar constant expression, possibly an address-of for relocations.
        let mut node = self.assign()?;
        add_type(&mut node);
        self.encode_scalar_initializer(&node, ty)
    }

    fn encode_scalar_initializer(&self, node: &Node, ty: &Type) -> Result<(Vec<u8>, Vec<Relocation>), CompileError> {
        if let (NodeKind::Addr, Some(inner)) = (node.kind, node.lhs.as_deref()) {
            if let Some((label, addend)) = addr_target(inner, 0) {
                return Ok((vec![0u8; 8], vec![Relocation { offset: 0, label, addend }]));
            }
        }
        if node.kind == NodeKind::Add || node.kind == NodeKind::Sub {
            if let (Some(l), Some(r)) = (node.lhs.as_deref(), node.rhs.as_deref()) {
                if l.kind == NodeKind::Addr {
                    if let Some(inner) = l.lhs.as_deref() {
                        if let (Some((label, base_addend)), Ok(n)) =
                            (addr_target(inner, 0), crate::const_eval::eval_const_node(r))
                        {
                            let addend = if node.kind == NodeKind::Add { base_addend + n } else { base_addend - n };
                            return Ok((vec![0u8; 8], vec![Relocation { offset: 0, label, addend }]));
                        }
                    }
                }
            }
        }

        if types::is_flonum(ty) {
            let f = match crate::const_eval::eval_const_node(node) {
                Ok(v) => v as f64,
                Err(_) => return Err(parse_err(&node.tok, "initializer element is not constant")),
            };
            let bytes = if ty.size() == 4 {
                (f as f32).to_le_bytes().to_vec()
            } else {
                f.to_le_bytes().to_vec()
            };
            return Ok((bytes, Vec::new()));
        }

        let v = crate::const_eval::eval_const_node(node)
            .map_err(|_| parse_err(&node.tok, "initializer element is not constant"))?;
        let size = ty.size().max(1) as usize;
        let mut bytes = v.to_le_bytes().to_vec();
        bytes.truncate(size.min(8));
        bytes.resize(size, if v < 0 { 0xff } else { 0 });
        Ok((bytes, Vec::new()))
    }

    // ---- expressions ----------------------------------------------------

    fn expr(&mut self) -> Result<Node, CompileError> {
        let mut node = self.assign()?;
        while self.is(",") {
            let tok = self.advance();
            let rhs = self.assign()?;
            node = Node::new_binary(NodeKind::Comma, node, rhs, tok);
        }
        add_type(&mut node);
        Ok(node)
    }

    const COMPOUND_OPS: &'static [(&'static str, NodeKind)] = &[
        ("+=", NodeKind::Add),
        ("-=", NodeKind::Sub),
        ("*=", NodeKind::Mul),
        ("/=", NodeKind::Div),
        ("%=", NodeKind::Mod),
        ("&=", NodeKind::BitAnd),
        ("|=", NodeKind::BitOr),
        ("^=", NodeKind::BitXor),
        ("<<=", NodeKind::Shl),
        (">>=", NodeKind::Shr),
    ];

    fn assign(&mut self) -> Result<Node, CompileError> {
        let node = self.conditional()?;
        let tok = self.cur().clone();
        if self.consume("=") {
            let rhs = self.assign()?;
            let mut n = Node::new_binary(NodeKind::Assign, node, rhs, tok);
            add_type(&mut n);
            return Ok(n);
        }
        for (text, kind) in Self::COMPOUND_OPS {
            if self.consume(text) {
                let rhs = self.assign()?;
                return self.compound_assign(*kind, node, rhs, tok);
            }
        }
        Ok(node)
    }

    fn compound_assign(&mut self, op: NodeKind, lhs: Node, rhs: Node, tok: Token) -> Result<Node, CompileError> {
        let mut lhs = lhs;
        add_type(&mut lhs);
        let lhs_ty = lhs.ty.clone().ok_or_else(|| parse_err(&tok, "missing type for assignment target"))?;
        let ptr_ty = pointer_to(lhs_ty.clone());
        let tmp = self.fresh_tmp(ptr_ty);

        let mut stmts = Vec::new();
        let addr = Node::new_unary(NodeKind::Addr, lhs, tok.clone());
        let mut set_tmp = Node::new_binary(NodeKind::Assign, Node::new_var_node(tmp.clone(), tok.clone()), addr, tok.clone());
        add_type(&mut set_tmp);
        stmts.push(expr_stmt(set_tmp));

        let deref_lhs = Node::new_unary(NodeKind::Deref, Node::new_var_node(tmp.clone(), tok.clone()), tok.clone());
        let binop = if matches!(op, NodeKind::Add | NodeKind::Sub) {
            self.new_add_or_sub(op, deref_lhs, rhs, tok.clone())?
        } else {
            let mut b = Node::new_binary(op, deref_lhs, rhs, tok.clone());
            add_type(&mut b);
            b
        };
        let deref_lhs2 = Node::new_unary(NodeKind::Deref, Node::new_var_node(tmp, tok.clone()), tok.clone());
        let mut result = Node::new_binary(NodeKind::Assign, deref_lhs2, binop, tok.clone());
        add_type(&mut result);
        stmts.push(expr_stmt(result));

        let mut block = Node::new(NodeKind::StmtExpr, tok);
        block.body = stmts;
        add_type(&mut block);
        Ok(block)
    }

    fn conditional(&mut self) -> Result<Node, CompileError> {
        let cond = self.logor()?;
        if self.is("?") {
            let tok = self.advance();
            let then = self.expr()?;
            self.expect(":")?;
            let els = self.conditional()?;
            let mut n = Node::new(NodeKind::Cond, tok);
            n.cond = Some(Box::new(cond));
            n.then = Some(Box::new(then));
            n.els = Some(Box::new(els));
            add_type(&mut n);
            return Ok(n);
        }
        Ok(cond)
    }
}

macro_rules! left_assoc_parser {
    ($name:ident, $next:ident, [$($op:literal => $kind:expr),+ $(,)?]) => {
        impl Parser {
            fn $name(&mut self) -> Result<Node, CompileError> {
                let mut node = self.$next()?;
                loop {
                    $(
                        if self.is($op) {
                            let tok = self.advance();
                            let rhs = self.$next()?;
                            let mut n = Node::new_binary($kind, node, rhs, tok);
                            add_type(&mut n);
                            node = n;
                            continue;
                        }
                    )+
                    break;
                }
                Ok(node)
            }
        }
    };
}

left_assoc_parser!(logor, logand, ["||" => NodeKind::LogOr]);
left_assoc_parser!(logand, bitor_, ["&&" => NodeKind::LogAnd]);
left_assoc_parser!(bitor_, bitxor_, ["|" => NodeKind::BitOr]);
left_assoc_parser!(bitxor_, bitand_, ["^" => NodeKind::BitXor]);
left_assoc_parser!(bitand_, equality, ["&" => NodeKind::BitAnd]);
left_assoc_parser!(equality, relational, ["==" => NodeKind::Eq, "!=" => NodeKind::Ne]);
left_assoc_parser!(shift, additive, ["<<" => NodeKind::Shl, ">>" => NodeKind::Shr]);
left_assoc_parser!(multiplicative, cast, ["*" => NodeKind::Mul, "/" => NodeKind::Div, "%" => NodeKind::Mod]);

impl Parser {
    /// `>`/`>=` are folded into `<`/`<=` by swapping operands, same trick the
    /// original uses (one fewer case for codegen to lower).
    fn relational(&mut self) -> Result<Node, CompileError> {
        let mut node = self.shift()?;
        loop {
            if self.is("<") {
                let tok = self.advance();
                let rhs = self.shift()?;
                let mut n = Node::new_binary(NodeKind::Lt, node, rhs, tok);
                add_type(&mut n);
                node = n;
            } else if self.is("<=") {
                let tok = self.advance();
                let rhs = self.shift()?;
                let mut n = Node::new_binary(NodeKind::Le, node, rhs, tok);
                add_type(&mut n);
                node = n;
            } else if self.is(">") {
                let tok = self.advance();
                let lhs_rhs = self.shift()?;
                let mut n = Node::new_binary(NodeKind::Lt, lhs_rhs, node, tok);
                add_type(&mut n);
                node = n;
            } else if self.is(">=") {
                let tok = self.advance();
                let lhs_rhs = self.shift()?;
                let mut n = Node::new_binary(NodeKind::Le, lhs_rhs, node, tok);
                add_type(&mut n);
                node = n;
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn additive(&mut self) -> Result<Node, CompileError> {
        let mut node = self.multiplicative()?;
        loop {
            if self.is("+") {
                let tok = self.advance();
                let rhs = self.multiplicative()?;
                node = self.new_add_or_sub(NodeKind::Add, node, rhs, tok)?;
            } else if self.is("-") {
                let tok = self.advance();
                let rhs = self.multiplicative()?;
                node = self.new_add_or_sub(NodeKind::Sub, node, rhs, tok)?;
            } else {
                break;
            }
        }
        Ok(node)
    }

    /// Canonicalizes pointer arithmetic: `num + ptr` becomes `ptr + num`,
    /// and any integer operand added to or subtracted from a pointer is
    /// scaled by the pointee's size. `ptr - ptr` (same base type) becomes a
    /// division by that size.
    fn new_add_or_sub(&mut self, op: NodeKind, lhs: Node, rhs: Node, tok: Token) -> Result<Node, CompileError> {
        let mut lhs = lhs;
        let mut rhs = rhs;
        add_type(&mut lhs);
        add_type(&mut rhs);
        let lt = lhs.ty.clone().unwrap_or_else(ty_int);
        let rt = rhs.ty.clone().unwrap_or_else(ty_int);

        if is_numeric(&lt) && is_numeric(&rt) {
            let mut n = Node::new_binary(op, lhs, rhs, tok);
            add_type(&mut n);
            return Ok(n);
        }

        if is_ptr_like(&lt) && is_ptr_like(&rt) {
            if op != NodeKind::Sub {
                return Err(parse_err(&tok, "invalid operands to binary +"));
            }
            let elem_size = lt.base().unwrap().size().max(1) as i64;
            let div_tok = tok.clone();
            let mut diff = Node::new_binary(NodeKind::Sub, lhs, rhs, tok.clone());
            diff.ty = Some(ty_long());
            let mut n = Node::new_binary(NodeKind::Div, diff, Node::new_long(elem_size, tok), div_tok);
            n.ty = Some(ty_long());
            return Ok(n);
        }

        // Canonicalize `num + ptr` to `ptr + num` (subtraction has no such
        // symmetric form: `num - ptr` is always invalid).
        let (ptr_side, num_side, swapped) = if is_ptr_like(&lt) {
            (lhs, rhs, false)
        } else if is_ptr_like(&rt) && op == NodeKind::Add {
            (rhs, lhs, true)
        } else {
            return Err(parse_err(&tok, "invalid operands to binary arithmetic operator"));
        };
        let _ = swapped;
        let ptr_ty = ptr_side.ty.clone().unwrap();
        let elem_size = ptr_ty.base().unwrap().size().max(1) as i64;
        let scaled = Node::new_binary(NodeKind::Mul, num_side, Node::new_long(elem_size, tok.clone()), tok.clone());
        let mut n = Node::new_binary(op, ptr_side, scaled, tok);
        n.ty = Some(ptr_ty);
        Ok(n)
    }

    fn cast(&mut self) -> Result<Node, CompileError> {
        if self.is("(") {
            let save = self.pos;
            let tok = self.advance();
            if self.is_typename() {
                let ty = self.typename()?;
                if self.consume(")") {
                    if self.is("{") {
                        // Compound literal: out of scope, fall through to a
                        // plain cast of the following unary expression.
                    }
                    let expr = self.cast()?;
                    let mut n = Node::new_cast(expr, ty);
                    add_type(&mut n);
                    return Ok(n);
                }
            }
            self.pos = save;
            let _ = tok;
        }
        self.unary()
    }

    fn unary(&mut self) -> Result<Node, CompileError> {
        let tok = self.cur().clone();
        if self.consume("+") {
            return self.cast();
        }
        if self.consume("-") {
            let e = self.cast()?;
            let mut n = Node::new_binary(NodeKind::Sub, Node::new_num(0, tok.clone()), e, tok);
            add_type(&mut n);
            return Ok(n);
        }
        if self.consume("&") {
            let e = self.cast()?;
            let mut n = Node::new_unary(NodeKind::Addr, e, tok);
            add_type(&mut n);
            return Ok(n);
        }
        if self.consume("*") {
            let e = self.cast()?;
            let mut n = Node::new_unary(NodeKind::Deref, e, tok);
            add_type(&mut n);
            return Ok(n);
        }
        if self.consume("!") {
            let e = self.cast()?;
            let mut n = Node::new_unary(NodeKind::Not, e, tok);
            add_type(&mut n);
            return Ok(n);
        }
        if self.consume("~") {
            let e = self.cast()?;
            let mut n = Node::new_unary(NodeKind::BitNot, e, tok);
            add_type(&mut n);
            return Ok(n);
        }
        if self.consume("++") {
            let e = self.unary()?;
            return self.new_inc_dec(e, tok, 1, false);
        }
        if self.consume("--") {
            let e = self.unary()?;
            return self.new_inc_dec(e, tok, -1, false);
        }
        self.postfix()
    }

    fn new_inc_dec(&mut self, lhs: Node, tok: Token, delta: i64, postfix: bool) -> Result<Node, CompileError> {
        let mut lhs = lhs;
        add_type(&mut lhs);
        let lhs_ty = lhs.ty.clone().ok_or_else(|| parse_err(&tok, "missing type for increment/decrement target"))?;
        let ptr_ty = pointer_to(lhs_ty.clone());
        let tmp = self.fresh_tmp(ptr_ty);
        let mut stmts = Vec::new();

        let addr = Node::new_unary(NodeKind::Addr, lhs, tok.clone());
        let mut set_tmp = Node::new_binary(NodeKind::Assign, Node::new_var_node(tmp.clone(), tok.clone()), addr, tok.clone());
        add_type(&mut set_tmp);
        stmts.push(expr_stmt(set_tmp));

        let old_var = if postfix { Some(self.fresh_tmp(lhs_ty.clone())) } else { None };
        if let Some(ref old) = old_var {
            let deref = Node::new_unary(NodeKind::Deref, Node::new_var_node(tmp.clone(), tok.clone()), tok.clone());
            let mut set_old = Node::new_binary(NodeKind::Assign, Node::new_var_node(old.clone(), tok.clone()), deref, tok.clone());
            add_type(&mut set_old);
            stmts.push(expr_stmt(set_old));
        }

        let cur = if let Some(ref old) = old_var {
            Node::new_var_node(old.clone(), tok.clone())
        } else {
            Node::new_unary(NodeKind::Deref, Node::new_var_node(tmp.clone(), tok.clone()), tok.clone())
        };
        let op = if delta >= 0 { NodeKind::Add } else { NodeKind::Sub };
        let sum = self.new_add_or_sub(op, cur, Node::new_num(delta.abs(), tok.clone()), tok.clone())?;
        let deref_store = Node::new_unary(NodeKind::Deref, Node::new_var_node(tmp.clone(), tok.clone()), tok.clone());
        let mut store = Node::new_binary(NodeKind::Assign, deref_store, sum, tok.clone());
        add_type(&mut store);
        stmts.push(expr_stmt(store));

        let result = if let Some(old) = old_var {
            Node::new_var_node(old, tok.clone())
        } else {
            Node::new_unary(NodeKind::Deref, Node::new_var_node(tmp, tok.clone()), tok.clone())
        };
        stmts.push(expr_stmt(result));

        let mut block = Node::new(NodeKind::StmtExpr, tok);
        block.body = stmts;
        add_type(&mut block);
        Ok(block)
    }

    fn postfix(&mut self) -> Result<Node, CompileError> {
        let mut node = self.primary()?;
        loop {
            let tok = self.cur().clone();
            if self.consume("[") {
                let idx = self.expr()?;
                self.expect("]")?;
                let mut addr = self.new_add_or_sub(NodeKind::Add, node, idx, tok.clone())?;
                let mut deref = Node::new_unary(NodeKind::Deref, addr, tok);
                add_type(&mut deref);
                node = deref;
                continue;
            }
            if self.consume(".") {
                let name = self.expect_ident()?;
                node = self.struct_ref(node, &name, &tok)?;
                continue;
            }
            if self.consume("->") {
                let name = self.expect_ident()?;
                let mut deref = Node::new_unary(NodeKind::Deref, node, tok.clone());
                add_type(&mut deref);
                node = self.struct_ref(deref, &name, &tok)?;
                continue;
            }
            if self.consume("++") {
                node = self.new_inc_dec(node, tok, 1, true)?;
                continue;
            }
            if self.consume("--") {
                node = self.new_inc_dec(node, tok, -1, true)?;
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn struct_ref(&mut self, base: Node, name: &str, tok: &Token) -> Result<Node, CompileError> {
        let ty = base
            .ty
            .clone()
            .ok_or_else(|| parse_err(tok, "member access on an untyped expression"))?;
        if !matches!(ty.kind(), TypeKind::Struct | TypeKind::Union) {
            return Err(parse_err(tok, "not a struct or union"));
        }
        let member = ty
            .members()
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| parse_err(tok, format!("no member named '{}'", name)))?;
        let mut n = Node {
            member: Some(member),
            ..Node::new_unary(NodeKind::Member, base, tok.clone())
        };
        add_type(&mut n);
        Ok(n)
    }

    fn primary(&mut self) -> Result<Node, CompileError> {
        let tok = self.cur().clone();

        if self.consume("(") {
            if self.is("{") {
                // GNU statement expression: `({ stmt...; expr; })`.
                let block = self.compound_stmt()?;
                self.expect(")")?;
                let mut n = Node::new(NodeKind::StmtExpr, tok);
                n.body = block.body;
                add_type(&mut n);
                return Ok(n);
            }
            let e = self.expr()?;
            self.expect(")")?;
            return Ok(e);
        }

        if self.consume_kw("sizeof") {
            if self.is("(") {
                let save = self.pos;
                self.advance();
                if self.is_typename() {
                    let ty = self.typename()?;
                    self.expect(")")?;
                    return Ok(Node::new_long(types::size_of(&ty) as i64, tok));
                }
                self.pos = save;
            }
            let mut e = self.unary()?;
            add_type(&mut e);
            let size = e.ty.as_ref().map(types::size_of).unwrap_or(0);
            return Ok(Node::new_long(size as i64, tok));
        }

        if self.cur().is_ident() {
            let name = self.cur().text.clone();
            if self.peek_is(1, "(") {
                return self.funcall(name, tok);
            }
            match self.scopes.find_var(&name) {
                Some(VarScopeEntry::Var(v)) => {
                    let v = v.clone();
                    self.advance();
                    let mut n = Node::new_var_node(v, tok);
                    add_type(&mut n);
                    return Ok(n);
                }
                Some(VarScopeEntry::EnumConst(v)) => {
                    let v = *v;
                    self.advance();
                    return Ok(Node::new_num(v, tok));
                }
                Some(VarScopeEntry::Typedef(_)) | None => {
                    return Err(parse_err(&tok, format!("undeclared identifier '{}'", name)));
                }
            }
        }

        if self.cur().kind == crate::token::TokenKind::Str {
            let t = self.advance();
            let bytes = t.str_contents.clone().unwrap_or_default();
            let var = self.new_string_literal(bytes.clone());
            self.globals.push(var.clone());
            let mut n = Node::new_var_node(var, tok);
            add_type(&mut n);
            return Ok(n);
        }

        if self.cur().kind == crate::token::TokenKind::Num {
            let t = self.advance();
            match t.num_value {
                Some(crate::token::NumValue::Int(v)) => {
                    let mut n = Node::new_num(v, tok);
                    n.ty = t.num_ty.clone().or(Some(ty_int()));
                    return Ok(n);
                }
                Some(crate::token::NumValue::Float(f)) => {
                    let mut n = Node::new(NodeKind::Num, tok);
                    n.fval = f;
                    n.ty = t.num_ty.clone().or(Some(ty_double()));
                    return Ok(n);
                }
                None => return Err(parse_err(&t, "invalid numeric literal")),
            }
        }

        Err(parse_err(&tok, format!("expected an expression, found '{}'", tok.text)))
    }

    fn funcall(&mut self, name: String, tok: Token) -> Result<Node, CompileError> {
        self.advance(); // ident
        self.advance(); // '('
        let func_ty = match self.scopes.find_var(&name) {
            Some(VarScopeEntry::Var(v)) if v.borrow().ty.kind() == TypeKind::Func => v.borrow().ty.clone(),
            _ => {
                // Implicit declaration: assume `int name()`.
                func_type(ty_int())
            }
        };
        let mut args = Vec::new();
        if !self.is(")") {
            loop {
                let mut a = self.assign()?;
                add_type(&mut a);
                args.push(a);
                if !self.consume(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        let mut n = Node::new(NodeKind::Funcall, tok);
        n.func_name = name;
        n.func_ty = Some(func_ty);
        n.args = args;
        add_type(&mut n);
        Ok(n)
    }

    fn new_string_literal(&mut self, mut bytes: Vec<u8>) -> Var {
        self.anon_count += 1;
        let label = format!(".L.data.{}", self.anon_count);
        if bytes.last() != Some(&0) {
            bytes.push(0);
        }
        let len = bytes.len() as i32;
        let ty = array_of(ty_char(), len);
        let var = new_global_var(label, ty, true);
        var.borrow_mut().init_data = Some(bytes);
        var
    }
}

fn func_type_with(return_ty: Type, params: Vec<Type>, is_variadic: bool) -> Type {
    let ty = func_type(return_ty);
    ty.set_func(ty.return_ty().unwrap(), params, is_variadic);
    ty
}

fn write_at(buf: &mut Vec<u8>, offset: usize, data: &[u8]) {
    if offset + data.len() > buf.len() {
        buf.resize(offset + data.len(), 0);
    }
    buf[offset..offset + data.len()].copy_from_slice(data);
}

/// Resolves `&global` (optionally through casts) to a relocation target.
fn addr_target(node: &Node, addend: i64) -> Option<(String, i64)> {
    match node.kind {
        NodeKind::Var => node.var.as_ref().map(|v| (v.borrow().name.clone(), addend)),
        NodeKind::Cast => node.lhs.as_deref().and_then(|n| addr_target(n, addend)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_eval::eval_const_node;
    use crate::tokenizer::{convert_pp_tokens, tokenize};
    use std::path::PathBuf;

    fn parse_src(src: &str) -> Program {
        let mut toks = tokenize(PathBuf::from("<test>"), src.to_string(), 0).unwrap();
        convert_pp_tokens(&mut toks).unwrap();
        parse(toks).unwrap()
    }

    #[test]
    fn return_expression_folds_to_expected_constant() {
        let prog = parse_src("int main() { return 1 + 2 * 3; }");
        assert_eq!(prog.functions.len(), 1);
        let f = &prog.functions[0];
        assert_eq!(f.name, "main");
        assert_eq!(f.body.body.len(), 1);
        let ret = &f.body.body[0];
        assert_eq!(ret.kind, NodeKind::Return);
        let e = ret.lhs.as_ref().unwrap();
        assert_eq!(e.kind, NodeKind::Add);
        assert_eq!(eval_const_node(e).unwrap(), 7);
    }

    #[test]
    fn global_int_initializer_encodes_little_endian() {
        let prog = parse_src("int x = 42;");
        assert_eq!(prog.globals.len(), 1);
        let v = prog.globals[0].borrow();
        assert_eq!(v.name, "x");
        assert!(!v.is_local);
        let bytes = v.init_data.as_ref().unwrap();
        assert_eq!(bytes, &42i32.to_le_bytes().to_vec());
    }

    #[test]
    fn pointer_and_array_declarators() {
        let prog = parse_src("int *p; int a[3];");
        assert_eq!(prog.globals.len(), 2);
        let p = prog.globals[0].borrow();
        assert_eq!(p.ty.kind(), TypeKind::Ptr);
        assert_eq!(p.ty.base().unwrap().kind(), TypeKind::Int);

        let a = prog.globals[1].borrow();
        assert_eq!(a.ty.kind(), TypeKind::Array);
        assert_eq!(a.ty.array_len(), 3);
        assert_eq!(a.ty.base().unwrap().kind(), TypeKind::Int);
    }

    /// A function-returning-pointer-vs-pointer-to-function declarator,
    /// exercised through the placeholder-patching path in `declarator`.
    #[test]
    fn pointer_to_function_declarator_resolves_via_placeholder() {
        let prog = parse_src("int (*fp)(int);");
        assert_eq!(prog.globals.len(), 1);
        let fp = prog.globals[0].borrow();
        assert_eq!(fp.ty.kind(), TypeKind::Ptr);
        let func = fp.ty.base().unwrap();
        assert_eq!(func.kind(), TypeKind::Func);
        assert_eq!(func.return_ty().unwrap().kind(), TypeKind::Int);
        assert_eq!(func.params().len(), 1);
    }

    #[test]
    fn if_else_and_greater_than_swap() {
        let prog = parse_src("int main() { if (1 > 2) return 1; else return 0; }");
        let stmt = &prog.functions[0].body.body[0];
        assert_eq!(stmt.kind, NodeKind::If);
        let cond = stmt.cond.as_ref().unwrap();
        // `>` is folded into `<` with swapped operands.
        assert_eq!(cond.kind, NodeKind::Lt);
        assert_eq!(eval_const_node(cond).unwrap(), 1);
        assert!(stmt.then.is_some());
        assert!(stmt.els.is_some());
    }

    #[test]
    fn for_loop_has_init_cond_and_increment() {
        let prog = parse_src("int main() { for (int i = 0; i < 10; i = i + 1) ; }");
        let stmt = &prog.functions[0].body.body[0];
        assert_eq!(stmt.kind, NodeKind::For);
        assert!(stmt.init.is_some());
        assert!(stmt.cond.is_some());
        assert!(stmt.inc.is_some());
        assert_eq!(stmt.cond.as_ref().unwrap().kind, NodeKind::Lt);
    }

    #[test]
    fn struct_member_access_resolves_member_type_and_offset() {
        let prog = parse_src(
            "struct P { char a; int b; }; int main() { struct P p; return p.b; }",
        );
        let stmt = &prog.functions[0].body.body[0];
        let e = stmt.lhs.as_ref().unwrap();
        assert_eq!(e.kind, NodeKind::Member);
        let m = e.member.as_ref().unwrap();
        assert_eq!(m.name, "b");
        assert_eq!(m.offset, 4);
        assert_eq!(e.ty.as_ref().unwrap().kind(), TypeKind::Int);
    }

    #[test]
    fn function_parameters_are_folded_into_locals() {
        let prog = parse_src("int add(int a, int b) { int c = a + b; return c; }");
        let f = &prog.functions[0];
        assert_eq!(f.params.len(), 2);
        // `a` and `b` (params) plus `c` (local) all land in `locals`, since
        // frame layout assigns offsets to `Function::locals` alone.
        assert_eq!(f.locals.len(), 3);
        assert_eq!(f.locals[0].borrow().name, "a");
        assert_eq!(f.locals[1].borrow().name, "b");
        assert_eq!(f.locals[2].borrow().name, "c");
    }

    #[test]
    fn typedef_declares_usable_alias() {
        let prog = parse_src("typedef int my_int; my_int x = 7;");
        assert_eq!(prog.globals.len(), 1);
        let v = prog.globals[0].borrow();
        assert_eq!(v.ty.kind(), TypeKind::Int);
        assert_eq!(eval_const_node(&Node::new_num(7, Token::dummy())).unwrap(), 7);
        assert_eq!(v.init_data.as_ref().unwrap(), &7i32.to_le_bytes().to_vec());
    }

    #[test]
    fn sizeof_struct_accounts_for_alignment_padding() {
        let prog = parse_src(
            "struct P { char a; int b; }; int main() { struct P p; return sizeof(p); }",
        );
        let stmt = &prog.functions[0].body.body[0];
        let e = stmt.lhs.as_ref().unwrap();
        // `sizeof` folds to a compile-time long constant at parse time.
        assert_eq!(e.kind, NodeKind::Num);
        assert_eq!(eval_const_node(e).unwrap(), 8);
    }
}

