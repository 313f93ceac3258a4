//! Abstract syntax tree
//!
//! `Node`/`Var`/`Function` are rendered with ordinary Rust ownership rather
//! than a linked structure of mutable pointers: a statement list is a
//! `Vec<Node>`, a node's children are `Box<Node>`, and a variable binding
//! that needs to be shared
//! between the symbol table and the AST (and later patched with a stack
//! offset once frame layout runs) is an `Rc<RefCell<VarData>>` handle.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::token::Token;
use crate::types::{self, is_numeric, pointer_to, promote, ty_int, usual_arith_conv, Member, Type, TypeKind};

/// A deferred relocation: at `offset` bytes into a global's initializer,
/// store the address of `label` plus `addend`.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: i32,
    pub label: String,
    pub addend: i64,
}

#[derive(Debug)]
pub struct VarData {
    pub name: String,
    pub ty: Type,
    pub is_local: bool,
    pub is_static: bool,
    /// Stack offset for locals; undefined (left at 0) until frame layout
    /// runs. Negative, counted down from `rbp`.
    pub offset: Cell<i32>,
    pub init_data: Option<Vec<u8>>,
    pub relocations: Vec<Relocation>,
}

/// Shared handle to a variable binding. Shared between the scope table, the
/// function's locals list, and every `Node::Var` that references it, so
/// that assigning stack offsets after parsing is visible everywhere.
pub type Var = Rc<RefCell<VarData>>;

pub fn new_local_var(name: String, ty: Type) -> Var {
    Rc::new(RefCell::new(VarData {
        name,
        ty,
        is_local: true,
        is_static: false,
        offset: Cell::new(0),
        init_data: None,
        relocations: Vec::new(),
    }))
}

pub fn new_global_var(name: String, ty: Type, is_static: bool) -> Var {
    Rc::new(RefCell::new(VarData {
        name,
        ty,
        is_local: false,
        is_static,
        offset: Cell::new(0),
        init_data: None,
        relocations: Vec::new(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Assign,
    Cond,
    Comma,
    Member,
    Addr,
    Deref,
    Not,
    BitNot,
    LogAnd,
    LogOr,
    Return,
    If,
    For,
    Do,
    Switch,
    Case,
    Block,
    Break,
    Continue,
    Goto,
    Label,
    Funcall,
    ExprStmt,
    StmtExpr,
    NullExpr,
    Var,
    Num,
    Cast,
}

/// An AST node. Not every field is meaningful for every `kind`; see the
/// per-kind constructors in `parser.rs` for which fields are populated.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub tok: Token,
    /// Resolved type, filled in by `types::add_type` once the whole
    /// expression tree rooted here has been built.
    pub ty: Option<Type>,

    pub lhs: Option<Box<Node>>,
    pub rhs: Option<Box<Node>>,

    // if/for/while
    pub cond: Option<Box<Node>>,
    pub then: Option<Box<Node>>,
    pub els: Option<Box<Node>>,
    pub init: Option<Box<Node>>,
    pub inc: Option<Box<Node>>,

    /// True when this is an `Assign` used as part of an initializer
    /// (distinguishes `int x = 1;` from a plain `x = 1;` for diagnostics).
    pub is_init: bool,

    /// Block body, or statement-expression body (`({ ... })`).
    pub body: Vec<Node>,

    /// Struct/union member access.
    pub member: Option<Member>,

    /// Function call: resolved callee type and argument expressions.
    pub func_ty: Option<Type>,
    pub func_name: String,
    pub args: Vec<Node>,

    /// goto/label name.
    pub label_name: String,
    /// Assigned by codegen the first time it walks a `switch` body looking
    /// for its `Case`/`default` arms, then read back when that same node is
    /// reached again during ordinary sequential emission — one generated
    /// label shared by both passes without duplicating the node.
    pub unique_label: RefCell<Option<String>>,

    /// `case`/`default`: the statement this label guards, same shape as
    /// `Label` reusing `lhs`.
    pub is_default_case: bool,
    /// `case` constant value, evaluated by `const_expr` at parse time.
    /// Meaningless when `is_default_case` is set.
    pub case_val: i64,

    pub var: Option<Var>,

    pub val: i64,
    pub fval: f64,
}

impl Node {
    pub fn new(kind: NodeKind, tok: Token) -> Self {
        Node {
            kind,
            tok,
            ty: None,
            lhs: None,
            rhs: None,
            cond: None,
            then: None,
            els: None,
            init: None,
            inc: None,
            is_init: false,
            body: Vec::new(),
            member: None,
            func_ty: None,
            func_name: String::new(),
            args: Vec::new(),
            label_name: String::new(),
            unique_label: RefCell::new(None),
            is_default_case: false,
            case_val: 0,
            var: None,
            val: 0,
            fval: 0.0,
        }
    }

    pub fn new_binary(kind: NodeKind, lhs: Node, rhs: Node, tok: Token) -> Self {
        let mut n = Node::new(kind, tok);
        n.lhs = Some(Box::new(lhs));
        n.rhs = Some(Box::new(rhs));
        n
    }

    pub fn new_unary(kind: NodeKind, operand: Node, tok: Token) -> Self {
        let mut n = Node::new(kind, tok);
        n.lhs = Some(Box::new(operand));
        n
    }

    pub fn new_num(val: i64, tok: Token) -> Self {
        let mut n = Node::new(NodeKind::Num, tok);
        n.val = val;
        n
    }

    pub fn new_long(val: i64, tok: Token) -> Self {
        let mut n = Node::new_num(val, tok);
        n.ty = Some(crate::types::ty_long());
        n
    }

    pub fn new_var_node(var: Var, tok: Token) -> Self {
        let mut n = Node::new(NodeKind::Var, tok);
        n.var = Some(var);
        n
    }

    /// Wraps `expr` in an explicit cast to `ty`.
    pub fn new_cast(expr: Node, ty: Type) -> Self {
        let tok = expr.tok.clone();
        let mut n = Node::new(NodeKind::Cast, tok);
        n.lhs = Some(Box::new(expr));
        n.ty = Some(ty);
        n
    }
}

/// A function definition (or a declaration with no body, which is dropped
/// before codegen — see `parser::Parser::parse`).
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Var>,
    pub is_static: bool,
    pub is_variadic: bool,
    pub body: Node,
    pub locals: Vec<Var>,
    /// Total frame size in bytes, a multiple of 16, computed by
    /// `codegen::assign_lvar_offsets`.
    pub stack_size: i32,
}

#[derive(Debug, Default)]
pub struct Program {
    pub globals: Vec<Var>,
    pub functions: Vec<Function>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }
}
