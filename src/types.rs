//! Type system
//!
//! Types are built from a small set of factories (`pointer_to`, `array_of`,
//! `func_type`, `struct_type`, `enum_type`, plus primitive constants) and
//! shared through `Rc<RefCell<TypeData>>` handles so that a forward-declared
//! struct can have its member list patched in place after declarators that
//! already hold a clone of the handle (e.g. `struct Node *next` inside
//! `struct Node` itself) have been parsed. `copy_type` breaks that sharing
//! when a caller needs to mutate a copy's name or base without affecting the
//! original (e.g. turning an array parameter into a decayed pointer).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The kind of a [`Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Enum,
    Ptr,
    Func,
    Array,
    Struct,
    Union,
}

/// A struct/union member.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: Type,
    pub align: i32,
    pub offset: i32,
    pub is_bitfield: bool,
    /// Bit offset within the containing storage unit (0 when not a bitfield).
    pub bit_offset: i32,
    /// Width in bits (0 when not a bitfield).
    pub bit_width: i32,
}

#[derive(Debug)]
pub struct TypeData {
    pub kind: TypeKind,
    pub size: i32,
    pub align: i32,
    pub is_unsigned: bool,
    pub is_const: bool,
    pub is_incomplete: bool,

    /// Pointer-to or array-of element type. "Array of T" is handled in most
    /// contexts as if it were "pointer to T" by examining this field instead
    /// of `kind`.
    pub base: Option<Type>,

    /// Struct/union/enum tag name, if any.
    pub tag: Option<String>,
    pub array_len: i32,

    pub members: Vec<Member>,

    pub return_ty: Option<Type>,
    pub params: Vec<Type>,
    pub is_variadic: bool,
}

/// A shared handle to type data. Cloning a `Type` clones the handle, not the
/// underlying data (use [`copy_type`] for an independent copy).
#[derive(Debug, Clone)]
pub struct Type(Rc<RefCell<TypeData>>);

impl Type {
    fn new(data: TypeData) -> Self {
        Type(Rc::new(RefCell::new(data)))
    }

    pub fn kind(&self) -> TypeKind {
        self.0.borrow().kind
    }

    pub fn size(&self) -> i32 {
        self.0.borrow().size
    }

    pub fn align(&self) -> i32 {
        self.0.borrow().align
    }

    pub fn is_unsigned(&self) -> bool {
        self.0.borrow().is_unsigned
    }

    pub fn is_const(&self) -> bool {
        self.0.borrow().is_const
    }

    pub fn set_const(&self, v: bool) {
        self.0.borrow_mut().is_const = v;
    }

    pub fn is_incomplete(&self) -> bool {
        self.0.borrow().is_incomplete
    }

    pub fn set_incomplete(&self, v: bool) {
        self.0.borrow_mut().is_incomplete = v;
    }

    pub fn base(&self) -> Option<Type> {
        self.0.borrow().base.clone()
    }

    pub fn tag(&self) -> Option<String> {
        self.0.borrow().tag.clone()
    }

    pub fn set_tag(&self, tag: String) {
        self.0.borrow_mut().tag = Some(tag);
    }

    pub fn array_len(&self) -> i32 {
        self.0.borrow().array_len
    }

    pub fn members(&self) -> Vec<Member> {
        self.0.borrow().members.clone()
    }

    pub fn set_members(&self, members: Vec<Member>, size: i32, align: i32) {
        let mut d = self.0.borrow_mut();
        d.members = members;
        d.size = size;
        d.align = align;
        d.is_incomplete = false;
    }

    pub fn return_ty(&self) -> Option<Type> {
        self.0.borrow().return_ty.clone()
    }

    pub fn params(&self) -> Vec<Type> {
        self.0.borrow().params.clone()
    }

    pub fn is_variadic(&self) -> bool {
        self.0.borrow().is_variadic
    }

    pub fn set_func(&self, return_ty: Type, params: Vec<Type>, is_variadic: bool) {
        let mut d = self.0.borrow_mut();
        d.return_ty = Some(return_ty);
        d.params = params;
        d.is_variadic = is_variadic;
    }

    pub fn set_array_len(&self, len: i32) {
        let elem_size = self.0.borrow().base.as_ref().unwrap().size();
        let mut d = self.0.borrow_mut();
        d.array_len = len;
        d.size = elem_size * len;
        d.is_incomplete = false;
    }

    /// Identity comparison: do these handles refer to the same type object?
    /// Used for struct/union/enum tag lookups where two declarations of the
    /// same tag must resolve to a single shared `Type`.
    pub fn is_same(&self, other: &Type) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Overwrites this handle's data in place with a copy of `other`'s,
    /// preserving this handle's identity. Used by the declarator parser's
    /// placeholder trick: a declarator like `int (*fp)(void)` builds an
    /// empty placeholder type, recurses to parse the inner `*fp`, then
    /// patches the placeholder with the outer function type once the
    /// parameter list has been read — every clone of the placeholder taken
    /// during the recursive descent sees the patched result.
    pub fn replace_with(&self, other: &Type) {
        if Rc::ptr_eq(&self.0, &other.0) {
            return;
        }
        let snapshot = {
            let od = other.0.borrow();
            TypeData {
                kind: od.kind,
                size: od.size,
                align: od.align,
                is_unsigned: od.is_unsigned,
                is_const: od.is_const,
                is_incomplete: od.is_incomplete,
                base: od.base.clone(),
                tag: od.tag.clone(),
                array_len: od.array_len,
                members: od.members.clone(),
                return_ty: od.return_ty.clone(),
                params: od.params.clone(),
                is_variadic: od.is_variadic,
            }
        };
        *self.0.borrow_mut() = snapshot;
    }
}

impl PartialEq for Type {
    /// Structural-enough equality for assignment/arithmetic checks. Struct,
    /// union, and enum types compare by identity (matching C's "same tag"
    /// rule and avoiding infinite recursion through self-referential
    /// pointer members, since a forward-declared struct's members always
    /// point back at the *same* `Rc`, not a copy).
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let a = self.0.borrow();
        let b = other.0.borrow();
        if a.kind != b.kind {
            return false;
        }
        match a.kind {
            TypeKind::Struct | TypeKind::Union | TypeKind::Enum => false,
            TypeKind::Ptr | TypeKind::Array => {
                a.base.as_ref().unwrap() == b.base.as_ref().unwrap()
            }
            TypeKind::Func => {
                a.return_ty == b.return_ty
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(b.params.iter()).all(|(x, y)| x == y)
            }
            _ => a.is_unsigned == b.is_unsigned && a.size == b.size,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0.borrow();
        match d.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Bool => write!(f, "_Bool"),
            TypeKind::Char => write!(f, "{}char", if d.is_unsigned { "unsigned " } else { "" }),
            TypeKind::Short => write!(f, "{}short", if d.is_unsigned { "unsigned " } else { "" }),
            TypeKind::Int => write!(f, "{}int", if d.is_unsigned { "unsigned " } else { "" }),
            TypeKind::Long => write!(f, "{}long", if d.is_unsigned { "unsigned " } else { "" }),
            TypeKind::Float => write!(f, "float"),
            TypeKind::Double => write!(f, "double"),
            TypeKind::Enum => write!(f, "enum {}", d.tag.as_deref().unwrap_or("<anon>")),
            TypeKind::Ptr => write!(f, "{}*", d.base.as_ref().unwrap()),
            TypeKind::Array => write!(f, "{}[{}]", d.base.as_ref().unwrap(), d.array_len),
            TypeKind::Func => write!(f, "{}(...)", d.return_ty.as_ref().unwrap()),
            TypeKind::Struct => write!(f, "struct {}", d.tag.as_deref().unwrap_or("<anon>")),
            TypeKind::Union => write!(f, "union {}", d.tag.as_deref().unwrap_or("<anon>")),
        }
    }
}

fn primitive(kind: TypeKind, size: i32, align: i32, is_unsigned: bool) -> Type {
    Type::new(TypeData {
        kind,
        size,
        align,
        is_unsigned,
        is_const: false,
        is_incomplete: false,
        base: None,
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

thread_local! {
    static TY_VOID: Type = primitive(TypeKind::Void, 1, 1, false);
    static TY_BOOL: Type = primitive(TypeKind::Bool, 1, 1, false);
    static TY_CHAR: Type = primitive(TypeKind::Char, 1, 1, false);
    static TY_SHORT: Type = primitive(TypeKind::Short, 2, 2, false);
    static TY_INT: Type = primitive(TypeKind::Int, 4, 4, false);
    static TY_LONG: Type = primitive(TypeKind::Long, 8, 8, false);
    static TY_UCHAR: Type = primitive(TypeKind::Char, 1, 1, true);
    static TY_USHORT: Type = primitive(TypeKind::Short, 2, 2, true);
    static TY_UINT: Type = primitive(TypeKind::Int, 4, 4, true);
    static TY_ULONG: Type = primitive(TypeKind::Long, 8, 8, true);
    static TY_FLOAT: Type = primitive(TypeKind::Float, 4, 4, false);
    static TY_DOUBLE: Type = primitive(TypeKind::Double, 8, 8, false);
}

macro_rules! accessor {
    ($fn_name:ident, $cell:ident) => {
        pub fn $fn_name() -> Type {
            $cell.with(|t| t.clone())
        }
    };
}

accessor!(ty_void, TY_VOID);
accessor!(ty_bool, TY_BOOL);
accessor!(ty_char, TY_CHAR);
accessor!(ty_short, TY_SHORT);
accessor!(ty_int, TY_INT);
accessor!(ty_long, TY_LONG);
accessor!(ty_uchar, TY_UCHAR);
accessor!(ty_ushort, TY_USHORT);
accessor!(ty_uint, TY_UINT);
accessor!(ty_ulong, TY_ULONG);
accessor!(ty_float, TY_FLOAT);
accessor!(ty_double, TY_DOUBLE);

/// Creates a fresh, independent copy of `ty` (new `Rc`, cloned field data).
/// Used when a caller needs to tweak a copy (e.g. drop `const`, change the
/// declarator name) without aliasing the original.
pub fn copy_type(ty: &Type) -> Type {
    let d = ty.0.borrow();
    Type::new(TypeData {
        kind: d.kind,
        size: d.size,
        align: d.align,
        is_unsigned: d.is_unsigned,
        is_const: d.is_const,
        is_incomplete: d.is_incomplete,
        base: d.base.clone(),
        tag: d.tag.clone(),
        array_len: d.array_len,
        members: d.members.clone(),
        return_ty: d.return_ty.clone(),
        params: d.params.clone(),
        is_variadic: d.is_variadic,
    })
}

pub fn pointer_to(base: Type) -> Type {
    Type::new(TypeData {
        kind: TypeKind::Ptr,
        size: 8,
        align: 8,
        is_unsigned: true,
        is_const: false,
        is_incomplete: false,
        base: Some(base),
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

pub fn array_of(base: Type, len: i32) -> Type {
    let size = base.size() * len;
    let align = base.align();
    Type::new(TypeData {
        kind: TypeKind::Array,
        size,
        align,
        is_unsigned: false,
        is_const: false,
        is_incomplete: false,
        base: Some(base),
        tag: None,
        array_len: len,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

/// An array whose length is not yet known (e.g. `int a[]` awaiting an
/// initializer). `set_array_len` completes it.
pub fn incomplete_array_of(base: Type) -> Type {
    Type::new(TypeData {
        kind: TypeKind::Array,
        size: 0,
        align: base.align(),
        is_unsigned: false,
        is_const: false,
        is_incomplete: true,
        base: Some(base),
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

pub fn func_type(return_ty: Type) -> Type {
    Type::new(TypeData {
        kind: TypeKind::Func,
        size: 1,
        align: 1,
        is_unsigned: false,
        is_const: false,
        is_incomplete: false,
        base: None,
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: Some(return_ty),
        params: Vec::new(),
        is_variadic: false,
    })
}

/// An empty, incomplete stand-in type for the declarator placeholder trick
/// (see [`Type::replace_with`]): allocated before the inner declarator is
/// parsed, then patched in place once the outer type is known.
pub fn placeholder() -> Type {
    Type::new(TypeData {
        kind: TypeKind::Void,
        size: 0,
        align: 1,
        is_unsigned: false,
        is_const: false,
        is_incomplete: true,
        base: None,
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

pub fn enum_type() -> Type {
    Type::new(TypeData {
        kind: TypeKind::Enum,
        size: 4,
        align: 4,
        is_unsigned: false,
        is_const: false,
        is_incomplete: true,
        base: None,
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

pub fn struct_type() -> Type {
    Type::new(TypeData {
        kind: TypeKind::Struct,
        size: 0,
        align: 1,
        is_unsigned: false,
        is_const: false,
        is_incomplete: true,
        base: None,
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

pub fn union_type() -> Type {
    Type::new(TypeData {
        kind: TypeKind::Union,
        size: 0,
        align: 1,
        is_unsigned: false,
        is_const: false,
        is_incomplete: true,
        base: None,
        tag: None,
        array_len: 0,
        members: Vec::new(),
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
    })
}

/// Rounds `n` up to the nearest multiple of `align`.
pub fn align_to(n: i32, align: i32) -> i32 {
    (n + align - 1) / align * align
}

/// Rounds `n` down to the nearest multiple of `align`.
pub fn align_down(n: i32, align: i32) -> i32 {
    align_to(n - align + 1, align)
}

pub fn is_integer(ty: &Type) -> bool {
    matches!(
        ty.kind(),
        TypeKind::Bool
            | TypeKind::Char
            | TypeKind::Short
            | TypeKind::Int
            | TypeKind::Long
            | TypeKind::Enum
    )
}

pub fn is_flonum(ty: &Type) -> bool {
    matches!(ty.kind(), TypeKind::Float | TypeKind::Double)
}

pub fn is_numeric(ty: &Type) -> bool {
    is_integer(ty) || is_flonum(ty)
}

pub fn is_ptr_like(ty: &Type) -> bool {
    matches!(ty.kind(), TypeKind::Ptr | TypeKind::Array)
}

/// The "rank" of an integer type for the usual arithmetic conversions.
/// Anything narrower than `int` is promoted to (at least) `int` rank before
/// this is consulted.
fn int_rank(ty: &Type) -> i32 {
    match ty.kind() {
        TypeKind::Bool | TypeKind::Char | TypeKind::Short | TypeKind::Int | TypeKind::Enum => 4,
        TypeKind::Long => 8,
        _ => 4,
    }
}

/// Integer promotion: anything narrower than `int` becomes `int`.
pub fn promote(ty: &Type) -> Type {
    if is_integer(ty) && ty.size() < ty_int().size() {
        return ty_int();
    }
    ty.clone()
}

/// The usual arithmetic conversions for a binary numeric operator: widen to
/// the common type of both operands.
pub fn usual_arith_conv(lhs: &Type, rhs: &Type) -> Type {
    if lhs.kind() == TypeKind::Double || rhs.kind() == TypeKind::Double {
        return ty_double();
    }
    if lhs.kind() == TypeKind::Float || rhs.kind() == TypeKind::Float {
        return ty_float();
    }
    let l = promote(lhs);
    let r = promote(rhs);
    if l.size() != r.size() {
        return if l.size() > r.size() { l } else { r };
    }
    // Equal rank: unsigned wins, applied uniformly across every arithmetic
    // and comparison call site via this one function.
    if r.is_unsigned() {
        r
    } else {
        l
    }
}

/// `size_of`: byte size per the x86-64 SysV ABI, as already stored on the
/// `Type` by its factory/layout function.
pub fn size_of(ty: &Type) -> i32 {
    ty.size()
}

pub fn align_of(ty: &Type) -> i32 {
    ty.align()
}

/// Lays out a struct's members, assigning offsets and computing the
/// struct's overall size/alignment. Bitfields are packed within their
/// declared type's storage unit; a bitfield that would straddle the current
/// storage unit starts a new one at the next alignment boundary instead of
/// splitting across units.
pub fn layout_struct(members: &mut [Member]) -> (i32, i32) {
    let mut offset = 0i32;
    let mut max_align = 1i32;
    let mut bit_offset = 0i32;

    for m in members.iter_mut() {
        let align = m.align;
        max_align = max_align.max(align);

        if m.is_bitfield {
            if m.bit_width == 0 {
                // Zero-width anonymous bitfield forces alignment to a new unit.
                offset = align_to(offset, align);
                bit_offset = 0;
                continue;
            }
            let unit_bits = m.ty.size() * 8;
            if bit_offset + m.bit_width > unit_bits {
                offset = align_to(offset, align);
                bit_offset = 0;
            } else if bit_offset == 0 {
                offset = align_to(offset, align);
            }
            m.offset = offset;
            m.bit_offset = bit_offset;
            bit_offset += m.bit_width;
            if bit_offset >= unit_bits {
                offset += unit_bits / 8;
                bit_offset = 0;
            }
        } else {
            if bit_offset != 0 {
                offset += m.ty.size().max(1);
                let unit = offset;
                offset = align_to(unit, 1);
                bit_offset = 0;
            }
            offset = align_to(offset, align);
            m.offset = offset;
            offset += m.ty.size();
        }
    }

    if bit_offset != 0 {
        // Account for the trailing partially-filled storage unit.
        offset = align_to(offset + 1, max_align);
    }

    let size = align_to(offset, max_align);
    (size, max_align)
}

/// Lays out a union's members: all at offset 0, size is the max member size
/// aligned to the max member alignment.
pub fn layout_union(members: &mut [Member]) -> (i32, i32) {
    let mut size = 0i32;
    let mut max_align = 1i32;
    for m in members.iter_mut() {
        m.offset = 0;
        m.bit_offset = 0;
        max_align = max_align.max(m.align);
        size = size.max(m.ty.size());
    }
    (align_to(size, max_align), max_align)
}

/// Walks an expression/statement tree bottom-up, filling in `node.ty` for
/// every node that denotes a value. Idempotent (returns immediately if
/// `node.ty` is already set) so the parser can call it eagerly after each
/// statement.
pub fn add_type(node: &mut crate::ast::Node) {
    use crate::ast::NodeKind;

    if node.ty.is_some() {
        return;
    }

    if let Some(n) = node.lhs.as_deref_mut() {
        add_type(n);
    }
    if let Some(n) = node.rhs.as_deref_mut() {
        add_type(n);
    }
    if let Some(n) = node.cond.as_deref_mut() {
        add_type(n);
    }
    if let Some(n) = node.then.as_deref_mut() {
        add_type(n);
    }
    if let Some(n) = node.els.as_deref_mut() {
        add_type(n);
    }
    if let Some(n) = node.init.as_deref_mut() {
        add_type(n);
    }
    if let Some(n) = node.inc.as_deref_mut() {
        add_type(n);
    }
    for stmt in node.body.iter_mut() {
        add_type(stmt);
    }
    for arg in node.args.iter_mut() {
        add_type(arg);
    }

    match node.kind {
        NodeKind::Add | NodeKind::Sub | NodeKind::Mul | NodeKind::Div | NodeKind::Mod
        | NodeKind::BitAnd | NodeKind::BitOr | NodeKind::BitXor => {
            let lt = node.lhs.as_ref().unwrap().ty.clone().unwrap();
            let rt = node.rhs.as_ref().unwrap().ty.clone().unwrap();
            let common = usual_arith_conv(&lt, &rt);
            cast_operand(&mut node.lhs, &common);
            cast_operand(&mut node.rhs, &common);
            node.ty = Some(common);
        }
        NodeKind::Shl | NodeKind::Shr => {
            let lt = node.lhs.as_ref().unwrap().ty.clone().unwrap();
            node.ty = Some(promote(&lt));
        }
        NodeKind::Not | NodeKind::LogAnd | NodeKind::LogOr | NodeKind::Eq | NodeKind::Ne
        | NodeKind::Lt | NodeKind::Le => {
            if matches!(node.kind, NodeKind::Eq | NodeKind::Ne | NodeKind::Lt | NodeKind::Le) {
                let lt = node.lhs.as_ref().unwrap().ty.clone().unwrap();
                let rt = node.rhs.as_ref().unwrap().ty.clone().unwrap();
                if is_numeric(&lt) && is_numeric(&rt) {
                    let common = usual_arith_conv(&lt, &rt);
                    cast_operand(&mut node.lhs, &common);
                    cast_operand(&mut node.rhs, &common);
                }
            }
            node.ty = Some(ty_int());
        }
        NodeKind::BitNot | NodeKind::Comma => {
            let src = if node.kind == NodeKind::Comma { &node.rhs } else { &node.lhs };
            node.ty = src.as_ref().unwrap().ty.clone();
        }
        NodeKind::Assign => {
            let lt = node.lhs.as_ref().unwrap().ty.clone().unwrap();
            if lt.kind() == TypeKind::Array {
                node.ty = Some(lt);
            } else {
                cast_operand(&mut node.rhs, &lt);
                node.ty = Some(lt);
            }
        }
        NodeKind::Cond => {
            let then_ty = node.then.as_ref().and_then(|n| n.ty.clone());
            let els_ty = node.els.as_ref().and_then(|n| n.ty.clone());
            node.ty = match (then_ty, els_ty) {
                (Some(t), Some(e)) if is_numeric(&t) && is_numeric(&e) => {
                    Some(usual_arith_conv(&t, &e))
                }
                (Some(t), _) => Some(t),
                (None, Some(e)) => Some(e),
                (None, None) => Some(ty_void()),
            };
        }
        NodeKind::Member => {
            node.ty = node.member.as_ref().map(|m| m.ty.clone());
        }
        NodeKind::Addr => {
            let base_ty = node.lhs.as_ref().unwrap().ty.clone().unwrap();
            node.ty = Some(if base_ty.kind() == TypeKind::Array {
                pointer_to(base_ty.base().unwrap())
            } else {
                pointer_to(base_ty)
            });
        }
        NodeKind::Deref => {
            let base_ty = node.lhs.as_ref().unwrap().ty.clone().unwrap();
            let pointee = base_ty
                .base()
                .unwrap_or_else(|| panic!("dereference of non-pointer type {}", base_ty));
            if pointee.kind() == TypeKind::Void {
                node.ty = Some(ty_void());
            } else {
                node.ty = Some(pointee);
            }
        }
        NodeKind::Var => {
            node.ty = node.var.as_ref().map(|v| v.borrow().ty.clone());
        }
        NodeKind::Funcall => {
            node.ty = node
                .func_ty
                .as_ref()
                .and_then(|f| f.return_ty())
                .or_else(|| Some(ty_int()));
        }
        NodeKind::Num => {
            if node.ty.is_none() {
                node.ty = Some(ty_int());
            }
        }
        NodeKind::StmtExpr => {
            node.ty = node.body.last().and_then(|s| s.ty.clone());
        }
        NodeKind::Cast | NodeKind::NullExpr | NodeKind::Return | NodeKind::If | NodeKind::For
        | NodeKind::Do | NodeKind::Switch | NodeKind::Case | NodeKind::Block
        | NodeKind::Break | NodeKind::Continue | NodeKind::Goto | NodeKind::Label
        | NodeKind::ExprStmt => {
            // Statement-only nodes (or `Cast`, whose type is set at
            // construction by `Node::new_cast`) carry no expression type.
        }
    }
}

fn cast_operand(slot: &mut Option<Box<crate::ast::Node>>, target: &Type) {
    if let Some(n) = slot.take() {
        if n.ty.as_ref() == Some(target) {
            *slot = Some(n);
        } else {
            *slot = Some(Box::new(crate::ast::Node::new_cast(*n, target.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes_match_sysv_abi() {
        assert_eq!(ty_char().size(), 1);
        assert_eq!(ty_short().size(), 2);
        assert_eq!(ty_int().size(), 4);
        assert_eq!(ty_long().size(), 8);
        assert_eq!(ty_float().size(), 4);
        assert_eq!(ty_double().size(), 8);
    }

    #[test]
    fn pointer_is_eight_bytes() {
        let p = pointer_to(ty_int());
        assert_eq!(p.size(), 8);
        assert_eq!(p.align(), 8);
    }

    #[test]
    fn array_size_is_elem_times_len() {
        let a = array_of(ty_int(), 10);
        assert_eq!(a.size(), 40);
    }

    #[test]
    fn struct_alignment_pads_to_largest_member() {
        // struct P { char a; int b; } -> size 8, align 4
        let mut members = vec![
            Member {
                name: "a".into(),
                ty: ty_char(),
                align: 1,
                offset: 0,
                is_bitfield: false,
                bit_offset: 0,
                bit_width: 0,
            },
            Member {
                name: "b".into(),
                ty: ty_int(),
                align: 4,
                offset: 0,
                is_bitfield: false,
                bit_offset: 0,
                bit_width: 0,
            },
        ];
        let (size, align) = layout_struct(&mut members);
        assert_eq!(size, 8);
        assert_eq!(align, 4);
        assert_eq!(size % align, 0);
        assert_eq!(members[1].offset, 4);
    }

    #[test]
    fn union_takes_max_size_all_members_at_zero() {
        let mut members = vec![
            Member {
                name: "a".into(),
                ty: ty_char(),
                align: 1,
                offset: 0,
                is_bitfield: false,
                bit_offset: 0,
                bit_width: 0,
            },
            Member {
                name: "b".into(),
                ty: ty_long(),
                align: 8,
                offset: 0,
                is_bitfield: false,
                bit_offset: 0,
                bit_width: 0,
            },
        ];
        let (size, align) = layout_union(&mut members);
        assert_eq!(size, 8);
        assert_eq!(align, 8);
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 0);
    }

    #[test]
    fn usual_arith_conv_prefers_double_then_float_then_widest_then_unsigned() {
        assert_eq!(usual_arith_conv(&ty_int(), &ty_double()).kind(), TypeKind::Double);
        assert_eq!(usual_arith_conv(&ty_int(), &ty_float()).kind(), TypeKind::Float);
        assert_eq!(usual_arith_conv(&ty_int(), &ty_long()).kind(), TypeKind::Long);
        let u = usual_arith_conv(&ty_int(), &ty_uint());
        assert!(u.is_unsigned());
    }

    #[test]
    fn copy_type_is_independent() {
        let original = ty_int();
        let copy = copy_type(&original);
        copy.set_const(true);
        assert!(!original.is_const());
        assert!(copy.is_const());
    }

    #[test]
    fn struct_identity_preserved_through_forward_declaration() {
        let s = struct_type();
        s.set_tag("Node".to_string());
        let ptr_to_self = pointer_to(s.clone());
        let members = vec![Member {
            name: "next".into(),
            ty: ptr_to_self,
            align: 8,
            offset: 0,
            is_bitfield: false,
            bit_offset: 0,
            bit_width: 0,
        }];
        let mut members = members;
        let (size, align) = layout_struct(&mut members);
        s.set_members(members, size, align);
        assert!(!s.is_incomplete());
        // The member's pointer base is the very same handle as `s`.
        let base = s.members()[0].ty.base().unwrap();
        assert!(base.is_same(&s));
    }
}
