//! Expression lowering: the register-stack push/pop model, lvalue
//! addressing, and function calls.

use std::fmt::Write as _;

use crate::ast::{Node, NodeKind};
use crate::error::CompileError;
use crate::types::{self, is_flonum, is_integer, Member, Type, TypeKind};

use super::data::is_aggregate;
use super::state::{CodeGen, FloatSlot, IntSlot, ARG_FLOAT, ARG_INT_64};

impl CodeGen {
    /// Lowers `node`, leaving its value at the new top of the appropriate
    /// register stack (integer/pointer-class values on the int stack,
    /// `float`/`double` on the float stack). Aggregates (struct/union)
    /// and arrays push their *address* rather than a copy of their bytes;
    /// callers that need the bytes (assignment, argument passing) know to
    /// treat that address specially.
    pub(super) fn gen_expr(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.kind {
            NodeKind::Num => {
                let ty = node.ty.clone().unwrap_or_else(types::ty_int);
                if is_flonum(&ty) {
                    self.push_float_const(node.fval, ty.size())?;
                } else {
                    self.push_int_const(node.val)?;
                }
                Ok(())
            }
            NodeKind::Var => {
                self.gen_addr(node)?;
                self.load(&node.ty.clone().unwrap(), node.member.as_ref())
            }
            NodeKind::Member => {
                self.gen_addr(node)?;
                self.load(&node.ty.clone().unwrap(), node.member.as_ref())
            }
            NodeKind::Deref => {
                self.gen_expr(node.lhs.as_ref().unwrap())?;
                self.load(&node.ty.clone().unwrap(), None)
            }
            NodeKind::Addr => {
                self.gen_addr(node.lhs.as_ref().unwrap())
            }
            NodeKind::Assign => self.gen_assign(node),
            NodeKind::Comma => {
                self.gen_expr(node.lhs.as_ref().unwrap())?;
                self.pop_discard(node.lhs.as_ref().unwrap())?;
                self.gen_expr(node.rhs.as_ref().unwrap())
            }
            NodeKind::Cast => {
                let from = node.lhs.as_ref().unwrap().ty.clone().unwrap();
                let to = node.ty.clone().unwrap();
                self.gen_expr(node.lhs.as_ref().unwrap())?;
                self.gen_cast(&from, &to)
            }
            NodeKind::Cond => self.gen_cond(node),
            NodeKind::LogAnd => self.gen_log_and(node),
            NodeKind::LogOr => self.gen_log_or(node),
            NodeKind::Not => {
                self.gen_expr(node.lhs.as_ref().unwrap())?;
                self.itop -= 1;
                let d = self.itop;
                let slot = self.int_slot(d);
                writeln!(self.out, "  cmp {}, 0", slot.operand())?;
                writeln!(self.out, "  sete al")?;
                self.store_bool_result(d)?;
                self.itop += 1;
                Ok(())
            }
            NodeKind::BitNot => {
                self.gen_expr(node.lhs.as_ref().unwrap())?;
                let d = self.itop - 1;
                let slot = self.int_slot(d);
                match slot {
                    IntSlot::Reg(r) => writeln!(self.out, "  not {r}")?,
                    IntSlot::Spill(off) => {
                        writeln!(self.out, "  mov rax, qword ptr [rbp-{off}]")?;
                        writeln!(self.out, "  not rax")?;
                        writeln!(self.out, "  mov qword ptr [rbp-{off}], rax")?;
                    }
                }
                Ok(())
            }
            NodeKind::StmtExpr => {
                for (i, s) in node.body.iter().enumerate() {
                    if i + 1 == node.body.len() && s.kind == NodeKind::ExprStmt {
                        self.gen_expr(s.lhs.as_ref().unwrap())?;
                    } else {
                        self.gen_stmt(s)?;
                    }
                }
                Ok(())
            }
            NodeKind::NullExpr => Ok(()),
            NodeKind::Funcall => self.gen_funcall(node, None),
            NodeKind::Add | NodeKind::Sub | NodeKind::Mul | NodeKind::Div | NodeKind::Mod
            | NodeKind::BitAnd | NodeKind::BitOr | NodeKind::BitXor | NodeKind::Shl
            | NodeKind::Shr | NodeKind::Eq | NodeKind::Ne | NodeKind::Lt | NodeKind::Le => {
                self.gen_binary(node)
            }
            other => Err(CompileError::io(
                std::path::PathBuf::new(),
                format!("codegen: node kind {other:?} is not a valid expression"),
            )),
        }
    }

    /// Generates the *address* of an lvalue expression, leaving a pointer
    /// value on the int stack.
    pub(super) fn gen_addr(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.kind {
            NodeKind::Var => {
                let var = node.var.as_ref().unwrap();
                let is_indirect = self
                    .indirect_params
                    .contains(&(std::rc::Rc::as_ptr(var) as usize));
                let d = self.itop;
                let reg = self.int_reg(d);
                if var.borrow().is_local {
                    let off = -var.borrow().offset.get();
                    if is_indirect {
                        writeln!(self.out, "  mov {reg}, qword ptr [rbp-{off}]")?;
                    } else {
                        writeln!(self.out, "  lea {reg}, [rbp-{off}]")?;
                    }
                } else {
                    writeln!(self.out, "  lea {reg}, [rip+{}]", var.borrow().name)?;
                }
                self.itop += 1;
                Ok(())
            }
            NodeKind::Deref => self.gen_expr(node.lhs.as_ref().unwrap()),
            NodeKind::Member => {
                self.gen_addr(node.lhs.as_ref().unwrap())?;
                let m = node.member.as_ref().unwrap();
                if m.offset != 0 {
                    let d = self.itop - 1;
                    let slot = self.int_slot(d);
                    match slot {
                        IntSlot::Reg(r) => writeln!(self.out, "  add {r}, {}", m.offset)?,
                        IntSlot::Spill(off) => {
                            writeln!(self.out, "  add qword ptr [rbp-{off}], {}", m.offset)?;
                        }
                    }
                }
                Ok(())
            }
            NodeKind::Comma => {
                self.gen_expr(node.lhs.as_ref().unwrap())?;
                self.pop_discard(node.lhs.as_ref().unwrap())?;
                self.gen_addr(node.rhs.as_ref().unwrap())
            }
            _ => Err(CompileError::io(
                std::path::PathBuf::new(),
                "codegen: not an lvalue".to_string(),
            )),
        }
    }

    /// Replaces the address at the top of the int stack with the value it
    /// points to, per `ty`. Arrays, functions, and aggregates decay to
    /// their address (a no-op here); everything else is loaded.
    pub(super) fn load(&mut self, ty: &Type, member: Option<&Member>) -> Result<(), CompileError> {
        match ty.kind() {
            TypeKind::Array | TypeKind::Func => Ok(()),
            k if is_aggregate(k) => Ok(()),
            _ if is_flonum(ty) => {
                let addr_d = self.itop - 1;
                let addr = self.int_slot(addr_d).operand();
                self.itop -= 1;
                let fd = self.ftop;
                let freg = self.float_reg(fd);
                let op = if ty.size() == 4 { "movss" } else { "movsd" };
                writeln!(self.out, "  {op} {freg}, [{addr}]")?;
                self.ftop += 1;
                Ok(())
            }
            _ => {
                let d = self.itop - 1;
                let addr = self.int_slot(d).operand();
                if let Some(m) = member {
                    if m.is_bitfield {
                        return self.load_bitfield(d, &addr, m, ty);
                    }
                }
                let dest = self.int_reg(d);
                let unsigned = ty.is_unsigned();
                match ty.size() {
                    1 => {
                        let op = if unsigned { "movzx" } else { "movsx" };
                        writeln!(self.out, "  {op} {dest}, byte ptr [{addr}]")?;
                    }
                    2 => {
                        let op = if unsigned { "movzx" } else { "movsx" };
                        writeln!(self.out, "  {op} {dest}, word ptr [{addr}]")?;
                    }
                    4 => {
                        if unsigned {
                            writeln!(self.out, "  mov {}, dword ptr [{addr}]", sized(&dest, 4))?;
                        } else {
                            writeln!(self.out, "  movsxd {dest}, dword ptr [{addr}]")?;
                        }
                    }
                    _ => {
                        writeln!(self.out, "  mov {dest}, qword ptr [{addr}]")?;
                    }
                }
                Ok(())
            }
        }
    }

    fn load_bitfield(
        &mut self,
        d: i32,
        addr: &str,
        m: &Member,
        container_ty: &Type,
    ) -> Result<(), CompileError> {
        let dest = self.int_reg(d);
        let kw = match container_ty.size() {
            1 => "byte",
            2 => "word",
            4 => "dword",
            _ => "qword",
        };
        writeln!(self.out, "  movzx rax, {kw} ptr [{addr}]")?;
        if container_ty.size() == 8 {
            writeln!(self.out, "  mov rax, qword ptr [{addr}]")?;
        }
        writeln!(self.out, "  shr rax, {}", m.bit_offset)?;
        let mask = (1u64 << m.bit_width) - 1;
        writeln!(self.out, "  and rax, {mask}")?;
        if !m.ty.is_unsigned() {
            let shift = 64 - m.bit_width;
            writeln!(self.out, "  shl rax, {shift}")?;
            writeln!(self.out, "  sar rax, {shift}")?;
        }
        writeln!(self.out, "  mov {dest}, rax")?;
        Ok(())
    }

    fn store_bitfield(&mut self, addr: &str, m: &Member, val_reg: &str) -> Result<(), CompileError> {
        let kw = match m.ty.size().max(1) {
            1 => "byte",
            2 => "word",
            4 => "dword",
            _ => "qword",
        };
        let mask = (1u64 << m.bit_width) - 1;
        writeln!(self.out, "  movzx rax, {kw} ptr [{addr}]")?;
        if m.ty.size() == 8 {
            writeln!(self.out, "  mov rax, qword ptr [{addr}]")?;
        }
        writeln!(self.out, "  mov rcx, {}", !(mask << m.bit_offset))?;
        writeln!(self.out, "  and rax, rcx")?;
        writeln!(self.out, "  mov rcx, {val_reg}")?;
        writeln!(self.out, "  and rcx, {mask}")?;
        writeln!(self.out, "  shl rcx, {}", m.bit_offset)?;
        writeln!(self.out, "  or rax, rcx")?;
        writeln!(self.out, "  mov {kw} ptr [{addr}], {}", sized("rax", m.ty.size().max(1)))?;
        Ok(())
    }

    /// Stores the value currently at the top of the value stack (int or
    /// float, per `ty`) through the address one slot below it on the int
    /// stack, collapsing the two slots into one holding the stored value.
    fn store(&mut self, ty: &Type, member: Option<&Member>) -> Result<(), CompileError> {
        if is_flonum(ty) {
            let addr_d = self.itop - 1;
            let addr = self.int_slot(addr_d).operand();
            let val_d = self.ftop - 1;
            let val = self.float_slot(val_d).operand();
            let op = if ty.size() == 4 { "movss" } else { "movsd" };
            writeln!(self.out, "  {op} [{addr}], {val}")?;
            self.itop -= 1;
            Ok(())
        } else {
            let addr_d = self.itop - 2;
            let val_d = self.itop - 1;
            let addr = self.int_slot(addr_d).operand();
            let val_reg_owned;
            let val = match self.int_slot(val_d) {
                IntSlot::Reg(r) => r,
                IntSlot::Spill(off) => {
                    writeln!(self.out, "  mov rax, qword ptr [rbp-{off}]")?;
                    val_reg_owned = "rax".to_string();
                    val_reg_owned.as_str()
                }
            };
            if let Some(m) = member {
                if m.is_bitfield {
                    self.store_bitfield(&addr, m, val)?;
                    // leave the (unmasked) value as the expression result
                    let dest = self.int_slot(addr_d);
                    self.move_int(dest, val)?;
                    self.itop -= 1;
                    return Ok(());
                }
            }
            let sized_val = sized(val, ty.size().max(1));
            let kw = match ty.size().max(1) {
                1 => "byte",
                2 => "word",
                4 => "dword",
                _ => "qword",
            };
            writeln!(self.out, "  mov {kw} ptr [{addr}], {sized_val}")?;
            let dest = self.int_slot(addr_d);
            self.move_int(dest, val)?;
            self.itop -= 1;
            Ok(())
        }
    }

    fn move_int(&mut self, dest: IntSlot, src: &str) -> Result<(), CompileError> {
        match dest {
            IntSlot::Reg(r) => {
                if r != src {
                    writeln!(self.out, "  mov {r}, {src}")?;
                }
            }
            IntSlot::Spill(off) => {
                writeln!(self.out, "  mov qword ptr [rbp-{off}], {src}")?;
            }
        }
        Ok(())
    }

    fn gen_assign(&mut self, node: &Node) -> Result<(), CompileError> {
        let lhs = node.lhs.as_ref().unwrap();
        let rhs = node.rhs.as_ref().unwrap();
        let ty = lhs.ty.clone().unwrap();

        if is_aggregate(ty.kind()) {
            return self.gen_aggregate_assign(lhs, rhs, &ty);
        }

        if matches!(rhs.kind, NodeKind::Funcall) && is_aggregate(
            rhs.func_ty
                .as_ref()
                .and_then(|t| t.return_ty())
                .map(|t| t.kind())
                .unwrap_or(TypeKind::Void),
        ) {
            self.gen_addr(lhs)?;
            let dest_d = self.itop - 1;
            let dest_reg = self.int_reg(dest_d);
            self.itop -= 1;
            self.gen_funcall(rhs, Some(dest_reg))?;
            return Ok(());
        }

        self.gen_addr(lhs)?;
        self.gen_expr(rhs)?;
        self.store(&ty, lhs.member.as_ref())
    }

    fn gen_aggregate_assign(&mut self, lhs: &Node, rhs: &Node, ty: &Type) -> Result<(), CompileError> {
        self.gen_addr(lhs)?;
        self.gen_expr(rhs)?;
        // both are now addresses on the int stack: dst at itop-2, src at itop-1
        let src_d = self.itop - 1;
        let dst_d = self.itop - 2;
        let src = self.int_slot(src_d).operand();
        let dst = self.int_slot(dst_d).operand();
        writeln!(self.out, "  mov rsi, {src}")?;
        writeln!(self.out, "  mov rdi, {dst}")?;
        writeln!(self.out, "  mov rcx, {}", ty.size())?;
        writeln!(self.out, "  rep movsb")?;
        let dest_slot = self.int_slot(dst_d);
        self.move_int(dest_slot, "rdi")?;
        self.itop -= 1;
        // rdi now points past the copy; recompute dst address is wasteful
        // but correctness only requires leaving *an* address to dst's
        // struct as the expression's value, so reload it directly.
        self.gen_addr_reload(lhs, dst_d)
    }

    /// After `rep movsb` clobbers `rdi`, recomputes `lhs`'s address into
    /// the slot the aggregate-assignment result lives in.
    fn gen_addr_reload(&mut self, lhs: &Node, dst_d: i32) -> Result<(), CompileError> {
        let saved = self.itop;
        self.itop = dst_d;
        self.gen_addr(lhs)?;
        self.itop = saved;
        Ok(())
    }

    fn gen_cast(&mut self, from: &Type, to: &Type) -> Result<(), CompileError> {
        if to.kind() == TypeKind::Void {
            return Ok(());
        }
        let from_float = is_flonum(from);
        let to_float = is_flonum(to);
        match (from_float, to_float) {
            (true, true) => {
                if from.size() != to.size() {
                    let d = self.ftop - 1;
                    let r = self.float_reg(d);
                    if to.size() == 4 {
                        writeln!(self.out, "  cvtsd2ss {r}, {r}")?;
                    } else {
                        writeln!(self.out, "  cvtss2sd {r}, {r}")?;
                    }
                }
                Ok(())
            }
            (false, true) => {
                let id = self.itop - 1;
                let src = self.int_slot(id).operand();
                self.itop -= 1;
                let fd = self.ftop;
                let freg = self.float_reg(fd);
                let op = if to.size() == 4 { "cvtsi2ss" } else { "cvtsi2sd" };
                writeln!(self.out, "  {op} {freg}, {src}")?;
                self.ftop += 1;
                Ok(())
            }
            (true, false) => {
                let fd = self.ftop - 1;
                let src = self.float_slot(fd).operand();
                self.ftop -= 1;
                let id = self.itop;
                let ireg = self.int_reg(id);
                let op = if from.size() == 4 { "cvttss2si" } else { "cvttsd2si" };
                writeln!(self.out, "  {op} {ireg}, {src}")?;
                self.itop += 1;
                Ok(())
            }
            (false, false) => {
                let d = self.itop - 1;
                match self.int_slot(d) {
                    IntSlot::Reg(r) => self.narrow_reg(r, to),
                    IntSlot::Spill(off) => {
                        writeln!(self.out, "  mov rax, qword ptr [rbp-{off}]")?;
                        self.narrow_reg("rax", to)?;
                        writeln!(self.out, "  mov qword ptr [rbp-{off}], rax")?;
                        Ok(())
                    }
                }
            }
        }
    }

    fn narrow_reg(&mut self, r: &str, to: &Type) -> Result<(), CompileError> {
        match to.size() {
            1 => {
                let op = if to.is_unsigned() { "movzx" } else { "movsx" };
                writeln!(self.out, "  {op} {r}, {}", sized(r, 1))?;
            }
            2 => {
                let op = if to.is_unsigned() { "movzx" } else { "movsx" };
                writeln!(self.out, "  {op} {r}, {}", sized(r, 2))?;
            }
            4 => {
                if to.is_unsigned() {
                    writeln!(self.out, "  mov {}, {}", sized(r, 4), sized(r, 4))?;
                } else {
                    writeln!(self.out, "  movsxd {r}, {}", sized(r, 4))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn gen_cond(&mut self, node: &Node) -> Result<(), CompileError> {
        let else_l = self.fresh_label("else");
        let end_l = self.fresh_label("end");
        self.gen_expr(node.cond.as_ref().unwrap())?;
        self.pop_test_jump_zero(node.cond.as_ref().unwrap(), &else_l)?;
        self.gen_expr(node.then.as_ref().unwrap())?;
        self.rewind_after_branch(node.then.as_ref().unwrap())?;
        writeln!(self.out, "  jmp {end_l}")?;
        writeln!(self.out, "{else_l}:")?;
        self.gen_expr(node.els.as_ref().unwrap())?;
        writeln!(self.out, "{end_l}:")?;
        Ok(())
    }

    fn gen_log_and(&mut self, node: &Node) -> Result<(), CompileError> {
        let false_l = self.fresh_label("false");
        let end_l = self.fresh_label("end");
        self.gen_expr(node.lhs.as_ref().unwrap())?;
        self.pop_test_jump_zero(node.lhs.as_ref().unwrap(), &false_l)?;
        self.gen_expr(node.rhs.as_ref().unwrap())?;
        self.pop_test_jump_zero(node.rhs.as_ref().unwrap(), &false_l)?;
        let d = self.itop;
        let reg = self.int_reg(d);
        writeln!(self.out, "  mov {reg}, 1")?;
        writeln!(self.out, "  jmp {end_l}")?;
        writeln!(self.out, "{false_l}:")?;
        writeln!(self.out, "  mov {reg}, 0")?;
        writeln!(self.out, "{end_l}:")?;
        self.itop += 1;
        Ok(())
    }

    fn gen_log_or(&mut self, node: &Node) -> Result<(), CompileError> {
        let true_l = self.fresh_label("true");
        let end_l = self.fresh_label("end");
        self.gen_expr(node.lhs.as_ref().unwrap())?;
        self.pop_test_jump_nonzero(node.lhs.as_ref().unwrap(), &true_l)?;
        self.gen_expr(node.rhs.as_ref().unwrap())?;
        self.pop_test_jump_nonzero(node.rhs.as_ref().unwrap(), &true_l)?;
        let d = self.itop;
        let reg = self.int_reg(d);
        writeln!(self.out, "  mov {reg}, 0")?;
        writeln!(self.out, "  jmp {end_l}")?;
        writeln!(self.out, "{true_l}:")?;
        writeln!(self.out, "  mov {reg}, 1")?;
        writeln!(self.out, "{end_l}:")?;
        self.itop += 1;
        Ok(())
    }

    /// Pops a (possibly float) condition value and jumps to `label` if it
    /// tested zero.
    pub(super) fn pop_test_jump_zero(&mut self, cond: &Node, label: &str) -> Result<(), CompileError> {
        self.test_cond(cond)?;
        writeln!(self.out, "  je {label}")?;
        Ok(())
    }

    pub(super) fn pop_test_jump_nonzero(&mut self, cond: &Node, label: &str) -> Result<(), CompileError> {
        self.test_cond(cond)?;
        writeln!(self.out, "  jne {label}")?;
        Ok(())
    }

    fn test_cond(&mut self, cond: &Node) -> Result<(), CompileError> {
        let ty = cond.ty.clone().unwrap_or_else(types::ty_int);
        if is_flonum(&ty) {
            let d = self.ftop - 1;
            let r = self.float_slot(d).operand();
            let op = if ty.size() == 4 { "ucomiss" } else { "ucomisd" };
            writeln!(self.out, "  pxor xmm0, xmm0")?;
            writeln!(self.out, "  {op} {r}, xmm0")?;
            self.ftop -= 1;
        } else {
            let d = self.itop - 1;
            let slot = self.int_slot(d);
            writeln!(self.out, "  cmp {}, 0", slot.operand())?;
            self.itop -= 1;
        }
        Ok(())
    }

    /// Discards one evaluated-but-unused expression statement's result.
    pub(super) fn pop_discard(&mut self, node: &Node) -> Result<(), CompileError> {
        let ty = node.ty.clone().unwrap_or_else(types::ty_int);
        if is_flonum(&ty) {
            self.ftop -= 1;
        } else {
            self.itop -= 1;
        }
        Ok(())
    }

    /// Some branch shapes (ternary) leave the stack unchanged regardless
    /// of which side ran; present for symmetry with statement-level `if`.
    fn rewind_after_branch(&mut self, _then: &Node) -> Result<(), CompileError> {
        Ok(())
    }

    fn push_int_const(&mut self, val: i64) -> Result<(), CompileError> {
        let d = self.itop;
        let reg = self.int_reg(d);
        writeln!(self.out, "  mov {reg}, {val}")?;
        self.itop += 1;
        Ok(())
    }

    fn push_float_const(&mut self, val: f64, size: i32) -> Result<(), CompileError> {
        let bits = if size == 4 {
            (val as f32).to_bits() as u64
        } else {
            val.to_bits()
        };
        let label = self.float_const_label(bits, size);
        let d = self.ftop;
        let reg = self.float_reg(d);
        let op = if size == 4 { "movss" } else { "movsd" };
        writeln!(self.out, "  {op} {reg}, [rip+{label}]")?;
        self.ftop += 1;
        Ok(())
    }

    fn store_bool_result(&mut self, d: i32) -> Result<(), CompileError> {
        match self.int_slot(d) {
            IntSlot::Reg(r) => writeln!(self.out, "  movzx {r}, al")?,
            IntSlot::Spill(off) => {
                writeln!(self.out, "  movzx rax, al")?;
                writeln!(self.out, "  mov qword ptr [rbp-{off}], rax")?;
            }
        }
        Ok(())
    }

    fn gen_binary(&mut self, node: &Node) -> Result<(), CompileError> {
        let lhs = node.lhs.as_ref().unwrap();
        let rhs = node.rhs.as_ref().unwrap();
        let ty = lhs.ty.clone().unwrap_or_else(types::ty_int);

        self.gen_expr(lhs)?;
        self.gen_expr(rhs)?;

        if is_flonum(&ty) {
            return self.gen_float_binary(node.kind, &ty);
        }
        self.gen_int_binary(node.kind, &ty)
    }

    fn gen_float_binary(&mut self, kind: NodeKind, ty: &Type) -> Result<(), CompileError> {
        let suffix = if ty.size() == 4 { "ss" } else { "sd" };
        let rd = self.ftop - 2;
        let rs = self.ftop - 1;
        let dreg = self.float_reg(rd);
        let sreg = self.float_reg(rs);
        match kind {
            NodeKind::Add => writeln!(self.out, "  add{suffix} {dreg}, {sreg}")?,
            NodeKind::Sub => writeln!(self.out, "  sub{suffix} {dreg}, {sreg}")?,
            NodeKind::Mul => writeln!(self.out, "  mul{suffix} {dreg}, {sreg}")?,
            NodeKind::Div => writeln!(self.out, "  div{suffix} {dreg}, {sreg}")?,
            NodeKind::Eq | NodeKind::Ne | NodeKind::Lt | NodeKind::Le => {
                let op = if suffix == "ss" { "ucomiss" } else { "ucomisd" };
                writeln!(self.out, "  {op} {dreg}, {sreg}")?;
                self.ftop -= 2;
                let id = self.itop;
                let ireg = self.int_reg(id);
                let setcc = match kind {
                    NodeKind::Eq => "sete",
                    NodeKind::Ne => "setne",
                    NodeKind::Lt => "setb",
                    _ => "setbe",
                };
                writeln!(self.out, "  {setcc} al")?;
                writeln!(self.out, "  movzx {ireg}, al")?;
                self.itop += 1;
                return Ok(());
            }
            _ => {
                return Err(CompileError::io(
                    std::path::PathBuf::new(),
                    format!("codegen: invalid float operator {kind:?}"),
                ))
            }
        }
        self.ftop -= 1;
        Ok(())
    }

    fn gen_int_binary(&mut self, kind: NodeKind, ty: &Type) -> Result<(), CompileError> {
        let rd = self.itop - 2;
        let rs = self.itop - 1;
        let dest_slot = self.int_slot(rd);
        let src_slot = self.int_slot(rs);
        let unsigned = ty.is_unsigned();

        match kind {
            NodeKind::Add => self.emit_int_op("add", dest_slot, src_slot)?,
            NodeKind::Sub => self.emit_int_op("sub", dest_slot, src_slot)?,
            NodeKind::Mul => self.emit_int_op("imul", dest_slot, src_slot)?,
            NodeKind::BitAnd => self.emit_int_op("and", dest_slot, src_slot)?,
            NodeKind::BitOr => self.emit_int_op("or", dest_slot, src_slot)?,
            NodeKind::BitXor => self.emit_int_op("xor", dest_slot, src_slot)?,
            NodeKind::Div | NodeKind::Mod => {
                writeln!(self.out, "  mov rax, {}", dest_slot.operand())?;
                if unsigned {
                    writeln!(self.out, "  xor rdx, rdx")?;
                    writeln!(self.out, "  div {}", src_slot.operand())?;
                } else {
                    writeln!(self.out, "  cqo")?;
                    writeln!(self.out, "  idiv {}", src_slot.operand())?;
                }
                let result = if kind == NodeKind::Div { "rax" } else { "rdx" };
                self.move_int(dest_slot, result)?;
            }
            NodeKind::Shl | NodeKind::Shr => {
                writeln!(self.out, "  mov rcx, {}", src_slot.operand())?;
                let op = match kind {
                    NodeKind::Shl => "sal",
                    _ if unsigned => "shr",
                    _ => "sar",
                };
                match dest_slot {
                    IntSlot::Reg(r) => writeln!(self.out, "  {op} {r}, cl")?,
                    IntSlot::Spill(off) => {
                        writeln!(self.out, "  mov rax, qword ptr [rbp-{off}]")?;
                        writeln!(self.out, "  {op} rax, cl")?;
                        writeln!(self.out, "  mov qword ptr [rbp-{off}], rax")?;
                    }
                }
            }
            NodeKind::Eq | NodeKind::Ne | NodeKind::Lt | NodeKind::Le => {
                writeln!(self.out, "  cmp {}, {}", dest_slot.operand(), src_slot.operand())?;
                let setcc = match (kind, unsigned) {
                    (NodeKind::Eq, _) => "sete",
                    (NodeKind::Ne, _) => "setne",
                    (NodeKind::Lt, true) => "setb",
                    (NodeKind::Lt, false) => "setl",
                    (NodeKind::Le, true) => "setbe",
                    (NodeKind::Le, false) => "setle",
                    _ => unreachable!(),
                };
                writeln!(self.out, "  {setcc} al")?;
                writeln!(self.out, "  movzx rax, al")?;
                self.move_int(dest_slot, "rax")?;
            }
            _ => {
                return Err(CompileError::io(
                    std::path::PathBuf::new(),
                    format!("codegen: invalid integer operator {kind:?}"),
                ))
            }
        }
        self.itop -= 1;
        Ok(())
    }

    fn emit_int_op(&mut self, op: &str, dest: IntSlot, src: IntSlot) -> Result<(), CompileError> {
        match dest {
            IntSlot::Reg(r) => writeln!(self.out, "  {op} {r}, {}", src.operand())?,
            IntSlot::Spill(off) => {
                writeln!(self.out, "  mov rax, qword ptr [rbp-{off}]")?;
                writeln!(self.out, "  {op} rax, {}", src.operand())?;
                writeln!(self.out, "  mov qword ptr [rbp-{off}], rax")?;
            }
        }
        Ok(())
    }

    /// Lowers a call. `dest_for_struct_return`, when given, is a register
    /// name already holding the address the callee should write a
    /// struct/union return value into (the caller's lvalue); otherwise a
    /// scratch buffer in the current frame's spill area is used.
    pub(super) fn gen_funcall(
        &mut self,
        node: &Node,
        dest_for_struct_return: Option<String>,
    ) -> Result<(), CompileError> {
        let base_itop = self.itop;
        let base_ftop = self.ftop;

        enum Class {
            Int,
            Float,
        }
        let mut locs: Vec<(Class, i32, Type)> = Vec::new();
        for arg in &node.args {
            let (i0, f0) = (self.itop, self.ftop);
            self.gen_expr(arg)?;
            if self.ftop > f0 {
                locs.push((Class::Float, self.ftop - 1, arg.ty.clone().unwrap()));
            } else {
                debug_assert!(self.itop > i0);
                locs.push((Class::Int, self.itop - 1, arg.ty.clone().unwrap()));
            }
        }

        let func_ty = node.func_ty.clone();
        let ret_ty = func_ty.as_ref().and_then(|t| t.return_ty()).unwrap_or_else(types::ty_int);
        let returns_struct = is_aggregate(ret_ty.kind());
        let is_variadic = func_ty.as_ref().map(|t| t.is_variadic()).unwrap_or(false);

        let mut int_count = 0usize;
        let mut float_count = 0usize;
        let mut overflow: Vec<(Class, i32, Type)> = Vec::new();

        if returns_struct {
            if let Some(reg) = &dest_for_struct_return {
                writeln!(self.out, "  mov rdi, {reg}")?;
            } else {
                let off = self.frame.int_spill_base;
                writeln!(self.out, "  lea rdi, [rbp-{off}]")?;
            }
            int_count = 1;
        }

        for (class, idx, ty) in locs {
            match class {
                Class::Int => {
                    let size = if is_aggregate(ty.kind()) || ty.kind() == TypeKind::Array {
                        8
                    } else {
                        ty.size().max(1)
                    };
                    if int_count < 6 {
                        let src = self.int_slot(idx).operand_sized(size);
                        writeln!(self.out, "  mov {}, {src}", super::state::sized_int_reg(ARG_INT_64[int_count], size))?;
                        int_count += 1;
                    } else {
                        overflow.push((Class::Int, idx, ty));
                    }
                }
                Class::Float => {
                    if float_count < 8 {
                        let src = self.float_slot(idx).operand();
                        let op = if ty.size() == 4 { "movss" } else { "movsd" };
                        writeln!(self.out, "  {op} {}, {src}", ARG_FLOAT[float_count])?;
                        float_count += 1;
                    } else {
                        overflow.push((Class::Float, idx, ty));
                    }
                }
            }
        }

        self.itop = base_itop;
        self.ftop = base_ftop;

        // caller-saved scratch registers/slots still holding live outer
        // values must survive the call.
        let mut spill_int: Vec<i32> = Vec::new();
        for d in 0..2.min(base_itop) {
            spill_int.push(d);
        }
        for d in &spill_int {
            writeln!(self.out, "  push {}", self.int_reg(*d))?;
        }
        let float_live = base_ftop.max(0);
        for d in 0..float_live {
            let r = self.float_reg(d);
            writeln!(self.out, "  sub rsp, 8")?;
            writeln!(self.out, "  movsd [rsp], {r}")?;
        }

        let mut pad = false;
        if !overflow.is_empty() && overflow.len() % 2 != 0 {
            writeln!(self.out, "  sub rsp, 8")?;
            pad = true;
        }
        for (class, idx, ty) in overflow.iter().rev() {
            match class {
                Class::Int => writeln!(self.out, "  push {}", self.int_slot(*idx).operand())?,
                Class::Float => {
                    writeln!(self.out, "  sub rsp, 8")?;
                    let op = if ty.size() == 4 { "movss" } else { "movsd" };
                    writeln!(self.out, "  {op} [rsp], {}", self.float_slot(*idx).operand())?;
                }
            }
        }

        if is_variadic {
            writeln!(self.out, "  mov al, {float_count}")?;
        }
        writeln!(self.out, "  call {}", node.func_name)?;

        let cleanup = overflow.len() as i32 * 8 + if pad { 8 } else { 0 };
        if cleanup > 0 {
            writeln!(self.out, "  add rsp, {cleanup}")?;
        }

        for d in (0..float_live).rev() {
            let r = self.float_reg(d);
            writeln!(self.out, "  movsd {r}, [rsp]")?;
            writeln!(self.out, "  add rsp, 8")?;
        }
        for d in spill_int.iter().rev() {
            writeln!(self.out, "  pop {}", self.int_reg(*d))?;
        }

        match ret_ty.kind() {
            TypeKind::Void => {}
            _ if returns_struct => {
                let d = self.itop;
                let reg = self.int_reg(d);
                writeln!(self.out, "  mov {reg}, rax")?;
                self.itop += 1;
            }
            _ if is_flonum(&ret_ty) => {
                let d = self.ftop;
                let r = self.float_reg(d);
                let op = if ret_ty.size() == 4 { "movss" } else { "movsd" };
                writeln!(self.out, "  {op} {r}, xmm0")?;
                self.ftop += 1;
            }
            _ => {
                let d = self.itop;
                let reg = self.int_reg(d);
                if is_integer(&ret_ty) && ret_ty.size() < 8 && !ret_ty.is_unsigned() {
                    writeln!(self.out, "  movsxd {reg}, eax")?;
                } else {
                    writeln!(self.out, "  mov {}, {}", sized(&reg, ret_ty.size().max(4).min(8)), sized("rax", ret_ty.size().max(4).min(8)))?;
                }
                self.itop += 1;
            }
        }
        Ok(())
    }
}

fn sized(reg: &str, size: i32) -> String {
    super::state::sized_int_reg(reg, size)
}
