//! Stack frame layout.
//!
//! Run once per function after parsing, before any instructions are
//! emitted for that function's body. Assigns every local (including
//! parameters, which parser.rs already folds into `Function::locals`) a
//! negative `rbp`-relative offset, then reserves the fixed-size areas the
//! prologue needs: callee-saved spills, the register-stack overflow area,
//! and (for variadic functions) the `va_arg` save area.

use crate::ast::Function;
use crate::types::align_to;

use super::state::{Frame, CALLEE_SAVE_BYTES, FLOAT_SPILL_SLOTS, INT_SPILL_SLOTS, VA_SAVE_BYTES};

pub(super) fn assign_lvar_offsets(func: &Function) -> Frame {
    let mut offset = if func.is_variadic {
        CALLEE_SAVE_BYTES + VA_SAVE_BYTES
    } else {
        CALLEE_SAVE_BYTES
    };

    let va_save_base = if func.is_variadic { offset } else { 0 };

    for v in &func.locals {
        let ty = v.borrow().ty.clone();
        offset = align_to(offset + ty.size(), ty.align().max(1));
        v.borrow().offset.set(-offset);
    }

    let int_spill_base = align_to(offset + 8, 8);
    offset = int_spill_base + 8 * (INT_SPILL_SLOTS - 1);
    let float_spill_base = align_to(offset + 8, 8);
    offset = float_spill_base + 8 * (FLOAT_SPILL_SLOTS - 1);

    let stack_size = align_to(offset, 16);

    Frame {
        stack_size,
        int_spill_base,
        float_spill_base,
        va_save_base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{new_local_var, Function, Node, NodeKind};
    use crate::token::Token;
    use crate::types::{array_of, ty_char, ty_int, ty_long};

    fn dummy_body() -> Node {
        Node::new(NodeKind::Block, Token::dummy())
    }

    #[test]
    fn offsets_are_negative_and_aligned() {
        let a = new_local_var("a".to_string(), ty_char());
        let b = new_local_var("b".to_string(), ty_int());
        let c = new_local_var("c".to_string(), array_of(ty_long(), 3));
        let func = Function {
            name: "f".to_string(),
            params: vec![],
            is_static: false,
            is_variadic: false,
            body: dummy_body(),
            locals: vec![a.clone(), b.clone(), c.clone()],
            stack_size: 0,
        };
        let frame = assign_lvar_offsets(&func);

        assert!(a.borrow().offset.get() < 0);
        assert!(b.borrow().offset.get() < 0);
        assert!(c.borrow().offset.get() < 0);
        assert_eq!((-b.borrow().offset.get()) % 4, 0);
        assert_eq!((-c.borrow().offset.get()) % 8, 0);
        assert_eq!(frame.stack_size % 16, 0);
    }

    #[test]
    fn variadic_reserves_save_area_before_locals() {
        let a = new_local_var("a".to_string(), ty_int());
        let func = Function {
            name: "f".to_string(),
            params: vec![],
            is_static: false,
            is_variadic: true,
            body: dummy_body(),
            locals: vec![a.clone()],
            stack_size: 0,
        };
        let frame = assign_lvar_offsets(&func);
        assert_eq!(frame.va_save_base, 128);
        assert!((-a.borrow().offset.get()) > 128);
    }
}
