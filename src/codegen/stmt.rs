//! Statement lowering: control flow, `switch`/`case` label coordination,
//! and `return`.

use std::fmt::Write as _;

use crate::ast::{Node, NodeKind};
use crate::error::CompileError;

use super::state::CodeGen;

impl CodeGen {
    pub(super) fn gen_stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        match node.kind {
            NodeKind::ExprStmt => {
                let e = node.lhs.as_ref().unwrap();
                self.gen_expr(e)?;
                self.pop_discard(e)
            }
            NodeKind::Block => {
                for s in &node.body {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }
            NodeKind::Return => {
                if let Some(e) = &node.lhs {
                    self.gen_expr(e)?;
                    self.move_return_value(e)?;
                }
                writeln!(self.out, "  jmp {}", self.ret_label)?;
                Ok(())
            }
            NodeKind::If => self.gen_if(node),
            NodeKind::For => self.gen_for(node),
            NodeKind::Do => self.gen_do(node),
            NodeKind::Switch => self.gen_switch(node),
            NodeKind::Case => {
                let label = self.unique_label_for(node);
                writeln!(self.out, "{label}:")?;
                if let Some(lhs) = &node.lhs {
                    self.gen_stmt(lhs)?;
                }
                Ok(())
            }
            NodeKind::Break => {
                let label = self
                    .break_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| stray("break"))?;
                writeln!(self.out, "  jmp {label}")?;
                Ok(())
            }
            NodeKind::Continue => {
                let label = self
                    .continue_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| stray("continue"))?;
                writeln!(self.out, "  jmp {label}")?;
                Ok(())
            }
            NodeKind::Goto => {
                let label = self.func_label(&node.label_name);
                writeln!(self.out, "  jmp {label}")?;
                Ok(())
            }
            NodeKind::Label => {
                let label = self.func_label(&node.label_name);
                writeln!(self.out, "{label}:")?;
                if let Some(lhs) = &node.lhs {
                    self.gen_stmt(lhs)?;
                }
                Ok(())
            }
            NodeKind::NullExpr => Ok(()),
            _ => {
                self.gen_expr(node)?;
                self.pop_discard(node)
            }
        }
    }

    /// Stores the evaluated return expression's value into `rax`/`xmm0`
    /// per the SysV return-value convention, popping it off whichever
    /// stack it landed on.
    fn move_return_value(&mut self, e: &Node) -> Result<(), CompileError> {
        let ty = e.ty.clone().unwrap_or_else(crate::types::ty_int);
        if crate::types::is_flonum(&ty) {
            let d = self.ftop - 1;
            let src = self.float_slot(d).operand();
            let op = if ty.size() == 4 { "movss" } else { "movsd" };
            writeln!(self.out, "  {op} xmm0, {src}")?;
            self.ftop -= 1;
        } else if super::data::is_aggregate(ty.kind()) {
            // struct/union return: the value on the int stack is already
            // the address the caller expects back in rax (it was written
            // through the hidden pointer during the function body).
            let d = self.itop - 1;
            let src = self.int_slot(d).operand();
            writeln!(self.out, "  mov rax, {src}")?;
            self.itop -= 1;
        } else {
            let d = self.itop - 1;
            let src = self.int_slot(d).operand();
            writeln!(self.out, "  mov rax, {src}")?;
            self.itop -= 1;
        }
        Ok(())
    }

    fn gen_if(&mut self, node: &Node) -> Result<(), CompileError> {
        let else_l = self.fresh_label("else");
        let end_l = self.fresh_label("end");
        let cond = node.cond.as_ref().unwrap();
        self.gen_expr(cond)?;
        self.pop_test_jump_zero(cond, &else_l)?;
        self.gen_stmt(node.then.as_ref().unwrap())?;
        writeln!(self.out, "  jmp {end_l}")?;
        writeln!(self.out, "{else_l}:")?;
        if let Some(els) = &node.els {
            self.gen_stmt(els)?;
        }
        writeln!(self.out, "{end_l}:")?;
        Ok(())
    }

    fn gen_for(&mut self, node: &Node) -> Result<(), CompileError> {
        let begin_l = self.fresh_label("begin");
        let end_l = self.fresh_label("end");
        let continue_l = self.fresh_label("continue");

        if let Some(init) = &node.init {
            self.gen_stmt(init)?;
        }
        writeln!(self.out, "{begin_l}:")?;
        if let Some(cond) = &node.cond {
            self.gen_expr(cond)?;
            self.pop_test_jump_zero(cond, &end_l)?;
        }
        self.break_labels.push(end_l.clone());
        self.continue_labels.push(continue_l.clone());
        self.gen_stmt(node.then.as_ref().unwrap())?;
        self.break_labels.pop();
        self.continue_labels.pop();

        writeln!(self.out, "{continue_l}:")?;
        if let Some(inc) = &node.inc {
            self.gen_expr(inc)?;
            self.pop_discard(inc)?;
        }
        writeln!(self.out, "  jmp {begin_l}")?;
        writeln!(self.out, "{end_l}:")?;
        Ok(())
    }

    fn gen_do(&mut self, node: &Node) -> Result<(), CompileError> {
        let begin_l = self.fresh_label("begin");
        let end_l = self.fresh_label("end");
        let continue_l = self.fresh_label("continue");

        writeln!(self.out, "{begin_l}:")?;
        self.break_labels.push(end_l.clone());
        self.continue_labels.push(continue_l.clone());
        self.gen_stmt(node.then.as_ref().unwrap())?;
        self.break_labels.pop();
        self.continue_labels.pop();

        writeln!(self.out, "{continue_l}:")?;
        let cond = node.cond.as_ref().unwrap();
        self.gen_expr(cond)?;
        self.pop_test_jump_nonzero(cond, &begin_l)?;
        writeln!(self.out, "{end_l}:")?;
        Ok(())
    }

    /// `switch` is lowered in two passes over the same body, using a
    /// register-free style of chained `cmp`/`je`: first emit the scrutinee
    /// comparisons against every `case`
    /// (falling through to `default`, or past the body, if none match),
    /// then emit the body itself, where each `Case` node picks up the
    /// label this pass assigned it via `unique_label`.
    fn gen_switch(&mut self, node: &Node) -> Result<(), CompileError> {
        let end_l = self.fresh_label("end");
        let cond = node.cond.as_ref().unwrap();
        self.gen_expr(cond)?;
        let d = self.itop - 1;
        let scrutinee = self.int_slot(d).operand();

        let mut default_label: Option<String> = None;
        let mut cases = Vec::new();
        collect_cases(node.then.as_ref().unwrap(), &mut cases);

        for case in &cases {
            let label = self.fresh_label("case");
            *case.unique_label.borrow_mut() = Some(label.clone());
            if case.is_default_case {
                default_label = Some(label);
            } else {
                writeln!(self.out, "  cmp {scrutinee}, {}", case.case_val)?;
                writeln!(self.out, "  je {label}")?;
            }
        }
        self.itop -= 1;

        if let Some(label) = default_label {
            writeln!(self.out, "  jmp {label}")?;
        } else {
            writeln!(self.out, "  jmp {end_l}")?;
        }

        self.break_labels.push(end_l.clone());
        self.gen_stmt(node.then.as_ref().unwrap())?;
        self.break_labels.pop();
        writeln!(self.out, "{end_l}:")?;
        Ok(())
    }

    fn unique_label_for(&mut self, node: &Node) -> String {
        if let Some(l) = node.unique_label.borrow().as_ref() {
            return l.clone();
        }
        let l = self.fresh_label("case");
        *node.unique_label.borrow_mut() = Some(l.clone());
        l
    }
}

/// Walks a `switch` body collecting every `Case` node (including nested
/// inside plain blocks/ifs at the same switch level, but not descending
/// into a nested `switch`'s own cases).
fn collect_cases<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    match node.kind {
        NodeKind::Case => out.push(node),
        NodeKind::Block => {
            for s in &node.body {
                collect_cases(s, out);
            }
        }
        NodeKind::If => {
            if let Some(t) = &node.then {
                collect_cases(t, out);
            }
            if let Some(e) = &node.els {
                collect_cases(e, out);
            }
        }
        NodeKind::For | NodeKind::Do => {
            if let Some(t) = &node.then {
                collect_cases(t, out);
            }
        }
        NodeKind::Label => {
            if let Some(l) = &node.lhs {
                collect_cases(l, out);
            }
        }
        NodeKind::Switch => {}
        _ => {}
    }
}

fn stray(what: &str) -> CompileError {
    CompileError::io(
        std::path::PathBuf::new(),
        format!("codegen: stray {what} statement outside a loop/switch"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Function, Node, NodeKind, Program};
    use crate::token::Token;

    fn codegen_function(func: Function) -> String {
        let mut prog = Program::new();
        prog.functions.push(func);
        let mut out = String::new();
        super::super::generate_to_string(&prog, false, &mut out).unwrap();
        out
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let mut body = Node::new(NodeKind::Block, Token::dummy());
        body.body.push(Node::new(NodeKind::Break, Token::dummy()));
        let func = Function {
            name: "f".to_string(),
            params: vec![],
            is_static: false,
            is_variadic: false,
            body,
            locals: vec![],
            stack_size: 0,
        };
        let mut prog = Program::new();
        prog.functions.push(func);
        let mut out = String::new();
        assert!(super::super::generate_to_string(&prog, false, &mut out).is_err());
    }

    #[test]
    fn empty_function_emits_prologue_and_epilogue() {
        let body = Node::new(NodeKind::Block, Token::dummy());
        let func = Function {
            name: "main".to_string(),
            params: vec![],
            is_static: false,
            is_variadic: false,
            body,
            locals: vec![],
            stack_size: 0,
        };
        let asm = codegen_function(func);
        assert!(asm.contains("main:"));
        assert!(asm.contains("push r12"));
        assert!(asm.contains("ret"));
    }
}
