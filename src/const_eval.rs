//! Constant-expression evaluator
//!
//! A small self-contained recursive-descent evaluator over an already
//! macro-expanded, already-`convert_pp_tokens`-resolved token slice. Used by
//! the preprocessor for `#if`/`#elif` and reused by the parser for array
//! bounds, `case` labels, and enumerator values, so both callers share one
//! constant-folding entry point.

use crate::error::CompileError;
use crate::diagnostics::Diagnostic;
use crate::token::{NumValue, Token};

struct Cursor<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.toks.get(self.pos).filter(|t| !t.is_eof())
    }

    fn is(&self, s: &str) -> bool {
        self.peek().map(|t| t.is(s)).unwrap_or(false)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let t = self.toks.get(self.pos).filter(|t| !t.is_eof());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, s: &str) -> Result<(), CompileError> {
        if self.is(s) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", s)))
        }
    }

    fn error(&self, msg: &str) -> CompileError {
        let tok = self.toks.get(self.pos).unwrap_or_else(|| self.toks.last().unwrap());
        CompileError::ConstEval(Diagnostic::error_at_token(tok, msg.to_string()))
    }
}

/// Evaluates a fully-resolved constant-expression token slice to an `i64`.
/// Errors if tokens remain unconsumed (other than a trailing EOF).
pub fn eval(tokens: &[Token]) -> Result<i64, CompileError> {
    let mut c = Cursor { toks: tokens, pos: 0 };
    let val = conditional(&mut c)?;
    if c.peek().is_some() {
        return Err(c.error("extra token in constant expression"));
    }
    Ok(val)
}

fn conditional(c: &mut Cursor) -> Result<i64, CompileError> {
    let cond = logor(c)?;
    if c.is("?") {
        c.advance();
        let then_val = conditional(c)?;
        c.expect(":")?;
        let else_val = conditional(c)?;
        return Ok(if cond != 0 { then_val } else { else_val });
    }
    Ok(cond)
}

macro_rules! left_assoc {
    ($name:ident, $next:ident, [$($op:literal => $f:expr),+ $(,)?]) => {
        fn $name(c: &mut Cursor) -> Result<i64, CompileError> {
            let mut lhs = $next(c)?;
            loop {
                $(
                    if c.is($op) {
                        c.advance();
                        let rhs = $next(c)?;
                        lhs = ($f)(lhs, rhs);
                        continue;
                    }
                )+
                break;
            }
            Ok(lhs)
        }
    };
}

left_assoc!(logor, logand, ["||" => |a: i64, b: i64| ((a != 0) || (b != 0)) as i64]);
left_assoc!(logand, bitor_, ["&&" => |a: i64, b: i64| ((a != 0) && (b != 0)) as i64]);
left_assoc!(bitor_, bitxor_, ["|" => |a: i64, b: i64| a | b]);
left_assoc!(bitxor_, bitand_, ["^" => |a: i64, b: i64| a ^ b]);
left_assoc!(bitand_, equality, ["&" => |a: i64, b: i64| a & b]);
left_assoc!(equality, relational, [
    "==" => |a: i64, b: i64| (a == b) as i64,
    "!=" => |a: i64, b: i64| (a != b) as i64,
]);
left_assoc!(relational, shift, [
    "<" => |a: i64, b: i64| (a < b) as i64,
    "<=" => |a: i64, b: i64| (a <= b) as i64,
    ">" => |a: i64, b: i64| (a > b) as i64,
    ">=" => |a: i64, b: i64| (a >= b) as i64,
]);
left_assoc!(shift, additive, [
    "<<" => |a: i64, b: i64| a << b,
    ">>" => |a: i64, b: i64| a >> b,
]);
left_assoc!(additive, multiplicative, [
    "+" => |a: i64, b: i64| a + b,
    "-" => |a: i64, b: i64| a - b,
]);
left_assoc!(multiplicative, unary, [
    "*" => |a: i64, b: i64| a * b,
    "/" => |a: i64, b: i64| if b == 0 { 0 } else { a / b },
    "%" => |a: i64, b: i64| if b == 0 { 0 } else { a % b },
]);

fn unary(c: &mut Cursor) -> Result<i64, CompileError> {
    if c.is("+") {
        c.advance();
        return unary(c);
    }
    if c.is("-") {
        c.advance();
        return Ok(-unary(c)?);
    }
    if c.is("!") {
        c.advance();
        return Ok((unary(c)? == 0) as i64);
    }
    if c.is("~") {
        c.advance();
        return Ok(!unary(c)?);
    }
    primary(c)
}

fn primary(c: &mut Cursor) -> Result<i64, CompileError> {
    if c.is("(") {
        c.advance();
        let v = conditional(c)?;
        c.expect(")")?;
        return Ok(v);
    }
    match c.advance() {
        Some(tok) => match tok.num_value {
            Some(NumValue::Int(v)) => Ok(v),
            Some(NumValue::Float(f)) => Ok(f as i64),
            None => Err(CompileError::ConstEval(Diagnostic::error_at_token(
                tok,
                "not a constant expression".to_string(),
            ))),
        },
        None => Err(c.error("unexpected end of constant expression")),
    }
}

/// Evaluates an already-typed AST expression to an `i64`. Used by the parser
/// for array bounds, `case` labels, and enumerator values — cases where the
/// token-based `eval` above can't see previously declared enum constants or
/// `sizeof`. A single recursive walk over the typed tree, named separately
/// since the token-slice evaluator above already owns `eval`.
pub fn eval_const_node(node: &crate::ast::Node) -> Result<i64, CompileError> {
    use crate::ast::NodeKind;

    let err = |msg: &str| -> CompileError {
        CompileError::ConstEval(Diagnostic::error_at_token(&node.tok, msg.to_string()))
    };

    let lhs = || -> Result<i64, CompileError> {
        eval_const_node(node.lhs.as_deref().ok_or_else(|| err("missing operand"))?)
    };
    let rhs = || -> Result<i64, CompileError> {
        eval_const_node(node.rhs.as_deref().ok_or_else(|| err("missing operand"))?)
    };

    match node.kind {
        NodeKind::Num => Ok(node.val),
        NodeKind::Add => Ok(lhs()?.wrapping_add(rhs()?)),
        NodeKind::Sub => Ok(lhs()?.wrapping_sub(rhs()?)),
        NodeKind::Mul => Ok(lhs()?.wrapping_mul(rhs()?)),
        NodeKind::Div => {
            let (l, r) = (lhs()?, rhs()?);
            if r == 0 {
                return Err(err("division by zero in constant expression"));
            }
            Ok(l.wrapping_div(r))
        }
        NodeKind::Mod => {
            let (l, r) = (lhs()?, rhs()?);
            if r == 0 {
                return Err(err("division by zero in constant expression"));
            }
            Ok(l.wrapping_rem(r))
        }
        NodeKind::BitAnd => Ok(lhs()? & rhs()?),
        NodeKind::BitOr => Ok(lhs()? | rhs()?),
        NodeKind::BitXor => Ok(lhs()? ^ rhs()?),
        NodeKind::Shl => Ok(lhs()? << rhs()?),
        NodeKind::Shr => Ok(lhs()? >> rhs()?),
        NodeKind::Eq => Ok((lhs()? == rhs()?) as i64),
        NodeKind::Ne => Ok((lhs()? != rhs()?) as i64),
        NodeKind::Lt => Ok((lhs()? < rhs()?) as i64),
        NodeKind::Le => Ok((lhs()? <= rhs()?) as i64),
        NodeKind::LogAnd => Ok(((lhs()? != 0) && (rhs()? != 0)) as i64),
        NodeKind::LogOr => Ok(((lhs()? != 0) || (rhs()? != 0)) as i64),
        NodeKind::Not => Ok((lhs()? == 0) as i64),
        NodeKind::BitNot => Ok(!lhs()?),
        NodeKind::Cond => {
            let cond = eval_const_node(node.cond.as_deref().ok_or_else(|| err("missing condition"))?)?;
            if cond != 0 {
                eval_const_node(node.then.as_deref().ok_or_else(|| err("missing then-branch"))?)
            } else {
                eval_const_node(node.els.as_deref().ok_or_else(|| err("missing else-branch"))?)
            }
        }
        NodeKind::Comma => rhs(),
        NodeKind::Cast => lhs(),
        _ => Err(err("not a constant expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{convert_pp_tokens, tokenize};
    use std::path::PathBuf;

    fn eval_str(src: &str) -> i64 {
        let mut toks = tokenize(PathBuf::from("<test>"), src.to_string(), 0).unwrap();
        convert_pp_tokens(&mut toks).unwrap();
        eval(&toks).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval_str("1 + 2 * 3"), 7);
        assert_eq!(eval_str("(1 + 2) * 3"), 9);
    }

    #[test]
    fn ternary_and_logical() {
        assert_eq!(eval_str("1 ? 2 : 3"), 2);
        assert_eq!(eval_str("0 || 1 && 0"), 0);
        assert_eq!(eval_str("1 == 1 && 2 != 3"), 1);
    }

    #[test]
    fn bitwise_and_shift() {
        assert_eq!(eval_str("1 << 4"), 16);
        assert_eq!(eval_str("6 & 3"), 2);
        assert_eq!(eval_str("6 | 1"), 7);
    }

    #[test]
    fn eval_const_node_arithmetic_and_ternary() {
        use crate::ast::{Node, NodeKind};
        use crate::token::Token;

        let tok = || Token::eof(std::rc::Rc::new(PathBuf::from("<test>")), std::rc::Rc::from(""), 0, 1);

        let two = Node::new_num(2, tok());
        let three = Node::new_num(3, tok());
        let mul = Node::new_binary(NodeKind::Mul, two, three, tok());
        let one = Node::new_num(1, tok());
        let add = Node::new_binary(NodeKind::Add, one, mul, tok());
        assert_eq!(eval_const_node(&add).unwrap(), 7);

        let mut cond = Node::new(NodeKind::Cond, tok());
        cond.cond = Some(Box::new(Node::new_num(0, tok())));
        cond.then = Some(Box::new(Node::new_num(10, tok())));
        cond.els = Some(Box::new(Node::new_num(20, tok())));
        assert_eq!(eval_const_node(&cond).unwrap(), 20);
    }
}
