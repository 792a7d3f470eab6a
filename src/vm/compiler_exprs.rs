//! Expression compilation.
//!
//! One method per precedence level, lowest first. `can_assign` is true only
//! while no operator of higher precedence than assignment has been consumed,
//! so `a + b = c` leaves the `=` behind and is rejected as an invalid target.

use crate::lexer::TokenKind;

use super::compiler::{CompileResult, Compiler, VariableAccess, MAX_ARGS};
use super::opcode::Op;
use super::value::Value;

const NESTED_EXPRESSION: &str = "Expression nested too deeply.";

impl Compiler {
    pub(crate) fn expression(&mut self) -> CompileResult<()> {
        self.nested(NESTED_EXPRESSION, |c| c.or(true))?;
        if self.tokens.matches(TokenKind::Equal) {
            return Err(self.tokens.error_at_previous("Invalid assignment target."));
        }
        Ok(())
    }

    fn or(&mut self, can_assign: bool) -> CompileResult<()> {
        self.and(can_assign)?;
        while self.tokens.matches(TokenKind::Or) {
            let else_jump = self.emit_jump(Op::JumpIfFalse);
            let end_jump = self.emit_jump(Op::Jump);
            self.patch_jump(else_jump)?;
            self.emit_op(Op::Pop);
            self.and(false)?;
            self.patch_jump(end_jump)?;
        }
        Ok(())
    }

    fn and(&mut self, can_assign: bool) -> CompileResult<()> {
        self.equality(can_assign)?;
        while self.tokens.matches(TokenKind::And) {
            let end_jump = self.emit_jump(Op::JumpIfFalse);
            self.emit_op(Op::Pop);
            self.equality(false)?;
            self.patch_jump(end_jump)?;
        }
        Ok(())
    }

    fn equality(&mut self, can_assign: bool) -> CompileResult<()> {
        self.comparison(can_assign)?;
        loop {
            if self.tokens.matches(TokenKind::EqualEqual) {
                self.comparison(false)?;
                self.emit_op(Op::Equal);
            } else if self.tokens.matches(TokenKind::BangEqual) {
                self.comparison(false)?;
                self.emit_op(Op::Equal);
                self.emit_op(Op::Not);
            } else {
                return Ok(());
            }
        }
    }

    fn comparison(&mut self, can_assign: bool) -> CompileResult<()> {
        self.term(can_assign)?;
        loop {
            let kind = self.tokens.peek().kind;
            let ops: &[Op] = match kind {
                TokenKind::Greater => &[Op::Greater],
                TokenKind::GreaterEqual => &[Op::Less, Op::Not],
                TokenKind::Less => &[Op::Less],
                TokenKind::LessEqual => &[Op::Greater, Op::Not],
                _ => return Ok(()),
            };
            self.tokens.advance();
            self.term(false)?;
            for op in ops {
                self.emit_op(*op);
            }
        }
    }

    fn term(&mut self, can_assign: bool) -> CompileResult<()> {
        self.factor(can_assign)?;
        loop {
            let op = match self.tokens.peek().kind {
                TokenKind::Plus => Op::Add,
                TokenKind::Minus => Op::Subtract,
                _ => return Ok(()),
            };
            self.tokens.advance();
            self.factor(false)?;
            self.emit_op(op);
        }
    }

    fn factor(&mut self, can_assign: bool) -> CompileResult<()> {
        self.unary(can_assign)?;
        loop {
            let op = match self.tokens.peek().kind {
                TokenKind::Star => Op::Multiply,
                TokenKind::Slash => Op::Divide,
                _ => return Ok(()),
            };
            self.tokens.advance();
            self.unary(false)?;
            self.emit_op(op);
        }
    }

    fn unary(&mut self, can_assign: bool) -> CompileResult<()> {
        let op = match self.tokens.peek().kind {
            TokenKind::Bang => Op::Not,
            TokenKind::Minus => Op::Negate,
            _ => return self.call(can_assign),
        };
        self.tokens.advance();
        self.nested(NESTED_EXPRESSION, |c| c.unary(false))?;
        self.emit_op(op);
        Ok(())
    }

    fn call(&mut self, can_assign: bool) -> CompileResult<()> {
        self.primary(can_assign)?;
        loop {
            if self.tokens.matches(TokenKind::LeftParen) {
                let argc = self.argument_list()?;
                self.emit_op(Op::Call);
                self.emit_byte(argc);
            } else if self.tokens.matches(TokenKind::Dot) {
                let name = self
                    .tokens
                    .consume(TokenKind::Identifier, "Expect property name after '.'.")?;
                let name = self.identifier_constant(&name.lexeme)?;
                if can_assign && self.tokens.matches(TokenKind::Equal) {
                    self.expression()?;
                    self.emit_op_u16(Op::SetProperty, name);
                } else if self.tokens.matches(TokenKind::LeftParen) {
                    let argc = self.argument_list()?;
                    self.emit_op_u16(Op::Invoke, name);
                    self.emit_byte(argc);
                } else {
                    self.emit_op_u16(Op::GetProperty, name);
                }
            } else {
                return Ok(());
            }
        }
    }

    /// Compile call arguments after the opening paren; returns the count.
    pub(crate) fn argument_list(&mut self) -> CompileResult<u8> {
        let mut argc: usize = 0;
        if !self.tokens.check(TokenKind::RightParen) {
            loop {
                self.expression()?;
                if argc == MAX_ARGS {
                    return Err(self
                        .tokens
                        .error_at_previous("Can't have more than 255 arguments."));
                }
                argc += 1;
                if !self.tokens.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.tokens
            .consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(argc as u8)
    }

    fn primary(&mut self, can_assign: bool) -> CompileResult<()> {
        let token = self.tokens.peek().clone();
        match token.kind {
            TokenKind::False => {
                self.tokens.advance();
                self.emit_op(Op::False);
            }
            TokenKind::True => {
                self.tokens.advance();
                self.emit_op(Op::True);
            }
            TokenKind::Nil => {
                self.tokens.advance();
                self.emit_op(Op::Nil);
            }
            TokenKind::Number => {
                self.tokens.advance();
                let index = self.make_constant(Value::Number(token.as_number()))?;
                self.emit_op_u16(Op::Constant, index);
            }
            TokenKind::String => {
                self.tokens.advance();
                let offset = self.identifier_constant(token.as_str())?;
                self.emit_op_u16(Op::String, offset);
            }
            TokenKind::Identifier => {
                self.tokens.advance();
                self.named_variable(&token.lexeme, can_assign)?;
            }
            TokenKind::LeftParen => {
                self.tokens.advance();
                self.expression()?;
                self.tokens
                    .consume(TokenKind::RightParen, "Expect ')' after expression.")?;
            }
            TokenKind::This => {
                self.tokens.advance();
                self.this_expression()?;
            }
            TokenKind::Super => {
                self.tokens.advance();
                self.super_expression()?;
            }
            _ => return Err(self.tokens.error_at_current("Expect expression.")),
        }
        Ok(())
    }

    /// Emit a get, or a set when followed by `=` in an assignable position.
    pub(crate) fn named_variable(&mut self, name: &str, can_assign: bool) -> CompileResult<()> {
        let (get, set, operand) = match self.resolve_variable(name)? {
            VariableAccess::Local(slot) => (Op::GetLocal, Op::SetLocal, slot),
            VariableAccess::Upvalue(index) => (Op::GetUpvalue, Op::SetUpvalue, index),
            VariableAccess::Global(offset) => (Op::GetGlobal, Op::SetGlobal, offset),
        };

        if can_assign && self.tokens.matches(TokenKind::Equal) {
            self.expression()?;
            self.emit_op_u16(set, operand);
        } else {
            self.emit_op_u16(get, operand);
        }
        Ok(())
    }
}
