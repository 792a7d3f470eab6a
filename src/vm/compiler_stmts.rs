//! Declaration and statement compilation.

use crate::lexer::TokenKind;

use super::compiler::{CompileResult, Compiler, FunctionType};
use super::opcode::Op;

impl Compiler {
    /// Compile one declaration. A failure is reported, then the token stream is
    /// resynchronised to the next statement boundary so later errors surface too.
    pub(crate) fn declaration(&mut self) {
        let depth = self.current().scope_depth;
        let locals = self.current().locals.len();
        let classes = self.classes.len();

        if let Err(err) = self.declaration_inner() {
            self.report(err);
            let state = self.current_mut();
            state.scope_depth = depth;
            state.locals.truncate(locals);
            self.classes.truncate(classes);
            self.tokens.synchronize();
        }
    }

    fn declaration_inner(&mut self) -> CompileResult<()> {
        if self.tokens.matches(TokenKind::Class) {
            self.class_declaration()
        } else if self.tokens.matches(TokenKind::Fun) {
            self.fun_declaration()
        } else if self.tokens.matches(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        }
    }

    fn fun_declaration(&mut self) -> CompileResult<()> {
        let global = self.parse_variable("Expect function name.")?;
        // A function may refer to itself, so it is usable before its body is compiled.
        self.mark_initialized();
        self.function(FunctionType::Function)?;
        self.define_variable(global);
        Ok(())
    }

    fn var_declaration(&mut self) -> CompileResult<()> {
        let global = self.parse_variable("Expect variable name.")?;
        if self.tokens.matches(TokenKind::Equal) {
            self.expression()?;
        } else {
            self.emit_op(Op::Nil);
        }
        self.tokens.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        self.define_variable(global);
        Ok(())
    }

    fn statement(&mut self) -> CompileResult<()> {
        self.nested("Statement nested too deeply.", Self::statement_inner)
    }

    fn statement_inner(&mut self) -> CompileResult<()> {
        if self.tokens.matches(TokenKind::Print) {
            self.print_statement()
        } else if self.tokens.matches(TokenKind::If) {
            self.if_statement()
        } else if self.tokens.matches(TokenKind::Return) {
            self.return_statement()
        } else if self.tokens.matches(TokenKind::While) {
            self.while_statement()
        } else if self.tokens.matches(TokenKind::For) {
            self.for_statement()
        } else if self.tokens.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            let result = self.block();
            self.end_scope();
            result
        } else {
            self.expression_statement()
        }
    }

    /// Compile declarations up to the closing brace.
    pub(crate) fn block(&mut self) -> CompileResult<()> {
        while !self.tokens.check(TokenKind::RightBrace) && !self.tokens.is_at_end() {
            self.declaration();
        }
        self.tokens
            .consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(())
    }

    fn print_statement(&mut self) -> CompileResult<()> {
        self.expression()?;
        self.tokens
            .consume(TokenKind::Semicolon, "Expect ';' after value.")?;
        self.emit_op(Op::Print);
        Ok(())
    }

    fn expression_statement(&mut self) -> CompileResult<()> {
        self.expression()?;
        self.tokens
            .consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        self.emit_op(Op::Pop);
        Ok(())
    }

    fn return_statement(&mut self) -> CompileResult<()> {
        let function_type = self.current().function_type;
        if function_type == FunctionType::Script {
            return Err(self
                .tokens
                .error_at_previous("Can't return from top-level code."));
        }

        if self.tokens.matches(TokenKind::Semicolon) {
            self.emit_return();
            return Ok(());
        }

        if function_type == FunctionType::Initializer {
            return Err(self
                .tokens
                .error_at_previous("Can't return a value from an initializer."));
        }
        self.expression()?;
        self.tokens
            .consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
        self.emit_op(Op::Return);
        Ok(())
    }

    fn if_statement(&mut self) -> CompileResult<()> {
        self.tokens
            .consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        self.expression()?;
        self.tokens
            .consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement()?;

        let else_jump = self.emit_jump(Op::Jump);
        self.patch_jump(then_jump)?;
        self.emit_op(Op::Pop);

        if self.tokens.matches(TokenKind::Else) {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn while_statement(&mut self) -> CompileResult<()> {
        let loop_start = self.current_offset();
        self.tokens
            .consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        self.expression()?;
        self.tokens
            .consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit_op(Op::Pop);
        Ok(())
    }

    /// `for (init; cond; incr) body` lowers onto the same jumps as `while`,
    /// with the increment placed after the body and jumped over on entry.
    fn for_statement(&mut self) -> CompileResult<()> {
        self.begin_scope();
        let result = self.for_clauses();
        self.end_scope();
        result
    }

    fn for_clauses(&mut self) -> CompileResult<()> {
        self.tokens
            .consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;
        if self.tokens.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.tokens.matches(TokenKind::Var) {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.current_offset();
        let mut exit_jump = None;
        if !self.tokens.matches(TokenKind::Semicolon) {
            self.expression()?;
            self.tokens
                .consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse));
            self.emit_op(Op::Pop);
        }

        if !self.tokens.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Op::Jump);
            let increment_start = self.current_offset();
            self.expression()?;
            self.emit_op(Op::Pop);
            self.tokens
                .consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;

            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit_op(Op::Pop);
        }
        Ok(())
    }
}
