//! Class compilation: class declarations, methods, `this` and `super`.

use crate::lexer::TokenKind;

use super::compiler::{ClassState, CompileResult, Compiler, FunctionType};
use super::opcode::Op;

impl Compiler {
    /// `class Name [< Super] { methods }`
    ///
    /// The class name is bound before any method is compiled so methods can
    /// refer to their own class. A superclass is kept in a hidden local named
    /// `super` in a scope around the body, which methods capture as an upvalue.
    pub(crate) fn class_declaration(&mut self) -> CompileResult<()> {
        let name = self
            .tokens
            .consume(TokenKind::Identifier, "Expect class name.")?;
        let name_constant = self.identifier_constant(&name.lexeme)?;
        self.declare_variable()?;

        self.emit_op_u16(Op::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });
        let result = self.class_body(&name.lexeme);
        let class = self.classes.pop();
        result?;

        if class.is_some_and(|c| c.has_superclass) {
            self.end_scope();
        }
        Ok(())
    }

    fn class_body(&mut self, class_name: &str) -> CompileResult<()> {
        if self.tokens.matches(TokenKind::Less) {
            let superclass = self
                .tokens
                .consume(TokenKind::Identifier, "Expect superclass name.")?;
            self.named_variable(&superclass.lexeme, false)?;
            if superclass.lexeme == class_name {
                return Err(self
                    .tokens
                    .error_at_previous("A class can't inherit from itself."));
            }

            self.begin_scope();
            self.add_local("super")?;
            self.define_variable(0);

            self.named_variable(class_name, false)?;
            self.emit_op(Op::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false)?;
        self.tokens
            .consume(TokenKind::LeftBrace, "Expect '{' before class body.")?;
        while !self.tokens.check(TokenKind::RightBrace) && !self.tokens.is_at_end() {
            self.method()?;
        }
        self.tokens
            .consume(TokenKind::RightBrace, "Expect '}' after class body.")?;
        self.emit_op(Op::Pop);
        Ok(())
    }

    fn method(&mut self) -> CompileResult<()> {
        let name = self
            .tokens
            .consume(TokenKind::Identifier, "Expect method name.")?;
        let constant = self.identifier_constant(&name.lexeme)?;
        let function_type = if name.lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type)?;
        self.emit_op_u16(Op::Method, constant);
        Ok(())
    }

    pub(crate) fn this_expression(&mut self) -> CompileResult<()> {
        if self.classes.is_empty() {
            return Err(self
                .tokens
                .error_at_previous("Can't use 'this' outside of a class."));
        }
        self.named_variable("this", false)
    }

    /// `super.name` binds the superclass method to `this`; `super.name(args)`
    /// compiles to a single fused super invocation.
    pub(crate) fn super_expression(&mut self) -> CompileResult<()> {
        match self.classes.last() {
            None => {
                return Err(self
                    .tokens
                    .error_at_previous("Can't use 'super' outside of a class."))
            }
            Some(class) if !class.has_superclass => {
                return Err(self
                    .tokens
                    .error_at_previous("Can't use 'super' in a class with no superclass."))
            }
            Some(_) => {}
        }

        self.tokens
            .consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
        let name = self
            .tokens
            .consume(TokenKind::Identifier, "Expect superclass method name.")?;
        let name = self.identifier_constant(&name.lexeme)?;

        self.named_variable("this", false)?;
        if self.tokens.matches(TokenKind::LeftParen) {
            let argc = self.argument_list()?;
            self.named_variable("super", false)?;
            self.emit_op_u16(Op::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false)?;
            self.emit_op_u16(Op::GetSuper, name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::tests::{compile_errors, run_captured};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_class_can_reference_itself_in_methods() {
        let out = run_captured(
            "class Node { make() { return Node(); } } print Node().make();",
        );
        assert_eq!(out, vec!["<Node instance>"]);
    }

    #[test]
    fn test_this_outside_class() {
        let errs = compile_errors("print this;");
        assert_eq!(errs, vec!["Can't use 'this' outside of a class.".to_string()]);
        let errs = compile_errors("fun f() { return this; }");
        assert_eq!(errs, vec!["Can't use 'this' outside of a class.".to_string()]);
    }

    #[test]
    fn test_super_errors() {
        let errs = compile_errors("print super.x;");
        assert_eq!(errs, vec!["Can't use 'super' outside of a class.".to_string()]);
        let errs = compile_errors("class A { m() { super.m(); } }");
        assert_eq!(
            errs,
            vec!["Can't use 'super' in a class with no superclass.".to_string()]
        );
        let errs = compile_errors("class A < A {}");
        assert_eq!(errs, vec!["A class can't inherit from itself.".to_string()]);
    }

    #[test]
    fn test_class_body_only_holds_methods() {
        let errs = compile_errors("class A { var x = 1; }");
        assert!(errs.iter().any(|e| e == "Expect method name."));
    }
}
