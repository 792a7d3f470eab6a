//! Token-to-bytecode compiler.
//!
//! Single pass: recursive descent over the token stream, emitting bytecode as
//! each construct is recognised. There is no AST. Variable resolution happens
//! at compile time: locals become stack slot indices, captured variables become
//! upvalue indices, everything else is a named global.

use std::rc::Rc;

use crate::error::{CompileError, CompileErrors};
use crate::lexer::{Token, TokenKind, TokenStream};

use super::chunk::{Chunk, FunctionProto, MAX_CONSTANTS};
use super::opcode::Op;
use super::upvalue::UpvalueDescriptor;
use super::value::Value;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;
pub const MAX_ARGS: usize = 255;
/// Deepest expression or block nesting the recursive descent will follow.
pub const MAX_NESTING: usize = 200;

/// A local variable tracked during compilation.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    /// Scope depth, or -1 while the initializer is being compiled.
    pub depth: i32,
    pub is_captured: bool,
}

/// Tracks what kind of function is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

/// Per-function compilation state. The compiler keeps a stack of these, one
/// per function body currently open, innermost last.
#[derive(Debug)]
pub struct FunctionState {
    pub proto: FunctionProto,
    pub function_type: FunctionType,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueDescriptor>,
    pub scope_depth: i32,
}

impl FunctionState {
    pub fn new(function_type: FunctionType, name: &str) -> Self {
        // Slot 0 holds the callee, or the receiver in methods.
        let slot_name = match function_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Script | FunctionType::Function => "",
        };
        Self {
            proto: FunctionProto::new(name),
            function_type,
            locals: vec![Local {
                name: slot_name.to_string(),
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }

    /// Slot of the innermost local named `name`.
    pub fn resolve_local(&self, name: &str) -> Result<Option<u16>, &'static str> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Cannot read local variable in its own initializer.");
                }
                return Ok(Some(i as u16));
            }
        }
        Ok(None)
    }

    /// Register an upvalue, reusing an identical descriptor if one exists.
    pub fn add_upvalue(&mut self, index: u16, is_local: bool) -> Result<u16, &'static str> {
        for (i, uv) in self.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return Ok(i as u16);
            }
        }
        if self.upvalues.len() == MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(UpvalueDescriptor { is_local, index });
        Ok((self.upvalues.len() - 1) as u16)
    }

    pub fn finish(mut self) -> FunctionProto {
        self.proto.upvalue_descriptors = self.upvalues;
        self.proto
    }
}

/// Resolve `name` as an upvalue of `states[depth]` by walking outward.
///
/// A hit on an enclosing local marks it captured and threads a local capture
/// into the next function in. A hit on an enclosing upvalue threads that
/// upvalue through instead. `None` means the name is a global.
pub fn resolve_upvalue(
    states: &mut [FunctionState],
    depth: usize,
    name: &str,
) -> Result<Option<u16>, &'static str> {
    if depth == 0 {
        return Ok(None);
    }
    let enclosing = depth - 1;

    if let Some(slot) = states[enclosing].resolve_local(name)? {
        states[enclosing].locals[slot as usize].is_captured = true;
        return states[depth].add_upvalue(slot, true).map(Some);
    }

    if let Some(index) = resolve_upvalue(states, enclosing, name)? {
        return states[depth].add_upvalue(index, false).map(Some);
    }

    Ok(None)
}

/// How a variable is accessed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableAccess {
    Local(u16),
    Upvalue(u16),
    /// String-table offset of the name.
    Global(u16),
}

#[derive(Debug, Clone, Copy)]
pub struct ClassState {
    pub has_superclass: bool,
}

/// The compiler: transforms tokens into bytecode.
pub struct Compiler {
    pub(crate) tokens: TokenStream,
    pub(crate) states: Vec<FunctionState>,
    pub(crate) classes: Vec<ClassState>,
    errors: Vec<CompileError>,
    depth: usize,
}

impl Compiler {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: TokenStream::new(tokens),
            states: vec![FunctionState::new(FunctionType::Script, "")],
            classes: Vec::new(),
            errors: Vec::new(),
            depth: 0,
        }
    }

    /// Compile a full program into its top-level function.
    pub fn compile(tokens: Vec<Token>) -> Result<Rc<FunctionProto>, CompileErrors> {
        let mut compiler = Compiler::new(tokens);
        while !compiler.tokens.is_at_end() {
            compiler.declaration();
        }
        compiler.emit_return();

        if !compiler.errors.is_empty() {
            return Err(CompileErrors(compiler.errors));
        }
        match compiler.states.pop() {
            Some(script) => Ok(Rc::new(script.finish())),
            None => Err(CompileErrors(vec![compiler
                .tokens
                .error_at_current("Compiler state stack is empty.")])),
        }
    }

    /// Record a diagnostic and continue.
    pub(crate) fn report(&mut self, err: CompileError) {
        tracing::debug!(line = err.span.line, lexeme = %err.lexeme, "{}", err.message);
        self.errors.push(err);
    }

    /// Run `compile` one nesting level deeper, failing with `message` once
    /// the nesting limit is reached.
    pub(crate) fn nested<T>(
        &mut self,
        message: &str,
        compile: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.tokens.error_at_current(message));
        }
        self.depth += 1;
        let result = compile(self);
        self.depth -= 1;
        result
    }

    // --- State access ---

    pub(crate) fn current(&self) -> &FunctionState {
        &self.states[self.states.len() - 1]
    }

    pub(crate) fn current_mut(&mut self) -> &mut FunctionState {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    pub(crate) fn chunk(&mut self) -> &mut Chunk {
        &mut self.current_mut().proto.chunk
    }

    // --- Chunk helpers ---

    pub(crate) fn emit_byte(&mut self, byte: u8) -> usize {
        let line = self.tokens.previous().span.line;
        self.chunk().write_instruction(byte, line)
    }

    pub(crate) fn emit_op(&mut self, op: Op) -> usize {
        self.emit_byte(op.into())
    }

    pub(crate) fn emit_u16(&mut self, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    pub(crate) fn emit_op_u16(&mut self, op: Op, operand: u16) {
        self.emit_op(op);
        self.emit_u16(operand);
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.current().proto.chunk.len()
    }

    /// Emit a jump with a placeholder offset; returns the operand's position.
    pub(crate) fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_offset() - 2
    }

    pub(crate) fn patch_jump(&mut self, offset: usize) -> CompileResult<()> {
        let jump = self.current_offset() - offset - 2;
        if jump > u16::MAX as usize {
            return Err(self.tokens.error_at_previous("Too much code to jump over."));
        }
        let [hi, lo] = (jump as u16).to_be_bytes();
        self.chunk().write_at(offset, hi);
        self.chunk().write_at(offset + 1, lo);
        Ok(())
    }

    pub(crate) fn emit_loop(&mut self, loop_start: usize) -> CompileResult<()> {
        self.emit_op(Op::Loop);
        let offset = self.current_offset() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(self.tokens.error_at_previous("Loop body too large."));
        }
        self.emit_u16(offset as u16);
        Ok(())
    }

    pub(crate) fn emit_return(&mut self) {
        if self.current().function_type == FunctionType::Initializer {
            self.emit_op_u16(Op::GetLocal, 0);
        } else {
            self.emit_op(Op::Nil);
        }
        self.emit_op(Op::Return);
    }

    pub(crate) fn make_constant(&mut self, value: Value) -> CompileResult<u16> {
        let index = self.chunk().write_constant_value(value);
        if index > MAX_CONSTANTS {
            return Err(self.tokens.error_at_previous("Too many constants in one chunk."));
        }
        Ok(index as u16)
    }

    pub(crate) fn identifier_constant(&mut self, name: &str) -> CompileResult<u16> {
        let Some(offset) = self.chunk().write_constant_string(name) else {
            return Err(self
                .tokens
                .error_at_previous("String constant contains a NUL byte."));
        };
        if offset > u16::MAX as usize {
            return Err(self.tokens.error_at_previous("Too many constants in one chunk."));
        }
        Ok(offset as u16)
    }

    // --- Scope management ---

    pub(crate) fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        self.current_mut().scope_depth -= 1;
        loop {
            let state = self.current();
            let captured = match state.locals.last() {
                Some(local) if local.depth > state.scope_depth => local.is_captured,
                _ => break,
            };
            self.emit_op(if captured { Op::CloseUpvalue } else { Op::Pop });
            self.current_mut().locals.pop();
        }
    }

    // --- Local variables ---

    pub(crate) fn add_local(&mut self, name: &str) -> CompileResult<()> {
        if self.current().locals.len() == MAX_LOCALS {
            return Err(self
                .tokens
                .error_at_previous("Too many local variables in function."));
        }
        self.current_mut().locals.push(Local {
            name: name.to_string(),
            depth: -1,
            is_captured: false,
        });
        Ok(())
    }

    /// Declare the identifier just consumed as a local of the current scope.
    pub(crate) fn declare_variable(&mut self) -> CompileResult<()> {
        if self.current().scope_depth == 0 {
            return Ok(());
        }
        let name = self.tokens.previous().lexeme.clone();
        let state = self.current();
        for local in state.locals.iter().rev() {
            if local.depth != -1 && local.depth < state.scope_depth {
                break;
            }
            if local.name == name {
                return Err(self
                    .tokens
                    .error_at_previous("Cannot redefine a local variable in the same scope."));
            }
        }
        self.add_local(&name)
    }

    /// Consume an identifier and declare it. Returns the name's string offset
    /// for globals, 0 for locals.
    pub(crate) fn parse_variable(&mut self, message: &str) -> CompileResult<u16> {
        let name = self.tokens.consume(TokenKind::Identifier, message)?;
        self.declare_variable()?;
        if self.current().scope_depth > 0 {
            return Ok(0);
        }
        self.identifier_constant(&name.lexeme)
    }

    pub(crate) fn mark_initialized(&mut self) {
        let state = self.current_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = depth;
        }
    }

    pub(crate) fn define_variable(&mut self, global: u16) {
        if self.current().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_u16(Op::DefineGlobal, global);
    }

    /// Resolve a name to a local slot, an upvalue, or a global.
    pub(crate) fn resolve_variable(&mut self, name: &str) -> CompileResult<VariableAccess> {
        let depth = self.states.len() - 1;
        let local = self.states[depth]
            .resolve_local(name)
            .map_err(|msg| self.tokens.error_at_previous(msg))?;
        if let Some(slot) = local {
            return Ok(VariableAccess::Local(slot));
        }
        let upvalue = resolve_upvalue(&mut self.states, depth, name)
            .map_err(|msg| self.tokens.error_at_previous(msg))?;
        if let Some(index) = upvalue {
            return Ok(VariableAccess::Upvalue(index));
        }
        Ok(VariableAccess::Global(self.identifier_constant(name)?))
    }

    // --- Functions ---

    /// Compile a parameter list and body into a new function, then emit the
    /// function object and the closure that captures its upvalues.
    pub(crate) fn function(&mut self, function_type: FunctionType) -> CompileResult<()> {
        let name = self.tokens.previous().lexeme.clone();
        self.states.push(FunctionState::new(function_type, &name));
        let body = self.nested("Function nested too deeply.", Self::function_body);
        let state = self.states.pop();
        body?;

        let Some(state) = state else {
            return Err(self.tokens.error_at_previous("Compiler state stack is empty."));
        };
        let upvalues = state.upvalues.clone();
        let proto = state.finish();

        let index = self.chunk().add_function(Rc::new(proto));
        if index > u16::MAX as usize {
            return Err(self.tokens.error_at_previous("Too many functions in one chunk."));
        }
        self.emit_op_u16(Op::Function, index as u16);
        self.emit_op_u16(Op::Closure, upvalues.len() as u16);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_u16(upvalue.index);
        }
        Ok(())
    }

    fn function_body(&mut self) -> CompileResult<()> {
        self.begin_scope();
        self.tokens
            .consume(TokenKind::LeftParen, "Expect '(' after function name.")?;
        if !self.tokens.check(TokenKind::RightParen) {
            loop {
                if self.current().proto.arity as usize == MAX_ARGS {
                    return Err(self
                        .tokens
                        .error_at_current("Can't have more than 255 parameters."));
                }
                self.current_mut().proto.arity += 1;
                let constant = self.parse_variable("Expect parameter name.")?;
                self.define_variable(constant);
                if !self.tokens.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.tokens
            .consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.tokens
            .consume(TokenKind::LeftBrace, "Expect '{' before function body.")?;
        self.block()?;
        self.emit_return();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::vm::disassembler::disassemble;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Result<Rc<FunctionProto>, CompileErrors> {
        Compiler::compile(Scanner::new(source).scan_tokens().unwrap())
    }

    fn ops(proto: &FunctionProto) -> Vec<Op> {
        let mut ops = Vec::new();
        let code = &proto.chunk.code;
        let mut offset = 0;
        while offset < code.len() {
            let op = Op::try_from(code[offset]).unwrap();
            ops.push(op);
            offset += 1 + match op {
                Op::Call => 1,
                Op::Invoke | Op::SuperInvoke => 3,
                Op::Closure => {
                    let count = proto.chunk.read_u16(offset + 1).unwrap() as usize;
                    2 + count * 3
                }
                Op::Constant
                | Op::String
                | Op::Function
                | Op::GetLocal
                | Op::SetLocal
                | Op::GetGlobal
                | Op::DefineGlobal
                | Op::SetGlobal
                | Op::GetUpvalue
                | Op::SetUpvalue
                | Op::GetProperty
                | Op::SetProperty
                | Op::GetSuper
                | Op::Jump
                | Op::JumpIfFalse
                | Op::Loop
                | Op::Class
                | Op::Method => 2,
                _ => 0,
            };
        }
        ops
    }

    #[test]
    fn test_resolve_upvalue_threads_through_nesting() {
        let mut states = vec![
            FunctionState::new(FunctionType::Script, ""),
            FunctionState::new(FunctionType::Function, "outer"),
            FunctionState::new(FunctionType::Function, "middle"),
            FunctionState::new(FunctionType::Function, "inner"),
        ];
        states[1].locals.push(Local {
            name: "x".to_string(),
            depth: 1,
            is_captured: false,
        });

        let index = resolve_upvalue(&mut states, 3, "x").unwrap();
        assert_eq!(index, Some(0));
        assert!(states[1].locals[1].is_captured);
        assert_eq!(
            states[2].upvalues,
            vec![UpvalueDescriptor {
                is_local: true,
                index: 1
            }]
        );
        assert_eq!(
            states[3].upvalues,
            vec![UpvalueDescriptor {
                is_local: false,
                index: 0
            }]
        );
    }

    #[test]
    fn test_resolve_upvalue_misses_fall_back_to_global() {
        let mut states = vec![
            FunctionState::new(FunctionType::Script, ""),
            FunctionState::new(FunctionType::Function, "f"),
        ];
        assert_eq!(resolve_upvalue(&mut states, 1, "nope").unwrap(), None);
        assert!(states[1].upvalues.is_empty());
    }

    #[test]
    fn test_upvalue_dedup() {
        let mut state = FunctionState::new(FunctionType::Function, "f");
        assert_eq!(state.add_upvalue(3, true), Ok(0));
        assert_eq!(state.add_upvalue(3, false), Ok(1));
        assert_eq!(state.add_upvalue(3, true), Ok(0));
    }

    #[test]
    fn test_method_slot_zero_is_this() {
        let state = FunctionState::new(FunctionType::Method, "m");
        assert_eq!(state.locals[0].name, "this");
        let state = FunctionState::new(FunctionType::Function, "f");
        assert_eq!(state.locals[0].name, "");
    }

    #[test]
    fn test_comparison_lowering() {
        let proto = compile("print 1 >= 2; print 1 <= 2; print 1 != 2;").unwrap();
        assert_eq!(
            ops(&proto),
            vec![
                Op::Constant,
                Op::Constant,
                Op::Less,
                Op::Not,
                Op::Print,
                Op::Constant,
                Op::Constant,
                Op::Greater,
                Op::Not,
                Op::Print,
                Op::Constant,
                Op::Constant,
                Op::Equal,
                Op::Not,
                Op::Print,
                Op::Nil,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_and_or_use_jumps() {
        let proto = compile("print true and false;").unwrap();
        assert_eq!(
            ops(&proto),
            vec![
                Op::True,
                Op::JumpIfFalse,
                Op::Pop,
                Op::False,
                Op::Print,
                Op::Nil,
                Op::Return
            ]
        );
        let proto = compile("print true or false;").unwrap();
        assert_eq!(
            ops(&proto),
            vec![
                Op::True,
                Op::JumpIfFalse,
                Op::Jump,
                Op::Pop,
                Op::False,
                Op::Print,
                Op::Nil,
                Op::Return
            ]
        );
    }

    #[test]
    fn test_jump_is_patched_big_endian() {
        let proto = compile("if (true) print 1;").unwrap();
        let code = &proto.chunk.code;
        assert_eq!(code[1], Op::JumpIfFalse as u8);
        // POP CONSTANT(3) PRINT JUMP(3) = 8 bytes to skip.
        assert_eq!(proto.chunk.read_u16(2), Some(8));
    }

    #[test]
    fn test_captured_local_is_closed_on_scope_exit() {
        let proto = compile("{ var a = 1; fun f() { return a; } }").unwrap();
        let ops = ops(&proto);
        assert!(ops.contains(&Op::CloseUpvalue));
        assert_eq!(proto.chunk.functions[0].upvalue_descriptors.len(), 1);
    }

    #[test]
    fn test_every_function_gets_a_closure() {
        let proto = compile("fun f() {}").unwrap();
        assert_eq!(
            ops(&proto),
            vec![Op::Function, Op::Closure, Op::DefineGlobal, Op::Nil, Op::Return]
        );
        assert!(disassemble(&proto).contains("== f (arity=0, upvalues=0) =="));
    }

    #[test]
    fn test_local_self_initializer_rejected() {
        let errs = compile("{ var x = x; }").unwrap_err();
        assert!(errs.contains("Cannot read local variable in its own initializer."));
    }

    #[test]
    fn test_redeclare_in_same_scope_rejected() {
        let errs = compile("{ var x = 1; var x = 2; }").unwrap_err();
        assert!(errs.contains("Cannot redefine a local variable in the same scope."));
        assert!(compile("{ var x = 1; { var x = 2; } }").is_ok());
        assert!(compile("var x = 1; var x = 2;").is_ok());
    }

    #[test]
    fn test_multiple_errors_in_one_pass() {
        let errs = compile("var = 1;\nprint 1 +;\nvar ok = 3;\nreturn 1;").unwrap_err();
        assert_eq!(errs.len(), 3);
        assert!(errs.contains("Expect variable name."));
        assert!(errs.contains("Expect expression."));
        assert!(errs.contains("Can't return from top-level code."));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let errs = compile("var a = 1; var b = 2; a + b = 3;").unwrap_err();
        assert!(errs.contains("Invalid assignment target."));
    }

    #[test]
    fn test_too_many_arguments() {
        let args = vec!["1"; 256].join(", ");
        let errs = compile(&format!("fun f() {{}} f({});", args)).unwrap_err();
        assert!(errs.contains("Can't have more than 255 arguments."));
    }

    #[test]
    fn test_too_many_parameters() {
        let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
        let errs = compile(&format!("fun f({}) {{}}", params.join(", "))).unwrap_err();
        assert!(errs.contains("Can't have more than 255 parameters."));
    }

    #[test]
    fn test_too_many_locals() {
        let body: String = (0..256).map(|i| format!("var v{} = nil; ", i)).collect();
        let errs = compile(&format!("fun f() {{ {} }}", body)).unwrap_err();
        assert!(errs.contains("Too many local variables in function."));
    }

    #[test]
    fn test_too_many_constants() {
        let body: String = (0..=MAX_CONSTANTS + 1)
            .map(|i| format!("{};", i))
            .collect();
        let errs = compile(&body).unwrap_err();
        assert!(errs.contains("Too many constants in one chunk."));
    }

    #[test]
    fn test_jump_too_large() {
        let body = "x = 1;".repeat(11000);
        let errs = compile(&format!("var x; if (true) {{ {} }}", body)).unwrap_err();
        assert!(errs.contains("Too much code to jump over."));
        let errs = compile(&format!("var x; while (true) {{ {} }}", body)).unwrap_err();
        assert!(errs.contains("Loop body too large."));
    }
}
