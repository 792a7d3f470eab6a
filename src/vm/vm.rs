//! The bytecode VM: stack-based execution engine.

use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{GearsError, RuntimeError};
use crate::interop::HostRegistry;
use crate::lexer::Scanner;
use crate::span::Span;

use super::chunk::FunctionProto;
use super::compiler::Compiler;
use super::config::VmConfig;
use super::disassembler::disassemble_instruction;
use super::heap::{Class, Heap, NativeFunction, Object};
use super::opcode::Op;
use super::upvalue::Closure;
use super::value::{ObjPtr, Table, Value};

/// A call frame on the VM call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// The function whose chunk is executing.
    pub function: Rc<FunctionProto>,
    /// The closure being executed; `None` for a bare function such as the script.
    pub closure: Option<ObjPtr>,
    /// Instruction pointer (byte offset into the chunk's code).
    pub ip: usize,
    /// Base index into the value stack for this frame's locals.
    pub stack_base: usize,
}

/// Whether the dispatch loop keeps going after an instruction.
enum Flow {
    Continue,
    Halt,
}

/// The bytecode VM.
pub struct Vm {
    /// Value stack.
    pub stack: Vec<Value>,
    /// Call frame stack. The last frame is the open one.
    pub frames: Vec<CallFrame>,
    /// Global variables.
    pub globals: Table,
    /// Head of the open-upvalue list, ordered by descending stack slot.
    pub open_upvalues: Option<ObjPtr>,
    pub heap: Heap,
    pub hosts: HostRegistry,
    pub config: VmConfig,
    /// Output buffer for print statements when `capture_output` is set.
    pub output: Vec<String>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(config.initial_stack_capacity),
            frames: Vec::with_capacity(64),
            globals: Table::default(),
            open_upvalues: None,
            heap: Heap::new(),
            hosts: HostRegistry::new(),
            config,
            output: Vec::new(),
        };
        vm.define_native("clock", Some(0), |_, _| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| Value::Number(d.as_secs_f64()))
                .map_err(|e| RuntimeError::new(e.to_string(), Span::default()))
        });
        vm
    }

    /// Bind a host function as a global.
    pub fn define_native<F>(&mut self, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&mut Heap, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        let native = self
            .heap
            .alloc(Object::Native(NativeFunction::new(name, arity, func)));
        self.globals.insert(name.to_string(), Value::Object(native));
    }

    /// Compile and run source against this VM's globals and heap.
    pub fn interpret_source(&mut self, source: &str) -> Result<(), GearsError> {
        let tokens = Scanner::new(source).scan_tokens()?;
        let function = Compiler::compile(tokens)?;
        self.interpret(function)?;
        Ok(())
    }

    /// Execute a compiled top-level function to completion.
    ///
    /// Globals and heap persist across calls; the stacks are reset after a
    /// runtime error so the VM stays usable.
    pub fn interpret(&mut self, function: Rc<FunctionProto>) -> Result<(), RuntimeError> {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;

        let script = self.heap.alloc(Object::Function(function.clone()));
        self.push(Value::Object(script));
        let result = self
            .call_function(function, None, 0, Span::default())
            .and_then(|_| self.run());

        if let Err(err) = &result {
            tracing::debug!(error = %err, frames = self.frames.len(), "runtime error");
            self.stack.clear();
            self.frames.clear();
            self.open_upvalues = None;
        }
        result
    }

    /// Run the dispatch loop until the outermost frame returns.
    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let frame_idx = self.frames.len() - 1;
            let frame = &self.frames[frame_idx];
            let line = frame.function.chunk.line_at(frame.ip);
            let span = Span::at_line(line);

            if self.config.trace_execution {
                self.trace_instruction(frame_idx);
            }

            match self.step(frame_idx, span) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(err) if err.span().line == 0 => return Err(err.with_span(span)),
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch, decode and execute one instruction.
    fn step(&mut self, frame_idx: usize, span: Span) -> Result<Flow, RuntimeError> {
        let byte = self.read_byte(frame_idx)?;
        let op = Op::try_from(byte)
            .map_err(|b| RuntimeError::new(format!("Unknown opcode 0x{:02x}.", b), span))?;

        match op {
            Op::Constant => {
                let index = self.read_u16(frame_idx)?;
                let value = self.frames[frame_idx]
                    .function
                    .chunk
                    .read_constant_value(index as usize)
                    .ok_or_else(|| {
                        RuntimeError::invalid_heap_access(
                            format!("constant {} out of range", index),
                            span,
                        )
                    })?;
                self.push(value);
            }
            Op::String => {
                let text = self.read_string(frame_idx)?;
                let value = self.heap.alloc_string(text);
                self.push(value);
            }
            Op::Function => {
                let index = self.read_u16(frame_idx)?;
                let function = self.frames[frame_idx]
                    .function
                    .chunk
                    .functions
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| {
                        RuntimeError::invalid_heap_access(
                            format!("function {} out of range", index),
                            span,
                        )
                    })?;
                let ptr = self.heap.alloc(Object::Function(function));
                self.push(Value::Object(ptr));
            }
            Op::Nil => self.push(Value::Nil),
            Op::True => self.push(Value::Bool(true)),
            Op::False => self.push(Value::Bool(false)),

            Op::Pop => {
                self.pop()?;
            }

            Op::GetLocal => {
                let slot = self.frames[frame_idx].stack_base + self.read_u16(frame_idx)? as usize;
                let value = self.stack_slot(slot)?;
                self.push(value);
            }
            Op::SetLocal => {
                let slot = self.frames[frame_idx].stack_base + self.read_u16(frame_idx)? as usize;
                let value = self.peek(0)?;
                match self.stack.get_mut(slot) {
                    Some(target) => *target = value,
                    None => return Err(RuntimeError::StackUnderflow(span)),
                }
            }
            Op::GetGlobal => {
                let name = self.read_string(frame_idx)?;
                match self.globals.get(&name) {
                    Some(value) => {
                        let value = *value;
                        self.push(value);
                    }
                    None => return Err(RuntimeError::undefined_variable(name, span)),
                }
            }
            Op::DefineGlobal => {
                let name = self.read_string(frame_idx)?;
                let value = self.peek(0)?;
                self.globals.insert(name, value);
                self.pop()?;
            }
            Op::SetGlobal => {
                let name = self.read_string(frame_idx)?;
                let value = self.peek(0)?;
                match self.globals.get_mut(&name) {
                    Some(slot) => *slot = value,
                    None => return Err(RuntimeError::undefined_variable(name, span)),
                }
            }
            Op::GetUpvalue => {
                let index = self.read_u16(frame_idx)?;
                let upvalue = self.frame_upvalue(frame_idx, index)?;
                let value = self.read_upvalue(upvalue)?;
                self.push(value);
            }
            Op::SetUpvalue => {
                let index = self.read_u16(frame_idx)?;
                let upvalue = self.frame_upvalue(frame_idx, index)?;
                let value = self.peek(0)?;
                self.write_upvalue(upvalue, value)?;
            }

            Op::GetProperty => {
                let name = self.read_string(frame_idx)?;
                self.get_property(&name, span)?;
            }
            Op::SetProperty => {
                let name = self.read_string(frame_idx)?;
                self.set_property(&name, span)?;
            }
            Op::GetSuper => {
                let name = self.read_string(frame_idx)?;
                let superclass = self.pop_class(span)?;
                self.bind_method(superclass, &name, span)?;
            }

            // --- Comparison ---
            Op::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a.equals(&b)));
            }
            Op::Greater => {
                let (a, b) = self.pop_numbers(span)?;
                self.push(Value::Bool(a > b));
            }
            Op::Less => {
                let (a, b) = self.pop_numbers(span)?;
                self.push(Value::Bool(a < b));
            }

            // --- Arithmetic ---
            Op::Add => self.op_add(span)?,
            Op::Subtract => {
                let (a, b) = self.pop_numbers(span)?;
                self.push(Value::Number(a - b));
            }
            Op::Multiply => {
                let (a, b) = self.pop_numbers(span)?;
                self.push(Value::Number(a * b));
            }
            Op::Divide => {
                let (a, b) = self.pop_numbers(span)?;
                self.push(Value::Number(a / b));
            }
            Op::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(value.is_falsey()));
            }
            Op::Negate => match self.pop()? {
                Value::Number(n) => self.push(Value::Number(-n)),
                _ => return Err(RuntimeError::type_error("Operand must be a number.", span)),
            },

            Op::Print => {
                let value = self.pop()?;
                let text = self.heap.render(value);
                if self.config.capture_output {
                    self.output.push(text);
                } else {
                    println!("{}", text);
                }
            }

            // --- Control flow ---
            Op::Jump => {
                let offset = self.read_u16(frame_idx)?;
                self.frames[frame_idx].ip += offset as usize;
            }
            Op::JumpIfFalse => {
                let offset = self.read_u16(frame_idx)?;
                if self.peek(0)?.is_falsey() {
                    self.frames[frame_idx].ip += offset as usize;
                }
            }
            Op::Loop => {
                let offset = self.read_u16(frame_idx)?;
                let frame = &mut self.frames[frame_idx];
                frame.ip = frame.ip.checked_sub(offset as usize).ok_or_else(|| {
                    RuntimeError::new("Loop target before start of chunk.", span)
                })?;
            }

            // --- Functions ---
            Op::Call => {
                let argc = self.read_byte(frame_idx)? as usize;
                let callee = self.peek(argc)?;
                self.call_value(callee, argc, span)?;
            }
            Op::Invoke => {
                let name = self.read_string(frame_idx)?;
                let argc = self.read_byte(frame_idx)? as usize;
                self.invoke(&name, argc, span)?;
            }
            Op::SuperInvoke => {
                let name = self.read_string(frame_idx)?;
                let argc = self.read_byte(frame_idx)? as usize;
                let superclass = self.pop_class(span)?;
                self.invoke_from_class(superclass, &name, argc, span)?;
            }
            Op::Closure => self.op_closure(frame_idx, span)?,
            Op::CloseUpvalue => {
                let top = self.stack.len().checked_sub(1).ok_or(RuntimeError::StackUnderflow(span))?;
                self.close_upvalues(top)?;
                self.pop()?;
            }
            Op::Return => {
                let result = self.pop()?;
                let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow(span))?;
                self.close_upvalues(frame.stack_base)?;
                self.stack.truncate(frame.stack_base);
                if self.frames.is_empty() {
                    return Ok(Flow::Halt);
                }
                self.push(result);
            }

            // --- Classes ---
            Op::Class => {
                let name = self.read_string(frame_idx)?;
                let class = self.heap.alloc(Object::Class(Class::new(name)));
                self.push(Value::Object(class));
            }
            Op::Inherit => self.op_inherit(span)?,
            Op::Method => {
                let name = self.read_string(frame_idx)?;
                self.op_method(name, span)?;
            }
        }

        Ok(Flow::Continue)
    }

    // --- Stack ---

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow(Span::default()))
    }

    /// The value `distance` slots below the top.
    pub fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|i| self.stack.get(i))
            .copied()
            .ok_or(RuntimeError::StackUnderflow(Span::default()))
    }

    fn stack_slot(&self, slot: usize) -> Result<Value, RuntimeError> {
        self.stack
            .get(slot)
            .copied()
            .ok_or(RuntimeError::StackUnderflow(Span::default()))
    }

    fn pop_numbers(&mut self, span: Span) -> Result<(f64, f64), RuntimeError> {
        match (self.peek(1)?, self.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop()?;
                self.pop()?;
                Ok((a, b))
            }
            _ => Err(RuntimeError::type_error("Operands must be numbers.", span)),
        }
    }

    fn op_add(&mut self, span: Span) -> Result<(), RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        let result = match (a, b) {
            (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
            _ => match (self.heap.as_str(a), self.heap.as_str(b)) {
                (Some(x), Some(y)) => {
                    let joined = format!("{}{}", x, y);
                    self.heap.alloc_string(joined)
                }
                _ => {
                    return Err(RuntimeError::type_error(
                        "Operands must be two numbers or two strings.",
                        span,
                    ))
                }
            },
        };
        self.pop()?;
        self.pop()?;
        self.push(result);
        Ok(())
    }

    fn op_closure(&mut self, frame_idx: usize, span: Span) -> Result<(), RuntimeError> {
        let count = self.read_u16(frame_idx)? as usize;
        let function = match self.pop()? {
            Value::Object(ptr) => match self.heap.get(ptr)? {
                Object::Function(function) => function.clone(),
                other => {
                    return Err(RuntimeError::type_error(
                        format!("Cannot close over a {}.", other.kind()),
                        span,
                    ))
                }
            },
            other => {
                return Err(RuntimeError::type_error(
                    format!("Cannot close over a {}.", other.type_name()),
                    span,
                ))
            }
        };

        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = self.read_byte(frame_idx)? == 1;
            let index = self.read_u16(frame_idx)?;
            let upvalue = if is_local {
                let slot = self.frames[frame_idx].stack_base + index as usize;
                self.capture_upvalue(slot)?
            } else {
                self.frame_upvalue(frame_idx, index)?
            };
            upvalues.push(upvalue);
        }

        let closure = self
            .heap
            .alloc(Object::Closure(Closure::new(function, upvalues)));
        self.push(Value::Object(closure));
        Ok(())
    }

    // --- Instruction stream ---

    fn read_byte(&mut self, frame_idx: usize) -> Result<u8, RuntimeError> {
        let frame = &mut self.frames[frame_idx];
        let byte = frame.function.chunk.code.get(frame.ip).copied().ok_or_else(|| {
            RuntimeError::new(
                format!("Instruction pointer {} ran off the chunk.", frame.ip),
                Span::default(),
            )
        })?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self, frame_idx: usize) -> Result<u16, RuntimeError> {
        let hi = self.read_byte(frame_idx)?;
        let lo = self.read_byte(frame_idx)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Read a u16 string-table operand and return the string it addresses.
    fn read_string(&mut self, frame_idx: usize) -> Result<String, RuntimeError> {
        let offset = self.read_u16(frame_idx)?;
        self.frames[frame_idx]
            .function
            .chunk
            .read_constant_string(offset as usize)
            .map(str::to_string)
            .ok_or_else(|| {
                RuntimeError::invalid_heap_access(
                    format!("no string at table offset {}", offset),
                    Span::default(),
                )
            })
    }

    fn frame_upvalue(&self, frame_idx: usize, index: u16) -> Result<ObjPtr, RuntimeError> {
        let closure = self.frames[frame_idx].closure.ok_or_else(|| {
            RuntimeError::invalid_heap_access("frame has no closure", Span::default())
        })?;
        self.heap
            .closure(closure)?
            .upvalues
            .get(index as usize)
            .copied()
            .ok_or_else(|| {
                RuntimeError::invalid_heap_access(
                    format!("upvalue {} out of range", index),
                    Span::default(),
                )
            })
    }

    fn trace_instruction(&self, frame_idx: usize) {
        let frame = &self.frames[frame_idx];
        let (text, _) = disassemble_instruction(&frame.function.chunk, frame.ip);
        let stack: Vec<String> = self
            .stack
            .iter()
            .map(|v| format!("[ {} ]", self.heap.render(*v)))
            .collect();
        tracing::debug!(stack = %stack.join(""), "{}", text);
    }

    // --- Host-side access ---

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    pub fn render(&self, value: Value) -> String {
        self.heap.render(value)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::compile_source;
    use pretty_assertions::assert_eq;

    fn compile_and_get_global(source: &str, name: &str) -> (Vm, Value) {
        let mut vm = Vm::with_config(VmConfig::captured());
        vm.interpret(compile_source(source)).expect("vm error");
        let value = vm.global(name).unwrap_or(Value::Nil);
        (vm, value)
    }

    #[test]
    fn test_vm_arithmetic() {
        let (_, result) = compile_and_get_global("var x = 2 + 3 * 4;", "x");
        assert_eq!(result, Value::Number(14.0));
    }

    #[test]
    fn test_vm_variables() {
        let (_, result) = compile_and_get_global("var x = 10; var y = x + 5;", "y");
        assert_eq!(result, Value::Number(15.0));
    }

    #[test]
    fn test_vm_recursive_fib() {
        let (_, result) = compile_and_get_global(
            r#"
            fun fib(n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            var result = fib(10);
            "#,
            "result",
        );
        assert_eq!(result, Value::Number(55.0));
    }

    #[test]
    fn test_vm_iterative_fib() {
        let (_, result) = compile_and_get_global(
            r#"
            fun fib(n) {
                if (n <= 1) return n;
                var a = 0;
                var b = 1;
                for (var i = 2; i <= n; i = i + 1) {
                    var temp = a + b;
                    a = b;
                    b = temp;
                }
                return b;
            }
            var result = fib(30);
            "#,
            "result",
        );
        assert_eq!(result, Value::Number(832040.0));
    }

    #[test]
    fn test_vm_string_concat() {
        let (vm, result) = compile_and_get_global(r#"var x = "hello" + " " + "world";"#, "x");
        assert_eq!(vm.heap.as_str(result), Some("hello world"));
    }

    #[test]
    fn test_vm_loop_sum_10000() {
        let (_, result) = compile_and_get_global(
            r#"
            fun sum_to(n) {
                var total = 0;
                var i = 1;
                while (i <= n) {
                    total = total + i;
                    i = i + 1;
                }
                return total;
            }
            var result = sum_to(10000);
            "#,
            "result",
        );
        assert_eq!(result, Value::Number(50005000.0));
    }

    #[test]
    fn test_stack_is_empty_after_run() {
        let (vm, _) = compile_and_get_global("var a = 1; { var b = 2; print a + b; }", "a");
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        assert_eq!(vm.output, vec!["3"]);
    }

    #[test]
    fn test_vm_recovers_after_runtime_error() {
        let mut vm = Vm::with_config(VmConfig::captured());
        assert!(vm.interpret(compile_source("var a = 1; print -nil;")).is_err());
        assert!(vm.stack.is_empty());
        vm.interpret(compile_source("print a;")).unwrap();
        assert_eq!(vm.output, vec!["1"]);
    }

    #[test]
    fn test_clock_native_is_defined() {
        let (_, result) = compile_and_get_global("var t = clock();", "t");
        assert!(matches!(result, Value::Number(n) if n > 0.0));
    }

    #[test]
    fn test_runtime_error_carries_line() {
        let mut vm = Vm::with_config(VmConfig::captured());
        let err = vm
            .interpret(compile_source("var a = 1;\n\nprint a + nil;"))
            .unwrap_err();
        assert_eq!(err.span().line, 3);
    }
}
