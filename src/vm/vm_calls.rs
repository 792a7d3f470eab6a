//! Function call dispatch for the VM.

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::span::Span;

use super::chunk::FunctionProto;
use super::heap::{BoundMethod, Instance, NativeFunction, Object};
use super::value::{ObjPtr, Table, Value};
use super::vm::{CallFrame, Vm};

impl Vm {
    /// Call a value with `argc` arguments on the stack.
    /// The callee sits in the slot just below the arguments.
    pub fn call_value(&mut self, callee: Value, argc: usize, span: Span) -> Result<(), RuntimeError> {
        let ptr = match callee {
            Value::Object(ptr) => ptr,
            _ => return Err(RuntimeError::not_callable(span)),
        };

        match self.heap.get(ptr)? {
            Object::Function(function) => {
                let function = function.clone();
                self.call_function(function, None, argc, span)
            }
            Object::Closure(closure) => {
                let function = closure.function.clone();
                self.call_function(function, Some(ptr), argc, span)
            }
            Object::Class(class) => {
                let init = class.methods.get("init").copied();
                self.call_class(ptr, init, argc, span)
            }
            Object::Native(native) => {
                let native = native.clone();
                self.call_native(native, argc, span)
            }
            Object::BoundMethod(bound) => {
                let BoundMethod { receiver, method } = *bound;
                let slot = self.callee_slot(argc)?;
                self.stack[slot] = receiver;
                self.call_value(Value::Object(method), argc, span)
            }
            _ => Err(RuntimeError::not_callable(span)),
        }
    }

    /// Push a frame for `function`. Its locals start at the callee slot, so
    /// slot 0 is the callee (or the receiver for methods) and the arguments
    /// follow.
    pub(crate) fn call_function(
        &mut self,
        function: Rc<FunctionProto>,
        closure: Option<ObjPtr>,
        argc: usize,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let arity = function.arity as usize;
        if argc != arity {
            return Err(RuntimeError::wrong_arity(arity, argc, span));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow(span));
        }

        let stack_base = self.callee_slot(argc)?;
        self.frames.push(CallFrame {
            function,
            closure,
            ip: 0,
            stack_base,
        });
        Ok(())
    }

    /// Calling a class makes an instance and runs `init` on it, if defined.
    fn call_class(
        &mut self,
        class: ObjPtr,
        init: Option<Value>,
        argc: usize,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let instance = self.heap.alloc(Object::Instance(Instance {
            class,
            fields: Table::default(),
        }));
        let slot = self.callee_slot(argc)?;
        self.stack[slot] = Value::Object(instance);

        match init {
            Some(initializer) => self.call_value(initializer, argc, span),
            None if argc != 0 => Err(RuntimeError::wrong_arity(0, argc, span)),
            None => Ok(()),
        }
    }

    /// Natives run inline: arguments and callee are popped, the result pushed.
    fn call_native(
        &mut self,
        native: NativeFunction,
        argc: usize,
        span: Span,
    ) -> Result<(), RuntimeError> {
        if let Some(arity) = native.arity {
            if argc != arity {
                return Err(RuntimeError::wrong_arity(arity, argc, span));
            }
        }

        let slot = self.callee_slot(argc)?;
        let args = self.stack.split_off(slot + 1);
        self.stack.truncate(slot);

        let result = (native.func)(&mut self.heap, &args).map_err(|err| {
            tracing::debug!(native = %native.name, error = %err, "native call failed");
            err
        })?;
        self.push(result);
        Ok(())
    }

    /// Fused property-get-and-call. A field of the receiver shadows a method of
    /// the same name; only on a field miss is the class consulted.
    pub(crate) fn invoke(&mut self, name: &str, argc: usize, span: Span) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc)?;
        let ptr = match receiver {
            Value::Object(ptr) => ptr,
            _ => return Err(RuntimeError::type_error("Only instances have methods.", span)),
        };

        match self.heap.get(ptr)? {
            Object::Instance(instance) => {
                if let Some(field) = instance.fields.get(name).copied() {
                    let slot = self.callee_slot(argc)?;
                    self.stack[slot] = field;
                    return self.call_value(field, argc, span);
                }
                let class = instance.class;
                self.invoke_from_class(class, name, argc, span)
            }
            Object::Host(object) => {
                let object = object.clone();
                self.invoke_host(&object, name, argc, span)
            }
            _ => Err(RuntimeError::type_error("Only instances have methods.", span)),
        }
    }

    /// Call `name` from `class`'s method table with the receiver already in
    /// the callee slot.
    pub(crate) fn invoke_from_class(
        &mut self,
        class: ObjPtr,
        name: &str,
        argc: usize,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let method = self
            .heap
            .class(class)?
            .methods
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::undefined_property(name, span))?;
        self.call_value(method, argc, span)
    }

    /// Replace the receiver on top of the stack with `class.name` bound to it.
    pub(crate) fn bind_method(&mut self, class: ObjPtr, name: &str, span: Span) -> Result<(), RuntimeError> {
        let method = match self.heap.class(class)?.methods.get(name) {
            Some(Value::Object(method)) => *method,
            _ => return Err(RuntimeError::undefined_property(name, span)),
        };
        let receiver = self.peek(0)?;
        let bound = self
            .heap
            .alloc(Object::BoundMethod(BoundMethod { receiver, method }));
        self.pop()?;
        self.push(Value::Object(bound));
        Ok(())
    }

    fn callee_slot(&self, argc: usize) -> Result<usize, RuntimeError> {
        self.stack
            .len()
            .checked_sub(argc + 1)
            .ok_or(RuntimeError::StackUnderflow(Span::default()))
    }
}
