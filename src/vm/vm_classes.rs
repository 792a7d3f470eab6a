//! Class, instance and property operations for the VM.

use crate::error::RuntimeError;
use crate::interop::{HostObject, Member};
use crate::span::Span;

use super::heap::Object;
use super::value::{ObjPtr, Value};
use super::vm::Vm;

impl Vm {
    /// `GetProperty`: replace the receiver on top of the stack with the named
    /// field, or with a bound method when no field matches.
    pub(crate) fn get_property(&mut self, name: &str, span: Span) -> Result<(), RuntimeError> {
        let receiver = self.peek(0)?;
        let ptr = self.receiver_ptr(receiver, "Only instances have properties.", span)?;

        match self.heap.get(ptr)? {
            Object::Instance(instance) => {
                if let Some(value) = instance.fields.get(name).copied() {
                    self.pop()?;
                    self.push(value);
                    return Ok(());
                }
                let class = instance.class;
                self.bind_method(class, name, span)
            }
            Object::Host(object) => {
                let object = object.clone();
                let member = self.hosts.lookup(&object, name)?;
                let value = member.read(&mut self.heap, &object, name)?;
                self.pop()?;
                self.push(value);
                Ok(())
            }
            _ => Err(RuntimeError::type_error("Only instances have properties.", span)),
        }
    }

    /// `SetProperty`: stack is `[.., receiver, value]`; leaves `value`.
    /// Instance fields are created on first assignment.
    pub(crate) fn set_property(&mut self, name: &str, span: Span) -> Result<(), RuntimeError> {
        let value = self.peek(0)?;
        let receiver = self.peek(1)?;
        let ptr = self.receiver_ptr(receiver, "Only instances have fields.", span)?;

        match self.heap.get_mut(ptr)? {
            Object::Instance(instance) => {
                instance.fields.insert(name.to_string(), value);
            }
            Object::Host(object) => {
                let object = object.clone();
                let member = self.hosts.lookup(&object, name)?;
                member.write(&self.heap, &object, name, value)?;
            }
            _ => return Err(RuntimeError::type_error("Only instances have fields.", span)),
        }

        self.pop()?;
        self.pop()?;
        self.push(value);
        Ok(())
    }

    /// `Inherit`: stack is `[.., superclass, subclass]`. Copies every method of
    /// the superclass into the subclass as it stands right now, then pops the
    /// subclass. Later changes to the superclass are not seen.
    pub(crate) fn op_inherit(&mut self, span: Span) -> Result<(), RuntimeError> {
        let superclass = match self.peek(1)? {
            Value::Object(ptr) => match self.heap.get(ptr)? {
                Object::Class(class) => class.methods.clone(),
                _ => return Err(RuntimeError::type_error("Superclass must be a class.", span)),
            },
            _ => return Err(RuntimeError::type_error("Superclass must be a class.", span)),
        };
        let subclass = self.class_ptr(self.peek(0)?, "Only classes can inherit.", span)?;

        match self.heap.get_mut(subclass)? {
            Object::Class(class) => class.methods.extend(superclass),
            other => {
                return Err(RuntimeError::type_error(
                    format!("Cannot inherit into a {}.", other.kind()),
                    span,
                ))
            }
        }
        self.pop()?;
        Ok(())
    }

    /// `Method`: stack is `[.., class, closure]`; binds the closure under
    /// `name`, replacing any inherited entry.
    pub(crate) fn op_method(&mut self, name: String, span: Span) -> Result<(), RuntimeError> {
        let method = self.peek(0)?;
        let class = self.class_ptr(self.peek(1)?, "Methods belong to a class.", span)?;
        if let Object::Class(class) = self.heap.get_mut(class)? {
            class.methods.insert(name, method);
        }
        self.pop()?;
        Ok(())
    }

    /// Pop the statically captured superclass used by `super` expressions.
    pub(crate) fn pop_class(&mut self, span: Span) -> Result<ObjPtr, RuntimeError> {
        let value = self.pop()?;
        self.class_ptr(value, "Superclass must be a class.", span)
    }

    /// Fused invoke on a host object. Methods run directly; any other member is
    /// read and called like a field.
    pub(crate) fn invoke_host(
        &mut self,
        object: &HostObject,
        name: &str,
        argc: usize,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let member = self.hosts.lookup(object, name)?;
        let base = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or(RuntimeError::StackUnderflow(span))?;

        if let Member::Method { .. } = member {
            let args = self.stack.split_off(base + 1);
            self.stack.truncate(base);
            let result = member.call(&mut self.heap, object, &args)?;
            self.push(result);
            return Ok(());
        }

        let callee = member.read(&mut self.heap, object, name)?;
        self.stack[base] = callee;
        self.call_value(callee, argc, span)
    }

    fn class_ptr(&self, value: Value, message: &str, span: Span) -> Result<ObjPtr, RuntimeError> {
        match value {
            Value::Object(ptr) if matches!(self.heap.get(ptr)?, Object::Class(_)) => Ok(ptr),
            _ => Err(RuntimeError::type_error(message, span)),
        }
    }

    fn receiver_ptr(&self, value: Value, message: &str, span: Span) -> Result<ObjPtr, RuntimeError> {
        match value {
            Value::Object(ptr) => Ok(ptr),
            _ => Err(RuntimeError::type_error(message, span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RuntimeError;
    use crate::vm::tests::{run_captured, run_err};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fields_are_created_on_assignment() {
        let out = run_captured("class P {} var p = P(); p.x = 1; p.y = p.x + 1; print p.y;");
        assert_eq!(out, vec!["2"]);
    }

    #[test]
    fn test_property_errors() {
        assert!(matches!(
            run_err("var x = 1; print x.y;"),
            RuntimeError::TypeError { ref message, .. } if message == "Only instances have properties."
        ));
        assert!(matches!(
            run_err("var x = 1; x.y = 2;"),
            RuntimeError::TypeError { ref message, .. } if message == "Only instances have fields."
        ));
        assert!(matches!(
            run_err("class P {} print P().missing;"),
            RuntimeError::UndefinedProperty(ref name, _) if name == "missing"
        ));
    }

    #[test]
    fn test_inherit_from_non_class() {
        assert!(matches!(
            run_err("var NotClass = 1; class B < NotClass {}"),
            RuntimeError::TypeError { ref message, .. } if message == "Superclass must be a class."
        ));
    }

    #[test]
    fn test_subclass_overrides_copied_method() {
        let out = run_captured(
            r#"
            class A { name() { return "A"; } other() { return "A.other"; } }
            class B < A { name() { return "B"; } }
            var b = B();
            print b.name();
            print b.other();
            "#,
        );
        assert_eq!(out, vec!["B", "A.other"]);
    }
}
