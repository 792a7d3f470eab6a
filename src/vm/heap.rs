//! The object heap: an append-only arena addressed by `ObjPtr`.
//!
//! Objects are never moved or freed during a run, so a pointer handed out by
//! `alloc` stays valid for the lifetime of the heap. There is no collector.

use std::fmt;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::interop::HostObject;
use crate::span::Span;

use super::chunk::FunctionProto;
use super::upvalue::{Closure, ObjUpvalue};
use super::value::{ObjPtr, Table, Value};

/// Host callback behind a native function. Arguments arrive in push order.
pub type NativeFn = Rc<dyn Fn(&mut Heap, &[Value]) -> Result<Value, RuntimeError>>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any argument count.
    pub arity: Option<usize>,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&mut Heap, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        Self {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub methods: Table,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Table::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub class: ObjPtr,
    pub fields: Table,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: ObjPtr,
}

/// Every kind of object that can live on the heap.
#[derive(Debug, Clone)]
pub enum Object {
    String(String),
    Function(Rc<FunctionProto>),
    Closure(Closure),
    Upvalue(ObjUpvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
    Native(NativeFunction),
    Host(HostObject),
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Function(_) => "function",
            Object::Closure(_) => "closure",
            Object::Upvalue(_) => "upvalue",
            Object::Class(_) => "class",
            Object::Instance(_) => "instance",
            Object::BoundMethod(_) => "bound method",
            Object::Native(_) => "native function",
            Object::Host(_) => "host object",
        }
    }
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: Object) -> ObjPtr {
        let ptr = ObjPtr(self.objects.len());
        self.objects.push(object);
        ptr
    }

    pub fn alloc_string(&mut self, text: impl Into<String>) -> Value {
        Value::Object(self.alloc(Object::String(text.into())))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, ptr: ObjPtr) -> Result<&Object, RuntimeError> {
        self.objects.get(ptr.0).ok_or_else(|| dangling(ptr))
    }

    pub fn get_mut(&mut self, ptr: ObjPtr) -> Result<&mut Object, RuntimeError> {
        self.objects.get_mut(ptr.0).ok_or_else(|| dangling(ptr))
    }

    /// The text of a string value, if it is one.
    pub fn as_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Object(ptr) => match self.objects.get(ptr.0) {
                Some(Object::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn class(&self, ptr: ObjPtr) -> Result<&Class, RuntimeError> {
        match self.get(ptr)? {
            Object::Class(class) => Ok(class),
            other => Err(wrong_kind("class", other)),
        }
    }

    pub fn instance(&self, ptr: ObjPtr) -> Result<&Instance, RuntimeError> {
        match self.get(ptr)? {
            Object::Instance(instance) => Ok(instance),
            other => Err(wrong_kind("instance", other)),
        }
    }

    pub fn closure(&self, ptr: ObjPtr) -> Result<&Closure, RuntimeError> {
        match self.get(ptr)? {
            Object::Closure(closure) => Ok(closure),
            other => Err(wrong_kind("closure", other)),
        }
    }

    /// Type name of a value for error messages, looking through object pointers.
    pub fn describe(&self, value: Value) -> &'static str {
        match value {
            Value::Object(ptr) => self.get(ptr).map(Object::kind).unwrap_or("object"),
            other => other.type_name(),
        }
    }

    /// Human-readable form of a value, as `print` shows it.
    pub fn render(&self, value: Value) -> String {
        match value {
            Value::Number(n) => format!("{}", n),
            Value::Bool(b) => b.to_string(),
            Value::Nil => "nil".to_string(),
            Value::Object(ptr) => match self.objects.get(ptr.0) {
                Some(object) => self.render_object(object),
                None => format!("<dangling {}>", ptr.0),
            },
        }
    }

    fn render_object(&self, object: &Object) -> String {
        match object {
            Object::String(s) => s.clone(),
            Object::Function(function) => render_function(function),
            Object::Closure(closure) => render_function(&closure.function),
            Object::Upvalue(_) => "upvalue".to_string(),
            Object::Class(class) => class.name.clone(),
            Object::Instance(instance) => match self.class(instance.class) {
                Ok(class) => format!("<{} instance>", class.name),
                Err(_) => "<instance>".to_string(),
            },
            Object::BoundMethod(bound) => self.render(Value::Object(bound.method)),
            Object::Native(native) => format!("<native fn {}>", native.name),
            Object::Host(host) => format!("<host {}>", host.type_name()),
        }
    }
}

fn render_function(function: &FunctionProto) -> String {
    if function.name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {}>", function.name)
    }
}

fn dangling(ptr: ObjPtr) -> RuntimeError {
    RuntimeError::invalid_heap_access(format!("no object at heap index {}", ptr.0), Span::default())
}

fn wrong_kind(expected: &str, found: &Object) -> RuntimeError {
    RuntimeError::invalid_heap_access(
        format!("expected {} but found {}", expected, found.kind()),
        Span::default(),
    )
}
