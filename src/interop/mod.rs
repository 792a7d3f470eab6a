//! Host interop: exposing Rust values to scripts.
//!
//! A host type is described once with a [`HostClass`] builder listing the
//! members scripts may touch. Registration happens on the VM before any script
//! runs; after that, property reads, writes and method invocations on a wrapped
//! value go through the typed closures recorded here. Nothing is discovered by
//! inspection at runtime.

mod registry;

pub use registry::{HostRegistry, Member};

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::span::Span;
use crate::vm::heap::{Heap, Object};
use crate::vm::{Value, Vm};

/// A host value shared between Rust and scripts.
#[derive(Clone)]
pub struct HostObject {
    type_id: TypeId,
    type_name: &'static str,
    inner: Rc<RefCell<dyn Any>>,
}

impl HostObject {
    pub fn new<T: 'static>(value: T) -> Self {
        Self::from_shared(Rc::new(RefCell::new(value)))
    }

    /// Wrap a value the host keeps its own handle to.
    pub fn from_shared<T: 'static>(shared: Rc<RefCell<T>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name::<T>(),
            inner: shared,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn with_ref<R>(
        &self,
        f: impl FnOnce(&dyn Any) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        let guard = self.inner.try_borrow().map_err(|_| self.busy())?;
        f(&*guard)
    }

    pub(crate) fn with_mut<R>(
        &self,
        f: impl FnOnce(&mut dyn Any) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        let mut guard = self.inner.try_borrow_mut().map_err(|_| self.busy())?;
        f(&mut *guard)
    }

    fn busy(&self) -> RuntimeError {
        RuntimeError::interop(
            format!("{} is already borrowed by a running host call", self.type_name),
            Span::default(),
        )
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<host {}>", self.type_name)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// A value in host terms, on its way into or out of a script.
#[derive(Debug, Clone)]
pub enum HostValue {
    Nil,
    Number(f64),
    Bool(bool),
    /// `None` is a null string; scripts see it as `nil`.
    Str(Option<String>),
    Object(HostObject),
}

impl HostValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil | Self::Str(None) => "nil",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::Str(Some(_)) => "string",
            Self::Object(object) => object.type_name(),
        }
    }
}

/// The declared type of a host member, parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    Number,
    Bool,
    String,
    Object(TypeId, &'static str),
    Void,
}

impl HostType {
    pub fn object<T: 'static>() -> Self {
        Self::Object(TypeId::of::<T>(), short_type_name::<T>())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Object(_, name) => name,
            Self::Void => "void",
        }
    }
}

/// Materialise a host value on the script side. Strings and host objects get
/// a fresh heap entry every time.
pub fn to_value(heap: &mut Heap, value: HostValue) -> Value {
    match value {
        HostValue::Nil | HostValue::Str(None) => Value::Nil,
        HostValue::Number(n) => Value::Number(n),
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Str(Some(s)) => heap.alloc_string(s),
        HostValue::Object(object) => Value::Object(heap.alloc(Object::Host(object))),
    }
}

/// Convert a script value to the host type `expected`.
///
/// `nil` passes as a null string. Host objects must be of exactly the expected
/// type. Everything else is an interop error.
pub fn from_value(heap: &Heap, value: Value, expected: HostType) -> Result<HostValue, RuntimeError> {
    let converted = match (expected, value) {
        (HostType::Number, Value::Number(n)) => Some(HostValue::Number(n)),
        (HostType::Bool, Value::Bool(b)) => Some(HostValue::Bool(b)),
        (HostType::String, Value::Nil) => Some(HostValue::Str(None)),
        (HostType::String, Value::Object(_)) => heap
            .as_str(value)
            .map(|s| HostValue::Str(Some(s.to_string()))),
        (HostType::Object(type_id, _), Value::Object(ptr)) => match heap.get(ptr)? {
            Object::Host(object) if object.type_id() == type_id => {
                Some(HostValue::Object(object.clone()))
            }
            _ => None,
        },
        _ => None,
    };

    converted.ok_or_else(|| {
        RuntimeError::interop(
            format!(
                "Unsupported native conversion from {} to {}.",
                heap.describe(value),
                expected.name()
            ),
            Span::default(),
        )
    })
}

/// Check a value produced by host code against its declared type. A null
/// string is the only `nil` a host may hand back.
pub fn check_result(value: HostValue, expected: HostType) -> Result<HostValue, RuntimeError> {
    let matches = match (&value, expected) {
        (HostValue::Number(_), HostType::Number) => true,
        (HostValue::Bool(_), HostType::Bool) => true,
        (HostValue::Str(_), HostType::String) => true,
        (HostValue::Object(object), HostType::Object(type_id, _)) => object.type_id() == type_id,
        _ => false,
    };
    if matches {
        return Ok(value);
    }
    Err(RuntimeError::interop(
        format!(
            "Unsupported native conversion from {} to {}.",
            value.kind_name(),
            expected.name()
        ),
        Span::default(),
    ))
}

pub type Getter = Rc<dyn Fn(&dyn Any) -> Result<HostValue, RuntimeError>>;
pub type Setter = Rc<dyn Fn(&mut dyn Any, HostValue) -> Result<(), RuntimeError>>;
pub type Invoker = Rc<dyn Fn(&mut dyn Any, &[HostValue]) -> Result<HostValue, RuntimeError>>;

/// Describes the script-visible surface of a host type `T`.
pub struct HostClass<T> {
    pub(crate) name: &'static str,
    pub(crate) members: Vec<(String, Member)>,
    _marker: PhantomData<T>,
}

impl<T: 'static> HostClass<T> {
    pub fn new() -> Self {
        Self {
            name: short_type_name::<T>(),
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn number_field(
        self,
        name: &str,
        get: impl Fn(&T) -> f64 + 'static,
        set: impl Fn(&mut T, f64) + 'static,
    ) -> Self {
        self.data(
            name,
            HostType::Number,
            Some(getter(move |t: &T| HostValue::Number(get(t)))),
            Some(setter(move |t: &mut T, v| {
                if let HostValue::Number(n) = v {
                    set(t, n)
                }
            })),
        )
    }

    pub fn bool_field(
        self,
        name: &str,
        get: impl Fn(&T) -> bool + 'static,
        set: impl Fn(&mut T, bool) + 'static,
    ) -> Self {
        self.data(
            name,
            HostType::Bool,
            Some(getter(move |t: &T| HostValue::Bool(get(t)))),
            Some(setter(move |t: &mut T, v| {
                if let HostValue::Bool(b) = v {
                    set(t, b)
                }
            })),
        )
    }

    pub fn string_field(
        self,
        name: &str,
        get: impl Fn(&T) -> Option<String> + 'static,
        set: impl Fn(&mut T, Option<String>) + 'static,
    ) -> Self {
        self.data(
            name,
            HostType::String,
            Some(getter(move |t: &T| HostValue::Str(get(t)))),
            Some(setter(move |t: &mut T, v| {
                if let HostValue::Str(s) = v {
                    set(t, s)
                }
            })),
        )
    }

    /// A read-only member holding another host object.
    pub fn object_field<U: 'static>(
        self,
        name: &str,
        get: impl Fn(&T) -> Rc<RefCell<U>> + 'static,
    ) -> Self {
        self.data(
            name,
            HostType::object::<U>(),
            Some(getter(move |t: &T| {
                HostValue::Object(HostObject::from_shared(get(t)))
            })),
            None,
        )
    }

    /// A computed number; either accessor may be absent.
    pub fn number_property(
        self,
        name: &str,
        get: Option<fn(&T) -> f64>,
        set: Option<fn(&mut T, f64)>,
    ) -> Self {
        let get = get.map(|get| getter(move |t: &T| HostValue::Number(get(t))));
        let set = set.map(|set| {
            setter(move |t: &mut T, v| {
                if let HostValue::Number(n) = v {
                    set(t, n)
                }
            })
        });
        self.data(name, HostType::Number, get, set)
    }

    /// A method taking arguments of the declared `params` types. `returns` of
    /// `HostType::Void` makes calls evaluate to `nil`.
    pub fn method(
        mut self,
        name: &str,
        params: &[HostType],
        returns: HostType,
        f: impl Fn(&mut T, &[HostValue]) -> HostValue + 'static,
    ) -> Self {
        let type_name = self.name;
        let invoke: Invoker = Rc::new(move |any: &mut dyn Any, args: &[HostValue]| {
            let target = any
                .downcast_mut::<T>()
                .ok_or_else(|| mismatched(type_name))?;
            Ok(f(target, args))
        });
        self.members.push((
            name.to_string(),
            Member::Method {
                params: params.to_vec(),
                returns,
                invoke,
            },
        ));
        self
    }

    fn data(
        mut self,
        name: &str,
        kind: HostType,
        get: Option<Getter>,
        set: Option<Setter>,
    ) -> Self {
        self.members
            .push((name.to_string(), Member::Data { kind, get, set }));
        self
    }
}

impl<T: 'static> Default for HostClass<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn getter<T: 'static>(f: impl Fn(&T) -> HostValue + 'static) -> Getter {
    let type_name = short_type_name::<T>();
    Rc::new(move |any: &dyn Any| {
        any.downcast_ref::<T>()
            .map(&f)
            .ok_or_else(|| mismatched(type_name))
    })
}

fn setter<T: 'static>(f: impl Fn(&mut T, HostValue) + 'static) -> Setter {
    let type_name = short_type_name::<T>();
    Rc::new(move |any: &mut dyn Any, value: HostValue| {
        let target = any
            .downcast_mut::<T>()
            .ok_or_else(|| mismatched(type_name))?;
        f(target, value);
        Ok(())
    })
}

fn mismatched(type_name: &str) -> RuntimeError {
    RuntimeError::interop(
        format!("host member registered for {} called on another type", type_name),
        Span::default(),
    )
}

impl Vm {
    /// Make a host type's members available to scripts.
    pub fn register_host_class<T: 'static>(&mut self, class: HostClass<T>) {
        self.hosts.register(TypeId::of::<T>(), class.name, class.members);
    }

    /// Place a host value on the heap. Its type must have been registered.
    pub fn wrap_host<T: 'static>(&mut self, value: T) -> Result<Value, RuntimeError> {
        self.wrap_host_object(HostObject::new(value))
    }

    pub fn wrap_host_object(&mut self, object: HostObject) -> Result<Value, RuntimeError> {
        if !self.hosts.contains(object.type_id()) {
            return Err(RuntimeError::interop(
                format!("{} is not a registered host class", object.type_name()),
                Span::default(),
            ));
        }
        Ok(Value::Object(self.heap.alloc(Object::Host(object))))
    }

    /// Borrow the Rust value behind a wrapped host object.
    pub fn with_host<T: 'static, R>(
        &self,
        value: Value,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, RuntimeError> {
        let object = match value {
            Value::Object(ptr) => match self.heap.get(ptr)? {
                Object::Host(object) => object.clone(),
                other => {
                    return Err(RuntimeError::interop(
                        format!("expected a host object, found {}", other.kind()),
                        Span::default(),
                    ))
                }
            },
            other => {
                return Err(RuntimeError::interop(
                    format!("expected a host object, found {}", other.type_name()),
                    Span::default(),
                ))
            }
        };
        object.with_ref(|any| {
            any.downcast_ref::<T>()
                .map(f)
                .ok_or_else(|| mismatched(short_type_name::<T>()))
        })
    }
}
