//! Registered host types and their member tables.

use std::any::TypeId;

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::span::Span;
use crate::vm::heap::{Heap, NativeFunction, Object};
use crate::vm::Value;

use super::{
    check_result, from_value, to_value, Getter, HostObject, HostType, Invoker, Setter,
};

type MemberTable = IndexMap<String, Member, ahash::RandomState>;

/// One script-visible member of a host type.
#[derive(Clone)]
pub enum Member {
    /// A field or property. A missing accessor makes that direction an error.
    Data {
        kind: HostType,
        get: Option<Getter>,
        set: Option<Setter>,
    },
    Method {
        params: Vec<HostType>,
        returns: HostType,
        invoke: Invoker,
    },
}

impl Member {
    /// Read the member from `object`. Methods come back as a native function
    /// bound to the object.
    pub fn read(
        &self,
        heap: &mut Heap,
        object: &HostObject,
        name: &str,
    ) -> Result<Value, RuntimeError> {
        match self {
            Member::Data {
                kind,
                get: Some(get),
                ..
            } => {
                let value = object.with_ref(|any| get(any))?;
                Ok(to_value(heap, check_result(value, *kind)?))
            }
            Member::Data { get: None, .. } => Err(RuntimeError::interop(
                format!("{}.{} has no public getter", object.type_name(), name),
                Span::default(),
            )),
            Member::Method { params, .. } => {
                let method = self.clone();
                let receiver = object.clone();
                let native = NativeFunction::new(name, Some(params.len()), move |heap, args| {
                    method.call(heap, &receiver, args)
                });
                Ok(Value::Object(heap.alloc(Object::Native(native))))
            }
        }
    }

    /// Write `value` into the member, converting it to the member's type.
    pub fn write(
        &self,
        heap: &Heap,
        object: &HostObject,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        match self {
            Member::Data {
                kind,
                set: Some(set),
                ..
            } => {
                let converted = from_value(heap, value, *kind)?;
                object.with_mut(|any| set(any, converted))
            }
            Member::Data { set: None, .. } => Err(RuntimeError::interop(
                format!("{}.{} has no public setter", object.type_name(), name),
                Span::default(),
            )),
            Member::Method { .. } => Err(RuntimeError::interop(
                format!("cannot assign to method {}.{}", object.type_name(), name),
                Span::default(),
            )),
        }
    }

    /// Marshal `args` to the declared parameter types, run the method and
    /// marshal its result back.
    pub fn call(
        &self,
        heap: &mut Heap,
        object: &HostObject,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let (params, returns, invoke) = match self {
            Member::Method {
                params,
                returns,
                invoke,
            } => (params, *returns, invoke),
            Member::Data { .. } => {
                return Err(RuntimeError::interop(
                    format!("{} member is not a method", object.type_name()),
                    Span::default(),
                ))
            }
        };

        if args.len() != params.len() {
            return Err(RuntimeError::wrong_arity(
                params.len(),
                args.len(),
                Span::default(),
            ));
        }
        let converted = params
            .iter()
            .zip(args)
            .map(|(kind, value)| from_value(heap, *value, *kind))
            .collect::<Result<Vec<_>, _>>()?;

        let result = object.with_mut(|any| invoke(any, &converted[..]))?;
        if returns == HostType::Void {
            return Ok(Value::Nil);
        }
        Ok(to_value(heap, check_result(result, returns)?))
    }
}

struct RegisteredClass {
    name: &'static str,
    members: MemberTable,
}

/// Host types known to a VM, keyed by `TypeId`.
#[derive(Default)]
pub struct HostRegistry {
    classes: IndexMap<TypeId, RegisteredClass, ahash::RandomState>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add members for a type. A name already present keeps its first
    /// registration; the newcomer is dropped with a warning.
    pub fn register(
        &mut self,
        type_id: TypeId,
        name: &'static str,
        members: Vec<(String, Member)>,
    ) {
        let class = self
            .classes
            .entry(type_id)
            .or_insert_with(|| RegisteredClass {
                name,
                members: MemberTable::default(),
            });
        for (member_name, member) in members {
            if class.members.contains_key(&member_name) {
                tracing::warn!(
                    host = class.name,
                    member = %member_name,
                    "ambiguous host member; keeping the first registration"
                );
                continue;
            }
            class.members.insert(member_name, member);
        }
        tracing::debug!(host = class.name, members = class.members.len(), "registered host class");
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.classes.contains_key(&type_id)
    }

    pub fn member(&self, type_id: TypeId, name: &str) -> Option<&Member> {
        self.classes.get(&type_id)?.members.get(name)
    }

    /// Clone a member out so the heap can be mutated while it runs.
    pub fn lookup(&self, object: &HostObject, name: &str) -> Result<Member, RuntimeError> {
        self.member(object.type_id(), name)
            .cloned()
            .ok_or_else(|| RuntimeError::undefined_property(name, Span::default()))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.classes.values().map(|c| c.name))
            .finish()
    }
}
