//! Closures, upvalues, and the open-upvalue list.

use std::fmt;
use std::rc::Rc;

use crate::error::RuntimeError;

use super::chunk::FunctionProto;
use super::heap::Object;
use super::value::{ObjPtr, Value};
use super::vm::Vm;

/// A closure: a function prototype paired with its captured upvalues.
#[derive(Clone)]
pub struct Closure {
    pub function: Rc<FunctionProto>,
    pub upvalues: Vec<ObjPtr>,
}

impl Closure {
    pub fn new(function: Rc<FunctionProto>, upvalues: Vec<ObjPtr>) -> Self {
        Self { function, upvalues }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.function.name)
    }
}

/// Where a captured variable currently lives.
///
/// While the owning frame is live the upvalue is "open" and points at an
/// absolute stack slot. Once the slot goes away it is "closed" and holds the value.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

/// Heap representation of an upvalue, linked into the VM's open list while open.
#[derive(Debug, Clone)]
pub struct ObjUpvalue {
    pub location: Upvalue,
    pub next: Option<ObjPtr>,
}

/// Descriptor emitted by the compiler for each upvalue a closure captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    /// True: captures a local slot of the immediately enclosing function.
    /// False: re-captures one of the enclosing function's own upvalues.
    pub is_local: bool,
    pub index: u16,
}

impl Vm {
    fn upvalue_obj(&self, ptr: ObjPtr) -> Result<&ObjUpvalue, RuntimeError> {
        match self.heap.get(ptr)? {
            Object::Upvalue(up) => Ok(up),
            _ => Err(RuntimeError::invalid_heap_access(
                "expected an upvalue",
                Default::default(),
            )),
        }
    }

    fn upvalue_obj_mut(&mut self, ptr: ObjPtr) -> Result<&mut ObjUpvalue, RuntimeError> {
        match self.heap.get_mut(ptr)? {
            Object::Upvalue(up) => Ok(up),
            _ => Err(RuntimeError::invalid_heap_access(
                "expected an upvalue",
                Default::default(),
            )),
        }
    }

    /// Find or create the open upvalue for `slot`.
    ///
    /// The open list is ordered by descending slot, so the walk stops at the
    /// first entry at or below `slot`. An existing entry for the slot is reused
    /// so every closure capturing it observes the same variable.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> Result<ObjPtr, RuntimeError> {
        let mut previous: Option<ObjPtr> = None;
        let mut current = self.open_upvalues;

        while let Some(ptr) = current {
            let up = self.upvalue_obj(ptr)?;
            let open_slot = match up.location {
                Upvalue::Open(s) => s,
                Upvalue::Closed(_) => break,
            };
            if open_slot <= slot {
                if open_slot == slot {
                    return Ok(ptr);
                }
                break;
            }
            previous = current;
            current = up.next;
        }

        let created = self.heap.alloc(Object::Upvalue(ObjUpvalue {
            location: Upvalue::Open(slot),
            next: current,
        }));

        match previous {
            None => self.open_upvalues = Some(created),
            Some(prev) => self.upvalue_obj_mut(prev)?.next = Some(created),
        }

        Ok(created)
    }

    /// Close every open upvalue pointing at `last` or any slot above it.
    pub(crate) fn close_upvalues(&mut self, last: usize) -> Result<(), RuntimeError> {
        while let Some(ptr) = self.open_upvalues {
            let slot = match self.upvalue_obj(ptr)?.location {
                Upvalue::Open(slot) => slot,
                Upvalue::Closed(_) => {
                    return Err(RuntimeError::invalid_heap_access(
                        "closed upvalue left on the open list",
                        Default::default(),
                    ))
                }
            };
            if slot < last {
                break;
            }

            let value = self.stack.get(slot).copied().ok_or_else(|| {
                RuntimeError::invalid_heap_access(
                    format!("upvalue slot {} is off the stack", slot),
                    Default::default(),
                )
            })?;
            let up = self.upvalue_obj_mut(ptr)?;
            up.location = Upvalue::Closed(value);
            let next = up.next.take();
            self.open_upvalues = next;
        }
        Ok(())
    }

    pub(crate) fn read_upvalue(&self, ptr: ObjPtr) -> Result<Value, RuntimeError> {
        match self.upvalue_obj(ptr)?.location {
            Upvalue::Open(slot) => self.stack.get(slot).copied().ok_or_else(|| {
                RuntimeError::invalid_heap_access(
                    format!("upvalue slot {} is off the stack", slot),
                    Default::default(),
                )
            }),
            Upvalue::Closed(value) => Ok(value),
        }
    }

    pub(crate) fn write_upvalue(&mut self, ptr: ObjPtr, value: Value) -> Result<(), RuntimeError> {
        match self.upvalue_obj(ptr)?.location {
            Upvalue::Open(slot) => match self.stack.get_mut(slot) {
                Some(target) => {
                    *target = value;
                    Ok(())
                }
                None => Err(RuntimeError::invalid_heap_access(
                    format!("upvalue slot {} is off the stack", slot),
                    Default::default(),
                )),
            },
            Upvalue::Closed(_) => {
                self.upvalue_obj_mut(ptr)?.location = Upvalue::Closed(value);
                Ok(())
            }
        }
    }

    /// Slots of the open list, head first.
    pub(crate) fn open_upvalue_slots(&self) -> Vec<usize> {
        let mut slots = Vec::new();
        let mut current = self.open_upvalues;
        while let Some(ptr) = current {
            match self.upvalue_obj(ptr) {
                Ok(ObjUpvalue {
                    location: Upvalue::Open(slot),
                    next,
                }) => {
                    slots.push(*slot);
                    current = *next;
                }
                _ => break,
            }
        }
        slots
    }
}
