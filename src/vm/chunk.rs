//! Bytecode chunk and function prototype types.

use std::rc::Rc;

use super::upvalue::UpvalueDescriptor;
use super::value::Value;

/// Capacity every backing array starts with before doubling.
const INITIAL_CAPACITY: usize = 8;

/// Highest index the constant-value table accepts.
pub const MAX_CONSTANTS: usize = i16::MAX as usize;

/// A compiled function (or top-level script).
#[derive(Debug, Clone, Default)]
pub struct FunctionProto {
    /// Function name (empty string for top-level script).
    pub name: String,
    pub arity: u8,
    pub chunk: Chunk,
    /// Upvalue descriptors, in the order the closure instruction lists them.
    pub upvalue_descriptors: Vec<UpvalueDescriptor>,
}

impl FunctionProto {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A chunk of bytecode: instruction bytes, constant tables and line info.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw instruction stream: one opcode byte followed by its operands.
    pub code: Vec<u8>,
    /// Source line per byte of `code`.
    pub lines: Vec<usize>,
    /// Number constants, stored as raw value bit patterns.
    pub constants: Vec<u64>,
    /// Null-terminated ASCII strings, addressed by byte offset.
    pub strings: Vec<u8>,
    /// Nested functions, addressed by index.
    pub functions: Vec<Rc<FunctionProto>>,
}

/// Double `vec`'s capacity when it is full, starting from `INITIAL_CAPACITY`.
fn grow_for<T>(vec: &mut Vec<T>, additional: usize) {
    let needed = vec.len() + additional;
    if needed <= vec.capacity() {
        return;
    }
    let mut capacity = vec.capacity().max(INITIAL_CAPACITY);
    while capacity < needed {
        capacity *= 2;
    }
    vec.reserve_exact(capacity - vec.len());
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte and record its source line.
    pub fn write_instruction(&mut self, byte: u8, line: usize) -> usize {
        grow_for(&mut self.code, 1);
        grow_for(&mut self.lines, 1);
        let offset = self.code.len();
        self.code.push(byte);
        self.lines.push(line);
        offset
    }

    /// Overwrite a byte already written, for back-patching jump targets.
    pub fn write_at(&mut self, offset: usize, byte: u8) {
        if let Some(slot) = self.code.get_mut(offset) {
            *slot = byte;
        }
    }

    /// Store a value's bit pattern and return its index.
    pub fn write_constant_value(&mut self, value: Value) -> usize {
        grow_for(&mut self.constants, 1);
        self.constants.push(value.to_bits());
        self.constants.len() - 1
    }

    /// Store a string in the string table and return its starting offset.
    /// Entries are NUL-terminated, so text containing a NUL byte is refused.
    pub fn write_constant_string(&mut self, text: &str) -> Option<usize> {
        if text.as_bytes().contains(&0) {
            return None;
        }
        let offset = self.strings.len();
        grow_for(&mut self.strings, text.len() + 1);
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        Some(offset)
    }

    pub fn read_constant_value(&self, index: usize) -> Option<Value> {
        self.constants.get(index).map(|bits| Value::from_bits(*bits))
    }

    /// Read the string starting at `offset`, up to its null terminator.
    pub fn read_constant_string(&self, offset: usize) -> Option<&str> {
        let tail = self.strings.get(offset..)?;
        let len = tail.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&tail[..len]).ok()
    }

    pub fn add_function(&mut self, function: Rc<FunctionProto>) -> usize {
        grow_for(&mut self.functions, 1);
        self.functions.push(function);
        self.functions.len() - 1
    }

    /// Read a big-endian u16 operand.
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let hi = *self.code.get(offset)?;
        let lo = *self.code.get(offset + 1)?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    /// Get the current offset (next instruction index).
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn line_at(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }
}
