//! Bytecode compiler and stack VM for gears.
//!
//! The compiler lowers tokens straight to bytecode in one pass; the VM runs the
//! resulting function tree against a private heap.

pub mod chunk;
pub mod compiler;
pub mod compiler_classes;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod config;
pub mod disassembler;
pub mod heap;
pub mod opcode;
pub mod upvalue;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;
pub mod vm_calls;
pub mod vm_classes;

#[cfg(test)]
pub(crate) mod tests;

pub use chunk::{Chunk, FunctionProto};
pub use compiler::Compiler;
pub use config::VmConfig;
pub use disassembler::disassemble;
pub use heap::Heap;
pub use opcode::Op;
pub use value::{ObjPtr, Value};
pub use vm::Vm;
