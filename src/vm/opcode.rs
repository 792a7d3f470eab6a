//! Bytecode opcodes.
//!
//! Each instruction is one opcode byte followed by its operands. Multi-byte
//! operands are big-endian. Jump offsets are unsigned and measured from the
//! byte after the operand.

/// A single bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    // --- Constants & Literals ---
    /// `u16` constant index. Push a number constant.
    Constant = 0,
    /// `u16` string-table offset. Allocate and push a string.
    String,
    /// `u16` function index. Push a function object.
    Function,
    Nil,
    True,
    False,

    // --- Stack manipulation ---
    Pop,

    // --- Variables ---
    /// `u16` slot relative to the frame base.
    GetLocal,
    SetLocal,
    /// `u16` string-table offset of the name.
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    /// `u16` index into the running closure's upvalues.
    GetUpvalue,
    SetUpvalue,

    // --- Objects ---
    /// `u16` string-table offset of the property name.
    GetProperty,
    SetProperty,
    /// `u16` method name. Pops the superclass, binds the method to `this`.
    GetSuper,

    // --- Comparison ---
    Equal,
    Greater,
    Less,

    // --- Arithmetic ---
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,

    Print,

    // --- Control flow ---
    /// `u16` forward offset.
    Jump,
    /// `u16` forward offset. Leaves the condition on the stack.
    JumpIfFalse,
    /// `u16` backward offset.
    Loop,

    // --- Functions ---
    /// `u8` argument count.
    Call,
    /// `u16` method name, `u8` argument count.
    Invoke,
    /// `u16` method name, `u8` argument count. Pops the superclass first.
    SuperInvoke,
    /// `u16` upvalue count, then per upvalue `u8` is-local and `u16` index.
    /// Pops a function object and pushes a closure over it.
    Closure,
    CloseUpvalue,
    Return,

    // --- Classes ---
    /// `u16` class name.
    Class,
    /// Copies the superclass's methods into the subclass and pops the subclass.
    Inherit,
    /// `u16` method name. Binds the closure on top to the class below it.
    Method,
}

impl Op {
    pub const ALL: [Op; 39] = [
        Op::Constant,
        Op::String,
        Op::Function,
        Op::Nil,
        Op::True,
        Op::False,
        Op::Pop,
        Op::GetLocal,
        Op::SetLocal,
        Op::GetGlobal,
        Op::DefineGlobal,
        Op::SetGlobal,
        Op::GetUpvalue,
        Op::SetUpvalue,
        Op::GetProperty,
        Op::SetProperty,
        Op::GetSuper,
        Op::Equal,
        Op::Greater,
        Op::Less,
        Op::Add,
        Op::Subtract,
        Op::Multiply,
        Op::Divide,
        Op::Not,
        Op::Negate,
        Op::Print,
        Op::Jump,
        Op::JumpIfFalse,
        Op::Loop,
        Op::Call,
        Op::Invoke,
        Op::SuperInvoke,
        Op::Closure,
        Op::CloseUpvalue,
        Op::Return,
        Op::Class,
        Op::Inherit,
        Op::Method,
    ];

    /// Mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            Op::Constant => "CONSTANT",
            Op::String => "STRING",
            Op::Function => "FUNCTION",
            Op::Nil => "NIL",
            Op::True => "TRUE",
            Op::False => "FALSE",
            Op::Pop => "POP",
            Op::GetLocal => "GET_LOCAL",
            Op::SetLocal => "SET_LOCAL",
            Op::GetGlobal => "GET_GLOBAL",
            Op::DefineGlobal => "DEFINE_GLOBAL",
            Op::SetGlobal => "SET_GLOBAL",
            Op::GetUpvalue => "GET_UPVALUE",
            Op::SetUpvalue => "SET_UPVALUE",
            Op::GetProperty => "GET_PROPERTY",
            Op::SetProperty => "SET_PROPERTY",
            Op::GetSuper => "GET_SUPER",
            Op::Equal => "EQUAL",
            Op::Greater => "GREATER",
            Op::Less => "LESS",
            Op::Add => "ADD",
            Op::Subtract => "SUBTRACT",
            Op::Multiply => "MULTIPLY",
            Op::Divide => "DIVIDE",
            Op::Not => "NOT",
            Op::Negate => "NEGATE",
            Op::Print => "PRINT",
            Op::Jump => "JUMP",
            Op::JumpIfFalse => "JUMP_IF_FALSE",
            Op::Loop => "LOOP",
            Op::Call => "CALL",
            Op::Invoke => "INVOKE",
            Op::SuperInvoke => "SUPER_INVOKE",
            Op::Closure => "CLOSURE",
            Op::CloseUpvalue => "CLOSE_UPVALUE",
            Op::Return => "RETURN",
            Op::Class => "CLASS",
            Op::Inherit => "INHERIT",
            Op::Method => "METHOD",
        }
    }
}

impl From<Op> for u8 {
    fn from(op: Op) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Op::ALL.get(byte as usize).copied().ok_or(byte)
    }
}
