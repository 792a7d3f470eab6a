//! Bytecode disassembler for debug output.

use super::chunk::{Chunk, FunctionProto};
use super::opcode::Op;

/// Disassemble a function prototype, and every function nested in it, to a
/// human-readable string.
pub fn disassemble(proto: &FunctionProto) -> String {
    let mut out = String::new();
    let name = if proto.name.is_empty() {
        "<script>"
    } else {
        &proto.name
    };
    out.push_str(&format!(
        "== {} (arity={}, upvalues={}) ==\n",
        name,
        proto.arity,
        proto.upvalue_descriptors.len()
    ));
    disassemble_chunk(&proto.chunk, &mut out);

    // Recursively disassemble nested functions
    for nested in &proto.chunk.functions {
        out.push('\n');
        out.push_str(&disassemble(nested));
    }
    out
}

fn disassemble_chunk(chunk: &Chunk, out: &mut String) {
    let mut offset = 0;
    while offset < chunk.len() {
        let (text, next) = disassemble_instruction(chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }
}

/// Render the instruction at `offset`. Returns the text and the offset of the
/// next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let line = chunk.line_at(offset);
    let line_str = if offset > 0 && chunk.lines.get(offset - 1).copied() == Some(line) {
        "   |".to_string()
    } else {
        format!("{:4}", line)
    };
    let prefix = format!("{:04} {} ", offset, line_str);

    let byte = chunk.code.get(offset).copied().unwrap_or(0);
    let op = match Op::try_from(byte) {
        Ok(op) => op,
        Err(byte) => return (format!("{}UNKNOWN 0x{:02x}", prefix, byte), offset + 1),
    };
    let u16_at = |at: usize| chunk.read_u16(at).unwrap_or(0);

    let (operands, next) = match op {
        Op::Constant => {
            let index = u16_at(offset + 1);
            let value = match chunk.read_constant_value(index as usize) {
                Some(v) => format!("{:?}", v),
                None => "???".to_string(),
            };
            (format!("{:>5} ({})", index, value), offset + 3)
        }
        Op::String => {
            let at = u16_at(offset + 1);
            (
                format!("{:>5} (\"{}\")", at, string_at(chunk, at)),
                offset + 3,
            )
        }
        Op::Function => {
            let index = u16_at(offset + 1);
            let name = chunk
                .functions
                .get(index as usize)
                .map(|f| format!("<fn {}>", f.name))
                .unwrap_or_else(|| "???".to_string());
            (format!("{:>5} ({})", index, name), offset + 3)
        }
        Op::GetGlobal
        | Op::DefineGlobal
        | Op::SetGlobal
        | Op::GetProperty
        | Op::SetProperty
        | Op::GetSuper
        | Op::Class
        | Op::Method => {
            let at = u16_at(offset + 1);
            (format!("{:>5} ({})", at, string_at(chunk, at)), offset + 3)
        }
        Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue => {
            (format!("{:>5}", u16_at(offset + 1)), offset + 3)
        }
        Op::Jump | Op::JumpIfFalse => {
            let jump = u16_at(offset + 1) as usize;
            (format!("{:>5} -> {}", jump, offset + 3 + jump), offset + 3)
        }
        Op::Loop => {
            let jump = u16_at(offset + 1) as usize;
            (
                format!("{:>5} -> {}", jump, (offset + 3).saturating_sub(jump)),
                offset + 3,
            )
        }
        Op::Call => {
            let argc = chunk.code.get(offset + 1).copied().unwrap_or(0);
            (format!("{:>5}", argc), offset + 2)
        }
        Op::Invoke | Op::SuperInvoke => {
            let at = u16_at(offset + 1);
            let argc = chunk.code.get(offset + 3).copied().unwrap_or(0);
            (
                format!("({} args) {:>5} ({})", argc, at, string_at(chunk, at)),
                offset + 4,
            )
        }
        Op::Closure => {
            let count = u16_at(offset + 1) as usize;
            let mut text = format!("{:>5}", count);
            let mut cursor = offset + 3;
            for _ in 0..count {
                let is_local = chunk.code.get(cursor).copied().unwrap_or(0) == 1;
                let index = u16_at(cursor + 1);
                text.push_str(&format!(
                    " [{} {}]",
                    if is_local { "local" } else { "upvalue" },
                    index
                ));
                cursor += 3;
            }
            (text, cursor)
        }
        Op::Nil
        | Op::True
        | Op::False
        | Op::Pop
        | Op::Equal
        | Op::Greater
        | Op::Less
        | Op::Add
        | Op::Subtract
        | Op::Multiply
        | Op::Divide
        | Op::Not
        | Op::Negate
        | Op::Print
        | Op::CloseUpvalue
        | Op::Return
        | Op::Inherit => (String::new(), offset + 1),
    };

    let text = if operands.is_empty() {
        format!("{}{}", prefix, op.name())
    } else {
        format!("{}{:<14}{}", prefix, op.name(), operands)
    };
    (text, next)
}

fn string_at(chunk: &Chunk, offset: u16) -> &str {
    chunk.read_constant_string(offset as usize).unwrap_or("?")
}
