//! Bytecode disassembler.
//!
//! Each line is a four-digit offset, the mnemonic, and the decoded
//! operands. The listing is returned as a string so callers can dump it
//! to stderr, route it through `tracing`, or assert on it in tests.

use crate::bytecode::Op;
use crate::heap::Heap;
use crate::value::{Value, display_value};

/// Disassemble a whole frame.
pub fn disassemble(heap: &Heap, name: &str, code: &[u8], constants: &[Value]) -> String {
    let mut out = format!("======== {name} ========\n");
    let mut offset = 0;
    while offset < code.len() {
        let (line, next) = disassemble_instruction(heap, code, constants, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Disassemble the instruction at `offset`; returns the rendered line
/// and the offset of the next instruction.
pub fn disassemble_instruction(
    heap: &Heap,
    code: &[u8],
    constants: &[Value],
    offset: usize,
) -> (String, usize) {
    let byte = code[offset];
    let op = match Op::from_byte(byte) {
        Some(op) => op,
        None => return (format!("{offset:04} Unknown instruction {byte}"), offset + 1),
    };

    match op {
        Op::Ldc => {
            let index = operand(code, offset + 1) as usize;
            (constant_line(heap, constants, op, offset, index), offset + 2)
        }
        Op::LdcW => {
            let index = wide_operand(code, offset + 1) as usize;
            (constant_line(heap, constants, op, offset, index), offset + 3)
        }
        Op::Store | Op::Load | Op::Call | Op::Inc1 | Op::Dec1 => {
            let arg = operand(code, offset + 1);
            (
                format!("{offset:04} {:<16} {arg:4}", op.mnemonic()),
                offset + 2,
            )
        }
        Op::LoadOffset | Op::StoreOffset => {
            let frame = operand(code, offset + 1);
            let slot = operand(code, offset + 2);
            (
                format!("{offset:04} {:<16} {frame:4} {slot:4}", op.mnemonic()),
                offset + 3,
            )
        }
        Op::Jmp
        | Op::Jeq
        | Op::Jmt
        | Op::Jmf
        | Op::Jne
        | Op::Jlt
        | Op::Jle
        | Op::Jgt
        | Op::Jge => {
            let address = wide_operand(code, offset + 1);
            (
                format!("{offset:04} {:<16}   -> {address:04}", op.mnemonic()),
                offset + 3,
            )
        }
        _ => (format!("{offset:04} {}", op.mnemonic()), offset + 1),
    }
}

fn operand(code: &[u8], offset: usize) -> u8 {
    code.get(offset).copied().unwrap_or(0)
}

fn wide_operand(code: &[u8], offset: usize) -> u16 {
    (u16::from(operand(code, offset)) << 8) | u16::from(operand(code, offset + 1))
}

fn constant_line(
    heap: &Heap,
    constants: &[Value],
    op: Op,
    offset: usize,
    index: usize,
) -> String {
    let rendered = constants
        .get(index)
        .map(|value| display_value(heap, *value, false))
        .unwrap_or_else(|| "<bad constant index>".to_string());
    format!("{offset:04} {:<16} {index:4} '{rendered}'", op.mnemonic())
}
