use wasm_encoder::{Encode, MemArg};

use crate::{EncodeError, Immediate, Instruction, Opcode};

/// Size in bytes of `insts` once re-encoded.
pub fn encoded_len(insts: &[Instruction]) -> Result<usize, EncodeError> {
    let mut sink = Vec::new();
    for inst in insts {
        encode_into(inst, &mut sink)?;
    }
    Ok(sink.len())
}

/// Size of a `call` to a helper appended after the last of `func_count`
/// functions.
pub fn helper_call_len(func_count: u32) -> usize {
    let mut sink = Vec::new();
    wasm_encoder::Instruction::Call(func_count).encode(&mut sink);
    sink.len()
}

fn encode_into(inst: &Instruction, sink: &mut Vec<u8>) -> Result<(), EncodeError> {
    use wasm_encoder::Instruction as Enc;

    let encoded = match inst.opcode {
        Opcode::Unreachable => Enc::Unreachable,
        Opcode::Nop => Enc::Nop,
        Opcode::Else => Enc::Else,
        Opcode::End => Enc::End,
        Opcode::Br => Enc::Br(label(inst)?),
        Opcode::BrIf => Enc::BrIf(label(inst)?),
        Opcode::Return => Enc::Return,
        Opcode::Call => Enc::Call(func(inst)?),
        Opcode::ReturnCall => Enc::ReturnCall(func(inst)?),
        Opcode::CallIndirect | Opcode::ReturnCallIndirect => {
            // Encoded by hand; only the index immediates matter for size.
            let (ty, table) = type_and_table(inst)?;
            sink.push(inst.opcode.code());
            ty.encode(sink);
            table.encode(sink);
            return Ok(());
        }
        Opcode::Drop => Enc::Drop,
        Opcode::Select => Enc::Select,
        Opcode::LocalGet => Enc::LocalGet(local(inst)?),
        Opcode::LocalSet => Enc::LocalSet(local(inst)?),
        Opcode::LocalTee => Enc::LocalTee(local(inst)?),
        Opcode::GlobalGet => Enc::GlobalGet(global(inst)?),
        Opcode::GlobalSet => Enc::GlobalSet(global(inst)?),
        Opcode::I32Load => Enc::I32Load(memarg(inst)?),
        Opcode::I64Load => Enc::I64Load(memarg(inst)?),
        Opcode::I32Store => Enc::I32Store(memarg(inst)?),
        Opcode::I64Store => Enc::I64Store(memarg(inst)?),
        Opcode::I32Const => Enc::I32Const(inst.i32_imm().ok_or_else(|| missing(inst))?),
        Opcode::I64Const => Enc::I64Const(inst.i64_imm().ok_or_else(|| missing(inst))?),
        Opcode::I32Add => Enc::I32Add,
        Opcode::I32Sub => Enc::I32Sub,
        Opcode::I32ShrU => Enc::I32ShrU,
        Opcode::I64Add => Enc::I64Add,
        Opcode::I64Sub => Enc::I64Sub,
        Opcode::I64ShrU => Enc::I64ShrU,
        Opcode::I32WrapI64 => Enc::I32WrapI64,
        Opcode::I64ExtendI32U => Enc::I64ExtendI32U,

        // Block types and branch tables are not kept by the decoder.
        Opcode::Block | Opcode::Loop | Opcode::If | Opcode::BrTable | Opcode::Other { .. } => {
            return Err(EncodeError::Unsupported {
                name: inst.name().to_string(),
            })
        }
    };

    encoded.encode(sink);
    Ok(())
}

fn missing(inst: &Instruction) -> EncodeError {
    EncodeError::MissingImmediate {
        name: inst.name().to_string(),
    }
}

fn find_imm<T>(
    inst: &Instruction,
    f: impl Fn(&Immediate) -> Option<T>,
) -> Result<T, EncodeError> {
    inst.immediates.iter().find_map(f).ok_or_else(|| missing(inst))
}

fn label(inst: &Instruction) -> Result<u32, EncodeError> {
    find_imm(inst, |imm| match imm {
        Immediate::Label(depth) => Some(*depth),
        _ => None,
    })
}

fn func(inst: &Instruction) -> Result<u32, EncodeError> {
    find_imm(inst, |imm| match imm {
        Immediate::Func(index) => Some(*index),
        _ => None,
    })
}

fn local(inst: &Instruction) -> Result<u32, EncodeError> {
    find_imm(inst, |imm| match imm {
        Immediate::Local(index) => Some(*index),
        _ => None,
    })
}

fn global(inst: &Instruction) -> Result<u32, EncodeError> {
    inst.global_imm().ok_or_else(|| missing(inst))
}

fn type_and_table(inst: &Instruction) -> Result<(u32, u32), EncodeError> {
    let ty = find_imm(inst, |imm| match imm {
        Immediate::Type(index) => Some(*index),
        _ => None,
    })?;
    let table = find_imm(inst, |imm| match imm {
        Immediate::Table(index) => Some(*index),
        _ => None,
    })?;
    Ok((ty, table))
}

fn memarg(inst: &Instruction) -> Result<MemArg, EncodeError> {
    find_imm(inst, |imm| match *imm {
        Immediate::MemArg {
            align,
            offset,
            memory,
        } => Some(MemArg {
            offset,
            align: u32::from(align),
            memory_index: memory,
        }),
        _ => None,
    })
}
