//! Constant expressions as emitted for table offsets and indirect call
//! targets.
//!
//! [`ExprOp`] is the closed set of operators these expressions are built
//! from. The slice finder knows the stack effect of all of them; the
//! evaluator computes only the ones that form constants and rejects reads of
//! locals, globals or memory by name.

use fission_module::{Instruction, Opcode, StackEffect};
use smallvec::SmallVec;

use crate::ExprError;

const MASK_32: u64 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    I32Const,
    I64Const,
    I32WrapI64,
    I32ShrU,
    I64ShrU,
    GlobalGet,
    GlobalSet,
    LocalGet,
    LocalTee,
    I32Load,
    I64Load,
    Drop,
    Nop,
    End,
}

impl ExprOp {
    pub fn classify(inst: &Instruction) -> Result<Self, ExprError> {
        let op = match inst.opcode {
            Opcode::I32Const => Self::I32Const,
            Opcode::I64Const => Self::I64Const,
            Opcode::I32WrapI64 => Self::I32WrapI64,
            Opcode::I32ShrU => Self::I32ShrU,
            Opcode::I64ShrU => Self::I64ShrU,
            Opcode::GlobalGet => Self::GlobalGet,
            Opcode::GlobalSet => Self::GlobalSet,
            Opcode::LocalGet => Self::LocalGet,
            Opcode::LocalTee => Self::LocalTee,
            Opcode::I32Load => Self::I32Load,
            Opcode::I64Load => Self::I64Load,
            Opcode::Drop => Self::Drop,
            Opcode::Nop => Self::Nop,
            Opcode::End => Self::End,
            _ => return Err(ExprError::Unsupported(inst.name().to_string())),
        };
        Ok(op)
    }

    pub fn effect(self) -> StackEffect {
        let (pops, pushes) = match self {
            Self::I32Const | Self::I64Const | Self::GlobalGet | Self::LocalGet => (0, 1),
            Self::I32WrapI64 | Self::LocalTee | Self::I32Load | Self::I64Load => (1, 1),
            Self::I32ShrU | Self::I64ShrU => (2, 1),
            Self::GlobalSet | Self::Drop => (1, 0),
            Self::Nop | Self::End => (0, 0),
        };
        StackEffect::new(pops, pushes)
    }
}

pub type ValueStack = SmallVec<[u64; 4]>;

/// Runs `insts` left to right and returns the resulting stack, bottom first.
///
/// 32-bit operators mask operands and results to 32 bits. A trailing `end`
/// is accepted; anywhere else it is malformed.
pub fn evaluate(insts: &[Instruction]) -> Result<ValueStack, ExprError> {
    let mut stack = ValueStack::new();
    let last = insts.len().saturating_sub(1);

    for (index, inst) in insts.iter().enumerate() {
        match ExprOp::classify(inst)? {
            ExprOp::I32Const => {
                let value = inst.i32_imm().ok_or_else(|| missing_imm(inst))?;
                stack.push(u64::from(value as u32));
            }
            ExprOp::I64Const => {
                let value = inst.i64_imm().ok_or_else(|| missing_imm(inst))?;
                stack.push(value as u64);
            }
            ExprOp::I32WrapI64 => {
                let value = pop(&mut stack, inst)?;
                stack.push(value & MASK_32);
            }
            ExprOp::I32ShrU => {
                let shift = pop(&mut stack, inst)? & 31;
                let value = pop(&mut stack, inst)? & MASK_32;
                stack.push(value >> shift);
            }
            ExprOp::I64ShrU => {
                let shift = pop(&mut stack, inst)? & 63;
                let value = pop(&mut stack, inst)?;
                stack.push(value >> shift);
            }
            ExprOp::GlobalSet => {
                pop(&mut stack, inst)?;
            }
            ExprOp::End => {
                if index != last {
                    return Err(ExprError::Malformed(format!(
                        "`end` at {index} is not the last instruction"
                    )));
                }
            }
            ExprOp::GlobalGet
            | ExprOp::LocalGet
            | ExprOp::LocalTee
            | ExprOp::I32Load
            | ExprOp::I64Load
            | ExprOp::Drop
            | ExprOp::Nop => return Err(ExprError::Unsupported(inst.name().to_string())),
        }
    }

    Ok(stack)
}

fn pop(stack: &mut ValueStack, inst: &Instruction) -> Result<u64, ExprError> {
    stack
        .pop()
        .ok_or_else(|| ExprError::Malformed(format!("stack underflow at `{}`", inst.name())))
}

fn missing_imm(inst: &Instruction) -> ExprError {
    ExprError::Malformed(format!("`{}` without an immediate", inst.name()))
}
