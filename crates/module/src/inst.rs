use std::fmt;

use smallvec::{smallvec, SmallVec};
use wasmparser::{MemArg, Operator, OperatorsReader};

use crate::{DecodeError, FuncIndex};

/// Net stack behaviour of an operator whose arity does not depend on types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u32,
    pub pushes: u32,
}

impl StackEffect {
    pub const fn new(pops: u32, pushes: u32) -> Self {
        Self { pops, pushes }
    }

    pub fn yields(&self) -> bool {
        self.pushes > 0
    }
}

const fn fx(pops: u32, pushes: u32) -> Option<StackEffect> {
    Some(StackEffect::new(pops, pushes))
}

macro_rules! opcodes {
    ($($variant:ident = $code:literal, $name:literal, $effect:expr;)*) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
            /// An operator the analysis does not model. Keeps the leading
            /// opcode byte and the decoder's name for diagnostics.
            Other { code: u8, name: Box<str> },
        }

        impl Opcode {
            pub fn code(&self) -> u8 {
                match self {
                    $(Self::$variant => $code,)*
                    Self::Other { code, .. } => *code,
                }
            }

            pub fn name(&self) -> &str {
                match self {
                    $(Self::$variant => $name,)*
                    Self::Other { name, .. } => name,
                }
            }

            /// Declared stack effect, or `None` when it depends on a type
            /// signature or a block structure.
            pub fn stack_effect(&self) -> Option<StackEffect> {
                match self {
                    $(Self::$variant => $effect,)*
                    Self::Other { .. } => None,
                }
            }
        }
    };
}

opcodes! {
    Unreachable = 0x00, "unreachable", None;
    Nop = 0x01, "nop", fx(0, 0);
    Block = 0x02, "block", None;
    Loop = 0x03, "loop", None;
    If = 0x04, "if", None;
    Else = 0x05, "else", None;
    End = 0x0b, "end", fx(0, 0);
    Br = 0x0c, "br", None;
    BrIf = 0x0d, "br_if", None;
    BrTable = 0x0e, "br_table", None;
    Return = 0x0f, "return", None;
    Call = 0x10, "call", None;
    CallIndirect = 0x11, "call_indirect", None;
    ReturnCall = 0x12, "return_call", None;
    ReturnCallIndirect = 0x13, "return_call_indirect", None;
    Drop = 0x1a, "drop", fx(1, 0);
    Select = 0x1b, "select", fx(3, 1);
    LocalGet = 0x20, "local.get", fx(0, 1);
    LocalSet = 0x21, "local.set", fx(1, 0);
    LocalTee = 0x22, "local.tee", fx(1, 1);
    GlobalGet = 0x23, "global.get", fx(0, 1);
    GlobalSet = 0x24, "global.set", fx(1, 0);
    I32Load = 0x28, "i32.load", fx(1, 1);
    I64Load = 0x29, "i64.load", fx(1, 1);
    I32Store = 0x36, "i32.store", fx(2, 0);
    I64Store = 0x37, "i64.store", fx(2, 0);
    I32Const = 0x41, "i32.const", fx(0, 1);
    I64Const = 0x42, "i64.const", fx(0, 1);
    I32Add = 0x6a, "i32.add", fx(2, 1);
    I32Sub = 0x6b, "i32.sub", fx(2, 1);
    I32ShrU = 0x76, "i32.shr_u", fx(2, 1);
    I64Add = 0x7c, "i64.add", fx(2, 1);
    I64Sub = 0x7d, "i64.sub", fx(2, 1);
    I64ShrU = 0x88, "i64.shr_u", fx(2, 1);
    I32WrapI64 = 0xa7, "i32.wrap_i64", fx(1, 1);
    I64ExtendI32U = 0xad, "i64.extend_i32_u", fx(1, 1);
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    I32(i32),
    I64(i64),
    Func(u32),
    Type(u32),
    Table(u32),
    Global(u32),
    Local(u32),
    Label(u32),
    /// `align` is the log2 alignment as encoded.
    MemArg { align: u8, offset: u64, memory: u32 },
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(value) => write!(f, "{value}"),
            Self::I64(value) => write!(f, "{value}"),
            Self::Type(index) => write!(f, "(type {index})"),
            Self::Table(index) => write!(f, "(table {index})"),
            Self::Func(index) | Self::Global(index) | Self::Local(index) | Self::Label(index) => {
                write!(f, "{index}")
            }
            Self::MemArg { align, offset, .. } => {
                write!(f, "offset={offset} align={}", 1u64 << align)
            }
        }
    }
}

/// A single decoded operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub immediates: SmallVec<[Immediate; 2]>,
    /// Byte offset from the start of the enclosing body or expression.
    pub offset: u32,
    /// Encoded length in bytes.
    pub len: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, immediates: SmallVec<[Immediate; 2]>) -> Self {
        Self {
            opcode,
            immediates,
            offset: 0,
            len: 0,
        }
    }

    pub fn with_span(mut self, offset: u32, len: u32) -> Self {
        self.offset = offset;
        self.len = len;
        self
    }

    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, SmallVec::new())
    }

    pub fn i32_const(value: i32) -> Self {
        Self::new(Opcode::I32Const, smallvec![Immediate::I32(value)])
    }

    pub fn i64_const(value: i64) -> Self {
        Self::new(Opcode::I64Const, smallvec![Immediate::I64(value)])
    }

    pub fn global_get(index: u32) -> Self {
        Self::new(Opcode::GlobalGet, smallvec![Immediate::Global(index)])
    }

    pub fn global_set(index: u32) -> Self {
        Self::new(Opcode::GlobalSet, smallvec![Immediate::Global(index)])
    }

    pub fn local_get(index: u32) -> Self {
        Self::new(Opcode::LocalGet, smallvec![Immediate::Local(index)])
    }

    pub fn call(func: u32) -> Self {
        Self::new(Opcode::Call, smallvec![Immediate::Func(func)])
    }

    pub fn call_indirect(type_index: u32, table_index: u32) -> Self {
        Self::new(
            Opcode::CallIndirect,
            smallvec![Immediate::Type(type_index), Immediate::Table(table_index)],
        )
    }

    pub fn i64_store(align: u8, offset: u64) -> Self {
        Self::new(
            Opcode::I64Store,
            smallvec![Immediate::MemArg {
                align,
                offset,
                memory: 0
            }],
        )
    }

    pub fn end() -> Self {
        Self::simple(Opcode::End)
    }

    pub fn name(&self) -> &str {
        self.opcode.name()
    }

    pub fn stack_effect(&self) -> Option<StackEffect> {
        self.opcode.stack_effect()
    }

    /// Direct callee of a `call` or `return_call`.
    pub fn callee(&self) -> Option<FuncIndex> {
        if !matches!(self.opcode, Opcode::Call | Opcode::ReturnCall) {
            return None;
        }
        self.immediates.iter().find_map(|imm| match imm {
            Immediate::Func(index) => Some(FuncIndex::from_u32(*index)),
            _ => None,
        })
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Call | Opcode::CallIndirect | Opcode::ReturnCall | Opcode::ReturnCallIndirect
        )
    }

    pub fn i32_imm(&self) -> Option<i32> {
        self.immediates.iter().find_map(|imm| match imm {
            Immediate::I32(value) => Some(*value),
            _ => None,
        })
    }

    pub fn i64_imm(&self) -> Option<i64> {
        self.immediates.iter().find_map(|imm| match imm {
            Immediate::I64(value) => Some(*value),
            _ => None,
        })
    }

    pub fn global_imm(&self) -> Option<u32> {
        self.immediates.iter().find_map(|imm| match imm {
            Immediate::Global(index) => Some(*index),
            _ => None,
        })
    }

    fn from_operator(op: &Operator<'_>, code: u8) -> Self {
        use Immediate as Imm;

        let (opcode, immediates): (Opcode, SmallVec<[Immediate; 2]>) = match *op {
            Operator::Unreachable => (Opcode::Unreachable, smallvec![]),
            Operator::Nop => (Opcode::Nop, smallvec![]),
            Operator::Block { .. } => (Opcode::Block, smallvec![]),
            Operator::Loop { .. } => (Opcode::Loop, smallvec![]),
            Operator::If { .. } => (Opcode::If, smallvec![]),
            Operator::Else => (Opcode::Else, smallvec![]),
            Operator::End => (Opcode::End, smallvec![]),
            Operator::Br { relative_depth } => (Opcode::Br, smallvec![Imm::Label(relative_depth)]),
            Operator::BrIf { relative_depth } => {
                (Opcode::BrIf, smallvec![Imm::Label(relative_depth)])
            }
            Operator::BrTable { .. } => (Opcode::BrTable, smallvec![]),
            Operator::Return => (Opcode::Return, smallvec![]),
            Operator::Call { function_index } => (Opcode::Call, smallvec![Imm::Func(function_index)]),
            Operator::CallIndirect {
                type_index,
                table_index,
                ..
            } => (
                Opcode::CallIndirect,
                smallvec![Imm::Type(type_index), Imm::Table(table_index)],
            ),
            Operator::ReturnCall { function_index } => {
                (Opcode::ReturnCall, smallvec![Imm::Func(function_index)])
            }
            Operator::ReturnCallIndirect {
                type_index,
                table_index,
            } => (
                Opcode::ReturnCallIndirect,
                smallvec![Imm::Type(type_index), Imm::Table(table_index)],
            ),
            Operator::Drop => (Opcode::Drop, smallvec![]),
            Operator::Select => (Opcode::Select, smallvec![]),
            Operator::LocalGet { local_index } => {
                (Opcode::LocalGet, smallvec![Imm::Local(local_index)])
            }
            Operator::LocalSet { local_index } => {
                (Opcode::LocalSet, smallvec![Imm::Local(local_index)])
            }
            Operator::LocalTee { local_index } => {
                (Opcode::LocalTee, smallvec![Imm::Local(local_index)])
            }
            Operator::GlobalGet { global_index } => {
                (Opcode::GlobalGet, smallvec![Imm::Global(global_index)])
            }
            Operator::GlobalSet { global_index } => {
                (Opcode::GlobalSet, smallvec![Imm::Global(global_index)])
            }
            Operator::I32Load { memarg } => (Opcode::I32Load, smallvec![mem_imm(&memarg)]),
            Operator::I64Load { memarg } => (Opcode::I64Load, smallvec![mem_imm(&memarg)]),
            Operator::I32Store { memarg } => (Opcode::I32Store, smallvec![mem_imm(&memarg)]),
            Operator::I64Store { memarg } => (Opcode::I64Store, smallvec![mem_imm(&memarg)]),
            Operator::I32Const { value } => (Opcode::I32Const, smallvec![Imm::I32(value)]),
            Operator::I64Const { value } => (Opcode::I64Const, smallvec![Imm::I64(value)]),
            Operator::I32Add => (Opcode::I32Add, smallvec![]),
            Operator::I32Sub => (Opcode::I32Sub, smallvec![]),
            Operator::I32ShrU => (Opcode::I32ShrU, smallvec![]),
            Operator::I64Add => (Opcode::I64Add, smallvec![]),
            Operator::I64Sub => (Opcode::I64Sub, smallvec![]),
            Operator::I64ShrU => (Opcode::I64ShrU, smallvec![]),
            Operator::I32WrapI64 => (Opcode::I32WrapI64, smallvec![]),
            Operator::I64ExtendI32U => (Opcode::I64ExtendI32U, smallvec![]),
            ref other => (
                Opcode::Other {
                    code,
                    name: operator_name(other),
                },
                smallvec![],
            ),
        };

        Self::new(opcode, immediates)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.name())?;
        for imm in &self.immediates {
            write!(f, " {imm}")?;
        }
        Ok(())
    }
}

fn mem_imm(memarg: &MemArg) -> Immediate {
    Immediate::MemArg {
        align: memarg.align,
        offset: memarg.offset,
        memory: memarg.memory,
    }
}

/// Text-format name of an operator we don't model, derived from the variant
/// name that leads `Operator`'s debug form.
fn operator_name(op: &Operator<'_>) -> Box<str> {
    let debug = format!("{op:?}");
    let end = debug
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(debug.len());
    text_name(&debug[..end]).into()
}

/// Prefixes that the text format separates from the operation with a dot.
const NAMESPACES: &[&str] = &[
    "i32", "i64", "f32", "f64", "v128", "i8x16", "i16x8", "i32x4", "i64x2", "f32x4", "f64x2",
    "memory", "table", "local", "global", "ref", "elem", "data",
];

/// `I32TruncF32S` becomes `i32.trunc_f32_s`, `CallRef` becomes `call_ref`.
///
/// Multi-level names such as `i32.atomic.rmw.add` come out with underscores
/// past the first dot.
fn text_name(variant: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    for (index, c) in variant.char_indices().skip(1) {
        if c.is_ascii_uppercase() {
            words.push(&variant[start..index]);
            start = index;
        }
    }
    words.push(&variant[start..]);

    let head = words[0].to_ascii_lowercase();
    let tail = words[1..].join("_").to_ascii_lowercase();
    if tail.is_empty() {
        head
    } else if NAMESPACES.contains(&head.as_str()) {
        format!("{head}.{tail}")
    } else {
        format!("{head}_{tail}")
    }
}

/// Decodes every operator of `reader`. `bytes` is the whole module, `base`
/// the absolute offset spans are made relative to.
pub(crate) fn decode_operators(
    mut reader: OperatorsReader<'_>,
    bytes: &[u8],
    base: usize,
) -> Result<Vec<Instruction>, DecodeError> {
    let mut insts = Vec::new();
    let mut starts = Vec::new();

    while !reader.eof() {
        let (op, offset) = reader.read_with_offset()?;
        let code = *bytes.get(offset).ok_or(DecodeError::Truncated { offset })?;
        insts.push(Instruction::from_operator(&op, code));
        starts.push(offset);
    }
    let end = reader.original_position();

    let stops = starts.iter().skip(1).copied().chain(std::iter::once(end));
    for ((inst, start), stop) in insts.iter_mut().zip(starts.iter().copied()).zip(stops) {
        inst.offset = (start - base) as u32;
        inst.len = (stop - start) as u32;
    }

    Ok(insts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_is_consistent() {
        assert_eq!(Opcode::I32Const.code(), 0x41);
        assert_eq!(Opcode::I32ShrU.name(), "i32.shr_u");
        assert_eq!(Opcode::GlobalSet.stack_effect(), Some(StackEffect::new(1, 0)));
        assert_eq!(Opcode::Call.stack_effect(), None);

        let other = Opcode::Other {
            code: 0x6c,
            name: "i32.mul".into(),
        };
        assert_eq!(other.code(), 0x6c);
        assert_eq!(other.name(), "i32.mul");
        assert_eq!(other.stack_effect(), None);
    }

    #[test]
    fn variant_names_map_to_text_format() {
        assert_eq!(text_name("I32Mul"), "i32.mul");
        assert_eq!(text_name("I64Load8U"), "i64.load8_u");
        assert_eq!(text_name("F32ConvertI32S"), "f32.convert_i32_s");
        assert_eq!(text_name("MemoryGrow"), "memory.grow");
        assert_eq!(text_name("RefIsNull"), "ref.is_null");
        assert_eq!(text_name("CallRef"), "call_ref");
        assert_eq!(text_name("I32x4Add"), "i32x4.add");
        assert_eq!(text_name("Try"), "try");
    }

    #[test]
    fn display_includes_immediates() {
        assert_eq!(Instruction::i32_const(-4).to_string(), "i32.const -4");
        assert_eq!(
            Instruction::call_indirect(2, 0).to_string(),
            "call_indirect (type 2) (table 0)"
        );
        assert_eq!(
            Instruction::i64_store(3, 0).to_string(),
            "i64.store offset=0 align=8"
        );
    }

    #[test]
    fn callee_only_for_direct_calls() {
        assert_eq!(Instruction::call(3).callee(), Some(FuncIndex::from_u32(3)));
        let tail = Instruction::new(Opcode::ReturnCall, smallvec![Immediate::Func(4)]);
        assert_eq!(tail.callee(), Some(FuncIndex::from_u32(4)));
        assert!(tail.is_call());
        assert_eq!(Instruction::call_indirect(0, 0).callee(), None);
        assert!(Instruction::call_indirect(0, 0).is_call());
    }
}
