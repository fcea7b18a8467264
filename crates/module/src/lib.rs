pub mod encode;
pub mod error;
pub mod index;
pub mod inst;
pub mod module;

pub use encode::{encoded_len, helper_call_len};
pub use error::{DecodeError, EncodeError};
pub use index::{CodeIndex, FuncIndex, IndexSpace};
pub use inst::{Immediate, Instruction, Opcode, StackEffect};
pub use module::{
    ElementSegment, Import, ImportKind, Module, NameSection, Section, SegmentKind, TableDesc,
    TableElement,
};

pub mod prelude {
    pub use crate::{
        index::{CodeIndex, FuncIndex, IndexSpace},
        inst::{Immediate, Instruction, Opcode},
    };
    pub use cranelift_entity::EntityRef;
}
