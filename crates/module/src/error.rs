use thiserror::Error;
use wasmparser::BinaryReaderError;

use crate::CodeIndex;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Reader(#[from] BinaryReaderError),

    #[error("{index} does not exist, module has {bodies} function bodies")]
    BodyOutOfRange { index: CodeIndex, bodies: usize },

    #[error("instruction at offset {offset:#x} lies outside the module")]
    Truncated { offset: usize },

    #[error("element segment {segment} holds an item that is neither `ref.func` nor `ref.null`")]
    UnsupportedElementItem { segment: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("`{name}` has no encoding")]
    Unsupported { name: String },

    #[error("`{name}` is missing its immediate operand")]
    MissingImmediate { name: String },
}
