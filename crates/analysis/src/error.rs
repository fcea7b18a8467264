use std::fmt;

use fission_module::{DecodeError, EncodeError, FuncIndex};
use thiserror::Error;

use crate::table::TableBuildError;

/// Failure while evaluating or delimiting a constant expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unsupported operation `{0}`")]
    Unsupported(String),

    #[error("malformed expression: {0}")]
    Malformed(String),
}

impl ExprError {
    /// Attaches the body position the expression was taken from.
    pub fn at(self, site: Site) -> SplitError {
        match self {
            Self::Unsupported(op) => SplitError::UnsupportedOperation { op, site },
            Self::Malformed(reason) => SplitError::MalformedExpression { reason, site },
        }
    }
}

/// An instruction inside a named function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub func: FuncIndex,
    pub name: String,
    /// Position of the instruction in the disassembled body.
    pub inst: usize,
    pub opcode: String,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` (instruction {}) in {} ({})",
            self.opcode, self.inst, self.name, self.func
        )
    }
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("module has no `name` custom section")]
    NameSectionMissing,

    #[error("`name` section has no function names")]
    NoFunctionNames,

    #[error("{name} ({func}) is imported and has no body to disassemble")]
    ImportNotDisassemblable { func: FuncIndex, name: String },

    #[error("unsupported operation `{op}` while resolving {site}")]
    UnsupportedOperation { op: String, site: Site },

    #[error("malformed expression feeding {site}: {reason}")]
    MalformedExpression { reason: String, site: Site },

    #[error("cannot resolve the target of {site}")]
    UnresolvedIndirectTarget { site: Site },

    #[error("function table: {0}")]
    TableBuild(#[from] TableBuildError),

    #[error("{site} reads the function table: {source}")]
    TableLookup {
        #[source]
        source: TableBuildError,
        site: Site,
    },

    #[error(
        "{caller_name} ({caller}) calls {callee_name} ({callee}), which is neither imported nor selected"
    )]
    ExternalCallViolation {
        caller: FuncIndex,
        callee: FuncIndex,
        caller_name: String,
        callee_name: String,
    },

    #[error("{site} targets {callee}, past the {total} functions of the module")]
    CalleeOutOfRange {
        callee: FuncIndex,
        total: u32,
        site: Site,
    },

    #[error("no function matches the selected prefixes")]
    EmptyCandidateSet,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}
