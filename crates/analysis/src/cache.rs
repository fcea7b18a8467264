use std::sync::Arc;

use dashmap::DashMap;
use fission_module::{prelude::*, DecodeError, Module};

use crate::{NameTable, SplitError};

/// Memoized disassembly of function bodies.
///
/// Each body is decoded at most once; concurrent callers asking for the same
/// body wait on its shard while the first one decodes it.
pub struct DisasmCache<'m, 'a> {
    module: &'m Module<'a>,
    entries: DashMap<CodeIndex, Arc<[Instruction]>>,
}

impl<'m, 'a> DisasmCache<'m, 'a> {
    pub fn new(module: &'m Module<'a>) -> Self {
        Self {
            module,
            entries: DashMap::new(),
        }
    }

    pub fn disassemble(&self, code: CodeIndex) -> Result<Arc<[Instruction]>, DecodeError> {
        if let Some(insts) = self.entries.get(&code) {
            return Ok(insts.value().clone());
        }

        let entry = self.entries.entry(code).or_try_insert_with(|| {
            tracing::trace!(%code, "disassembling body");
            self.module.disassemble(code).map(Arc::from)
        })?;
        Ok(entry.value().clone())
    }

    /// Like [`Self::disassemble`] but addressed in the function index space.
    pub fn disassemble_func(
        &self,
        func: FuncIndex,
        names: &NameTable,
    ) -> Result<Arc<[Instruction]>, SplitError> {
        let space = names.space();
        if space.is_import(func) {
            return Err(SplitError::ImportNotDisassemblable {
                func,
                name: names.display(func),
            });
        }

        let code = space.to_code(func).ok_or(DecodeError::BodyOutOfRange {
            index: CodeIndex::from_u32(func.as_u32() - space.func_imports()),
            bodies: space.bodies() as usize,
        })?;
        Ok(self.disassemble(code)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
