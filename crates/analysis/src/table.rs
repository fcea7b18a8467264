use fission_module::{prelude::*, Module, SegmentKind};
use thiserror::Error;

use crate::{evaluate, ExprError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableBuildError {
    #[error("empty table: no element segment populates table 0")]
    Empty,

    #[error("slot {slot} is past the end of the {size}-slot table")]
    SlotOutOfRange { slot: u64, size: usize },

    #[error("slot {slot} holds `ref.null`")]
    NullSlot { slot: u64 },

    #[error("segment {segment} places {len} functions at {offset}, past the {size}-slot table")]
    SegmentOverflow {
        segment: usize,
        offset: u64,
        len: usize,
        size: usize,
    },

    #[error("offset of segment {segment}: {source}")]
    Offset {
        segment: usize,
        #[source]
        source: ExprError,
    },

    #[error("offset of segment {segment} evaluates to {count} values")]
    OffsetArity { segment: usize, count: usize },

    #[error("declared table size {size} exceeds the {max}-slot limit", max = MAX_TABLE_SLOTS)]
    TooLarge { size: u64 },
}

/// Largest table reconstructed, matching the JS embedding's table limit.
pub const MAX_TABLE_SLOTS: u64 = 10_000_000;

/// Table 0 as laid out by the active element segments.
///
/// Slots no segment covers hold function 0; `None` marks a `ref.null` item.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    slots: Vec<Option<FuncIndex>>,
    applied: usize,
}

impl FunctionTable {
    pub fn build(module: &Module<'_>) -> Result<Self, TableBuildError> {
        let declared = module.table().map_or(0, |table| table.initial);
        if declared > MAX_TABLE_SLOTS {
            return Err(TableBuildError::TooLarge { size: declared });
        }
        let size = declared as usize;

        let mut table = Self {
            slots: vec![Some(FuncIndex::from_u32(0)); size],
            applied: 0,
        };

        for (segment, element) in module.elements().iter().enumerate() {
            let SegmentKind::Active {
                table: target,
                offset,
            } = &element.kind
            else {
                continue;
            };

            if *target != 0 {
                tracing::warn!(segment, table = target, "skipping segment for another table");
                continue;
            }

            let values =
                evaluate(offset).map_err(|source| TableBuildError::Offset { segment, source })?;
            let &[start] = values.as_slice() else {
                return Err(TableBuildError::OffsetArity {
                    segment,
                    count: values.len(),
                });
            };

            // Later segments overwrite earlier ones.
            table.place(segment, start, &element.funcs)?;
        }

        tracing::debug!(size, segments = table.applied, "built function table");
        Ok(table)
    }

    fn place(
        &mut self,
        segment: usize,
        offset: u64,
        funcs: &[Option<FuncIndex>],
    ) -> Result<(), TableBuildError> {
        let overflow = || TableBuildError::SegmentOverflow {
            segment,
            offset,
            len: funcs.len(),
            size: self.slots.len(),
        };

        let start = usize::try_from(offset).map_err(|_| overflow())?;
        let end = start
            .checked_add(funcs.len())
            .filter(|end| *end <= self.slots.len())
            .ok_or_else(overflow)?;

        self.slots[start..end].copy_from_slice(funcs);
        self.applied += 1;
        Ok(())
    }

    pub fn slot(&self, slot: u64) -> Result<FuncIndex, TableBuildError> {
        if self.applied == 0 {
            return Err(TableBuildError::Empty);
        }

        usize::try_from(slot)
            .ok()
            .and_then(|index| self.slots.get(index).copied())
            .ok_or(TableBuildError::SlotOutOfRange {
                slot,
                size: self.slots.len(),
            })?
            .ok_or(TableBuildError::NullSlot { slot })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn as_slice(&self) -> &[Option<FuncIndex>] {
        &self.slots
    }
}
