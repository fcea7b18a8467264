use std::fmt;

use fission_module::{encoded_len, helper_call_len, prelude::*};
use indexmap::IndexMap;

use crate::{DisasmCache, SplitError, StubShape};

/// Recurring call-site shapes that a shared helper could replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StubKind {
    /// Frame push and return-address store ahead of a call.
    CallPrologue,
    /// Frame pop ahead of `return`.
    ReturnEpilogue,
}

impl StubKind {
    pub const ALL: [Self; 2] = [Self::CallPrologue, Self::ReturnEpilogue];
}

impl fmt::Display for StubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallPrologue => f.write_str("call prologue"),
            Self::ReturnEpilogue => f.write_str("return epilogue"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeStats {
    pub sites: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubEstimate {
    pub shapes: IndexMap<StubKind, ShapeStats>,
    /// Encoded size of one call to the shared helper.
    pub helper_call_len: usize,
}

impl StubEstimate {
    fn new(helper_call_len: usize) -> Self {
        Self {
            shapes: StubKind::ALL
                .into_iter()
                .map(|kind| (kind, ShapeStats::default()))
                .collect(),
            helper_call_len,
        }
    }

    pub fn sites(&self) -> usize {
        self.shapes.values().map(|stats| stats.sites).sum()
    }

    pub fn bytes(&self) -> usize {
        self.shapes.values().map(|stats| stats.bytes).sum()
    }

    /// Matched bytes minus the calls that would replace them. Negative when
    /// the matched sequences are shorter than the helper call.
    pub fn savings(&self) -> i64 {
        self.bytes() as i64 - (self.sites() * self.helper_call_len) as i64
    }
}

#[derive(Debug, Clone)]
enum Pat {
    Op(Opcode),
    GlobalGet(u32),
    GlobalSet(u32),
    I32Const(i32),
    AnyI64Const,
    AnyI64Store,
}

impl Pat {
    fn matches(&self, inst: &Instruction) -> bool {
        match *self {
            Self::Op(ref opcode) => inst.opcode == *opcode,
            Self::GlobalGet(sp) => {
                inst.opcode == Opcode::GlobalGet && inst.global_imm() == Some(sp)
            }
            Self::GlobalSet(sp) => {
                inst.opcode == Opcode::GlobalSet && inst.global_imm() == Some(sp)
            }
            Self::I32Const(value) => {
                inst.opcode == Opcode::I32Const && inst.i32_imm() == Some(value)
            }
            Self::AnyI64Const => inst.opcode == Opcode::I64Const,
            Self::AnyI64Store => inst.opcode == Opcode::I64Store,
        }
    }
}

struct Matcher {
    kind: StubKind,
    body: Vec<Pat>,
    terminator: fn(&Opcode) -> bool,
}

impl Matcher {
    fn for_shape(shape: StubShape) -> [Self; 2] {
        let sp = shape.sp_global;
        let frame = shape.frame_size;
        [
            Self {
                kind: StubKind::CallPrologue,
                body: vec![
                    Pat::GlobalGet(sp),
                    Pat::I32Const(frame),
                    Pat::Op(Opcode::I32Sub),
                    Pat::GlobalSet(sp),
                    Pat::GlobalGet(sp),
                    Pat::AnyI64Const,
                    Pat::AnyI64Store,
                ],
                terminator: |op| matches!(op, Opcode::Call | Opcode::CallIndirect),
            },
            Self {
                kind: StubKind::ReturnEpilogue,
                body: vec![
                    Pat::GlobalGet(sp),
                    Pat::I32Const(frame),
                    Pat::Op(Opcode::I32Add),
                    Pat::GlobalSet(sp),
                    Pat::I32Const(0),
                ],
                terminator: |op| matches!(op, Opcode::Return),
            },
        ]
    }

    /// Sequence ending right before the terminator at `at`, if it matches.
    fn match_before<'i>(
        &self,
        insts: &'i [Instruction],
        at: usize,
    ) -> Option<&'i [Instruction]> {
        let len = self.body.len();
        if at < len || !(self.terminator)(&insts[at].opcode) {
            return None;
        }

        let window = &insts[at - len..at];
        window
            .iter()
            .zip(&self.body)
            .all(|(inst, pat)| pat.matches(inst))
            .then_some(window)
    }
}

/// Counts stub shapes across every body of the module, candidates or not.
#[tracing::instrument(skip_all)]
pub fn estimate_stubs(
    cache: &DisasmCache<'_, '_>,
    space: IndexSpace,
    shape: StubShape,
) -> Result<StubEstimate, SplitError> {
    let matchers = Matcher::for_shape(shape);
    let mut estimate = StubEstimate::new(helper_call_len(space.total()));

    for code in space.iter_codes() {
        let insts = cache.disassemble(code)?;
        for at in 0..insts.len() {
            for matcher in &matchers {
                let Some(window) = matcher.match_before(&insts, at) else {
                    continue;
                };
                let bytes = encoded_len(window)?;
                let stats = estimate.shapes.entry(matcher.kind).or_default();
                stats.sites += 1;
                stats.bytes += bytes;
            }
        }
    }

    tracing::debug!(
        sites = estimate.sites(),
        bytes = estimate.bytes(),
        savings = estimate.savings(),
        "estimated stub savings"
    );
    Ok(estimate)
}
