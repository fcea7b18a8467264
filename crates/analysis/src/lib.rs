mod cache;
mod config;
mod error;
mod expr;
mod names;
mod report;
mod slice;
mod stubs;
mod table;
mod validate;

pub use cache::DisasmCache;
pub use config::{SplitConfig, StubShape, GO_RUNTIME_PREFIXES};
pub use error::{ExprError, Site, SplitError};
pub use expr::{evaluate, ExprOp, ValueStack};
pub use names::NameTable;
pub use report::SplitReport;
pub use slice::find_slice_start;
pub use stubs::{estimate_stubs, ShapeStats, StubEstimate, StubKind};
pub use table::{FunctionTable, TableBuildError, MAX_TABLE_SLOTS};
pub use validate::{CandidateSet, SplitStats, Splitter};

use fission_module::Module;

/// Runs the whole analysis with `config` over an already decoded module.
pub fn analyze(module: &Module<'_>, config: SplitConfig) -> Result<SplitReport, SplitError> {
    Splitter::new(module, config)?.run()
}
