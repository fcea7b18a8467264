use std::fmt;

use crate::{SplitStats, StubEstimate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub stats: SplitStats,
    pub stubs: Option<StubEstimate>,
}

impl SplitReport {
    /// Share of the module's body bytes that moves out, in percent.
    pub fn split_ratio(&self) -> f64 {
        if self.stats.total_bytes == 0 {
            return 0.0;
        }
        self.stats.split_bytes as f64 * 100.0 / self.stats.total_bytes as f64
    }
}

impl fmt::Display for SplitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        writeln!(f, "functions: {}", stats.functions)?;
        writeln!(
            f,
            "calls: {} direct, {} indirect, {} to {} distinct imports",
            stats.direct_calls, stats.indirect_calls, stats.import_calls, stats.imports_used
        )?;
        write!(
            f,
            "will split {}/{} body bytes ({:.1}%)",
            stats.split_bytes,
            stats.total_bytes,
            self.split_ratio()
        )?;

        if let Some(stubs) = &self.stubs {
            for (kind, shape) in &stubs.shapes {
                write!(f, "\n{kind}: {} sites, {} bytes", shape.sites, shape.bytes)?;
            }
            write!(
                f,
                "\nstub savings: {} bytes at {} bytes per helper call",
                stubs.savings(),
                stubs.helper_call_len
            )?;
        }

        Ok(())
    }
}
