//! Leak detection.
//!
//! Every entry is stamped with the context's leak generation when it is
//! opened. Starting a new generation and later listing the handles opened
//! since then that are still alive gives the handles leaked by the code that
//! ran in between.

use std::fmt;

use serde::{Deserialize, Serialize};

use hdebug_contracts::HDEBUG_LEAK_REPORT_SCHEMA_VERSION;

use crate::abi::ContextId;
use crate::context::{lock, DebugContext};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::handle::Handle;
use crate::table::OpenHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakedHandle {
    pub handle: Handle,
    pub underlying: Handle,
    pub opened_in: u64,
}

impl From<OpenHandle> for LeakedHandle {
    fn from(o: OpenHandle) -> Self {
        LeakedHandle {
            handle: o.handle,
            underlying: o.underlying,
            opened_in: o.opened_in,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakReport {
    pub schema_version: String,
    pub context: ContextId,
    pub generation: u64,
    pub leaks: Vec<LeakedHandle>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.leaks
            .iter()
            .map(|l| Diagnostic {
                handle: Some(l.handle),
                context: Some(self.context),
                ..Diagnostic::new(
                    DiagnosticCode::HDBG0200LeakedHandle,
                    format!(
                        "handle {} (universal {}) opened in generation {} was never closed",
                        l.handle, l.underlying, l.opened_in
                    ),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakError {
    pub leaks: Vec<LeakedHandle>,
}

impl fmt::Display for LeakError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handle(s) still open:", self.leaks.len())?;
        for l in &self.leaks {
            write!(f, " {}", l.handle)?;
        }
        Ok(())
    }
}

impl std::error::Error for LeakError {}

impl DebugContext {
    pub fn leak_generation(&self) -> u64 {
        lock(&self.table).leak_generation()
    }

    /// Starts a new leak generation and returns it.
    pub fn new_generation(&self) -> u64 {
        lock(&self.table).new_generation()
    }

    /// Alive handles opened in generation `since` or later.
    pub fn open_handles(&self, since: u64) -> Vec<LeakedHandle> {
        lock(&self.table)
            .open_handles(since)
            .into_iter()
            .map(LeakedHandle::from)
            .collect()
    }

    /// Every handle still open, for teardown reporting.
    pub fn leak_report(&self) -> LeakReport {
        let table = lock(&self.table);
        LeakReport {
            schema_version: HDEBUG_LEAK_REPORT_SCHEMA_VERSION.to_string(),
            context: self.id,
            generation: table.leak_generation(),
            leaks: table
                .open_handles(0)
                .into_iter()
                .map(LeakedHandle::from)
                .collect(),
        }
    }
}

/// Scoped leak check: handles opened between [`LeakDetector::start`] and
/// [`LeakDetector::stop`] must all be closed by the time `stop` runs.
pub struct LeakDetector<'a> {
    ctx: &'a DebugContext,
    generation: u64,
}

impl<'a> LeakDetector<'a> {
    pub fn start(ctx: &'a DebugContext) -> Self {
        let generation = ctx.new_generation();
        LeakDetector { ctx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stop(self) -> Result<(), LeakError> {
        let leaks = self.ctx.open_handles(self.generation);
        // Later handles belong to whoever runs next.
        self.ctx.new_generation();
        if leaks.is_empty() {
            Ok(())
        } else {
            for l in &leaks {
                tracing::warn!(ctx = %self.ctx.id(), handle = %l.handle, "leaked handle");
            }
            Err(LeakError { leaks })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::abi::HandleAbi;
    use crate::config::DebugConfig;
    use crate::universal::MemoryUniversal;

    fn ctx() -> DebugContext {
        DebugContext::new(Arc::new(MemoryUniversal::new("mem")), DebugConfig::default())
    }

    #[test]
    fn detector_ignores_handles_from_before_start() {
        let d = ctx();
        let outer = d.from_i64(1).unwrap();

        let det = LeakDetector::start(&d);
        let inner = d.from_i64(2).unwrap();
        d.close(inner).unwrap();
        assert!(det.stop().is_ok());

        assert_eq!(d.open_handles(0).len(), 1);
        d.close(outer).unwrap();
    }

    #[test]
    fn detector_reports_leaks() {
        let d = ctx();
        let det = LeakDetector::start(&d);
        let g = det.generation();
        let leaked = d.from_i64(3).unwrap();
        let err = det.stop().unwrap_err();
        assert_eq!(err.leaks.len(), 1);
        assert_eq!(err.leaks[0].handle, leaked);
        assert_eq!(err.leaks[0].opened_in, g);
        assert!(err.to_string().starts_with("1 handle(s) still open:"));
        // stop() moved to a fresh generation.
        assert!(d.open_handles(d.leak_generation()).is_empty());
    }

    #[test]
    fn leak_report_lists_everything_open() {
        let d = ctx();
        let a = d.from_i64(1).unwrap();
        let b = d.from_i64(2).unwrap();
        d.close(a).unwrap();
        let report = d.leak_report();
        assert_eq!(report.schema_version, HDEBUG_LEAK_REPORT_SCHEMA_VERSION);
        assert!(!report.is_clean());
        assert_eq!(report.leaks.len(), 1);
        assert_eq!(report.leaks[0].handle, b);
        let diags = report.diagnostics();
        assert_eq!(diags[0].code, DiagnosticCode::HDBG0200LeakedHandle);
        assert_eq!(diags[0].handle, Some(b));

        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["leaks"][0]["handle"], serde_json::json!(b.raw()));
    }
}
