//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O (replay traces, reports, diagnostics).

pub const HDEBUG_TRACE_SCHEMA_VERSION: &str = "hdebug.trace@0.1.0";
pub const HDEBUG_REPORT_SCHEMA_VERSION: &str = "hdebug.report@0.1.0";
pub const HDEBUG_DIAG_SCHEMA_VERSION: &str = "hdebug.diag@0.1.0";
pub const HDEBUG_LEAK_REPORT_SCHEMA_VERSION: &str = "hdebug.leak-report@0.1.0";

/// Version of the `hdebug_ctx` C table layout.
pub const HDEBUG_ABI_VERSION: u32 = 1;
