//! Debug-mode handle validation.
//!
//! A [`DebugContext`] wraps a universal context behind the same
//! [`HandleAbi`] operation table. Every handle that crosses it is translated
//! through a generational [`HandleTable`], so use-after-close, double close,
//! stale or foreign handles, and leaks are reported instead of corrupting the
//! universal context.

pub mod abi;
pub mod binder;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod handle;
mod interceptor;
pub mod leak;
pub mod module_entry;
pub mod registry;
pub mod table;
pub mod universal;

pub use abi::{AbiError, ContextId, HandleAbi, OpId};
pub use binder::{bind, ctx_init, get_ctx, set_ctx};
pub use config::{BindPolicy, DebugConfig, InvalidHandlePolicy};
pub use context::{DebugContext, InvalidHandleHook};
pub use diagnostics::{Diagnostic, DiagnosticCode, Severity};
pub use error::{DebugError, InvalidReason};
pub use handle::{DebugHandle, Handle, HandleEntry};
pub use leak::{LeakDetector, LeakError, LeakReport, LeakedHandle};
pub use registry::ContextRegistry;
pub use table::HandleTable;
pub use universal::MemoryUniversal;
