//! Process-wide entry points for binding debug contexts.
//!
//! These go through [`crate::registry::global`]; embedders that need an
//! isolated registry call the same operations on their own
//! [`ContextRegistry`].

use std::sync::Arc;

use crate::abi::HandleAbi;
use crate::context::DebugContext;
use crate::error::DebugError;
use crate::registry::{self, ContextRegistry};

/// Returns the unique debug context wrapping `universal`, binding one on
/// first use.
pub fn bind(universal: Arc<dyn HandleAbi>) -> Result<Arc<DebugContext>, DebugError> {
    registry::global().bind(universal)
}

/// Like [`bind`] but never creates a binding.
pub fn get_ctx(universal: &dyn HandleAbi) -> Option<Arc<DebugContext>> {
    registry::global().get(universal.ctx_id())
}

/// Registers a debug context built with [`DebugContext::new`].
pub fn set_ctx(dctx: Arc<DebugContext>) -> Result<Arc<DebugContext>, DebugError> {
    registry::global().install(dctx)
}

/// Builds a debug context for `universal` using `registry`'s configuration
/// without registering it.
pub fn ctx_init(registry: &ContextRegistry, universal: Arc<dyn HandleAbi>) -> DebugContext {
    DebugContext::new(universal, registry.config().clone())
}
