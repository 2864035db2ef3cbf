//! Direct-call module initialization.
//!
//! A debug build linked into its host is started by calling its init
//! function, with the same shape a dynamically loaded module's init has,
//! instead of resolving a symbol at runtime.

use std::sync::Arc;

use crate::abi::HandleAbi;
use crate::context::DebugContext;
use crate::error::DebugError;
use crate::registry::{self, ContextRegistry};

pub type ModuleInit = fn(Arc<dyn HandleAbi>) -> Result<Arc<DebugContext>, DebugError>;

/// A statically linked module: its import name and init function.
#[derive(Clone, Copy)]
pub struct ModuleDef {
    pub name: &'static str,
    pub init: ModuleInit,
}

pub const DEBUG_MODULE_NAME: &str = "_debug";

static BUILTIN_MODULES: &[ModuleDef] = &[ModuleDef {
    name: DEBUG_MODULE_NAME,
    init: initialize,
}];

pub fn builtin_modules() -> &'static [ModuleDef] {
    BUILTIN_MODULES
}

pub fn find_builtin(name: &str) -> Option<&'static ModuleDef> {
    BUILTIN_MODULES.iter().find(|m| m.name == name)
}

/// Init function of the debug module, bound through the global registry.
pub fn initialize(universal: Arc<dyn HandleAbi>) -> Result<Arc<DebugContext>, DebugError> {
    initialize_in(registry::global(), universal)
}

pub fn initialize_in(
    registry: &ContextRegistry,
    universal: Arc<dyn HandleAbi>,
) -> Result<Arc<DebugContext>, DebugError> {
    let dctx = registry.bind(universal)?;
    tracing::debug!(module = DEBUG_MODULE_NAME, debug = %dctx.id(), "module initialized");
    Ok(dctx)
}
