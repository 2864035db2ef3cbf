//! The debug context and its operation table.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::abi::{AbiError, ContextId, HandleAbi, OpId};
use crate::config::DebugConfig;
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::handle::Handle;
use crate::table::HandleTable;

/// Called with every diagnostic a context records, after it is logged. No
/// context lock is held while it runs, so it may call back into the context.
pub type InvalidHandleHook = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// A context with the universal context's call surface that validates every
/// handle crossing it.
pub struct DebugContext {
    pub(crate) id: ContextId,
    pub(crate) universal: Arc<dyn HandleAbi>,
    pub(crate) name: String,
    pub(crate) config: DebugConfig,
    pub(crate) table: Mutex<HandleTable>,
    pub(crate) diagnostics: Mutex<DiagnosticLog>,
    pub(crate) on_invalid: Mutex<Option<InvalidHandleHook>>,
}

static NEXT_TAG: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DebugContext {
    /// Builds an unbound debug context. Use [`crate::bind`] or
    /// [`crate::ContextRegistry::bind`] to get the registered one.
    pub fn new(universal: Arc<dyn HandleAbi>, config: DebugConfig) -> Self {
        let id = ContextId::fresh();
        let name = format!("{} (debug)", universal.name());
        DebugContext {
            id,
            // Tags cycle through the tag width; only contexts created a full
            // cycle apart share one.
            table: Mutex::new(HandleTable::new(
                NEXT_TAG.fetch_add(1, Ordering::Relaxed),
                config.closed_queue_max,
            )),
            diagnostics: Mutex::new(DiagnosticLog::new(config.diag_max)),
            on_invalid: Mutex::new(None),
            universal,
            name,
            config,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn universal(&self) -> &Arc<dyn HandleAbi> {
        &self.universal
    }

    pub fn universal_id(&self) -> ContextId {
        self.universal.ctx_id()
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn set_on_invalid_handle(&self, hook: Option<InvalidHandleHook>) {
        *lock(&self.on_invalid) = hook;
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).snapshot()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).drain()
    }

    /// Diagnostics evicted from the log because it hit `diag_max`.
    pub fn diagnostics_dropped(&self) -> u64 {
        lock(&self.diagnostics).dropped()
    }

    pub fn open_handle_count(&self) -> usize {
        lock(&self.table).open_count()
    }

    pub fn closed_handles(&self) -> Vec<Handle> {
        lock(&self.table).closed_handles()
    }

    pub fn closed_queue_max(&self) -> usize {
        lock(&self.table).closed_queue_max()
    }

    pub fn set_closed_queue_max(&self, max: usize) {
        lock(&self.table).set_closed_queue_max(max);
    }

    /// Wraps a handle the universal context just produced. If no debug
    /// handle can be issued, the universal handle is closed again so it does
    /// not leak.
    fn open_result(&self, r: Result<Handle, AbiError>) -> Result<Handle, AbiError> {
        let uh = r?;
        match self.open_handle(uh) {
            Ok(dh) => Ok(dh),
            Err(e) => {
                if let Err(close_err) = self.universal.close(uh) {
                    tracing::warn!(ctx = %self.id, %uh, %close_err, "close after failed open");
                }
                Err(e.into())
            }
        }
    }
}

impl fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugContext")
            .field("id", &self.id)
            .field("universal", &self.universal.ctx_id())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl HandleAbi for DebugContext {
    fn ctx_id(&self) -> ContextId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dup(&self, h: Handle) -> Result<Handle, AbiError> {
        let uh = self.unwrap_handle(h)?;
        self.open_result(self.universal.dup(uh))
    }

    // The debug handle is retired before the universal close is forwarded.
    // If that close fails the error is returned but the debug handle stays
    // closed, so a retry reports a double close instead of closing twice.
    fn close(&self, h: Handle) -> Result<(), AbiError> {
        let uh = self.close_handle(h)?;
        if uh.is_null() {
            return Ok(());
        }
        self.universal.close(uh)
    }

    fn from_i64(&self, value: i64) -> Result<Handle, AbiError> {
        self.open_result(self.universal.from_i64(value))
    }

    fn as_i64(&self, h: Handle) -> Result<i64, AbiError> {
        let uh = self.unwrap_handle(h)?;
        self.universal.as_i64(uh)
    }

    fn is(&self, a: Handle, b: Handle) -> Result<bool, AbiError> {
        let ua = self.unwrap_handle(a)?;
        let ub = self.unwrap_handle(b)?;
        self.universal.is(ua, ub)
    }

    fn invoke(&self, op: OpId, args: &[Handle]) -> Result<Handle, AbiError> {
        let uargs = args
            .iter()
            .map(|&h| self.unwrap_handle(h))
            .collect::<Result<Vec<_>, _>>()?;
        self.open_result(self.universal.invoke(op, &uargs))
    }
}
