//! Translation between debug-space and universal-space handles.
//!
//! Every check failure is recorded as a [`Diagnostic`] on the context,
//! logged, handed to the invalid-handle hook, and then returned to the
//! caller. Nothing is forwarded once a check fails.

use crate::context::{lock, DebugContext};
use crate::diagnostics::Diagnostic;
use crate::error::DebugError;
use crate::handle::Handle;

impl DebugContext {
    /// Wraps a universal handle into a fresh debug handle.
    pub fn open_handle(&self, uh: Handle) -> Result<Handle, DebugError> {
        let r = lock(&self.table).open(uh);
        match r {
            Ok(dh) => {
                tracing::trace!(ctx = %self.id, %uh, %dh, "open");
                Ok(dh)
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// Resolves a debug handle to the universal handle it wraps. The entry is
    /// not consumed.
    pub fn unwrap_handle(&self, dh: Handle) -> Result<Handle, DebugError> {
        let r = lock(&self.table).unwrap(dh);
        r.map_err(|e| self.report(e))
    }

    /// Marks a debug handle closed and returns the universal handle it
    /// wrapped. The universal handle itself is left untouched.
    pub fn close_handle(&self, dh: Handle) -> Result<Handle, DebugError> {
        let r = lock(&self.table).close(dh);
        match r {
            Ok(uh) => {
                tracing::trace!(ctx = %self.id, %dh, %uh, "close");
                Ok(uh)
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// Records `err` and returns it. The table lock must not be held.
    pub(crate) fn report(&self, err: DebugError) -> DebugError {
        let diag = Diagnostic::from_error(&err, self.id);
        tracing::warn!(
            ctx = %self.id,
            code = diag.code.code_str(),
            "{}",
            diag.message
        );
        lock(&self.diagnostics).push(diag.clone());
        let hook = lock(&self.on_invalid).clone();
        if let Some(hook) = hook {
            hook(&diag);
        }
        err
    }
}
