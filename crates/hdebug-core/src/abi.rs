//! The operation table shared by universal and debug contexts.
//!
//! Extension code is written against [`HandleAbi`]. A universal context
//! implements it directly; a [`crate::DebugContext`] implements it with
//! trampolines that validate every handle before forwarding.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::DebugError;
use crate::handle::Handle;

/// Identity of a context. Two contexts are the same binding target iff their
/// ids are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Allocates a process-unique id for a context that has no natural address.
    pub fn fresh() -> ContextId {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Identity derived from the address of a foreign (C) context.
    pub fn from_addr(addr: usize) -> ContextId {
        ContextId(addr as u64)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{:x}", self.0)
    }
}

/// Opcode for [`HandleAbi::invoke`], the generic forwarding entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// A handle argument failed debug validation; nothing was forwarded.
    Handle(DebugError),
    /// The forwarded call itself failed in the universal context.
    Call { code: u32, message: String },
}

impl AbiError {
    pub fn call(code: u32, message: impl Into<String>) -> AbiError {
        AbiError::Call {
            code,
            message: message.into(),
        }
    }

    pub fn as_debug_error(&self) -> Option<&DebugError> {
        match self {
            AbiError::Handle(e) => Some(e),
            AbiError::Call { .. } => None,
        }
    }
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiError::Handle(e) => write!(f, "{e}"),
            AbiError::Call { code, message } => write!(f, "call failed ({code}): {message}"),
        }
    }
}

impl std::error::Error for AbiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AbiError::Handle(e) => Some(e),
            AbiError::Call { .. } => None,
        }
    }
}

impl From<DebugError> for AbiError {
    fn from(e: DebugError) -> Self {
        AbiError::Handle(e)
    }
}

/// Handle-based call surface.
///
/// Lifecycle entries are `dup` (produces a new handle to the same object) and
/// `close` (releases one handle). Every other entry either consumes handles,
/// produces them, or both.
pub trait HandleAbi: Send + Sync {
    fn ctx_id(&self) -> ContextId;

    fn name(&self) -> &str;

    fn null(&self) -> Handle {
        Handle::NULL
    }

    fn dup(&self, h: Handle) -> Result<Handle, AbiError>;

    fn close(&self, h: Handle) -> Result<(), AbiError>;

    fn from_i64(&self, value: i64) -> Result<Handle, AbiError>;

    fn as_i64(&self, h: Handle) -> Result<i64, AbiError>;

    fn is(&self, a: Handle, b: Handle) -> Result<bool, AbiError>;

    fn invoke(&self, op: OpId, args: &[Handle]) -> Result<Handle, AbiError>;
}
