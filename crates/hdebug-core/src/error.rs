use std::fmt;

use serde::{Deserialize, Serialize};

use crate::abi::ContextId;
use crate::diagnostics::DiagnosticCode;
use crate::handle::Handle;

/// Why a handle was classified as invalid rather than closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// The value does not decode as a debug handle at all.
    Malformed,
    /// The slot was never allocated by this context.
    NeverIssued,
    /// The slot has been reused since the handle was issued.
    StaleGeneration,
    /// The slot was retired and is waiting for reuse.
    Retired,
    /// The handle carries another debug context's tag.
    ForeignContext,
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidReason::Malformed => "malformed",
            InvalidReason::NeverIssued => "never issued",
            InvalidReason::StaleGeneration => "stale generation",
            InvalidReason::Retired => "retired",
            InvalidReason::ForeignContext => "foreign context",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugError {
    /// A debug context is already bound to a different universal context.
    Configuration {
        bound: ContextId,
        requested: ContextId,
    },
    InvalidHandle {
        handle: Handle,
        reason: InvalidReason,
    },
    UseAfterClose {
        handle: Handle,
    },
    DoubleClose {
        handle: Handle,
    },
    /// Every addressable slot holds a live handle.
    TableFull {
        capacity: usize,
    },
}

impl DebugError {
    pub fn code(&self) -> DiagnosticCode {
        match self {
            DebugError::Configuration { .. } => DiagnosticCode::HDBG0001Configuration,
            DebugError::InvalidHandle { .. } => DiagnosticCode::HDBG0100InvalidHandle,
            DebugError::UseAfterClose { .. } => DiagnosticCode::HDBG0101UseAfterClose,
            DebugError::DoubleClose { .. } => DiagnosticCode::HDBG0102DoubleClose,
            DebugError::TableFull { .. } => DiagnosticCode::HDBG0103TableFull,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            DebugError::InvalidHandle { handle, .. }
            | DebugError::UseAfterClose { handle }
            | DebugError::DoubleClose { handle } => Some(*handle),
            DebugError::Configuration { .. } | DebugError::TableFull { .. } => None,
        }
    }

    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, DebugError::InvalidHandle { .. })
    }

    pub fn is_use_after_close(&self) -> bool {
        matches!(self, DebugError::UseAfterClose { .. })
    }

    pub fn is_double_close(&self) -> bool {
        matches!(self, DebugError::DoubleClose { .. })
    }
}

impl fmt::Display for DebugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugError::Configuration { bound, requested } => write!(
                f,
                "debug mode is already bound to {bound}; cannot bind {requested} as well \
                 (debugging several universal contexts requires the per-context bind policy)"
            ),
            DebugError::InvalidHandle { handle, reason } => {
                write!(f, "invalid handle {handle} ({reason})")
            }
            DebugError::UseAfterClose { handle } => {
                write!(f, "handle {handle} used after it was closed")
            }
            DebugError::DoubleClose { handle } => write!(f, "handle {handle} closed twice"),
            DebugError::TableFull { capacity } => {
                write!(f, "handle table is full ({capacity} live handles)")
            }
        }
    }
}

impl std::error::Error for DebugError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_handle() {
        let err = DebugError::UseAfterClose { handle: Handle(0x41) };
        assert_eq!(err.to_string(), "handle 0x41 used after it was closed");
        assert_eq!(err.handle(), Some(Handle(0x41)));
    }

    #[test]
    fn configuration_error_mentions_policy() {
        let err = DebugError::Configuration {
            bound: ContextId(1),
            requested: ContextId(2),
        };
        assert!(err.to_string().contains("per-context"));
        assert_eq!(err.code(), DiagnosticCode::HDBG0001Configuration);
        assert_eq!(err.handle(), None);
    }
}
