use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::abi::ContextId;
use crate::error::DebugError;
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    HDBG0001Configuration,
    HDBG0100InvalidHandle,
    HDBG0101UseAfterClose,
    HDBG0102DoubleClose,
    HDBG0103TableFull,
    HDBG0200LeakedHandle,
}

impl DiagnosticCode {
    pub fn code_str(self) -> &'static str {
        match self {
            DiagnosticCode::HDBG0001Configuration => "HDBG0001",
            DiagnosticCode::HDBG0100InvalidHandle => "HDBG0100",
            DiagnosticCode::HDBG0101UseAfterClose => "HDBG0101",
            DiagnosticCode::HDBG0102DoubleClose => "HDBG0102",
            DiagnosticCode::HDBG0103TableFull => "HDBG0103",
            DiagnosticCode::HDBG0200LeakedHandle => "HDBG0200",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            DiagnosticCode::HDBG0001Configuration => {
                "debug context already bound to a different universal context"
            }
            DiagnosticCode::HDBG0100InvalidHandle => "handle was not issued by this debug context",
            DiagnosticCode::HDBG0101UseAfterClose => "handle used after it was closed",
            DiagnosticCode::HDBG0102DoubleClose => "handle closed twice",
            DiagnosticCode::HDBG0103TableFull => "no free handle slots",
            DiagnosticCode::HDBG0200LeakedHandle => "handle still open",
        }
    }

    pub fn default_help(self) -> Option<&'static str> {
        match self {
            DiagnosticCode::HDBG0001Configuration => Some(
                "Set HDEBUG_SINGLETON=0 to give every universal context its own debug context.",
            ),
            DiagnosticCode::HDBG0101UseAfterClose => {
                Some("Dup the handle before closing it if it is still needed.")
            }
            DiagnosticCode::HDBG0102DoubleClose => {
                Some("Every handle must be closed exactly once.")
            }
            DiagnosticCode::HDBG0200LeakedHandle => {
                Some("Close the handle before the owning scope returns.")
            }
            _ => None,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            DiagnosticCode::HDBG0200LeakedHandle => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            severity: code.severity(),
            message: message.into(),
            handle: None,
            context: None,
            help: code.default_help().map(|s| s.to_string()),
        }
    }

    pub fn from_error(err: &DebugError, context: ContextId) -> Self {
        Diagnostic {
            handle: err.handle(),
            context: Some(context),
            ..Diagnostic::new(err.code(), err.to_string())
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}: {}",
            self.code.code_str(),
            self.severity,
            self.message
        )?;
        if let Some(ctx) = self.context {
            write!(f, " [{ctx}]")?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Bounded record of the diagnostics a context has emitted, oldest first.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: VecDeque<Diagnostic>,
    max: usize,
    dropped: u64,
}

impl DiagnosticLog {
    pub fn new(max: usize) -> Self {
        DiagnosticLog {
            entries: VecDeque::new(),
            max: max.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, d: Diagnostic) {
        if self.entries.len() == self.max {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(d);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of diagnostics evicted because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }
}

pub fn render_diagnostics_md() -> String {
    let mut out = String::new();
    out.push_str("# hdebug diagnostics catalog\n\n");
    out.push_str("This document is generated from `crates/hdebug-core/src/diagnostics.rs`.\n\n");
    out.push_str("| Code | Severity | Message | Help |\n");
    out.push_str("| ---- | -------- | ------- | ---- |\n");
    for &code in all_codes() {
        out.push_str(&format!(
            "| {} | {:?} | {} | {} |\n",
            code.code_str(),
            code.severity(),
            code.default_message(),
            code.default_help().unwrap_or("")
        ));
    }
    out
}

pub fn all_codes() -> &'static [DiagnosticCode] {
    &[
        DiagnosticCode::HDBG0001Configuration,
        DiagnosticCode::HDBG0100InvalidHandle,
        DiagnosticCode::HDBG0101UseAfterClose,
        DiagnosticCode::HDBG0102DoubleClose,
        DiagnosticCode::HDBG0103TableFull,
        DiagnosticCode::HDBG0200LeakedHandle,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_drops_oldest_when_full() {
        let mut log = DiagnosticLog::new(2);
        for i in 0..3 {
            log.push(Diagnostic::new(
                DiagnosticCode::HDBG0102DoubleClose,
                format!("d{i}"),
            ));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 1);
        let msgs: Vec<_> = log.drain().into_iter().map(|d| d.message).collect();
        assert_eq!(msgs, vec!["d1".to_string(), "d2".to_string()]);
        assert!(log.is_empty());
    }

    #[test]
    fn catalog_lists_every_code_once() {
        let md = render_diagnostics_md();
        for &code in all_codes() {
            assert_eq!(md.matches(code.code_str()).count(), 1, "{}", code.code_str());
        }
    }

    #[test]
    fn diagnostic_from_error_carries_handle_and_context() {
        let err = DebugError::DoubleClose { handle: Handle(9) };
        let d = Diagnostic::from_error(&err, ContextId(3));
        assert_eq!(d.code, DiagnosticCode::HDBG0102DoubleClose);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.handle, Some(Handle(9)));
        assert_eq!(d.context, Some(ContextId(3)));
        assert!(d.to_string().starts_with("HDBG0102 Error:"));
    }
}
