//! Browser sessions: mode gating, lifecycle and page tracking.

pub mod manager;
pub mod pages;
#[allow(clippy::module_inception)]
pub mod session;

pub use manager::{SessionManager, SessionSpec};
pub use pages::{Page, PageStatus, PageTracker};
pub use session::Session;

use crate::error::{AutomationError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Execution,
    Recording,
    Hybrid,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Execution => "execution",
            SessionMode::Recording => "recording",
            SessionMode::Hybrid => "hybrid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "execution" => Some(SessionMode::Execution),
            "recording" => Some(SessionMode::Recording),
            "hybrid" => Some(SessionMode::Hybrid),
            _ => None,
        }
    }

    /// Recording-capable modes send the storage state on creation.
    pub fn records(&self) -> bool {
        matches!(self, SessionMode::Recording | SessionMode::Hybrid)
    }

    /// Execution-capable modes send base URL and capability requirements.
    pub fn executes(&self) -> bool {
        matches!(self, SessionMode::Execution | SessionMode::Hybrid)
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOperation {
    Run,
    ForwardInput,
    RecordingControl,
    Navigate,
    Screenshot,
    Storage,
    Selector,
    Stream,
    Viewport,
    Reset,
    Close,
}

/// Allowed modes per operation, columns are execution, recording, hybrid.
const GATING: [(SessionOperation, [bool; 3], &str); 11] = [
    (SessionOperation::Run, [true, false, true], "cannot run instructions in recording-only mode"),
    (SessionOperation::ForwardInput, [false, true, true], "cannot forward input in execution-only mode"),
    (SessionOperation::RecordingControl, [false, true, true], "cannot control recording in execution-only mode"),
    (SessionOperation::Navigate, [true, true, true], ""),
    (SessionOperation::Screenshot, [true, true, true], ""),
    (SessionOperation::Storage, [true, true, true], ""),
    (SessionOperation::Selector, [true, true, true], ""),
    (SessionOperation::Stream, [true, true, true], ""),
    (SessionOperation::Viewport, [true, true, true], ""),
    (SessionOperation::Reset, [true, true, true], ""),
    (SessionOperation::Close, [true, true, true], ""),
];

fn column(mode: SessionMode) -> usize {
    match mode {
        SessionMode::Execution => 0,
        SessionMode::Recording => 1,
        SessionMode::Hybrid => 2,
    }
}

pub fn is_allowed(op: SessionOperation, mode: SessionMode) -> bool {
    GATING
        .iter()
        .find(|(candidate, _, _)| *candidate == op)
        .map(|(_, allowed, _)| allowed[column(mode)])
        .unwrap_or(false)
}

/// Reject `op` when `mode` does not permit it.
pub fn check_operation(op: SessionOperation, mode: SessionMode) -> Result<()> {
    if is_allowed(op, mode) {
        return Ok(());
    }
    let message = GATING
        .iter()
        .find(|(candidate, _, _)| *candidate == op)
        .map(|(_, _, message)| message.to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("operation {:?} not allowed in {} mode", op, mode));
    Err(AutomationError::ModeViolation(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_table() {
        assert!(is_allowed(SessionOperation::Run, SessionMode::Execution));
        assert!(!is_allowed(SessionOperation::Run, SessionMode::Recording));
        assert!(is_allowed(SessionOperation::Run, SessionMode::Hybrid));

        assert!(!is_allowed(SessionOperation::ForwardInput, SessionMode::Execution));
        assert!(!is_allowed(SessionOperation::RecordingControl, SessionMode::Execution));
        assert!(is_allowed(SessionOperation::RecordingControl, SessionMode::Hybrid));

        for mode in [SessionMode::Execution, SessionMode::Recording, SessionMode::Hybrid] {
            for op in [
                SessionOperation::Navigate,
                SessionOperation::Screenshot,
                SessionOperation::Storage,
                SessionOperation::Selector,
                SessionOperation::Stream,
                SessionOperation::Reset,
                SessionOperation::Close,
            ] {
                assert!(is_allowed(op, mode), "{:?} in {}", op, mode);
            }
        }
    }

    #[test]
    fn test_recording_mode_rejects_run_with_message() {
        let err = check_operation(SessionOperation::Run, SessionMode::Recording).unwrap_err();
        assert_eq!(err.to_string(), "cannot run instructions in recording-only mode");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(SessionMode::parse("Hybrid"), Some(SessionMode::Hybrid));
        assert_eq!(SessionMode::parse("nope"), None);
        assert!(SessionMode::Recording.records());
        assert!(!SessionMode::Recording.executes());
    }
}
