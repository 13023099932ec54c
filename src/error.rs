use crate::driver::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported action type: {0}")]
    UnsupportedAction(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not permitted in the session's mode.
    #[error("{0}")]
    ModeViolation(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Capability gap: {0}")]
    CapabilityGap(String),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Entry selector {0} not found on page")]
    EntrySelectorMissing(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Step timed out after {0}ms")]
    Timeout(u64),

    #[error("Execution deadline of {0}ms exceeded")]
    DeadlineExceeded(u64),

    #[error("Loop exceeded maximum iterations: {0}")]
    LoopLimit(u32),
}

pub type Result<T> = std::result::Result<T, AutomationError>;
