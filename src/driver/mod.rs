//! Browser driver RPC seam.
//!
//! Sessions talk to the browser exclusively through [`Driver`]. The
//! production implementation is [`HttpDriver`]; tests script their own.

pub mod http;
pub mod types;

pub use http::HttpDriver;
pub use types::*;

use crate::capabilities::EngineCapabilities;
use crate::recording::{RecordedAction, RecordingOptions, RecordingStatus};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("driver returned HTTP {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid driver response: {0}")]
    Decode(String),

    /// The driver ran the step and reported a failure.
    #[error("{code}: {message}")]
    Step {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl From<reqwest::Error> for DriverError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DriverError::Timeout(e.to_string())
        } else if e.is_decode() {
            DriverError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            DriverError::Status {
                status: status.as_u16(),
                code: None,
                message: e.to_string(),
            }
        } else {
            DriverError::Connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Decode(e.to_string())
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// One method per driver RPC. Every call after `create_session` is scoped
/// to a driver session id.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn capabilities(&self) -> DriverResult<EngineCapabilities>;

    async fn create_session(&self, request: &CreateSessionRequest) -> DriverResult<CreateSessionResponse>;

    async fn close_session(&self, session_id: &str) -> DriverResult<CloseArtifacts>;

    async fn run_instruction(
        &self,
        session_id: &str,
        request: &RunInstructionRequest,
    ) -> DriverResult<DriverStepResult>;

    async fn forward_input(&self, session_id: &str, payload: &[u8]) -> DriverResult<()>;

    async fn start_recording(&self, session_id: &str, options: &RecordingOptions) -> DriverResult<RecordingStatus>;

    async fn stop_recording(&self, session_id: &str) -> DriverResult<RecordingStatus>;

    async fn get_recorded_actions(&self, session_id: &str, since: u64) -> DriverResult<Vec<RecordedAction>>;

    async fn recording_status(&self, session_id: &str) -> DriverResult<RecordingStatus>;

    async fn navigate(&self, session_id: &str, request: &NavigateRequest) -> DriverResult<NavigateResponse>;

    async fn update_viewport(&self, session_id: &str, viewport: Viewport) -> DriverResult<()>;

    async fn capture_screenshot(&self, session_id: &str, request: &ScreenshotRequest) -> DriverResult<Screenshot>;

    async fn get_storage_state(&self, session_id: &str) -> DriverResult<Value>;

    async fn validate_selector(
        &self,
        session_id: &str,
        selector: &str,
        timeout_ms: u64,
    ) -> DriverResult<SelectorValidation>;

    async fn update_stream_settings(&self, session_id: &str, settings: &StreamSettings) -> DriverResult<()>;

    async fn reset_session(&self, session_id: &str) -> DriverResult<()>;
}
