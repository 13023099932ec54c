//! Wire types for the recording side of a session.

use crate::actions::ActionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user action captured by the driver while recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedAction {
    /// Sequential index in the recording.
    pub sequence: u64,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Selector candidates, best first.
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    /// Milliseconds since the recording started.
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
}

/// Lifecycle of the recorder attached to a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecordingStatus {
    #[serde(default)]
    pub state: RecordingState,
    #[serde(default)]
    pub action_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl RecordingStatus {
    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingOptions {
    #[serde(default = "default_true")]
    pub capture_screenshots: bool,
    #[serde(default = "default_true")]
    pub capture_hover: bool,
    /// Selectors whose subtree is never recorded.
    #[serde(default)]
    pub ignore_selectors: Vec<String>,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            capture_screenshots: true,
            capture_hover: true,
            ignore_selectors: Vec::new(),
        }
    }
}
