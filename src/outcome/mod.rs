//! Per-attempt step outcome records and their payload caps.

pub mod failure;
pub mod timeline;

pub use failure::{classify, FailureKind, FailureSource, StepFailure};
pub use timeline::{DomRef, TimelineEntry, TimelineEvidence, TimelineFailure};

use crate::driver::types::DriverStepResult;
use crate::variables::state::VariableMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const STEP_OUTCOME_SCHEMA_VERSION: &str = "automation-step-outcome-v1";
pub const STEP_OUTCOME_PAYLOAD_VERSION: &str = "1";

pub const DEFAULT_DOM_SNAPSHOT_BYTES: usize = 512 * 1024;
pub const DEFAULT_SCREENSHOT_BYTES: usize = 512 * 1024;
pub const DEFAULT_CONSOLE_ENTRY_BYTES: usize = 16 * 1024;
pub const DEFAULT_NETWORK_PREVIEW_BYTES: usize = 64 * 1024;

fn default_dom_snapshot_bytes() -> usize {
    DEFAULT_DOM_SNAPSHOT_BYTES
}

fn default_screenshot_bytes() -> usize {
    DEFAULT_SCREENSHOT_BYTES
}

fn default_console_entry_bytes() -> usize {
    DEFAULT_CONSOLE_ENTRY_BYTES
}

fn default_network_preview_bytes() -> usize {
    DEFAULT_NETWORK_PREVIEW_BYTES
}

fn default_schema_version() -> String {
    STEP_OUTCOME_SCHEMA_VERSION.to_string()
}

fn default_payload_version() -> String {
    STEP_OUTCOME_PAYLOAD_VERSION.to_string()
}

/// Byte caps applied to captured payloads. A payload exactly at its cap is kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadLimits {
    #[serde(default = "default_dom_snapshot_bytes")]
    pub dom_snapshot_bytes: usize,
    #[serde(default = "default_screenshot_bytes")]
    pub screenshot_bytes: usize,
    #[serde(default = "default_console_entry_bytes")]
    pub console_entry_bytes: usize,
    #[serde(default = "default_network_preview_bytes")]
    pub network_preview_bytes: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            dom_snapshot_bytes: DEFAULT_DOM_SNAPSHOT_BYTES,
            screenshot_bytes: DEFAULT_SCREENSHOT_BYTES,
            console_entry_bytes: DEFAULT_CONSOLE_ENTRY_BYTES,
            network_preview_bytes: DEFAULT_NETWORK_PREVIEW_BYTES,
        }
    }
}

/// Cut `text` to at most `cap` bytes on a char boundary.
/// Returns the original size when anything was removed.
pub fn truncate_utf8(text: &mut String, cap: usize) -> Option<usize> {
    let original = text.len();
    if original <= cap {
        return None;
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    Some(original)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotData {
    pub format: String,
    /// Base64 image bytes. Emptied when the decoded image exceeds the cap.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

impl ScreenshotData {
    pub fn new(format: impl Into<String>, data: String) -> Self {
        Self {
            format: format.into(),
            data,
            width: None,
            height: None,
            truncated: false,
            original_size: None,
        }
    }

    /// Decoded size of the image in bytes.
    pub fn decoded_len(&self) -> usize {
        STANDARD
            .decode(self.data.as_bytes())
            .map(|bytes| bytes.len())
            .unwrap_or(self.data.len() / 4 * 3)
    }

    pub fn apply_cap(&mut self, cap: usize) {
        let size = self.decoded_len();
        if size > cap {
            self.data.clear();
            self.truncated = true;
            self.original_size = Some(size);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomSnapshot {
    pub html: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

impl DomSnapshot {
    pub fn capped(mut html: String, cap: usize) -> Self {
        let original_size = truncate_utf8(&mut html, cap);
        Self {
            html,
            truncated: original_size.is_some(),
            original_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleEntry {
    #[serde(default)]
    pub level: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

impl ConsoleEntry {
    pub fn apply_cap(&mut self, cap: usize) {
        if let Some(size) = truncate_utf8(&mut self.text, cap) {
            self.truncated = true;
            self.original_size = Some(size);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkEvent {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

impl NetworkEvent {
    pub fn apply_cap(&mut self, cap: usize) {
        if let Some(preview) = self.body_preview.as_mut() {
            if let Some(size) = truncate_utf8(preview, cap) {
                self.truncated = true;
                self.original_size = Some(size);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssertionResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    /// Milliseconds since the attempt started.
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// Identity of one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptId {
    pub execution_id: Uuid,
    pub step_index: usize,
    pub attempt: u32,
    pub node_id: String,
    pub step_type: String,
}

/// The canonical record of one step attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutcome {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "default_payload_version")]
    pub payload_version: String,
    pub execution_id: Uuid,
    pub step_index: usize,
    pub attempt: u32,
    pub node_id: String,
    pub step_type: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_snapshot: Option<DomSnapshot>,
    #[serde(default)]
    pub console_logs: Vec<ConsoleEntry>,
    #[serde(default)]
    pub network: Vec<NetworkEvent>,
    #[serde(default)]
    pub extracted_data: VariableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_result: Option<bool>,
    /// Terminal data surfaced by a subflow invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_position: Option<Point>,
    #[serde(default)]
    pub cursor_trail: Vec<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl StepOutcome {
    /// Successful outcome with no captured payloads, started now.
    pub fn started(id: &AttemptId) -> Self {
        Self {
            schema_version: default_schema_version(),
            payload_version: default_payload_version(),
            execution_id: id.execution_id,
            step_index: id.step_index,
            attempt: id.attempt,
            node_id: id.node_id.clone(),
            step_type: id.step_type.clone(),
            success: true,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            final_url: None,
            screenshot: None,
            dom_snapshot: None,
            console_logs: Vec::new(),
            network: Vec::new(),
            extracted_data: VariableMap::new(),
            assertion: None,
            condition_result: None,
            probe_result: None,
            element_bounding_box: None,
            click_position: None,
            cursor_trail: Vec::new(),
            failure: None,
        }
    }

    /// Build an outcome from a driver response, applying payload caps.
    /// A driver-reported error is not classified here; see [`classify`].
    pub fn from_driver(id: &AttemptId, result: DriverStepResult, limits: &PayloadLimits) -> Self {
        let mut outcome = Self::started(id);
        if let Some(started_at) = result.started_at {
            outcome.started_at = started_at;
        }
        outcome.success = result.error.is_none() && result.success;
        outcome.final_url = result.final_url;
        outcome.screenshot = result.screenshot.map(|shot| {
            let mut data = ScreenshotData::new(shot.format, shot.data);
            data.width = shot.width;
            data.height = shot.height;
            data
        });
        outcome.dom_snapshot = result.dom_html.map(|html| DomSnapshot {
            html,
            truncated: false,
            original_size: None,
        });
        outcome.console_logs = result.console_logs;
        outcome.network = result.network;
        outcome.extracted_data = result.extracted_data;
        outcome.assertion = result.assertion;
        outcome.condition_result = result.condition_result;
        outcome.element_bounding_box = result.element_bounding_box;
        outcome.click_position = result.click_position;
        outcome.cursor_trail = result.cursor_trail;
        outcome.apply_limits(limits);
        if let Some(completed_at) = result.completed_at {
            outcome.completed_at = Some(completed_at.max(outcome.started_at));
        }
        outcome
    }

    pub fn apply_limits(&mut self, limits: &PayloadLimits) {
        if let Some(shot) = self.screenshot.as_mut() {
            shot.apply_cap(limits.screenshot_bytes);
        }
        if let Some(dom) = self.dom_snapshot.as_mut() {
            if let Some(size) = truncate_utf8(&mut dom.html, limits.dom_snapshot_bytes) {
                dom.truncated = true;
                dom.original_size = Some(size);
            }
        }
        for entry in &mut self.console_logs {
            entry.apply_cap(limits.console_entry_bytes);
        }
        for event in &mut self.network {
            event.apply_cap(limits.network_preview_bytes);
        }
    }

    /// Mark the outcome failed. Keeps whatever was captured before the failure.
    pub fn fail(mut self, failure: StepFailure) -> Self {
        self.success = false;
        self.failure = Some(failure);
        self
    }

    /// Stamp completion time and duration. `completed_at` never precedes `started_at`.
    pub fn finish(mut self) -> Self {
        let completed_at = self.completed_at.unwrap_or_else(Utc::now).max(self.started_at);
        self.duration_ms = (completed_at - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(completed_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> AttemptId {
        AttemptId {
            execution_id: Uuid::new_v4(),
            step_index: 2,
            attempt: 1,
            node_id: "n2".to_string(),
            step_type: "click".to_string(),
        }
    }

    #[test]
    fn test_dom_snapshot_cap_boundary() {
        let exact = DomSnapshot::capped("a".repeat(DEFAULT_DOM_SNAPSHOT_BYTES), DEFAULT_DOM_SNAPSHOT_BYTES);
        assert!(!exact.truncated);
        assert!(exact.original_size.is_none());

        let over = DomSnapshot::capped(
            "a".repeat(DEFAULT_DOM_SNAPSHOT_BYTES + 1),
            DEFAULT_DOM_SNAPSHOT_BYTES,
        );
        assert!(over.truncated);
        assert_eq!(over.original_size, Some(DEFAULT_DOM_SNAPSHOT_BYTES + 1));
        assert_eq!(over.html.len(), DEFAULT_DOM_SNAPSHOT_BYTES);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut text = "héllo".to_string();
        assert_eq!(truncate_utf8(&mut text, 2), Some(6));
        assert_eq!(text, "h");
    }

    #[test]
    fn test_screenshot_cap_uses_decoded_size() {
        let small = STANDARD.encode(vec![0u8; 10]);
        let mut shot = ScreenshotData::new("png", small);
        shot.apply_cap(10);
        assert!(!shot.truncated);

        let large = STANDARD.encode(vec![0u8; 11]);
        let mut shot = ScreenshotData::new("png", large);
        shot.apply_cap(10);
        assert!(shot.truncated);
        assert_eq!(shot.original_size, Some(11));
        assert!(shot.data.is_empty());
    }

    #[test]
    fn test_console_and_network_caps() {
        let limits = PayloadLimits {
            console_entry_bytes: 4,
            network_preview_bytes: 3,
            ..PayloadLimits::default()
        };
        let mut outcome = StepOutcome::started(&id());
        outcome.console_logs.push(ConsoleEntry {
            level: "log".to_string(),
            text: "hello".to_string(),
            timestamp: None,
            truncated: false,
            original_size: None,
        });
        outcome.network.push(NetworkEvent {
            request_id: "r1".to_string(),
            method: "GET".to_string(),
            url: "https://example.com".to_string(),
            status: Some(200),
            resource_type: None,
            body_preview: Some("abc".to_string()),
            truncated: false,
            original_size: None,
        });
        outcome.apply_limits(&limits);
        assert!(outcome.console_logs[0].truncated);
        assert_eq!(outcome.console_logs[0].text, "hell");
        assert!(!outcome.network[0].truncated);
    }

    #[test]
    fn test_finish_orders_timestamps() {
        let outcome = StepOutcome::started(&id()).finish();
        let completed = outcome.completed_at.unwrap();
        assert!(completed >= outcome.started_at);
    }

    #[test]
    fn test_failed_outcome_carries_failure() {
        let failure = StepFailure::new(FailureKind::Engine, "driver_status", "boom");
        let outcome = StepOutcome::started(&id()).fail(failure);
        assert!(!outcome.success);
        assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::Engine);
    }
}
