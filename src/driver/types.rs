//! Request and response bodies of the driver RPC surface.

use crate::actions::ActionKind;
use crate::capabilities::CapabilityRequirement;
use crate::outcome::{AssertionResult, BoundingBox, ConsoleEntry, CursorPosition, NetworkEvent, Point};
use crate::session::SessionMode;
use crate::variables::state::VariableMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
pub const DEFAULT_FRAME_QUALITY: u8 = 55;
pub const DEFAULT_FRAME_FPS: u8 = 6;
pub const DEFAULT_FRAME_SCALE: &str = "css";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

/// Live frame streaming parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSettings {
    pub quality: u8,
    pub fps: u8,
    pub scale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            quality: DEFAULT_FRAME_QUALITY,
            fps: DEFAULT_FRAME_FPS,
            scale: DEFAULT_FRAME_SCALE.to_string(),
            callback_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateSessionRequest {
    pub mode: SessionMode,
    pub viewport: Viewport,
    pub reuse_mode: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub stream: StreamSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<CapabilityRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Artifacts produced when a session is torn down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CloseArtifacts {
    #[serde(default)]
    pub video_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub har_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInstructionRequest {
    pub execution_id: Uuid,
    pub step_index: usize,
    pub attempt: u32,
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: VariableMap,
    #[serde(default)]
    pub context: VariableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    pub timeout_ms: u64,
}

/// Error reported by the driver for a step it did run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverStepError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverScreenshot {
    #[serde(default = "default_image_format")]
    pub format: String,
    /// Base64 image bytes.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

fn default_image_format() -> String {
    "png".to_string()
}

fn default_true() -> bool {
    true
}

/// Raw result of `run_instruction`, before payload caps are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriverStepResult {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<DriverScreenshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_html: Option<String>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_position: Option<Point>,
    #[serde(default)]
    pub cursor_trail: Vec<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DriverStepError>,
}

impl DriverStepResult {
    /// Successful result with nothing captured. `Default` leaves `success` false.
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            error: Some(DriverStepError {
                code: code.into(),
                message: message.into(),
                retryable,
            }),
            ..Self::default()
        }
    }
}

fn default_wait_until() -> String {
    "load".to_string()
}

fn default_navigate_timeout() -> u64 {
    30000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigateRequest {
    pub url: String,
    #[serde(default = "default_wait_until")]
    pub wait_until: String,
    #[serde(default = "default_navigate_timeout")]
    pub timeout_ms: u64,
    /// Capture a screenshot once the page settled.
    #[serde(default)]
    pub capture: bool,
}

impl NavigateRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wait_until: default_wait_until(),
            timeout_ms: default_navigate_timeout(),
            capture: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigateResponse {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<DriverScreenshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotRequest {
    #[serde(default = "default_image_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default)]
    pub full_page: bool,
}

impl Default for ScreenshotRequest {
    fn default() -> Self {
        Self {
            format: default_image_format(),
            quality: None,
            full_page: false,
        }
    }
}

/// Decoded screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub format: String,
    pub data: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorValidation {
    pub valid: bool,
    #[serde(default)]
    pub match_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SelectorValidation {
    pub fn found(&self) -> bool {
        self.valid && self.match_count > 0
    }
}
