use crate::events::EventBufferLimits;
use crate::outcome::PayloadLimits;
use crate::workflow::manager::StoreMode;
use serde::{Deserialize, Serialize};

/// Engine configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub events: EventBufferLimits,
    #[serde(default)]
    pub limits: PayloadLimits,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the API that receives streamed frames listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    #[serde(default = "default_driver_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_driver_url() -> String {
    "http://127.0.0.1:7070".to_string()
}

fn default_request_timeout() -> u64 {
    60000
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_url: default_driver_url(),
            api_key: None,
            request_timeout_ms: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Attempts per instruction unless the instruction sets `maxAttempts`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_ms: u64,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    #[serde(default = "default_max_subflow_depth")]
    pub max_subflow_depth: u32,
    #[serde(default)]
    pub subflow_store_mode: StoreMode,
    #[serde(default = "default_entry_selector_timeout")]
    pub entry_selector_timeout_ms: u64,
    /// Upper bound on node transitions within one graph level.
    #[serde(default = "default_max_transitions")]
    pub max_transitions: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    250
}

fn default_retry_max_delay() -> u64 {
    5000
}

fn default_step_timeout() -> u64 {
    30000
}

fn default_execution_timeout() -> u64 {
    30 * 60 * 1000
}

fn default_heartbeat_interval() -> u64 {
    2000
}

fn default_max_loop_iterations() -> u32 {
    1000
}

fn default_max_subflow_depth() -> u32 {
    8
}

fn default_entry_selector_timeout() -> u64 {
    5000
}

fn default_max_transitions() -> u64 {
    100_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            step_timeout_ms: default_step_timeout(),
            execution_timeout_ms: default_execution_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_loop_iterations: default_max_loop_iterations(),
            max_subflow_depth: default_max_subflow_depth(),
            subflow_store_mode: StoreMode::default(),
            entry_selector_timeout_ms: default_entry_selector_timeout(),
            max_transitions: default_max_transitions(),
        }
    }
}

/// Defaults applied to session requests that leave fields unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_reuse_mode")]
    pub reuse_mode: String,
    #[serde(default = "default_frame_quality")]
    pub frame_quality: u8,
    #[serde(default = "default_frame_fps")]
    pub frame_fps: u8,
    #[serde(default = "default_frame_scale")]
    pub frame_scale: String,
}

fn default_viewport_width() -> u32 {
    crate::driver::DEFAULT_VIEWPORT_WIDTH
}

fn default_viewport_height() -> u32 {
    crate::driver::DEFAULT_VIEWPORT_HEIGHT
}

fn default_reuse_mode() -> String {
    "reuse".to_string()
}

fn default_frame_quality() -> u8 {
    crate::driver::DEFAULT_FRAME_QUALITY
}

fn default_frame_fps() -> u8 {
    crate::driver::DEFAULT_FRAME_FPS
}

fn default_frame_scale() -> String {
    crate::driver::DEFAULT_FRAME_SCALE.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            reuse_mode: default_reuse_mode(),
            frame_quality: default_frame_quality(),
            frame_fps: default_frame_fps(),
            frame_scale: default_frame_scale(),
        }
    }
}
