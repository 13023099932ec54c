//! Scripted in-process driver shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use automation_lib::actions::ActionKind;
use automation_lib::capabilities::EngineCapabilities;
use automation_lib::driver::{
    CloseArtifacts, CreateSessionRequest, CreateSessionResponse, Driver, DriverError, DriverResult,
    DriverStepResult, NavigateRequest, NavigateResponse, RunInstructionRequest, Screenshot,
    ScreenshotRequest, SelectorValidation, StreamSettings, Viewport,
};
use automation_lib::recording::{RecordedAction, RecordingOptions, RecordingStatus};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct ScriptedDriver {
    /// Every `run_instruction` request, in arrival order.
    pub runs: Mutex<Vec<RunInstructionRequest>>,
    /// Remaining retryable failures per node id.
    pub failures: Mutex<HashMap<String, u32>>,
    /// Canned `extracted_data` per node id.
    pub extracted: Mutex<HashMap<String, Value>>,
    /// Driver page id reported per node id.
    pub page_ids: Mutex<HashMap<String, String>>,
    /// Milliseconds each run of a node takes.
    pub delays: Mutex<HashMap<String, u64>>,
    pub created: Mutex<Vec<CreateSessionRequest>>,
    pub close_calls: AtomicUsize,
    pub fail_next_close: AtomicBool,
    pub selector_missing: AtomicBool,
    pub selector_checks: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(self, node_id: &str, times: u32) -> Self {
        self.failures.lock().insert(node_id.to_string(), times);
        self
    }

    pub fn extract(self, node_id: &str, data: Value) -> Self {
        self.extracted.lock().insert(node_id.to_string(), data);
        self
    }

    pub fn on_page(self, node_id: &str, page_id: &str) -> Self {
        self.page_ids.lock().insert(node_id.to_string(), page_id.to_string());
        self
    }

    pub fn slow(self, node_id: &str, delay_ms: u64) -> Self {
        self.delays.lock().insert(node_id.to_string(), delay_ms);
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn run_node_ids(&self) -> Vec<String> {
        self.runs.lock().iter().map(|r| r.node_id.clone()).collect()
    }
}

pub fn capabilities() -> EngineCapabilities {
    serde_json::from_value(json!({
        "engine": "scripted",
        "version": "1.0.0",
        "max_concurrent_sessions": 4,
        "allows_parallel_tabs": true,
        "supports_video": true,
        "max_viewport_width": 1920,
        "max_viewport_height": 1080
    }))
    .unwrap()
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn capabilities(&self) -> DriverResult<EngineCapabilities> {
        Ok(capabilities())
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> DriverResult<CreateSessionResponse> {
        let mut created = self.created.lock();
        created.push(request.clone());
        Ok(CreateSessionResponse {
            session_id: format!("session-{}", created.len()),
            page_id: Some("page-1".to_string()),
            url: Some("about:blank".to_string()),
        })
    }

    async fn close_session(&self, _session_id: &str) -> DriverResult<CloseArtifacts> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_close.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Connection("close refused".to_string()));
        }
        Ok(CloseArtifacts {
            video_paths: vec!["/tmp/video.webm".to_string()],
            har_path: Some("/tmp/session.har".to_string()),
            trace_path: None,
        })
    }

    async fn run_instruction(
        &self,
        _session_id: &str,
        request: &RunInstructionRequest,
    ) -> DriverResult<DriverStepResult> {
        self.runs.lock().push(request.clone());

        let delay = self.delays.lock().get(&request.node_id).copied();
        if let Some(delay_ms) = delay {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        if let Some(remaining) = self.failures.lock().get_mut(&request.node_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(DriverStepResult::failed("engine_crash", "renderer crashed", true));
            }
        }

        let mut result = DriverStepResult::succeeded();
        result.page_id = self.page_ids.lock().get(&request.node_id).cloned();
        if request.kind == ActionKind::Navigate {
            result.final_url = request
                .params
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        if let Some(Value::Object(data)) = self.extracted.lock().get(&request.node_id) {
            result.extracted_data = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        Ok(result)
    }

    async fn forward_input(&self, _session_id: &str, _payload: &[u8]) -> DriverResult<()> {
        Ok(())
    }

    async fn start_recording(&self, _session_id: &str, _options: &RecordingOptions) -> DriverResult<RecordingStatus> {
        Ok(RecordingStatus::default())
    }

    async fn stop_recording(&self, _session_id: &str) -> DriverResult<RecordingStatus> {
        Ok(RecordingStatus::default())
    }

    async fn get_recorded_actions(&self, _session_id: &str, _since: u64) -> DriverResult<Vec<RecordedAction>> {
        Ok(Vec::new())
    }

    async fn recording_status(&self, _session_id: &str) -> DriverResult<RecordingStatus> {
        Ok(RecordingStatus::default())
    }

    async fn navigate(&self, _session_id: &str, request: &NavigateRequest) -> DriverResult<NavigateResponse> {
        Ok(NavigateResponse {
            url: request.url.clone(),
            title: None,
            status: Some(200),
            screenshot: None,
        })
    }

    async fn update_viewport(&self, _session_id: &str, _viewport: Viewport) -> DriverResult<()> {
        Ok(())
    }

    async fn capture_screenshot(&self, _session_id: &str, request: &ScreenshotRequest) -> DriverResult<Screenshot> {
        Ok(Screenshot {
            format: request.format.clone(),
            data: vec![0x89, 0x50, 0x4e, 0x47],
            width: Some(1280),
            height: Some(720),
        })
    }

    async fn get_storage_state(&self, _session_id: &str) -> DriverResult<Value> {
        Ok(json!({ "cookies": [], "origins": [] }))
    }

    async fn validate_selector(
        &self,
        _session_id: &str,
        _selector: &str,
        _timeout_ms: u64,
    ) -> DriverResult<SelectorValidation> {
        self.selector_checks.fetch_add(1, Ordering::SeqCst);
        let missing = self.selector_missing.load(Ordering::SeqCst);
        Ok(SelectorValidation {
            valid: true,
            match_count: if missing { 0 } else { 1 },
            message: None,
        })
    }

    async fn update_stream_settings(&self, _session_id: &str, _settings: &StreamSettings) -> DriverResult<()> {
        Ok(())
    }

    async fn reset_session(&self, _session_id: &str) -> DriverResult<()> {
        Ok(())
    }
}
