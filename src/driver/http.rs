//! JSON-over-HTTP driver client.

use super::types::*;
use super::{Driver, DriverError, DriverResult};
use crate::capabilities::EngineCapabilities;
use crate::config::DriverConfig;
use crate::recording::{RecordedAction, RecordingOptions, RecordingStatus};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

pub struct HttpDriver {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDriver {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> DriverResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &DriverConfig) -> DriverResult<Self> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone().filter(|k| !k.is_empty()),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_url(&self, session_id: &str, path: &str) -> String {
        format!("{}/sessions/{}{}", self.base_url, session_id, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn send_raw(&self, request: RequestBuilder) -> DriverResult<reqwest::Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let (message, code) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error.unwrap_or_else(|| text.clone()), body.code),
            Err(_) => (text, None),
        };
        Err(DriverError::Status {
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> DriverResult<T> {
        let response = self.send_raw(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> DriverResult<()> {
        self.send_raw(request).await.map(|_| ())
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn capabilities(&self) -> DriverResult<EngineCapabilities> {
        self.send(self.client.get(self.url("/capabilities"))).await
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> DriverResult<CreateSessionResponse> {
        self.send(self.client.post(self.url("/sessions")).json(request))
            .await
    }

    async fn close_session(&self, session_id: &str) -> DriverResult<CloseArtifacts> {
        self.send(self.client.post(self.session_url(session_id, "/close")))
            .await
    }

    async fn run_instruction(
        &self,
        session_id: &str,
        request: &RunInstructionRequest,
    ) -> DriverResult<DriverStepResult> {
        self.send(self.client.post(self.session_url(session_id, "/run")).json(request))
            .await
    }

    async fn forward_input(&self, session_id: &str, payload: &[u8]) -> DriverResult<()> {
        let request = self
            .client
            .post(self.session_url(session_id, "/input"))
            .header("content-type", "application/json")
            .body(payload.to_vec());
        self.send_empty(request).await
    }

    async fn start_recording(&self, session_id: &str, options: &RecordingOptions) -> DriverResult<RecordingStatus> {
        self.send(
            self.client
                .post(self.session_url(session_id, "/recording/start"))
                .json(options),
        )
        .await
    }

    async fn stop_recording(&self, session_id: &str) -> DriverResult<RecordingStatus> {
        self.send(self.client.post(self.session_url(session_id, "/recording/stop")))
            .await
    }

    async fn get_recorded_actions(&self, session_id: &str, since: u64) -> DriverResult<Vec<RecordedAction>> {
        let request = self
            .client
            .get(self.session_url(session_id, "/recording/actions"))
            .query(&[("since", since)]);
        self.send(request).await
    }

    async fn recording_status(&self, session_id: &str) -> DriverResult<RecordingStatus> {
        self.send(self.client.get(self.session_url(session_id, "/recording/status")))
            .await
    }

    async fn navigate(&self, session_id: &str, request: &NavigateRequest) -> DriverResult<NavigateResponse> {
        self.send(
            self.client
                .post(self.session_url(session_id, "/navigate"))
                .json(request),
        )
        .await
    }

    async fn update_viewport(&self, session_id: &str, viewport: Viewport) -> DriverResult<()> {
        self.send_empty(
            self.client
                .post(self.session_url(session_id, "/viewport"))
                .json(&viewport),
        )
        .await
    }

    async fn capture_screenshot(&self, session_id: &str, request: &ScreenshotRequest) -> DriverResult<Screenshot> {
        let raw: DriverScreenshot = self
            .send(
                self.client
                    .post(self.session_url(session_id, "/screenshot"))
                    .json(request),
            )
            .await?;
        let data = STANDARD
            .decode(raw.data.as_bytes())
            .map_err(|e| DriverError::Decode(format!("screenshot is not valid base64: {}", e)))?;
        Ok(Screenshot {
            format: raw.format,
            data,
            width: raw.width,
            height: raw.height,
        })
    }

    async fn get_storage_state(&self, session_id: &str) -> DriverResult<Value> {
        self.send(self.client.get(self.session_url(session_id, "/storage-state")))
            .await
    }

    async fn validate_selector(
        &self,
        session_id: &str,
        selector: &str,
        timeout_ms: u64,
    ) -> DriverResult<SelectorValidation> {
        let body = json!({ "selector": selector, "timeout_ms": timeout_ms });
        self.send(
            self.client
                .post(self.session_url(session_id, "/selector/validate"))
                .json(&body),
        )
        .await
    }

    async fn update_stream_settings(&self, session_id: &str, settings: &StreamSettings) -> DriverResult<()> {
        self.send_empty(
            self.client
                .post(self.session_url(session_id, "/stream"))
                .json(settings),
        )
        .await
    }

    async fn reset_session(&self, session_id: &str) -> DriverResult<()> {
        self.send_empty(self.client.post(self.session_url(session_id, "/reset")))
            .await
    }
}
