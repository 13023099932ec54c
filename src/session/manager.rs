//! Session creation and the index of live sessions.

use crate::capabilities::CapabilityRequirement;
use crate::config::{ApiConfig, EngineConfig, SessionConfig};
use crate::driver::{CloseArtifacts, CreateSessionRequest, Driver, StreamSettings, Viewport};
use crate::error::{AutomationError, Result};
use crate::outcome::PayloadLimits;
use crate::session::session::Session;
use crate::session::SessionMode;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// What the caller asks for. Unset fields take the manager's defaults.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub mode: SessionMode,
    pub execution_id: Option<Uuid>,
    pub viewport: Option<Viewport>,
    pub reuse_mode: Option<String>,
    pub labels: HashMap<String, String>,
    pub base_url: Option<String>,
    pub storage_state: Option<Value>,
    pub capabilities: CapabilityRequirement,
    pub stream: Option<StreamSettings>,
}

impl SessionSpec {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            execution_id: None,
            viewport: None,
            reuse_mode: None,
            labels: HashMap::new(),
            base_url: None,
            storage_state: None,
            capabilities: CapabilityRequirement::default(),
            stream: None,
        }
    }
}

pub struct SessionManager {
    driver: Arc<dyn Driver>,
    api: ApiConfig,
    defaults: SessionConfig,
    limits: PayloadLimits,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(driver: Arc<dyn Driver>, api: ApiConfig, defaults: SessionConfig, limits: PayloadLimits) -> Self {
        Self {
            driver,
            api,
            defaults,
            limits,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(driver: Arc<dyn Driver>, config: &EngineConfig) -> Self {
        Self::new(
            driver,
            config.api.clone(),
            config.session.clone(),
            config.limits,
        )
    }

    pub fn client(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    /// Frame callback URL for live streaming of `stream_id`.
    pub fn frame_callback_url(&self, mode: SessionMode, stream_id: Uuid) -> String {
        let path = match mode {
            SessionMode::Recording => format!("/api/v1/recordings/live/{}/frame", stream_id),
            SessionMode::Execution | SessionMode::Hybrid => {
                format!("/api/v1/executions/{}/frame", stream_id)
            }
        };
        format!("http://{}:{}{}", self.api.host, self.api.port, path)
    }

    /// Driver request for `spec` with defaults applied.
    pub fn build_request(&self, spec: &SessionSpec) -> CreateSessionRequest {
        let stream_id = spec.execution_id.unwrap_or_else(Uuid::new_v4);
        let mut stream = spec.stream.clone().unwrap_or_else(|| StreamSettings {
            quality: self.defaults.frame_quality,
            fps: self.defaults.frame_fps,
            scale: self.defaults.frame_scale.clone(),
            callback_url: None,
        });
        if stream.callback_url.is_none() {
            stream.callback_url = Some(self.frame_callback_url(spec.mode, stream_id));
        }

        let mut labels = spec.labels.clone();
        labels.insert("mode".to_string(), spec.mode.as_str().to_string());

        let mut request = CreateSessionRequest {
            mode: spec.mode,
            viewport: spec.viewport.unwrap_or(Viewport {
                width: self.defaults.viewport_width,
                height: self.defaults.viewport_height,
            }),
            reuse_mode: spec
                .reuse_mode
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.defaults.reuse_mode.clone()),
            labels,
            stream,
            execution_id: Some(stream_id),
            base_url: None,
            storage_state: None,
            required_capabilities: None,
        };
        if spec.mode.records() {
            request.storage_state = spec.storage_state.clone();
        }
        if spec.mode.executes() {
            request.base_url = spec.base_url.clone();
            if !spec.capabilities.is_empty() {
                request.required_capabilities = Some(spec.capabilities.clone());
            }
        }
        request
    }

    pub async fn create(&self, spec: SessionSpec) -> Result<Arc<Session>> {
        let request = self.build_request(&spec);
        let response = self.driver.create_session(&request).await?;
        let session = Arc::new(Session::new(
            response.session_id.clone(),
            spec.mode,
            Arc::clone(&self.driver),
            self.limits,
            request.viewport,
            response.url.clone().unwrap_or_else(|| "about:blank".to_string()),
        ));
        if let Some(page_id) = response.page_id.as_deref() {
            let initial = session.pages().initial_page_id();
            session.pages().map_driver_page_id(initial, page_id)?;
        }
        self.sessions
            .write()
            .insert(response.session_id.clone(), Arc::clone(&session));
        tracing::info!(
            "Created {} session {} ({}x{})",
            spec.mode,
            response.session_id,
            request.viewport.width,
            request.viewport.height
        );
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AutomationError::SessionNotFound(id.to_string()))
    }

    /// Close and forget a session. It stays indexed when the driver close fails.
    pub async fn close(&self, id: &str) -> Result<CloseArtifacts> {
        let session = self.get(id)?;
        let artifacts = session.close_with_artifacts().await?;
        self.sessions.write().remove(id);
        Ok(artifacts)
    }

    /// Close every session. The index is emptied under the lock and the
    /// sessions are closed after it is released.
    pub async fn close_all(&self) -> Vec<(String, Result<CloseArtifacts>)> {
        let snapshot: Vec<(String, Arc<Session>)> = self.sessions.write().drain().collect();
        tracing::info!("Closing {} session(s)", snapshot.len());
        futures::future::join_all(snapshot.into_iter().map(|(id, session)| async move {
            let result = session.close_with_artifacts().await;
            if let Err(e) = &result {
                tracing::warn!("Failed to close session {} during shutdown: {}", id, e);
            }
            (id, result)
        }))
        .await
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}
