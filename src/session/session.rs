//! A single driver-backed browser session.

use crate::actions::metadata::lookup;
use crate::driver::{
    CloseArtifacts, Driver, DriverError, NavigateRequest, NavigateResponse, RunInstructionRequest, Screenshot,
    ScreenshotRequest, SelectorValidation, StreamSettings, Viewport,
};
use crate::error::{AutomationError, Result};
use crate::outcome::{classify, AttemptId, PayloadLimits, StepOutcome};
use crate::recording::{RecordedAction, RecordingOptions, RecordingStatus};
use crate::session::pages::PageTracker;
use crate::session::{check_operation, SessionMode, SessionOperation};
use crate::workflow::schema::CompiledInstruction;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Session {
    id: String,
    mode: SessionMode,
    driver: Arc<dyn Driver>,
    limits: PayloadLimits,
    closed: AtomicBool,
    /// Held across the driver close call; caches the first successful result.
    close_state: Mutex<Option<CloseArtifacts>>,
    pages: PageTracker,
    viewport: parking_lot::Mutex<Viewport>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        mode: SessionMode,
        driver: Arc<dyn Driver>,
        limits: PayloadLimits,
        viewport: Viewport,
        initial_url: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            pages: PageTracker::new(id.clone(), initial_url),
            id,
            mode,
            driver,
            limits,
            closed: AtomicBool::new(false),
            close_state: Mutex::new(None),
            viewport: parking_lot::Mutex::new(viewport),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> &PageTracker {
        &self.pages
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.lock()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn limits(&self) -> &PayloadLimits {
        &self.limits
    }

    fn guard(&self, op: SessionOperation) -> Result<()> {
        if self.is_closed() {
            return Err(AutomationError::SessionClosed(self.id.clone()));
        }
        check_operation(op, self.mode)
    }

    /// Run one instruction on the driver. Transport failures are returned as
    /// errors; a step the driver ran and reported as failed comes back as a
    /// failed outcome that keeps whatever was captured.
    pub async fn run(
        &self,
        instruction: &CompiledInstruction,
        attempt: &AttemptId,
        timeout_ms: u64,
    ) -> Result<StepOutcome> {
        self.guard(SessionOperation::Run)?;
        let request = RunInstructionRequest {
            execution_id: attempt.execution_id,
            step_index: attempt.step_index,
            attempt: attempt.attempt,
            node_id: instruction.node_id.clone(),
            kind: instruction.kind,
            params: instruction.params.clone(),
            context: instruction.context.clone(),
            preload_html: instruction.preload_html.clone(),
            action: instruction.action.clone(),
            timeout_ms,
        };
        let mut result = self.driver.run_instruction(&self.id, &request).await?;

        if let Some(driver_page_id) = result.page_id.as_deref() {
            let page_id = match self.pages.get_page_id_by_driver_id(driver_page_id) {
                Some(id) => id,
                None => {
                    // An unmapped active page adopts the id; otherwise the driver opened a new tab.
                    let active = self.pages.active_page();
                    let id = match active {
                        Some(page) if page.driver_page_id.is_none() => page.id,
                        other => self.pages.add_page(
                            result.final_url.clone().unwrap_or_default(),
                            other.map(|page| page.id),
                        ),
                    };
                    self.pages.map_driver_page_id(id, driver_page_id)?;
                    id
                }
            };
            self.pages.set_active_page(page_id)?;
        }
        if let (Some(url), Some(active)) = (result.final_url.clone(), self.pages.active_page_id()) {
            self.pages.update_page_info(active, Some(url), None)?;
        }

        let step_error = result.error.take();
        let reported_failure = !result.success;
        let outcome = StepOutcome::from_driver(attempt, result, &self.limits);
        let error = match step_error {
            Some(err) => Some(DriverError::Step {
                code: err.code,
                message: err.message,
                retryable: err.retryable,
            }),
            None if reported_failure => Some(DriverError::Step {
                code: "step_failed".to_string(),
                message: format!("driver reported failure for step {}", attempt.step_index),
                retryable: false,
            }),
            None => None,
        };
        Ok(match error {
            Some(err) => {
                let failure = classify(&AutomationError::Driver(err), &lookup(instruction.kind));
                outcome.fail(failure)
            }
            None => outcome,
        })
    }

    pub async fn forward_input(&self, payload: &[u8]) -> Result<()> {
        self.guard(SessionOperation::ForwardInput)?;
        Ok(self.driver.forward_input(&self.id, payload).await?)
    }

    pub async fn start_recording(&self, options: &RecordingOptions) -> Result<RecordingStatus> {
        self.guard(SessionOperation::RecordingControl)?;
        let status = self.driver.start_recording(&self.id, options).await?;
        tracing::info!("Recording started on session {}", self.id);
        Ok(status)
    }

    pub async fn stop_recording(&self) -> Result<RecordingStatus> {
        self.guard(SessionOperation::RecordingControl)?;
        let status = self.driver.stop_recording(&self.id).await?;
        tracing::info!(
            "Recording stopped on session {} after {} actions",
            self.id,
            status.action_count
        );
        Ok(status)
    }

    pub async fn recorded_actions(&self, since: u64) -> Result<Vec<RecordedAction>> {
        self.guard(SessionOperation::RecordingControl)?;
        Ok(self.driver.get_recorded_actions(&self.id, since).await?)
    }

    pub async fn recording_status(&self) -> Result<RecordingStatus> {
        self.guard(SessionOperation::RecordingControl)?;
        Ok(self.driver.recording_status(&self.id).await?)
    }

    pub async fn navigate(&self, request: &NavigateRequest) -> Result<NavigateResponse> {
        self.guard(SessionOperation::Navigate)?;
        let response = self.driver.navigate(&self.id, request).await?;
        if let Some(active) = self.pages.active_page_id() {
            self.pages
                .update_page_info(active, Some(response.url.clone()), response.title.clone())?;
        }
        Ok(response)
    }

    pub async fn update_viewport(&self, viewport: Viewport) -> Result<()> {
        self.guard(SessionOperation::Viewport)?;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(AutomationError::Validation(format!(
                "invalid viewport {}x{}",
                viewport.width, viewport.height
            )));
        }
        self.driver.update_viewport(&self.id, viewport).await?;
        *self.viewport.lock() = viewport;
        Ok(())
    }

    pub async fn capture_screenshot(&self, request: &ScreenshotRequest) -> Result<Screenshot> {
        self.guard(SessionOperation::Screenshot)?;
        Ok(self.driver.capture_screenshot(&self.id, request).await?)
    }

    pub async fn storage_state(&self) -> Result<Value> {
        self.guard(SessionOperation::Storage)?;
        Ok(self.driver.get_storage_state(&self.id).await?)
    }

    pub async fn validate_selector(&self, selector: &str, timeout_ms: u64) -> Result<SelectorValidation> {
        self.guard(SessionOperation::Selector)?;
        Ok(self.driver.validate_selector(&self.id, selector, timeout_ms).await?)
    }

    pub async fn update_stream_settings(&self, settings: &StreamSettings) -> Result<()> {
        self.guard(SessionOperation::Stream)?;
        Ok(self.driver.update_stream_settings(&self.id, settings).await?)
    }

    pub async fn reset(&self) -> Result<()> {
        self.guard(SessionOperation::Reset)?;
        Ok(self.driver.reset_session(&self.id).await?)
    }

    /// Close the session. Repeated calls return the cached artifacts without
    /// calling the driver again; a failed close reopens the session so the
    /// caller may retry.
    pub async fn close_with_artifacts(&self) -> Result<CloseArtifacts> {
        let mut cached = self.close_state.lock().await;
        if let Some(artifacts) = cached.as_ref() {
            return Ok(artifacts.clone());
        }
        check_operation(SessionOperation::Close, self.mode)?;

        self.closed.store(true, Ordering::SeqCst);
        match self.driver.close_session(&self.id).await {
            Ok(artifacts) => {
                tracing::info!(
                    "Closed session {} ({} video file(s))",
                    self.id,
                    artifacts.video_paths.len()
                );
                *cached = Some(artifacts.clone());
                Ok(artifacts)
            }
            Err(e) => {
                self.closed.store(false, Ordering::SeqCst);
                tracing::warn!("Failed to close session {}: {}", self.id, e);
                Err(e.into())
            }
        }
    }

    /// Artifacts of a completed close, if any.
    pub async fn close_artifacts(&self) -> Option<CloseArtifacts> {
        self.close_state.lock().await.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
