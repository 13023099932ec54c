//! Failure taxonomy and the classifier that maps errors onto it.

use crate::actions::metadata::ActionMetadata;
use crate::driver::DriverError;
use crate::error::AutomationError;
use crate::variables::state::VariableMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[default]
    None,
    Engine,
    Infra,
    Orchestration,
    User,
    Timeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::None => "none",
            FailureKind::Engine => "engine",
            FailureKind::Infra => "infra",
            FailureKind::Orchestration => "orchestration",
            FailureKind::User => "user",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    Engine,
    Executor,
    Recorder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
    pub fatal: bool,
    pub retryable: bool,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub details: VariableMap,
    pub source: FailureSource,
}

impl StepFailure {
    /// Failure with the default policy of its kind.
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        let (fatal, retryable, source) = match kind {
            FailureKind::Cancelled => (true, false, FailureSource::Executor),
            FailureKind::Timeout => (false, true, FailureSource::Executor),
            FailureKind::User | FailureKind::Orchestration => (true, false, FailureSource::Executor),
            FailureKind::Engine => (false, false, FailureSource::Engine),
            FailureKind::Infra => (true, false, FailureSource::Engine),
            FailureKind::None => (false, false, FailureSource::Executor),
        };
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            fatal,
            retryable,
            occurred_at: Utc::now(),
            details: VariableMap::new(),
            source,
        }
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn source(mut self, source: FailureSource) -> Self {
        self.source = source;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Whether this failure must end the execution regardless of per-step policy.
    pub fn terminates_execution(&self) -> bool {
        self.fatal || matches!(self.kind, FailureKind::User | FailureKind::Orchestration)
    }
}

/// Driver error codes that mean "the element did not show up in time".
fn is_selector_timeout(code: &str) -> bool {
    let code = code.to_ascii_lowercase();
    code.contains("selector_timeout")
        || code.contains("element_not_found")
        || code.contains("wait_timeout")
}

/// Map an error raised while running a step onto the failure taxonomy.
pub fn classify(err: &AutomationError, metadata: &ActionMetadata) -> StepFailure {
    let message = err.to_string();
    match err {
        AutomationError::Cancelled => StepFailure::new(FailureKind::Cancelled, "cancelled", message),
        AutomationError::Timeout(ms) => {
            StepFailure::new(FailureKind::Timeout, "step_timeout", message).detail("timeout_ms", json!(ms))
        }
        AutomationError::DeadlineExceeded(ms) => {
            StepFailure::new(FailureKind::Timeout, "execution_deadline", message)
                .fatal(true)
                .retryable(false)
                .detail("timeout_ms", json!(ms))
        }
        AutomationError::LoopLimit(max) => StepFailure::new(FailureKind::Timeout, "loop_limit", message)
            .fatal(true)
            .retryable(false)
            .detail("max_iterations", json!(max)),
        AutomationError::UnsupportedAction(kind) => {
            StepFailure::new(FailureKind::User, "unsupported_action", message)
                .detail("type", json!(kind))
        }
        AutomationError::Validation(_) | AutomationError::Json(_) => {
            StepFailure::new(FailureKind::User, "invalid_params", message)
        }
        AutomationError::EntrySelectorMissing(selector) => {
            StepFailure::new(FailureKind::User, "entry_selector_missing", message)
                .detail("selector", json!(selector))
                .detail(
                    "hint",
                    json!("Navigate to the page the workflow was recorded on, or update the entry selector"),
                )
        }
        AutomationError::AssertionFailed(_) => {
            StepFailure::new(FailureKind::User, "assertion_failed", message)
        }
        AutomationError::Plan(_) => {
            StepFailure::new(FailureKind::Orchestration, "plan_inconsistent", message)
        }
        AutomationError::WorkflowNotFound(id) => {
            StepFailure::new(FailureKind::Orchestration, "workflow_not_found", message)
                .detail("workflow_id", json!(id))
        }
        AutomationError::ModeViolation(_) => {
            StepFailure::new(FailureKind::Infra, "mode_violation", message).source(FailureSource::Executor)
        }
        AutomationError::SessionClosed(_) => StepFailure::new(FailureKind::Infra, "session_closed", message),
        AutomationError::SessionNotFound(_) => {
            StepFailure::new(FailureKind::Infra, "session_not_found", message)
        }
        AutomationError::CapabilityGap(_) => {
            StepFailure::new(FailureKind::Infra, "capability_gap", message)
        }
        AutomationError::Io(_)
        | AutomationError::Config(_)
        | AutomationError::TomlSerialize(_)
        | AutomationError::TomlDeserialize(_) => {
            StepFailure::new(FailureKind::Infra, "infra", message).source(FailureSource::Executor)
        }
        AutomationError::Driver(driver) => classify_driver(driver, metadata, message),
    }
}

fn classify_driver(err: &DriverError, metadata: &ActionMetadata, message: String) -> StepFailure {
    let failure = StepFailure::new(FailureKind::Engine, "driver_error", message);
    match err {
        DriverError::Connection(_) => failure.retryable(true).with_code("driver_connection"),
        DriverError::Timeout(_) => failure.retryable(true).with_code("driver_timeout"),
        DriverError::Status { status, code, .. } => {
            let transient = *status >= 500 || *status == 408 || *status == 429;
            let failure = failure
                .retryable(transient)
                .with_code(code.clone().unwrap_or_else(|| format!("http_{}", status)))
                .detail("status", json!(status));
            if *status == 404 {
                failure.kind_infra()
            } else {
                failure
            }
        }
        DriverError::Decode(_) => failure.with_code("driver_decode"),
        DriverError::Step { code, retryable, .. } => {
            let retryable = if is_selector_timeout(code) {
                metadata.needs_selector_wait
            } else {
                *retryable
            };
            failure.retryable(retryable).with_code(code.clone())
        }
    }
}

impl StepFailure {
    fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    fn kind_infra(mut self) -> Self {
        self.kind = FailureKind::Infra;
        self.fatal = true;
        self.retryable = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::metadata::lookup;
    use crate::actions::ActionKind;

    #[test]
    fn test_executor_classes() {
        let meta = lookup(ActionKind::Click);
        let cancelled = classify(&AutomationError::Cancelled, &meta);
        assert_eq!(cancelled.kind, FailureKind::Cancelled);
        assert!(cancelled.fatal && !cancelled.retryable);

        let timeout = classify(&AutomationError::Timeout(30_000), &meta);
        assert_eq!(timeout.kind, FailureKind::Timeout);
        assert!(!timeout.fatal && timeout.retryable);

        let user = classify(&AutomationError::UnsupportedAction("x".into()), &meta);
        assert_eq!(user.kind, FailureKind::User);
        assert!(user.fatal);

        let plan = classify(&AutomationError::Plan("missing target".into()), &meta);
        assert_eq!(plan.kind, FailureKind::Orchestration);
        assert!(plan.terminates_execution());

        let gap = classify(&AutomationError::CapabilityGap("video".into()), &meta);
        assert_eq!(gap.kind, FailureKind::Infra);
        assert!(gap.fatal);
    }

    #[test]
    fn test_loop_limit_is_timeout_kind() {
        let failure = classify(&AutomationError::LoopLimit(1000), &lookup(ActionKind::Loop));
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_driver_transient_vs_deterministic() {
        let meta = lookup(ActionKind::Click);
        let reset = AutomationError::Driver(DriverError::Connection("reset".into()));
        let failure = classify(&reset, &meta);
        assert_eq!(failure.kind, FailureKind::Engine);
        assert_eq!(failure.source, FailureSource::Engine);
        assert!(failure.retryable && !failure.fatal);

        let server = AutomationError::Driver(DriverError::Status {
            status: 503,
            code: None,
            message: "busy".into(),
        });
        assert!(classify(&server, &meta).retryable);

        let bad_request = AutomationError::Driver(DriverError::Status {
            status: 400,
            code: Some("bad_selector".into()),
            message: "bad".into(),
        });
        let failure = classify(&bad_request, &meta);
        assert!(!failure.retryable);
        assert_eq!(failure.code, "bad_selector");
    }

    #[test]
    fn test_selector_timeout_depends_on_metadata() {
        let err = AutomationError::Driver(DriverError::Step {
            code: "selector_timeout".into(),
            message: "#go not found".into(),
            retryable: false,
        });
        assert!(classify(&err, &lookup(ActionKind::Click)).retryable);
        assert!(!classify(&err, &lookup(ActionKind::Navigate)).retryable);
    }

    #[test]
    fn test_entry_selector_carries_hint() {
        let failure = classify(
            &AutomationError::EntrySelectorMissing("#app".into()),
            &lookup(ActionKind::Click),
        );
        assert_eq!(failure.kind, FailureKind::User);
        assert!(failure.details.contains_key("hint"));
    }
}
