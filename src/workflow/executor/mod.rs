//! Plan executor.
//!
//! Walks a compiled plan against one session, recursing into loop bodies
//! and subflow plans, and reports every step on the execution's event
//! stream. Exactly one terminal event closes each run.

mod context;
mod control;
mod dispatch;
mod graph;
mod retry;

pub use retry::RetryPolicy;

use crate::capabilities::{CapabilityRequirement, EngineCapabilities};
use crate::config::ExecutorConfig;
use crate::error::AutomationError;
use crate::events::{EventKind, EventPayload, ExecutionEvent, ExecutionStatus, ExecutionStream};
use crate::outcome::{FailureKind, StepFailure};
use crate::session::{check_operation, Session, SessionOperation};
use crate::variables::{ExecutionState, VariableMap};
use crate::workflow::manager::SubflowResolver;
use crate::workflow::schema::ExecutionPlan;
use chrono::{DateTime, Utc};
use context::{boundary_failure, Frame, RunContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A plan plus the inputs of one run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub plan: Arc<ExecutionPlan>,
    /// Initial `store`.
    pub inputs: VariableMap,
    pub params: VariableMap,
    pub env: VariableMap,
    /// Overrides the configured execution timeout.
    pub timeout_ms: Option<u64>,
    pub cancel: CancellationToken,
}

impl ExecutionRequest {
    pub fn new(plan: Arc<ExecutionPlan>) -> Self {
        Self {
            plan,
            inputs: VariableMap::new(),
            params: VariableMap::new(),
            env: VariableMap::new(),
            timeout_ms: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: VariableMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_params(mut self, params: VariableMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_env(mut self, env: VariableMap) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub final_store: VariableMap,
    pub steps_run: u64,
    /// Sequence carried by the terminal envelope.
    pub last_sequence: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

pub struct WorkflowExecutor {
    config: ExecutorConfig,
    resolver: Option<Arc<dyn SubflowResolver>>,
    capabilities: Option<EngineCapabilities>,
}

impl WorkflowExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            resolver: None,
            capabilities: None,
        }
    }

    /// Resolver used by subflow steps. Without one every subflow fails.
    pub fn with_resolver(mut self, resolver: Arc<dyn SubflowResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Engine capabilities checked against each plan before it runs.
    pub fn with_capabilities(mut self, capabilities: EngineCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `request.plan` on `session`, reporting on `stream`. The stream is
    /// closed once the terminal event is queued.
    pub async fn execute(
        &self,
        session: &Session,
        stream: &ExecutionStream,
        request: ExecutionRequest,
    ) -> ExecutionReport {
        let started_at = Utc::now();
        let plan = Arc::clone(&request.plan);
        tracing::info!(
            "Starting execution {} of workflow {} on session {}",
            stream.execution_id(),
            plan.workflow_id,
            session.id()
        );
        stream.emit(
            EventKind::ExecutionStarted,
            None,
            EventPayload::Execution(ExecutionEvent {
                status: ExecutionStatus::Running,
                failure: None,
                steps_run: 0,
            }),
        );

        let state = ExecutionState::new(request.inputs, request.params, request.env);
        state.set_next_index_from_plan(&plan);

        let timeout_ms = request.timeout_ms.unwrap_or(self.config.execution_timeout_ms);
        let ctx = RunContext::new(
            session,
            stream,
            &self.config,
            self.resolver.as_ref(),
            request.cancel,
            timeout_ms,
        );

        let result = match self.preflight(session, &plan) {
            Ok(()) => graph::run_plan(&ctx, &Frame::root(&plan, &state)).await,
            Err(failure) => Err(failure),
        };

        let (status, failure) = match result {
            Ok(()) => (ExecutionStatus::Completed, None),
            Err(failure) if failure.kind == FailureKind::Cancelled => {
                (ExecutionStatus::Cancelled, Some(failure))
            }
            Err(failure) => (ExecutionStatus::Failed, Some(failure)),
        };
        let steps_run = ctx.steps_run();

        match &failure {
            None => tracing::info!(
                "Execution {} completed after {} step(s)",
                stream.execution_id(),
                steps_run
            ),
            Some(f) => tracing::warn!(
                "Execution {} ended {:?}: {} ({})",
                stream.execution_id(),
                status,
                f.message,
                f.code
            ),
        }

        stream.emit(
            status.terminal_event(),
            None,
            EventPayload::Execution(ExecutionEvent {
                status,
                failure: failure.clone(),
                steps_run,
            }),
        );
        let last_sequence = stream.final_sequence();
        stream.close();

        ExecutionReport {
            execution_id: stream.execution_id(),
            workflow_id: stream.workflow_id(),
            status,
            failure,
            final_store: state.copy_store(),
            steps_run,
            last_sequence,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Checks that need no driver call: session mode, plan structure and
    /// the engine's advertised capabilities.
    fn preflight(&self, session: &Session, plan: &ExecutionPlan) -> Result<(), StepFailure> {
        check_operation(SessionOperation::Run, session.mode()).map_err(|e| boundary_failure(&e))?;
        plan.validate().map_err(|e| boundary_failure(&e))?;

        if let Some(capabilities) = &self.capabilities {
            let requirement = CapabilityRequirement::from_plan(plan);
            let gap = capabilities.check_compatibility(&requirement);
            for warning in &gap.warnings {
                tracing::warn!("Capability warning for workflow {}: {}", plan.workflow_id, warning);
            }
            if !gap.satisfied() {
                return Err(boundary_failure(&AutomationError::CapabilityGap(
                    gap.missing.join(", "),
                )));
            }
        }
        Ok(())
    }
}

impl Default for WorkflowExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}
