//! Per-run context threaded through the graph walk.

use crate::actions::metadata::lookup;
use crate::actions::ActionKind;
use crate::config::ExecutorConfig;
use crate::error::AutomationError;
use crate::events::{EventKind, EventPayload, ExecutionStream, StepStartedEvent, StepTelemetry};
use crate::outcome::{classify, AttemptId, FailureKind, StepFailure, StepOutcome};
use crate::session::Session;
use crate::variables::ExecutionState;
use crate::workflow::executor::retry::RetryPolicy;
use crate::workflow::manager::SubflowResolver;
use crate::workflow::schema::{CompiledInstruction, ExecutionPlan};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything shared by the steps of one execution, subflows included.
pub(crate) struct RunContext<'a> {
    pub session: &'a Session,
    pub stream: &'a ExecutionStream,
    pub config: &'a ExecutorConfig,
    pub resolver: Option<&'a Arc<dyn SubflowResolver>>,
    pub policy: RetryPolicy,
    pub cancel: CancellationToken,
    pub deadline: Instant,
    pub execution_timeout_ms: u64,
    pub execution_id: Uuid,
    steps_run: AtomicU64,
}

impl<'a> RunContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: &'a Session,
        stream: &'a ExecutionStream,
        config: &'a ExecutorConfig,
        resolver: Option<&'a Arc<dyn SubflowResolver>>,
        cancel: CancellationToken,
        execution_timeout_ms: u64,
    ) -> Self {
        Self {
            session,
            stream,
            config,
            resolver,
            policy: RetryPolicy::from_config(config),
            cancel,
            deadline: Instant::now() + std::time::Duration::from_millis(execution_timeout_ms),
            execution_timeout_ms,
            execution_id: stream.execution_id(),
            steps_run: AtomicU64::new(0),
        }
    }

    pub fn steps_run(&self) -> u64 {
        self.steps_run.load(Ordering::SeqCst)
    }

    /// Cancellation and deadline check at a step boundary.
    pub fn checkpoint(&self) -> Result<(), StepFailure> {
        if self.cancel.is_cancelled() {
            return Err(boundary_failure(&AutomationError::Cancelled));
        }
        if Instant::now() >= self.deadline {
            return Err(boundary_failure(&AutomationError::DeadlineExceeded(
                self.execution_timeout_ms,
            )));
        }
        Ok(())
    }

    pub fn attempt_id(&self, index: usize, attempt: u32, instruction: &CompiledInstruction) -> AttemptId {
        AttemptId {
            execution_id: self.execution_id,
            step_index: index,
            attempt,
            node_id: instruction.node_id.clone(),
            step_type: instruction.kind.as_str().to_string(),
        }
    }

    pub fn emit_started(&self, id: &AttemptId) {
        if id.attempt == 1 {
            self.steps_run.fetch_add(1, Ordering::SeqCst);
        }
        self.stream.emit(
            EventKind::StepStarted,
            Some((id.step_index, id.attempt)),
            EventPayload::StepStarted(StepStartedEvent {
                node_id: id.node_id.clone(),
                step_type: id.step_type.clone(),
            }),
        );
    }

    /// Emit `step.completed` or `step.failed` for a finished attempt.
    pub fn emit_outcome(&self, outcome: StepOutcome) {
        let kind = if outcome.success {
            EventKind::StepCompleted
        } else {
            EventKind::StepFailed
        };
        let step = Some((outcome.step_index, outcome.attempt));
        self.stream.emit(kind, step, EventPayload::Outcome(Box::new(outcome)));
    }

    pub fn emit_telemetry(&self, kind: EventKind, telemetry: StepTelemetry) -> bool {
        let step = Some((telemetry.step_index, telemetry.attempt));
        self.stream.emit(kind, step, EventPayload::Telemetry(telemetry))
    }

    pub fn step_timeout_ms(&self, plan: &ExecutionPlan, instruction: &CompiledInstruction) -> u64 {
        instruction
            .param_u64(&["timeoutMs", "timeout_ms", "timeout"])
            .or_else(|| plan.step_timeout_ms())
            .unwrap_or(self.config.step_timeout_ms)
    }
}

/// Failure raised outside any step, e.g. during preflight.
pub(crate) fn boundary_failure(err: &AutomationError) -> StepFailure {
    classify(err, &lookup(ActionKind::Custom))
}

pub(crate) fn orchestration_failure(code: &str, message: impl Into<String>) -> StepFailure {
    StepFailure::new(FailureKind::Orchestration, code, message)
}

/// Index window a graph level runs in. Emitted indices are
/// `base + (local - min)`, so loop iterations and subflows land in the
/// range they allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexScope {
    pub base: usize,
    pub min: usize,
}

impl IndexScope {
    pub const IDENTITY: IndexScope = IndexScope { base: 0, min: 0 };

    pub fn map(&self, local: usize) -> usize {
        self.base + local.saturating_sub(self.min)
    }
}

/// One level of plan execution: which plan, whose state, where indices land.
pub(crate) struct Frame<'p> {
    pub plan: &'p ExecutionPlan,
    pub state: &'p ExecutionState,
    pub scope: IndexScope,
    pub depth: u32,
}

impl<'p> Frame<'p> {
    pub fn root(plan: &'p ExecutionPlan, state: &'p ExecutionState) -> Self {
        Self {
            plan,
            state,
            scope: IndexScope::IDENTITY,
            depth: 0,
        }
    }

    pub fn with_scope(&self, scope: IndexScope) -> Frame<'p> {
        Frame {
            plan: self.plan,
            state: self.state,
            scope,
            depth: self.depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_scope_mapping() {
        assert_eq!(IndexScope::IDENTITY.map(7), 7);
        let scope = IndexScope { base: 40, min: 5 };
        assert_eq!(scope.map(5), 40);
        assert_eq!(scope.map(6), 41);
    }
}
