//! Browser and local action dispatch with retries and heartbeats.

use crate::actions::metadata::{lookup, ActionMetadata};
use crate::actions::ActionKind;
use crate::error::{AutomationError, Result};
use crate::events::{AttemptTelemetry, EventKind, RetryNotice};
use crate::outcome::{classify, AssertionResult, AttemptId, StepFailure, StepOutcome};
use crate::variables::expression::evaluate_expression;
use crate::variables::interpolate::{interpolate_map, interpolate_value};
use crate::variables::{ExecutionState, VariableMap};
use crate::workflow::executor::context::{boundary_failure, Frame, RunContext};
use crate::workflow::schema::CompiledInstruction;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{interval_at, sleep, sleep_until, Instant};

/// Copy of `instruction` with every param, context entry and the raw action
/// payload interpolated against `state`.
pub(crate) fn interpolate_instruction(
    instruction: &CompiledInstruction,
    state: &ExecutionState,
) -> CompiledInstruction {
    CompiledInstruction {
        params: interpolate_map(&instruction.params, state),
        context: interpolate_map(&instruction.context, state),
        action: instruction.action.as_ref().map(|a| interpolate_value(a, state)),
        ..instruction.clone()
    }
}

/// Run a non-control instruction until it succeeds, exhausts its attempts
/// or fails in a way that must not be retried.
pub(crate) async fn run_action(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    raw: &CompiledInstruction,
) -> std::result::Result<(), StepFailure> {
    let metadata = lookup(raw.kind);
    let policy = ctx.policy.for_instruction(raw);
    let index = frame.scope.map(raw.index);
    let resolved = interpolate_instruction(raw, frame.state);

    let mut attempt = 1;
    loop {
        let id = ctx.attempt_id(index, attempt, raw);
        let mut telemetry = AttemptTelemetry::new(ctx.execution_id, index, attempt);
        ctx.emit_started(&id);

        let outcome = run_attempt(ctx, frame, raw, &resolved, &id, &metadata, &mut telemetry)
            .await
            .finish();

        if outcome.success {
            frame.state.merge(outputs(&resolved, &outcome));
            ctx.emit_outcome(outcome);
            return Ok(());
        }

        let failure = outcome
            .failure
            .clone()
            .unwrap_or_else(|| classify(&AutomationError::Validation("step failed".into()), &metadata));
        tracing::warn!(
            "Step {} ({}) attempt {}/{} failed: {}",
            index,
            raw.kind,
            attempt,
            policy.max_attempts,
            failure.message
        );
        ctx.emit_outcome(outcome);

        if !failure.retryable || failure.terminates_execution() || attempt >= policy.max_attempts {
            return Err(failure);
        }

        let delay = policy.delay_for(attempt);
        ctx.emit_telemetry(
            EventKind::StepTelemetry,
            telemetry.retry(RetryNotice {
                failed_attempt: attempt,
                next_attempt: attempt + 1,
                max_attempts: policy.max_attempts,
                delay_ms: delay.as_millis() as u64,
                reason: failure.code.clone(),
            }),
        );
        backoff(ctx, delay).await?;
        attempt += 1;
    }
}

/// Sleep between attempts, waking early on cancellation or the execution deadline.
async fn backoff(ctx: &RunContext<'_>, delay: Duration) -> std::result::Result<(), StepFailure> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(boundary_failure(&AutomationError::Cancelled)),
        _ = sleep_until(ctx.deadline) => Err(boundary_failure(
            &AutomationError::DeadlineExceeded(ctx.execution_timeout_ms),
        )),
        _ = sleep(delay) => Ok(()),
    }
}

/// One attempt under the step timeout, emitting heartbeats while it waits.
async fn run_attempt(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    raw: &CompiledInstruction,
    resolved: &CompiledInstruction,
    id: &AttemptId,
    metadata: &ActionMetadata,
    telemetry: &mut AttemptTelemetry,
) -> StepOutcome {
    let timeout_ms = ctx.step_timeout_ms(frame.plan, raw);
    let step_deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let period = Duration::from_millis(ctx.config.heartbeat_interval_ms.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);

    let work = perform(ctx, frame, raw, resolved, id, metadata, timeout_ms);
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break Err(AutomationError::Cancelled),
            res = &mut work => break res,
            _ = sleep_until(ctx.deadline) => {
                break Err(AutomationError::DeadlineExceeded(ctx.execution_timeout_ms))
            }
            _ = sleep_until(step_deadline) => break Err(AutomationError::Timeout(timeout_ms)),
            _ = ticker.tick() => {
                ctx.emit_telemetry(EventKind::StepHeartbeat, telemetry.heartbeat());
            }
        }
    };

    match result {
        Ok(outcome) => outcome,
        Err(err) => StepOutcome::started(id).fail(classify(&err, metadata)),
    }
}

async fn perform(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    raw: &CompiledInstruction,
    resolved: &CompiledInstruction,
    id: &AttemptId,
    metadata: &ActionMetadata,
    timeout_ms: u64,
) -> Result<StepOutcome> {
    ensure_entry(ctx, frame, metadata).await?;

    match resolved.kind {
        ActionKind::SetVariable => set_variable(resolved, id),
        ActionKind::UseVariable => use_variable(resolved, frame.state, id),
        ActionKind::Assert if raw.param("expression").is_some() => {
            Ok(assert_expression(raw, frame.state, id, metadata))
        }
        _ => ctx.session.run(resolved, id, timeout_ms).await,
    }
}

/// Verify the plan's entry selector once per state, before the first step
/// that needs an element on the page.
async fn ensure_entry(ctx: &RunContext<'_>, frame: &Frame<'_>, metadata: &ActionMetadata) -> Result<()> {
    if !metadata.requires_element || frame.state.has_checked_entry() {
        return Ok(());
    }
    let Some(selector) = frame.plan.entry_selector() else {
        return Ok(());
    };
    let validation = ctx
        .session
        .validate_selector(selector, ctx.config.entry_selector_timeout_ms)
        .await?;
    if !validation.found() {
        return Err(AutomationError::EntrySelectorMissing(selector.to_string()));
    }
    frame.state.mark_entry_checked();
    tracing::debug!("Entry selector {} present", selector);
    Ok(())
}

fn variable_name(instruction: &CompiledInstruction) -> Result<String> {
    instruction
        .param_str(&["name", "variable", "variableName", "key"])
        .map(str::to_string)
        .ok_or_else(|| {
            AutomationError::Validation(format!("{} requires a variable name", instruction.kind))
        })
}

fn set_variable(instruction: &CompiledInstruction, id: &AttemptId) -> Result<StepOutcome> {
    let name = variable_name(instruction)?;
    let value = instruction.param("value").cloned().unwrap_or(Value::Null);
    let mut outcome = StepOutcome::started(id);
    outcome.extracted_data.insert(name, value.clone());
    outcome.probe_result = Some(value);
    Ok(outcome)
}

fn use_variable(instruction: &CompiledInstruction, state: &ExecutionState, id: &AttemptId) -> Result<StepOutcome> {
    let name = variable_name(instruction)?;
    let value = state
        .resolve(&name)
        .ok_or_else(|| AutomationError::Validation(format!("variable {} is not set", name)))?;
    let mut outcome = StepOutcome::started(id);
    outcome.probe_result = Some(value);
    Ok(outcome)
}

/// Assertions with an `expression` param are evaluated here; the raw
/// expression is used so operands keep their types.
fn assert_expression(
    raw: &CompiledInstruction,
    state: &ExecutionState,
    id: &AttemptId,
    metadata: &ActionMetadata,
) -> StepOutcome {
    let expression = raw.param_str(&["expression"]).unwrap_or_default();
    let passed = evaluate_expression(expression, state) == Some(true);
    let mut outcome = StepOutcome::started(id);
    outcome.assertion = Some(AssertionResult {
        passed,
        expected: Some(json!(true)),
        actual: Some(json!(passed)),
        message: expression.to_string(),
    });
    if passed {
        outcome
    } else {
        outcome.fail(classify(
            &AutomationError::AssertionFailed(expression.to_string()),
            metadata,
        ))
    }
}

/// Values a successful step writes to `store`: its extracted data plus the
/// `storeAs` binding when the instruction asks for one.
fn outputs(instruction: &CompiledInstruction, outcome: &StepOutcome) -> VariableMap {
    let mut values = outcome.extracted_data.clone();
    if let Some(target) = instruction.param_str(&["storeAs", "store_as", "outputVariable"]) {
        let value = match (&outcome.probe_result, outcome.extracted_data.len()) {
            (Some(probe), _) => probe.clone(),
            (None, 1) => outcome.extracted_data.values().next().cloned().unwrap_or(Value::Null),
            (None, _) => Value::Object(
                outcome
                    .extracted_data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        };
        values.insert(target.to_string(), value);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(kind: ActionKind) -> AttemptId {
        AttemptId {
            execution_id: Uuid::new_v4(),
            step_index: 0,
            attempt: 1,
            node_id: "n".into(),
            step_type: kind.as_str().into(),
        }
    }

    fn state_with(key: &str, value: Value) -> ExecutionState {
        let state = ExecutionState::default();
        state.set(key, value);
        state
    }

    #[test]
    fn test_interpolation_keeps_native_types() {
        let state = state_with("items", json!([1, 2]));
        let instruction = CompiledInstruction::new(0, "n", ActionKind::Custom)
            .with_param("list", json!("${@store/items}"))
            .with_param("label", json!("count: ${@store/items.0}"));
        let resolved = interpolate_instruction(&instruction, &state);
        assert_eq!(resolved.param("list"), Some(&json!([1, 2])));
        assert_eq!(resolved.param("label"), Some(&json!("count: 1")));
        assert_eq!(instruction.param("list"), Some(&json!("${@store/items}")));
    }

    #[test]
    fn test_set_variable_reports_through_extracted_data() {
        let instruction = CompiledInstruction::new(0, "n", ActionKind::SetVariable)
            .with_param("name", json!("title"))
            .with_param("value", json!("Example Domain"));
        let outcome = set_variable(&instruction, &id(ActionKind::SetVariable)).unwrap();
        assert_eq!(outcome.extracted_data.get("title"), Some(&json!("Example Domain")));

        let missing = CompiledInstruction::new(0, "n", ActionKind::SetVariable);
        assert!(set_variable(&missing, &id(ActionKind::SetVariable)).is_err());
    }

    #[test]
    fn test_use_variable_with_store_as() {
        let state = state_with("user", json!({ "name": "ada" }));
        let instruction = CompiledInstruction::new(0, "n", ActionKind::UseVariable)
            .with_param("name", json!("user.name"))
            .with_param("storeAs", json!("who"));
        let outcome = use_variable(&instruction, &state, &id(ActionKind::UseVariable)).unwrap();
        assert_eq!(outputs(&instruction, &outcome).get("who"), Some(&json!("ada")));

        let unknown = CompiledInstruction::new(0, "n", ActionKind::UseVariable).with_param("name", json!("nope"));
        assert!(use_variable(&unknown, &state, &id(ActionKind::UseVariable)).is_err());
    }

    #[test]
    fn test_expression_assertions() {
        let state = state_with("title", json!("Example Domain"));
        let metadata = lookup(ActionKind::Assert);
        let passing = CompiledInstruction::new(0, "n", ActionKind::Assert)
            .with_param("expression", json!("${@store/title} == \"Example Domain\""));
        let outcome = assert_expression(&passing, &state, &id(ActionKind::Assert), &metadata);
        assert!(outcome.success);
        assert!(outcome.assertion.unwrap().passed);

        let failing = CompiledInstruction::new(0, "n", ActionKind::Assert)
            .with_param("expression", json!("${@store/title} == \"Other\""));
        let outcome = assert_expression(&failing, &state, &id(ActionKind::Assert), &metadata);
        assert!(!outcome.success);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.code, "assertion_failed");
        assert!(failure.fatal);
    }

    #[test]
    fn test_store_as_wraps_multiple_extracted_values() {
        let instruction = CompiledInstruction::new(0, "n", ActionKind::Extract).with_param("storeAs", json!("row"));
        let mut outcome = StepOutcome::started(&id(ActionKind::Extract));
        outcome.extracted_data.insert("a".into(), json!(1));
        outcome.extracted_data.insert("b".into(), json!(2));
        let values = outputs(&instruction, &outcome);
        assert_eq!(values.get("row"), Some(&json!({ "a": 1, "b": 2 })));
        assert_eq!(values.get("a"), Some(&json!(1)));
    }
}
