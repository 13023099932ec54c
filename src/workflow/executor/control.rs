//! Control-flow nodes: conditionals, loops and subflow calls.
//!
//! These run inside the executor. Each still reports `step.started` and
//! exactly one of `step.completed` / `step.failed` for its own index.

use crate::actions::metadata::lookup;
use crate::actions::ActionKind;
use crate::error::{AutomationError, Result};
use crate::outcome::{classify, AttemptId, StepFailure, StepOutcome};
use crate::variables::expression::{compare_named, evaluate_expression, is_truthy};
use crate::variables::interpolate::interpolate_value;
use crate::variables::{ExecutionState, VariableMap};
use crate::workflow::executor::context::{orchestration_failure, Frame, IndexScope, RunContext};
use crate::workflow::executor::dispatch::interpolate_instruction;
use crate::workflow::executor::graph::{run_graph, run_plan, Flow, GraphExit, NodeExit};
use crate::workflow::manager::StoreMode;
use crate::workflow::schema::{CompiledInstruction, PlanGraph};
use serde_json::{json, Value};

fn begin(ctx: &RunContext<'_>, frame: &Frame<'_>, instruction: &CompiledInstruction) -> AttemptId {
    let id = ctx.attempt_id(frame.scope.map(instruction.index), 1, instruction);
    ctx.emit_started(&id);
    id
}

fn fail(ctx: &RunContext<'_>, outcome: StepOutcome, failure: StepFailure) -> StepFailure {
    ctx.emit_outcome(outcome.fail(failure.clone()).finish());
    failure
}

/// Boolean test shared by conditionals and while loops.
#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Literal(bool),
    Expression(String),
    Variable {
        name: String,
        operator: String,
        expected: Value,
    },
    Value(Value),
}

impl Condition {
    /// Read the condition from the raw params, so expression operands are
    /// resolved at evaluation time rather than once up front.
    fn from_params(instruction: &CompiledInstruction) -> Result<Self> {
        let kind = instruction
            .param_str(&["conditionType", "condition_type"])
            .map(str::to_ascii_lowercase);
        let variable = instruction.param_str(&["conditionVariable", "variable", "variableName"]);

        if kind.as_deref() == Some("variable") || (kind.is_none() && variable.is_some() && !has_expression(instruction)) {
            let name = variable.ok_or_else(|| {
                AutomationError::Validation("variable condition requires a variable name".into())
            })?;
            return Ok(Condition::Variable {
                name: name.to_string(),
                operator: instruction
                    .param_str(&["conditionOperator", "operator"])
                    .unwrap_or("equals")
                    .to_string(),
                expected: instruction
                    .param("conditionValue")
                    .or_else(|| instruction.param("value"))
                    .cloned()
                    .unwrap_or(Value::Null),
            });
        }

        let value = ["condition", "expression", "conditionExpression"]
            .iter()
            .find_map(|key| instruction.param(key));
        match value {
            Some(Value::Bool(b)) => Ok(Condition::Literal(*b)),
            Some(Value::String(expr)) => Ok(Condition::Expression(expr.clone())),
            Some(other) => Ok(Condition::Value(other.clone())),
            None => Err(AutomationError::Validation(format!(
                "{} requires a condition",
                instruction.kind
            ))),
        }
    }

    fn evaluate(&self, state: &ExecutionState) -> bool {
        match self {
            Condition::Literal(b) => *b,
            Condition::Expression(expr) => evaluate_expression(expr, state).unwrap_or(false),
            Condition::Variable {
                name,
                operator,
                expected,
            } => {
                let actual = state.resolve(name);
                let expected = interpolate_value(expected, state);
                compare_named(actual.as_ref(), operator, &expected).unwrap_or(false)
            }
            Condition::Value(value) => is_truthy(&interpolate_value(value, state)),
        }
    }
}

fn has_expression(instruction: &CompiledInstruction) -> bool {
    ["condition", "expression", "conditionExpression"]
        .iter()
        .any(|key| instruction.param(key).is_some())
}

pub(crate) fn run_conditional(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    instruction: &CompiledInstruction,
) -> Flow<NodeExit> {
    let id = begin(ctx, frame, instruction);
    let mut outcome = StepOutcome::started(&id);
    match Condition::from_params(instruction) {
        Ok(condition) => {
            let taken = condition.evaluate(frame.state);
            tracing::debug!("Conditional {} evaluated to {}", instruction.node_id, taken);
            outcome.condition_result = Some(taken);
            ctx.emit_outcome(outcome.finish());
            Ok(NodeExit::Branch(taken))
        }
        Err(err) => Err(fail(ctx, outcome, classify(&err, &lookup(ActionKind::Conditional)))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum LoopMode {
    Items(Vec<Value>),
    Repeat(u64),
    While(Condition),
}

fn as_items(value: &Value, source: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => serde_json::from_str::<Vec<Value>>(s).map_err(|_| {
            AutomationError::Validation(format!("loop source {} is not an array", source))
        }),
        _ => Err(AutomationError::Validation(format!(
            "loop source {} is not an array",
            source
        ))),
    }
}

/// Items of a collection loop, from inline items or a store variable.
fn collection_items(resolved: &CompiledInstruction, state: &ExecutionState) -> Result<Option<Vec<Value>>> {
    for key in ["loopItems", "items"] {
        if let Some(value) = resolved.param(key) {
            return as_items(value, key).map(Some);
        }
    }
    for key in ["arraySource", "loopArraySource"] {
        match resolved.param(key) {
            Some(Value::String(name)) => {
                let value = state.resolve(name).ok_or_else(|| {
                    AutomationError::Validation(format!("loop source variable {} is not set", name))
                })?;
                return as_items(&value, name).map(Some);
            }
            Some(other) => return as_items(other, key).map(Some),
            None => {}
        }
    }
    Ok(None)
}

impl LoopMode {
    fn from_params(
        raw: &CompiledInstruction,
        resolved: &CompiledInstruction,
        state: &ExecutionState,
    ) -> Result<Self> {
        let loop_type = resolved
            .param_str(&["loopType", "loop_type"])
            .map(|s| s.to_ascii_lowercase().replace(['-', '_'], ""));
        match loop_type.as_deref() {
            Some("foreach" | "collection" | "each" | "for") => {
                Ok(LoopMode::Items(collection_items(resolved, state)?.unwrap_or_default()))
            }
            Some("while") => Ok(LoopMode::While(Condition::from_params(raw)?)),
            Some("repeat" | "count" | "times") => Ok(LoopMode::Repeat(repeat_count(resolved)?)),
            Some(other) => Err(AutomationError::Validation(format!(
                "unknown loop type {}",
                other
            ))),
            None => {
                if let Some(items) = collection_items(resolved, state)? {
                    Ok(LoopMode::Items(items))
                } else if resolved.param_u64(&["count", "times", "repeat"]).is_some() {
                    Ok(LoopMode::Repeat(repeat_count(resolved)?))
                } else {
                    Ok(LoopMode::While(Condition::from_params(raw)?))
                }
            }
        }
    }
}

fn repeat_count(resolved: &CompiledInstruction) -> Result<u64> {
    resolved
        .param_u64(&["count", "times", "repeat"])
        .ok_or_else(|| AutomationError::Validation("repeat loop requires a count".into()))
}

struct LoopSummary {
    iterations: u32,
    broke: bool,
}

pub(crate) async fn run_loop(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    instruction: &CompiledInstruction,
    body: Option<&PlanGraph>,
) -> Flow<NodeExit> {
    let id = begin(ctx, frame, instruction);
    match iterate(ctx, frame, instruction, body).await {
        Ok(summary) => {
            let mut outcome = StepOutcome::started(&id);
            outcome.probe_result = Some(json!({
                "iterations": summary.iterations,
                "broke": summary.broke,
            }));
            ctx.emit_outcome(outcome.finish());
            Ok(NodeExit::LoopDone {
                broke: summary.broke,
            })
        }
        Err(failure) => Err(fail(ctx, StepOutcome::started(&id), failure)),
    }
}

async fn iterate(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    raw: &CompiledInstruction,
    body: Option<&PlanGraph>,
) -> Flow<LoopSummary> {
    let metadata = lookup(ActionKind::Loop);
    let invalid = |err: AutomationError| classify(&err, &metadata);

    let resolved = interpolate_instruction(raw, frame.state);
    let cap = resolved
        .param_u64(&["maxIterations", "max_iterations"])
        .map(|m| m.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(ctx.config.max_loop_iterations)
        .max(1);
    let item_variable = resolved
        .param_str(&["itemVariable", "item_variable", "iterationVariable"])
        .unwrap_or("item")
        .to_string();
    let index_variable = resolved
        .param_str(&["indexVariable", "index_variable"])
        .unwrap_or("index")
        .to_string();
    let mode = LoopMode::from_params(raw, &resolved, frame.state).map_err(invalid)?;

    match &mode {
        LoopMode::Items(items) if items.len() > cap as usize => tracing::warn!(
            "Loop {} has {} items, only the first {} will run",
            raw.node_id,
            items.len(),
            cap
        ),
        LoopMode::Repeat(count) if *count > u64::from(cap) => tracing::warn!(
            "Loop {} repeat count {} capped at {}",
            raw.node_id,
            count,
            cap
        ),
        _ => {}
    }

    let empty = PlanGraph::default();
    let body = body.unwrap_or(&empty);
    let span = body.index_span();
    let min = body.min_index().unwrap_or(0);

    let mut iterations: u32 = 0;
    let mut broke = false;
    loop {
        let item = match &mode {
            LoopMode::Items(items) if iterations < cap => match items.get(iterations as usize) {
                Some(item) => Some(item.clone()),
                None => break,
            },
            LoopMode::Repeat(count) if iterations < cap && u64::from(iterations) < *count => None,
            LoopMode::Items(_) | LoopMode::Repeat(_) => break,
            LoopMode::While(condition) => {
                if !condition.evaluate(frame.state) {
                    break;
                }
                if iterations >= cap {
                    return Err(invalid(AutomationError::LoopLimit(cap)));
                }
                None
            }
        };
        ctx.checkpoint()?;

        if let Some(item) = item {
            frame.state.set(item_variable.as_str(), item);
        }
        frame.state.set(index_variable.as_str(), json!(iterations));

        let base = frame.state.allocate_index_range(span);
        let iteration = frame.with_scope(IndexScope { base, min });
        let exit = run_graph(ctx, &iteration, body, true).await?;
        iterations += 1;
        if exit == GraphExit::Break {
            broke = true;
            break;
        }
    }

    tracing::debug!("Loop {} ran {} iteration(s)", raw.node_id, iterations);
    Ok(LoopSummary { iterations, broke })
}

pub(crate) async fn run_subflow(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    instruction: &CompiledInstruction,
) -> Flow<NodeExit> {
    let id = begin(ctx, frame, instruction);
    let resolved = interpolate_instruction(instruction, frame.state);
    let mut outcome = StepOutcome::started(&id);

    match invoke(ctx, frame, &resolved).await {
        Ok((workflow_id, store)) => {
            let store_value = Value::Object(store.into_iter().collect());
            outcome.probe_result = Some(json!({
                "status": "completed",
                "workflow_id": workflow_id,
                "store": store_value.clone(),
            }));
            if let Some(output) = resolved.param_str(&["outputVariable", "output_variable"]) {
                outcome.extracted_data.insert(output.to_string(), store_value);
            }
            frame.state.merge(outcome.extracted_data.clone());
            ctx.emit_outcome(outcome.finish());
            Ok(NodeExit::Default)
        }
        Err(failure) => {
            outcome.probe_result = Some(json!({
                "status": "failed",
                "workflow_id": resolved.param_str(&["workflowId", "workflow_id", "subflowId"]),
            }));
            Err(fail(ctx, outcome, failure))
        }
    }
}

fn call_params(resolved: &CompiledInstruction) -> Result<VariableMap> {
    match resolved.param("parameters").or_else(|| resolved.param("args")) {
        Some(Value::Object(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Some(Value::Null) | None => Ok(VariableMap::new()),
        Some(_) => Err(AutomationError::Validation(
            "subflow parameters must be an object".into(),
        )),
    }
}

/// Run the child plan in its own state and index range. Returns the
/// workflow id and the child's final store.
async fn invoke(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    resolved: &CompiledInstruction,
) -> Flow<(String, VariableMap)> {
    let metadata = lookup(ActionKind::Subflow);
    let invalid = |err: AutomationError| classify(&err, &metadata);

    let workflow_id = resolved
        .param_str(&["workflowId", "workflow_id", "subflowId"])
        .ok_or_else(|| invalid(AutomationError::Validation("subflow requires workflowId".into())))?
        .to_string();
    if frame.depth >= ctx.config.max_subflow_depth {
        return Err(orchestration_failure(
            "subflow_depth",
            format!(
                "subflow {} exceeds the maximum nesting depth of {}",
                workflow_id, ctx.config.max_subflow_depth
            ),
        ));
    }
    let resolver = ctx
        .resolver
        .ok_or_else(|| invalid(AutomationError::WorkflowNotFound(workflow_id.clone())))?;
    let plan = resolver.resolve(&workflow_id).await.map_err(invalid)?;
    plan.validate().map_err(invalid)?;

    let mode = resolved
        .param_str(&["storeMode", "store_mode"])
        .and_then(StoreMode::parse)
        .unwrap_or(ctx.config.subflow_store_mode);
    let params = call_params(resolved).map_err(invalid)?;
    let store = match mode {
        StoreMode::Fresh => VariableMap::new(),
        StoreMode::Copy | StoreMode::Shared => frame.state.copy_store(),
    };
    let child_state = frame.state.child(store, params, frame.state.copy_env());
    let base = frame.state.allocate_index_range(plan.index_span());
    let child = Frame {
        plan: plan.as_ref(),
        state: &child_state,
        scope: IndexScope {
            base,
            min: plan.min_index().unwrap_or(0),
        },
        depth: frame.depth + 1,
    };

    tracing::info!(
        "Running subflow {} at depth {} (indices from {})",
        workflow_id,
        child.depth,
        base
    );
    run_plan(ctx, &child).await?;

    let store = child_state.copy_store();
    if mode == StoreMode::Shared {
        frame.state.merge(store.clone());
    }
    Ok((workflow_id, store))
}
