//! Graph traversal and edge selection.

use crate::actions::{ActionKind, LoopPort, LOOP_BREAK_TARGET, LOOP_CONTINUE_TARGET};
use crate::outcome::StepFailure;
use crate::variables::expression::evaluate_expression;
use crate::variables::ExecutionState;
use crate::workflow::executor::context::{orchestration_failure, Frame, RunContext};
use crate::workflow::executor::{control, dispatch};
use crate::workflow::schema::{CompiledInstruction, PlanEdge, PlanGraph, PlanStep};
use async_recursion::async_recursion;

pub(crate) type Flow<T> = std::result::Result<T, StepFailure>;

/// How a node finished, used to pick its outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeExit {
    Default,
    Branch(bool),
    LoopDone { broke: bool },
}

/// How a graph level finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GraphExit {
    Completed,
    Break,
    Continue,
}

/// Run a whole plan: its graph when present, else its instructions in index order.
pub(crate) async fn run_plan(ctx: &RunContext<'_>, frame: &Frame<'_>) -> Flow<()> {
    match &frame.plan.graph {
        Some(graph) => match run_graph(ctx, frame, graph, false).await? {
            GraphExit::Completed => Ok(()),
            _ => Err(orchestration_failure(
                "loop_sentinel_outside_loop",
                "loop control target reached outside a loop body",
            )),
        },
        None => {
            for instruction in frame.plan.ordered_instructions() {
                ctx.checkpoint()?;
                run_node(ctx, frame, instruction, None).await?;
            }
            Ok(())
        }
    }
}

pub(crate) async fn run_graph(
    ctx: &RunContext<'_>,
    frame: &Frame<'_>,
    graph: &PlanGraph,
    in_loop: bool,
) -> Flow<GraphExit> {
    let Some(mut current) = graph.entry() else {
        return Ok(GraphExit::Completed);
    };
    let mut transitions: u64 = 0;

    loop {
        transitions += 1;
        if transitions > ctx.config.max_transitions {
            return Err(orchestration_failure(
                "transition_limit",
                format!("more than {} transitions in one graph", ctx.config.max_transitions),
            ));
        }
        ctx.checkpoint()?;

        let instruction = current.to_instruction(frame.plan.instruction(&current.node_id));
        let exit = run_node(ctx, frame, &instruction, Some(current)).await?;

        let Some(edge) = select_edge(current, exit, frame.state) else {
            return Ok(GraphExit::Completed);
        };
        match edge.target.as_str() {
            LOOP_BREAK_TARGET | LOOP_CONTINUE_TARGET if !in_loop => {
                return Err(orchestration_failure(
                    "loop_sentinel_outside_loop",
                    format!("step {} targets {} outside a loop", current.node_id, edge.target),
                ));
            }
            LOOP_BREAK_TARGET => return Ok(GraphExit::Break),
            LOOP_CONTINUE_TARGET => return Ok(GraphExit::Continue),
            target => {
                current = graph.step(target).ok_or_else(|| {
                    orchestration_failure(
                        "missing_edge_target",
                        format!("step {} points at unknown step {}", current.node_id, target),
                    )
                })?;
            }
        }
    }
}

#[async_recursion]
pub(crate) async fn run_node<'a, 'p>(
    ctx: &RunContext<'a>,
    frame: &Frame<'p>,
    instruction: &CompiledInstruction,
    step: Option<&PlanStep>,
) -> Flow<NodeExit> {
    let result = match instruction.kind {
        ActionKind::Conditional => control::run_conditional(ctx, frame, instruction),
        ActionKind::Loop => {
            let body = step.and_then(|s| s.loop_plan.as_deref());
            control::run_loop(ctx, frame, instruction, body).await
        }
        ActionKind::Subflow => control::run_subflow(ctx, frame, instruction).await,
        _ => dispatch::run_action(ctx, frame, instruction)
            .await
            .map(|()| NodeExit::Default),
    };

    match result {
        Err(failure) if !failure.terminates_execution() && instruction.param_bool("continueOnError") => {
            tracing::warn!(
                "Continuing past failed step {} ({}): {}",
                instruction.node_id,
                failure.code,
                failure.message
            );
            Ok(NodeExit::Default)
        }
        other => other,
    }
}

fn branch_matches(label: &str, taken: bool) -> bool {
    let label = label.to_ascii_lowercase();
    if taken {
        matches!(label.as_str(), "then" | "true" | "yes")
    } else {
        matches!(label.as_str(), "else" | "false" | "no")
    }
}

/// Pick the edge to follow after a node exits.
pub(crate) fn select_edge<'g>(
    step: &'g PlanStep,
    exit: NodeExit,
    state: &ExecutionState,
) -> Option<&'g PlanEdge> {
    let general = || step.outgoing.iter().filter(|e| e.loop_port().is_none());
    let unlabeled = || general().find(|e| e.label().is_none());
    let port = |wanted: LoopPort| step.outgoing.iter().find(|e| e.loop_port() == Some(wanted));

    match exit {
        NodeExit::Default => general()
            .find(|e| {
                e.label()
                    .is_some_and(|label| evaluate_expression(label, state) == Some(true))
            })
            .or_else(unlabeled),
        NodeExit::Branch(taken) => general()
            .find(|e| e.label().is_some_and(|label| branch_matches(label, taken)))
            .or_else(unlabeled),
        NodeExit::LoopDone { broke: true } => port(LoopPort::Break)
            .or_else(|| port(LoopPort::After))
            .or_else(unlabeled),
        NodeExit::LoopDone { broke: false } => port(LoopPort::After).or_else(unlabeled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(edges: Vec<PlanEdge>) -> PlanStep {
        edges
            .into_iter()
            .fold(PlanStep::new(0, "s", ActionKind::Click), |s, e| s.with_edge(e))
    }

    #[test]
    fn test_default_exit_prefers_first_truthy_label() {
        let state = ExecutionState::default();
        state.set("n", json!(5));
        let s = step(vec![
            PlanEdge::to("fallback"),
            PlanEdge::when("small", "${@store/n} < 3"),
            PlanEdge::when("big", "${@store/n} > 3"),
            PlanEdge::when("bigger", "${@store/n} > 4"),
        ]);
        assert_eq!(select_edge(&s, NodeExit::Default, &state).unwrap().target, "big");

        state.set("n", json!(3));
        assert_eq!(select_edge(&s, NodeExit::Default, &state).unwrap().target, "fallback");
    }

    #[test]
    fn test_branch_exit_uses_then_and_else() {
        let state = ExecutionState::default();
        let s = step(vec![PlanEdge::when("yes", "then"), PlanEdge::when("no", "else")]);
        assert_eq!(select_edge(&s, NodeExit::Branch(true), &state).unwrap().target, "yes");
        assert_eq!(select_edge(&s, NodeExit::Branch(false), &state).unwrap().target, "no");

        let only_then = step(vec![PlanEdge::when("yes", "then")]);
        assert!(select_edge(&only_then, NodeExit::Branch(false), &state).is_none());
    }

    #[test]
    fn test_loop_ports_bypass_conditions() {
        let state = ExecutionState::default();
        let s = step(vec![
            PlanEdge::when("after", "loopafter"),
            PlanEdge::when("broken", "loop_break"),
        ]);
        assert_eq!(select_edge(&s, NodeExit::Default, &state), None);
        assert_eq!(
            select_edge(&s, NodeExit::LoopDone { broke: false }, &state).unwrap().target,
            "after"
        );
        assert_eq!(
            select_edge(&s, NodeExit::LoopDone { broke: true }, &state).unwrap().target,
            "broken"
        );

        let after_only = step(vec![PlanEdge::when("after", "loop_next")]);
        assert_eq!(
            select_edge(&after_only, NodeExit::LoopDone { broke: true }, &state).unwrap().target,
            "after"
        );
    }
}
