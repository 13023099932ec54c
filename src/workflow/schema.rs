//! Compiled plan data structures and serialization.

use crate::actions::{is_loop_sentinel, ActionKind, LoopPort};
use crate::error::{AutomationError, Result};
use crate::variables::state::VariableMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub const PLAN_SCHEMA_VERSION: &str = "automation-plan-v1";
pub const PLAN_PAYLOAD_VERSION: &str = "1";

fn default_schema_version() -> String {
    PLAN_SCHEMA_VERSION.to_string()
}

fn default_payload_version() -> String {
    PLAN_PAYLOAD_VERSION.to_string()
}

/// One executable instruction of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompiledInstruction {
    pub index: usize,
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: VariableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_html: Option<String>,
    #[serde(default)]
    pub context: VariableMap,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Embedded action definition in its structural (JSON) form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
}

impl CompiledInstruction {
    pub fn new(index: usize, node_id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            index,
            node_id: node_id.into(),
            kind,
            params: VariableMap::new(),
            preload_html: None,
            context: VariableMap::new(),
            metadata: HashMap::new(),
            action: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    /// First present string param among `keys`.
    pub fn param_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.params.get(*key))
            .find_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First numeric param among `keys`; numeric strings are accepted.
    pub fn param_u64(&self, keys: &[&str]) -> Option<u64> {
        keys.iter()
            .filter_map(|key| self.params.get(*key))
            .find_map(|v| match v {
                Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
    }

    pub fn param_bool(&self, key: &str) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// Edge between two plan steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanEdge {
    #[serde(default)]
    pub id: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

impl PlanEdge {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn when(target: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: Some(condition.into()),
            ..Self::default()
        }
    }

    /// Condition label, if any.
    pub fn label(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Loop port named by the source port or the condition label.
    pub fn loop_port(&self) -> Option<LoopPort> {
        self.source_port
            .as_deref()
            .and_then(LoopPort::parse)
            .or_else(|| self.label().and_then(LoopPort::parse))
    }
}

/// A graph node. Loop nodes embed their body as a nested graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub index: usize,
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: VariableMap,
    #[serde(default)]
    pub outgoing: Vec<PlanEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_plan: Option<Box<PlanGraph>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_html: Option<String>,
    #[serde(default)]
    pub context: VariableMap,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PlanStep {
    pub fn new(index: usize, node_id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            index,
            node_id: node_id.into(),
            kind,
            params: VariableMap::new(),
            outgoing: Vec::new(),
            loop_plan: None,
            preload_html: None,
            context: VariableMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_edge(mut self, edge: PlanEdge) -> Self {
        self.outgoing.push(edge);
        self
    }

    pub fn with_body(mut self, body: PlanGraph) -> Self {
        self.loop_plan = Some(Box::new(body));
        self
    }

    /// Instruction for this step. A matching entry from the plan's
    /// instruction table wins; the step's own fields are the fallback.
    pub fn to_instruction(&self, table: Option<&CompiledInstruction>) -> CompiledInstruction {
        match table {
            Some(found) => {
                let mut instruction = found.clone();
                instruction.index = self.index;
                instruction.node_id = self.node_id.clone();
                instruction
            }
            None => CompiledInstruction {
                index: self.index,
                node_id: self.node_id.clone(),
                kind: self.kind,
                params: self.params.clone(),
                preload_html: self.preload_html.clone(),
                context: self.context.clone(),
                metadata: self.metadata.clone(),
                action: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanGraph {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl PlanGraph {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, node_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.node_id == node_id)
    }

    /// First declared step without incoming edges, else the first step.
    pub fn entry(&self) -> Option<&PlanStep> {
        let targets: HashSet<&str> = self
            .steps
            .iter()
            .flat_map(|s| s.outgoing.iter().map(|e| e.target.as_str()))
            .collect();
        self.steps
            .iter()
            .find(|s| !targets.contains(s.node_id.as_str()))
            .or_else(|| self.steps.first())
    }

    /// Largest index in this graph and every nested loop body.
    pub fn max_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .flat_map(|s| {
                let nested = s.loop_plan.as_ref().and_then(|g| g.max_index());
                std::iter::once(s.index).chain(nested)
            })
            .max()
    }

    pub fn min_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .flat_map(|s| {
                let nested = s.loop_plan.as_ref().and_then(|g| g.min_index());
                std::iter::once(s.index).chain(nested)
            })
            .min()
    }

    /// Width of the index range covered by this graph (nested bodies included).
    pub fn index_span(&self) -> usize {
        match (self.min_index(), self.max_index()) {
            (Some(min), Some(max)) => max - min + 1,
            _ => 0,
        }
    }

    fn validate(&self, in_loop: bool, path: &str) -> Result<()> {
        let mut ids = HashSet::new();
        let mut indices = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.node_id.as_str()) {
                return Err(AutomationError::Plan(format!(
                    "{}: duplicate node id {}",
                    path, step.node_id
                )));
            }
            if !indices.insert(step.index) {
                return Err(AutomationError::Plan(format!(
                    "{}: duplicate step index {}",
                    path, step.index
                )));
            }
        }
        for step in &self.steps {
            for edge in &step.outgoing {
                if is_loop_sentinel(&edge.target) {
                    if !in_loop {
                        return Err(AutomationError::Plan(format!(
                            "{}: node {} targets {} outside of a loop body",
                            path, step.node_id, edge.target
                        )));
                    }
                    continue;
                }
                if !ids.contains(edge.target.as_str()) {
                    return Err(AutomationError::Plan(format!(
                        "{}: node {} has edge to missing node {}",
                        path, step.node_id, edge.target
                    )));
                }
            }
            if let Some(body) = &step.loop_plan {
                if step.kind != ActionKind::Loop {
                    return Err(AutomationError::Plan(format!(
                        "{}: node {} embeds a loop body but is {}",
                        path, step.node_id, step.kind
                    )));
                }
                body.validate(true, &format!("{}/{}", path, step.node_id))?;
            }
        }
        Ok(())
    }
}

/// A compiled workflow ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "default_payload_version")]
    pub payload_version: String,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default)]
    pub instructions: Vec<CompiledInstruction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<PlanGraph>,
    #[serde(default)]
    pub metadata: VariableMap,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(workflow_id: Uuid, instructions: Vec<CompiledInstruction>) -> Self {
        Self {
            schema_version: default_schema_version(),
            payload_version: default_payload_version(),
            execution_id: Uuid::new_v4(),
            workflow_id,
            instructions,
            graph: None,
            metadata: VariableMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_graph(mut self, graph: PlanGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn instruction(&self, node_id: &str) -> Option<&CompiledInstruction> {
        self.instructions.iter().find(|i| i.node_id == node_id)
    }

    /// Instructions sorted by index, for plans without a graph.
    pub fn ordered_instructions(&self) -> Vec<&CompiledInstruction> {
        let mut ordered: Vec<&CompiledInstruction> = self.instructions.iter().collect();
        ordered.sort_by_key(|i| i.index);
        ordered
    }

    /// Largest index across instructions, the graph and nested loop bodies.
    pub fn max_index(&self) -> Option<usize> {
        let from_instructions = self.instructions.iter().map(|i| i.index).max();
        let from_graph = self.graph.as_ref().and_then(|g| g.max_index());
        from_instructions.into_iter().chain(from_graph).max()
    }

    pub fn min_index(&self) -> Option<usize> {
        let from_instructions = self.instructions.iter().map(|i| i.index).min();
        let from_graph = self.graph.as_ref().and_then(|g| g.min_index());
        from_instructions.into_iter().chain(from_graph).min()
    }

    /// Number of indices a caller must reserve to host this plan.
    pub fn index_span(&self) -> usize {
        match (self.min_index(), self.max_index()) {
            (Some(min), Some(max)) => max - min + 1,
            _ => 0,
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        match self.metadata.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn metadata_bool(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn entry_selector(&self) -> Option<&str> {
        self.metadata_str("entrySelector")
    }

    pub fn step_timeout_ms(&self) -> Option<u64> {
        self.metadata_u64("stepTimeoutMs")
    }

    /// Structural checks: unique indices and node ids, resolvable edge
    /// targets, loop sentinels only inside loop bodies.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for instruction in &self.instructions {
            if !seen.insert(instruction.index) {
                return Err(AutomationError::Plan(format!(
                    "duplicate instruction index {}",
                    instruction.index
                )));
            }
        }
        if let Some(graph) = &self.graph {
            graph.validate(false, "graph")?;
        }
        Ok(())
    }
}
