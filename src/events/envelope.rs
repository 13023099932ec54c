//! Event envelope wire format.

use crate::events::telemetry::StepTelemetry;
use crate::outcome::{StepFailure, StepOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ENVELOPE_SCHEMA_VERSION: &str = "automation-event-envelope-v1";
pub const ENVELOPE_PAYLOAD_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    #[serde(rename = "execution.failed")]
    ExecutionFailed,
    #[serde(rename = "execution.cancelled")]
    ExecutionCancelled,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
    #[serde(rename = "step.telemetry")]
    StepTelemetry,
    #[serde(rename = "step.heartbeat")]
    StepHeartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted => "execution.started",
            EventKind::ExecutionCompleted => "execution.completed",
            EventKind::ExecutionFailed => "execution.failed",
            EventKind::ExecutionCancelled => "execution.cancelled",
            EventKind::StepStarted => "step.started",
            EventKind::StepCompleted => "step.completed",
            EventKind::StepFailed => "step.failed",
            EventKind::StepTelemetry => "step.telemetry",
            EventKind::StepHeartbeat => "step.heartbeat",
        }
    }

    /// Telemetry and heartbeats may be dropped under backpressure.
    pub fn is_droppable(&self) -> bool {
        matches!(self, EventKind::StepTelemetry | EventKind::StepHeartbeat)
    }

    /// Completion-class events are always delivered.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            EventKind::ExecutionStarted
                | EventKind::ExecutionCompleted
                | EventKind::ExecutionFailed
                | EventKind::ExecutionCancelled
                | EventKind::StepCompleted
                | EventKind::StepFailed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::ExecutionCompleted | EventKind::ExecutionFailed | EventKind::ExecutionCancelled
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events lost between the previous delivered envelope and this one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Drops {
    pub dropped: u64,
    /// Emission time of the oldest lost event.
    #[serde(rename = "oldest_dropped")]
    pub oldest_dropped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn terminal_event(&self) -> EventKind {
        match self {
            ExecutionStatus::Running => EventKind::ExecutionStarted,
            ExecutionStatus::Completed => EventKind::ExecutionCompleted,
            ExecutionStatus::Failed => EventKind::ExecutionFailed,
            ExecutionStatus::Cancelled => EventKind::ExecutionCancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEvent {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    #[serde(default)]
    pub steps_run: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepStartedEvent {
    pub node_id: String,
    pub step_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "payload_type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Execution(ExecutionEvent),
    StepStarted(StepStartedEvent),
    Outcome(Box<StepOutcome>),
    Telemetry(StepTelemetry),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub schema_version: String,
    pub payload_version: String,
    pub id: Uuid,
    pub kind: EventKind,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drops: Option<Drops>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Envelope without a sequence; the bus assigns one on delivery.
    pub fn new(
        kind: EventKind,
        execution_id: Uuid,
        workflow_id: Uuid,
        step: Option<(usize, u32)>,
        payload: EventPayload,
    ) -> Self {
        Self {
            schema_version: ENVELOPE_SCHEMA_VERSION.to_string(),
            payload_version: ENVELOPE_PAYLOAD_VERSION.to_string(),
            id: Uuid::new_v4(),
            kind,
            execution_id,
            workflow_id,
            step_index: step.map(|(index, _)| index),
            attempt: step.map(|(_, attempt)| attempt),
            sequence: 0,
            timestamp: Utc::now(),
            drops: None,
            payload,
        }
    }

    pub fn outcome(&self) -> Option<&StepOutcome> {
        match &self.payload {
            EventPayload::Outcome(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn telemetry(&self) -> Option<&StepTelemetry> {
        match &self.payload {
            EventPayload::Telemetry(telemetry) => Some(telemetry),
            _ => None,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionEvent> {
        match &self.payload {
            EventPayload::Execution(event) => Some(event),
            _ => None,
        }
    }
}
