//! Mid-attempt telemetry: heartbeats, console/network snapshots and retry notices.

use crate::outcome::{ConsoleEntry, NetworkEvent};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

pub const TELEMETRY_SCHEMA_VERSION: &str = "automation-telemetry-v1";
pub const TELEMETRY_PAYLOAD_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Heartbeat,
    Console,
    Network,
    Retry,
    Note,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    /// Heartbeats emitted so far in this attempt, this one included.
    pub beat: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryNotice {
    pub failed_attempt: u32,
    pub next_attempt: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepTelemetry {
    pub schema_version: String,
    pub payload_version: String,
    pub execution_id: Uuid,
    pub step_index: usize,
    pub attempt: u32,
    pub kind: TelemetryKind,
    pub sequence: u64,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<Heartbeat>,
    #[serde(default)]
    pub console: Vec<ConsoleEntry>,
    #[serde(default)]
    pub network: Vec<NetworkEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryNotice>,
    #[serde(default)]
    pub note: String,
}

/// Telemetry source for one `(step_index, attempt)`. Sequences start at 1.
#[derive(Debug)]
pub struct AttemptTelemetry {
    execution_id: Uuid,
    step_index: usize,
    attempt: u32,
    started: Instant,
    next_sequence: u64,
    beats: u64,
}

impl AttemptTelemetry {
    pub fn new(execution_id: Uuid, step_index: usize, attempt: u32) -> Self {
        Self {
            execution_id,
            step_index,
            attempt,
            started: Instant::now(),
            next_sequence: 1,
            beats: 0,
        }
    }

    fn record(&mut self, kind: TelemetryKind) -> StepTelemetry {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        StepTelemetry {
            schema_version: TELEMETRY_SCHEMA_VERSION.to_string(),
            payload_version: TELEMETRY_PAYLOAD_VERSION.to_string(),
            execution_id: self.execution_id,
            step_index: self.step_index,
            attempt: self.attempt,
            kind,
            sequence,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            heartbeat: None,
            console: Vec::new(),
            network: Vec::new(),
            retry: None,
            note: String::new(),
        }
    }

    pub fn heartbeat(&mut self) -> StepTelemetry {
        self.beats += 1;
        let mut telemetry = self.record(TelemetryKind::Heartbeat);
        telemetry.heartbeat = Some(Heartbeat { beat: self.beats });
        telemetry
    }

    pub fn retry(&mut self, notice: RetryNotice) -> StepTelemetry {
        let mut telemetry = self.record(TelemetryKind::Retry);
        telemetry.note = format!(
            "retrying in {}ms (attempt {}/{})",
            notice.delay_ms, notice.next_attempt, notice.max_attempts
        );
        telemetry.retry = Some(notice);
        telemetry
    }

    pub fn console(&mut self, entries: Vec<ConsoleEntry>) -> StepTelemetry {
        let mut telemetry = self.record(TelemetryKind::Console);
        telemetry.console = entries;
        telemetry
    }

    pub fn network(&mut self, events: Vec<NetworkEvent>) -> StepTelemetry {
        let mut telemetry = self.record(TelemetryKind::Network);
        telemetry.network = events;
        telemetry
    }

    pub fn note(&mut self, note: impl Into<String>) -> StepTelemetry {
        let mut telemetry = self.record(TelemetryKind::Note);
        telemetry.note = note.into();
        telemetry
    }

    pub fn emitted(&self) -> u64 {
        self.next_sequence - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_start_at_one_per_attempt() {
        let execution_id = Uuid::new_v4();
        let mut first = AttemptTelemetry::new(execution_id, 4, 1);
        assert_eq!(first.heartbeat().sequence, 1);
        assert_eq!(first.note("waiting").sequence, 2);
        let beat = first.heartbeat();
        assert_eq!(beat.sequence, 3);
        assert_eq!(beat.heartbeat, Some(Heartbeat { beat: 2 }));

        let mut second = AttemptTelemetry::new(execution_id, 4, 2);
        assert_eq!(second.heartbeat().sequence, 1);
        assert_eq!(first.emitted(), 3);
    }

    #[test]
    fn test_retry_notice() {
        let mut telemetry = AttemptTelemetry::new(Uuid::new_v4(), 0, 1);
        let event = telemetry.retry(RetryNotice {
            failed_attempt: 1,
            next_attempt: 2,
            max_attempts: 3,
            delay_ms: 250,
            reason: "connection reset".to_string(),
        });
        assert_eq!(event.kind, TelemetryKind::Retry);
        assert_eq!(event.retry.as_ref().unwrap().next_attempt, 2);
        assert!(event.note.contains("250ms"));
    }
}
