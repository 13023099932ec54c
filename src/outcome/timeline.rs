//! Projection of step outcomes into the flat timeline records shown to users.

use super::{
    AssertionResult, BoundingBox, ConsoleEntry, CursorPosition, FailureKind, NetworkEvent, Point,
    ScreenshotData, StepFailure, StepOutcome,
};
use crate::variables::state::VariableMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineFailure {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
    pub fatal: bool,
    pub retryable: bool,
}

impl From<&StepFailure> for TimelineFailure {
    fn from(failure: &StepFailure) -> Self {
        Self {
            kind: failure.kind,
            code: failure.code.clone(),
            message: failure.message.clone(),
            fatal: failure.fatal,
            retryable: failure.retryable,
        }
    }
}

/// DOM snapshot reference. The markup itself stays on the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomRef {
    pub bytes: usize,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom: Option<DomRef>,
    #[serde(default)]
    pub console: Vec<ConsoleEntry>,
    #[serde(default)]
    pub network: Vec<NetworkEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionResult>,
    #[serde(default)]
    pub extracted_data: VariableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_position: Option<Point>,
    #[serde(default)]
    pub cursor_trail: Vec<CursorPosition>,
}

impl TimelineEvidence {
    /// True when any payload on the entry was cut by a cap.
    pub fn truncated(&self) -> bool {
        self.screenshot.as_ref().is_some_and(|s| s.truncated)
            || self.dom.as_ref().is_some_and(|d| d.truncated)
            || self.console.iter().any(|c| c.truncated)
            || self.network.iter().any(|n| n.truncated)
    }
}

/// One row of the execution timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub execution_id: Uuid,
    pub step_index: usize,
    pub node_id: String,
    pub step_type: String,
    pub attempt: u32,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TimelineFailure>,
    #[serde(default)]
    pub evidence: TimelineEvidence,
}

impl From<&StepOutcome> for TimelineEntry {
    fn from(outcome: &StepOutcome) -> Self {
        let evidence = TimelineEvidence {
            screenshot: outcome.screenshot.clone(),
            dom: outcome.dom_snapshot.as_ref().map(|dom| DomRef {
                bytes: dom.html.len(),
                truncated: dom.truncated,
                original_size: dom.original_size,
            }),
            console: outcome.console_logs.clone(),
            network: outcome.network.clone(),
            assertion: outcome.assertion.clone(),
            extracted_data: outcome.extracted_data.clone(),
            element_bounding_box: outcome.element_bounding_box,
            click_position: outcome.click_position,
            cursor_trail: outcome.cursor_trail.clone(),
        };
        Self {
            execution_id: outcome.execution_id,
            step_index: outcome.step_index,
            node_id: outcome.node_id.clone(),
            step_type: outcome.step_type.clone(),
            attempt: outcome.attempt,
            success: outcome.success,
            started_at: outcome.started_at,
            completed_at: outcome.completed_at,
            duration_ms: outcome.duration_ms,
            final_url: outcome.final_url.clone(),
            failure: outcome.failure.as_ref().map(TimelineFailure::from),
            evidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{AttemptId, DomSnapshot, PayloadLimits};
    use serde_json::json;

    fn outcome() -> StepOutcome {
        StepOutcome::started(&AttemptId {
            execution_id: Uuid::new_v4(),
            step_index: 4,
            attempt: 2,
            node_id: "submit".to_string(),
            step_type: "click".to_string(),
        })
    }

    #[test]
    fn test_successful_outcome_projection() {
        let mut source = outcome();
        source.final_url = Some("https://example.com/done".to_string());
        source.extracted_data.insert("title".to_string(), json!("Done"));
        source.click_position = Some(Point { x: 10.0, y: 20.0 });
        let source = source.finish();

        let entry = TimelineEntry::from(&source);

        assert!(entry.success);
        assert_eq!(entry.step_index, 4);
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.node_id, "submit");
        assert_eq!(entry.step_type, "click");
        assert_eq!(entry.completed_at, source.completed_at);
        assert_eq!(entry.final_url.as_deref(), Some("https://example.com/done"));
        assert_eq!(entry.evidence.extracted_data.get("title"), Some(&json!("Done")));
        assert_eq!(entry.evidence.click_position, Some(Point { x: 10.0, y: 20.0 }));
        assert!(entry.failure.is_none());
        assert!(!entry.evidence.truncated());
    }

    #[test]
    fn test_failed_outcome_projection() {
        let mut source = outcome();
        source.assertion = Some(AssertionResult {
            passed: false,
            expected: Some(json!("a")),
            actual: Some(json!("b")),
            message: "mismatch".to_string(),
        });
        let source = source
            .fail(StepFailure::new(FailureKind::User, "assertion_failed", "mismatch"))
            .finish();

        let entry = TimelineEntry::from(&source);

        assert!(!entry.success);
        let failure = entry.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::User);
        assert_eq!(failure.code, "assertion_failed");
        assert!(failure.fatal);
        assert!(!failure.retryable);
        assert!(!entry.evidence.assertion.unwrap().passed);
    }

    #[test]
    fn test_truncation_flags_survive_projection() {
        let limits = PayloadLimits {
            dom_snapshot_bytes: 8,
            console_entry_bytes: 2,
            ..PayloadLimits::default()
        };
        let mut source = outcome();
        source.dom_snapshot = Some(DomSnapshot {
            html: "<html><body></body></html>".to_string(),
            truncated: false,
            original_size: None,
        });
        source.console_logs.push(ConsoleEntry {
            level: "warn".to_string(),
            text: "long message".to_string(),
            timestamp: None,
            truncated: false,
            original_size: None,
        });
        source.apply_limits(&limits);

        let entry = TimelineEntry::from(&source);

        let dom = entry.evidence.dom.as_ref().unwrap();
        assert!(dom.truncated);
        assert_eq!(dom.bytes, 8);
        assert_eq!(dom.original_size, Some(26));
        assert!(entry.evidence.console[0].truncated);
        assert_eq!(entry.evidence.console[0].original_size, Some(12));
        assert!(entry.evidence.truncated());
    }
}
