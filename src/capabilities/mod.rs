//! Engine capability negotiation.
//!
//! The driver advertises [`EngineCapabilities`]; preflight derives a
//! [`CapabilityRequirement`] from the plan and compares the two. Missing
//! capabilities block the run, unknown limits only warn.

use crate::actions::ActionKind;
use crate::error::{AutomationError, Result};
use crate::workflow::schema::{ExecutionPlan, PlanGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CAPABILITIES_SCHEMA_VERSION: &str = "automation-capabilities-v1";

fn default_schema_version() -> String {
    CAPABILITIES_SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineCapabilities {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub max_concurrent_sessions: i64,
    #[serde(default)]
    pub allows_parallel_tabs: bool,
    #[serde(default)]
    pub supports_har: bool,
    #[serde(default)]
    pub supports_video: bool,
    #[serde(default)]
    pub supports_iframes: bool,
    #[serde(default)]
    pub supports_file_uploads: bool,
    #[serde(default)]
    pub supports_downloads: bool,
    #[serde(default)]
    pub supports_tracing: bool,
    /// Zero means the engine does not know its limit.
    #[serde(default)]
    pub max_viewport_width: i64,
    #[serde(default)]
    pub max_viewport_height: i64,
}

impl EngineCapabilities {
    pub fn validate(&self) -> Result<()> {
        if self.schema_version.trim().is_empty() {
            return Err(AutomationError::Validation(
                "capabilities schema_version is required".to_string(),
            ));
        }
        if self.engine.trim().is_empty() {
            return Err(AutomationError::Validation(
                "capabilities engine name is required".to_string(),
            ));
        }
        if self.max_concurrent_sessions <= 0 {
            return Err(AutomationError::Validation(format!(
                "max_concurrent_sessions must be positive, got {}",
                self.max_concurrent_sessions
            )));
        }
        if self.max_viewport_width < 0 || self.max_viewport_height < 0 {
            return Err(AutomationError::Validation(
                "viewport limits cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn check_compatibility(&self, req: &CapabilityRequirement) -> CapabilityGap {
        let mut gap = CapabilityGap::default();

        let flags = [
            (req.needs_parallel_tabs, self.allows_parallel_tabs, "parallel_tabs"),
            (req.needs_har, self.supports_har, "har"),
            (req.needs_video, self.supports_video, "video"),
            (req.needs_iframes, self.supports_iframes, "iframes"),
            (req.needs_file_uploads, self.supports_file_uploads, "file_uploads"),
            (req.needs_downloads, self.supports_downloads, "downloads"),
            (req.needs_tracing, self.supports_tracing, "tracing"),
        ];
        for (required, supported, name) in flags {
            if required && !supported {
                gap.missing.push(name.to_string());
            }
        }

        check_dimension(&mut gap, "viewport_width", req.min_viewport_width, self.max_viewport_width);
        check_dimension(&mut gap, "viewport_height", req.min_viewport_height, self.max_viewport_height);
        gap
    }
}

fn check_dimension(gap: &mut CapabilityGap, name: &str, required: u32, limit: i64) {
    if required == 0 {
        return;
    }
    if limit == 0 {
        gap.warnings
            .push(format!("{} limit unknown; plan needs {}", name, required));
    } else if limit < i64::from(required) {
        gap.missing.push(format!("{}>={}", name, required));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CapabilityRequirement {
    #[serde(default)]
    pub needs_parallel_tabs: bool,
    #[serde(default)]
    pub needs_har: bool,
    #[serde(default)]
    pub needs_video: bool,
    #[serde(default)]
    pub needs_iframes: bool,
    #[serde(default)]
    pub needs_file_uploads: bool,
    #[serde(default)]
    pub needs_downloads: bool,
    #[serde(default)]
    pub needs_tracing: bool,
    #[serde(default)]
    pub min_viewport_width: u32,
    #[serde(default)]
    pub min_viewport_height: u32,
}

impl CapabilityRequirement {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Requirements implied by the plan's step kinds and metadata flags.
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut req = Self::default();
        for instruction in &plan.instructions {
            req.require_kind(instruction.kind);
        }
        if let Some(graph) = &plan.graph {
            req.require_graph(graph);
        }

        req.needs_video = plan.metadata_bool("recordVideo");
        req.needs_har = plan.metadata_bool("captureHar");
        req.needs_tracing = plan.metadata_bool("tracing");
        req.needs_downloads = plan.metadata_bool("downloads");
        if let Some(Value::Object(viewport)) = plan.metadata.get("viewport") {
            let dim = |key: &str| {
                viewport
                    .get(key)
                    .and_then(Value::as_u64)
                    .map(|v| v.min(u64::from(u32::MAX)) as u32)
                    .unwrap_or(0)
            };
            req.min_viewport_width = dim("width");
            req.min_viewport_height = dim("height");
        }
        req
    }

    fn require_graph(&mut self, graph: &PlanGraph) {
        for step in &graph.steps {
            self.require_kind(step.kind);
            if let Some(body) = &step.loop_plan {
                self.require_graph(body);
            }
        }
    }

    fn require_kind(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::TabSwitch => self.needs_parallel_tabs = true,
            ActionKind::FrameSwitch => self.needs_iframes = true,
            ActionKind::UploadFile => self.needs_file_uploads = true,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CapabilityGap {
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl CapabilityGap {
    pub fn satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::schema::{CompiledInstruction, PlanStep};
    use serde_json::json;
    use uuid::Uuid;

    fn engine() -> EngineCapabilities {
        EngineCapabilities {
            schema_version: CAPABILITIES_SCHEMA_VERSION.to_string(),
            engine: "chromium".to_string(),
            version: None,
            max_concurrent_sessions: 4,
            allows_parallel_tabs: false,
            supports_har: false,
            supports_video: true,
            supports_iframes: true,
            supports_file_uploads: true,
            supports_downloads: false,
            supports_tracing: false,
            max_viewport_width: 1024,
            max_viewport_height: 0,
        }
    }

    #[test]
    fn test_parallel_tabs_and_viewport_gap() {
        let req = CapabilityRequirement {
            needs_parallel_tabs: true,
            needs_video: true,
            min_viewport_width: 1300,
            ..CapabilityRequirement::default()
        };
        let gap = engine().check_compatibility(&req);
        assert!(!gap.satisfied());
        assert_eq!(gap.missing, vec!["parallel_tabs", "viewport_width>=1300"]);
        assert!(gap.warnings.is_empty());
    }

    #[test]
    fn test_unknown_limit_warns_without_blocking() {
        let req = CapabilityRequirement {
            min_viewport_height: 900,
            ..CapabilityRequirement::default()
        };
        let gap = engine().check_compatibility(&req);
        assert!(gap.satisfied());
        assert_eq!(gap.warnings.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_engines() {
        assert!(engine().validate().is_ok());

        let mut blank = engine();
        blank.engine = " ".to_string();
        assert!(blank.validate().is_err());

        let mut zero = engine();
        zero.max_concurrent_sessions = 0;
        assert!(zero.validate().is_err());

        let mut negative = engine();
        negative.max_viewport_width = -1;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_requirement_from_plan() {
        let body = PlanGraph::new(vec![PlanStep::new(3, "frame", ActionKind::FrameSwitch)]);
        let plan = ExecutionPlan::new(
            Uuid::new_v4(),
            vec![CompiledInstruction::new(0, "tab", ActionKind::TabSwitch)],
        )
        .with_graph(PlanGraph::new(vec![
            PlanStep::new(1, "loop", ActionKind::Loop).with_body(body),
        ]))
        .with_metadata("recordVideo", json!(true))
        .with_metadata("viewport", json!({ "width": 1440, "height": 900 }));

        let req = CapabilityRequirement::from_plan(&plan);
        assert!(req.needs_parallel_tabs);
        assert!(req.needs_iframes);
        assert!(req.needs_video);
        assert!(!req.needs_file_uploads);
        assert_eq!(req.min_viewport_width, 1440);
        assert!(!req.is_empty());
        assert!(CapabilityRequirement::default().is_empty());
    }
}
