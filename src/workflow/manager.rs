//! Workflow manager: registry of compiled plans that subflows resolve against.

use crate::error::{AutomationError, Result};
use crate::workflow::schema::ExecutionPlan;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// How a subflow's `store` relates to its caller's.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// The child starts with an empty store.
    #[default]
    Fresh,
    /// The child starts with a copy of the caller's store.
    Copy,
    /// The child starts with a copy and its final store is merged back.
    Shared,
}

impl StoreMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fresh" | "isolated" => Some(StoreMode::Fresh),
            "copy" | "inherit" => Some(StoreMode::Copy),
            "shared" => Some(StoreMode::Shared),
            _ => None,
        }
    }
}

/// Looks up the compiled plan a subflow step invokes.
#[async_trait]
pub trait SubflowResolver: Send + Sync {
    async fn resolve(&self, workflow_id: &str) -> Result<Arc<ExecutionPlan>>;
}

/// Compiled plans keyed by workflow id.
pub struct WorkflowManager {
    plans: Arc<RwLock<HashMap<String, Arc<ExecutionPlan>>>>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self {
            plans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or replace a plan. Plans are validated before they are stored.
    pub fn register(&self, plan: ExecutionPlan) -> Result<()> {
        plan.validate()?;
        let id = plan.workflow_id.to_string();
        self.plans.write().insert(id, Arc::new(plan));
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<ExecutionPlan>> {
        self.plans.read().get(workflow_id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ExecutionPlan>> {
        self.plans.read().values().cloned().collect()
    }

    pub fn remove(&self, workflow_id: &str) -> Option<Arc<ExecutionPlan>> {
        self.plans.write().remove(workflow_id)
    }

    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    /// Register every `*.json` plan in `dir`. Unreadable files are skipped
    /// with a warning; returns the number of plans loaded.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let plan = std::fs::read_to_string(&path)
                .map_err(AutomationError::from)
                .and_then(|content| Ok(serde_json::from_str::<ExecutionPlan>(&content)?))
                .and_then(|plan| self.register(plan));
            match plan {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!("Failed to load plan from {:?}: {}", path, e),
            }
        }
        tracing::info!("Loaded {} plan(s) from {:?}", loaded, dir);
        Ok(loaded)
    }
}

impl Default for WorkflowManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubflowResolver for WorkflowManager {
    async fn resolve(&self, workflow_id: &str) -> Result<Arc<ExecutionPlan>> {
        self.get(workflow_id.trim())
            .ok_or_else(|| AutomationError::WorkflowNotFound(workflow_id.to_string()))
    }
}
