//! Workflow engine: compiled plans, the subflow registry and the executor.

pub mod executor;
pub mod manager;
pub mod schema;

pub use executor::{ExecutionReport, ExecutionRequest, WorkflowExecutor};
pub use manager::{StoreMode, SubflowResolver, WorkflowManager};
pub use schema::*;
