//! Execution state, interpolation and expression evaluation.

pub mod expression;
pub mod interpolate;
pub mod state;

pub use expression::evaluate_expression;
pub use interpolate::{interpolate_str, interpolate_string, interpolate_value, stringify};
pub use state::{ExecutionState, Namespace, VariableMap};
