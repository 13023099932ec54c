//! Recording surface exposed by recording and hybrid sessions.

pub mod schema;

pub use schema::{RecordedAction, RecordingOptions, RecordingState, RecordingStatus};
