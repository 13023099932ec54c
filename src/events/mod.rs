//! Timeline events: envelopes, telemetry and the per-execution bus.

pub mod bus;
pub mod envelope;
pub mod telemetry;

pub use bus::{EventBufferLimits, EventBus, ExecutionStream};
pub use envelope::{
    Drops, EventEnvelope, EventKind, EventPayload, ExecutionEvent, ExecutionStatus, StepStartedEvent,
};
pub use telemetry::{AttemptTelemetry, RetryNotice, StepTelemetry, TelemetryKind};
