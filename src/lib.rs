pub mod actions;
pub mod capabilities;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod outcome;
pub mod recording;
pub mod session;
pub mod variables;
pub mod workflow;

pub use error::{AutomationError, Result};

/// Install the stderr fmt subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
