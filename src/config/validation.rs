use crate::config::schema::EngineConfig;
use crate::error::{AutomationError, Result};

fn invalid(message: impl Into<String>) -> AutomationError {
    AutomationError::Validation(message.into())
}

/// Reject configurations the engine cannot run with.
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    if config.api.host.trim().is_empty() {
        return Err(invalid("API host cannot be empty"));
    }

    let url = config.driver.base_url.trim();
    if url.is_empty() {
        return Err(invalid("Driver URL cannot be empty"));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(invalid(format!(
            "Invalid driver URL: {}. Must start with http:// or https://",
            url
        )));
    }
    if config.driver.request_timeout_ms == 0 {
        return Err(invalid("Driver request timeout must be positive"));
    }

    let executor = &config.executor;
    if executor.max_attempts == 0 {
        return Err(invalid("max_attempts must be at least 1"));
    }
    if executor.max_loop_iterations == 0 {
        return Err(invalid("max_loop_iterations must be at least 1"));
    }
    if executor.step_timeout_ms == 0 || executor.execution_timeout_ms == 0 {
        return Err(invalid("Step and execution timeouts must be positive"));
    }
    if executor.retry_base_delay_ms > executor.retry_max_delay_ms {
        return Err(invalid(format!(
            "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
            executor.retry_base_delay_ms, executor.retry_max_delay_ms
        )));
    }
    if executor.heartbeat_interval_ms == 0 {
        return Err(invalid("heartbeat_interval_ms must be positive"));
    }

    if config.events.per_execution == 0 || config.events.per_attempt == 0 {
        return Err(invalid("Event buffer limits must be positive"));
    }

    let limits = &config.limits;
    if limits.dom_snapshot_bytes == 0
        || limits.screenshot_bytes == 0
        || limits.console_entry_bytes == 0
        || limits.network_preview_bytes == 0
    {
        return Err(invalid("Payload caps must be positive"));
    }

    let session = &config.session;
    if session.viewport_width == 0 || session.viewport_height == 0 {
        return Err(invalid("Default viewport must be non-empty"));
    }
    if session.frame_quality == 0 || session.frame_quality > 100 {
        return Err(invalid(format!(
            "frame_quality must be in 1..=100, got {}",
            session.frame_quality
        )));
    }
    if session.frame_fps == 0 {
        return Err(invalid("frame_fps must be positive"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = EngineConfig::default();
        config.events.per_attempt = 0;
        assert!(validate_config(&config).is_err());

        let mut config = EngineConfig::default();
        config.executor.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = EngineConfig::default();
        config.executor.max_loop_iterations = 0;
        assert!(validate_config(&config).is_err());

        let mut config = EngineConfig::default();
        config.limits.screenshot_bytes = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_driver_url() {
        let mut config = EngineConfig::default();
        config.driver.base_url = "".to_string();
        assert!(validate_config(&config).is_err());

        config.driver.base_url = "ftp://driver".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = EngineConfig::default();
        config.executor.retry_base_delay_ms = 10_000;
        assert!(validate_config(&config).is_err());
    }
}
