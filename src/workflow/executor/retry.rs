//! Bounded exponential backoff between step attempts.

use crate::config::ExecutorConfig;
use crate::workflow::schema::CompiledInstruction;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Apply the instruction's `maxAttempts` and `retryDelayMs` overrides.
    pub fn for_instruction(&self, instruction: &CompiledInstruction) -> Self {
        let mut policy = *self;
        if let Some(max) = instruction.param_u64(&["maxAttempts", "max_attempts"]) {
            policy.max_attempts = max.clamp(1, u64::from(u32::MAX)) as u32;
        }
        if let Some(delay) = instruction.param_u64(&["retryDelayMs", "retry_delay_ms"]) {
            policy.base_delay = Duration::from_millis(delay);
            policy.max_delay = policy.max_delay.max(policy.base_delay);
        }
        policy
    }

    /// Delay after `failed_attempt` (1-based) before the next one.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use serde_json::json;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_instruction_overrides() {
        let base = RetryPolicy::from_config(&ExecutorConfig::default());
        assert_eq!(base.max_attempts, 3);

        let instruction = CompiledInstruction::new(0, "n", ActionKind::Click)
            .with_param("maxAttempts", json!(0))
            .with_param("retryDelayMs", json!(10_000));
        let policy = base.for_instruction(&instruction);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10_000));
    }
}
