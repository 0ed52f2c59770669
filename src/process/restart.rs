use crate::config::WardenConfig;
use std::time::Duration;

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Crash count at which automatic restarts stop for good
    pub max_attempts: u32,
    /// Delay between an observed crash and the automatic restart
    pub crash_delay: Duration,
    /// Spawn attempts made by one restart call
    pub retries: u32,
    /// Fixed delay between spawn attempts
    pub retry_delay: Duration,
    /// Pause between stopping and respawning
    pub settle_delay: Duration,
}

impl RestartPolicy {
    pub fn new() -> Self {
        Self::from_config(&WardenConfig::default())
    }

    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            max_attempts: config.max_restart_attempts,
            crash_delay: Duration::from_millis(config.restart_delay_ms),
            retries: config.restart_retries.max(1),
            retry_delay: Duration::from_millis(config.restart_retry_delay_ms),
            settle_delay: Duration::from_millis(config.restart_settle_ms),
        }
    }

    /// Check whether a crashed record with `restart_attempts` may be restarted
    pub fn should_restart(&self, restart_attempts: u32) -> bool {
        restart_attempts < self.max_attempts
    }

    /// Delay to wait after the failed spawn `attempt` (1-based), if another
    /// attempt follows
    pub fn delay_after_attempt(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.retries).then_some(self.retry_delay)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_new() {
        let policy = RestartPolicy::new();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.crash_delay, Duration::from_secs(5));
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(5));
        assert_eq!(policy.settle_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_restart_policy_from_config() {
        let config = WardenConfig {
            max_restart_attempts: 5,
            restart_delay_ms: 10,
            restart_retries: 2,
            restart_retry_delay_ms: 20,
            restart_settle_ms: 30,
            ..WardenConfig::default()
        };

        let policy = RestartPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.crash_delay, Duration::from_millis(10));
        assert_eq!(policy.retries, 2);
        assert_eq!(policy.retry_delay, Duration::from_millis(20));
        assert_eq!(policy.settle_delay, Duration::from_millis(30));
    }

    #[test]
    fn test_should_restart_stops_at_cap() {
        let policy = RestartPolicy::new();

        assert!(policy.should_restart(0));
        assert!(policy.should_restart(1));
        assert!(policy.should_restart(2));
        assert!(!policy.should_restart(3));
        assert!(!policy.should_restart(10));
    }

    #[test]
    fn test_zero_cap_never_restarts() {
        let config = WardenConfig {
            max_restart_attempts: 0,
            ..WardenConfig::default()
        };
        assert!(!RestartPolicy::from_config(&config).should_restart(0));
    }

    #[test]
    fn test_delay_after_attempt() {
        let policy = RestartPolicy::new();

        assert_eq!(policy.delay_after_attempt(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after_attempt(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after_attempt(3), None);
    }
}
