use std::time::Duration;

use {rand::Rng, stickerbot_config::ReconnectConfig};

/// Bounded linear backoff for recoverable disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Add up to 25% random extra delay.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Wait before retry number `attempt` (1-based): `attempt * base_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(attempt.max(1));
        if !self.jitter {
            return delay;
        }
        let max_extra = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
        if max_extra == 0 {
            return delay;
        }
        let extra = rand::rng().random_range(0..=max_extra);
        delay.saturating_add(Duration::from_millis(extra))
    }

    /// Whether another retry is allowed after `attempts` have been used.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(1, 2_000)]
    #[case(2, 4_000)]
    #[case(5, 10_000)]
    #[case(10, 20_000)]
    fn delay_grows_linearly(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let policy = ReconnectPolicy {
            jitter: true,
            ..ReconnectPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(4);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(10));
        }
    }

    #[test]
    fn budget() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn from_config_uses_millis() {
        let policy = ReconnectPolicy::from_config(&ReconnectConfig {
            max_attempts: 3,
            base_delay_ms: 250,
            jitter: false,
        });
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(750));
    }
}
