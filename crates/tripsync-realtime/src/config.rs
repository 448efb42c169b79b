use std::time::Duration;

/// Client-side realtime tuning.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// First reconnect delay; doubles on every failed attempt.
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before giving up until a manual reconnect.
    pub max_reconnect_attempts: u32,
    /// A peer stops showing as typing after this much silence.
    pub typing_timeout: Duration,
    /// Delay between reaching `connected` and the single liveness ping.
    pub health_check_delay: Duration,
    /// Deliver our own broadcasts back to us.
    pub self_echo: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 5,
            typing_timeout: Duration::from_secs(3),
            health_check_delay: Duration::from_secs(30),
            self_echo: true,
        }
    }
}

impl RealtimeConfig {
    /// Defaults overridden by `TRIPSYNC_RECONNECT_BASE_MS`,
    /// `TRIPSYNC_RECONNECT_MAX_ATTEMPTS`, `TRIPSYNC_TYPING_TIMEOUT_MS` and
    /// `TRIPSYNC_HEALTH_CHECK_DELAY_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("TRIPSYNC_RECONNECT_BASE_MS") {
            config.reconnect_base_delay = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("TRIPSYNC_RECONNECT_MAX_ATTEMPTS") {
            config.max_reconnect_attempts = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = env_u64("TRIPSYNC_TYPING_TIMEOUT_MS") {
            config.typing_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("TRIPSYNC_HEALTH_CHECK_DELAY_MS") {
            config.health_check_delay = Duration::from_millis(ms);
        }
        config
    }

    /// Backoff before reconnect attempt number `attempt` (zero-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let config = RealtimeConfig::default();
        let delays: Vec<u64> = (0..5)
            .map(|a| config.reconnect_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let config = RealtimeConfig::default();
        assert_eq!(config.reconnect_delay(200), config.reconnect_delay(32));
    }
}
