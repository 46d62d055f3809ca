//! Pacing bookkeeping for one host.

use std::time::Duration;

use tokio::time::Instant;

use super::QueueConfig;

#[derive(Debug, Clone)]
pub struct HostState {
    pub delay: Duration,
    sent_at: Option<Instant>,
    /// Successes since the last throttled response, only counted while backed off.
    streak: u32,
    backed_off: bool,
}

/// What a status report did to the host's delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Unchanged,
    Slowed,
    Eased,
    Recovered,
}

impl HostState {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            delay: config.base_delay,
            sent_at: None,
            streak: 0,
            backed_off: false,
        }
    }

    pub fn ready_in(&self) -> Duration {
        self.sent_at
            .map(|at| self.delay.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn mark_sent(&mut self) {
        self.sent_at = Some(Instant::now());
    }

    pub fn throttled(&mut self, config: &QueueConfig) -> Pacing {
        self.streak = 0;
        self.backed_off = true;
        self.delay = self
            .delay
            .mul_f64(config.backoff_multiplier)
            .clamp(config.base_delay, config.max_delay.max(config.base_delay));
        Pacing::Slowed
    }

    pub fn succeeded(&mut self, config: &QueueConfig) -> Pacing {
        if !self.backed_off {
            return Pacing::Unchanged;
        }
        self.streak += 1;
        if self.streak < config.recovery_threshold {
            return Pacing::Unchanged;
        }
        self.streak = 0;
        self.delay = self
            .delay
            .mul_f64(config.recovery_multiplier)
            .max(config.min_delay);
        if self.delay <= config.base_delay {
            self.delay = config.base_delay;
            self.backed_off = false;
            Pacing::Recovered
        } else {
            Pacing::Eased
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let config = QueueConfig {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            ..QueueConfig::default()
        };
        let mut state = HostState::new(&config);
        state.throttled(&config);
        state.throttled(&config);
        assert_eq!(state.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_success_outside_backoff_is_noop() {
        let config = QueueConfig::default();
        let mut state = HostState::new(&config);
        for _ in 0..10 {
            assert_eq!(state.succeeded(&config), Pacing::Unchanged);
        }
        assert_eq!(state.delay, config.base_delay);
    }
}
