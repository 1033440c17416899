use crate::core::config::BackoffConfig;
use std::time::Duration;

/// Exponential-backoff reconnection policy.
///
/// The attempt counter resets only after a session has stayed Active for
/// the full stability window, so a single flapping period cannot grow the
/// backoff without bound while persistent instability still pays full
/// price. An administrative enable resets the counter outright.
#[derive(Debug)]
pub struct ReconnectController {
    config: BackoffConfig,
    attempts: u32,
}

impl ReconnectController {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Raw schedule without jitter: `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Next delay to sleep before reconnecting, with jitter applied.
    /// Increments the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let raw = self.delay_for_attempt(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        let jitter = raw.as_secs_f64() * self.config.jitter_fraction * rand::random::<f64>();
        raw + Duration::from_secs_f64(jitter)
    }

    /// Report how long the ended session stayed Active (`None` if it never
    /// reached Active).
    pub fn note_session_end(&mut self, active_for: Option<Duration>) {
        if let Some(active) = active_for {
            if active >= self.config.stability_window {
                self.attempts = 0;
            }
        }
    }

    /// Administrative enable: restart the schedule from the base delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.0,
            stability_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn consecutive_failures_double_the_delay_up_to_the_cap() {
        let mut controller = ReconnectController::new(config());
        let delays: Vec<Duration> = (0..8).map(|_| controller.next_delay()).collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delays must be non-decreasing");
        }
        assert_eq!(delays[7], Duration::from_secs(60));
    }

    #[test]
    fn schedule_is_capped_far_beyond_the_doubling_range() {
        let controller = ReconnectController::new(config());
        assert_eq!(controller.delay_for_attempt(40), Duration::from_secs(60));
    }

    #[test]
    fn stable_active_period_resets_the_counter() {
        let mut controller = ReconnectController::new(config());
        controller.next_delay();
        controller.next_delay();
        assert_eq!(controller.attempts(), 2);

        controller.note_session_end(Some(Duration::from_secs(120)));
        assert_eq!(controller.attempts(), 0);
        assert_eq!(controller.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn short_active_period_keeps_penalizing() {
        let mut controller = ReconnectController::new(config());
        controller.next_delay();
        controller.next_delay();

        controller.note_session_end(Some(Duration::from_secs(5)));
        assert_eq!(controller.attempts(), 2);
        assert_eq!(controller.next_delay(), Duration::from_secs(4));

        controller.note_session_end(None);
        assert_eq!(controller.attempts(), 3);
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let mut cfg = config();
        cfg.jitter_fraction = 0.2;
        let mut controller = ReconnectController::new(cfg);

        for attempt in 0..6 {
            let raw = controller.delay_for_attempt(attempt);
            let jittered = controller.next_delay();
            assert!(jittered >= raw);
            assert!(jittered <= raw + raw.mul_f64(0.2));
        }
    }

    #[test]
    fn admin_reset_restarts_from_base() {
        let mut controller = ReconnectController::new(config());
        for _ in 0..5 {
            controller.next_delay();
        }
        controller.reset();
        assert_eq!(controller.next_delay(), Duration::from_secs(1));
    }
}
