//! Randomised delays between fetches
//!
//! Delays are drawn uniformly from a short "normal" range, and from a longer
//! "periodic" range after every Nth success. Sleeping is always raced
//! against the run's cancellation token.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::infrastructure::PacingConfig;

#[derive(Debug, Clone)]
pub struct PacingController {
    enabled: bool,
    normal_ms: (u64, u64),
    periodic_ms: (u64, u64),
    periodic_every: u32,
    successes: u32,
}

/// Orders a range so that `min <= max`
fn range_ms(min_secs: u64, max_secs: u64) -> (u64, u64) {
    let (low, high) = if min_secs <= max_secs {
        (min_secs, max_secs)
    } else {
        (max_secs, min_secs)
    };
    (low.saturating_mul(1000), high.saturating_mul(1000))
}

impl PacingController {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            enabled: config.enabled,
            normal_ms: range_ms(config.normal_min_secs, config.normal_max_secs),
            periodic_ms: range_ms(config.periodic_min_secs, config.periodic_max_secs),
            periodic_every: config.periodic_every,
            successes: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(&PacingConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a success and returns the delay to wait before the next claim
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        self.successes = self.successes.wrapping_add(1);

        let periodic = self.periodic_every > 0 && self.successes % self.periodic_every == 0;
        let (low, high) = if periodic { self.periodic_ms } else { self.normal_ms };
        Some(Duration::from_millis(fastrand::u64(low..=high)))
    }

    /// Waits out the next delay. Returns `false` if cancelled while waiting.
    pub async fn pause(&mut self, cancel: &CancellationToken) -> bool {
        let Some(delay) = self.next_delay() else {
            return !cancel.is_cancelled();
        };

        debug!("Pacing: waiting {:.1}s before next job", delay.as_secs_f64());
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(every: u32) -> PacingConfig {
        PacingConfig {
            enabled: true,
            normal_min_secs: 30,
            normal_max_secs: 55,
            periodic_min_secs: 50,
            periodic_max_secs: 90,
            periodic_every: every,
        }
    }

    #[test]
    fn test_every_nth_success_uses_periodic_range() {
        let mut pacing = PacingController::new(&config(5));
        for success in 1..=15 {
            let delay = pacing.next_delay().unwrap();
            if success % 5 == 0 {
                assert!((50..=90).contains(&delay.as_secs()), "success {success}: {delay:?}");
            } else {
                assert!(delay >= Duration::from_secs(30), "success {success}: {delay:?}");
                assert!(delay <= Duration::from_secs(55), "success {success}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_inverted_range_is_normalised() {
        let mut pacing = PacingController::new(&PacingConfig {
            normal_min_secs: 4,
            normal_max_secs: 2,
            ..config(0)
        });
        for _ in 0..20 {
            let delay = pacing.next_delay().unwrap();
            assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_disabled_pacing_never_delays() {
        let mut pacing = PacingController::disabled();
        assert!(!pacing.is_enabled());
        assert_eq!(pacing.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_completes_after_delay() {
        let mut pacing = PacingController::new(&config(0));
        let cancel = CancellationToken::new();
        assert!(pacing.pause(&cancel).await);
    }

    #[tokio::test]
    async fn test_pause_is_interrupted_by_cancellation() {
        let mut pacing = PacingController::new(&config(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = std::time::Instant::now();
        assert!(!pacing.pause(&cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
