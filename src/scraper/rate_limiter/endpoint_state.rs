//! Per-endpoint rate limiting state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::config::{RateLimitConfig, WindowLimit};

/// State for a single endpoint.
///
/// Invariant: `backoff_multiplier == 1.0` exactly when
/// `consecutive_rejections == 0`; both change together in
/// `record_rejection` and `record_success`.
#[derive(Debug, Clone)]
pub struct EndpointState {
    /// Call budget for this endpoint.
    pub limit: WindowLimit,
    /// Timestamps of recent calls, oldest first. Pruned on every check,
    /// so it holds at most `limit.calls` entries.
    pub calls: VecDeque<Instant>,
    /// Rejections since the last backoff-clearing success.
    pub consecutive_rejections: u32,
    /// Current backoff multiplier, `>= 1.0`.
    pub backoff_multiplier: f64,
    /// Calls are suspended until this instant, if set.
    pub backoff_until: Option<Instant>,
    /// Total calls recorded.
    pub total_calls: u64,
    /// Total rejections recorded.
    pub total_rejections: u64,
}

impl EndpointState {
    pub fn new(limit: WindowLimit) -> Self {
        Self {
            limit,
            calls: VecDeque::with_capacity(limit.calls),
            consecutive_rejections: 0,
            backoff_multiplier: 1.0,
            backoff_until: None,
            total_calls: 0,
            total_rejections: 0,
        }
    }

    /// Drop call timestamps older than the window.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.limit.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until both the window and any backoff allow another call.
    /// Prunes as a side effect.
    pub fn time_until_ready(&mut self, now: Instant) -> Duration {
        self.prune(now);

        let window_wait = if self.calls.len() >= self.limit.calls {
            // Oldest call leaves the window first.
            self.calls
                .front()
                .map(|&oldest| {
                    (oldest + self.limit.window).saturating_duration_since(now)
                })
                .unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let backoff_wait = self
            .backoff_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        window_wait.max(backoff_wait)
    }

    /// Record a call at `now`. Caller must have verified readiness.
    pub fn record_call(&mut self, now: Instant) {
        self.calls.push_back(now);
        self.total_calls += 1;
    }

    /// Apply a rate-limit rejection. Returns true when this rejection
    /// entered backoff (the first of a streak).
    pub fn record_rejection(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        let entering = self.consecutive_rejections == 0;
        self.consecutive_rejections += 1;
        self.total_rejections += 1;
        self.backoff_multiplier = config
            .backoff_base
            .powi(self.consecutive_rejections as i32)
            .min(config.max_backoff_multiplier);
        self.backoff_until =
            Some(now + config.backoff_base_delay.mul_f64(self.backoff_multiplier));
        entering
    }

    /// Apply a success. Backoff clears only once the success happens at or
    /// after `backoff_until`; a success racing an active backoff does not
    /// reset it. Returns true when backoff was cleared.
    pub fn record_success(&mut self, now: Instant) -> bool {
        match self.backoff_until {
            Some(until) if now >= until => {
                self.consecutive_rejections = 0;
                self.backoff_multiplier = 1.0;
                self.backoff_until = None;
                true
            }
            _ => false,
        }
    }

    /// Whether calls are currently suspended by backoff.
    pub fn in_backoff(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(calls: usize, window_ms: u64) -> WindowLimit {
        WindowLimit {
            calls,
            window: Duration::from_millis(window_ms),
        }
    }

    #[test]
    fn test_prune_drops_expired_calls() {
        let mut state = EndpointState::new(limit(10, 50));
        let start = Instant::now();
        state.record_call(start);
        state.record_call(start);

        state.prune(start + Duration::from_millis(10));
        assert_eq!(state.calls.len(), 2);

        state.prune(start + Duration::from_millis(60));
        assert!(state.calls.is_empty());
    }

    #[test]
    fn test_window_wait_when_full() {
        let mut state = EndpointState::new(limit(2, 100));
        let start = Instant::now();
        state.record_call(start);
        state.record_call(start);

        let wait = state.time_until_ready(start + Duration::from_millis(30));
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(70));
    }

    #[test]
    fn test_rejection_grows_monotonically_and_caps() {
        let config = RateLimitConfig {
            backoff_base: 2.0,
            max_backoff_multiplier: 8.0,
            ..Default::default()
        };
        let mut state = EndpointState::new(limit(10, 100));
        let now = Instant::now();

        let mut last = 1.0;
        for i in 1..=5 {
            state.record_rejection(&config, now);
            assert_eq!(state.consecutive_rejections, i);
            assert!(state.backoff_multiplier >= last);
            last = state.backoff_multiplier;
        }
        assert_eq!(state.backoff_multiplier, 8.0);
        assert_eq!(state.total_rejections, 5);
    }

    #[test]
    fn test_entering_backoff_reported_once() {
        let config = RateLimitConfig::default();
        let mut state = EndpointState::new(limit(10, 100));
        let now = Instant::now();

        assert!(state.record_rejection(&config, now));
        assert!(!state.record_rejection(&config, now));
        assert!(!state.record_rejection(&config, now));
    }

    #[test]
    fn test_success_before_backoff_expiry_does_not_reset() {
        let config = RateLimitConfig {
            backoff_base_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let mut state = EndpointState::new(limit(10, 100));
        let now = Instant::now();

        state.record_rejection(&config, now);
        assert!(!state.record_success(now + Duration::from_secs(1)));
        assert_eq!(state.consecutive_rejections, 1);
        assert!(state.backoff_multiplier > 1.0);
    }

    #[test]
    fn test_success_at_or_after_expiry_resets() {
        let config = RateLimitConfig {
            backoff_base: 2.0,
            backoff_base_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let mut state = EndpointState::new(limit(10, 100));
        let now = Instant::now();

        state.record_rejection(&config, now);
        let until = state.backoff_until.unwrap();
        assert!(state.record_success(until));
        assert_eq!(state.consecutive_rejections, 0);
        assert_eq!(state.backoff_multiplier, 1.0);
        assert!(state.backoff_until.is_none());
    }
}
