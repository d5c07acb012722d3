//! Rate limiter configuration and stats snapshots.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Endpoint;

/// A sliding-window call budget: at most `calls` within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub calls: usize,
    pub window: Duration,
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Budget applied to endpoints without an explicit entry in `limits`.
    pub default_limit: WindowLimit,
    /// Per-endpoint budget overrides.
    pub limits: HashMap<Endpoint, WindowLimit>,
    /// Exponential backoff base: multiplier is `base^consecutive_rejections`.
    pub backoff_base: f64,
    /// Delay applied at multiplier 1.
    pub backoff_base_delay: Duration,
    /// Upper bound on the backoff multiplier.
    pub max_backoff_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut limits = HashMap::new();
        // Media downloads are heavier on the remote side; keep them slower
        // than metadata lookups by default.
        limits.insert(
            Endpoint::MediaDownload,
            WindowLimit {
                calls: 30,
                window: Duration::from_secs(60),
            },
        );
        Self {
            default_limit: WindowLimit {
                calls: 60,
                window: Duration::from_secs(60),
            },
            limits,
            backoff_base: 2.0,
            backoff_base_delay: Duration::from_secs(2),
            max_backoff_multiplier: 64.0,
        }
    }
}

impl RateLimitConfig {
    /// The effective budget for an endpoint.
    pub fn limit_for(&self, endpoint: Endpoint) -> WindowLimit {
        self.limits
            .get(&endpoint)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

/// Read-only snapshot of one endpoint's state.
#[derive(Debug, Clone)]
pub struct EndpointStats {
    pub calls_in_window: usize,
    pub window_limit: usize,
    pub consecutive_rejections: u32,
    pub backoff_multiplier: f64,
    pub in_backoff: bool,
    pub backoff_remaining: Duration,
    pub total_calls: u64,
    pub total_rejections: u64,
}

/// Daily API quota snapshot, for reporting only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuotaStats {
    pub used: u64,
    pub limit: u64,
}

impl QuotaStats {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn exhausted(&self) -> bool {
        self.limit > 0 && self.used >= self.limit
    }
}
