//! Adaptive per-endpoint rate limiter.
//!
//! Tracks a sliding window of recent calls per endpoint and backs off
//! exponentially when the API rejects with a rate limit. `acquire` never
//! fails; it only delays the caller until the endpoint is ready.

mod config;
mod endpoint_state;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use config::{EndpointStats, QuotaStats, RateLimitConfig, WindowLimit};
use endpoint_state::EndpointState;

/// A rate-limit category of remote API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Authentication and account limits.
    UserInfo,
    /// Metadata lookup by ROM hash.
    GameInfo,
    /// Name-based fallback search.
    Search,
    /// Artwork and video downloads.
    MediaDownload,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::UserInfo,
        Endpoint::GameInfo,
        Endpoint::Search,
        Endpoint::MediaDownload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInfo => "user_info",
            Self::GameInfo => "game_info",
            Self::Search => "search",
            Self::MediaDownload => "media_download",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "user_info" => Some(Self::UserInfo),
            "game_info" => Some(Self::GameInfo),
            "search" => Some(Self::Search),
            "media_download" => Some(Self::MediaDownload),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer invoked on backoff transitions: `(endpoint, entering)`.
/// Fired only when an endpoint enters or leaves backoff, not per call.
pub type BackoffObserver = Box<dyn Fn(Endpoint, bool) + Send + Sync>;

/// Adaptive rate limiter with one sliding window per endpoint.
pub struct RateLimiter {
    config: RateLimitConfig,
    endpoints: HashMap<Endpoint, Mutex<EndpointState>>,
    quota: RwLock<QuotaStats>,
    concurrency_limit: AtomicUsize,
    observer: RwLock<Option<BackoffObserver>>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config.
    pub fn with_config(config: RateLimitConfig) -> Self {
        let endpoints = Endpoint::ALL
            .into_iter()
            .map(|endpoint| {
                (
                    endpoint,
                    Mutex::new(EndpointState::new(config.limit_for(endpoint))),
                )
            })
            .collect();
        Self {
            config,
            endpoints,
            quota: RwLock::new(QuotaStats::default()),
            concurrency_limit: AtomicUsize::new(1),
            observer: RwLock::new(None),
        }
    }

    /// Register an observer for backoff enter/leave transitions.
    pub fn set_backoff_observer(&self, observer: BackoffObserver) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = Some(observer);
        }
    }

    /// Drop the observer. Called at run end so resources it captures (such
    /// as event channel senders) are released.
    pub fn clear_backoff_observer(&self) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = None;
        }
    }

    fn notify_observer(&self, endpoint: Endpoint, entering: bool) {
        if let Ok(slot) = self.observer.read() {
            if let Some(observer) = slot.as_ref() {
                observer(endpoint, entering);
            }
        }
    }

    fn state(&self, endpoint: Endpoint) -> &Mutex<EndpointState> {
        // The map holds every variant; built in the constructor.
        &self.endpoints[&endpoint]
    }

    /// Wait until the endpoint's window and backoff allow a call, then
    /// record the call. The per-endpoint lock is never held across a sleep.
    pub async fn acquire(&self, endpoint: Endpoint) {
        loop {
            let wait = {
                let mut state = self.state(endpoint).lock().await;
                let now = Instant::now();
                let wait = state.time_until_ready(now);
                if wait.is_zero() {
                    state.record_call(now);
                    return;
                }
                wait
            };

            debug!("Rate limiting {}: waiting {:?}", endpoint, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Report a rate-limit rejection (HTTP 429) for an endpoint.
    pub async fn record_rejection(&self, endpoint: Endpoint) {
        let (entering, multiplier, rejections) = {
            let mut state = self.state(endpoint).lock().await;
            let entering = state.record_rejection(&self.config, Instant::now());
            (
                entering,
                state.backoff_multiplier,
                state.consecutive_rejections,
            )
        };

        warn!(
            "Rate limited on {} ({} consecutive), backoff multiplier {:.0}",
            endpoint, rejections, multiplier
        );
        if entering {
            self.notify_observer(endpoint, true);
        }
    }

    /// Report a successful call. Clears backoff once the success lands at
    /// or after the backoff deadline.
    pub async fn record_success(&self, endpoint: Endpoint) {
        let left_backoff = {
            let mut state = self.state(endpoint).lock().await;
            state.record_success(Instant::now())
        };

        if left_backoff {
            info!("Endpoint {} recovered from rate limit backoff", endpoint);
            self.notify_observer(endpoint, false);
        }
    }

    /// Record how many callers may be in flight, as reported by the API.
    /// Enforcement belongs to the worker pool; this value sizes the
    /// connection pool and shows up in reporting.
    pub fn update_concurrency_limit(&self, n: usize) {
        self.concurrency_limit.store(n.max(1), Ordering::Relaxed);
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit.load(Ordering::Relaxed)
    }

    /// Update the daily quota snapshot. Reporting only; never blocks calls.
    pub fn update_quota(&self, used: u64, limit: u64) {
        if let Ok(mut quota) = self.quota.write() {
            *quota = QuotaStats { used, limit };
        }
    }

    /// Read-only daily quota snapshot.
    pub fn get_quota_stats(&self) -> QuotaStats {
        self.quota.read().map(|q| *q).unwrap_or_default()
    }

    /// Read-only snapshot of one endpoint's state.
    pub async fn get_stats(&self, endpoint: Endpoint) -> EndpointStats {
        let mut state = self.state(endpoint).lock().await;
        let now = Instant::now();
        state.prune(now);
        EndpointStats {
            calls_in_window: state.calls.len(),
            window_limit: state.limit.calls,
            consecutive_rejections: state.consecutive_rejections,
            backoff_multiplier: state.backoff_multiplier,
            in_backoff: state.in_backoff(now),
            backoff_remaining: state
                .backoff_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default(),
            total_calls: state.total_calls,
            total_rejections: state.total_rejections,
        }
    }

    /// Clear all endpoint state so a later run does not inherit stale
    /// backoff. Called at shutdown.
    pub async fn reset(&self) {
        for (endpoint, state) in &self.endpoints {
            let mut state = state.lock().await;
            *state = EndpointState::new(self.config.limit_for(*endpoint));
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
