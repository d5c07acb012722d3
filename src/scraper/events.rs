//! Progress events emitted during a scrape run.
//!
//! The orchestrator and rate limiter publish these over a channel; the CLI
//! renders them. The core never talks to a terminal directly.

use super::rate_limiter::{Endpoint, QuotaStats};

/// Events emitted during a scrape run.
#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    /// Scan finished; the run is about to start.
    RunStarted { total: usize, skipped: usize },
    /// Authentication succeeded and the pool was sized.
    Authenticated {
        username: String,
        workers: usize,
        quota: QuotaStats,
    },
    /// A job started for a ROM.
    Started { filename: String },
    /// A ROM was scraped successfully.
    Completed { filename: String, game: String },
    /// A ROM failed and will be retried.
    Retrying {
        filename: String,
        attempt: u32,
        error: String,
    },
    /// A ROM failed terminally.
    Failed { filename: String, error: String },
    /// An endpoint entered or left rate-limit backoff.
    Backoff { endpoint: Endpoint, entering: bool },
    /// A fatal error is aborting the run.
    Fatal { error: String },
    /// The run is draining after a stop request.
    Interrupted,
}
