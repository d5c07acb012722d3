//! Scrape engine: rate limiting, bounded workers, retry tracking,
//! checkpointing, and the orchestrator that drives a run.

pub mod checkpoint;
pub mod events;
pub mod orchestrator;
pub mod rate_limiter;
pub mod work_queue;
pub mod worker_pool;

pub use checkpoint::CheckpointStore;
pub use events::ScrapeEvent;
pub use orchestrator::{Orchestrator, ScrapeOptions, ScrapeSummary};
pub use rate_limiter::{Endpoint, RateLimiter};
pub use work_queue::{RetryDecision, WorkQueue};
pub use worker_pool::WorkerPool;
