//! Shared HTTP transport, sized to the worker pool's concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use super::error::ApiError;

/// User agent sent on every request.
pub const USER_AGENT: &str = concat!("romharvest/", env!("CARGO_PKG_VERSION"));

/// Owns the one `reqwest::Client` every job shares.
///
/// Resizing replaces the client, which would orphan in-flight requests on
/// the old transport, so it happens exactly once: right after
/// authentication reveals the account's thread allowance, before the worker
/// pool starts dispatching. Never mid-run.
pub struct ConnectionPool {
    client: RwLock<Client>,
    size: AtomicUsize,
    timeout: Duration,
}

impl ConnectionPool {
    /// Build the initial single-connection transport used for
    /// authentication.
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = build_client(timeout, 1)?;
        Ok(Self {
            client: RwLock::new(client),
            size: AtomicUsize::new(1),
            timeout,
        })
    }

    /// Replace the transport with one sized for `n` concurrent callers.
    pub fn resize(&self, n: usize) -> Result<(), ApiError> {
        let n = n.max(1);
        let client = build_client(self.timeout, n)?;
        if let Ok(mut slot) = self.client.write() {
            *slot = client;
        }
        self.size.store(n, Ordering::Relaxed);
        info!("Connection pool resized to {} connection(s)", n);
        Ok(())
    }

    /// A handle to the shared client (cheap clone).
    pub fn client(&self) -> Client {
        self.client
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

fn build_client(timeout: Duration, pool_size: usize) -> Result<Client, ApiError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .gzip(true)
        .brotli(true)
        .pool_max_idle_per_host(pool_size)
        .build()
        .map_err(|e| ApiError::Fatal(format!("failed to build HTTP client: {e}")))
}
