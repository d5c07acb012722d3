//! Bounded-concurrency worker pool with cooperative pause and drain.
//!
//! At most `max_concurrent` jobs run at once, where the cap comes from the
//! API-reported thread allowance clamped to the configured safety range.
//! Stopping is a drain: in-flight jobs always run to completion so no
//! half-written output is left behind.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use crate::config::WorkerBounds;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is not initialized")]
    NotInitialized,
    #[error("worker pool is already initialized")]
    AlreadyInitialized,
}

/// Concurrency-bounded job pool.
///
/// Lifecycle: uninitialized → running ⇄ paused → draining → shutdown.
pub struct WorkerPool {
    semaphore: OnceLock<Arc<Semaphore>>,
    max_concurrent: OnceLock<usize>,
    active: Arc<AtomicUsize>,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    /// Wakes dispatchers blocked on pause (also on stop, so they re-check).
    resume_notify: Notify,
    /// Wakes shutdown waiters when the last active job finishes.
    idle_notify: Arc<Notify>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            semaphore: OnceLock::new(),
            max_concurrent: OnceLock::new(),
            active: Arc::new(AtomicUsize::new(0)),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            resume_notify: Notify::new(),
            idle_notify: Arc::new(Notify::new()),
        }
    }

    /// Size the pool from the API-reported thread allowance, clamped to the
    /// configured bounds. Must be called exactly once, before any dispatch.
    pub fn initialize_pools(
        &self,
        api_threads: usize,
        bounds: WorkerBounds,
    ) -> Result<usize, PoolError> {
        let max = bounds.clamp(api_threads.max(1));
        self.max_concurrent
            .set(max)
            .map_err(|_| PoolError::AlreadyInitialized)?;
        let _ = self.semaphore.set(Arc::new(Semaphore::new(max)));
        info!(
            "Worker pool sized to {} (API reported {}, bounds [{}, {}])",
            max, api_threads, bounds.min, bounds.max
        );
        Ok(max)
    }

    pub fn is_initialized(&self) -> bool {
        self.max_concurrent.get().is_some()
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent.get().copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Hold new dispatches. In-flight jobs keep running.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Worker pool paused");
    }

    /// Release paused dispatchers.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
        info!("Worker pool resumed");
    }

    /// Stop issuing new dispatches. In-flight jobs drain to completion.
    pub fn stop_workers(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // Wake dispatchers held by pause so they observe the stop.
        self.resume_notify.notify_waiters();
        info!(
            "Worker pool stopping: draining {} in-flight job(s)",
            self.active_count()
        );
    }

    /// Run a job once a slot is free, honoring pause and stop.
    ///
    /// Returns `Ok(true)` when the job was dispatched, `Ok(false)` when the
    /// pool is stopping and the job was never started. Blocks while the pool
    /// is paused or at capacity.
    pub async fn dispatch<F>(&self, job: F) -> Result<bool, PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self
            .semaphore
            .get()
            .ok_or(PoolError::NotInitialized)?
            .clone();

        loop {
            if self.is_stop_requested() {
                return Ok(false);
            }
            if !self.is_paused() {
                break;
            }
            // Register the wakeup before re-checking, so a resume between
            // the check and the await is not missed.
            let mut resumed = std::pin::pin!(self.resume_notify.notified());
            resumed.as_mut().enable();
            if !self.is_paused() || self.is_stop_requested() {
                continue;
            }
            debug!("Dispatch held: pool is paused");
            resumed.await;
        }

        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed while the pool exists.
            Err(_) => return Ok(false),
        };

        // A stop may have arrived while waiting for the slot.
        if self.is_stop_requested() {
            return Ok(false);
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = self.active.clone();
        let idle_notify = self.idle_notify.clone();

        tokio::spawn(async move {
            // Permit and counter are released when the job ends, panics
            // included, so drain accounting cannot leak.
            struct Slot {
                active: Arc<AtomicUsize>,
                idle_notify: Arc<Notify>,
            }
            impl Drop for Slot {
                fn drop(&mut self) {
                    if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.idle_notify.notify_waiters();
                    }
                }
            }
            // Declared before the slot so the active count drops before the
            // semaphore permit frees (locals drop in reverse order).
            let _permit = permit;
            let _slot = Slot {
                active,
                idle_notify,
            };
            job.await;
        });

        Ok(true)
    }

    /// Final teardown. With `wait`, blocks until all in-flight jobs finish.
    pub async fn shutdown(&self, wait: bool) {
        self.stop_workers();
        if !wait {
            return;
        }
        loop {
            if self.active_count() == 0 {
                break;
            }
            let mut idle = std::pin::pin!(self.idle_notify.notified());
            idle.as_mut().enable();
            if self.active_count() == 0 {
                break;
            }
            idle.await;
        }
        debug!("Worker pool drained");
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn bounds(min: usize, max: usize) -> WorkerBounds {
        WorkerBounds { min, max }
    }

    #[tokio::test]
    async fn test_initialize_clamps_and_rejects_reinit() {
        let pool = WorkerPool::new();
        assert!(!pool.is_initialized());
        assert!(matches!(
            pool.dispatch(async {}).await,
            Err(PoolError::NotInitialized)
        ));

        let max = pool.initialize_pools(32, bounds(1, 4)).unwrap();
        assert_eq!(max, 4);
        assert_eq!(pool.max_concurrent(), Some(4));
        assert!(pool.is_initialized());

        assert!(matches!(
            pool.initialize_pools(2, bounds(1, 4)),
            Err(PoolError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_active_never_exceeds_max() {
        let pool = Arc::new(WorkerPool::new());
        pool.initialize_pools(2, bounds(1, 2)).unwrap();

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let current = current.clone();
            let peak = peak.clone();
            pool.dispatch(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.shutdown(true).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_pause_holds_new_dispatch() {
        let pool = Arc::new(WorkerPool::new());
        pool.initialize_pools(2, bounds(1, 2)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        pool.pause();

        let dispatcher = {
            let pool = pool.clone();
            let ran = ran.clone();
            tokio::spawn(async move {
                pool.dispatch(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0, "dispatched while paused");

        pool.resume();
        assert!(dispatcher.await.unwrap());
        pool.shutdown(true).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_and_rejects_queued() {
        let pool = Arc::new(WorkerPool::new());
        pool.initialize_pools(3, bounds(1, 3)).unwrap();

        let finished = Arc::new(AtomicUsize::new(0));

        // 3 jobs occupy every slot.
        for _ in 0..3 {
            let finished = finished.clone();
            assert!(pool
                .dispatch(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap());
        }
        assert_eq!(pool.active_count(), 3);

        pool.stop_workers();

        // 7 more jobs never start.
        for _ in 0..7 {
            let finished = finished.clone();
            let dispatched = pool
                .dispatch(async move {
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            assert!(!dispatched);
        }

        pool.shutdown(true).await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_while_paused_releases_dispatcher() {
        let pool = Arc::new(WorkerPool::new());
        pool.initialize_pools(1, bounds(1, 1)).unwrap();
        pool.pause();

        let dispatcher = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.dispatch(async {}).await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.stop_workers();

        assert!(!dispatcher.await.unwrap());
    }
}
