//! Retry-bounded work tracking.
//!
//! Decides, per item, whether a failure retries or is terminal, and keeps
//! the aggregate counts the final report is built from. Rate-limit
//! rejections never reach this layer; they are absorbed by the rate limiter
//! and cost the item nothing.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::api::ErrorClass;
use crate::models::{ScrapeAction, WorkItem, WorkStatus};

/// Outcome of `mark_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The item re-enters the dispatch queue.
    Retry,
    /// The item is terminally failed and lands in the failed list.
    Exhausted,
}

/// Aggregate counts for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
    pub max_retries: u32,
}

/// A terminally failed item, for the final report.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub filename: String,
    pub action: ScrapeAction,
    pub retry_count: u32,
    pub error: String,
}

#[derive(Default)]
struct Inner {
    items: HashMap<String, WorkItem>,
    submitted: u64,
    processed: u64,
    failed: u64,
}

/// Tracks every submitted item through retry, success, and exhaustion.
///
/// Invariant at run end: `processed + failed == submitted`; no item is
/// silently lost.
pub struct WorkQueue {
    max_retries: u32,
    inner: Mutex<Inner>,
}

impl WorkQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Register a new item. Items are keyed by filename; resubmitting a
    /// known filename is ignored (retries go through `mark_failed`, not
    /// here).
    pub fn submit(&self, item: WorkItem) {
        let mut inner = self.lock();
        if inner.items.contains_key(&item.filename) {
            debug!("Item {} already tracked, ignoring resubmit", item.filename);
            return;
        }
        inner.submitted += 1;
        inner.items.insert(item.filename.clone(), item);
    }

    /// Mark an item as dispatched.
    pub fn mark_in_flight(&self, filename: &str) {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(filename) {
            item.status = WorkStatus::InFlight;
        }
    }

    /// Mark an item as completed successfully.
    pub fn mark_succeeded(&self, filename: &str) {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(filename) {
            if item.status.is_terminal() {
                return;
            }
            item.status = WorkStatus::Succeeded;
            inner.processed += 1;
        }
    }

    /// Record a failure and decide whether to retry.
    ///
    /// `not_found` is terminal immediately: a 404 will not become a 200 on
    /// a later attempt. Anything else consumes one retry until
    /// `max_retries` attempts have failed.
    pub fn mark_failed(&self, filename: &str, error: &str, class: ErrorClass) -> RetryDecision {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let max_retries = self.max_retries;
        let Some(item) = inner.items.get_mut(filename) else {
            warn!("mark_failed for untracked item {}", filename);
            return RetryDecision::Exhausted;
        };
        if item.status.is_terminal() {
            return RetryDecision::Exhausted;
        }

        item.last_error = Some(error.to_string());

        if class == ErrorClass::NotFound {
            item.status = WorkStatus::Exhausted;
            inner.failed += 1;
            return RetryDecision::Exhausted;
        }

        // Retry budget check happens before the increment, so `retry_count`
        // never exceeds `max_retries`.
        if item.retry_count < max_retries {
            item.retry_count += 1;
            item.status = WorkStatus::Retrying;
            debug!(
                "Item {} failed (retry {}/{}): {}",
                filename, item.retry_count, max_retries, error
            );
            RetryDecision::Retry
        } else {
            item.status = WorkStatus::Exhausted;
            inner.failed += 1;
            warn!(
                "Item {} exhausted after {} retries: {}",
                filename, item.retry_count, error
            );
            RetryDecision::Exhausted
        }
    }

    /// Aggregate counts snapshot.
    pub fn get_stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            pending: inner.submitted - inner.processed - inner.failed,
            processed: inner.processed,
            failed: inner.failed,
            max_retries: self.max_retries,
        }
    }

    /// Terminally failed items, for the final report.
    pub fn get_failed_items(&self) -> Vec<FailedItem> {
        let inner = self.lock();
        let mut failed: Vec<FailedItem> = inner
            .items
            .values()
            .filter(|item| item.status == WorkStatus::Exhausted)
            .map(|item| FailedItem {
                filename: item.filename.clone(),
                action: item.action,
                retry_count: item.retry_count,
                error: item.last_error.clone().unwrap_or_default(),
            })
            .collect();
        failed.sort_by(|a, b| a.filename.cmp(&b.filename));
        failed
    }

    /// A clone of the tracked item, with its current retry count. Used to
    /// resubmit an item into the dispatch queue after a retry decision.
    pub fn item(&self, filename: &str) -> Option<WorkItem> {
        self.lock().items.get(filename).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Held only for map updates; a poisoned lock means a panic mid-update
        // and the counts can no longer be trusted anyway.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::RomFile;

    fn item(name: &str) -> WorkItem {
        let rom = RomFile {
            path: PathBuf::from(name),
            filename: name.to_string(),
            size: 64,
            sha256: "ab".repeat(32),
        };
        WorkItem::new(&rom, ScrapeAction::Full)
    }

    #[test]
    fn test_success_path() {
        let queue = WorkQueue::new(3);
        queue.submit(item("a.sfc"));
        queue.mark_in_flight("a.sfc");
        queue.mark_succeeded("a.sfc");

        let stats = queue.get_stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_retry_until_exhausted() {
        let queue = WorkQueue::new(2);
        queue.submit(item("b.sfc"));

        assert_eq!(
            queue.mark_failed("b.sfc", "timeout", ErrorClass::Transient),
            RetryDecision::Retry
        );
        assert_eq!(
            queue.mark_failed("b.sfc", "timeout", ErrorClass::Transient),
            RetryDecision::Retry
        );
        assert_eq!(
            queue.mark_failed("b.sfc", "timeout", ErrorClass::Transient),
            RetryDecision::Exhausted
        );

        let failed = queue.get_failed_items();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error, "timeout");

        // Retry count never exceeds max_retries.
        assert_eq!(failed[0].retry_count, 2);
        assert!(failed[0].retry_count <= queue.max_retries());
    }

    #[test]
    fn test_not_found_is_terminal_immediately() {
        let queue = WorkQueue::new(5);
        queue.submit(item("c.sfc"));

        assert_eq!(
            queue.mark_failed("c.sfc", "no match", ErrorClass::NotFound),
            RetryDecision::Exhausted
        );
        let failed = queue.get_failed_items();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 0);
    }

    #[test]
    fn test_accounting_invariant() {
        // 10 items, max_retries = 2: 3 fail twice then succeed, 7 succeed
        // immediately. Everything is processed, nothing fails.
        let queue = WorkQueue::new(2);
        for i in 0..10 {
            queue.submit(item(&format!("rom{i}.sfc")));
        }

        for i in 0..3 {
            let name = format!("rom{i}.sfc");
            assert_eq!(
                queue.mark_failed(&name, "flaky", ErrorClass::Transient),
                RetryDecision::Retry
            );
            assert_eq!(
                queue.mark_failed(&name, "flaky", ErrorClass::Transient),
                RetryDecision::Retry
            );
            queue.mark_succeeded(&name);
        }
        for i in 3..10 {
            queue.mark_succeeded(&format!("rom{i}.sfc"));
        }

        let stats = queue.get_stats();
        assert_eq!(stats.processed + stats.failed, 10);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processed, 10);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_terminal_items_do_not_double_count() {
        let queue = WorkQueue::new(1);
        queue.submit(item("d.sfc"));
        queue.mark_succeeded("d.sfc");
        queue.mark_succeeded("d.sfc");
        assert_eq!(
            queue.mark_failed("d.sfc", "late", ErrorClass::Transient),
            RetryDecision::Exhausted
        );

        let stats = queue.get_stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_resubmit_ignored() {
        let queue = WorkQueue::new(3);
        queue.submit(item("e.sfc"));
        queue.submit(item("e.sfc"));
        queue.mark_succeeded("e.sfc");

        let stats = queue.get_stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.pending, 0);
    }
}
