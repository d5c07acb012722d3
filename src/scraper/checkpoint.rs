//! Resumable run checkpoints.
//!
//! Progress is snapshotted to `<output-dir>/.checkpoint.json` every
//! `interval` completed items and at forced boundaries (run start/end,
//! fatal errors). Resume granularity equals the interval: up to
//! `interval - 1` items may be reprocessed after a crash. That trade keeps
//! per-item I/O off the hot path and is intentional.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::ScrapeAction;
use crate::scraper::rate_limiter::QuotaStats;

/// Checkpoint file name inside the output directory.
pub const CHECKPOINT_FILE: &str = ".checkpoint.json";

/// Aggregate run statistics carried in the checkpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_roms: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// A terminally failed ROM recorded in the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRom {
    pub filename: String,
    pub action: ScrapeAction,
    pub reason: String,
}

/// Durable snapshot of run progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub system: String,
    pub timestamp: DateTime<Utc>,
    pub processed_roms: BTreeSet<String>,
    pub failed_roms: Vec<FailedRom>,
    #[serde(default)]
    pub api_quota: QuotaStats,
    #[serde(default)]
    pub stats: RunStats,
}

impl Checkpoint {
    fn empty(system: &str) -> Self {
        Self {
            system: system.to_string(),
            timestamp: Utc::now(),
            processed_roms: BTreeSet::new(),
            failed_roms: Vec::new(),
            api_quota: QuotaStats::default(),
            stats: RunStats::default(),
        }
    }
}

struct StoreState {
    checkpoint: Checkpoint,
    /// Items recorded since the last write.
    unsaved: usize,
}

/// Interval-gated, atomically written checkpoint store.
pub struct CheckpointStore {
    path: PathBuf,
    system: String,
    interval: usize,
    state: Mutex<StoreState>,
    /// Serializes disk writes so snapshots land in capture order.
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Create a store for a run. Starts empty; call `load` to adopt a prior
    /// snapshot.
    pub fn new(output_dir: &Path, system: &str, interval: usize) -> Self {
        Self {
            path: output_dir.join(CHECKPOINT_FILE),
            system: system.to_string(),
            interval: interval.max(1),
            state: Mutex::new(StoreState {
                checkpoint: Checkpoint::empty(system),
                unsaved: 0,
            }),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a prior checkpoint from disk without adopting it. Returns
    /// `None` when the file is missing, unreadable, corrupt, or belongs to
    /// another system; all of those mean a fresh start, never an error.
    pub fn load(&self) -> Option<Checkpoint> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Unreadable checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };
        let checkpoint: Checkpoint = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Corrupt checkpoint {} ({}), starting fresh",
                    self.path.display(),
                    e
                );
                return None;
            }
        };
        if checkpoint.system != self.system {
            debug!(
                "Checkpoint belongs to system {:?}, not {:?}; ignoring",
                checkpoint.system, self.system
            );
            return None;
        }
        Some(checkpoint)
    }

    /// Load and adopt a prior checkpoint. Returns true when one was
    /// adopted.
    pub fn resume(&self) -> bool {
        match self.load() {
            Some(checkpoint) => {
                info!(
                    "Resuming {}: {} item(s) already processed",
                    self.system,
                    checkpoint.processed_roms.len() + checkpoint.failed_roms.len()
                );
                let mut state = self.lock();
                state.checkpoint = checkpoint;
                state.unsaved = 0;
                true
            }
            None => false,
        }
    }

    /// Record one completed item in memory. Does not write.
    pub fn record_item(&self, filename: &str, action: ScrapeAction, success: bool, reason: Option<&str>) {
        let mut state = self.lock();
        if success {
            state.checkpoint.stats.successful += 1;
        } else {
            state.checkpoint.stats.failed += 1;
            state.checkpoint.failed_roms.push(FailedRom {
                filename: filename.to_string(),
                action,
                reason: reason.unwrap_or("unknown").to_string(),
            });
        }
        state.checkpoint.stats.processed += 1;
        state.checkpoint.processed_roms.insert(filename.to_string());
        state.unsaved += 1;
    }

    /// Whether an item completed in this run or a resumed one.
    pub fn is_processed(&self, filename: &str) -> bool {
        self.lock().checkpoint.processed_roms.contains(filename)
    }

    /// Update the quota snapshot carried in the checkpoint.
    pub fn set_quota(&self, quota: QuotaStats) {
        self.lock().checkpoint.api_quota = quota;
    }

    /// Set run totals (total ROMs found, items skipped on resume).
    pub fn set_totals(&self, total_roms: u64, skipped: u64) {
        let mut state = self.lock();
        state.checkpoint.stats.total_roms = total_roms;
        state.checkpoint.stats.skipped = skipped;
    }

    /// A snapshot of the in-memory checkpoint, for status reporting.
    pub fn snapshot(&self) -> Checkpoint {
        self.lock().checkpoint.clone()
    }

    /// Write the checkpoint if the interval has elapsed, or always with
    /// `force`. The write is atomic: serialize to a temp file in the same
    /// directory, then rename over the target. Returns whether a write
    /// happened.
    pub fn save(&self, force: bool) -> anyhow::Result<bool> {
        // Held across capture AND rename: two concurrent saves must not
        // persist in the opposite order they serialized, or an older
        // snapshot would overwrite a newer one on disk.
        let _write = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let payload = {
            let mut state = self.lock();
            if !force && state.unsaved < self.interval {
                return Ok(false);
            }
            state.checkpoint.timestamp = Utc::now();
            state.unsaved = 0;
            serde_json::to_vec_pretty(&state.checkpoint)?
        };

        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!("Checkpoint written to {}", self.path.display());
        Ok(true)
    }

    /// Delete the checkpoint file. Called once a run completes with no
    /// pending work.
    pub fn remove(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Checkpoint removed: run complete");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
