//! Run driver: submits one job per ROM, routes retries, checkpoints
//! progress, and drains cleanly on interruption.

use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use crate::api::{ApiClient, ApiError, ErrorClass};
use crate::config::WorkerBounds;
use crate::gamelist::{GameEntry, GameList, GAMELIST_FILE};
use crate::models::{RomFile, ScrapeAction, WorkItem};
use crate::roms;
use crate::scraper::checkpoint::CheckpointStore;
use crate::scraper::events::ScrapeEvent;
use crate::scraper::rate_limiter::RateLimiter;
use crate::scraper::work_queue::{FailedItem, RetryDecision, WorkQueue};
use crate::scraper::worker_pool::WorkerPool;

/// Options for one scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub system: String,
    pub rom_dir: PathBuf,
    pub output_dir: PathBuf,
    /// ROM file extensions for this system.
    pub extensions: Vec<String>,
    pub action: ScrapeAction,
    /// Media kinds to download when the action wants media.
    pub media_kinds: Vec<String>,
    /// Cap on how many ROMs to process this run.
    pub limit: Option<usize>,
    /// Discard any prior checkpoint and start over.
    pub fresh: bool,
    pub worker_bounds: WorkerBounds,
}

/// Final report for a run.
#[derive(Debug)]
pub struct ScrapeSummary {
    pub total: u64,
    pub skipped: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub interrupted: bool,
    pub failed_items: Vec<FailedItem>,
}

/// Shared context cloned into every job.
struct JobContext {
    api: Arc<ApiClient>,
    queue: Arc<WorkQueue>,
    checkpoint: Arc<CheckpointStore>,
    pool: Arc<WorkerPool>,
    gamelist: Arc<Mutex<GameList>>,
    events: mpsc::UnboundedSender<ScrapeEvent>,
    retry_tx: mpsc::UnboundedSender<RomFile>,
    outstanding: Arc<AtomicU64>,
    all_done: Arc<Notify>,
    fatal: Arc<Mutex<Option<String>>>,
    system: String,
    output_dir: PathBuf,
    action: ScrapeAction,
    media_kinds: Vec<String>,
}

/// Drives a full scrape run against explicitly passed components; no
/// ambient global state.
pub struct Orchestrator {
    api: Arc<ApiClient>,
    rate_limiter: Arc<RateLimiter>,
    pool: Arc<WorkerPool>,
    queue: Arc<WorkQueue>,
    checkpoint: Arc<CheckpointStore>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<ApiClient>,
        rate_limiter: Arc<RateLimiter>,
        pool: Arc<WorkerPool>,
        queue: Arc<WorkQueue>,
        checkpoint: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            api,
            rate_limiter,
            pool,
            queue,
            checkpoint,
        }
    }

    /// Run a scrape to completion, drain, or fatal abort.
    pub async fn run(
        &self,
        opts: ScrapeOptions,
        events: mpsc::UnboundedSender<ScrapeEvent>,
    ) -> anyhow::Result<ScrapeSummary> {
        // Scan and figure out what is left to do.
        let all_roms = roms::scan_directory(&opts.rom_dir, &opts.extensions)?;
        let total_found = all_roms.len();

        if opts.fresh {
            self.checkpoint.remove()?;
        } else {
            self.checkpoint.resume();
        }

        let mut limited: Vec<RomFile> = all_roms;
        if let Some(limit) = opts.limit {
            limited.truncate(limit);
        }
        let (pending, skipped): (Vec<RomFile>, Vec<RomFile>) = limited
            .into_iter()
            .partition(|rom| !self.checkpoint.is_processed(&rom.filename));

        self.checkpoint
            .set_totals(total_found as u64, skipped.len() as u64);
        let _ = events.send(ScrapeEvent::RunStarted {
            total: pending.len(),
            skipped: skipped.len(),
        });
        info!(
            "System {}: {} ROM(s) found, {} pending, {} already done",
            opts.system,
            total_found,
            pending.len(),
            skipped.len()
        );

        if pending.is_empty() {
            return self.finish(false).await;
        }

        // Authenticate, then size the worker pool and connection pool from
        // the account's thread allowance. This is the only resize, and it
        // happens before any job is dispatched.
        let user = match self.api.authenticate().await {
            Ok(user) => user,
            Err(e) => {
                self.checkpoint.save(true)?;
                return Err(e.into());
            }
        };
        self.rate_limiter
            .update_concurrency_limit(user.max_threads as usize);
        let workers = self
            .pool
            .initialize_pools(user.max_threads as usize, opts.worker_bounds)?;
        self.api.connection_pool().resize(workers)?;
        self.checkpoint.set_quota(self.rate_limiter.get_quota_stats());
        let _ = events.send(ScrapeEvent::Authenticated {
            username: user.username.clone(),
            workers,
            quota: self.rate_limiter.get_quota_stats(),
        });

        // Surface backoff transitions to the UI. The guard clears the
        // observer on every exit path, fatal bails included; the callback
        // holds an event sender, and a leaked one would keep the channel
        // open after the run is gone.
        {
            let events = events.clone();
            self.rate_limiter
                .set_backoff_observer(Box::new(move |endpoint, entering| {
                    let _ = events.send(ScrapeEvent::Backoff { endpoint, entering });
                }));
        }
        let _observer = ObserverGuard(&self.rate_limiter);

        let gamelist = Arc::new(Mutex::new(GameList::load(
            &opts.output_dir.join(GAMELIST_FILE),
        )?));

        // Seed the dispatch queue. Jobs send retries back through the same
        // channel; the run is over when every item reached a terminal state
        // or a stop cut dispatch short.
        let (retry_tx, mut work_rx) = mpsc::unbounded_channel::<RomFile>();
        let outstanding = Arc::new(AtomicU64::new(pending.len() as u64));
        let all_done = Arc::new(Notify::new());
        let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        for rom in &pending {
            self.queue.submit(WorkItem::new(rom, opts.action));
            let _ = retry_tx.send(rom.clone());
        }

        let ctx = Arc::new(JobContext {
            api: self.api.clone(),
            queue: self.queue.clone(),
            checkpoint: self.checkpoint.clone(),
            pool: self.pool.clone(),
            gamelist: gamelist.clone(),
            events: events.clone(),
            retry_tx,
            outstanding: outstanding.clone(),
            all_done: all_done.clone(),
            fatal: fatal.clone(),
            system: opts.system.clone(),
            output_dir: opts.output_dir.clone(),
            action: opts.action,
            media_kinds: opts.media_kinds.clone(),
        });

        loop {
            if outstanding.load(Ordering::SeqCst) == 0 {
                break;
            }
            // Register before re-checking so a final completion between the
            // check and the await is not missed.
            let mut done = pin!(all_done.notified());
            done.as_mut().enable();
            if outstanding.load(Ordering::SeqCst) == 0 {
                break;
            }

            tokio::select! {
                maybe = work_rx.recv() => {
                    let Some(rom) = maybe else { break };
                    let job_ctx = ctx.clone();
                    let dispatched = self
                        .pool
                        .dispatch(async move { run_job(rom, job_ctx).await })
                        .await?;
                    if !dispatched {
                        let _ = events.send(ScrapeEvent::Interrupted);
                        break;
                    }
                }
                _ = &mut done => break,
            }
        }

        // Drain: in-flight jobs always run to completion.
        self.pool.shutdown(true).await;

        // Persist what the run produced.
        {
            let list = gamelist.lock().unwrap_or_else(|e| e.into_inner());
            list.save(&opts.output_dir.join(GAMELIST_FILE))?;
        }
        self.checkpoint.set_quota(self.rate_limiter.get_quota_stats());

        if let Some(reason) = fatal.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.checkpoint.save(true)?;
            self.rate_limiter.reset().await;
            error!("Run aborted: {}", reason);
            anyhow::bail!("fatal error: {reason}");
        }

        let interrupted = self.queue.get_stats().pending > 0;
        self.finish(interrupted).await
    }

    async fn finish(&self, interrupted: bool) -> anyhow::Result<ScrapeSummary> {
        self.checkpoint.save(true)?;
        if interrupted {
            warn!("Run interrupted; checkpoint kept for resume");
        } else {
            // Nothing pending: the checkpoint has served its purpose.
            self.checkpoint.remove()?;
        }

        // A restarted run must not inherit stale backoff.
        self.rate_limiter.reset().await;

        let snapshot = self.checkpoint.snapshot();
        Ok(ScrapeSummary {
            total: snapshot.stats.total_roms,
            skipped: snapshot.stats.skipped,
            processed: snapshot.stats.processed,
            successful: snapshot.stats.successful,
            failed: snapshot.stats.failed,
            interrupted,
            failed_items: self.queue.get_failed_items(),
        })
    }
}

/// One job: scrape a single ROM, then report the outcome to the tracker,
/// the checkpoint, and the retry channel.
async fn run_job(rom: RomFile, ctx: Arc<JobContext>) {
    let filename = rom.filename.clone();
    ctx.queue.mark_in_flight(&filename);
    let _ = ctx.events.send(ScrapeEvent::Started {
        filename: filename.clone(),
    });

    match scrape_rom(&rom, &ctx).await {
        Ok(game) => {
            ctx.queue.mark_succeeded(&filename);
            ctx.checkpoint.record_item(&filename, ctx.action, true, None);
            if let Err(e) = ctx.checkpoint.save(false) {
                warn!("Checkpoint save failed: {}", e);
            }
            let _ = ctx.events.send(ScrapeEvent::Completed { filename, game });
            finish_terminal(&ctx);
        }
        Err(err) => match err.class() {
            ErrorClass::Fatal => {
                let mut fatal = ctx.fatal.lock().unwrap_or_else(|e| e.into_inner());
                fatal.get_or_insert_with(|| err.to_string());
                drop(fatal);
                ctx.pool.stop_workers();
                let _ = ctx.events.send(ScrapeEvent::Fatal {
                    error: err.to_string(),
                });
                finish_terminal(&ctx);
            }
            class => {
                let message = err.to_string();
                match ctx.queue.mark_failed(&filename, &message, class) {
                    RetryDecision::Retry => {
                        let attempt = ctx
                            .queue
                            .item(&filename)
                            .map(|item| item.retry_count)
                            .unwrap_or(0);
                        let _ = ctx.events.send(ScrapeEvent::Retrying {
                            filename,
                            attempt,
                            error: message,
                        });
                        // Still outstanding: back into the dispatch queue.
                        let _ = ctx.retry_tx.send(rom);
                    }
                    RetryDecision::Exhausted => {
                        ctx.checkpoint
                            .record_item(&filename, ctx.action, false, Some(&message));
                        if let Err(e) = ctx.checkpoint.save(false) {
                            warn!("Checkpoint save failed: {}", e);
                        }
                        let _ = ctx.events.send(ScrapeEvent::Failed {
                            filename,
                            error: message,
                        });
                        finish_terminal(&ctx);
                    }
                }
            }
        },
    }
}

/// Clears the limiter's backoff observer when a run ends, however it ends.
struct ObserverGuard<'a>(&'a RateLimiter);

impl Drop for ObserverGuard<'_> {
    fn drop(&mut self) {
        self.0.clear_backoff_observer();
    }
}

fn finish_terminal(ctx: &JobContext) {
    if ctx.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
        ctx.all_done.notify_waiters();
    }
}

/// Fetch metadata and media for one ROM and fold the result into the
/// shared gamelist.
async fn scrape_rom(rom: &RomFile, ctx: &JobContext) -> Result<String, ApiError> {
    // Hash lookup first; fall back to a name search when the hash is
    // unknown to the API.
    let meta = match ctx.api.game_info(rom, &ctx.system).await {
        Ok(meta) => meta,
        Err(ApiError::NotFound(_)) => {
            let name = rom.search_name();
            ctx.api.search(&name, &ctx.system).await?
        }
        Err(e) => return Err(e),
    };

    let rel_path = format!("./{}", rom.filename);
    let mut entry = {
        let list = ctx.gamelist.lock().unwrap_or_else(|e| e.into_inner());
        list.entry_for(&rel_path).cloned()
    }
    .unwrap_or_else(|| GameEntry::from_metadata(&rom.filename, &meta));

    if ctx.action.wants_metadata() {
        // Refresh metadata but keep media paths from earlier runs.
        let (image, video, marquee) = (entry.image, entry.video, entry.marquee);
        entry = GameEntry::from_metadata(&rom.filename, &meta);
        entry.image = image;
        entry.video = video;
        entry.marquee = marquee;
    }

    if ctx.action.wants_media() {
        for kind in &ctx.media_kinds {
            let Some(asset) = meta.media_of_kind(kind) else {
                continue;
            };
            let file = format!("{}.{}", rom.stem(), asset.format);
            let dest = ctx.output_dir.join("media").join(kind).join(&file);
            ctx.api.download_media(asset, &dest).await?;

            let rel = format!("./media/{kind}/{file}");
            match kind.as_str() {
                "image" => entry.image = Some(rel),
                "video" => entry.video = Some(rel),
                "marquee" => entry.marquee = Some(rel),
                _ => {}
            }
        }
    }

    let name = entry.name.clone();
    ctx.gamelist
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .upsert(entry);
    Ok(name)
}
