//! Scrape command: wires the API client, rate limiter, worker pool, work
//! queue, and checkpoint store together and renders run progress.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::config::Settings;
use crate::models::ScrapeAction;
use crate::scraper::{
    CheckpointStore, Orchestrator, RateLimiter, ScrapeEvent, ScrapeOptions, ScrapeSummary,
    WorkQueue, WorkerPool,
};

use super::{resolve_output_dir, system_settings, truncate};

#[allow(clippy::too_many_arguments)]
pub async fn cmd_scrape(
    settings: &Settings,
    system: &str,
    rom_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    workers: Option<usize>,
    no_media: bool,
    media_only: bool,
    limit: Option<usize>,
    fresh: bool,
) -> anyhow::Result<()> {
    let sys = system_settings(settings, system)?;
    let rom_dir = rom_dir
        .or_else(|| sys.resolved_rom_dir())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no ROM directory for {system}: pass --rom-dir or set systems.{system}.rom_dir"
            )
        })?;
    let output_dir = resolve_output_dir(output, sys, &rom_dir);

    // --workers lowers the clamp ceiling; the API-reported allowance is
    // still the other half of the equation.
    let mut worker_bounds = settings.scrape.workers;
    if let Some(n) = workers {
        let n = n.max(1);
        worker_bounds.max = n;
        worker_bounds.min = worker_bounds.min.min(n);
    }

    let action = if media_only {
        ScrapeAction::MediaOnly
    } else if no_media {
        ScrapeAction::MetadataOnly
    } else {
        ScrapeAction::Full
    };

    let rate_limiter = Arc::new(RateLimiter::with_config(settings.rate_limit_config()));
    let api = Arc::new(ApiClient::new(&settings.api, rate_limiter.clone())?);
    let pool = Arc::new(WorkerPool::new());
    let queue = Arc::new(WorkQueue::new(settings.scrape.max_retries));
    let checkpoint = Arc::new(CheckpointStore::new(
        &output_dir,
        system,
        settings.scrape.checkpoint_interval,
    ));

    // Ctrl-C drains in-flight jobs instead of killing them mid-request.
    {
        let pool = pool.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "\n{} Interrupt received; finishing in-flight jobs (Ctrl-C again to kill)",
                    style("!").yellow()
                );
                pool.stop_workers();
            }
        });
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let ui = tokio::spawn(render_events(event_rx));

    let orchestrator = Orchestrator::new(api, rate_limiter, pool, queue, checkpoint);
    let opts = ScrapeOptions {
        system: system.to_string(),
        rom_dir,
        output_dir,
        extensions: sys.extensions.clone(),
        action,
        media_kinds: settings.scrape.media.clone(),
        limit,
        fresh,
        worker_bounds,
    };
    let result = orchestrator.run(opts, event_tx).await;

    // All event senders are gone once the run returns, so the renderer
    // drains and exits.
    let _ = ui.await;

    print_summary(&result?);
    Ok(())
}

/// Render scrape events as an indicatif progress bar.
async fn render_events(mut rx: mpsc::UnboundedReceiver<ScrapeEvent>) {
    let pb = indicatif::ProgressBar::new(0);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    while let Some(event) = rx.recv().await {
        match event {
            ScrapeEvent::RunStarted { total, skipped } => {
                pb.set_length(total as u64);
                if skipped > 0 {
                    pb.println(format!(
                        "  {} {} ROM(s) already done, skipping",
                        style("·").dim(),
                        skipped
                    ));
                }
            }
            ScrapeEvent::Authenticated {
                username,
                workers,
                quota,
            } => {
                pb.println(format!(
                    "  {} Authenticated as {} ({} worker(s), quota {}/{})",
                    style("✓").green(),
                    username,
                    workers,
                    quota.used,
                    quota.limit
                ));
            }
            ScrapeEvent::Started { filename } => {
                pb.set_message(truncate(&filename, 40));
            }
            ScrapeEvent::Completed { filename, game } => {
                pb.inc(1);
                pb.println(format!("  {} {} → {}", style("✓").green(), filename, game));
            }
            ScrapeEvent::Retrying {
                filename,
                attempt,
                error,
            } => {
                pb.println(format!(
                    "  {} Retry {} for {}: {}",
                    style("↻").yellow(),
                    attempt,
                    filename,
                    error
                ));
            }
            ScrapeEvent::Failed { filename, error } => {
                pb.inc(1);
                pb.println(format!("  {} {}: {}", style("✗").red(), filename, error));
            }
            ScrapeEvent::Backoff { endpoint, entering } => {
                if entering {
                    pb.println(format!(
                        "  {} Rate limited on {}; backing off",
                        style("!").yellow(),
                        endpoint
                    ));
                } else {
                    pb.println(format!(
                        "  {} Backoff cleared on {}",
                        style("·").dim(),
                        endpoint
                    ));
                }
            }
            ScrapeEvent::Fatal { error } => {
                pb.println(format!("  {} Fatal: {}", style("✗").red().bold(), error));
            }
            ScrapeEvent::Interrupted => {
                pb.println(format!(
                    "  {} Stopping; in-flight jobs are finishing",
                    style("!").yellow()
                ));
            }
        }
    }

    pb.finish_and_clear();
}

fn print_summary(summary: &ScrapeSummary) {
    println!();
    if summary.interrupted {
        println!(
            "{} Run interrupted; re-run the same command to resume",
            style("!").yellow()
        );
    }
    println!(
        "{} {} processed: {} succeeded, {} failed ({} skipped of {} found)",
        if summary.failed == 0 {
            style("✓").green()
        } else {
            style("!").yellow()
        },
        summary.processed,
        summary.successful,
        summary.failed,
        summary.skipped,
        summary.total
    );

    if !summary.failed_items.is_empty() {
        println!("  Failed after retries:");
        for item in &summary.failed_items {
            println!(
                "    {} {} ({} retries): {}",
                style("✗").red(),
                item.filename,
                item.retry_count,
                item.error
            );
        }
    }
}
