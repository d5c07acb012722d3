//! Status command.

use std::path::PathBuf;

use console::style;

use crate::config::Settings;
use crate::scraper::checkpoint::CheckpointStore;

use super::{resolve_output_dir, system_settings};

/// Show checkpoint progress for a system, if a run was interrupted.
pub fn cmd_status(
    settings: &Settings,
    system: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let sys = system_settings(settings, system)?;
    let rom_dir = sys
        .resolved_rom_dir()
        .unwrap_or_else(|| PathBuf::from("."));
    let output_dir = resolve_output_dir(output, sys, &rom_dir);

    let store = CheckpointStore::new(&output_dir, system, settings.scrape.checkpoint_interval);
    let Some(checkpoint) = store.load() else {
        println!(
            "{} No checkpoint for {} in {} (nothing to resume)",
            style("·").dim(),
            system,
            output_dir.display()
        );
        return Ok(());
    };

    let stats = checkpoint.stats;
    println!("{} Checkpoint for {}", style("✓").green(), checkpoint.system);
    println!("  Saved:     {}", checkpoint.timestamp.to_rfc3339());
    println!("  Found:     {} ROM(s)", stats.total_roms);
    println!(
        "  Processed: {} ({} succeeded, {} failed, {} skipped)",
        stats.processed, stats.successful, stats.failed, stats.skipped
    );
    println!(
        "  Quota:     {}/{}",
        checkpoint.api_quota.used, checkpoint.api_quota.limit
    );

    if !checkpoint.failed_roms.is_empty() {
        println!("  Failed ROMs:");
        for rom in &checkpoint.failed_roms {
            println!("    {} {}: {}", style("✗").red(), rom.filename, rom.reason);
        }
    }

    println!("  Resume with: romh scrape {system}");
    Ok(())
}
