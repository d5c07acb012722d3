//! CLI parser and command dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "romh")]
#[command(about = "ROM metadata and media scraping for EmulationStation gamelists")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse the command line. Split from `run` so `main` can initialize
    /// logging from the parsed verbosity before dispatching.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file to the working directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Scrape metadata and media for a system's ROMs
    Scrape {
        /// System name from the config (e.g. "snes")
        system: String,

        /// ROM directory (overrides the system's configured default)
        #[arg(long)]
        rom_dir: Option<PathBuf>,

        /// Output directory for gamelist.xml and media (defaults to the ROM directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Cap worker concurrency (lowers the configured maximum)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Refresh metadata only, skip media downloads
        #[arg(long, conflicts_with = "media_only")]
        no_media: bool,

        /// Download media only, keep existing metadata
        #[arg(long)]
        media_only: bool,

        /// Process at most this many ROMs
        #[arg(short, long)]
        limit: Option<usize>,

        /// Discard any existing checkpoint and start over
        #[arg(long)]
        fresh: bool,
    },

    /// Authenticate and show the account's quota and thread allowance
    Quota,

    /// Show checkpoint progress for a system
    Status {
        /// System name from the config
        system: String,

        /// Output directory holding the checkpoint (defaults from the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    // `init` must work before any config exists.
    if let Commands::Init { force } = cli.command {
        return commands::init::cmd_init(force);
    }

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Scrape {
            system,
            rom_dir,
            output,
            workers,
            no_media,
            media_only,
            limit,
            fresh,
        } => {
            commands::scrape::cmd_scrape(
                &settings,
                &system,
                rom_dir,
                output,
                workers,
                no_media,
                media_only,
                limit,
                fresh,
            )
            .await
        }
        Commands::Quota => commands::quota::cmd_quota(&settings).await,
        Commands::Status { system, output } => {
            commands::status::cmd_status(&settings, &system, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flag_parses_globally() {
        let cli = Cli::try_parse_from(["romh", "-v", "quota"]).unwrap();
        assert!(cli.verbose);

        let cli = Cli::try_parse_from(["romh", "scrape", "snes", "--verbose"]).unwrap();
        assert!(cli.verbose);

        let cli = Cli::try_parse_from(["romh", "quota"]).unwrap();
        assert!(!cli.verbose);
    }

    #[test]
    fn test_scrape_args_parse() {
        let cli = Cli::try_parse_from([
            "romh", "scrape", "snes", "--workers", "4", "--no-media", "--limit", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Scrape {
                system,
                workers,
                no_media,
                media_only,
                limit,
                ..
            } => {
                assert_eq!(system, "snes");
                assert_eq!(workers, Some(4));
                assert!(no_media);
                assert!(!media_only);
                assert_eq!(limit, Some(10));
            }
            _ => panic!("expected scrape"),
        }
    }

    #[test]
    fn test_media_flags_conflict() {
        assert!(Cli::try_parse_from(["romh", "scrape", "snes", "--no-media", "--media-only"])
            .is_err());
    }
}
