//! Initialize command.

use std::path::Path;

use console::style;

use crate::config::{DEFAULT_CONFIG, ENV_PASSWORD, ENV_USERNAME};

/// Write a starter config file to the working directory.
pub fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = Path::new("romharvest.toml");

    if path.exists() && !force {
        println!(
            "{} {} already exists (use --force to overwrite)",
            style("!").yellow(),
            path.display()
        );
        return Ok(());
    }

    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("{} Wrote {}", style("✓").green(), path.display());
    println!("  Fill in [api] credentials, or set {ENV_USERNAME} and {ENV_PASSWORD}");
    println!("  Then: romh scrape <system>");

    Ok(())
}
