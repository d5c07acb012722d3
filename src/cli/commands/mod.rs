//! Command implementations, one module per subcommand.

pub mod init;
pub mod quota;
pub mod scrape;
pub mod status;

use std::path::PathBuf;

use crate::config::{Settings, SystemSettings};

/// Look up a system from the config, with a helpful error naming the
/// known systems.
pub fn system_settings<'a>(
    settings: &'a Settings,
    system: &str,
) -> anyhow::Result<&'a SystemSettings> {
    settings.systems.get(system).ok_or_else(|| {
        let mut known: Vec<&str> = settings.systems.keys().map(String::as_str).collect();
        known.sort_unstable();
        anyhow::anyhow!(
            "unknown system {:?} (configured systems: {})",
            system,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        )
    })
}

/// Resolve the output directory: explicit flag, then the system's
/// configured default, then the ROM directory itself.
pub fn resolve_output_dir(
    flag: Option<PathBuf>,
    system: &SystemSettings,
    rom_dir: &std::path::Path,
) -> PathBuf {
    flag.or_else(|| system.resolved_output_dir())
        .unwrap_or_else(|| rom_dir.to_path_buf())
}

/// Shorten a filename for progress-bar messages.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
