//! Core work-item and ROM models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a scrape job should fetch for a ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeAction {
    /// Metadata plus media.
    Full,
    /// Metadata only, no media downloads.
    MetadataOnly,
    /// Media only, for collections that already have metadata.
    MediaOnly,
}

impl ScrapeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MetadataOnly => "metadata_only",
            Self::MediaOnly => "media_only",
        }
    }

    pub fn wants_metadata(&self) -> bool {
        !matches!(self, Self::MediaOnly)
    }

    pub fn wants_media(&self) -> bool {
        !matches!(self, Self::MetadataOnly)
    }
}

/// Lifecycle of a work item. Transitions are driven by the work queue only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    InFlight,
    Succeeded,
    Retrying,
    Exhausted,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Retrying => "retrying",
            Self::Exhausted => "exhausted",
        }
    }

    /// Whether this status is final for the item.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

/// One unit of per-ROM scraping work.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// ROM filename, the item's identity within a run.
    pub filename: String,
    pub path: PathBuf,
    pub action: ScrapeAction,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub status: WorkStatus,
}

impl WorkItem {
    pub fn new(rom: &RomFile, action: ScrapeAction) -> Self {
        Self {
            filename: rom.filename.clone(),
            path: rom.path.clone(),
            action,
            retry_count: 0,
            last_error: None,
            status: WorkStatus::Pending,
        }
    }
}

/// A scanned ROM file.
#[derive(Debug, Clone)]
pub struct RomFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    /// SHA-256 of the file content, hex-encoded.
    pub sha256: String,
}

impl RomFile {
    /// The filename without its extension, used for display and media naming.
    pub fn stem(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.filename)
    }

    /// A lookup name for search fallback: the stem with common ROM-set
    /// annotations like "(USA)" or "[!]" removed.
    pub fn search_name(&self) -> String {
        let mut name = String::with_capacity(self.filename.len());
        let mut depth = 0u32;
        for c in self.stem().chars() {
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if depth == 0 => name.push(c),
                _ => {}
            }
        }
        name.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom(filename: &str) -> RomFile {
        RomFile {
            path: PathBuf::from(filename),
            filename: filename.to_string(),
            size: 1024,
            sha256: "00".repeat(32),
        }
    }

    #[test]
    fn test_stem() {
        assert_eq!(rom("Super Game (USA).sfc").stem(), "Super Game (USA)");
        assert_eq!(rom("noext").stem(), "noext");
    }

    #[test]
    fn test_search_name_strips_annotations() {
        assert_eq!(
            rom("Super Game (USA) [!].sfc").search_name(),
            "Super Game"
        );
        assert_eq!(rom("Plain Title.md").search_name(), "Plain Title");
    }

    #[test]
    fn test_action_wants() {
        assert!(ScrapeAction::Full.wants_metadata());
        assert!(ScrapeAction::Full.wants_media());
        assert!(!ScrapeAction::MetadataOnly.wants_media());
        assert!(!ScrapeAction::MediaOnly.wants_metadata());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkStatus::Succeeded.is_terminal());
        assert!(WorkStatus::Exhausted.is_terminal());
        assert!(!WorkStatus::Retrying.is_terminal());
        assert!(!WorkStatus::InFlight.is_terminal());
    }
}
