//! EmulationStation gamelist.xml reading and writing.
//!
//! An existing gamelist is loaded and merged rather than clobbered, so a
//! partial scrape keeps earlier entries. Writes go through a temp file and
//! rename, the same discipline as the checkpoint.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::GameMetadata;

/// Gamelist file name inside the output directory.
pub const GAMELIST_FILE: &str = "gamelist.xml";

/// One `<game>` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEntry {
    /// ROM path relative to the gamelist, e.g. `./Super Game (USA).sfc`.
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marquee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub releasedate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<String>,
}

impl GameEntry {
    /// Build an entry from API metadata for a ROM filename. Media paths are
    /// attached separately as downloads finish.
    pub fn from_metadata(filename: &str, meta: &GameMetadata) -> Self {
        Self {
            path: format!("./{filename}"),
            name: meta.name.clone(),
            desc: meta.description.clone(),
            image: None,
            video: None,
            marquee: None,
            rating: meta.rating,
            releasedate: meta.release_date.clone(),
            developer: meta.developer.clone(),
            publisher: meta.publisher.clone(),
            genre: meta.genre.clone(),
            players: meta.players.clone(),
        }
    }
}

/// The `<gameList>` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "gameList")]
pub struct GameList {
    #[serde(rename = "game", default)]
    pub games: Vec<GameEntry>,
}

impl GameList {
    /// Load a gamelist, treating a missing file as empty.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let list = quick_xml::de::from_str(&raw)?;
        Ok(list)
    }

    /// Insert or replace the entry for a ROM path.
    pub fn upsert(&mut self, entry: GameEntry) {
        match self.games.iter_mut().find(|g| g.path == entry.path) {
            Some(existing) => *existing = entry,
            None => self.games.push(entry),
        }
    }

    pub fn entry_for(&self, rom_path: &str) -> Option<&GameEntry> {
        self.games.iter().find(|g| g.path == rom_path)
    }

    /// Write the gamelist atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut sorted = self.clone();
        sorted.games.sort_by(|a, b| a.path.cmp(&b.path));

        let body = quick_xml::se::to_string(&sorted)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;

        debug!("Gamelist written to {} ({} games)", path.display(), sorted.games.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, name: &str) -> GameEntry {
        GameEntry {
            path: path.to_string(),
            name: name.to_string(),
            desc: None,
            image: None,
            video: None,
            marquee: None,
            rating: None,
            releasedate: None,
            developer: None,
            publisher: None,
            genre: None,
            players: None,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GAMELIST_FILE);

        let mut list = GameList::default();
        let mut game = entry("./Super Game (USA).sfc", "Super Game");
        game.desc = Some("A game with <angle brackets> & ampersands.".to_string());
        game.image = Some("./media/image/Super Game (USA).png".to_string());
        game.rating = Some(0.85);
        list.upsert(game);
        list.save(&path).unwrap();

        let loaded = GameList::load(&path).unwrap();
        assert_eq!(loaded, {
            let mut expected = list.clone();
            expected.games.sort_by(|a, b| a.path.cmp(&b.path));
            expected
        });
        assert_eq!(
            loaded.games[0].desc.as_deref(),
            Some("A game with <angle brackets> & ampersands.")
        );
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = GameList::load(&dir.path().join(GAMELIST_FILE)).unwrap();
        assert!(list.games.is_empty());
    }

    #[test]
    fn test_upsert_replaces_by_path() {
        let mut list = GameList::default();
        list.upsert(entry("./a.sfc", "Old Name"));
        list.upsert(entry("./b.sfc", "Other"));
        list.upsert(entry("./a.sfc", "New Name"));

        assert_eq!(list.games.len(), 2);
        assert_eq!(list.entry_for("./a.sfc").unwrap().name, "New Name");
    }

    #[test]
    fn test_merge_preserves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GAMELIST_FILE);

        let mut first = GameList::default();
        first.upsert(entry("./a.sfc", "A"));
        first.save(&path).unwrap();

        let mut second = GameList::load(&path).unwrap();
        second.upsert(entry("./b.sfc", "B"));
        second.save(&path).unwrap();

        let merged = GameList::load(&path).unwrap();
        assert_eq!(merged.games.len(), 2);
        assert!(merged.entry_for("./a.sfc").is_some());
        assert!(merged.entry_for("./b.sfc").is_some());
    }
}
