//! Wire types for the remote game-metadata API.

use serde::{Deserialize, Serialize};

/// Account details returned by the `user_info` endpoint at authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub username: String,
    /// How many concurrent requests the account may keep in flight.
    pub max_threads: u32,
    /// Daily quota consumed so far.
    pub requests_today: u64,
    /// Daily quota ceiling.
    pub max_requests_per_day: u64,
}

/// Response wrapper for a metadata lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct GameInfoResponse {
    pub game: GameMetadata,
}

/// Response wrapper for a name search.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<GameMetadata>,
}

/// Metadata for one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Release date, ISO "YYYY-MM-DD" where known.
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    /// Player count, e.g. "1-2".
    #[serde(default)]
    pub players: Option<String>,
    /// Community rating, 0.0 to 1.0.
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub media: Vec<MediaAsset>,
}

impl GameMetadata {
    /// The asset of a given kind, if the API returned one.
    pub fn media_of_kind(&self, kind: &str) -> Option<&MediaAsset> {
        self.media.iter().find(|asset| asset.kind == kind)
    }
}

/// One downloadable media asset attached to a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Asset category: `image`, `video`, `marquee`.
    pub kind: String,
    pub url: String,
    /// File extension, e.g. `png`, `mp4`.
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_info_deserializes_with_missing_fields() {
        let json = r#"{
            "game": {
                "name": "Super Game",
                "rating": 0.85,
                "media": [
                    {"kind": "image", "url": "https://cdn.example/sg.png", "format": "png"}
                ]
            }
        }"#;
        let parsed: GameInfoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.game.name, "Super Game");
        assert!(parsed.game.description.is_none());
        assert_eq!(parsed.game.rating, Some(0.85));
        assert!(parsed.game.media_of_kind("image").is_some());
        assert!(parsed.game.media_of_kind("video").is_none());
    }

    #[test]
    fn test_empty_search_results() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }
}
