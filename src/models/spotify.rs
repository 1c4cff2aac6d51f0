// ============================================================================
// Spotify Web API Types
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PlaylistId, TrackUri};

/// Top-tracks time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    /// Roughly the last 4 weeks
    ShortTerm,
    /// Several years of history
    LongTerm,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

/// Offset-paginated listing envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}

/// GET /me
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub uri: TrackUri,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
}

/// Reference to the account that added a playlist entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
}

/// One entry of GET /playlists/{id}/tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Missing for very old playlists
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub added_by: Option<UserRef>,
    /// Null for tracks that are no longer available
    #[serde(default)]
    pub track: Option<Track>,
}

impl PlaylistItem {
    pub fn uri(&self) -> Option<&TrackUri> {
        self.track.as_ref().map(|t| &t.uri)
    }

    /// Whether the entry was added by the given account after `since`
    pub fn added_by_since(&self, account_id: &str, since: DateTime<Utc>) -> bool {
        let by_account = self
            .added_by
            .as_ref()
            .map(|u| u.id == account_id)
            .unwrap_or(false);
        let recent = self.added_at.map(|at| at > since).unwrap_or(false);
        by_account && recent
    }
}

/// Entry of GET /users/{id}/playlists
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaylistSummary {
    pub id: PlaylistId,
    #[serde(default)]
    pub name: String,
}

/// Body of POST /users/{id}/playlists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPlaylist {
    pub name: String,
    pub description: String,
    pub public: bool,
    pub collaborative: bool,
}

/// Response of POST /users/{id}/playlists
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedPlaylist {
    pub id: PlaylistId,
    #[serde(default)]
    pub name: String,
}
