use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub mod spotify;

pub use spotify::{
    CreatedPlaylist, NewPlaylist, Paging, PlaylistItem, PlaylistSummary, Profile, TimeRange,
    Track, UserRef,
};

/// Opaque, stable identifier of a registered user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Remote playlist identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub String);

impl Display for PlaylistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlaylistId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlaylistId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Track reference (e.g. "spotify:track:4uLU6hMCjMI75M1A2tKUQC")
///
/// Equality is exact string equality; two URIs pointing at the same recording are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackUri(pub String);

impl TrackUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TrackUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrackUri {
    fn from(uri: &str) -> Self {
        Self(uri.to_string())
    }
}

impl From<String> for TrackUri {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

/// Bearer token for catalog calls made on behalf of a user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens end up in log fields through Debug on containing structs
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// The two playlists managed for a provisioned user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPlaylists {
    /// "My Top Tracks": mirror of the user's own listening
    pub individual: PlaylistId,
    /// "Friend Favorites": aggregate of followed users' contributions
    pub group: PlaylistId,
}

/// A user known to the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Which of the two managed playlists is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistKind {
    Individual,
    Group,
}

impl PlaylistKind {
    /// Display name used when the playlist is created
    pub fn title(&self) -> &'static str {
        match self {
            PlaylistKind::Individual => "My Top Tracks",
            PlaylistKind::Group => "Friend Favorites",
        }
    }

    /// Visibility and collaboration settings for a newly created playlist
    pub fn new_playlist(&self) -> NewPlaylist {
        match self {
            PlaylistKind::Individual => NewPlaylist {
                name: self.title().to_string(),
                description: String::new(),
                public: true,
                collaborative: false,
            },
            PlaylistKind::Group => NewPlaylist {
                name: self.title().to_string(),
                description: String::new(),
                public: false,
                collaborative: true,
            },
        }
    }

    /// Whether the owner follows this playlist publicly
    pub fn followed_publicly(&self) -> bool {
        matches!(self, PlaylistKind::Individual)
    }
}

/// Result of deleting a user and everything registered for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub success: bool,
    pub message: String,
}
