/// Remote music catalog abstraction
///
/// The reconciliation engine only talks to the catalog through this trait. The production
/// implementation is the Spotify Web API client; tests substitute in-memory catalogs.
use crate::{
    error::AppResult,
    models::{
        AccessToken, CreatedPlaylist, NewPlaylist, PlaylistId, PlaylistItem, PlaylistSummary,
        Profile, TimeRange, Track, TrackUri,
    },
};

pub mod spotify;

pub use spotify::SpotifyCatalog;

/// Maximum number of track URIs accepted by a single add/remove call
pub const MAX_TRACKS_PER_REQUEST: usize = 100;

/// Operations against the remote catalog, always on behalf of the token's owner
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MusicCatalog: Send + Sync {
    /// Profile of the token's owner
    async fn current_profile(&self, token: &AccessToken) -> AppResult<Profile>;

    /// Create a playlist owned by `owner_id`
    async fn create_playlist(
        &self,
        token: &AccessToken,
        owner_id: &str,
        playlist: &NewPlaylist,
    ) -> AppResult<CreatedPlaylist>;

    /// All entries of a playlist in stored order (follows pagination)
    async fn playlist_items(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<Vec<PlaylistItem>>;

    /// Add at most [`MAX_TRACKS_PER_REQUEST`] tracks, appended when `position` is `None`
    async fn add_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        uris: &[TrackUri],
        position: Option<usize>,
    ) -> AppResult<()>;

    /// Remove every occurrence of at most [`MAX_TRACKS_PER_REQUEST`] tracks
    async fn remove_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        uris: &[TrackUri],
    ) -> AppResult<()>;

    async fn follow_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        public: bool,
    ) -> AppResult<()>;

    /// Stop following a playlist; for the owner this deletes it from their library
    async fn unfollow_playlist(&self, token: &AccessToken, playlist_id: &PlaylistId)
        -> AppResult<()>;

    /// Whether the token's owner follows the playlist
    async fn is_following_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<bool>;

    async fn top_tracks(
        &self,
        token: &AccessToken,
        time_range: TimeRange,
        limit: usize,
    ) -> AppResult<Vec<Track>>;

    /// Playlists owned or followed by the given account (follows pagination)
    async fn user_playlists(
        &self,
        token: &AccessToken,
        account_id: &str,
    ) -> AppResult<Vec<PlaylistSummary>>;
}
