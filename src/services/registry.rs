/// Social graph and playlist registry abstraction
///
/// Records which playlists belong to which user and the explicit follow edges between users.
/// The explicit edges are an index only: reconciliation derives the authoritative relation from
/// which individual playlists a user follows on the remote catalog.
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{DeletionOutcome, PlaylistId, RegisteredUser, TrackUri, UserId, UserPlaylists},
};

/// Owner of a registered individual playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistOwner {
    pub user_id: UserId,
    pub playlist_id: PlaylistId,
}

/// A track the service itself put into a user's individual playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTrack {
    pub uri: TrackUri,
    pub written_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaylistRegistry: Send + Sync {
    /// Every user with stored credentials, in a stable order
    async fn list_users(&self) -> AppResult<Vec<RegisteredUser>>;

    /// Email captured with the user's credentials
    async fn user_email(&self, user_id: &UserId) -> AppResult<Option<String>>;

    /// Both managed playlists, `None` unless both are registered
    async fn get_playlist_ids(&self, user_id: &UserId) -> AppResult<Option<UserPlaylists>>;

    /// Upserts the playlist record; `None` leaves an already stored id untouched
    async fn register_playlists(
        &self,
        user_id: &UserId,
        email: Option<String>,
        individual: Option<PlaylistId>,
        group: Option<PlaylistId>,
    ) -> AppResult<()>;

    /// Registered users whose individual playlist is one of `playlist_ids`
    async fn owners_of_individual_playlists(
        &self,
        playlist_ids: &[PlaylistId],
    ) -> AppResult<Vec<PlaylistOwner>>;

    /// Explicitly recorded followees of a user
    async fn followees(&self, follower: &UserId) -> AppResult<Vec<UserId>>;

    /// Idempotently records `follower -> followee`
    async fn record_follow_edge(&self, follower: &UserId, followee: &UserId) -> AppResult<()>;

    /// Upserts the write time of tracks inserted into the user's individual playlist
    async fn record_written_tracks(
        &self,
        user_id: &UserId,
        uris: &[TrackUri],
        written_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Tracks written into the user's individual playlist at or after `since`
    async fn written_tracks_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<WrittenTrack>>;

    /// Removes playlists, follow edges in both directions, written-track records and credentials
    /// of a user
    async fn delete_user_and_related_data(&self, user_id: &UserId) -> AppResult<DeletionOutcome>;
}
