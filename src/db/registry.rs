use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppResult,
    models::{DeletionOutcome, PlaylistId, RegisteredUser, TrackUri, UserId, UserPlaylists},
    services::registry::{PlaylistOwner, PlaylistRegistry, WrittenTrack},
};

/// PostgreSQL-backed playlist registry and follow graph
#[derive(Clone)]
pub struct PgRegistry {
    db_pool: PgPool,
}

#[derive(FromRow)]
struct PlaylistRow {
    individual_playlist: Option<String>,
    group_playlist: Option<String>,
}

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    email: Option<String>,
}

#[derive(FromRow)]
struct OwnerRow {
    user_id: String,
    individual_playlist: String,
}

#[derive(FromRow)]
struct WrittenTrackRow {
    track_uri: String,
    written_at: DateTime<Utc>,
}

impl PgRegistry {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    async fn delete_in_transaction(&self, user_id: &UserId) -> AppResult<()> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query("DELETE FROM spotify_playlists WHERE user_id = $1")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        tracing::info!(user_id = %user_id, "Deleted associated playlist records");

        sqlx::query("DELETE FROM spotify_follows WHERE follower_id = $1 OR following_id = $1")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        tracing::info!(user_id = %user_id, "Deleted associated follow records");

        sqlx::query("DELETE FROM spotify_written_tracks WHERE user_id = $1")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM spotify_tokens WHERE user_id = $1")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        tracing::info!(user_id = %user_id, "Deleted associated token records");

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PlaylistRegistry for PgRegistry {
    async fn list_users(&self) -> AppResult<Vec<RegisteredUser>> {
        let rows: Vec<UserRow> =
            sqlx::query_as("SELECT user_id, email FROM spotify_tokens ORDER BY user_id")
                .fetch_all(&self.db_pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| RegisteredUser {
                user_id: UserId(row.user_id),
                email: row.email,
            })
            .collect())
    }

    async fn user_email(&self, user_id: &UserId) -> AppResult<Option<String>> {
        let email: Option<Option<String>> =
            sqlx::query_scalar("SELECT email FROM spotify_tokens WHERE user_id = $1")
                .bind(&user_id.0)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(email.flatten())
    }

    async fn get_playlist_ids(&self, user_id: &UserId) -> AppResult<Option<UserPlaylists>> {
        let row: Option<PlaylistRow> = sqlx::query_as(
            "SELECT individual_playlist, group_playlist FROM spotify_playlists WHERE user_id = $1",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.and_then(|row| match (row.individual_playlist, row.group_playlist) {
            (Some(individual), Some(group)) => Some(UserPlaylists {
                individual: PlaylistId(individual),
                group: PlaylistId(group),
            }),
            _ => None,
        }))
    }

    async fn register_playlists(
        &self,
        user_id: &UserId,
        email: Option<String>,
        individual: Option<PlaylistId>,
        group: Option<PlaylistId>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO spotify_playlists (user_id, email, individual_playlist, group_playlist)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, spotify_playlists.email),
                individual_playlist = COALESCE(EXCLUDED.individual_playlist, spotify_playlists.individual_playlist),
                group_playlist = COALESCE(EXCLUDED.group_playlist, spotify_playlists.group_playlist)
            "#,
        )
        .bind(&user_id.0)
        .bind(email)
        .bind(individual.map(|id| id.0))
        .bind(group.map(|id| id.0))
        .execute(&self.db_pool)
        .await?;

        tracing::debug!(user_id = %user_id, "Playlists registered");
        Ok(())
    }

    async fn owners_of_individual_playlists(
        &self,
        playlist_ids: &[PlaylistId],
    ) -> AppResult<Vec<PlaylistOwner>> {
        if playlist_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = playlist_ids.iter().map(|id| id.0.clone()).collect();

        let rows: Vec<OwnerRow> = sqlx::query_as(
            r#"
            SELECT user_id, individual_playlist
            FROM spotify_playlists
            WHERE individual_playlist = ANY($1)
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PlaylistOwner {
                user_id: UserId(row.user_id),
                playlist_id: PlaylistId(row.individual_playlist),
            })
            .collect())
    }

    async fn followees(&self, follower: &UserId) -> AppResult<Vec<UserId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT following_id FROM spotify_follows WHERE follower_id = $1 ORDER BY created_at",
        )
        .bind(&follower.0)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn record_follow_edge(&self, follower: &UserId, followee: &UserId) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO spotify_follows (follower_id, following_id)
            VALUES ($1, $2)
            ON CONFLICT (follower_id, following_id) DO NOTHING
            "#,
        )
        .bind(&follower.0)
        .bind(&followee.0)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(follower = %follower, followee = %followee, "Follow edge recorded");
        Ok(())
    }

    async fn record_written_tracks(
        &self,
        user_id: &UserId,
        uris: &[TrackUri],
        written_at: DateTime<Utc>,
    ) -> AppResult<()> {
        if uris.is_empty() {
            return Ok(());
        }

        let uris: Vec<String> = uris.iter().map(|uri| uri.0.clone()).collect();

        sqlx::query(
            r#"
            INSERT INTO spotify_written_tracks (user_id, track_uri, written_at)
            SELECT $1, uri, $3 FROM UNNEST($2::text[]) AS uri
            ON CONFLICT (user_id, track_uri) DO UPDATE SET written_at = EXCLUDED.written_at
            "#,
        )
        .bind(&user_id.0)
        .bind(&uris[..])
        .bind(written_at)
        .execute(&self.db_pool)
        .await?;

        tracing::debug!(user_id = %user_id, count = uris.len(), "Written tracks recorded");
        Ok(())
    }

    async fn written_tracks_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<WrittenTrack>> {
        let rows: Vec<WrittenTrackRow> = sqlx::query_as(
            r#"
            SELECT track_uri, written_at
            FROM spotify_written_tracks
            WHERE user_id = $1 AND written_at >= $2
            "#,
        )
        .bind(&user_id.0)
        .bind(since)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WrittenTrack {
                uri: TrackUri(row.track_uri),
                written_at: row.written_at,
            })
            .collect())
    }

    async fn delete_user_and_related_data(&self, user_id: &UserId) -> AppResult<DeletionOutcome> {
        tracing::info!(user_id = %user_id, "Starting deletion process");

        match self.delete_in_transaction(user_id).await {
            Ok(()) => {
                tracing::info!(user_id = %user_id, "Successfully deleted user");
                Ok(DeletionOutcome {
                    success: true,
                    message: format!(
                        "User {} and all associated data successfully deleted",
                        user_id
                    ),
                })
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Error during user deletion");
                Ok(DeletionOutcome {
                    success: false,
                    message: e.to_string(),
                })
            }
        }
    }
}
