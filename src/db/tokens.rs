use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::{error::AppResult, models::UserId};

/// Stored OAuth credentials of a user
#[derive(Debug, Clone, FromRow)]
pub struct StoredCredentials {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token was last written
    pub updated_at: DateTime<Utc>,
}

pub async fn fetch_credentials(
    db_pool: &PgPool,
    user_id: &UserId,
) -> AppResult<Option<StoredCredentials>> {
    let credentials = sqlx::query_as(
        "SELECT access_token, refresh_token, updated_at FROM spotify_tokens WHERE user_id = $1",
    )
    .bind(&user_id.0)
    .fetch_optional(db_pool)
    .await?;

    Ok(credentials)
}

/// Persists a refreshed access token, rotating the refresh token when one was issued
pub async fn update_access_token(
    db_pool: &PgPool,
    user_id: &UserId,
    access_token: &str,
    refresh_token: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE spotify_tokens
        SET access_token = $2,
            refresh_token = COALESCE($3, refresh_token),
            updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(&user_id.0)
    .bind(access_token)
    .bind(refresh_token)
    .execute(db_pool)
    .await?;

    Ok(())
}
