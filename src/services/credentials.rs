/// Access-token provisioning for catalog calls
///
/// Tokens are read from the credential store, checked against the profile endpoint and
/// refreshed through the OAuth refresh-token grant when Spotify rejects them. A token is cached
/// in Redis only for the part of its lifetime that is known to remain.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{
    cached,
    db::{tokens, Cache, CacheKey},
    error::{AppError, AppResult},
    models::{AccessToken, UserId},
    services::catalog::MusicCatalog,
};

/// Spotify access tokens live one hour
const TOKEN_LIFETIME_SECS: u64 = 3600;

/// Cached tokens are dropped this long before they expire
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 300;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token accepted by the catalog, refreshed transparently on expiry
    ///
    /// Fails with [`AppError::Auth`] when no valid token can be obtained.
    async fn get_valid_access_token(&self, user_id: &UserId) -> AppResult<AccessToken>;

    /// Drops any cached token of the user
    async fn forget(&self, user_id: &UserId) -> AppResult<()>;
}

/// Response of POST /api/token with `grant_type=refresh_token`
#[derive(Debug, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// A token together with how long it may stay cached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: AccessToken,
    pub cache_ttl: Option<u64>,
}

/// Seconds a token issued at `issued_at` and valid for `lifetime` may be cached at `now`
///
/// `None` when the token is too close to expiry, or already past it.
pub fn remaining_cache_ttl(
    issued_at: DateTime<Utc>,
    lifetime: u64,
    now: DateTime<Utc>,
) -> Option<u64> {
    let age = u64::try_from((now - issued_at).num_seconds()).unwrap_or(0);
    lifetime
        .checked_sub(age)?
        .checked_sub(TOKEN_EXPIRY_MARGIN_SECS)
        .filter(|ttl| *ttl > 0)
}

/// Client for the Spotify accounts service
#[derive(Clone)]
pub struct SpotifyAccounts {
    http_client: HttpClient,
    accounts_url: String,
    client_id: String,
    client_secret: String,
}

impl SpotifyAccounts {
    pub fn new(accounts_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            accounts_url: accounts_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }

    /// Exchanges a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<RefreshedToken> {
        let response = self
            .http_client
            .post(format!("{}/api/token", self.accounts_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Token refresh returned status {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}

/// Token provider backed by the credential table and the Redis cache
pub struct CredentialService {
    db_pool: PgPool,
    cache: Cache,
    catalog: Arc<dyn MusicCatalog>,
    accounts: SpotifyAccounts,
}

impl CredentialService {
    pub fn new(
        db_pool: PgPool,
        cache: Cache,
        catalog: Arc<dyn MusicCatalog>,
        accounts: SpotifyAccounts,
    ) -> Self {
        Self {
            db_pool,
            cache,
            catalog,
            accounts,
        }
    }

    async fn load_valid_token(&self, user_id: &UserId) -> AppResult<IssuedToken> {
        let stored = tokens::fetch_credentials(&self.db_pool, user_id)
            .await?
            .ok_or_else(|| AppError::Auth(format!("No stored credentials for user {}", user_id)))?;

        let token = AccessToken(stored.access_token);

        match self.catalog.current_profile(&token).await {
            Ok(_) => {
                // Tokens written elsewhere may not bump updated_at; those are not cached
                let cache_ttl =
                    remaining_cache_ttl(stored.updated_at, TOKEN_LIFETIME_SECS, Utc::now());
                return Ok(IssuedToken { token, cache_ttl });
            }
            Err(AppError::Auth(reason)) => {
                tracing::info!(user_id = %user_id, reason = %reason, "Access token expired, refreshing");
            }
            Err(e) => return Err(e),
        }

        let refreshed = self
            .accounts
            .refresh(&stored.refresh_token)
            .await
            .map_err(|e| match e {
                auth @ AppError::Auth(_) => auth,
                other => AppError::Auth(format!("Token refresh failed: {}", other)),
            })?;

        tokens::update_access_token(
            &self.db_pool,
            user_id,
            &refreshed.access_token,
            refreshed.refresh_token.as_deref(),
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            expires_in = ?refreshed.expires_in,
            "Access token refreshed"
        );

        let lifetime = refreshed.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        Ok(IssuedToken {
            token: AccessToken(refreshed.access_token),
            cache_ttl: remaining_cache_ttl(Utc::now(), lifetime, Utc::now()),
        })
    }
}

#[async_trait::async_trait]
impl TokenProvider for CredentialService {
    async fn get_valid_access_token(&self, user_id: &UserId) -> AppResult<AccessToken> {
        let issued: AppResult<IssuedToken> = cached!(
            self.cache,
            CacheKey::AccessToken(user_id.clone()),
            |issued: &IssuedToken| issued.cache_ttl,
            self.load_valid_token(user_id)
        );
        issued.map(|issued| issued.token)
    }

    async fn forget(&self, user_id: &UserId) -> AppResult<()> {
        self.cache
            .invalidate(&CacheKey::AccessToken(user_id.clone()))
            .await
    }
}
