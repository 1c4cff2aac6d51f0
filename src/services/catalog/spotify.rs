/// Spotify Web API catalog client
///
/// Thin typed wrapper over the endpoints the reconciliation engine needs. Every call carries
/// the bearer token of the user it is made for.
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{
        AccessToken, CreatedPlaylist, NewPlaylist, Paging, PlaylistId, PlaylistItem,
        PlaylistSummary, Profile, TimeRange, Track, TrackUri,
    },
    services::catalog::{MusicCatalog, MAX_TRACKS_PER_REQUEST},
};

const PLAYLIST_ITEMS_PAGE_SIZE: usize = 100;
const USER_PLAYLISTS_PAGE_SIZE: usize = 50;

#[derive(Clone)]
pub struct SpotifyCatalog {
    http_client: HttpClient,
    api_url: String,
}

impl SpotifyCatalog {
    pub fn new(api_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &AccessToken,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let response = self
            .http_client
            .get(self.url(path))
            .bearer_auth(token.as_str())
            .query(query)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// Walks an offset-paginated listing until a short or empty page
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        token: &AccessToken,
        path: &str,
        page_size: usize,
    ) -> AppResult<Vec<T>> {
        let mut items = Vec::new();
        let mut offset = 0;

        loop {
            let page: Paging<T> = self
                .get_json(
                    token,
                    path,
                    &[
                        ("limit", page_size.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let fetched = page.items.len();
            items.extend(page.items);

            if fetched < page_size || page.next.is_none() {
                break;
            }
            offset += page_size;
        }

        Ok(items)
    }
}

/// Maps non-success responses onto the error taxonomy
async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    tracing::warn!(status = %status, body = %body, "Spotify API request failed");

    match status {
        StatusCode::UNAUTHORIZED => Err(AppError::Auth(format!(
            "Spotify rejected the access token: {}",
            body
        ))),
        StatusCode::FORBIDDEN => Err(AppError::RemoteApi {
            status: status.as_u16(),
            message: format!("Permission denied for this playlist: {}", body),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(AppError::RemoteApi {
            status: status.as_u16(),
            message: format!(
                "Rate limited, retry after {}s",
                retry_after.unwrap_or_else(|| "?".to_string())
            ),
        }),
        _ => Err(AppError::RemoteApi {
            status: status.as_u16(),
            message: body,
        }),
    }
}

fn ensure_batch_size(uris: &[TrackUri]) -> AppResult<()> {
    if uris.len() > MAX_TRACKS_PER_REQUEST {
        return Err(AppError::InvalidInput(format!(
            "At most {} tracks per request, got {}",
            MAX_TRACKS_PER_REQUEST,
            uris.len()
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl MusicCatalog for SpotifyCatalog {
    async fn current_profile(&self, token: &AccessToken) -> AppResult<Profile> {
        self.get_json(token, "/me", &[]).await
    }

    async fn create_playlist(
        &self,
        token: &AccessToken,
        owner_id: &str,
        playlist: &NewPlaylist,
    ) -> AppResult<CreatedPlaylist> {
        let response = self
            .http_client
            .post(self.url(&format!("/users/{}/playlists", owner_id)))
            .bearer_auth(token.as_str())
            .json(playlist)
            .send()
            .await?;

        let created: CreatedPlaylist = check_status(response).await?.json().await?;

        tracing::info!(
            owner_id = %owner_id,
            playlist_id = %created.id,
            name = %created.name,
            "Playlist created"
        );

        Ok(created)
    }

    async fn playlist_items(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<Vec<PlaylistItem>> {
        self.get_all_pages(
            token,
            &format!("/playlists/{}/tracks", playlist_id),
            PLAYLIST_ITEMS_PAGE_SIZE,
        )
        .await
    }

    async fn add_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        uris: &[TrackUri],
        position: Option<usize>,
    ) -> AppResult<()> {
        ensure_batch_size(uris)?;

        let mut body = json!({ "uris": uris });
        if let Some(position) = position {
            body["position"] = json!(position);
        }

        let response = self
            .http_client
            .post(self.url(&format!("/playlists/{}/tracks", playlist_id)))
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;

        tracing::debug!(
            playlist_id = %playlist_id,
            count = uris.len(),
            position = ?position,
            "Tracks added"
        );

        Ok(())
    }

    async fn remove_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        uris: &[TrackUri],
    ) -> AppResult<()> {
        ensure_batch_size(uris)?;

        let tracks: Vec<_> = uris.iter().map(|uri| json!({ "uri": uri })).collect();

        let response = self
            .http_client
            .delete(self.url(&format!("/playlists/{}/tracks", playlist_id)))
            .bearer_auth(token.as_str())
            .json(&json!({ "tracks": tracks }))
            .send()
            .await?;
        check_status(response).await?;

        tracing::debug!(playlist_id = %playlist_id, count = uris.len(), "Tracks removed");

        Ok(())
    }

    async fn follow_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        public: bool,
    ) -> AppResult<()> {
        let response = self
            .http_client
            .put(self.url(&format!("/playlists/{}/followers", playlist_id)))
            .bearer_auth(token.as_str())
            .json(&json!({ "public": public }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn unfollow_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<()> {
        let response = self
            .http_client
            .delete(self.url(&format!("/playlists/{}/followers", playlist_id)))
            .bearer_auth(token.as_str())
            .send()
            .await?;
        check_status(response).await?;

        tracing::debug!(playlist_id = %playlist_id, "Playlist unfollowed");
        Ok(())
    }

    async fn is_following_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<bool> {
        let flags: Vec<bool> = self
            .get_json(
                token,
                &format!("/playlists/{}/followers/contains", playlist_id),
                &[],
            )
            .await?;

        Ok(flags.first().copied().unwrap_or(false))
    }

    async fn top_tracks(
        &self,
        token: &AccessToken,
        time_range: TimeRange,
        limit: usize,
    ) -> AppResult<Vec<Track>> {
        #[derive(Deserialize)]
        struct TopTracksPage {
            items: Vec<Track>,
        }

        let page: TopTracksPage = self
            .get_json(
                token,
                "/me/top/tracks",
                &[
                    ("time_range", time_range.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(page.items)
    }

    async fn user_playlists(
        &self,
        token: &AccessToken,
        account_id: &str,
    ) -> AppResult<Vec<PlaylistSummary>> {
        self.get_all_pages(
            token,
            &format!("/users/{}/playlists", account_id),
            USER_PLAYLISTS_PAGE_SIZE,
        )
        .await
    }
}
