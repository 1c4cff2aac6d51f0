use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    models::{AccessToken, PlaylistId, PlaylistItem, TimeRange, TrackUri, UserId},
    services::reconcile::{merge_unique_ordered, Collaborators, ReconcileSettings, RunContext},
};

/// Tracks one user exports to the group playlists of their followers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub user_id: UserId,
    /// Recent manual additions to the user's individual playlist, newest first
    pub recommendations: Vec<TrackUri>,
    /// Top tracks of the user's listening history
    pub top_tracks: Vec<TrackUri>,
}

impl Contribution {
    /// Recommendations first, then top tracks, without duplicates
    pub fn uris(&self) -> Vec<TrackUri> {
        merge_unique_ordered(&self.recommendations, &self.top_tracks)
    }

    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty() && self.top_tracks.is_empty()
    }
}

/// A user's account id and the entries of their individual playlist, read once per pass
#[derive(Debug, Clone)]
pub struct PlaylistSnapshot {
    pub account_id: String,
    pub items: Vec<PlaylistItem>,
}

impl PlaylistSnapshot {
    /// Track URIs in stored order
    pub fn uris(&self) -> Vec<TrackUri> {
        self.items
            .iter()
            .filter_map(|item| item.uri().cloned())
            .collect()
    }
}

/// An entry added within this long after the service wrote the same track is the service's
fn write_attribution_slack() -> Duration {
    Duration::minutes(5)
}

/// Computes per-user contributions from the catalog
#[derive(Clone)]
pub struct ContributionBuilder {
    collaborators: Collaborators,
    settings: ReconcileSettings,
}

impl ContributionBuilder {
    pub fn new(collaborators: Collaborators, settings: ReconcileSettings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    /// Contribution of `source`, who must own a registered individual playlist
    pub async fn compute_contribution(
        &self,
        ctx: &RunContext,
        source: &UserId,
    ) -> AppResult<Contribution> {
        let playlists = self
            .collaborators
            .registry
            .get_playlist_ids(source)
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    run_id = %ctx.run_id,
                    user_id = %source,
                    "Contribution requested for a user without playlists"
                );
                AppError::NotProvisioned(source.clone())
            })?;

        let token = self
            .collaborators
            .tokens
            .get_valid_access_token(source)
            .await?;

        let snapshot = self.snapshot(&token, &playlists.individual).await?;
        self.contribution_from(ctx, source, &token, &snapshot).await
    }

    /// Reads the token owner's account id and the entries of their individual playlist
    pub async fn snapshot(
        &self,
        token: &AccessToken,
        individual: &PlaylistId,
    ) -> AppResult<PlaylistSnapshot> {
        let catalog = &self.collaborators.catalog;
        let account_id = catalog.current_profile(token).await?.id;
        let items = catalog.playlist_items(token, individual).await?;
        Ok(PlaylistSnapshot { account_id, items })
    }

    /// Contribution of `source` from an already read snapshot of its individual playlist
    pub async fn contribution_from(
        &self,
        ctx: &RunContext,
        source: &UserId,
        token: &AccessToken,
        snapshot: &PlaylistSnapshot,
    ) -> AppResult<Contribution> {
        let top_tracks = self.top_track_uris(token).await?;
        let recommendations = self.recent_additions(ctx, source, snapshot).await?;

        tracing::debug!(
            run_id = %ctx.run_id,
            user_id = %source,
            top_tracks = top_tracks.len(),
            recommendations = recommendations.len(),
            "Contribution computed"
        );

        Ok(Contribution {
            user_id: source.clone(),
            recommendations,
            top_tracks,
        })
    }

    /// Top tracks of the token's owner, falling back to the long-term window
    ///
    /// An empty short window means too little recent listening, not an empty history.
    pub async fn top_track_uris(&self, token: &AccessToken) -> AppResult<Vec<TrackUri>> {
        let limit = self.settings.top_tracks_limit;
        let catalog = &self.collaborators.catalog;

        let mut tracks = catalog.top_tracks(token, TimeRange::ShortTerm, limit).await?;
        if tracks.is_empty() {
            tracing::debug!("No short-term top tracks, retrying with long-term window");
            tracks = catalog.top_tracks(token, TimeRange::LongTerm, limit).await?;
        }

        Ok(tracks.into_iter().take(limit).map(|t| t.uri).collect())
    }

    /// Tracks the owner added by hand to their own playlist inside the look-back window
    ///
    /// Entries the service wrote with the owner's token carry the owner as adder too; those
    /// are told apart by the registry's record of written tracks.
    async fn recent_additions(
        &self,
        ctx: &RunContext,
        source: &UserId,
        snapshot: &PlaylistSnapshot,
    ) -> AppResult<Vec<TrackUri>> {
        let since = ctx.started_at - self.settings.recommendation_window;
        let slack = write_attribution_slack();

        let written: HashMap<TrackUri, DateTime<Utc>> = self
            .collaborators
            .registry
            .written_tracks_since(source, since - slack)
            .await?
            .into_iter()
            .map(|track| (track.uri, track.written_at))
            .collect();

        let mut additions: Vec<_> = snapshot
            .items
            .iter()
            .filter(|item| item.added_by_since(&snapshot.account_id, since))
            .filter_map(|item| Some((item.added_at?, item.uri()?.clone())))
            .filter(|(added_at, uri)| {
                written
                    .get(uri)
                    .map_or(true, |written_at| *added_at > *written_at + slack)
            })
            .collect();

        // Newest first; the sort is stable so same-instant additions keep playlist order
        additions.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(additions
            .into_iter()
            .take(self.settings.recommendation_limit)
            .map(|(_, uri)| uri)
            .collect())
    }
}
