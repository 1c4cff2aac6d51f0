use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{AccessToken, PlaylistId, TrackUri},
    services::{
        catalog::{MusicCatalog, MAX_TRACKS_PER_REQUEST},
        reconcile::{merge_unique_ordered, GroupPlan, RunContext},
    },
};

/// Applies computed track lists to remote playlists
///
/// Every write is split into batches of [`MAX_TRACKS_PER_REQUEST`]. Remote errors are returned
/// as-is; retrying is left to the caller.
#[derive(Clone)]
pub struct PlaylistSync {
    catalog: Arc<dyn MusicCatalog>,
}

impl PlaylistSync {
    pub fn new(catalog: Arc<dyn MusicCatalog>) -> Self {
        Self { catalog }
    }

    /// Track URIs of a playlist in stored order
    pub async fn current_uris(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<Vec<TrackUri>> {
        let items = self.catalog.playlist_items(token, playlist_id).await?;
        Ok(items
            .iter()
            .filter_map(|item| item.uri().cloned())
            .collect())
    }

    /// Makes the playlist hold exactly `target`, in order
    ///
    /// Returns the tracks that had to be inserted; an up-to-date playlist is left alone.
    pub async fn replace_all(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        target: &[TrackUri],
    ) -> AppResult<Vec<TrackUri>> {
        let current = self.current_uris(token, playlist_id).await?;
        self.converge(ctx, token, playlist_id, &current, target)
            .await
    }

    /// Turns a playlist known to hold `current` into `target`
    ///
    /// Entries that already appear in target order stay where they are and keep their
    /// `added_at`; everything else is removed and inserted at its target position. Returns the
    /// inserted tracks.
    pub async fn converge(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        current: &[TrackUri],
        target: &[TrackUri],
    ) -> AppResult<Vec<TrackUri>> {
        if current == target {
            tracing::debug!(
                run_id = %ctx.run_id,
                playlist_id = %playlist_id,
                "Playlist already up to date"
            );
            return Ok(Vec::new());
        }

        let edit = PlaylistEdit::between(current, target);
        self.remove(token, playlist_id, &edit.removals).await?;
        for (position, run) in &edit.insertions {
            self.insert_at(ctx, token, playlist_id, run, Some(*position))
                .await?;
        }

        let inserted = edit.inserted();
        tracing::info!(
            run_id = %ctx.run_id,
            playlist_id = %playlist_id,
            removed = edit.removals.len(),
            added = inserted.len(),
            "Playlist converged"
        );

        Ok(inserted)
    }

    /// Removes every track of the playlist
    pub async fn clear(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<()> {
        self.replace_all(ctx, token, playlist_id, &[]).await?;
        Ok(())
    }

    /// Inserts `tracks` at `position` (appends when `None`) leaving other entries in place
    pub async fn insert_at(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        tracks: &[TrackUri],
        position: Option<usize>,
    ) -> AppResult<()> {
        for (i, batch) in tracks.chunks(MAX_TRACKS_PER_REQUEST).enumerate() {
            let batch_position = position.map(|p| p + i * MAX_TRACKS_PER_REQUEST);
            self.catalog
                .add_tracks(token, playlist_id, batch, batch_position)
                .await?;
        }

        if !tracks.is_empty() {
            tracing::debug!(
                run_id = %ctx.run_id,
                playlist_id = %playlist_id,
                count = tracks.len(),
                position = ?position,
                "Tracks inserted"
            );
        }

        Ok(())
    }

    /// Removes every occurrence of the given tracks
    pub async fn remove(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        tracks: &[TrackUri],
    ) -> AppResult<()> {
        for batch in tracks.chunks(MAX_TRACKS_PER_REQUEST) {
            self.catalog.remove_tracks(token, playlist_id, batch).await?;
        }
        Ok(())
    }

    /// Appends the tracks that the playlist does not hold yet
    ///
    /// Returns the tracks that were actually appended.
    pub async fn append_missing(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        tracks: &[TrackUri],
    ) -> AppResult<Vec<TrackUri>> {
        let mut present: HashSet<TrackUri> = self
            .current_uris(token, playlist_id)
            .await?
            .into_iter()
            .collect();

        let fresh = take_unseen(tracks, &mut present);
        self.insert_at(ctx, token, playlist_id, &fresh, None).await?;
        Ok(fresh)
    }

    /// Writes a group plan: followee contributions appended in order, own tracks on top
    ///
    /// With `reset` the playlist is cleared first so it reflects only this pass. Tracks are
    /// never duplicated; own tracks already present are moved to the top.
    pub async fn apply_group_plan(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        plan: &GroupPlan,
        reset: bool,
    ) -> AppResult<()> {
        let mut present: HashSet<TrackUri> = if reset {
            self.clear(ctx, token, playlist_id).await?;
            HashSet::new()
        } else {
            self.current_uris(token, playlist_id)
                .await?
                .into_iter()
                .collect()
        };

        for contribution in &plan.followee_contributions {
            let fresh = take_unseen(&contribution.uris(), &mut present);
            if fresh.is_empty() {
                continue;
            }
            self.insert_at(ctx, token, playlist_id, &fresh, None).await?;

            tracing::info!(
                run_id = %ctx.run_id,
                playlist_id = %playlist_id,
                followee = %contribution.user_id,
                count = fresh.len(),
                "Followee tracks added to group playlist"
            );
        }

        if plan.head.is_empty() {
            return Ok(());
        }

        let already_present: Vec<TrackUri> = plan
            .head
            .iter()
            .filter(|uri| present.contains(*uri))
            .cloned()
            .collect();
        self.remove(token, playlist_id, &already_present).await?;
        self.insert_at(ctx, token, playlist_id, &plan.head, Some(0))
            .await?;

        Ok(())
    }
}

/// Removals and positional inserts that turn one track list into another
#[derive(Debug, Default, PartialEq)]
struct PlaylistEdit {
    /// Distinct URIs to remove; every occurrence goes
    removals: Vec<TrackUri>,
    /// Runs of consecutive target entries with their final position, in ascending order
    insertions: Vec<(usize, Vec<TrackUri>)>,
}

impl PlaylistEdit {
    fn between(current: &[TrackUri], target: &[TrackUri]) -> Self {
        let position: HashMap<&TrackUri, usize> =
            target.iter().enumerate().map(|(i, uri)| (uri, i)).collect();

        // A target with repeats cannot be matched entry by entry
        if position.len() != target.len() {
            return Self::rewrite(current, target);
        }

        let mut occurrences: HashMap<&TrackUri, usize> = HashMap::new();
        for uri in current {
            *occurrences.entry(uri).or_default() += 1;
        }

        // Removing a URI drops all of its copies, so only single entries can stay put
        let candidates: Vec<(&TrackUri, usize)> = current
            .iter()
            .filter(|uri| occurrences[uri] == 1)
            .filter_map(|uri| position.get(uri).map(|p| (uri, *p)))
            .collect();
        let positions: Vec<usize> = candidates.iter().map(|(_, p)| *p).collect();
        let kept: HashSet<&TrackUri> = longest_ascending_run(&positions)
            .into_iter()
            .map(|i| candidates[i].0)
            .collect();

        let dropped: Vec<TrackUri> = current
            .iter()
            .filter(|uri| !kept.contains(uri))
            .cloned()
            .collect();

        let mut insertions: Vec<(usize, Vec<TrackUri>)> = Vec::new();
        for (i, uri) in target.iter().enumerate() {
            if kept.contains(uri) {
                continue;
            }
            let extends_last = insertions
                .last()
                .map_or(false, |(start, run)| start + run.len() == i);
            if extends_last {
                if let Some((_, run)) = insertions.last_mut() {
                    run.push(uri.clone());
                }
            } else {
                insertions.push((i, vec![uri.clone()]));
            }
        }

        Self {
            removals: merge_unique_ordered(&dropped, &[]),
            insertions,
        }
    }

    fn rewrite(current: &[TrackUri], target: &[TrackUri]) -> Self {
        Self {
            removals: merge_unique_ordered(current, &[]),
            insertions: if target.is_empty() {
                Vec::new()
            } else {
                vec![(0, target.to_vec())]
            },
        }
    }

    fn inserted(&self) -> Vec<TrackUri> {
        self.insertions
            .iter()
            .flat_map(|(_, run)| run.iter().cloned())
            .collect()
    }
}

/// Indices of a longest strictly ascending subsequence of `values`
fn longest_ascending_run(values: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];

    for (i, value) in values.iter().enumerate() {
        let k = tails.partition_point(|&t| values[t] < *value);
        if k > 0 {
            previous[i] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(i);
        } else {
            tails[k] = i;
        }
    }

    let mut chain = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        chain.push(i);
        cursor = previous[i];
    }
    chain.reverse();
    chain
}

/// Filters `tracks` down to those not in `seen`, recording them as seen
fn take_unseen(tracks: &[TrackUri], seen: &mut HashSet<TrackUri>) -> Vec<TrackUri> {
    tracks
        .iter()
        .filter(|uri| seen.insert((*uri).clone()))
        .cloned()
        .collect()
}
