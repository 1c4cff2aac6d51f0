use std::collections::HashSet;

use serde::Serialize;

use crate::{
    error::AppResult,
    models::{AccessToken, PlaylistId, TrackUri, UserId, UserPlaylists},
    services::reconcile::{
        merge_unique_ordered, Collaborators, Contribution, ContributionBuilder,
        ReconcileSettings, RunContext,
    },
};

/// A followee whose contribution could not be computed this pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFollowee {
    pub user_id: UserId,
    pub reason: String,
}

/// What the group playlist receives in one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupPlan {
    /// Followee contributions in follow order, appended to the playlist
    pub followee_contributions: Vec<Contribution>,
    /// The user's own feed, inserted at position 0
    pub head: Vec<TrackUri>,
    pub skipped_followees: Vec<SkippedFollowee>,
}

impl GroupPlan {
    /// Contents of a freshly reset group playlist once the plan is applied
    pub fn target(&self) -> Vec<TrackUri> {
        let appended: Vec<TrackUri> = self
            .followee_contributions
            .iter()
            .flat_map(|c| c.uris())
            .collect();
        merge_unique_ordered(&self.head, &appended)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    pub user_id: UserId,
    pub playlists: UserPlaylists,
    /// This pass's own recommendations and top tracks
    pub own_feed: Vec<TrackUri>,
    /// The manual additions within `own_feed`
    pub own_recommendations: Vec<TrackUri>,
    /// Contents of the individual playlist when the plan was made
    pub individual_current: Vec<TrackUri>,
    /// New own tracks first, then what the individual playlist already held
    pub individual_target: Vec<TrackUri>,
    pub group: GroupPlan,
}

/// Builds per-user plans; never writes to playlists
#[derive(Clone)]
pub struct Planner {
    collaborators: Collaborators,
    contributions: ContributionBuilder,
}

impl Planner {
    pub fn new(collaborators: Collaborators, settings: ReconcileSettings) -> Self {
        Self {
            contributions: ContributionBuilder::new(collaborators.clone(), settings),
            collaborators,
        }
    }

    pub fn contributions(&self) -> &ContributionBuilder {
        &self.contributions
    }

    /// Plan for a provisioned user
    ///
    /// A failing followee is logged and left out of the plan; any other failure aborts it. The
    /// user's profile and individual playlist are read once and shared by every step.
    pub async fn plan(
        &self,
        ctx: &RunContext,
        user_id: &UserId,
        playlists: &UserPlaylists,
        token: &AccessToken,
    ) -> AppResult<ReconciliationPlan> {
        let snapshot = self
            .contributions
            .snapshot(token, &playlists.individual)
            .await?;
        let own = self
            .contributions
            .contribution_from(ctx, user_id, token, &snapshot)
            .await?;
        let own_feed = own.uris();

        let individual_current = snapshot.uris();
        let individual_target = merge_unique_ordered(&own_feed, &individual_current);

        let mut group = GroupPlan {
            head: own_feed.clone(),
            ..GroupPlan::default()
        };

        for followee in self
            .derive_followees(ctx, user_id, token, &snapshot.account_id)
            .await?
        {
            match self
                .contributions
                .compute_contribution(ctx, &followee)
                .await
            {
                Ok(contribution) => group.followee_contributions.push(contribution),
                Err(e) => {
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        user_id = %user_id,
                        followee = %followee,
                        error = %e,
                        "Skipping followee contribution"
                    );
                    group.skipped_followees.push(SkippedFollowee {
                        user_id: followee,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            run_id = %ctx.run_id,
            user_id = %user_id,
            own_tracks = own_feed.len(),
            individual_target = individual_target.len(),
            followees = group.followee_contributions.len(),
            skipped = group.skipped_followees.len(),
            "Reconciliation planned"
        );

        Ok(ReconciliationPlan {
            user_id: user_id.clone(),
            playlists: playlists.clone(),
            own_feed,
            own_recommendations: own.recommendations,
            individual_current,
            individual_target,
            group,
        })
    }

    /// Registered users whose individual playlist `user_id` follows remotely
    ///
    /// Ordered like the remote follow list, self excluded. Edges missing from the registry are
    /// back-filled.
    pub async fn derive_followees(
        &self,
        ctx: &RunContext,
        user_id: &UserId,
        token: &AccessToken,
        account_id: &str,
    ) -> AppResult<Vec<UserId>> {
        let catalog = &self.collaborators.catalog;
        let registry = &self.collaborators.registry;

        let followed: Vec<PlaylistId> = catalog
            .user_playlists(token, account_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if followed.is_empty() {
            return Ok(Vec::new());
        }

        let owners = registry.owners_of_individual_playlists(&followed).await?;

        let mut seen = HashSet::new();
        let followees: Vec<UserId> = followed
            .iter()
            .filter_map(|playlist_id| owners.iter().find(|o| &o.playlist_id == playlist_id))
            .map(|o| o.user_id.clone())
            .filter(|owner| owner != user_id)
            .filter(|owner| seen.insert(owner.clone()))
            .collect();

        self.backfill_edges(ctx, user_id, &followees).await;

        Ok(followees)
    }

    async fn backfill_edges(&self, ctx: &RunContext, user_id: &UserId, followees: &[UserId]) {
        let registry = &self.collaborators.registry;

        let known: HashSet<UserId> = match registry.followees(user_id).await {
            Ok(known) => known.into_iter().collect(),
            Err(e) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    user_id = %user_id,
                    error = %e,
                    "Could not read recorded follow edges"
                );
                return;
            }
        };

        for followee in followees.iter().filter(|f| !known.contains(*f)) {
            match registry.record_follow_edge(user_id, followee).await {
                Ok(()) => tracing::debug!(
                    run_id = %ctx.run_id,
                    follower = %user_id,
                    followee = %followee,
                    "Follow edge back-filled"
                ),
                Err(e) => tracing::warn!(
                    run_id = %ctx.run_id,
                    follower = %user_id,
                    followee = %followee,
                    error = %e,
                    "Failed to back-fill follow edge"
                ),
            }
        }
    }
}
