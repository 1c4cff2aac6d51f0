use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, StepContext},
    models::{
        AccessToken, DeletionOutcome, PlaylistKind, TrackUri, UserId, UserPlaylists,
    },
    services::reconcile::{
        Collaborators, Planner, PlaylistSync, ReconcileSettings, ReconciliationPlan, RunContext,
        SkippedFollowee,
    },
};

/// Lifecycle of a user within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Unprovisioned,
    Provisioning,
    Provisioned,
    Reconciling,
    Reconciled,
    Failed,
}

/// Final state of one user in a batch pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserOutcome {
    pub user_id: UserId,
    pub state: UserState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_followees: Vec<SkippedFollowee>,
}

impl UserOutcome {
    fn new(user_id: &UserId, state: UserState) -> Self {
        Self {
            user_id: user_id.clone(),
            state,
            detail: None,
            skipped_followees: Vec::new(),
        }
    }

    fn failed(user_id: &UserId, error: &AppError) -> Self {
        Self {
            detail: Some(error.to_string()),
            ..Self::new(user_id, UserState::Failed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub processed: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<UserOutcome>,
}

impl BatchSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            processed: 0,
            reconciled: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcome: UserOutcome) {
        self.processed += 1;
        match outcome.state {
            UserState::Reconciled => self.reconciled += 1,
            UserState::Failed => self.failed += 1,
            _ => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowEdge {
    pub follower: UserId,
    pub followee: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FollowOutcome {
    /// A user tried to follow themselves; nothing was changed
    SelfFollow,
    /// Edges created by this call; empty when both directions already existed
    Linked { new_edges: Vec<FollowEdge> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    AlreadyProvisioned {
        playlists: UserPlaylists,
    },
    Provisioned {
        playlists: UserPlaylists,
        seeded: Vec<TrackUri>,
    },
}

/// Entry point for every trigger: provisioning, follows, deletion and scheduled passes
///
/// Single-request flows return the first failure annotated with the step that failed. The
/// batch pass isolates failures per user and only errors when the roster cannot be read.
///
/// Flows that write playlists run one at a time; clones share the lock.
#[derive(Clone)]
pub struct Reconciler {
    collaborators: Collaborators,
    settings: ReconcileSettings,
    planner: Planner,
    sync: PlaylistSync,
    run_lock: Arc<Mutex<()>>,
}

impl Reconciler {
    pub fn new(collaborators: Collaborators, settings: ReconcileSettings) -> Self {
        Self {
            planner: Planner::new(collaborators.clone(), settings.clone()),
            sync: PlaylistSync::new(collaborators.catalog.clone()),
            collaborators,
            settings,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Creates and seeds both playlists of a new user
    ///
    /// Running it again for a provisioned user only re-follows the existing playlists.
    pub async fn on_user_created(
        &self,
        ctx: &RunContext,
        user_id: &UserId,
    ) -> AppResult<ProvisionOutcome> {
        self.provision(ctx, user_id).instrument(ctx.span()).await
    }

    async fn provision(&self, ctx: &RunContext, user_id: &UserId) -> AppResult<ProvisionOutcome> {
        let _running = self.run_lock.lock().await;

        let Collaborators {
            catalog,
            registry,
            tokens,
        } = &self.collaborators;

        let email = registry
            .user_email(user_id)
            .await
            .and_then(|email| {
                email.ok_or_else(|| {
                    AppError::NotFound(format!("No credentials stored for user {}", user_id))
                })
            })
            .at_step("load user")?;

        let token = tokens
            .get_valid_access_token(user_id)
            .await
            .at_step("fetch access token")?;

        if let Some(playlists) = registry
            .get_playlist_ids(user_id)
            .await
            .at_step("load playlists")?
        {
            catalog
                .follow_playlist(
                    &token,
                    &playlists.individual,
                    PlaylistKind::Individual.followed_publicly(),
                )
                .await
                .at_step("follow individual playlist")?;
            catalog
                .follow_playlist(
                    &token,
                    &playlists.group,
                    PlaylistKind::Group.followed_publicly(),
                )
                .await
                .at_step("follow group playlist")?;

            tracing::info!(
                run_id = %ctx.run_id,
                user_id = %user_id,
                "User already provisioned, playlists re-followed"
            );
            return Ok(ProvisionOutcome::AlreadyProvisioned { playlists });
        }

        tracing::info!(
            run_id = %ctx.run_id,
            user_id = %user_id,
            state = ?UserState::Provisioning,
            "Provisioning playlists"
        );

        let account_id = catalog
            .current_profile(&token)
            .await
            .at_step("fetch profile")?
            .id;

        let individual = catalog
            .create_playlist(&token, &account_id, &PlaylistKind::Individual.new_playlist())
            .await
            .at_step("create individual playlist")?
            .id;
        let group = catalog
            .create_playlist(&token, &account_id, &PlaylistKind::Group.new_playlist())
            .await
            .at_step("create group playlist")?
            .id;

        registry
            .register_playlists(
                user_id,
                Some(email),
                Some(individual.clone()),
                Some(group.clone()),
            )
            .await
            .at_step("register playlists")?;

        let playlists = UserPlaylists { individual, group };

        self.sync
            .clear(ctx, &token, &playlists.individual)
            .await
            .at_step("clear playlists")?;
        self.sync
            .clear(ctx, &token, &playlists.group)
            .await
            .at_step("clear playlists")?;

        let seeded = self
            .planner
            .contributions()
            .top_track_uris(&token)
            .await
            .at_step("fetch top tracks")?;
        self.sync
            .insert_at(ctx, &token, &playlists.individual, &seeded, None)
            .await
            .at_step("seed individual playlist")?;
        registry
            .record_written_tracks(user_id, &seeded, Utc::now())
            .await
            .at_step("record seeded tracks")?;

        tracing::info!(
            run_id = %ctx.run_id,
            user_id = %user_id,
            individual = %playlists.individual,
            group = %playlists.group,
            seeded = seeded.len(),
            state = ?UserState::Provisioned,
            "User provisioned"
        );

        Ok(ProvisionOutcome::Provisioned { playlists, seeded })
    }

    /// Links two users in both directions and pushes each one's contribution to the other
    pub async fn on_follow_created(
        &self,
        ctx: &RunContext,
        user_a: &UserId,
        user_b: &UserId,
    ) -> AppResult<FollowOutcome> {
        self.follow(ctx, user_a, user_b)
            .instrument(ctx.span())
            .await
    }

    async fn follow(
        &self,
        ctx: &RunContext,
        user_a: &UserId,
        user_b: &UserId,
    ) -> AppResult<FollowOutcome> {
        if user_a == user_b {
            tracing::info!(run_id = %ctx.run_id, user_id = %user_a, "Ignoring self-follow");
            return Ok(FollowOutcome::SelfFollow);
        }

        let _running = self.run_lock.lock().await;

        let mut new_edges = Vec::new();
        for (follower, followee) in [(user_a, user_b), (user_b, user_a)] {
            if let Some(edge) = self.link(ctx, follower, followee).await? {
                new_edges.push(edge);
            }
        }

        Ok(FollowOutcome::Linked { new_edges })
    }

    /// One direction of a follow; `None` when the follower already follows
    async fn link(
        &self,
        ctx: &RunContext,
        follower: &UserId,
        followee: &UserId,
    ) -> AppResult<Option<FollowEdge>> {
        let Collaborators {
            catalog,
            registry,
            tokens,
        } = &self.collaborators;

        let follower_playlists = self
            .provisioned_playlists(follower)
            .await
            .at_step("load playlists")?;
        let followee_playlists = self
            .provisioned_playlists(followee)
            .await
            .at_step("load playlists")?;

        let token = tokens
            .get_valid_access_token(follower)
            .await
            .at_step("fetch access token")?;

        let already_following = catalog
            .is_following_playlist(&token, &followee_playlists.individual)
            .await
            .at_step("check following")?;
        if already_following {
            tracing::debug!(
                run_id = %ctx.run_id,
                follower = %follower,
                followee = %followee,
                "Already following"
            );
            return Ok(None);
        }

        catalog
            .follow_playlist(&token, &followee_playlists.individual, false)
            .await
            .at_step("follow playlist")?;

        let contribution = self
            .planner
            .contributions()
            .compute_contribution(ctx, followee)
            .await
            .at_step("compute contribution")?;

        let added = self
            .sync
            .append_missing(ctx, &token, &follower_playlists.group, &contribution.uris())
            .await
            .at_step("update group playlist")?;

        registry
            .record_follow_edge(follower, followee)
            .await
            .at_step("record follow edge")?;

        tracing::info!(
            run_id = %ctx.run_id,
            follower = %follower,
            followee = %followee,
            added = added.len(),
            "Follow linked"
        );

        Ok(Some(FollowEdge {
            follower: follower.clone(),
            followee: followee.clone(),
        }))
    }

    /// Removes the user's playlists and everything registered for them
    ///
    /// Never fails; the outcome says what happened. The remote playlists are removed on a best
    /// effort basis before the registry forgets them.
    pub async fn on_user_deleted(&self, ctx: &RunContext, user_id: &UserId) -> DeletionOutcome {
        self.delete(ctx, user_id).instrument(ctx.span()).await
    }

    async fn delete(&self, ctx: &RunContext, user_id: &UserId) -> DeletionOutcome {
        let _running = self.run_lock.lock().await;

        if let Err(e) = self.unfollow_own_playlists(user_id).await {
            tracing::warn!(
                run_id = %ctx.run_id,
                user_id = %user_id,
                error = %e,
                "Failed to remove remote playlists"
            );
        }

        let outcome = match self
            .collaborators
            .registry
            .delete_user_and_related_data(user_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => DeletionOutcome {
                success: false,
                message: e.to_string(),
            },
        };

        if let Err(e) = self.collaborators.tokens.forget(user_id).await {
            tracing::warn!(
                run_id = %ctx.run_id,
                user_id = %user_id,
                error = %e,
                "Failed to evict cached token"
            );
        }

        if outcome.success {
            tracing::info!(run_id = %ctx.run_id, user_id = %user_id, "User deleted");
        } else {
            tracing::error!(
                run_id = %ctx.run_id,
                user_id = %user_id,
                message = %outcome.message,
                "User deletion failed"
            );
        }

        outcome
    }

    /// Owner unfollowing is how Spotify deletes a playlist
    async fn unfollow_own_playlists(&self, user_id: &UserId) -> AppResult<()> {
        let Collaborators {
            catalog,
            registry,
            tokens,
        } = &self.collaborators;

        let Some(playlists) = registry.get_playlist_ids(user_id).await? else {
            return Ok(());
        };
        let token = tokens.get_valid_access_token(user_id).await?;

        for playlist_id in [&playlists.individual, &playlists.group] {
            catalog.unfollow_playlist(&token, playlist_id).await?;
        }

        tracing::info!(user_id = %user_id, "Remote playlists removed");
        Ok(())
    }

    /// Reconciles every registered user in turn
    ///
    /// A failing user is recorded and the pass moves on to the next one.
    pub async fn run_scheduled_reconciliation(&self, ctx: &RunContext) -> AppResult<BatchSummary> {
        self.run_batch(ctx).instrument(ctx.span()).await
    }

    async fn run_batch(&self, ctx: &RunContext) -> AppResult<BatchSummary> {
        let _running = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(run_id = %ctx.run_id, "Waiting for the running pass to finish");
                self.run_lock.lock().await
            }
        };

        let users = self.collaborators.registry.list_users().await?;

        let mut seen = HashSet::new();
        let roster: Vec<UserId> = users
            .into_iter()
            .map(|u| u.user_id)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        tracing::info!(run_id = %ctx.run_id, users = roster.len(), "Starting reconciliation pass");

        let mut summary = BatchSummary::new(ctx.run_id);
        for user_id in &roster {
            let span = tracing::info_span!("reconcile_user", run_id = %ctx.run_id, user_id = %user_id);
            let outcome = self.reconcile_user(ctx, user_id).instrument(span).await;
            summary.record(outcome);
        }

        tracing::info!(
            run_id = %ctx.run_id,
            processed = summary.processed,
            reconciled = summary.reconciled,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reconciliation pass finished"
        );

        Ok(summary)
    }

    /// Plans and applies one user, folding any error into a `Failed` outcome
    async fn reconcile_user(&self, ctx: &RunContext, user_id: &UserId) -> UserOutcome {
        let playlists = match self.collaborators.registry.get_playlist_ids(user_id).await {
            Ok(Some(playlists)) => playlists,
            Ok(None) => {
                tracing::info!(run_id = %ctx.run_id, user_id = %user_id, "Skipping unprovisioned user");
                return UserOutcome::new(user_id, UserState::Unprovisioned);
            }
            Err(e) => {
                tracing::error!(run_id = %ctx.run_id, user_id = %user_id, error = %e, "Failed to load playlists");
                return UserOutcome::failed(user_id, &e);
            }
        };

        match self.reconcile_with_fresh_token(ctx, user_id, &playlists).await {
            Ok(plan) => {
                tracing::info!(
                    run_id = %ctx.run_id,
                    user_id = %user_id,
                    state = ?UserState::Reconciled,
                    "User reconciled"
                );
                UserOutcome {
                    skipped_followees: plan.group.skipped_followees,
                    ..UserOutcome::new(user_id, UserState::Reconciled)
                }
            }
            Err(e) => {
                tracing::error!(
                    run_id = %ctx.run_id,
                    user_id = %user_id,
                    error = %e,
                    state = ?UserState::Failed,
                    "User reconciliation failed"
                );
                UserOutcome::failed(user_id, &e)
            }
        }
    }

    /// A token the catalog rejects is evicted and the user retried once with a new one
    async fn reconcile_with_fresh_token(
        &self,
        ctx: &RunContext,
        user_id: &UserId,
        playlists: &UserPlaylists,
    ) -> AppResult<ReconciliationPlan> {
        match self.reconcile_provisioned(ctx, user_id, playlists).await {
            Err(e) if matches!(e.root(), AppError::Auth(_)) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    user_id = %user_id,
                    error = %e,
                    "Access token rejected, retrying with a fresh one"
                );
                self.collaborators.tokens.forget(user_id).await?;
                self.reconcile_provisioned(ctx, user_id, playlists).await
            }
            result => result,
        }
    }

    async fn reconcile_provisioned(
        &self,
        ctx: &RunContext,
        user_id: &UserId,
        playlists: &UserPlaylists,
    ) -> AppResult<ReconciliationPlan> {
        let token = self
            .collaborators
            .tokens
            .get_valid_access_token(user_id)
            .await?;

        tracing::debug!(run_id = %ctx.run_id, user_id = %user_id, state = ?UserState::Reconciling);

        let plan = self.planner.plan(ctx, user_id, playlists, &token).await?;
        self.apply(ctx, &token, &plan).await?;
        Ok(plan)
    }

    async fn apply(
        &self,
        ctx: &RunContext,
        token: &AccessToken,
        plan: &ReconciliationPlan,
    ) -> AppResult<()> {
        self.sync
            .apply_group_plan(
                ctx,
                token,
                &plan.playlists.group,
                &plan.group,
                self.settings.reset_group_playlist,
            )
            .await?;

        // An empty target means no listening data; keep what the playlist has
        if plan.individual_target.is_empty() {
            tracing::info!(
                run_id = %ctx.run_id,
                user_id = %plan.user_id,
                "No tracks for individual playlist, leaving it untouched"
            );
            return Ok(());
        }

        let inserted = self
            .sync
            .converge(
                ctx,
                token,
                &plan.playlists.individual,
                &plan.individual_current,
                &plan.individual_target,
            )
            .await?;

        // Moved recommendations stay the user's own additions
        let written: Vec<TrackUri> = inserted
            .into_iter()
            .filter(|uri| !plan.own_recommendations.contains(uri))
            .collect();
        if written.is_empty() {
            return Ok(());
        }
        self.collaborators
            .registry
            .record_written_tracks(&plan.user_id, &written, Utc::now())
            .await
    }

    async fn provisioned_playlists(&self, user_id: &UserId) -> AppResult<UserPlaylists> {
        self.collaborators
            .registry
            .get_playlist_ids(user_id)
            .await?
            .ok_or_else(|| AppError::NotProvisioned(user_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreatedPlaylist, PlaylistId, Profile, RegisteredUser, Track};
    use crate::services::{
        catalog::MockMusicCatalog, credentials::MockTokenProvider,
        registry::MockPlaylistRegistry, reconcile::RunTrigger,
    };
    use mockall::predicate::{always, eq};
    use std::sync::Arc;

    fn reconciler(
        catalog: MockMusicCatalog,
        registry: MockPlaylistRegistry,
        tokens: MockTokenProvider,
    ) -> Reconciler {
        Reconciler::new(
            Collaborators::new(Arc::new(catalog), Arc::new(registry), Arc::new(tokens)),
            ReconcileSettings::default(),
        )
    }

    fn playlists() -> UserPlaylists {
        UserPlaylists {
            individual: PlaylistId::from("ind-u"),
            group: PlaylistId::from("grp-u"),
        }
    }

    fn tokens() -> MockTokenProvider {
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_get_valid_access_token()
            .returning(|user| Ok(AccessToken(format!("token-{}", user))));
        tokens
    }

    fn ctx(trigger: RunTrigger) -> RunContext {
        RunContext::new(trigger)
    }

    #[tokio::test]
    async fn test_self_follow_is_a_noop() {
        // Any collaborator call would panic on the bare mocks
        let outcome = reconciler(
            MockMusicCatalog::new(),
            MockPlaylistRegistry::new(),
            MockTokenProvider::new(),
        )
        .on_follow_created(
            &ctx(RunTrigger::FollowCreated),
            &UserId::from("u"),
            &UserId::from("u"),
        )
        .await
        .unwrap();

        assert_eq!(outcome, FollowOutcome::SelfFollow);
    }

    #[tokio::test]
    async fn test_reprovisioning_only_refollows() {
        let mut registry = MockPlaylistRegistry::new();
        registry
            .expect_user_email()
            .returning(|_| Ok(Some("u@example.com".to_string())));
        registry
            .expect_get_playlist_ids()
            .returning(|_| Ok(Some(playlists())));
        registry.expect_register_playlists().never();

        let mut catalog = MockMusicCatalog::new();
        catalog
            .expect_follow_playlist()
            .with(always(), eq(PlaylistId::from("ind-u")), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));
        catalog
            .expect_follow_playlist()
            .with(always(), eq(PlaylistId::from("grp-u")), eq(false))
            .times(1)
            .returning(|_, _, _| Ok(()));
        catalog.expect_create_playlist().never();

        let outcome = reconciler(catalog, registry, tokens())
            .on_user_created(&ctx(RunTrigger::UserCreated), &UserId::from("u"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProvisionOutcome::AlreadyProvisioned {
                playlists: playlists()
            }
        );
    }

    #[tokio::test]
    async fn test_provisioning_creates_and_seeds() {
        let mut registry = MockPlaylistRegistry::new();
        registry
            .expect_user_email()
            .returning(|_| Ok(Some("u@example.com".to_string())));
        registry.expect_get_playlist_ids().returning(|_| Ok(None));
        registry
            .expect_register_playlists()
            .with(
                eq(UserId::from("u")),
                eq(Some("u@example.com".to_string())),
                eq(Some(PlaylistId::from("ind-u"))),
                eq(Some(PlaylistId::from("grp-u"))),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut catalog = MockMusicCatalog::new();
        catalog.expect_current_profile().returning(|_| {
            Ok(Profile {
                id: "acct-u".to_string(),
                display_name: None,
                email: None,
            })
        });
        catalog
            .expect_create_playlist()
            .withf(|_, owner, playlist| owner == "acct-u" && playlist.public)
            .times(1)
            .returning(|_, _, _| {
                Ok(CreatedPlaylist {
                    id: PlaylistId::from("ind-u"),
                    name: "My Top Tracks".to_string(),
                })
            });
        catalog
            .expect_create_playlist()
            .withf(|_, owner, playlist| owner == "acct-u" && playlist.collaborative)
            .times(1)
            .returning(|_, _, _| {
                Ok(CreatedPlaylist {
                    id: PlaylistId::from("grp-u"),
                    name: "Friend Favorites".to_string(),
                })
            });
        catalog.expect_playlist_items().returning(|_, _| Ok(vec![]));
        catalog.expect_top_tracks().returning(|_, _, _| {
            Ok(vec![Track {
                uri: TrackUri::from("t1"),
                name: "t1".to_string(),
                artists: vec![],
            }])
        });
        catalog
            .expect_add_tracks()
            .with(
                always(),
                eq(PlaylistId::from("ind-u")),
                eq(vec![TrackUri::from("t1")]),
                eq(None),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        registry
            .expect_record_written_tracks()
            .withf(|user, uris, _| {
                user == &UserId::from("u") && uris.to_vec() == vec![TrackUri::from("t1")]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = reconciler(catalog, registry, tokens())
            .on_user_created(&ctx(RunTrigger::UserCreated), &UserId::from("u"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProvisionOutcome::Provisioned {
                playlists: playlists(),
                seeded: vec![TrackUri::from("t1")],
            }
        );
    }

    #[tokio::test]
    async fn test_provisioning_reports_failed_step() {
        let mut registry = MockPlaylistRegistry::new();
        registry.expect_user_email().returning(|_| Ok(Some("u@example.com".to_string())));

        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_get_valid_access_token()
            .returning(|_| Err(AppError::Auth("refresh failed".to_string())));

        let err = reconciler(MockMusicCatalog::new(), registry, tokens)
            .on_user_created(&ctx(RunTrigger::UserCreated), &UserId::from("u"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Step { step: "fetch access token", .. }));
        assert!(matches!(err.root(), AppError::Auth(_)));
    }

    #[tokio::test]
    async fn test_deletion_survives_cache_eviction_failure() {
        let mut registry = MockPlaylistRegistry::new();
        registry
            .expect_get_playlist_ids()
            .returning(|_| Err(AppError::Internal("connection reset".to_string())));
        registry
            .expect_delete_user_and_related_data()
            .with(eq(UserId::from("u")))
            .times(1)
            .returning(|_| {
                Ok(DeletionOutcome {
                    success: true,
                    message: "User data deleted".to_string(),
                })
            });

        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_forget()
            .returning(|_| Err(AppError::Internal("redis down".to_string())));

        let outcome = reconciler(MockMusicCatalog::new(), registry, tokens)
            .on_user_deleted(&ctx(RunTrigger::UserDeleted), &UserId::from("u"))
            .await;

        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_batch_skips_unprovisioned_and_dedups_roster() {
        let mut registry = MockPlaylistRegistry::new();
        registry.expect_list_users().returning(|| {
            Ok(vec![
                RegisteredUser {
                    user_id: UserId::from("x"),
                    email: None,
                },
                RegisteredUser {
                    user_id: UserId::from("x"),
                    email: None,
                },
            ])
        });
        registry
            .expect_get_playlist_ids()
            .times(1)
            .returning(|_| Ok(None));

        let summary = reconciler(MockMusicCatalog::new(), registry, MockTokenProvider::new())
            .run_scheduled_reconciliation(&ctx(RunTrigger::Scheduled))
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.outcomes[0].state, UserState::Unprovisioned);
    }

    #[tokio::test]
    async fn test_batch_fails_when_roster_unreadable() {
        let mut registry = MockPlaylistRegistry::new();
        registry
            .expect_list_users()
            .returning(|| Err(AppError::Internal("connection refused".to_string())));

        let result = reconciler(MockMusicCatalog::new(), registry, MockTokenProvider::new())
            .run_scheduled_reconciliation(&ctx(RunTrigger::Scheduled))
            .await;

        tokio_test::assert_err!(result);
    }

    #[tokio::test]
    async fn test_deletion_removes_remote_playlists() {
        let mut registry = MockPlaylistRegistry::new();
        registry
            .expect_get_playlist_ids()
            .returning(|_| Ok(Some(playlists())));
        registry.expect_delete_user_and_related_data().returning(|_| {
            Ok(DeletionOutcome {
                success: true,
                message: "User data deleted".to_string(),
            })
        });

        let mut catalog = MockMusicCatalog::new();
        for playlist in ["ind-u", "grp-u"] {
            catalog
                .expect_unfollow_playlist()
                .with(eq(AccessToken("token-u".to_string())), eq(PlaylistId::from(playlist)))
                .times(1)
                .returning(|_, _| Ok(()));
        }

        let mut tokens = tokens();
        tokens.expect_forget().times(1).returning(|_| Ok(()));

        let outcome = reconciler(catalog, registry, tokens)
            .on_user_deleted(&ctx(RunTrigger::UserDeleted), &UserId::from("u"))
            .await;

        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_rejected_token_is_evicted_and_retried() {
        let mut registry = MockPlaylistRegistry::new();
        registry.expect_list_users().returning(|| {
            Ok(vec![RegisteredUser {
                user_id: UserId::from("u"),
                email: None,
            }])
        });
        registry
            .expect_get_playlist_ids()
            .returning(|_| Ok(Some(playlists())));
        registry
            .expect_written_tracks_since()
            .returning(|_, _| Ok(vec![]));

        // The first token came from the cache and has expired in the meantime
        let mut issued = 0;
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_get_valid_access_token()
            .times(2)
            .returning(move |_| {
                issued += 1;
                let token = if issued == 1 { "stale" } else { "fresh" };
                Ok(AccessToken(token.to_string()))
            });
        tokens
            .expect_forget()
            .with(eq(UserId::from("u")))
            .times(1)
            .returning(|_| Ok(()));

        let mut catalog = MockMusicCatalog::new();
        catalog
            .expect_current_profile()
            .returning(|token| match token.as_str() {
                "fresh" => Ok(Profile {
                    id: "acct-u".to_string(),
                    display_name: None,
                    email: None,
                }),
                _ => Err(AppError::Auth("The access token expired".to_string())),
            });
        catalog.expect_playlist_items().returning(|_, _| Ok(vec![]));
        catalog.expect_top_tracks().returning(|_, _, _| Ok(vec![]));
        catalog.expect_user_playlists().returning(|_, _| Ok(vec![]));

        let summary = reconciler(catalog, registry, tokens)
            .run_scheduled_reconciliation(&ctx(RunTrigger::Scheduled))
            .await
            .unwrap();

        assert_eq!(summary.reconciled, 1);
        assert_eq!(summary.outcomes[0].state, UserState::Reconciled);
    }

    #[tokio::test]
    async fn test_writing_flows_wait_for_the_running_one() {
        let mut registry = MockPlaylistRegistry::new();
        registry.expect_list_users().times(1).returning(|| Ok(vec![]));

        let reconciler = reconciler(MockMusicCatalog::new(), registry, MockTokenProvider::new());
        let running = reconciler.run_lock.clone().lock_owned().await;
        let patience = std::time::Duration::from_millis(50);

        let pass = tokio::time::timeout(
            patience,
            reconciler.run_scheduled_reconciliation(&ctx(RunTrigger::Scheduled)),
        )
        .await;
        assert!(pass.is_err());

        let follow = tokio::time::timeout(
            patience,
            reconciler.on_follow_created(
                &ctx(RunTrigger::FollowCreated),
                &UserId::from("a"),
                &UserId::from("b"),
            ),
        )
        .await;
        assert!(follow.is_err());

        drop(running);
        let summary = reconciler
            .run_scheduled_reconciliation(&ctx(RunTrigger::Scheduled))
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
    }
}
