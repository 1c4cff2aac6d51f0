//! Playlist reconciliation engine
//!
//! Computes what a user's "My Top Tracks" and "Friend Favorites" playlists should hold and
//! applies it to the remote catalog:
//!
//! - [`dedup`]: order-preserving merge of track sequences
//! - [`contribution`]: the tracks one user exports to their followers
//! - [`planner`]: per-user individual target and group plan
//! - [`applier`]: replace-all and positional-insert writes against remote playlists
//! - [`driver`]: provisioning, follow, deletion and batch flows with per-user isolation

use std::sync::Arc;

use crate::services::{
    catalog::MusicCatalog, credentials::TokenProvider, registry::PlaylistRegistry,
};

pub mod applier;
pub mod context;
pub mod contribution;
pub mod dedup;
pub mod driver;
pub mod planner;

pub use applier::PlaylistSync;
pub use context::{RunContext, RunTrigger};
pub use contribution::{Contribution, ContributionBuilder, PlaylistSnapshot};
pub use dedup::merge_unique_ordered;
pub use driver::{
    BatchSummary, FollowEdge, FollowOutcome, ProvisionOutcome, Reconciler, UserOutcome, UserState,
};
pub use planner::{GroupPlan, Planner, ReconciliationPlan, SkippedFollowee};

/// Tunables of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    /// Cap on top tracks per user
    pub top_tracks_limit: usize,
    /// Cap on manual additions per user, applied before merging with top tracks
    pub recommendation_limit: usize,
    /// How far back manual additions count
    pub recommendation_window: chrono::Duration,
    /// Clear group playlists before a scheduled pass rebuilds them
    pub reset_group_playlist: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            top_tracks_limit: 3,
            recommendation_limit: 3,
            recommendation_window: chrono::Duration::days(7),
            reset_group_playlist: true,
        }
    }
}

/// Handles to the external collaborators, cheap to clone
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn MusicCatalog>,
    pub registry: Arc<dyn PlaylistRegistry>,
    pub tokens: Arc<dyn TokenProvider>,
}

impl Collaborators {
    pub fn new(
        catalog: Arc<dyn MusicCatalog>,
        registry: Arc<dyn PlaylistRegistry>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            catalog,
            registry,
            tokens,
        }
    }
}
