//! In-memory collaborators for driving the reconciler without Spotify, Postgres or Redis
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use spotifriends::{
    error::{AppError, AppResult},
    models::{
        AccessToken, CreatedPlaylist, DeletionOutcome, NewPlaylist, PlaylistId, PlaylistItem,
        PlaylistSummary, Profile, RegisteredUser, TimeRange, Track, TrackUri, UserId,
        UserPlaylists, UserRef,
    },
    services::{
        catalog::MAX_TRACKS_PER_REQUEST,
        reconcile::{Collaborators, ReconcileSettings},
        registry::{PlaylistOwner, WrittenTrack},
        MusicCatalog, PlaylistRegistry, Reconciler, TokenProvider,
    },
};

pub fn token_of(user: &str) -> AccessToken {
    AccessToken(format!("token-{}", user))
}

pub fn account_of(user: &str) -> String {
    format!("acct-{}", user)
}

pub fn uris(items: &[&str]) -> Vec<TrackUri> {
    items.iter().map(|s| TrackUri::from(*s)).collect()
}

struct FakePlaylist {
    name: String,
    public: bool,
    items: Vec<PlaylistItem>,
}

#[derive(Default)]
struct CatalogState {
    accounts: HashMap<String, String>,
    playlists: HashMap<PlaylistId, FakePlaylist>,
    follows: HashMap<String, Vec<PlaylistId>>,
    top_tracks: HashMap<(String, TimeRange), Vec<TrackUri>>,
    next_playlist: usize,
    writes: usize,
}

/// Catalog keyed by `token-{user}` tokens resolving to `acct-{user}` accounts
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn add_account(&self, user: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .accounts
            .insert(token_of(user).0, account_of(user));
    }

    pub fn set_top_tracks(&self, user: &str, range: TimeRange, tracks: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .top_tracks
            .insert((account_of(user), range), uris(tracks));
    }

    /// Follows a playlist remotely without going through the reconciler
    pub fn follow(&self, user: &str, playlist_id: &PlaylistId) {
        let mut state = self.state.lock().unwrap();
        let follows = state.follows.entry(account_of(user)).or_default();
        if !follows.contains(playlist_id) {
            follows.push(playlist_id.clone());
        }
    }

    pub fn is_following(&self, user: &str, playlist_id: &PlaylistId) -> bool {
        self.state
            .lock()
            .unwrap()
            .follows
            .get(&account_of(user))
            .map(|f| f.contains(playlist_id))
            .unwrap_or(false)
    }

    pub fn track_uris(&self, playlist_id: &PlaylistId) -> Vec<TrackUri> {
        self.state
            .lock()
            .unwrap()
            .playlists
            .get(playlist_id)
            .map(|p| {
                p.items
                    .iter()
                    .filter_map(|item| item.track.as_ref().map(|t| t.uri.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn playlist_count(&self) -> usize {
        self.state.lock().unwrap().playlists.len()
    }

    pub fn playlist_name(&self, playlist_id: &PlaylistId) -> Option<(String, bool)> {
        self.state
            .lock()
            .unwrap()
            .playlists
            .get(playlist_id)
            .map(|p| (p.name.clone(), p.public))
    }

    /// Number of add/remove calls served so far
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    fn account(&self, token: &AccessToken) -> AppResult<String> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(token.as_str())
            .cloned()
            .ok_or_else(|| AppError::Auth("The access token expired".to_string()))
    }

    fn check_batch(uris: &[TrackUri]) -> AppResult<()> {
        if uris.len() > MAX_TRACKS_PER_REQUEST {
            return Err(AppError::RemoteApi {
                status: 400,
                message: "Too many tracks requested".to_string(),
            });
        }
        Ok(())
    }

    fn missing(playlist_id: &PlaylistId) -> AppError {
        AppError::RemoteApi {
            status: 404,
            message: format!("Playlist {} not found", playlist_id),
        }
    }
}

#[async_trait::async_trait]
impl MusicCatalog for InMemoryCatalog {
    async fn current_profile(&self, token: &AccessToken) -> AppResult<Profile> {
        Ok(Profile {
            id: self.account(token)?,
            display_name: None,
            email: None,
        })
    }

    async fn create_playlist(
        &self,
        token: &AccessToken,
        owner_id: &str,
        playlist: &NewPlaylist,
    ) -> AppResult<CreatedPlaylist> {
        let account = self.account(token)?;
        assert_eq!(account, owner_id);

        let mut state = self.state.lock().unwrap();
        state.next_playlist += 1;
        let id = PlaylistId(format!("pl-{}", state.next_playlist));
        state.playlists.insert(
            id.clone(),
            FakePlaylist {
                name: playlist.name.clone(),
                public: playlist.public,
                items: Vec::new(),
            },
        );
        // Owners follow their own playlists
        state.follows.entry(account).or_default().push(id.clone());

        Ok(CreatedPlaylist {
            id,
            name: playlist.name.clone(),
        })
    }

    async fn playlist_items(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<Vec<PlaylistItem>> {
        self.account(token)?;
        self.state
            .lock()
            .unwrap()
            .playlists
            .get(playlist_id)
            .map(|p| p.items.clone())
            .ok_or_else(|| Self::missing(playlist_id))
    }

    async fn add_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        uris: &[TrackUri],
        position: Option<usize>,
    ) -> AppResult<()> {
        let account = self.account(token)?;
        Self::check_batch(uris)?;

        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        let playlist = state
            .playlists
            .get_mut(playlist_id)
            .ok_or_else(|| Self::missing(playlist_id))?;

        let added_at = Utc::now();
        let new_items = uris.iter().map(|uri| PlaylistItem {
            added_at: Some(added_at),
            added_by: Some(UserRef {
                id: account.clone(),
            }),
            track: Some(Track {
                uri: uri.clone(),
                name: uri.to_string(),
                artists: vec![],
            }),
        });

        let at = position
            .unwrap_or(playlist.items.len())
            .min(playlist.items.len());
        playlist.items.splice(at..at, new_items);
        Ok(())
    }

    async fn remove_tracks(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        uris: &[TrackUri],
    ) -> AppResult<()> {
        self.account(token)?;
        Self::check_batch(uris)?;

        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        let playlist = state
            .playlists
            .get_mut(playlist_id)
            .ok_or_else(|| Self::missing(playlist_id))?;

        let removed: HashSet<&TrackUri> = uris.iter().collect();
        playlist.items.retain(|item| {
            item.track
                .as_ref()
                .map(|t| !removed.contains(&t.uri))
                .unwrap_or(true)
        });
        Ok(())
    }

    async fn follow_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
        _public: bool,
    ) -> AppResult<()> {
        let account = self.account(token)?;
        let mut state = self.state.lock().unwrap();
        let follows = state.follows.entry(account).or_default();
        if !follows.contains(playlist_id) {
            follows.push(playlist_id.clone());
        }
        Ok(())
    }

    async fn unfollow_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<()> {
        let account = self.account(token)?;
        if let Some(follows) = self.state.lock().unwrap().follows.get_mut(&account) {
            follows.retain(|id| id != playlist_id);
        }
        Ok(())
    }

    async fn is_following_playlist(
        &self,
        token: &AccessToken,
        playlist_id: &PlaylistId,
    ) -> AppResult<bool> {
        let account = self.account(token)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .follows
            .get(&account)
            .map(|f| f.contains(playlist_id))
            .unwrap_or(false))
    }

    async fn top_tracks(
        &self,
        token: &AccessToken,
        time_range: TimeRange,
        limit: usize,
    ) -> AppResult<Vec<Track>> {
        let account = self.account(token)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .top_tracks
            .get(&(account, time_range))
            .map(|tracks| {
                tracks
                    .iter()
                    .take(limit)
                    .map(|uri| Track {
                        uri: uri.clone(),
                        name: uri.to_string(),
                        artists: vec![],
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn user_playlists(
        &self,
        token: &AccessToken,
        account_id: &str,
    ) -> AppResult<Vec<PlaylistSummary>> {
        self.account(token)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .follows
            .get(account_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| PlaylistSummary {
                        id: id.clone(),
                        name: state
                            .playlists
                            .get(id)
                            .map(|p| p.name.clone())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct RegistryState {
    users: Vec<RegisteredUser>,
    playlists: HashMap<UserId, (Option<PlaylistId>, Option<PlaylistId>)>,
    edges: Vec<(UserId, UserId)>,
    written: HashMap<(UserId, TrackUri), DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    pub fn add_user(&self, user: &str) {
        self.state.lock().unwrap().users.push(RegisteredUser {
            user_id: UserId::from(user),
            email: Some(format!("{}@example.com", user)),
        });
    }

    pub fn edges(&self) -> Vec<(UserId, UserId)> {
        self.state.lock().unwrap().edges.clone()
    }
}

#[async_trait::async_trait]
impl PlaylistRegistry for InMemoryRegistry {
    async fn list_users(&self) -> AppResult<Vec<RegisteredUser>> {
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn user_email(&self, user_id: &UserId) -> AppResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| &u.user_id == user_id)
            .and_then(|u| u.email.clone()))
    }

    async fn get_playlist_ids(&self, user_id: &UserId) -> AppResult<Option<UserPlaylists>> {
        Ok(match self.state.lock().unwrap().playlists.get(user_id) {
            Some((Some(individual), Some(group))) => Some(UserPlaylists {
                individual: individual.clone(),
                group: group.clone(),
            }),
            _ => None,
        })
    }

    async fn register_playlists(
        &self,
        user_id: &UserId,
        _email: Option<String>,
        individual: Option<PlaylistId>,
        group: Option<PlaylistId>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.playlists.entry(user_id.clone()).or_default();
        if individual.is_some() {
            entry.0 = individual;
        }
        if group.is_some() {
            entry.1 = group;
        }
        Ok(())
    }

    async fn owners_of_individual_playlists(
        &self,
        playlist_ids: &[PlaylistId],
    ) -> AppResult<Vec<PlaylistOwner>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .playlists
            .iter()
            .filter_map(|(user_id, (individual, _))| {
                individual
                    .as_ref()
                    .filter(|id| playlist_ids.contains(id))
                    .map(|id| PlaylistOwner {
                        user_id: user_id.clone(),
                        playlist_id: id.clone(),
                    })
            })
            .collect())
    }

    async fn followees(&self, follower: &UserId) -> AppResult<Vec<UserId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .edges
            .iter()
            .filter(|(f, _)| f == follower)
            .map(|(_, followee)| followee.clone())
            .collect())
    }

    async fn record_follow_edge(&self, follower: &UserId, followee: &UserId) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let edge = (follower.clone(), followee.clone());
        if !state.edges.contains(&edge) {
            state.edges.push(edge);
        }
        Ok(())
    }

    async fn record_written_tracks(
        &self,
        user_id: &UserId,
        uris: &[TrackUri],
        written_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        for uri in uris {
            state
                .written
                .insert((user_id.clone(), uri.clone()), written_at);
        }
        Ok(())
    }

    async fn written_tracks_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<WrittenTrack>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .written
            .iter()
            .filter(|((owner, _), at)| owner == user_id && **at >= since)
            .map(|((_, uri), at)| WrittenTrack {
                uri: uri.clone(),
                written_at: *at,
            })
            .collect())
    }

    async fn delete_user_and_related_data(&self, user_id: &UserId) -> AppResult<DeletionOutcome> {
        let mut state = self.state.lock().unwrap();
        state.playlists.remove(user_id);
        state.written.retain(|(owner, _), _| owner != user_id);
        state
            .edges
            .retain(|(follower, followee)| follower != user_id && followee != user_id);
        state.users.retain(|u| &u.user_id != user_id);
        Ok(DeletionOutcome {
            success: true,
            message: format!("Deleted data for user {}", user_id),
        })
    }
}

/// Hands out `token-{user}` unless the user is marked as failing
#[derive(Default)]
pub struct StaticTokens {
    failing: Mutex<HashSet<UserId>>,
}

impl StaticTokens {
    pub fn fail_for(&self, user: &str) {
        self.failing.lock().unwrap().insert(UserId::from(user));
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokens {
    async fn get_valid_access_token(&self, user_id: &UserId) -> AppResult<AccessToken> {
        if self.failing.lock().unwrap().contains(user_id) {
            return Err(AppError::Auth(format!("Token refresh failed for {}", user_id)));
        }
        Ok(token_of(&user_id.0))
    }

    async fn forget(&self, _user_id: &UserId) -> AppResult<()> {
        Ok(())
    }
}

/// Fakes plus a reconciler wired to them
pub struct World {
    pub catalog: Arc<InMemoryCatalog>,
    pub registry: Arc<InMemoryRegistry>,
    pub tokens: Arc<StaticTokens>,
}

impl World {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::default()),
            registry: Arc::new(InMemoryRegistry::default()),
            tokens: Arc::new(StaticTokens::default()),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        self.reconciler_with(ReconcileSettings::default())
    }

    pub fn reconciler_with(&self, settings: ReconcileSettings) -> Reconciler {
        Reconciler::new(
            Collaborators::new(
                self.catalog.clone(),
                self.registry.clone(),
                self.tokens.clone(),
            ),
            settings,
        )
    }

    /// Registers credentials for a user who has not been provisioned yet
    pub fn sign_up(&self, user: &str, top_tracks: &[&str]) {
        self.registry.add_user(user);
        self.catalog.add_account(user);
        self.catalog
            .set_top_tracks(user, TimeRange::ShortTerm, top_tracks);
    }

    pub async fn playlists(&self, user: &str) -> UserPlaylists {
        self.registry
            .get_playlist_ids(&UserId::from(user))
            .await
            .unwrap()
            .expect("user is provisioned")
    }
}
