use std::sync::Arc;

use crate::{
    config::Config,
    db::{create_pool, create_redis_client, run_migrations, Cache, CacheWriterHandle, PgRegistry},
    services::{
        reconcile::Collaborators, CredentialService, MusicCatalog, Reconciler, SpotifyAccounts,
        SpotifyCatalog,
    },
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
        }
    }

    /// Connects Postgres and Redis and wires the Spotify-backed collaborators
    ///
    /// The returned handle must be shut down on exit so queued cache writes are flushed.
    pub async fn from_config(config: &Config) -> anyhow::Result<(Self, CacheWriterHandle)> {
        let db_pool = create_pool(&config.database_url).await?;
        run_migrations(&db_pool).await?;

        let redis_client = create_redis_client(&config.redis_url)?;
        let (cache, cache_handle) = Cache::new(redis_client).await;

        let catalog: Arc<dyn MusicCatalog> =
            Arc::new(SpotifyCatalog::new(config.spotify_api_url.clone()));
        let accounts = SpotifyAccounts::new(
            config.spotify_accounts_url.clone(),
            config.spotify_client_id.clone(),
            config.spotify_client_secret.clone(),
        );
        let tokens = CredentialService::new(db_pool.clone(), cache, catalog.clone(), accounts);
        let registry = PgRegistry::new(db_pool);

        let reconciler = Reconciler::new(
            Collaborators::new(catalog, Arc::new(registry), Arc::new(tokens)),
            config.reconcile_settings(),
        );

        Ok((Self::new(reconciler), cache_handle))
    }
}
