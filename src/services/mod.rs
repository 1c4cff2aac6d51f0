pub mod catalog;
pub mod credentials;
pub mod reconcile;
pub mod registry;

pub use catalog::{MusicCatalog, SpotifyCatalog};
pub use credentials::{CredentialService, SpotifyAccounts, TokenProvider};
pub use reconcile::{Reconciler, RunContext, RunTrigger};
pub use registry::PlaylistRegistry;
