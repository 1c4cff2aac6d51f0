//! Spotify friend playlists
//!
//! Every registered user gets a "My Top Tracks" playlist mirroring their own listening and a
//! "Friend Favorites" playlist aggregating the tracks of the people they follow. The
//! [`services::reconcile`] engine keeps both in sync; [`api`] exposes its triggers over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, AppResult};
