use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::UserId;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// No valid access token could be obtained for a user
    #[error("Authorization error: {0}")]
    Auth(String),

    /// The user has no registered playlists
    #[error("User {0} has not been provisioned")]
    NotProvisioned(UserId),

    /// Non-success response from the music catalog (rate limit, permission denied, ...)
    #[error("Remote API error ({status}): {message}")]
    RemoteApi { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    /// Wraps an error with the name of the flow step that produced it
    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Returns the innermost error, skipping step annotations
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotProvisioned(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::RemoteApi { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Step { source, .. } => source.status_code(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            AppError::Step { step, source } => json!({
                "status": "error",
                "step": step,
                "message": source.to_string(),
            }),
            other => json!({
                "status": "error",
                "message": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Attaches a step name to the error of a fallible flow step
pub trait StepContext<T> {
    fn at_step(self, step: &'static str) -> AppResult<T>;
}

impl<T> StepContext<T> for AppResult<T> {
    fn at_step(self, step: &'static str) -> AppResult<T> {
        self.map_err(|e| match e {
            // Keep the innermost step, it is the most precise one
            step_error @ AppError::Step { .. } => step_error,
            other => AppError::Step {
                step,
                source: Box::new(other),
            },
        })
    }
}
