use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    models::UserId,
    services::reconcile::{FollowOutcome, RunTrigger},
};

#[derive(Debug, Deserialize)]
pub struct CreateFollowRequest {
    pub user1: UserId,
    pub user2: UserId,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub user_id: UserId,
}

fn require_user_id(user_id: &UserId, field: &str) -> AppResult<()> {
    if user_id.0.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

pub async fn create_follow(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(request): Json<CreateFollowRequest>,
) -> AppResult<Json<Value>> {
    require_user_id(&request.user1, "user1")?;
    require_user_id(&request.user2, "user2")?;

    let ctx = request_id.run_context(RunTrigger::FollowCreated);
    let outcome = state
        .reconciler
        .on_follow_created(&ctx, &request.user1, &request.user2)
        .await?;

    let body = match outcome {
        FollowOutcome::SelfFollow => json!({
            "status": "null",
            "message": "User cannot follow themselves",
        }),
        FollowOutcome::Linked { new_edges } => json!({
            "status": "success",
            "message": "Follow relationship created",
            "new_edges": new_edges,
        }),
    };

    Ok(Json(body))
}

pub async fn user_created(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(request): Json<UserRequest>,
) -> AppResult<Json<Value>> {
    require_user_id(&request.user_id, "user_id")?;

    let ctx = request_id.run_context(RunTrigger::UserCreated);
    let outcome = state
        .reconciler
        .on_user_created(&ctx, &request.user_id)
        .await?;

    Ok(Json(json!({
        "status": "success",
        "message": "User provisioned",
        "result": outcome,
    })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(request): Json<UserRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_user_id(&request.user_id, "user_id")?;

    let ctx = request_id.run_context(RunTrigger::UserDeleted);
    let outcome = state
        .reconciler
        .on_user_deleted(&ctx, &request.user_id)
        .await;

    let (status, label) = if outcome.success {
        (StatusCode::OK, "success")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "error")
    };

    Ok((
        status,
        Json(json!({ "status": label, "message": outcome.message })),
    ))
}

pub async fn reconcile(
    State(state): State<AppState>,
    request_id: RequestId,
) -> AppResult<Json<Value>> {
    let ctx = request_id.run_context(RunTrigger::Scheduled);
    let summary = state.reconciler.run_scheduled_reconciliation(&ctx).await?;

    Ok(Json(json!({
        "status": "success",
        "summary": summary,
    })))
}
