use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use serde::Serialize;

use super::tasks::{self, TaskInput, TaskKind, TaskRow};
use crate::web::{
    AppState, AuthUser,
    responses::{ApiError, ApiJson, ApiResult, Envelope, ResourceId, Success, created, ok},
};

const KIND: TaskKind = TaskKind::Assignment;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assignments", get(index).post(store))
        .route(
            "/assignments/:id",
            get(show).put(update).patch(update).delete(destroy),
        )
}

#[derive(Serialize)]
struct AssignmentPayload {
    assignment: TaskRow,
}

#[derive(Serialize)]
struct AssignmentsPayload {
    assignments: Vec<TaskRow>,
}

async fn index(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Envelope<AssignmentsPayload>>> {
    let assignments = tasks::list_for(state.pool_ref(), KIND, &user).await?;
    Ok(ok(AssignmentsPayload { assignments }))
}

async fn show(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
) -> ApiResult<Json<Envelope<AssignmentPayload>>> {
    let assignment = tasks::show_for(state.pool_ref(), KIND, &user, id).await?;
    Ok(ok(AssignmentPayload { assignment }))
}

async fn store(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(input): ApiJson<TaskInput>,
) -> ApiResult<(StatusCode, Json<Envelope<AssignmentPayload>>)> {
    let fields = tasks::validate_new(KIND, input).map_err(ApiError::Validation)?;
    let assignment = tasks::create_for(state.pool_ref(), KIND, &user, fields).await?;
    Ok(created(AssignmentPayload { assignment }))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
    ApiJson(input): ApiJson<TaskInput>,
) -> ApiResult<Json<Envelope<AssignmentPayload>>> {
    let assignment = tasks::update_for(state.pool_ref(), KIND, &user, id, input).await?;
    Ok(ok(AssignmentPayload { assignment }))
}

async fn destroy(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
) -> ApiResult<Json<Envelope<Success>>> {
    tasks::delete_for(state.pool_ref(), KIND, &user, id).await?;
    Ok(ok(Success::done()))
}
