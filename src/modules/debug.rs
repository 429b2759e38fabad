//! Local-development helpers for seeding and inspecting another user's projects.
//!
//! Every handler answers 403 unless `APP_ENV` is `local`.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::tasks::{self, TaskInput, TaskKind, TaskRow};
use crate::web::{
    AppState,
    responses::{ApiError, ApiJson, ApiResult, Envelope, created, ok},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/debug/projects", get(list_projects).post(create_project))
}

#[derive(Deserialize)]
struct UserQuery {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct DebugProjectInput {
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(flatten)]
    task: TaskInput,
}

#[derive(Serialize)]
struct ProjectPayload {
    project: TaskRow,
}

#[derive(Serialize)]
struct ProjectsPayload {
    projects: Vec<TaskRow>,
}

fn ensure_local(state: &AppState) -> ApiResult<()> {
    if state.config().app_env.is_local() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn required_user_id(raw: Option<i64>) -> ApiResult<i64> {
    raw.filter(|id| *id > 0)
        .ok_or_else(|| ApiError::field("user_id", "The user id field is required."))
}

async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Envelope<ProjectsPayload>>> {
    ensure_local(&state)?;
    let user_id = required_user_id(query.user_id.and_then(|raw| raw.trim().parse().ok()))?;

    let projects = tasks::list(state.pool_ref(), TaskKind::Project, user_id)
        .await
        .map_err(|err| tasks::db_error(TaskKind::Project, "debug list", err))?;

    Ok(ok(ProjectsPayload { projects }))
}

async fn create_project(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<DebugProjectInput>,
) -> ApiResult<(StatusCode, Json<Envelope<ProjectPayload>>)> {
    ensure_local(&state)?;
    let user_id = required_user_id(input.user_id)?;
    let fields = tasks::validate_new(TaskKind::Project, input.task).map_err(ApiError::Validation)?;

    let project = match tasks::insert(state.pool_ref(), TaskKind::Project, user_id, &fields).await {
        Ok(project) => project,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => {
            return Err(ApiError::field("user_id", "The selected user id is invalid."));
        }
        Err(err) => {
            error!(?err, user_id, "debug project insert failed");
            return Err(ApiError::internal("Server error"));
        }
    };

    info!(user_id, project_id = project.id, "debug route created project for user");
    Ok(created(ProjectPayload { project }))
}
