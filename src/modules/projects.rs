use axum::{
    Json, Router,
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderMap, StatusCode, header},
    routing::get,
};
use serde::Serialize;
use serde_json::Value;
use tokio::try_join;
use tracing::{error, info};

use super::tasks::{self, TaskInput, TaskKind, TaskRow};
use crate::web::{
    AppState, AuthUser,
    responses::{ApiError, ApiJson, ApiResult, Envelope, ResourceId, Success, created, ok},
    storage::UPLOAD_BUCKET,
    uploads::{ImageFieldConfig, UploadOutcome, read_image_form},
};

const KIND: TaskKind = TaskKind::Project;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(index).post(store))
        .route("/projects/count", get(count))
        .route("/projects/latest", get(latest))
        .route("/projects/summary", get(summary))
        .route(
            "/projects/:id",
            get(show).put(update).patch(update).delete(destroy),
        )
}

#[derive(Serialize)]
struct ProjectPayload {
    project: TaskRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_public_url: Option<String>,
}

impl ProjectPayload {
    fn new(project: TaskRow) -> Self {
        Self {
            project,
            image_public_url: None,
        }
    }
}

#[derive(Serialize)]
struct ProjectsPayload {
    projects: Vec<TaskRow>,
}

#[derive(Serialize)]
struct CountPayload {
    count: i64,
}

#[derive(Serialize)]
struct LatestPayload {
    project: Option<TaskRow>,
}

#[derive(Serialize)]
struct SummaryPayload {
    count: i64,
    latest: Option<TaskRow>,
}

async fn index(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Envelope<ProjectsPayload>>> {
    let projects = tasks::list_for(state.pool_ref(), KIND, &user).await?;
    Ok(ok(ProjectsPayload { projects }))
}

async fn show(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
) -> ApiResult<Json<Envelope<ProjectPayload>>> {
    let project = tasks::show_for(state.pool_ref(), KIND, &user, id).await?;
    Ok(ok(ProjectPayload::new(project)))
}

/// Accepts a JSON body, or a multipart form whose optional `file` becomes the project image.
async fn store(
    State(state): State<AppState>,
    user: AuthUser,
    request: Request,
) -> ApiResult<(StatusCode, Json<Envelope<ProjectPayload>>)> {
    let (input, form) = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|rejection| ApiError::field("body", rejection.body_text()))?;
        let form = read_image_form(multipart, ImageFieldConfig::optional("file")).await?;
        (input_from_form(&form), Some(form))
    } else {
        let ApiJson(input) = ApiJson::<TaskInput>::from_request(request, &state).await?;
        (input, None)
    };

    let mut fields = tasks::validate_new(KIND, input).map_err(ApiError::Validation)?;

    let mut image_public_url = None;
    if let Some(image) = form.and_then(|form| form.image) {
        match state.disk().store(UPLOAD_BUCKET, &image).await {
            Ok(stored) => {
                info!(user_id = user.id, path = %stored.path, "stored project image");
                fields.image_url = Some(stored.path);
                image_public_url = Some(stored.public_url);
            }
            // The project is still created; the client can attach an image later.
            Err(err) => error!(
                kind = ?err.kind(),
                message = err.message(),
                user_id = user.id,
                "failed to store project image"
            ),
        }
    }

    let project = tasks::create_for(state.pool_ref(), KIND, &user, fields).await?;
    Ok(created(ProjectPayload {
        project,
        image_public_url,
    }))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
    ApiJson(input): ApiJson<TaskInput>,
) -> ApiResult<Json<Envelope<ProjectPayload>>> {
    let project = tasks::update_for(state.pool_ref(), KIND, &user, id, input).await?;
    Ok(ok(ProjectPayload::new(project)))
}

async fn destroy(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
) -> ApiResult<Json<Envelope<Success>>> {
    tasks::delete_for(state.pool_ref(), KIND, &user, id).await?;
    Ok(ok(Success::done()))
}

async fn count(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Envelope<CountPayload>>> {
    let count = tasks::count(state.pool_ref(), KIND, user.id)
        .await
        .map_err(|err| tasks::db_error(KIND, "count", err))?;
    Ok(ok(CountPayload { count }))
}

async fn latest(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Envelope<LatestPayload>>> {
    let project = tasks::latest(state.pool_ref(), KIND, user.id)
        .await
        .map_err(|err| tasks::db_error(KIND, "latest", err))?;
    Ok(ok(LatestPayload { project }))
}

async fn summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Envelope<SummaryPayload>>> {
    let pool = state.pool_ref();
    let (count, latest) = try_join!(
        tasks::count(pool, KIND, user.id),
        tasks::latest(pool, KIND, user.id)
    )
    .map_err(|err| tasks::db_error(KIND, "summary", err))?;

    Ok(ok(SummaryPayload { count, latest }))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .is_some_and(|mime| mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA)
}

/// Text fields of a multipart project form; `steps` arrives as a JSON-encoded string.
fn input_from_form(form: &UploadOutcome) -> TaskInput {
    let text = |name: &str| form.first_text(name).map(str::to_string);
    TaskInput {
        description: text("description"),
        additional_notes: text("additional_notes"),
        due_date: text("due_date"),
        due_time: text("due_time"),
        steps: text("steps").map(Value::String),
        image_url: text("image_url"),
        status: text("status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn detects_multipart_bodies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=X-BOUNDARY"),
        );
        assert!(is_multipart(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_multipart(&headers));

        assert!(!is_multipart(&HeaderMap::new()));
    }

    #[test]
    fn form_fields_feed_task_validation() {
        let mut form = UploadOutcome::default();
        form.text_fields
            .insert("description".to_string(), vec!["Essay".to_string()]);
        form.text_fields.insert(
            "steps".to_string(),
            vec![r#"[{"label":"Draft","done":false}]"#.to_string()],
        );
        form.text_fields
            .insert("user_id".to_string(), vec!["99".to_string()]);

        let fields = tasks::validate_new(KIND, input_from_form(&form)).expect("valid");
        assert_eq!(fields.description.as_deref(), Some("Essay"));
        assert_eq!(fields.steps.0, vec![json!({"label": "Draft", "done": false})]);
    }
}
