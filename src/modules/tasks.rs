use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, types::Json};
use tracing::{error, info};

use super::{clearable, non_blank, parse_due_date, parse_due_time, steps::Steps};
use crate::web::{
    AuthUser,
    responses::{ApiError, ApiResult, FieldErrors},
};

const TASK_COLUMNS: &str = "id, user_id, description, additional_notes, due_date, due_time, steps, image_url, status, created_at, updated_at";

/// Assignments and projects share one shape and differ only in their table and rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Assignment,
    Project,
}

impl TaskKind {
    fn table(self) -> &'static str {
        match self {
            TaskKind::Assignment => "assignments",
            TaskKind::Project => "projects",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Assignment => "assignment",
            TaskKind::Project => "project",
        }
    }

    fn requires_description(self) -> bool {
        matches!(self, TaskKind::Assignment)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    #[default]
    InProgress,
    Finished,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "finished" => Some(TaskStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub user_id: i64,
    pub description: Option<String>,
    pub additional_notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub steps: Json<Steps>,
    pub image_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw request body for create and update. Unknown keys such as `user_id` are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskInput {
    pub description: Option<String>,
    pub additional_notes: Option<String>,
    pub due_date: Option<String>,
    pub due_time: Option<String>,
    pub steps: Option<Value>,
    pub image_url: Option<String>,
    pub status: Option<String>,
}

/// Fully resolved column values written by insert and update.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskFields {
    pub description: Option<String>,
    pub additional_notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub steps: Steps,
    pub image_url: Option<String>,
    pub status: TaskStatus,
}

/// Supplied fields of an update; `None` keeps the stored value, `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskPatch {
    pub description: Option<String>,
    pub additional_notes: Option<Option<String>>,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub steps: Option<Steps>,
    pub image_url: Option<Option<String>>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn apply(self, current: &TaskRow) -> TaskFields {
        TaskFields {
            description: self.description.or_else(|| current.description.clone()),
            additional_notes: self
                .additional_notes
                .unwrap_or_else(|| current.additional_notes.clone()),
            due_date: self.due_date.or(current.due_date),
            due_time: self.due_time.or(current.due_time),
            steps: self.steps.unwrap_or_else(|| current.steps.0.clone()),
            image_url: self
                .image_url
                .unwrap_or_else(|| current.image_url.clone()),
            status: self
                .status
                .or_else(|| TaskStatus::parse(&current.status))
                .unwrap_or_default(),
        }
    }
}

pub fn validate_new(kind: TaskKind, mut input: TaskInput) -> Result<TaskFields, FieldErrors> {
    let steps = Steps::from_input(input.steps.take());
    let missing_description =
        kind.requires_description() && non_blank(input.description.clone()).is_none();

    let patch = validate_patch(input);
    if missing_description {
        let mut errors = patch.err().unwrap_or_default();
        errors.add("description", "The description field is required.");
        return Err(errors);
    }
    let patch = patch?;

    Ok(TaskFields {
        description: patch.description,
        additional_notes: patch.additional_notes.flatten(),
        due_date: patch.due_date,
        due_time: patch.due_time,
        steps,
        image_url: patch.image_url.flatten(),
        status: patch.status.unwrap_or_default(),
    })
}

pub fn validate_patch(input: TaskInput) -> Result<TaskPatch, FieldErrors> {
    let mut errors = FieldErrors::new();

    // A blank description counts as absent, so it never clears a required field.
    let description = non_blank(input.description);
    let due_date = non_blank(input.due_date).and_then(|raw| match parse_due_date(&raw) {
        Some(date) => Some(date),
        None => {
            errors.add("due_date", "The due date field must be a valid date.");
            None
        }
    });
    let due_time = non_blank(input.due_time).and_then(|raw| match parse_due_time(&raw) {
        Some(time) => Some(time),
        None => {
            errors.add("due_time", "The due time field must be a valid time.");
            None
        }
    });
    let status = non_blank(input.status).and_then(|raw| match TaskStatus::parse(&raw) {
        Some(status) => Some(status),
        None => {
            errors.add("status", "The selected status is invalid.");
            None
        }
    });

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(TaskPatch {
        description,
        additional_notes: clearable(input.additional_notes),
        due_date,
        due_time,
        steps: Steps::patch(input.steps),
        image_url: clearable(input.image_url),
        status,
    })
}

pub async fn list(pool: &PgPool, kind: TaskKind, user_id: i64) -> sqlx::Result<Vec<TaskRow>> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM {} WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        kind.table()
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn find(
    pool: &PgPool,
    kind: TaskKind,
    user_id: i64,
    id: i64,
) -> sqlx::Result<Option<TaskRow>> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM {} WHERE id = $1 AND user_id = $2",
        kind.table()
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn latest(pool: &PgPool, kind: TaskKind, user_id: i64) -> sqlx::Result<Option<TaskRow>> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM {} WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1",
        kind.table()
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn count(pool: &PgPool, kind: TaskKind, user_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE user_id = $1",
        kind.table()
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn insert(
    pool: &PgPool,
    kind: TaskKind,
    user_id: i64,
    fields: &TaskFields,
) -> sqlx::Result<TaskRow> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "INSERT INTO {} (user_id, description, additional_notes, due_date, due_time, steps, image_url, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {TASK_COLUMNS}",
        kind.table()
    ))
    .bind(user_id)
    .bind(&fields.description)
    .bind(&fields.additional_notes)
    .bind(fields.due_date)
    .bind(fields.due_time)
    .bind(Json(&fields.steps))
    .bind(&fields.image_url)
    .bind(fields.status.as_str())
    .fetch_one(pool)
    .await
}

/// Rewrites an owned row; `None` when the row is gone or belongs to someone else.
pub async fn update(
    pool: &PgPool,
    kind: TaskKind,
    user_id: i64,
    id: i64,
    fields: &TaskFields,
) -> sqlx::Result<Option<TaskRow>> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "UPDATE {} SET description = $3, additional_notes = $4, due_date = $5, due_time = $6,
             steps = $7, image_url = $8, status = $9, updated_at = NOW()
         WHERE id = $1 AND user_id = $2
         RETURNING {TASK_COLUMNS}",
        kind.table()
    ))
    .bind(id)
    .bind(user_id)
    .bind(&fields.description)
    .bind(&fields.additional_notes)
    .bind(fields.due_date)
    .bind(fields.due_time)
    .bind(Json(&fields.steps))
    .bind(&fields.image_url)
    .bind(fields.status.as_str())
    .fetch_optional(pool)
    .await
}

pub async fn delete(pool: &PgPool, kind: TaskKind, user_id: i64, id: i64) -> sqlx::Result<bool> {
    sqlx::query(&format!(
        "DELETE FROM {} WHERE id = $1 AND user_id = $2",
        kind.table()
    ))
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await
    .map(|result| result.rows_affected() > 0)
}

pub(crate) fn db_error(kind: TaskKind, action: &str, err: sqlx::Error) -> ApiError {
    error!(?err, kind = kind.label(), action, "task query failed");
    ApiError::internal("Server error")
}

pub async fn list_for(pool: &PgPool, kind: TaskKind, user: &AuthUser) -> ApiResult<Vec<TaskRow>> {
    list(pool, kind, user.id)
        .await
        .map_err(|err| db_error(kind, "list", err))
}

pub async fn show_for(
    pool: &PgPool,
    kind: TaskKind,
    user: &AuthUser,
    id: i64,
) -> ApiResult<TaskRow> {
    find(pool, kind, user.id, id)
        .await
        .map_err(|err| db_error(kind, "show", err))?
        .ok_or(ApiError::NotFound)
}

pub async fn create_for(
    pool: &PgPool,
    kind: TaskKind,
    user: &AuthUser,
    fields: TaskFields,
) -> ApiResult<TaskRow> {
    let row = insert(pool, kind, user.id, &fields)
        .await
        .map_err(|err| db_error(kind, "create", err))?;
    info!(
        kind = kind.label(),
        id = row.id,
        user_id = user.id,
        steps = row.steps.0.0.len(),
        "created record"
    );
    Ok(row)
}

pub async fn update_for(
    pool: &PgPool,
    kind: TaskKind,
    user: &AuthUser,
    id: i64,
    input: TaskInput,
) -> ApiResult<TaskRow> {
    let current = show_for(pool, kind, user, id).await?;
    let patch = validate_patch(input).map_err(ApiError::Validation)?;
    let fields = patch.apply(&current);

    update(pool, kind, user.id, id, &fields)
        .await
        .map_err(|err| db_error(kind, "update", err))?
        .ok_or(ApiError::NotFound)
}

pub async fn delete_for(pool: &PgPool, kind: TaskKind, user: &AuthUser, id: i64) -> ApiResult<()> {
    let removed = delete(pool, kind, user.id, id)
        .await
        .map_err(|err| db_error(kind, "delete", err))?;
    if !removed {
        return Err(ApiError::NotFound);
    }
    info!(kind = kind.label(), id, user_id = user.id, "deleted record");
    Ok(())
}
