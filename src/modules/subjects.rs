use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info};

use super::clearable;
use crate::web::{
    AppState, AuthUser,
    responses::{
        ApiError, ApiJson, ApiResult, Envelope, FieldErrors, ResourceId, Success, created, ok,
    },
};

const SUBJECT_COLUMNS: &str = "id, user_id, name, units, description, image_url, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subjects", get(index).post(store))
        .route(
            "/subjects/:id",
            get(show).put(update).patch(update).delete(destroy),
        )
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct SubjectRow {
    pub id: i64,
    pub user_id: i64,
    pub name: Option<String>,
    pub units: i32,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubjectInput {
    pub name: Option<String>,
    pub units: Option<Value>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubjectFields {
    pub name: Option<String>,
    pub units: i32,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// `None` keeps the stored value; `Some(None)` clears a nullable column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubjectPatch {
    pub name: Option<Option<String>>,
    pub units: Option<i32>,
    pub description: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
}

impl SubjectPatch {
    pub fn apply(self, current: &SubjectRow) -> SubjectFields {
        SubjectFields {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            units: self.units.unwrap_or(current.units),
            description: self
                .description
                .unwrap_or_else(|| current.description.clone()),
            image_url: self.image_url.unwrap_or_else(|| current.image_url.clone()),
        }
    }

    fn into_new(self) -> SubjectFields {
        SubjectFields {
            name: self.name.flatten(),
            units: self.units.unwrap_or(0),
            description: self.description.flatten(),
            image_url: self.image_url.flatten(),
        }
    }
}

#[derive(Serialize)]
struct SubjectPayload {
    subject: SubjectRow,
}

#[derive(Serialize)]
struct SubjectsPayload {
    subjects: Vec<SubjectRow>,
}

pub fn validate_subject(input: SubjectInput) -> Result<SubjectPatch, FieldErrors> {
    let mut errors = FieldErrors::new();
    let units = match input.units {
        None | Some(Value::Null) => None,
        Some(value) => match parse_units(&value) {
            Some(units) => Some(units),
            None => {
                errors.add("units", "The units field must be a non-negative integer.");
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(SubjectPatch {
        name: clearable(input.name),
        units,
        description: clearable(input.description),
        image_url: clearable(input.image_url),
    })
}

fn parse_units(value: &Value) -> Option<i32> {
    let units = match value {
        Value::Number(number) => number.as_i64()?,
        Value::String(raw) => raw.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if units < 0 {
        return None;
    }
    i32::try_from(units).ok()
}

async fn index(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Envelope<SubjectsPayload>>> {
    let subjects = sqlx::query_as::<_, SubjectRow>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
    ))
    .bind(user.id)
    .fetch_all(state.pool_ref())
    .await
    .map_err(|err| db_error("list", err))?;

    Ok(ok(SubjectsPayload { subjects }))
}

async fn show(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
) -> ApiResult<Json<Envelope<SubjectPayload>>> {
    let subject = find_owned(state.pool_ref(), user.id, id).await?;
    Ok(ok(SubjectPayload { subject }))
}

async fn store(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(input): ApiJson<SubjectInput>,
) -> ApiResult<(StatusCode, Json<Envelope<SubjectPayload>>)> {
    let fields = validate_subject(input)
        .map_err(ApiError::Validation)?
        .into_new();

    let subject = sqlx::query_as::<_, SubjectRow>(&format!(
        "INSERT INTO subjects (user_id, name, units, description, image_url)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {SUBJECT_COLUMNS}"
    ))
    .bind(user.id)
    .bind(&fields.name)
    .bind(fields.units)
    .bind(&fields.description)
    .bind(&fields.image_url)
    .fetch_one(state.pool_ref())
    .await
    .map_err(|err| db_error("create", err))?;

    info!(id = subject.id, user_id = user.id, "created subject");
    Ok(created(SubjectPayload { subject }))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
    ApiJson(input): ApiJson<SubjectInput>,
) -> ApiResult<Json<Envelope<SubjectPayload>>> {
    let pool = state.pool_ref();
    let current = find_owned(pool, user.id, id).await?;
    let fields = validate_subject(input)
        .map_err(ApiError::Validation)?
        .apply(&current);

    let subject = sqlx::query_as::<_, SubjectRow>(&format!(
        "UPDATE subjects SET name = $3, units = $4, description = $5, image_url = $6, updated_at = NOW()
         WHERE id = $1 AND user_id = $2
         RETURNING {SUBJECT_COLUMNS}"
    ))
    .bind(id)
    .bind(user.id)
    .bind(&fields.name)
    .bind(fields.units)
    .bind(&fields.description)
    .bind(&fields.image_url)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_error("update", err))?
    .ok_or(ApiError::NotFound)?;

    Ok(ok(SubjectPayload { subject }))
}

async fn destroy(
    State(state): State<AppState>,
    user: AuthUser,
    ResourceId(id): ResourceId,
) -> ApiResult<Json<Envelope<Success>>> {
    let result = sqlx::query("DELETE FROM subjects WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(state.pool_ref())
        .await
        .map_err(|err| db_error("delete", err))?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }

    info!(id, user_id = user.id, "deleted subject");
    Ok(ok(Success::done()))
}

async fn find_owned(pool: &PgPool, user_id: i64, id: i64) -> ApiResult<SubjectRow> {
    sqlx::query_as::<_, SubjectRow>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_error("show", err))?
    .ok_or(ApiError::NotFound)
}

fn db_error(action: &str, err: sqlx::Error) -> ApiError {
    error!(?err, action, "subject query failed");
    ApiError::internal("Server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> SubjectInput {
        serde_json::from_value(value).expect("subject input")
    }

    #[test]
    fn new_subject_defaults_units_to_zero() {
        let fields = validate_subject(input(json!({"name": "Calculus", "user_id": 3})))
            .expect("valid")
            .into_new();
        assert_eq!(fields.units, 0);
        assert_eq!(fields.name.as_deref(), Some("Calculus"));
    }

    #[test]
    fn units_accept_numbers_and_numeric_strings() {
        let from_number = validate_subject(input(json!({"units": 3}))).expect("valid");
        let from_string = validate_subject(input(json!({"units": " 4 "}))).expect("valid");
        assert_eq!(from_number.units, Some(3));
        assert_eq!(from_string.units, Some(4));
    }

    #[test]
    fn units_reject_negative_and_fractional() {
        assert!(validate_subject(input(json!({"units": -1}))).is_err());
        assert!(validate_subject(input(json!({"units": 1.5}))).is_err());
        assert!(validate_subject(input(json!({"units": "three"}))).is_err());
    }

    #[test]
    fn patch_keeps_unsupplied_fields() {
        let now = Utc::now();
        let current = SubjectRow {
            id: 4,
            user_id: 7,
            name: Some("Physics".to_string()),
            units: 3,
            description: Some("Mechanics".to_string()),
            image_url: Some("edutrail/a.png".to_string()),
            created_at: now,
            updated_at: now,
        };

        let merged = validate_subject(input(json!({"units": 5, "name": null})))
            .expect("valid")
            .apply(&current);

        assert_eq!(merged.units, 5);
        assert_eq!(merged.name.as_deref(), Some("Physics"));
        assert_eq!(merged.image_url.as_deref(), Some("edutrail/a.png"));

        let cleared = validate_subject(input(json!({"image_url": "", "description": " "})))
            .expect("valid")
            .apply(&current);
        assert_eq!(cleared.image_url, None);
        assert_eq!(cleared.description, None);
        assert_eq!(cleared.name.as_deref(), Some("Physics"));
    }
}
