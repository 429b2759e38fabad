use std::sync::LazyLock;

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json, async_trait,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::web::{
    AppState,
    responses::{ApiError, ApiJson, ApiResult, Envelope, FieldErrors, Success, created, ok},
};

pub const SESSION_COOKIE: &str = "edutrail_session";
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";

const MAX_NAME_LEN: usize = 255;
const MIN_PASSWORD_LEN: usize = 6;

/// Hash checked when the email is unknown, so both login failures cost one argon2 verification.
static UNKNOWN_ACCOUNT_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("edutrail-unknown-account").ok());

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, sqlx::FromRow)]
pub struct DbUserAuth {
    pub id: i64,
    pub password_hash: String,
}

/// Identity of the caller, resolved from the session cookie for each request.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i64,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = session_token(&jar).ok_or(ApiError::Unauthenticated)?;

        match fetch_user_by_session(state.pool_ref(), token).await {
            Ok(Some(user)) => Ok(AuthUser { id: user.id, user }),
            Ok(None) => Err(ApiError::Unauthenticated),
            Err(err) => {
                error!(?err, "failed to resolve session");
                Err(ApiError::internal("Server error"))
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SignUpRequest {
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_confirmation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserPayload {
    pub user: Option<User>,
}

#[derive(Serialize)]
pub struct SessionPayload {
    pub session: bool,
}

pub async fn sign_up(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignUpRequest>,
) -> ApiResult<(StatusCode, Json<Envelope<UserPayload>>)> {
    let new_user = validate_sign_up(&request).map_err(ApiError::Validation)?;
    let pool = state.pool_ref();

    let taken = email_taken(pool, &new_user.email).await.map_err(|err| {
        error!(?err, "failed to check email uniqueness");
        ApiError::internal("Unexpected error during registration")
    })?;
    if taken {
        return Err(email_taken_error());
    }

    let password_hash = hash_password(&new_user.password).map_err(|err| {
        error!(?err, "failed to hash password during registration");
        ApiError::internal("Unexpected error during registration")
    })?;

    let result = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email, password_hash) VALUES ($1, $2, $3)
         RETURNING id, name, email, created_at, updated_at",
    )
    .bind(&new_user.name)
    .bind(&new_user.email)
    .bind(password_hash)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => {
            info!(user_id = user.id, "registered user");
            Ok(created(UserPayload { user: Some(user) }))
        }
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            Err(email_taken_error())
        }
        Err(err) => {
            error!(?err, "failed to insert user");
            Err(ApiError::internal("Unexpected error during registration"))
        }
    }
}

pub async fn sign_in(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(request): ApiJson<SignInRequest>,
) -> ApiResult<(CookieJar, Json<Envelope<UserPayload>>)> {
    let (email, password) = validate_sign_in(&request).map_err(ApiError::Validation)?;
    let pool = state.pool_ref();

    let credentials = fetch_user_by_email(pool, &email).await.map_err(|err| {
        error!(?err, "failed to fetch user during login");
        ApiError::internal("Server error")
    })?;
    let Some(credentials) = credentials else {
        verify_unknown_account(&password);
        return Err(ApiError::InvalidCredentials);
    };
    if !verify_password(&password, &credentials.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    // A token presented before login is never reused afterwards.
    if let Some(previous) = session_token(&jar) {
        if let Err(err) = delete_session(pool, previous).await {
            warn!(?err, "failed to drop pre-login session");
        }
    }

    let config = state.config();
    let token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(config.session_ttl_days);
    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(credentials.id)
        .bind(expires_at)
        .execute(pool)
        .await
        .map_err(|err| {
            error!(?err, "failed to create session");
            ApiError::internal("Server error")
        })?;

    let user = fetch_user_by_session(pool, token)
        .await
        .map_err(|err| {
            error!(?err, "failed to load user after login");
            ApiError::internal("Server error")
        })?
        .ok_or_else(|| ApiError::internal("Server error"))?;

    info!(user_id = user.id, "user signed in");
    let jar = jar
        .add(session_cookie(token, config))
        .add(xsrf_cookie(config));
    Ok((jar, ok(UserPayload { user: Some(user) })))
}

pub async fn sign_out(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<Envelope<Success>>)> {
    if let Some(token) = session_token(&jar) {
        delete_session(state.pool_ref(), token).await.map_err(|err| {
            error!(?err, "failed to remove session during logout");
            ApiError::internal("Logout failed")
        })?;
    }

    let config = state.config();
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));

    let jar = jar.remove(removal).add(xsrf_cookie(config));
    Ok((jar, ok(Success::done())))
}

pub async fn session(user: Option<AuthUser>) -> Json<Envelope<SessionPayload>> {
    ok(SessionPayload {
        session: user.is_some(),
    })
}

pub async fn current_user(user: Option<AuthUser>) -> Json<Envelope<UserPayload>> {
    ok(UserPayload {
        user: user.map(|auth| auth.user),
    })
}

pub fn validate_sign_up(request: &SignUpRequest) -> Result<NewUser, FieldErrors> {
    let mut errors = FieldErrors::new();

    let firstname = required_name(&mut errors, "firstname", request.firstname.as_deref());
    let lastname = required_name(&mut errors, "lastname", request.lastname.as_deref());
    let email = checked_email(&mut errors, request.email.as_deref());

    let password = request.password.clone().unwrap_or_default();
    if password.is_empty() {
        errors.add("password", "The password field is required.");
    } else {
        if password.chars().count() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("The password field must be at least {MIN_PASSWORD_LEN} characters."),
            );
        }
        if request.password_confirmation.as_deref() != Some(password.as_str()) {
            errors.add("password", "The password field confirmation does not match.");
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(NewUser {
        name: format!("{firstname} {lastname}"),
        email,
        password,
    })
}

pub fn validate_sign_in(request: &SignInRequest) -> Result<(String, String), FieldErrors> {
    let mut errors = FieldErrors::new();
    let email = checked_email(&mut errors, request.email.as_deref());
    let password = request.password.clone().unwrap_or_default();
    if password.is_empty() {
        errors.add("password", "The password field is required.");
    }

    if errors.is_empty() {
        Ok((email, password))
    } else {
        Err(errors)
    }
}

fn required_name(errors: &mut FieldErrors, field: &str, value: Option<&str>) -> String {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        errors.add(field, format!("The {field} field is required."));
    } else if value.chars().count() > MAX_NAME_LEN {
        errors.add(
            field,
            format!("The {field} field must not be greater than {MAX_NAME_LEN} characters."),
        );
    }
    value.to_string()
}

fn checked_email(errors: &mut FieldErrors, value: Option<&str>) -> String {
    let email = value.map(str::trim).unwrap_or_default().to_ascii_lowercase();
    if email.is_empty() {
        errors.add("email", "The email field is required.");
    } else if email.len() > MAX_NAME_LEN {
        errors.add(
            "email",
            format!("The email field must not be greater than {MAX_NAME_LEN} characters."),
        );
    } else if !is_valid_email(&email) {
        errors.add("email", "The email field must be a valid email address.");
    }
    email
}

pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

fn email_taken_error() -> ApiError {
    ApiError::field("email", "The email has already been taken.")
}

fn session_token(jar: &CookieJar) -> Option<Uuid> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

fn session_cookie(token: Uuid, config: &AppConfig) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.secure_cookies());
    cookie.set_max_age(CookieDuration::days(config.session_ttl_days));
    cookie
}

/// Fresh anti-forgery token; readable by scripts so clients can echo it back.
fn xsrf_cookie(config: &AppConfig) -> Cookie<'static> {
    let mut cookie = Cookie::new(XSRF_COOKIE, Uuid::new_v4().simple().to_string());
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.secure_cookies());
    cookie
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// Spends one argon2 verification for a login whose email matched no user.
fn verify_unknown_account(password: &str) {
    if let Some(hash) = UNKNOWN_ACCOUNT_HASH.as_deref() {
        std::hint::black_box(verify_password(password, hash));
    }
}

async fn email_taken(pool: &PgPool, email: &str) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(pool)
        .await
}

pub async fn fetch_user_by_email(pool: &PgPool, email: &str) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT users.id, users.name, users.email, users.created_at, users.updated_at
         FROM sessions JOIN users ON users.id = sessions.user_id
         WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

async fn delete_session(pool: &PgPool, token: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token)
        .execute(pool)
        .await
        .map(|_| ())
}

/// Removes sessions past their expiry, returning how many rows were dropped.
pub async fn purge_expired_sessions(pool: &PgPool) -> sqlx::Result<u64> {
    sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await
        .map(|result| result.rows_affected())
}
