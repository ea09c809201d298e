use super::{error::is_unique_violation, ApiError, ApiErrorExt, App, Claims, Request};
use anyhow::Context;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::http::StatusCode;
use models::{Role, User};
use std::sync::Arc;

#[derive(Debug, serde::Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: User,
}

#[tracing::instrument(skip_all, fields(email = %body.email), err(level = tracing::Level::WARN))]
pub async fn register(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    Request(body): Request<RegisterRequest>,
) -> Result<(StatusCode, axum::Json<TokenResponse>), ApiError> {
    let phone = normalize_phone(body.phone.as_deref())?;
    let password_hash = hash_password(body.password).await?;

    let user = match internship_sql::users::create_user(
        &body.email,
        &password_hash,
        body.first_name.trim(),
        body.last_name.trim(),
        phone.as_deref(),
        Role::Student,
        &app.pg_pool,
    )
    .await
    {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            return Err(anyhow::anyhow!("an account already exists for this email")
                .with_status(StatusCode::CONFLICT))
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!(user = %user.id, "registered student");

    let token = app.issue_token(&user)?;
    Ok((StatusCode::CREATED, axum::Json(TokenResponse { token, user })))
}

#[tracing::instrument(skip_all, fields(email = %body.email), err(level = tracing::Level::WARN))]
pub async fn login(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    Request(body): Request<LoginRequest>,
) -> Result<axum::Json<TokenResponse>, ApiError> {
    let invalid = || {
        anyhow::anyhow!("invalid email or password").with_status(StatusCode::UNAUTHORIZED)
    };

    let Some(record) = internship_sql::users::fetch_user_by_email(&body.email, &app.pg_pool).await?
    else {
        return Err(invalid());
    };
    let (user, password_hash) = record.into_parts();

    if !verify_password(body.password, password_hash).await? {
        return Err(invalid());
    }

    let token = app.issue_token(&user)?;
    Ok(axum::Json(TokenResponse { token, user }))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn me(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
) -> Result<axum::Json<User>, ApiError> {
    let user = internship_sql::users::fetch_user(user_id, &app.pg_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;

    Ok(axum::Json(user))
}

#[tracing::instrument(skip(app, body), err(level = tracing::Level::WARN))]
pub async fn update_me(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    Request(body): Request<UpdateProfileRequest>,
) -> Result<axum::Json<User>, ApiError> {
    let phone = normalize_phone(body.phone.as_deref())?;

    let user = internship_sql::users::update_profile(
        user_id,
        body.first_name.trim(),
        body.last_name.trim(),
        phone.as_deref(),
        &app.pg_pool,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("user"))?;

    Ok(axum::Json(user))
}

/// Normalize an optional phone number to E.164. A blank number is no number.
fn normalize_phone(phone: Option<&str>) -> Result<Option<String>, ApiError> {
    match phone.map(str::trim) {
        None | Some("") => Ok(None),
        Some(phone) => notifications::format_phone_number(phone)
            .map(Some)
            .map_err(|err| anyhow::Error::from(err).with_status(StatusCode::BAD_REQUEST)),
    }
}

/// Hash a password into a PHC string, with a random salt.
/// Argon2 is CPU-bound, and runs on the blocking thread pool.
pub async fn hash_password(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let hash = argon2::Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;

        Ok(hash.to_string())
    })
    .await
    .context("password hashing task failed")?
}

async fn verify_password(password: String, password_hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|err| anyhow::anyhow!("stored password hash is invalid: {err}"))
            .context("verifying password")?;

        Ok(argon2::Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .context("password verification task failed")?
}
