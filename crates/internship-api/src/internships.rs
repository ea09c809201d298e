use super::{ApiError, ApiErrorExt, App, Claims, Request};
use axum::http::StatusCode;
use models::{Application, ApplicationSummary, Internship, Role};
use std::sync::Arc;

#[derive(Debug, Default, serde::Deserialize, validator::Validate)]
pub struct ApplyRequest {
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub message: Option<String>,
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn list(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<Vec<Internship>>, ApiError> {
    Ok(axum::Json(
        internship_sql::internships::list_published(&app.pg_pool).await?,
    ))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn get(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(claims): axum::Extension<Claims>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Result<axum::Json<Internship>, ApiError> {
    let internship = internship_sql::internships::fetch(id, &app.pg_pool)
        .await?
        // Unpublished offers are only visible to admins.
        .filter(|i| i.published || claims.role == Role::Admin)
        .ok_or_else(|| ApiError::not_found("internship"))?;

    Ok(axum::Json(internship))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn apply(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(claims): axum::Extension<Claims>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
    Request(body): Request<ApplyRequest>,
) -> Result<(StatusCode, axum::Json<Application>), ApiError> {
    if claims.role != Role::Student {
        return Err(ApiError::forbidden("apply to internships"));
    }

    match internship_sql::internships::fetch(id, &app.pg_pool).await? {
        Some(internship) if internship.published => (),
        _ => return Err(ApiError::not_found("internship")),
    }

    let message = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let Some(application) =
        internship_sql::applications::apply(id, claims.sub, message, &app.pg_pool).await?
    else {
        return Err(anyhow::anyhow!("you already applied to this internship")
            .with_status(StatusCode::CONFLICT));
    };
    tracing::info!(application = %application.id, "student applied");

    Ok((StatusCode::CREATED, axum::Json(application)))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn my_applications(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
) -> Result<axum::Json<Vec<ApplicationSummary>>, ApiError> {
    Ok(axum::Json(
        internship_sql::applications::list_for_student(user_id, &app.pg_pool).await?,
    ))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn withdraw(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Result<StatusCode, ApiError> {
    if internship_sql::applications::withdraw(id, user_id, &app.pg_pool).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("pending application"))
    }
}
