use super::{ApiError, ApiErrorExt, App, Claims, Request};
use axum::http::StatusCode;
use models::{Notification, PushSubscription};
use notifications::SubscriptionKeys;
use std::sync::Arc;
use validator::Validate;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct BrowserKeys {
    #[validate(length(min = 1))]
    pub p256dh: String,
    #[validate(length(min = 1))]
    pub auth: String,
}

/// SubscribeRequest is a browser PushSubscription, as serialized by `toJSON()`.
#[derive(Debug, serde::Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[validate(url)]
    pub endpoint: String,
    #[validate(nested)]
    pub keys: BrowserKeys,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct UnsubscribeRequest {
    #[validate(length(min = 1))]
    pub endpoint: String,
}

#[derive(Debug, serde::Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct MarkedRead {
    pub updated: usize,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VapidPublicKey {
    pub public_key: String,
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn list(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    axum::extract::Query(query): axum::extract::Query<ListQuery>,
) -> Result<axum::Json<Vec<Notification>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    Ok(axum::Json(
        app.notifications
            .list(user_id, query.unread_only, limit)
            .await?,
    ))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn unread_count(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
) -> Result<axum::Json<UnreadCount>, ApiError> {
    let count = app.notifications.unread_count(user_id).await?;
    Ok(axum::Json(UnreadCount { count }))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn mark_read(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Result<axum::Json<Notification>, ApiError> {
    let notification = app
        .notifications
        .mark_read(user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("notification"))?;

    Ok(axum::Json(notification))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn mark_all_read(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
) -> Result<axum::Json<MarkedRead>, ApiError> {
    let updated = app.notifications.mark_all_read(user_id).await?;
    Ok(axum::Json(MarkedRead { updated }))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn delete(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Result<StatusCode, ApiError> {
    if app.notifications.delete(user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("notification"))
    }
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn vapid_public_key(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<VapidPublicKey>, ApiError> {
    let Some(public_key) = app.notifications.vapid_public_key() else {
        return Err(anyhow::anyhow!("push notifications are not configured")
            .with_status(StatusCode::SERVICE_UNAVAILABLE));
    };
    Ok(axum::Json(VapidPublicKey { public_key }))
}

#[tracing::instrument(skip(app, body), err(level = tracing::Level::WARN))]
pub async fn subscribe(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    Request(body): Request<SubscribeRequest>,
) -> Result<(StatusCode, axum::Json<PushSubscription>), ApiError> {
    notifications::push::check_subscription_keys(&body.keys.p256dh, &body.keys.auth)
        .map_err(|err| err.context("invalid push subscription").with_status(StatusCode::BAD_REQUEST))?;

    let keys = SubscriptionKeys {
        endpoint: body.endpoint,
        p256dh: body.keys.p256dh,
        auth: body.keys.auth,
        user_agent: body.user_agent,
    };
    let subscription = app.notifications.subscribe(user_id, &keys).await?;

    Ok((StatusCode::CREATED, axum::Json(subscription)))
}

#[tracing::instrument(skip(app, body), err(level = tracing::Level::WARN))]
pub async fn unsubscribe(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: user_id, .. }): axum::Extension<Claims>,
    Request(body): Request<UnsubscribeRequest>,
) -> Result<StatusCode, ApiError> {
    if app.notifications.unsubscribe(user_id, &body.endpoint).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("push subscription"))
    }
}
