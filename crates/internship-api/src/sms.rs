use super::{ApiError, ApiErrorExt, App, Request, Sms};
use axum::http::StatusCode;
use notifications::{PollReport, SmsReceipt};
use std::sync::Arc;

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct TestSmsRequest {
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 300))]
    pub message: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsStatus {
    pub configured: bool,
    pub push_enabled: bool,
    pub pending_jobs: i64,
    /// Durations are rendered for humans, as in "12h".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

fn configured(app: &App) -> Result<&Sms, ApiError> {
    app.sms.as_ref().ok_or_else(|| {
        anyhow::anyhow!("the SMS gateway is not configured")
            .with_status(StatusCode::SERVICE_UNAVAILABLE)
    })
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn status(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<SmsStatus>, ApiError> {
    let pending_jobs = internship_sql::jobs::count_pending(&app.pg_pool).await?;
    let config = app.sms.as_ref().map(|sms| sms.scheduler.config());

    Ok(axum::Json(SmsStatus {
        configured: app.sms.is_some(),
        push_enabled: app.notifications.push_enabled(),
        pending_jobs,
        escalation_delay: config.map(|c| humantime::format_duration(c.delay).to_string()),
        poll_interval: config.map(|c| humantime::format_duration(c.poll_interval).to_string()),
        max_attempts: config.map(|c| c.max_attempts),
    }))
}

#[tracing::instrument(
    skip(app, body),
    fields(phone = %notifications::mask_phone_number(&body.phone)),
    err(level = tracing::Level::WARN)
)]
pub async fn test(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    Request(body): Request<TestSmsRequest>,
) -> Result<axum::Json<SmsReceipt>, ApiError> {
    let sms = configured(&app)?;

    let phone = notifications::format_phone_number(&body.phone)
        .map_err(|err| anyhow::Error::from(err).with_status(StatusCode::BAD_REQUEST))?;

    let receipt = sms
        .sender
        .send_sms(&phone, &body.message)
        .await
        .map_err(|err| err.with_status(StatusCode::BAD_GATEWAY))?;

    tracing::info!(phone = %notifications::mask_phone_number(&phone), "sent test SMS");
    Ok(axum::Json(receipt))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn process(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<PollReport>, ApiError> {
    let sms = configured(&app)?;
    Ok(axum::Json(sms.scheduler.poll_once(chrono::Utc::now()).await?))
}
