use super::{ApiError, ApiErrorExt, App, Claims, Request};
use axum::http::StatusCode;
use chrono::NaiveDate;
use internship_sql::internships::InternshipFields;
use models::{
    ApplicationStatus, ApplicationSummary, Internship, NotificationKind, Role, ScheduledJob, User,
};
use notifications::NewNotification;
use std::sync::Arc;

#[derive(Debug, serde::Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct InternshipRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 200))]
    pub company: String,
    #[validate(length(min = 1, max = 200))]
    pub location: String,
    #[validate(length(min = 1, max = 10000))]
    pub description: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[validate(email)]
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub published: bool,
}

impl InternshipRequest {
    fn into_fields(self) -> Result<InternshipFields, ApiError> {
        if matches!(self.end_date, Some(end) if end < self.start_date) {
            return Err(anyhow::anyhow!("endDate must not be before startDate")
                .with_status(StatusCode::BAD_REQUEST));
        }

        Ok(InternshipFields {
            title: self.title.trim().to_string(),
            company: self.company.trim().to_string(),
            location: self.location.trim().to_string(),
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            contact_email: self.contact_email,
            published: self.published,
        })
    }
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct ApplicationStatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    /// Recipient, or every student if absent.
    #[serde(default)]
    pub user_id: Option<uuid::Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    #[serde(default)]
    pub kind: NotificationKind,
    /// Dashboard path or URL opened from the notification.
    #[serde(default)]
    #[validate(length(min = 1, max = 500))]
    pub link: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct ApplicationsQuery {
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, serde::Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub students: i64,
    pub admins: i64,
    pub internships: i64,
    pub published_internships: i64,
    pub applications: std::collections::BTreeMap<ApplicationStatus, i64>,
    pub pending_sms_jobs: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct SendNotificationResponse {
    pub recipients: usize,
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn stats(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<Stats>, ApiError> {
    let pool = &app.pg_pool;

    let mut applications: std::collections::BTreeMap<_, _> = [
        ApplicationStatus::Pending,
        ApplicationStatus::Accepted,
        ApplicationStatus::Rejected,
    ]
    .into_iter()
    .map(|status| (status, 0))
    .collect();
    applications.extend(internship_sql::applications::count_by_status(pool).await?);

    Ok(axum::Json(Stats {
        students: internship_sql::users::count_by_role(Role::Student, pool).await?,
        admins: internship_sql::users::count_by_role(Role::Admin, pool).await?,
        internships: internship_sql::internships::count(false, pool).await?,
        published_internships: internship_sql::internships::count(true, pool).await?,
        applications,
        pending_sms_jobs: internship_sql::jobs::count_pending(pool).await?,
    }))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn students(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<Vec<User>>, ApiError> {
    Ok(axum::Json(
        internship_sql::users::list_students(&app.pg_pool).await?,
    ))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn list_internships(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> Result<axum::Json<Vec<Internship>>, ApiError> {
    Ok(axum::Json(
        internship_sql::internships::list_all(&app.pg_pool).await?,
    ))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn create_internship(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::Extension(Claims { sub: admin_id, .. }): axum::Extension<Claims>,
    Request(body): Request<InternshipRequest>,
) -> Result<(StatusCode, axum::Json<Internship>), ApiError> {
    let fields = body.into_fields()?;
    let internship = internship_sql::internships::create(&fields, admin_id, &app.pg_pool).await?;
    tracing::info!(internship = %internship.id, published = internship.published, "created internship");

    if internship.published {
        announce(&app, &internship)?;
    }
    Ok((StatusCode::CREATED, axum::Json(internship)))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn update_internship(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
    Request(body): Request<InternshipRequest>,
) -> Result<axum::Json<Internship>, ApiError> {
    let fields = body.into_fields()?;

    let (internship, was_published) =
        internship_sql::internships::update(id, &fields, &app.pg_pool)
            .await?
            .ok_or_else(|| ApiError::not_found("internship"))?;

    if internship.published && !was_published {
        announce(&app, &internship)?;
    }
    Ok(axum::Json(internship))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn delete_internship(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Result<StatusCode, ApiError> {
    if internship_sql::internships::delete(id, &app.pg_pool).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("internship"))
    }
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn list_applications(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Query(query): axum::extract::Query<ApplicationsQuery>,
) -> Result<axum::Json<Vec<ApplicationSummary>>, ApiError> {
    Ok(axum::Json(
        internship_sql::applications::list_all(query.status, &app.pg_pool).await?,
    ))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn update_application_status(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
    Request(ApplicationStatusRequest { status }): Request<ApplicationStatusRequest>,
) -> Result<axum::Json<ApplicationSummary>, ApiError> {
    let Some(current) = internship_sql::applications::fetch(id, &app.pg_pool).await? else {
        return Err(ApiError::not_found("application"));
    };
    if current.status == status {
        return Ok(axum::Json(current));
    }

    internship_sql::applications::update_status(id, status, &app.pg_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("application"))?;

    if status != ApplicationStatus::Pending {
        notify_decision(&app, &current, status).await;
    }

    let updated = internship_sql::applications::fetch(id, &app.pg_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("application"))?;
    Ok(axum::Json(updated))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn send_notification(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    Request(body): Request<SendNotificationRequest>,
) -> Result<axum::Json<SendNotificationResponse>, ApiError> {
    let new = NewNotification {
        title: body.title.trim().to_string(),
        message: body.message.trim().to_string(),
        kind: body.kind,
        link: body.link,
    };

    let recipients = match body.user_id {
        Some(user_id) => {
            if internship_sql::users::fetch_user(user_id, &app.pg_pool)
                .await?
                .is_none()
            {
                return Err(ApiError::not_found("user"));
            }
            app.notifications.notify(user_id, new).await?;
            1
        }
        None => app.notifications.broadcast_to_students(&new).await?,
    };

    Ok(axum::Json(SendNotificationResponse { recipients }))
}

#[tracing::instrument(skip(app), err(level = tracing::Level::WARN))]
pub async fn list_jobs(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum::extract::Query(query): axum::extract::Query<JobsQuery>,
) -> Result<axum::Json<Vec<ScheduledJob>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    Ok(axum::Json(
        internship_sql::jobs::list_recent(limit, &app.pg_pool).await?,
    ))
}

/// Notify every student of a newly published offer, in the background.
fn announce(app: &Arc<App>, internship: &Internship) -> anyhow::Result<()> {
    let new = app.templates.internship_published(internship)?;
    let app = app.clone();
    let internship_id = internship.id;

    tokio::spawn(async move {
        match app.notifications.broadcast_to_students(&new).await {
            Ok(recipients) => {
                tracing::info!(internship = %internship_id, recipients, "announced internship")
            }
            Err(err) => {
                tracing::error!(internship = %internship_id, error = ?err, "failed to announce internship")
            }
        }
    });
    Ok(())
}

/// Notify a student that their application was decided.
/// Failures are logged, as the decision itself is already recorded.
async fn notify_decision(app: &App, application: &ApplicationSummary, status: ApplicationStatus) {
    let result = async {
        let internship = internship_sql::internships::fetch(application.internship_id, &app.pg_pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("internship {} not found", application.internship_id))?;

        let new = app.templates.application_decided(&internship, status)?;
        app.notifications.notify(application.student_id, new).await
    }
    .await;

    if let Err(err) = result {
        tracing::error!(application = %application.id, error = ?err, "failed to notify application decision");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(end_date: Option<&str>) -> InternshipRequest {
        serde_json::from_value(serde_json::json!({
            "title": " Développeur Rust ",
            "company": "Acme",
            "location": "Lyon",
            "description": "Backend",
            "startDate": "2026-03-02",
            "endDate": end_date,
        }))
        .unwrap()
    }

    #[test]
    fn test_internship_request_fields() {
        let fields = request(Some("2026-08-28")).into_fields().unwrap();
        assert_eq!(fields.title, "Développeur Rust");
        assert!(!fields.published);
        assert_eq!(fields.end_date, NaiveDate::from_ymd_opt(2026, 8, 28));

        assert!(request(None).into_fields().is_ok());

        let err = request(Some("2026-03-01")).into_fields().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_send_notification_request_bounds() {
        use validator::Validate;

        let send = |message: String, link: Option<String>| -> SendNotificationRequest {
            serde_json::from_value(serde_json::json!({
                "title": "Rappel",
                "message": message,
                "link": link,
            }))
            .unwrap()
        };

        assert!(send("Pensez à votre convention".into(), Some("/student".into()))
            .validate()
            .is_ok());
        assert!(send("Pensez à votre convention".into(), None).validate().is_ok());

        let errors = send("x".into(), Some("x".repeat(501))).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("link"));
        let errors = send("é".repeat(2001), None).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("message"));
    }
}
