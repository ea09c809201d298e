use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx-support",
    sqlx(type_name = "notification_kind", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Application,
    Internship,
    Reminder,
}

impl Default for NotificationKind {
    fn default() -> Self {
        NotificationKind::Info
    }
}

/// Notification addressed to a single user. It's first delivered by
/// Web Push and, if still unread once its SMS job comes due, by SMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    /// Dashboard path opened when the notification is clicked.
    pub link: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub push_sent_at: Option<DateTime<Utc>>,
    pub sms_sent_at: Option<DateTime<Utc>>,
    pub sms_scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx-support",
    sqlx(type_name = "job_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    SmsEscalation,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx-support",
    sqlx(type_name = "job_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

/// ScheduledJob is a row of `scheduled_jobs`.
///
/// A job is created `pending` and ends in exactly one of `completed`,
/// `cancelled` or `failed`. A pending job may have non-zero `attempts`
/// if earlier sends failed and it awaits a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub scheduled_for: DateTime<Utc>,
    pub attempts: i32,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// DueSms is a pending SMS escalation job which has come due,
/// joined with the notification content and recipient phone.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
pub struct DueSms {
    pub job_id: Uuid,
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub phone: Option<String>,
}

/// PushSubscription is a browser's Web Push subscription,
/// as produced by `PushManager.subscribe()` in the service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-support", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    /// Base64url P-256 public key of the user agent.
    pub p256dh: String,
    /// Base64url 16-byte authentication secret.
    pub auth: String,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
