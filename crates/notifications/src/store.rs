use chrono::{DateTime, Utc};
use models::{DueSms, Notification, NotificationKind, PushSubscription, ScheduledJob};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// NewNotification is the content of a notification to be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub link: Option<String>,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// SubscriptionKeys are the parts of a browser push subscription
/// which are stored to later push to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKeys {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Store holds the notifications, jobs and subscriptions
/// of the notification pipeline.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn insert_notification(
        &self,
        user_id: Uuid,
        new: &NewNotification,
    ) -> anyhow::Result<Notification>;

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>>;

    async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64>;

    /// Mark a notification owned by `user_id` as read.
    async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Notification>>;

    /// Mark all unread notifications of `user_id` as read, returning their IDs.
    async fn mark_all_read(&self, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>>;

    /// Delete a notification owned by `user_id`, and its jobs.
    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool>;

    /// Whether notification `id` is read, or None if it doesn't exist.
    async fn is_read(&self, id: Uuid) -> anyhow::Result<Option<bool>>;

    async fn record_push_sent(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn record_sms_sent(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn schedule_sms(
        &self,
        notification_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> anyhow::Result<ScheduledJob>;

    /// Cancel pending jobs of the notifications, returning how many were cancelled.
    async fn cancel_pending_jobs(&self, notification_ids: &[Uuid]) -> anyhow::Result<u64>;

    /// Pending SMS jobs due at `now` whose notifications are unread, oldest first.
    async fn due_sms(&self, now: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<DueSms>>;

    async fn complete_job(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Record a failed attempt of a job, which is failed if `terminal`.
    async fn record_job_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        error: &str,
        terminal: bool,
    ) -> anyhow::Result<()>;

    async fn cancel_job(&self, id: Uuid) -> anyhow::Result<()>;

    async fn active_subscriptions(&self, user_id: Uuid) -> anyhow::Result<Vec<PushSubscription>>;

    async fn upsert_subscription(
        &self,
        user_id: Uuid,
        keys: &SubscriptionKeys,
    ) -> anyhow::Result<PushSubscription>;

    async fn deactivate_subscription(&self, id: Uuid, reason: &str) -> anyhow::Result<()>;

    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn remove_subscription(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool>;

    async fn student_ids(&self) -> anyhow::Result<Vec<Uuid>>;
}
