use super::{NewNotification, Store, SubscriptionKeys};
use chrono::{DateTime, Utc};
use internship_sql as sql;
use models::{DueSms, Notification, PushSubscription, ScheduledJob};
use uuid::Uuid;

/// PgStore is the Store of a Postgres database.
#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn insert_notification(
        &self,
        user_id: Uuid,
        new: &NewNotification,
    ) -> anyhow::Result<Notification> {
        Ok(sql::notifications::insert(
            user_id,
            &new.title,
            &new.message,
            new.kind,
            new.link.as_deref(),
            &self.pool,
        )
        .await?)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        Ok(sql::notifications::list(user_id, unread_only, limit, &self.pool).await?)
    }

    async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64> {
        Ok(sql::notifications::unread_count(user_id, &self.pool).await?)
    }

    async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Notification>> {
        Ok(sql::notifications::mark_read(user_id, id, now, &self.pool).await?)
    }

    async fn mark_all_read(&self, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        Ok(sql::notifications::mark_all_read(user_id, now, &self.pool).await?)
    }

    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
        Ok(sql::notifications::delete(user_id, id, &self.pool).await?)
    }

    async fn is_read(&self, id: Uuid) -> anyhow::Result<Option<bool>> {
        Ok(sql::notifications::fetch_is_read(id, &self.pool).await?)
    }

    async fn record_push_sent(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(sql::notifications::record_push_sent(id, at, &self.pool).await?)
    }

    async fn record_sms_sent(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(sql::notifications::record_sms_sent(id, at, &self.pool).await?)
    }

    async fn schedule_sms(
        &self,
        notification_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> anyhow::Result<ScheduledJob> {
        Ok(sql::jobs::schedule_sms(notification_id, due_at, &self.pool).await?)
    }

    async fn cancel_pending_jobs(&self, notification_ids: &[Uuid]) -> anyhow::Result<u64> {
        if notification_ids.is_empty() {
            return Ok(0);
        }
        Ok(sql::jobs::cancel_pending_for_notifications(notification_ids, &self.pool).await?)
    }

    async fn due_sms(&self, now: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<DueSms>> {
        Ok(sql::jobs::fetch_due_sms(now, limit, &self.pool).await?)
    }

    async fn complete_job(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(sql::jobs::complete(id, at, &self.pool).await?)
    }

    async fn record_job_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        error: &str,
        terminal: bool,
    ) -> anyhow::Result<()> {
        Ok(sql::jobs::record_failure(id, at, error, terminal, &self.pool).await?)
    }

    async fn cancel_job(&self, id: Uuid) -> anyhow::Result<()> {
        Ok(sql::jobs::cancel(id, &self.pool).await?)
    }

    async fn active_subscriptions(&self, user_id: Uuid) -> anyhow::Result<Vec<PushSubscription>> {
        Ok(sql::subscriptions::active_for_user(user_id, &self.pool).await?)
    }

    async fn upsert_subscription(
        &self,
        user_id: Uuid,
        keys: &SubscriptionKeys,
    ) -> anyhow::Result<PushSubscription> {
        Ok(sql::subscriptions::upsert(
            user_id,
            &keys.endpoint,
            &keys.p256dh,
            &keys.auth,
            keys.user_agent.as_deref(),
            &self.pool,
        )
        .await?)
    }

    async fn deactivate_subscription(&self, id: Uuid, reason: &str) -> anyhow::Result<()> {
        Ok(sql::subscriptions::deactivate(id, reason, &self.pool).await?)
    }

    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(sql::subscriptions::touch(id, at, &self.pool).await?)
    }

    async fn remove_subscription(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool> {
        Ok(sql::subscriptions::remove(user_id, endpoint, &self.pool).await?)
    }

    async fn student_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        Ok(sql::users::student_ids(&self.pool).await?)
    }
}
