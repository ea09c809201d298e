//! In-memory Store, for tests of the notification pipeline
//! and of crates which drive it.

use super::{NewNotification, Store, SubscriptionKeys};
use chrono::{DateTime, Utc};
use models::{
    DueSms, JobStatus, JobType, Notification, PushSubscription, Role, ScheduledJob,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MemoryUser {
    role: Role,
    phone: Option<String>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<Uuid, MemoryUser>,
    notifications: Vec<Notification>,
    jobs: Vec<ScheduledJob>,
    subscriptions: Vec<PushSubscription>,
}

/// MemoryStore is a Store which holds its state in memory.
/// It mirrors the semantics of the Postgres queries.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user with an optional phone number, returning its ID.
    pub fn add_user(&self, role: Role, phone: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().users.insert(
            id,
            MemoryUser {
                role,
                phone: phone.map(str::to_string),
            },
        );
        id
    }

    pub fn notification(&self, id: Uuid) -> Option<Notification> {
        self.lock()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    /// All jobs, in order of creation.
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.lock().jobs.clone()
    }

    /// All subscriptions, including inactive ones.
    pub fn subscriptions(&self) -> Vec<PushSubscription> {
        self.lock().subscriptions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread may poison the lock. Its state is still usable.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Inner {
    fn notification_mut(&mut self, id: Uuid) -> Option<&mut Notification> {
        self.notifications.iter_mut().find(|n| n.id == id)
    }

    fn job_mut(&mut self, id: Uuid) -> anyhow::Result<&mut ScheduledJob> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| anyhow::anyhow!("job {id} not found"))
    }

    fn subscription_mut(&mut self, id: Uuid) -> Option<&mut PushSubscription> {
        self.subscriptions.iter_mut().find(|s| s.id == id)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_notification(
        &self,
        user_id: Uuid,
        new: &NewNotification,
    ) -> anyhow::Result<Notification> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&user_id) {
            anyhow::bail!("user {user_id} not found");
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            title: new.title.clone(),
            message: new.message.clone(),
            kind: new.kind,
            link: new.link.clone(),
            is_read: false,
            read_at: None,
            push_sent_at: None,
            sms_sent_at: None,
            sms_scheduled_at: None,
            created_at: Utc::now(),
        };
        inner.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let inner = self.lock();
        // Insertion order is creation order, so newest are last.
        Ok(inner
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id && !(unread_only && n.is_read))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64> {
        let inner = self.lock();
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as i64)
    }

    async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Notification>> {
        let mut inner = self.lock();
        let Some(n) = inner.notification_mut(id).filter(|n| n.user_id == user_id) else {
            return Ok(None);
        };
        n.is_read = true;
        n.read_at.get_or_insert(now);
        Ok(Some(n.clone()))
    }

    async fn mark_all_read(&self, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let mut inner = self.lock();
        let mut ids = Vec::new();

        for n in inner.notifications.iter_mut() {
            if n.user_id == user_id && !n.is_read {
                n.is_read = true;
                n.read_at = Some(now);
                ids.push(n.id);
            }
        }
        Ok(ids)
    }

    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        let before = inner.notifications.len();
        inner
            .notifications
            .retain(|n| !(n.id == id && n.user_id == user_id));

        if inner.notifications.len() == before {
            return Ok(false);
        }
        inner.jobs.retain(|j| j.notification_id != id);
        Ok(true)
    }

    async fn is_read(&self, id: Uuid) -> anyhow::Result<Option<bool>> {
        let inner = self.lock();
        Ok(inner
            .notifications
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.is_read))
    }

    async fn record_push_sent(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(n) = self.lock().notification_mut(id) {
            n.push_sent_at = Some(at);
        }
        Ok(())
    }

    async fn record_sms_sent(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(n) = self.lock().notification_mut(id) {
            n.sms_sent_at = Some(at);
        }
        Ok(())
    }

    async fn schedule_sms(
        &self,
        notification_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> anyhow::Result<ScheduledJob> {
        let mut inner = self.lock();
        let Some(n) = inner.notification_mut(notification_id) else {
            anyhow::bail!("notification {notification_id} not found");
        };
        n.sms_scheduled_at = Some(due_at);

        let job = ScheduledJob {
            id: Uuid::new_v4(),
            notification_id,
            job_type: JobType::SmsEscalation,
            status: JobStatus::Pending,
            scheduled_for: due_at,
            attempts: 0,
            executed_at: None,
            error_at: None,
            error_message: None,
            created_at: Utc::now(),
        };
        inner.jobs.push(job.clone());
        Ok(job)
    }

    async fn cancel_pending_jobs(&self, notification_ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut inner = self.lock();
        let mut cancelled = 0;

        for job in inner.jobs.iter_mut() {
            if job.status == JobStatus::Pending && notification_ids.contains(&job.notification_id)
            {
                job.status = JobStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn due_sms(&self, now: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<DueSms>> {
        let inner = self.lock();

        let mut due: Vec<DueSms> = inner
            .jobs
            .iter()
            .filter(|j| {
                j.job_type == JobType::SmsEscalation
                    && j.status == JobStatus::Pending
                    && j.scheduled_for <= now
            })
            .filter_map(|j| {
                let n = inner
                    .notifications
                    .iter()
                    .find(|n| n.id == j.notification_id && !n.is_read)?;
                let user = inner.users.get(&n.user_id)?;

                Some(DueSms {
                    job_id: j.id,
                    notification_id: n.id,
                    user_id: n.user_id,
                    attempts: j.attempts,
                    scheduled_for: j.scheduled_for,
                    title: n.title.clone(),
                    message: n.message.clone(),
                    is_read: n.is_read,
                    phone: user.phone.clone(),
                })
            })
            .collect();

        due.sort_by_key(|d| d.scheduled_for);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn complete_job(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        job.status = JobStatus::Completed;
        job.attempts += 1;
        job.executed_at = Some(at);
        Ok(())
    }

    async fn record_job_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        error: &str,
        terminal: bool,
    ) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        if terminal {
            job.status = JobStatus::Failed;
        }
        job.attempts += 1;
        job.error_at = Some(at);
        job.error_message = Some(error.to_string());
        Ok(())
    }

    async fn cancel_job(&self, id: Uuid) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let job = inner.job_mut(id)?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Cancelled;
        }
        Ok(())
    }

    async fn active_subscriptions(&self, user_id: Uuid) -> anyhow::Result<Vec<PushSubscription>> {
        let inner = self.lock();
        Ok(inner
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect())
    }

    async fn upsert_subscription(
        &self,
        user_id: Uuid,
        keys: &SubscriptionKeys,
    ) -> anyhow::Result<PushSubscription> {
        let mut inner = self.lock();

        if let Some(sub) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.endpoint == keys.endpoint)
        {
            sub.user_id = user_id;
            sub.p256dh = keys.p256dh.clone();
            sub.auth = keys.auth.clone();
            sub.user_agent = keys.user_agent.clone();
            sub.is_active = true;
            sub.failure_reason = None;
            return Ok(sub.clone());
        }

        let sub = PushSubscription {
            id: Uuid::new_v4(),
            user_id,
            endpoint: keys.endpoint.clone(),
            p256dh: keys.p256dh.clone(),
            auth: keys.auth.clone(),
            user_agent: keys.user_agent.clone(),
            is_active: true,
            failure_reason: None,
            created_at: Utc::now(),
            last_used_at: None,
        };
        inner.subscriptions.push(sub.clone());
        Ok(sub)
    }

    async fn deactivate_subscription(&self, id: Uuid, reason: &str) -> anyhow::Result<()> {
        if let Some(sub) = self.lock().subscription_mut(id) {
            sub.is_active = false;
            sub.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(sub) = self.lock().subscription_mut(id) {
            sub.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn remove_subscription(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner
            .subscriptions
            .retain(|s| !(s.user_id == user_id && s.endpoint == endpoint));
        Ok(inner.subscriptions.len() != before)
    }

    async fn student_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let inner = self.lock();
        Ok(inner
            .users
            .iter()
            .filter(|(_, user)| user.role == Role::Student)
            .map(|(id, _)| *id)
            .collect())
    }
}
