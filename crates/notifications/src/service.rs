use super::{
    EscalationConfig, NewNotification, PushDelivery, PushPayload, Store, SubscriptionKeys,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{Notification, PushSubscription, ScheduledJob};
use std::sync::Arc;
use uuid::Uuid;

/// Delivery is the result of sending a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub notification: Notification,
    /// Number of browser subscriptions which accepted the push.
    pub pushed: usize,
    /// Escalation job, if SMS is enabled.
    pub sms_job: Option<ScheduledJob>,
}

/// NotificationService persists notifications, pushes them to browsers,
/// and schedules their escalation to SMS.
pub struct NotificationService {
    store: Arc<dyn Store>,
    push: Option<Arc<dyn PushDelivery>>,
    sms_enabled: bool,
    escalation_delay: chrono::Duration,
    wake: Arc<tokio::sync::Notify>,
}

impl NotificationService {
    /// Build a NotificationService. If `push` is None, notifications are not
    /// pushed and escalate to SMS immediately. If `sms_enabled` is false,
    /// notifications are never escalated.
    pub fn new(
        store: Arc<dyn Store>,
        push: Option<Arc<dyn PushDelivery>>,
        sms_enabled: bool,
        config: &EscalationConfig,
        wake: Arc<tokio::sync::Notify>,
    ) -> anyhow::Result<Self> {
        let escalation_delay = chrono::Duration::from_std(config.delay)
            .context("SMS escalation delay is out of range")?;

        Ok(Self {
            store,
            push,
            sms_enabled,
            escalation_delay,
            wake,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn push_enabled(&self) -> bool {
        self.push.is_some()
    }

    pub fn sms_enabled(&self) -> bool {
        self.sms_enabled
    }

    /// Public VAPID key which browsers subscribe with, if push is enabled.
    pub fn vapid_public_key(&self) -> Option<String> {
        self.push.as_ref().map(|push| push.public_key())
    }

    pub async fn notify(&self, user_id: Uuid, new: NewNotification) -> anyhow::Result<Delivery> {
        self.notify_at(user_id, new, Utc::now()).await
    }

    /// Send a notification to `user_id` as of `now`.
    ///
    /// If the push reaches at least one browser, an SMS escalation is
    /// scheduled after the escalation delay. Otherwise the SMS is due
    /// immediately and the scheduler is woken to send it.
    #[tracing::instrument(skip(self, new), fields(kind = %new.kind), err(Debug, level = tracing::Level::WARN))]
    pub async fn notify_at(
        &self,
        user_id: Uuid,
        new: NewNotification,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Delivery> {
        let mut notification = self
            .store
            .insert_notification(user_id, &new)
            .await
            .context("inserting notification")?;

        let pushed = self.push_to_user(&notification, now).await;

        if pushed != 0 {
            self.store
                .record_push_sent(notification.id, now)
                .await
                .context("recording push delivery")?;
            notification.push_sent_at = Some(now);
        }

        let sms_job = if self.sms_enabled {
            let due_at = if pushed != 0 {
                now + self.escalation_delay
            } else {
                now
            };
            let job = self
                .store
                .schedule_sms(notification.id, due_at)
                .await
                .context("scheduling SMS escalation")?;
            notification.sms_scheduled_at = Some(due_at);

            if pushed == 0 {
                tracing::info!(notification = %notification.id, "push not delivered, falling back to SMS");
                self.wake.notify_one();
            }
            Some(job)
        } else {
            None
        };

        Ok(Delivery {
            notification,
            pushed,
            sms_job,
        })
    }

    /// Send a notification to each of `user_ids`, one after the other.
    /// A failure to notify one user is logged and doesn't stop the others.
    /// Returns the number of users which were notified.
    pub async fn notify_many(&self, user_ids: &[Uuid], new: &NewNotification) -> usize {
        let mut notified = 0;

        for user_id in user_ids {
            match self.notify(*user_id, new.clone()).await {
                Ok(_) => notified += 1,
                Err(err) => {
                    tracing::error!(user = %user_id, error = ?err, "failed to notify user (skipping)")
                }
            }
        }
        notified
    }

    /// Send a notification to every student.
    pub async fn broadcast_to_students(&self, new: &NewNotification) -> anyhow::Result<usize> {
        let students = self
            .store
            .student_ids()
            .await
            .context("listing students")?;

        Ok(self.notify_many(&students, new).await)
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        self.store
            .list_notifications(user_id, unread_only, limit)
            .await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64> {
        self.store.unread_count(user_id).await
    }

    /// Mark a notification of `user_id` as read and cancel its pending SMS.
    /// Returns None if the user has no such notification.
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Notification>> {
        let Some(notification) = self.store.mark_read(user_id, id, Utc::now()).await? else {
            return Ok(None);
        };

        let cancelled = self
            .store
            .cancel_pending_jobs(&[id])
            .await
            .context("cancelling SMS escalation")?;

        if cancelled != 0 {
            tracing::debug!(notification = %id, "cancelled SMS escalation of read notification");
        }
        Ok(Some(notification))
    }

    /// Mark all notifications of `user_id` as read and cancel their pending SMS.
    /// Returns the number of notifications which were marked.
    pub async fn mark_all_read(&self, user_id: Uuid) -> anyhow::Result<usize> {
        let ids = self.store.mark_all_read(user_id, Utc::now()).await?;

        let cancelled = self
            .store
            .cancel_pending_jobs(&ids)
            .await
            .context("cancelling SMS escalations")?;

        tracing::debug!(user = %user_id, read = ids.len(), cancelled, "marked all notifications read");
        Ok(ids.len())
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
        self.store.delete_notification(user_id, id).await
    }

    pub async fn subscribe(
        &self,
        user_id: Uuid,
        keys: &SubscriptionKeys,
    ) -> anyhow::Result<PushSubscription> {
        let subscription = self.store.upsert_subscription(user_id, keys).await?;
        tracing::info!(user = %user_id, subscription = %subscription.id, "registered push subscription");
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool> {
        self.store.remove_subscription(user_id, endpoint).await
    }

    /// Push a notification to every active subscription of its user,
    /// returning the number of successful deliveries.
    async fn push_to_user(&self, notification: &Notification, now: DateTime<Utc>) -> usize {
        let Some(push) = &self.push else {
            return 0;
        };

        let subscriptions = match self.store.active_subscriptions(notification.user_id).await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::error!(error = ?err, "failed to fetch push subscriptions");
                return 0;
            }
        };

        let payload = PushPayload {
            title: notification.title.clone(),
            body: notification.message.clone(),
            url: notification.link.clone(),
            notification_id: notification.id,
            tag: Some(notification.kind.to_string()),
        };
        let mut delivered = 0;

        for subscription in subscriptions {
            let outcome = push.deliver(&subscription, &payload).await;

            let result = if let Some(reason) = outcome.deactivation_reason() {
                tracing::info!(subscription = %subscription.id, %reason, "deactivating push subscription");
                self.store
                    .deactivate_subscription(subscription.id, &reason)
                    .await
            } else if outcome == super::DeliveryOutcome::Delivered {
                delivered += 1;
                self.store.touch_subscription(subscription.id, now).await
            } else {
                tracing::warn!(subscription = %subscription.id, ?outcome, "push delivery failed");
                Ok(())
            };

            if let Err(err) = result {
                tracing::error!(subscription = %subscription.id, error = ?err, "failed to update push subscription");
            }
        }
        delivered
    }
}
