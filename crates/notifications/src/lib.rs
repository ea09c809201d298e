//! Notification delivery for the internship platform.
//!
//! Every notification is persisted and pushed to the browsers of its
//! recipient. An SMS escalation job is scheduled alongside it, which
//! the [`SmsScheduler`] sends through the SMS gateway unless the
//! notification is read before the job comes due.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod phone;
pub mod push;
pub mod templates;
pub mod textbee;

mod pg;
mod scheduler;
mod service;
mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use pg::PgStore;
pub use phone::{format_phone_number, mask_phone_number, PhoneError};
pub use push::{PushNotificationService, VapidKeys};
pub use scheduler::{PollReport, SmsScheduler};
pub use service::{Delivery, NotificationService};
pub use store::{NewNotification, Store, SubscriptionKeys};
pub use templates::Templates;
pub use textbee::{TextBeeConfig, TextBeeService};

/// PushPayload is the JSON message shown by the service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    /// Dashboard path opened when the notification is clicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub notification_id: uuid::Uuid,
    /// Notifications of the same tag replace one another on the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// DeliveryOutcome is the result of pushing to a single subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The push service no longer accepts messages for the subscription.
    Gone { status: u16 },
    /// The subscription's endpoint or keys are unusable.
    Invalid { reason: String },
    /// Delivery failed for a reason which may be transient.
    Failed { reason: String },
}

impl DeliveryOutcome {
    /// Reason to deactivate the subscription, if it should be.
    pub fn deactivation_reason(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Gone { status } => Some(format!("push service responded {status}")),
            DeliveryOutcome::Invalid { reason } => Some(reason.clone()),
            DeliveryOutcome::Delivered | DeliveryOutcome::Failed { .. } => None,
        }
    }
}

/// PushDelivery sends a payload to one browser push subscription.
#[async_trait::async_trait]
pub trait PushDelivery: Send + Sync {
    /// Public key which browsers must subscribe with.
    fn public_key(&self) -> String;

    async fn deliver(
        &self,
        subscription: &models::PushSubscription,
        payload: &PushPayload,
    ) -> DeliveryOutcome;
}

/// SmsReceipt is the SMS gateway's acknowledgement of a queued message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsReceipt {
    /// Recipient, in E.164 form.
    pub phone: String,
    pub batch_id: Option<String>,
    pub recipient_count: Option<i64>,
}

/// SmsSender sends a single text message.
#[async_trait::async_trait]
pub trait SmsSender: Send + Sync {
    /// Send `message` to `phone`, which is formatted before sending.
    async fn send_sms(&self, phone: &str, message: &str) -> anyhow::Result<SmsReceipt>;
}

/// EscalationConfig parameterizes when and how unread notifications
/// are escalated to SMS.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Delay after a delivered push before an unread notification is sent by SMS.
    pub delay: Duration,
    /// Interval between polls for due SMS jobs.
    pub poll_interval: Duration,
    /// Pause between two consecutive sends, to respect the gateway's rate limit.
    pub send_spacing: Duration,
    /// Number of send attempts after which a job is failed.
    pub max_attempts: u32,
    /// Maximum number of due jobs processed by a single poll.
    pub batch_limit: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(12 * 60 * 60),
            poll_interval: Duration::from_secs(10 * 60),
            send_spacing: Duration::from_secs(2),
            max_attempts: 3,
            batch_limit: 50,
        }
    }
}
