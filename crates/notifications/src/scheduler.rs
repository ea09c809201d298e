use super::{
    format_phone_number, mask_phone_number, EscalationConfig, SmsSender, Store, Templates,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::DueSms;
use std::sync::Arc;

/// PollReport summarizes the jobs processed by one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    /// Jobs which were due.
    pub due: usize,
    /// SMS which were sent.
    pub sent: usize,
    /// Failed sends which will be retried by a later poll.
    pub retried: usize,
    /// Jobs which failed for good.
    pub failed: usize,
    /// Jobs cancelled because their notification was read.
    pub cancelled: usize,
}

/// SmsScheduler sends due SMS escalations of unread notifications.
///
/// It runs as a single in-process loop, and polls are serialized:
/// a poll requested while another is running waits for it to finish.
pub struct SmsScheduler {
    store: Arc<dyn Store>,
    sms: Arc<dyn SmsSender>,
    templates: Arc<Templates>,
    config: EscalationConfig,
    wake: Arc<tokio::sync::Notify>,
    polling: tokio::sync::Mutex<()>,
}

enum Outcome {
    Sent,
    Retried,
    Failed,
    Cancelled,
}

impl SmsScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        sms: Arc<dyn SmsSender>,
        templates: Arc<Templates>,
        config: EscalationConfig,
        wake: Arc<tokio::sync::Notify>,
    ) -> Self {
        Self {
            store,
            sms,
            templates,
            config,
            wake,
            polling: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Poll for due jobs until signaled to stop by `shutdown`.
    /// Polls happen every `poll_interval`, or sooner when woken.
    pub async fn serve(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);

        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            delay = ?self.config.delay,
            "SMS scheduler started"
        );

        loop {
            match self.poll_once(Utc::now()).await {
                Ok(report) if report.due == 0 => tracing::debug!("no SMS escalations are due"),
                Ok(report) => tracing::info!(?report, "processed due SMS escalations"),
                Err(err) => tracing::error!(?err, "failed to poll SMS escalations (will retry)"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => (),
                () = self.wake.notified() => tracing::debug!("SMS scheduler woken"),
                () = &mut shutdown => break,
            }
        }

        tracing::info!("SMS scheduler signaled to stop");
    }

    /// Process the SMS escalations which are due at `now`, one after the other.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> anyhow::Result<PollReport> {
        let _guard = self.polling.lock().await;

        let due = self
            .store
            .due_sms(now, self.config.batch_limit)
            .await
            .context("fetching due SMS escalations")?;

        let mut report = PollReport {
            due: due.len(),
            ..Default::default()
        };
        let mut sent_before = false;

        for job in due {
            let job_id = job.job_id;

            let outcome = self
                .process(job, now, &mut sent_before)
                .await
                .with_context(|| format!("processing SMS escalation job {job_id}"))?;

            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Retried => report.retried += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Cancelled => report.cancelled += 1,
            }
        }

        Ok(report)
    }

    async fn process(
        &self,
        job: DueSms,
        now: DateTime<Utc>,
        sent_before: &mut bool,
    ) -> anyhow::Result<Outcome> {
        // The notification may have been read since the job was fetched.
        if job.is_read || self.store.is_read(job.notification_id).await? != Some(false) {
            self.store.cancel_job(job.job_id).await?;
            return Ok(Outcome::Cancelled);
        }

        let phone = match job.phone.as_deref().map(format_phone_number) {
            None => Err("user has no phone number".to_string()),
            Some(Err(err)) => Err(err.to_string()),
            Some(Ok(phone)) => Ok(phone),
        };
        let phone = match phone {
            Ok(phone) => phone,
            Err(error) => {
                tracing::warn!(job = %job.job_id, user = %job.user_id, %error, "cannot escalate notification to SMS");
                self.store
                    .record_job_failure(job.job_id, now, &error, true)
                    .await?;
                return Ok(Outcome::Failed);
            }
        };
        let text = self.templates.sms_text(&job.title, &job.message)?;

        // Space consecutive sends to stay within the gateway's rate limit.
        if *sent_before {
            tokio::time::sleep(self.config.send_spacing).await;
        }
        *sent_before = true;

        match self.sms.send_sms(&phone, &text).await {
            Ok(receipt) => {
                self.store.complete_job(job.job_id, now).await?;
                self.store
                    .record_sms_sent(job.notification_id, now)
                    .await?;

                tracing::info!(
                    job = %job.job_id,
                    phone = %mask_phone_number(&phone),
                    batch_id = ?receipt.batch_id,
                    "sent SMS escalation"
                );
                Ok(Outcome::Sent)
            }
            Err(err) => {
                let attempts = job.attempts as u32 + 1;
                let terminal = attempts >= self.config.max_attempts;
                let error = format!("{err:#}");

                tracing::warn!(
                    job = %job.job_id,
                    phone = %mask_phone_number(&phone),
                    attempts,
                    terminal,
                    %error,
                    "failed to send SMS escalation"
                );
                self.store
                    .record_job_failure(job.job_id, now, &error, terminal)
                    .await?;

                Ok(if terminal {
                    Outcome::Failed
                } else {
                    Outcome::Retried
                })
            }
        }
    }
}
