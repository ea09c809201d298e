use chrono::{DateTime, Utc};
use models::{DueSms, JobType, ScheduledJob};
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"id, notification_id, job_type, status, scheduled_for, attempts,
    executed_at, error_at, error_message, created_at"#;

/// Schedule an SMS escalation of `notification_id` at `due_at`,
/// and stamp the notification with its scheduled SMS time.
pub async fn schedule_sms(
    notification_id: Uuid,
    due_at: DateTime<Utc>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<ScheduledJob> {
    let mut txn = pool.begin().await?;

    let job = sqlx::query_as::<_, ScheduledJob>(&format!(
        r#"insert into scheduled_jobs (notification_id, job_type, scheduled_for)
        values ($1, $2, $3)
        returning {JOB_COLUMNS}"#
    ))
    .bind(notification_id)
    .bind(JobType::SmsEscalation)
    .bind(due_at)
    .fetch_one(&mut *txn)
    .await?;

    sqlx::query("update notifications set sms_scheduled_at = $2 where id = $1")
        .bind(notification_id)
        .bind(due_at)
        .execute(&mut *txn)
        .await?;

    txn.commit().await?;
    Ok(job)
}

/// Cancel all pending jobs of the given notifications.
/// Returns the number of cancelled jobs.
pub async fn cancel_pending_for_notifications(
    notification_ids: &[Uuid],
    pool: &sqlx::PgPool,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"update scheduled_jobs set status = 'cancelled'
        where notification_id = any($1) and status = 'pending'"#,
    )
    .bind(notification_ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Fetch up to `limit` SMS escalations which are due at `now`.
/// Jobs of notifications which were read are never returned.
pub async fn fetch_due_sms(
    now: DateTime<Utc>,
    limit: i64,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<DueSms>> {
    sqlx::query_as::<_, DueSms>(
        r#"select
            j.id as job_id,
            j.notification_id,
            n.user_id,
            j.attempts,
            j.scheduled_for,
            n.title,
            n.message,
            n.is_read,
            u.phone
        from scheduled_jobs j
        join notifications n on n.id = j.notification_id
        join utilisateurs u on u.id = n.user_id
        where j.job_type = 'sms_escalation'
            and j.status = 'pending'
            and j.scheduled_for <= $1
            and not n.is_read
        order by j.scheduled_for asc
        limit $2"#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn complete(id: Uuid, at: DateTime<Utc>, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query(
        r#"update scheduled_jobs set
            status = 'completed',
            attempts = attempts + 1,
            executed_at = $2
        where id = $1"#,
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed attempt of job `id`. If `terminal`, the job is marked
/// failed; otherwise it remains pending and is retried by a later poll.
pub async fn record_failure(
    id: Uuid,
    at: DateTime<Utc>,
    error: &str,
    terminal: bool,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"update scheduled_jobs set
            status = case when $4 then 'failed'::job_status else status end,
            attempts = attempts + 1,
            error_at = $2,
            error_message = $3
        where id = $1"#,
    )
    .bind(id)
    .bind(at)
    .bind(error)
    .bind(terminal)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn cancel(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query("update scheduled_jobs set status = 'cancelled' where id = $1 and status = 'pending'")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// List the most recently created jobs, for the admin dashboard.
pub async fn list_recent(limit: i64, pool: &sqlx::PgPool) -> sqlx::Result<Vec<ScheduledJob>> {
    sqlx::query_as::<_, ScheduledJob>(&format!(
        "select {JOB_COLUMNS} from scheduled_jobs order by created_at desc limit $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count_pending(pool: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("select count(*) from scheduled_jobs where status = 'pending'")
        .fetch_one(pool)
        .await
}
