use chrono::{DateTime, Utc};
use models::{Notification, NotificationKind};
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str = r#"id, user_id, title, message, kind, link, is_read,
    read_at, push_sent_at, sms_sent_at, sms_scheduled_at, created_at"#;

pub async fn insert(
    user_id: Uuid,
    title: &str,
    message: &str,
    kind: NotificationKind,
    link: Option<&str>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Notification> {
    sqlx::query_as::<_, Notification>(&format!(
        r#"insert into notifications (user_id, title, message, kind, link)
        values ($1, $2, $3, $4, $5)
        returning {NOTIFICATION_COLUMNS}"#
    ))
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .bind(link)
    .fetch_one(pool)
    .await
}

/// List notifications of `user_id`, newest first.
pub async fn list(
    user_id: Uuid,
    unread_only: bool,
    limit: i64,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<Notification>> {
    sqlx::query_as::<_, Notification>(&format!(
        r#"select {NOTIFICATION_COLUMNS} from notifications
        where user_id = $1 and (not $2 or not is_read)
        order by created_at desc
        limit $3"#
    ))
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn unread_count(user_id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "select count(*) from notifications where user_id = $1 and not is_read",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Mark notification `id` of `user_id` as read.
/// Returns None if no such notification is owned by the user.
/// An already-read notification is returned unchanged.
pub async fn mark_read(
    user_id: Uuid,
    id: Uuid,
    now: DateTime<Utc>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<Notification>> {
    sqlx::query_as::<_, Notification>(&format!(
        r#"update notifications set
            is_read = true,
            read_at = coalesce(read_at, $3)
        where id = $1 and user_id = $2
        returning {NOTIFICATION_COLUMNS}"#
    ))
    .bind(id)
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// Mark every unread notification of `user_id` as read,
/// returning the IDs of notifications which were updated.
pub async fn mark_all_read(
    user_id: Uuid,
    now: DateTime<Utc>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        r#"update notifications set is_read = true, read_at = $2
        where user_id = $1 and not is_read
        returning id"#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Delete notification `id` of `user_id`, along with its jobs.
pub async fn delete(user_id: Uuid, id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<bool> {
    let result = sqlx::query("delete from notifications where id = $1 and user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() != 0)
}

pub async fn record_push_sent(id: Uuid, at: DateTime<Utc>, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query("update notifications set push_sent_at = $2 where id = $1")
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_sms_sent(id: Uuid, at: DateTime<Utc>, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query("update notifications set sms_sent_at = $2 where id = $1")
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch whether notification `id` is read, or None if it no longer exists.
pub async fn fetch_is_read(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<Option<bool>> {
    sqlx::query_scalar::<_, bool>("select is_read from notifications where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}
