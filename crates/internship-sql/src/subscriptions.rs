use chrono::{DateTime, Utc};
use models::PushSubscription;
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = r#"id, user_id, endpoint, p256dh, auth, user_agent,
    is_active, failure_reason, created_at, last_used_at"#;

/// Insert a subscription, or re-key and re-activate the existing subscription
/// of `endpoint`. A browser which re-subscribes after a failure keeps its endpoint
/// and the subscription moves to whichever user registered it last.
pub async fn upsert(
    user_id: Uuid,
    endpoint: &str,
    p256dh: &str,
    auth: &str,
    user_agent: Option<&str>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<PushSubscription> {
    sqlx::query_as::<_, PushSubscription>(&format!(
        r#"insert into push_subscriptions (user_id, endpoint, p256dh, auth, user_agent)
        values ($1, $2, $3, $4, $5)
        on conflict (endpoint) do update set
            user_id = excluded.user_id,
            p256dh = excluded.p256dh,
            auth = excluded.auth,
            user_agent = excluded.user_agent,
            is_active = true,
            failure_reason = null
        returning {SUBSCRIPTION_COLUMNS}"#
    ))
    .bind(user_id)
    .bind(endpoint)
    .bind(p256dh)
    .bind(auth)
    .bind(user_agent)
    .fetch_one(pool)
    .await
}

pub async fn active_for_user(
    user_id: Uuid,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<PushSubscription>> {
    sqlx::query_as::<_, PushSubscription>(&format!(
        r#"select {SUBSCRIPTION_COLUMNS} from push_subscriptions
        where user_id = $1 and is_active
        order by created_at asc"#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn deactivate(id: Uuid, reason: &str, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query(
        "update push_subscriptions set is_active = false, failure_reason = $2 where id = $1",
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch(id: Uuid, at: DateTime<Utc>, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query("update push_subscriptions set last_used_at = $2 where id = $1")
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove the subscription of `endpoint` owned by `user_id`.
pub async fn remove(user_id: Uuid, endpoint: &str, pool: &sqlx::PgPool) -> sqlx::Result<bool> {
    let result = sqlx::query("delete from push_subscriptions where user_id = $1 and endpoint = $2")
        .bind(user_id)
        .bind(endpoint)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() != 0)
}
