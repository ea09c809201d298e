use models::{Application, ApplicationStatus, ApplicationSummary};
use uuid::Uuid;

const APPLICATION_COLUMNS: &str =
    "id, internship_id, student_id, status, message, created_at, updated_at";

const SUMMARY_SELECT: &str = r#"select
        a.id,
        a.internship_id,
        i.title as internship_title,
        i.company,
        a.student_id,
        u.first_name || ' ' || u.last_name as student_name,
        u.email as student_email,
        a.status,
        a.message,
        a.created_at,
        a.updated_at
    from applications a
    join internships i on i.id = a.internship_id
    join utilisateurs u on u.id = a.student_id"#;

/// Apply `student_id` to a published internship.
/// Returns None if the student already applied to it.
pub async fn apply(
    internship_id: Uuid,
    student_id: Uuid,
    message: Option<&str>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<Application>> {
    sqlx::query_as::<_, Application>(&format!(
        r#"insert into applications (internship_id, student_id, message)
        values ($1, $2, $3)
        on conflict (internship_id, student_id) do nothing
        returning {APPLICATION_COLUMNS}"#
    ))
    .bind(internship_id)
    .bind(student_id)
    .bind(message)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_student(
    student_id: Uuid,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<ApplicationSummary>> {
    sqlx::query_as::<_, ApplicationSummary>(&format!(
        "{SUMMARY_SELECT} where a.student_id = $1 order by a.created_at desc"
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await
}

/// List applications, optionally filtered to those having `status`.
pub async fn list_all(
    status: Option<ApplicationStatus>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<ApplicationSummary>> {
    sqlx::query_as::<_, ApplicationSummary>(&format!(
        "{SUMMARY_SELECT} where $1::application_status is null or a.status = $1
        order by a.created_at desc"
    ))
    .bind(status)
    .fetch_all(pool)
    .await
}

pub async fn fetch(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<Option<ApplicationSummary>> {
    sqlx::query_as::<_, ApplicationSummary>(&format!("{SUMMARY_SELECT} where a.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn update_status(
    id: Uuid,
    status: ApplicationStatus,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<Application>> {
    sqlx::query_as::<_, Application>(&format!(
        r#"update applications set status = $2, updated_at = now()
        where id = $1
        returning {APPLICATION_COLUMNS}"#
    ))
    .bind(id)
    .bind(status)
    .fetch_optional(pool)
    .await
}

/// Withdraw a still-pending application of `student_id`.
/// Returns whether an application was removed.
pub async fn withdraw(id: Uuid, student_id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"delete from applications
        where id = $1 and student_id = $2 and status = 'pending'"#,
    )
    .bind(id)
    .bind(student_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() != 0)
}

pub async fn count_by_status(
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<(ApplicationStatus, i64)>> {
    sqlx::query_as::<_, (ApplicationStatus, i64)>(
        "select status, count(*) from applications group by status order by status",
    )
    .fetch_all(pool)
    .await
}
