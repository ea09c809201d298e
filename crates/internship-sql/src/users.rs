use models::{Role, User, UserRecord};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, first_name, last_name, phone, role, created_at";

pub async fn create_user(
    email: &str,
    password_hash: &str,
    first_name: &str,
    last_name: &str,
    phone: Option<&str>,
    role: Role,
    pool: &sqlx::PgPool,
) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(&format!(
        r#"insert into utilisateurs (email, password_hash, first_name, last_name, phone, role)
        values (lower($1), $2, $3, $4, $5, $6)
        returning {USER_COLUMNS}"#
    ))
    .bind(email)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(phone)
    .bind(role)
    .fetch_one(pool)
    .await
}

pub async fn fetch_user(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "select {USER_COLUMNS} from utilisateurs where id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Fetch the complete record of the user having `email`, for login.
/// Emails are matched case-insensitively.
pub async fn fetch_user_by_email(
    email: &str,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>(
        r#"select id, email, password_hash, first_name, last_name, phone, role, created_at
        from utilisateurs
        where email = lower($1)"#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

pub async fn list_students(pool: &sqlx::PgPool) -> sqlx::Result<Vec<User>> {
    sqlx::query_as::<_, User>(&format!(
        r#"select {USER_COLUMNS} from utilisateurs
        where role = 'student'
        order by last_name asc, first_name asc"#
    ))
    .fetch_all(pool)
    .await
}

pub async fn student_ids(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>("select id from utilisateurs where role = 'student'")
        .fetch_all(pool)
        .await
}

/// Fetch the phone number of a user, which may be absent.
pub async fn fetch_phone(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<Option<String>> {
    let phone: Option<Option<String>> =
        sqlx::query_scalar("select phone from utilisateurs where id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(phone.flatten())
}

pub async fn update_profile(
    id: Uuid,
    first_name: &str,
    last_name: &str,
    phone: Option<&str>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        r#"update utilisateurs set
            first_name = $2,
            last_name = $3,
            phone = $4
        where id = $1
        returning {USER_COLUMNS}"#
    ))
    .bind(id)
    .bind(first_name)
    .bind(last_name)
    .bind(phone)
    .fetch_optional(pool)
    .await
}

/// Create the admin user having `email`, or promote and re-key it if it exists.
pub async fn upsert_admin(
    email: &str,
    password_hash: &str,
    pool: &sqlx::PgPool,
) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(&format!(
        r#"insert into utilisateurs (email, password_hash, first_name, last_name, role)
        values (lower($1), $2, 'Admin', '', 'admin')
        on conflict (email) do update set
            password_hash = excluded.password_hash,
            role = 'admin'
        returning {USER_COLUMNS}"#
    ))
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await
}

pub async fn count_by_role(role: Role, pool: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("select count(*) from utilisateurs where role = $1")
        .bind(role)
        .fetch_one(pool)
        .await
}
