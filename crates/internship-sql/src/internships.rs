use chrono::NaiveDate;
use models::Internship;
use uuid::Uuid;

const INTERNSHIP_COLUMNS: &str = r#"id, title, company, location, description, start_date,
    end_date, contact_email, published, created_by, created_at, updated_at"#;

/// Fields of an Internship which are set by admins.
#[derive(Debug, Clone)]
pub struct InternshipFields {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub contact_email: Option<String>,
    pub published: bool,
}

/// List published offers, soonest start date first.
pub async fn list_published(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Internship>> {
    sqlx::query_as::<_, Internship>(&format!(
        r#"select {INTERNSHIP_COLUMNS} from internships
        where published
        order by start_date asc, created_at desc"#
    ))
    .fetch_all(pool)
    .await
}

/// List every offer, most recently created first.
pub async fn list_all(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Internship>> {
    sqlx::query_as::<_, Internship>(&format!(
        "select {INTERNSHIP_COLUMNS} from internships order by created_at desc"
    ))
    .fetch_all(pool)
    .await
}

pub async fn fetch(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<Option<Internship>> {
    sqlx::query_as::<_, Internship>(&format!(
        "select {INTERNSHIP_COLUMNS} from internships where id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn create(
    fields: &InternshipFields,
    created_by: Uuid,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Internship> {
    sqlx::query_as::<_, Internship>(&format!(
        r#"insert into internships
            (title, company, location, description, start_date, end_date,
             contact_email, published, created_by)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        returning {INTERNSHIP_COLUMNS}"#
    ))
    .bind(&fields.title)
    .bind(&fields.company)
    .bind(&fields.location)
    .bind(&fields.description)
    .bind(fields.start_date)
    .bind(fields.end_date)
    .bind(&fields.contact_email)
    .bind(fields.published)
    .bind(created_by)
    .fetch_one(pool)
    .await
}

/// Update the offer `id`, returning it alongside its prior `published` flag.
pub async fn update(
    id: Uuid,
    fields: &InternshipFields,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<(Internship, bool)>> {
    let mut txn = pool.begin().await?;

    let was_published: Option<bool> =
        sqlx::query_scalar("select published from internships where id = $1 for update")
            .bind(id)
            .fetch_optional(&mut *txn)
            .await?;

    let Some(was_published) = was_published else {
        return Ok(None);
    };

    let updated = sqlx::query_as::<_, Internship>(&format!(
        r#"update internships set
            title = $2,
            company = $3,
            location = $4,
            description = $5,
            start_date = $6,
            end_date = $7,
            contact_email = $8,
            published = $9,
            updated_at = now()
        where id = $1
        returning {INTERNSHIP_COLUMNS}"#
    ))
    .bind(id)
    .bind(&fields.title)
    .bind(&fields.company)
    .bind(&fields.location)
    .bind(&fields.description)
    .bind(fields.start_date)
    .bind(fields.end_date)
    .bind(&fields.contact_email)
    .bind(fields.published)
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok(Some((updated, was_published)))
}

/// Delete the offer `id`, and its applications. Returns whether it existed.
pub async fn delete(id: Uuid, pool: &sqlx::PgPool) -> sqlx::Result<bool> {
    let result = sqlx::query("delete from internships where id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() != 0)
}

pub async fn count(published_only: bool, pool: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("select count(*) from internships where published or not $1")
        .bind(published_only)
        .fetch_one(pool)
        .await
}
