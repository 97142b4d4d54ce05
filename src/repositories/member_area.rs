use deadpool_postgres::Pool;
use uuid::Uuid;
use crate::{
    error::Result,
    models::{
        identity::Email,
        member_area::{Cohort, MemberArea, Student},
    },
};

/// Creates a member area owned by `owner_id`.
pub async fn create_area(pool: &Pool, owner_id: &Uuid, name: &str, slug: &str) -> Result<MemberArea> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO member_areas (owner_id, name, slug)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
            &[owner_id, &name, &slug],
        )
        .await?;
    MemberArea::try_from(&row)
}

/// Lists the areas owned by a user, newest first.
pub async fn list_for_owner(pool: &Pool, owner_id: &Uuid) -> Result<Vec<MemberArea>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM member_areas WHERE owner_id = $1 ORDER BY created_at DESC",
            &[owner_id],
        )
        .await?;
    rows.iter().map(MemberArea::try_from).collect()
}

/// Finds an area by its ID.
pub async fn find_area(pool: &Pool, area_id: &Uuid) -> Result<Option<MemberArea>> {
    let client = pool.get().await?;
    let row = client
        .query_opt("SELECT * FROM member_areas WHERE id = $1", &[area_id])
        .await?;
    row.as_ref().map(MemberArea::try_from).transpose()
}

/// Whether a slug is already used by another area.
pub async fn slug_exists(pool: &Pool, slug: &str) -> Result<bool> {
    let client = pool.get().await?;
    let row = client
        .query_opt("SELECT 1 FROM member_areas WHERE slug = $1", &[&slug])
        .await?;
    Ok(row.is_some())
}

/// Creates a cohort inside an area.
pub async fn create_cohort(pool: &Pool, area_id: &Uuid, name: &str) -> Result<Cohort> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "INSERT INTO cohorts (area_id, name) VALUES ($1, $2) RETURNING *",
            &[area_id, &name],
        )
        .await?;
    Cohort::try_from(&row)
}

/// Lists the cohorts of an area by name.
pub async fn list_cohorts(pool: &Pool, area_id: &Uuid) -> Result<Vec<Cohort>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM cohorts WHERE area_id = $1 ORDER BY name ASC",
            &[area_id],
        )
        .await?;
    rows.iter().map(Cohort::try_from).collect()
}

/// Counts how many of `cohort_ids` belong to the area.
pub async fn count_cohorts_in_area(pool: &Pool, area_id: &Uuid, cohort_ids: &[Uuid]) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT COUNT(*) FROM cohorts WHERE area_id = $1 AND id = ANY($2)",
            &[area_id, &cohort_ids],
        )
        .await?;
    Ok(row.try_get(0).unwrap_or(0))
}

/// Adds a student to the roster, or updates name, cohort and password of
/// an existing entry with the same email.
pub async fn upsert_student(
    pool: &Pool,
    area_id: &Uuid,
    email: &Email,
    name: Option<&str>,
    cohort_id: Option<Uuid>,
    password_hash: Option<&str>,
) -> Result<Student> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO member_area_students (area_id, email, name, cohort_id, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (area_id, email) DO UPDATE
            SET name = COALESCE(EXCLUDED.name, member_area_students.name),
                cohort_id = EXCLUDED.cohort_id,
                password_hash = COALESCE(EXCLUDED.password_hash, member_area_students.password_hash)
            RETURNING *
            "#,
            &[area_id, &email.as_str(), &name, &cohort_id, &password_hash],
        )
        .await?;
    Student::try_from(&row)
}

/// Lists the roster of an area.
pub async fn list_students(pool: &Pool, area_id: &Uuid) -> Result<Vec<Student>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM member_area_students WHERE area_id = $1 ORDER BY email ASC",
            &[area_id],
        )
        .await?;
    rows.iter().map(Student::try_from).collect()
}

/// Finds a roster entry by email.
pub async fn find_student(pool: &Pool, area_id: &Uuid, email: &Email) -> Result<Option<Student>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT * FROM member_area_students WHERE area_id = $1 AND email = $2",
            &[area_id, &email.as_str()],
        )
        .await?;
    row.as_ref().map(Student::try_from).transpose()
}
