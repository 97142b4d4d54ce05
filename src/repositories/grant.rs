use deadpool_postgres::Pool;
use uuid::Uuid;
use crate::{error::Result, models::identity::Email};

/// Grants one student access to one module. Granting twice is a no-op.
pub async fn grant(pool: &Pool, area_id: &Uuid, module_id: &Uuid, email: &Email) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO module_individual_access (area_id, module_id, student_email)
            VALUES ($1, $2, $3)
            ON CONFLICT (module_id, student_email) DO NOTHING
            "#,
            &[area_id, module_id, &email.as_str()],
        )
        .await?;
    Ok(())
}

/// Revokes a grant. Returns whether a row was removed.
pub async fn revoke(pool: &Pool, area_id: &Uuid, module_id: &Uuid, email: &Email) -> Result<bool> {
    let client = pool.get().await?;
    let deleted = client
        .execute(
            r#"
            DELETE FROM module_individual_access
            WHERE area_id = $1 AND module_id = $2 AND student_email = $3
            "#,
            &[area_id, module_id, &email.as_str()],
        )
        .await?;
    Ok(deleted > 0)
}

/// The modules a student was individually granted inside an area.
pub async fn modules_for_student(pool: &Pool, area_id: &Uuid, email: &Email) -> Result<Vec<Uuid>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT module_id FROM module_individual_access
            WHERE area_id = $1 AND student_email = $2
            "#,
            &[area_id, &email.as_str()],
        )
        .await?;
    Ok(rows.iter().filter_map(|r| r.try_get("module_id").ok()).collect())
}

/// The students individually granted a module.
pub async fn students_for_module(pool: &Pool, area_id: &Uuid, module_id: &Uuid) -> Result<Vec<String>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT student_email FROM module_individual_access
            WHERE area_id = $1 AND module_id = $2
            ORDER BY granted_at ASC
            "#,
            &[area_id, module_id],
        )
        .await?;
    Ok(rows.iter().filter_map(|r| r.try_get("student_email").ok()).collect())
}
