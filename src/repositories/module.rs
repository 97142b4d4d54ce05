use deadpool_postgres::Pool;
use uuid::Uuid;
use crate::{
    error::Result,
    models::module::{CohortScope, ContentStatus, Module},
};

/// Column values written on create and update.
#[derive(Debug, Clone)]
pub struct ModuleFields {
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
    pub status: ContentStatus,
    pub coming_soon: bool,
    pub coming_soon_cohorts: CohortScope,
    pub is_paid: bool,
    pub paid_price_cents: Option<i64>,
    pub paid_currency: Option<String>,
    pub paid_cohorts: CohortScope,
    pub paid_product_id: Option<Uuid>,
}

/// Creates a module in an area.
pub async fn create_module(pool: &Pool, area_id: &Uuid, fields: &ModuleFields) -> Result<Module> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO modules (
                area_id, title, description, position, status, coming_soon,
                coming_soon_cohort_ids, is_paid, paid_price_cents, paid_currency,
                paid_cohort_ids, paid_product_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
            &[
                area_id,
                &fields.title,
                &fields.description,
                &fields.position,
                &fields.status,
                &fields.coming_soon,
                &fields.coming_soon_cohorts.to_nullable(),
                &fields.is_paid,
                &fields.paid_price_cents,
                &fields.paid_currency,
                &fields.paid_cohorts.to_nullable(),
                &fields.paid_product_id,
            ],
        )
        .await?;
    Module::try_from(&row)
}

/// Replaces the editable columns of a module.
pub async fn update_module(
    pool: &Pool,
    area_id: &Uuid,
    module_id: &Uuid,
    fields: &ModuleFields,
) -> Result<Option<Module>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE modules
            SET title = $3, description = $4, position = $5, status = $6,
                coming_soon = $7, coming_soon_cohort_ids = $8, is_paid = $9,
                paid_price_cents = $10, paid_currency = $11, paid_cohort_ids = $12,
                paid_product_id = $13, updated_at = NOW()
            WHERE id = $1 AND area_id = $2
            RETURNING *
            "#,
            &[
                module_id,
                area_id,
                &fields.title,
                &fields.description,
                &fields.position,
                &fields.status,
                &fields.coming_soon,
                &fields.coming_soon_cohorts.to_nullable(),
                &fields.is_paid,
                &fields.paid_price_cents,
                &fields.paid_currency,
                &fields.paid_cohorts.to_nullable(),
                &fields.paid_product_id,
            ],
        )
        .await?;
    row.as_ref().map(Module::try_from).transpose()
}

/// Deletes a module. Returns whether a row was removed.
pub async fn delete_module(pool: &Pool, area_id: &Uuid, module_id: &Uuid) -> Result<bool> {
    let client = pool.get().await?;
    let deleted = client
        .execute(
            "DELETE FROM modules WHERE id = $1 AND area_id = $2",
            &[module_id, area_id],
        )
        .await?;
    Ok(deleted > 0)
}

/// Finds a module of an area.
pub async fn find_module(pool: &Pool, area_id: &Uuid, module_id: &Uuid) -> Result<Option<Module>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT * FROM modules WHERE id = $1 AND area_id = $2",
            &[module_id, area_id],
        )
        .await?;
    row.as_ref().map(Module::try_from).transpose()
}

/// Lists the modules of an area in display order.
pub async fn list_modules(pool: &Pool, area_id: &Uuid) -> Result<Vec<Module>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM modules WHERE area_id = $1 ORDER BY position ASC, created_at ASC",
            &[area_id],
        )
        .await?;
    rows.iter().map(Module::try_from).collect()
}
