use deadpool_postgres::Pool;
use uuid::Uuid;
use crate::{
    error::Result,
    models::payment::{ModulePayment, PaymentMethod, PaymentStatus},
};

/// Values of a new payment row.
#[derive(Debug, Clone)]
pub struct NewPayment<'a> {
    pub id: Uuid,
    pub area_id: Uuid,
    pub module_id: Uuid,
    pub student_email: &'a str,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub reference: Option<&'a str>,
    pub proof_path: Option<&'a str>,
    pub proof_checksum: Option<&'a str>,
}

/// Inserts a payment row.
pub async fn insert(pool: &Pool, payment: &NewPayment<'_>) -> Result<ModulePayment> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO module_payments (
                id, area_id, module_id, student_email, method, status,
                amount_cents, currency, reference, proof_path, proof_checksum
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
            &[
                &payment.id,
                &payment.area_id,
                &payment.module_id,
                &payment.student_email,
                &payment.method.as_str(),
                &payment.status.as_str(),
                &payment.amount_cents,
                &payment.currency,
                &payment.reference,
                &payment.proof_path,
                &payment.proof_checksum,
            ],
        )
        .await?;
    ModulePayment::try_from(&row)
}

/// Finds a payment by ID.
pub async fn find(pool: &Pool, payment_id: &Uuid) -> Result<Option<ModulePayment>> {
    let client = pool.get().await?;
    let row = client
        .query_opt("SELECT * FROM module_payments WHERE id = $1", &[payment_id])
        .await?;
    row.as_ref().map(ModulePayment::try_from).transpose()
}

/// Moves a payment from one of `from` to `to`. Returns the updated row, or
/// `None` when the payment was not in any of the expected states.
pub async fn transition(
    pool: &Pool,
    payment_id: &Uuid,
    from: &[PaymentStatus],
    to: PaymentStatus,
) -> Result<Option<ModulePayment>> {
    let client = pool.get().await?;
    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let row = client
        .query_opt(
            r#"
            UPDATE module_payments
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
            &[payment_id, &to.as_str(), &from],
        )
        .await?;
    row.as_ref().map(ModulePayment::try_from).transpose()
}

/// Stores what the provider answered for a `processing` payment. Returns
/// `None` when the payment was settled by someone else meanwhile.
pub async fn record_outcome(
    pool: &Pool,
    payment_id: &Uuid,
    status: PaymentStatus,
    reference: Option<&str>,
    proof_path: Option<&str>,
    proof_checksum: Option<&str>,
) -> Result<Option<ModulePayment>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE module_payments
            SET status = $2,
                reference = COALESCE($3, reference),
                proof_path = COALESCE($4, proof_path),
                proof_checksum = COALESCE($5, proof_checksum),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
            &[payment_id, &status.as_str(), &reference, &proof_path, &proof_checksum],
        )
        .await?;
    row.as_ref().map(ModulePayment::try_from).transpose()
}

/// Lists the payments of an area, optionally filtered by status.
pub async fn list_for_area(
    pool: &Pool,
    area_id: &Uuid,
    status: Option<PaymentStatus>,
) -> Result<Vec<ModulePayment>> {
    let client = pool.get().await?;
    let status = status.map(|s| s.as_str());
    let rows = client
        .query(
            r#"
            SELECT * FROM module_payments
            WHERE area_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
            &[area_id, &status],
        )
        .await?;
    rows.iter().map(ModulePayment::try_from).collect()
}
