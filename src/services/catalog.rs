//! Owner-side management of member areas.
//!
//! Every operation first checks that the platform session owns the area
//! (or is an admin) through [`require_owner`].

use uuid::Uuid;

use crate::crypto::password::hash_password;
use crate::error::{AppError, Result};
use crate::models::identity::Email;
use crate::models::lesson::{Lesson, Material};
use crate::models::member_area::{Cohort, MemberArea, Student};
use crate::models::module::Module;
use crate::models::payment::{ModulePayment, PaymentStatus};
use crate::models::session::Session;
use crate::repositories::{
    grant as grant_repo, lesson as lesson_repo, lesson::LessonFields,
    member_area as area_repo, module as module_repo, module::ModuleFields,
    payment as payment_repo,
};
use crate::services::payment_gate::{self, PROOF_BUCKET};
use crate::services::notifications;
use crate::state::AppState;
use crate::validation::payment::sniff_proof;
use crate::validation::catalog::{
    scoped_cohorts, validate_links, validate_materials, validate_playback_sources, validate_price,
    validate_schedule, validate_slug,
};

/// Public bucket holding lesson materials uploaded by owners.
pub const MATERIALS_BUCKET: &str = "lesson-materials";
/// Largest accepted material upload.
pub const MAX_MATERIAL_BYTES: usize = 100 * 1024 * 1024;

/// Loads an area the session may manage.
pub async fn require_owner(state: &AppState, session: &Session, area_id: &Uuid) -> Result<MemberArea> {
    let area = area_repo::find_area(&state.db, area_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if area.owner_id != session.user_id && !session.is_admin {
        tracing::warn!("🚫 User {} tried to manage area {}", session.user_id, area_id);
        return Err(AppError::Unauthorized);
    }
    Ok(area)
}

pub async fn create_area(state: &AppState, session: &Session, name: &str, slug: &str) -> Result<MemberArea> {
    validate_slug(slug)?;
    if area_repo::slug_exists(&state.db, slug).await? {
        return Err(AppError::Validation("Slug already taken".to_string()));
    }
    let area = area_repo::create_area(&state.db, &session.user_id, name.trim(), slug).await?;
    tracing::info!("✅ Member area {} created by {}", area.id, session.user_id);
    Ok(area)
}

pub async fn list_areas(state: &AppState, session: &Session) -> Result<Vec<MemberArea>> {
    area_repo::list_for_owner(&state.db, &session.user_id).await
}

pub async fn create_cohort(state: &AppState, session: &Session, area_id: Uuid, name: &str) -> Result<Cohort> {
    require_owner(state, session, &area_id).await?;
    let cohort = area_repo::create_cohort(&state.db, &area_id, name.trim()).await?;
    tracing::info!("✅ Cohort {} created in area {}", cohort.id, area_id);
    Ok(cohort)
}

pub async fn list_cohorts(state: &AppState, session: &Session, area_id: Uuid) -> Result<Vec<Cohort>> {
    require_owner(state, session, &area_id).await?;
    area_repo::list_cohorts(&state.db, &area_id).await
}

/// Fails unless every cohort in `ids` belongs to the area.
async fn ensure_cohorts_in_area(state: &AppState, area_id: &Uuid, ids: &[Uuid]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let found = area_repo::count_cohorts_in_area(&state.db, area_id, ids).await?;
    if found != ids.len() as i64 {
        return Err(AppError::Validation(
            "Unknown cohort for this member area".to_string(),
        ));
    }
    Ok(())
}

/// Adds or updates a roster entry. A password enables custom login.
pub async fn upsert_student(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    email: &Email,
    name: Option<&str>,
    cohort_id: Option<Uuid>,
    password: Option<&str>,
) -> Result<Student> {
    require_owner(state, session, &area_id).await?;
    if let Some(cohort_id) = cohort_id {
        ensure_cohorts_in_area(state, &area_id, &[cohort_id]).await?;
    }

    let password_hash = password.map(hash_password).transpose()?;
    let student = area_repo::upsert_student(
        &state.db,
        &area_id,
        email,
        name,
        cohort_id,
        password_hash.as_deref(),
    )
    .await?;

    notifications::invalidate_entitlements(state, &area_id, email, None).await;
    tracing::info!("✅ Student {} saved in area {}", email, area_id);
    Ok(student)
}

pub async fn list_students(state: &AppState, session: &Session, area_id: Uuid) -> Result<Vec<Student>> {
    require_owner(state, session, &area_id).await?;
    area_repo::list_students(&state.db, &area_id).await
}

async fn check_module_fields(state: &AppState, area_id: &Uuid, fields: &ModuleFields) -> Result<()> {
    validate_price(fields.is_paid, fields.paid_price_cents, fields.paid_currency.as_deref())?;
    let ids = scoped_cohorts([&fields.coming_soon_cohorts, &fields.paid_cohorts]);
    ensure_cohorts_in_area(state, area_id, &ids).await
}

pub async fn create_module(state: &AppState, session: &Session, area_id: Uuid, fields: &ModuleFields) -> Result<Module> {
    require_owner(state, session, &area_id).await?;
    check_module_fields(state, &area_id, fields).await?;
    let module = module_repo::create_module(&state.db, &area_id, fields).await?;
    tracing::info!("✅ Module {} created in area {}", module.id, area_id);
    Ok(module)
}

pub async fn update_module(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    module_id: Uuid,
    fields: &ModuleFields,
) -> Result<Module> {
    require_owner(state, session, &area_id).await?;
    check_module_fields(state, &area_id, fields).await?;
    let module = module_repo::update_module(&state.db, &area_id, &module_id, fields)
        .await?
        .ok_or(AppError::NotFound)?;
    tracing::info!("✅ Module {} updated", module.id);
    Ok(module)
}

pub async fn delete_module(state: &AppState, session: &Session, area_id: Uuid, module_id: Uuid) -> Result<()> {
    require_owner(state, session, &area_id).await?;
    if !module_repo::delete_module(&state.db, &area_id, &module_id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!("🗑️ Module {} deleted", module_id);
    Ok(())
}

pub async fn list_modules(state: &AppState, session: &Session, area_id: Uuid) -> Result<Vec<Module>> {
    require_owner(state, session, &area_id).await?;
    module_repo::list_modules(&state.db, &area_id).await
}

/// Validates lesson fields and normalizes the schedule.
async fn check_lesson_fields(state: &AppState, area_id: &Uuid, fields: &mut LessonFields) -> Result<()> {
    validate_playback_sources(
        fields.video_url.as_deref(),
        fields.embed_url.as_deref(),
        fields.hls_url.as_deref(),
    )?;
    fields.scheduled_at = validate_schedule(fields.is_scheduled, fields.scheduled_at)?;
    validate_links(&fields.complementary_links)?;
    validate_materials(&fields.materials)?;

    if let Some(module_id) = fields.module_id {
        module_repo::find_module(&state.db, area_id, &module_id)
            .await?
            .ok_or_else(|| AppError::Validation("Unknown module for this member area".to_string()))?;
    }
    Ok(())
}

pub async fn create_lesson(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    mut fields: LessonFields,
) -> Result<Lesson> {
    require_owner(state, session, &area_id).await?;
    check_lesson_fields(state, &area_id, &mut fields).await?;
    let lesson = lesson_repo::create_lesson(&state.db, &area_id, &fields).await?;
    tracing::info!("✅ Lesson {} created in area {}", lesson.id, area_id);
    Ok(lesson)
}

pub async fn update_lesson(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    lesson_id: Uuid,
    mut fields: LessonFields,
) -> Result<Lesson> {
    require_owner(state, session, &area_id).await?;
    check_lesson_fields(state, &area_id, &mut fields).await?;
    let lesson = lesson_repo::update_lesson(&state.db, &area_id, &lesson_id, &fields)
        .await?
        .ok_or(AppError::NotFound)?;
    tracing::info!("✅ Lesson {} updated", lesson.id);
    Ok(lesson)
}

pub async fn delete_lesson(state: &AppState, session: &Session, area_id: Uuid, lesson_id: Uuid) -> Result<()> {
    require_owner(state, session, &area_id).await?;
    if !lesson_repo::delete_lesson(&state.db, &area_id, &lesson_id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!("🗑️ Lesson {} deleted", lesson_id);
    Ok(())
}

pub async fn list_lessons(state: &AppState, session: &Session, area_id: Uuid) -> Result<Vec<Lesson>> {
    require_owner(state, session, &area_id).await?;
    lesson_repo::list_lessons(&state.db, &area_id).await
}

/// Grants a student individual access to a module.
pub async fn grant_module(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    module_id: Uuid,
    email: &Email,
) -> Result<()> {
    require_owner(state, session, &area_id).await?;
    module_repo::find_module(&state.db, &area_id, &module_id)
        .await?
        .ok_or(AppError::NotFound)?;

    grant_repo::grant(&state.db, &area_id, &module_id, email).await?;
    notifications::invalidate_entitlements(state, &area_id, email, Some(module_id)).await;
    tracing::info!("✅ Module {} granted to {}", module_id, email);
    Ok(())
}

pub async fn revoke_module(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    module_id: Uuid,
    email: &Email,
) -> Result<()> {
    require_owner(state, session, &area_id).await?;
    if !grant_repo::revoke(&state.db, &area_id, &module_id, email).await? {
        return Err(AppError::NotFound);
    }
    notifications::invalidate_entitlements(state, &area_id, email, Some(module_id)).await;
    tracing::info!("🗑️ Module {} revoked from {}", module_id, email);
    Ok(())
}

pub async fn list_grants(state: &AppState, session: &Session, area_id: Uuid, module_id: Uuid) -> Result<Vec<String>> {
    require_owner(state, session, &area_id).await?;
    grant_repo::students_for_module(&state.db, &area_id, &module_id).await
}

pub async fn list_payments(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    status: Option<PaymentStatus>,
) -> Result<Vec<ModulePayment>> {
    require_owner(state, session, &area_id).await?;
    payment_repo::list_for_area(&state.db, &area_id, status).await
}

/// Loads a payment of the area.
async fn area_payment(state: &AppState, area_id: &Uuid, payment_id: &Uuid) -> Result<ModulePayment> {
    match payment_repo::find(&state.db, payment_id).await? {
        Some(payment) if payment.area_id == *area_id => Ok(payment),
        _ => Err(AppError::NotFound),
    }
}

/// Keeps letters, digits, dots, hyphens and underscores of an uploaded
/// file name.
fn storage_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

/// Stores a material file in the public bucket. The returned entry is
/// ready to attach to a lesson.
pub async fn upload_material(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    file_name: &str,
    bytes: &[u8],
) -> Result<Material> {
    require_owner(state, session, &area_id).await?;
    if bytes.is_empty() {
        return Err(AppError::Validation("Material file is empty".to_string()));
    }
    if bytes.len() > MAX_MATERIAL_BYTES {
        return Err(AppError::Validation(format!(
            "Material file exceeds {} MB",
            MAX_MATERIAL_BYTES / (1024 * 1024)
        )));
    }

    let name = storage_file_name(file_name);
    let path = format!("{}/{}-{}", area_id, Uuid::new_v4(), name);
    let url = state.storage.upload(MATERIALS_BUCKET, &path, bytes).await?;
    let kind = infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    tracing::info!("📎 Material {} uploaded to area {} ({} bytes)", name, area_id, bytes.len());
    Ok(Material {
        name: file_name.trim().to_string(),
        url,
        size_bytes: bytes.len() as i64,
        kind: kind.to_string(),
    })
}

/// Reads the proof file of a bank transfer under review.
///
/// # Returns
///
/// The file bytes and their sniffed MIME type.
pub async fn payment_proof(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    payment_id: Uuid,
) -> Result<(Vec<u8>, &'static str)> {
    require_owner(state, session, &area_id).await?;
    let payment = area_payment(state, &area_id, &payment_id).await?;
    let path = payment.proof_path.as_deref().ok_or(AppError::NotFound)?;

    let bytes = state.storage.read(PROOF_BUCKET, path).await?;
    if let Some(expected) = payment.proof_checksum.as_deref() {
        if blake3::hash(&bytes).to_hex().as_str() != expected {
            tracing::error!("❌ Proof checksum mismatch for payment {}", payment_id);
            return Err(AppError::Internal("Proof file is corrupted".to_string()));
        }
    }
    let mime = sniff_proof(&bytes).map(|kind| kind.mime)?;
    Ok((bytes, mime))
}

/// Approves a manually reviewed payment and unlocks the module.
pub async fn approve_payment(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    payment_id: Uuid,
) -> Result<ModulePayment> {
    require_owner(state, session, &area_id).await?;
    area_payment(state, &area_id, &payment_id).await?;
    payment_gate::confirm_payment(state, payment_id).await
}

pub async fn reject_payment(
    state: &AppState,
    session: &Session,
    area_id: Uuid,
    payment_id: Uuid,
    reason: Option<&str>,
) -> Result<ModulePayment> {
    require_owner(state, session, &area_id).await?;
    area_payment(state, &area_id, &payment_id).await?;
    payment_gate::reject_payment(
        state,
        payment_id,
        PaymentStatus::Rejected,
        reason.unwrap_or("Your payment could not be verified"),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_file_names_are_flattened() {
        assert_eq!(storage_file_name("Workbook v2.pdf"), "Workbook_v2.pdf");
        assert_eq!(storage_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(storage_file_name("..."), "file");
        assert_eq!(storage_file_name("  "), "file");
    }
}
