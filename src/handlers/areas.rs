//! Owner-facing catalog endpoints under `/api/areas`.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        identity::Email,
        lesson::{ComplementaryLink, Material},
        module::{CohortScope, ContentStatus},
        payment::PaymentStatus,
        session::Session,
    },
    repositories::{lesson::LessonFields, module::ModuleFields},
    response::json,
    services::catalog,
    state::AppState,
    validation::{auth::validate_password, catalog::non_blank},
};

fn draft() -> ContentStatus {
    ContentStatus::Draft
}

fn parse_email(raw: &str) -> Result<Email> {
    Email::parse(raw).ok_or_else(|| AppError::Validation("Invalid email".to_string()))
}

#[derive(Deserialize, Validate)]
pub struct CreateAreaRequest {
    #[garde(length(min = 1, max = 120))]
    pub name: String,
    #[garde(length(min = 3, max = 64))]
    pub slug: String,
}

#[derive(Deserialize, Validate)]
pub struct CreateCohortRequest {
    #[garde(length(min = 1, max = 120))]
    pub name: String,
}

/// A roster entry. `password` enables custom login for the student.
#[derive(Deserialize, Validate)]
pub struct UpsertStudentRequest {
    #[garde(email)]
    pub email: String,
    #[garde(length(max = 120))]
    pub name: Option<String>,
    #[garde(skip)]
    pub cohort_id: Option<Uuid>,
    #[garde(length(min = 8, max = 128))]
    pub password: Option<String>,
}

/// Module fields as sent by the owner. Cohort scopes are `null` for every
/// cohort, `[]` for none, or a list of cohort ids.
#[derive(Deserialize, Validate)]
pub struct ModuleRequest {
    #[garde(length(min = 1, max = 200))]
    pub title: String,
    #[garde(length(max = 5000))]
    pub description: Option<String>,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub position: i32,
    #[serde(default = "draft")]
    #[garde(skip)]
    pub status: ContentStatus,
    #[serde(default)]
    #[garde(skip)]
    pub coming_soon: bool,
    #[serde(default)]
    #[garde(skip)]
    pub coming_soon_cohorts: CohortScope,
    #[serde(default)]
    #[garde(skip)]
    pub is_paid: bool,
    #[garde(skip)]
    pub paid_price_cents: Option<i64>,
    #[garde(skip)]
    pub paid_currency: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub paid_cohorts: CohortScope,
    #[garde(skip)]
    pub paid_product_id: Option<Uuid>,
}

impl From<ModuleRequest> for ModuleFields {
    fn from(req: ModuleRequest) -> Self {
        ModuleFields {
            title: req.title.trim().to_string(),
            description: non_blank(req.description),
            position: req.position,
            status: req.status,
            coming_soon: req.coming_soon,
            coming_soon_cohorts: req.coming_soon_cohorts,
            is_paid: req.is_paid,
            paid_price_cents: req.paid_price_cents,
            paid_currency: non_blank(req.paid_currency),
            paid_cohorts: req.paid_cohorts,
            paid_product_id: req.paid_product_id,
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct LessonRequest {
    #[garde(skip)]
    pub module_id: Option<Uuid>,
    #[garde(length(min = 1, max = 200))]
    pub title: String,
    #[garde(length(max = 5000))]
    pub description: Option<String>,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub position: i32,
    #[serde(default = "draft")]
    #[garde(skip)]
    pub status: ContentStatus,
    #[garde(skip)]
    pub video_url: Option<String>,
    #[garde(skip)]
    pub embed_url: Option<String>,
    #[garde(skip)]
    pub hls_url: Option<String>,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub duration_seconds: i32,
    #[serde(default)]
    #[garde(skip)]
    pub is_scheduled: bool,
    #[garde(skip)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[garde(length(max = 50))]
    pub complementary_links: Vec<ComplementaryLink>,
    #[serde(default)]
    #[garde(length(max = 50))]
    pub materials: Vec<Material>,
}

impl From<LessonRequest> for LessonFields {
    fn from(req: LessonRequest) -> Self {
        LessonFields {
            module_id: req.module_id,
            title: req.title.trim().to_string(),
            description: non_blank(req.description),
            position: req.position,
            status: req.status,
            video_url: non_blank(req.video_url),
            embed_url: non_blank(req.embed_url),
            hls_url: non_blank(req.hls_url),
            duration_seconds: req.duration_seconds,
            is_scheduled: req.is_scheduled,
            scheduled_at: req.scheduled_at,
            complementary_links: req.complementary_links,
            materials: req.materials,
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct GrantRequest {
    #[garde(email)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct PaymentsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct RejectRequest {
    #[serde(default)]
    #[garde(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Serialize)]
struct Deleted {
    success: bool,
}

#[derive(Serialize)]
struct GrantList {
    module_id: Uuid,
    students: Vec<String>,
}

pub async fn create_area(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<CreateAreaRequest>,
) -> Result<Response> {
    payload.validate()?;
    let area = catalog::create_area(&state, &session, &payload.name, &payload.slug).await?;
    json(StatusCode::CREATED, &area)
}

pub async fn list_areas(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response> {
    let areas = catalog::list_areas(&state, &session).await?;
    json(StatusCode::OK, &areas)
}

pub async fn create_cohort(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
    Json(payload): Json<CreateCohortRequest>,
) -> Result<Response> {
    payload.validate()?;
    let cohort = catalog::create_cohort(&state, &session, area_id, &payload.name).await?;
    json(StatusCode::CREATED, &cohort)
}

pub async fn list_cohorts(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
) -> Result<Response> {
    let cohorts = catalog::list_cohorts(&state, &session, area_id).await?;
    json(StatusCode::OK, &cohorts)
}

pub async fn upsert_student(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
    Json(payload): Json<UpsertStudentRequest>,
) -> Result<Response> {
    payload.validate()?;
    if let Some(password) = payload.password.as_deref() {
        validate_password(password)?;
    }
    let email = parse_email(&payload.email)?;
    let name = non_blank(payload.name);

    let student = catalog::upsert_student(
        &state,
        &session,
        area_id,
        &email,
        name.as_deref(),
        payload.cohort_id,
        payload.password.as_deref(),
    )
    .await?;
    json(StatusCode::OK, &student)
}

pub async fn list_students(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
) -> Result<Response> {
    let students = catalog::list_students(&state, &session, area_id).await?;
    json(StatusCode::OK, &students)
}

pub async fn create_module(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
    Json(payload): Json<ModuleRequest>,
) -> Result<Response> {
    payload.validate()?;
    let module = catalog::create_module(&state, &session, area_id, &payload.into()).await?;
    json(StatusCode::CREATED, &module)
}

pub async fn list_modules(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
) -> Result<Response> {
    let modules = catalog::list_modules(&state, &session, area_id).await?;
    json(StatusCode::OK, &modules)
}

pub async fn update_module(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, module_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ModuleRequest>,
) -> Result<Response> {
    payload.validate()?;
    let module = catalog::update_module(&state, &session, area_id, module_id, &payload.into()).await?;
    json(StatusCode::OK, &module)
}

pub async fn delete_module(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, module_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    catalog::delete_module(&state, &session, area_id, module_id).await?;
    json(StatusCode::OK, &Deleted { success: true })
}

pub async fn create_lesson(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
    Json(payload): Json<LessonRequest>,
) -> Result<Response> {
    payload.validate()?;
    let lesson = catalog::create_lesson(&state, &session, area_id, payload.into()).await?;
    json(StatusCode::CREATED, &lesson)
}

pub async fn list_lessons(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
) -> Result<Response> {
    let lessons = catalog::list_lessons(&state, &session, area_id).await?;
    json(StatusCode::OK, &lessons)
}

pub async fn update_lesson(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, lesson_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<LessonRequest>,
) -> Result<Response> {
    payload.validate()?;
    let lesson = catalog::update_lesson(&state, &session, area_id, lesson_id, payload.into()).await?;
    json(StatusCode::OK, &lesson)
}

pub async fn delete_lesson(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    catalog::delete_lesson(&state, &session, area_id, lesson_id).await?;
    json(StatusCode::OK, &Deleted { success: true })
}

pub async fn grant_module(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, module_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<GrantRequest>,
) -> Result<Response> {
    payload.validate()?;
    let email = parse_email(&payload.email)?;
    catalog::grant_module(&state, &session, area_id, module_id, &email).await?;
    json(StatusCode::CREATED, &Deleted { success: true })
}

pub async fn list_grants(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, module_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let students = catalog::list_grants(&state, &session, area_id, module_id).await?;
    json(StatusCode::OK, &GrantList { module_id, students })
}

pub async fn revoke_module(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, module_id, email)): Path<(Uuid, Uuid, String)>,
) -> Result<Response> {
    let email = parse_email(&email)?;
    catalog::revoke_module(&state, &session, area_id, module_id, &email).await?;
    json(StatusCode::OK, &Deleted { success: true })
}

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
    Query(query): Query<PaymentsQuery>,
) -> Result<Response> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<PaymentStatus>)
        .transpose()?;
    let payments = catalog::list_payments(&state, &session, area_id, status).await?;
    json(StatusCode::OK, &payments)
}

/// Streams back the proof of a bank transfer for review.
pub async fn payment_proof(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let (bytes, mime) = catalog::payment_proof(&state, &session, area_id, payment_id).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        bytes,
    )
        .into_response())
}

/// Uploads a material file from the `file` multipart field.
pub async fn upload_material(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(area_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Response> {
    let _permit = state.upload_limiter.acquire().await?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Multipart(format!("Parse error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("file").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Multipart(format!("file: {}", e)))?;
        upload = Some((file_name, bytes.to_vec()));
    }

    let (file_name, bytes) = upload.ok_or_else(|| AppError::Validation("Missing file".to_string()))?;
    let material = catalog::upload_material(&state, &session, area_id, &file_name, &bytes).await?;
    json(StatusCode::CREATED, &material)
}

pub async fn approve_payment(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let payment = catalog::approve_payment(&state, &session, area_id, payment_id).await?;
    json(StatusCode::OK, &payment)
}

pub async fn reject_payment(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((area_id, payment_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RejectRequest>,
) -> Result<Response> {
    payload.validate()?;
    let reason = non_blank(payload.reason);
    let payment = catalog::reject_payment(&state, &session, area_id, payment_id, reason.as_deref()).await?;
    json(StatusCode::OK, &payment)
}
