//! Student-facing endpoints under `/api/members/{area_id}`.
//!
//! Every route except login and logout runs behind `require_member`, which
//! puts the resolved [`Identity`] into the request extensions.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::{Stream, StreamExt};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::timeout;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    cookies::{create_secure_cookie, expired_cookie, member_session_cookie, SESSION_COOKIE},
    error::{AppError, Result},
    middleware_layer::auth::extract_session_token,
    models::{
        identity::{Email, Identity},
        notification::StudentEvent,
        payment::{PaymentDetails, PaymentMethod},
    },
    response::json,
    services::{identity as identity_service, members, notifications, payment_gate},
    state::AppState,
};

/// Seconds to wait for the next multipart field before giving up.
const PROOF_UPLOAD_TIMEOUT: u64 = 120;

#[derive(Deserialize, Validate)]
pub struct MemberLoginRequest {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Deserialize, Validate)]
pub struct ProgressRequest {
    #[garde(range(min = 0.0))]
    pub current_time_seconds: f64,
    #[garde(range(min = 0.0))]
    pub duration_seconds: f64,
}

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub method: PaymentMethod,
    #[serde(flatten)]
    pub details: PaymentDetails,
}

#[derive(Serialize)]
struct Accepted {
    accepted: bool,
}

#[derive(Serialize)]
struct Success {
    success: bool,
}

/// Custom login against the area roster.
pub async fn login(
    State(state): State<AppState>,
    Path(area_id): Path<Uuid>,
    cookies: Cookies,
    Json(payload): Json<MemberLoginRequest>,
) -> Result<Response> {
    payload.validate()?;
    let email = Email::parse(&payload.email)
        .ok_or_else(|| AppError::Validation("Invalid email".to_string()))?;

    let resolved = identity_service::login(&state, area_id, &email, &payload.password).await?;
    if let Some(token) = resolved.issued_token {
        let max_age = state.config.member_session_ttl_ms / 1000;
        cookies.add(create_secure_cookie(member_session_cookie(&area_id), token, max_age));
    }

    json(StatusCode::OK, &resolved.identity)
}

/// Drops the persisted member session and the live platform session.
pub async fn logout(
    State(state): State<AppState>,
    Path(area_id): Path<Uuid>,
    cookies: Cookies,
) -> Result<Response> {
    let cookie_name = member_session_cookie(&area_id);
    let member_token = cookies.get(&cookie_name).map(|c| c.value().to_string());
    let session_id = extract_session_token(&cookies);

    identity_service::logout(&state, member_token.as_deref(), session_id).await?;

    cookies.add(expired_cookie(cookie_name));
    cookies.add(expired_cookie(SESSION_COOKIE));
    tracing::info!("👋 Member logged out of area {}", area_id);

    json(StatusCode::OK, &Success { success: true })
}

/// The identity resolved for this request.
pub async fn session(Extension(identity): Extension<Identity>) -> Result<Response> {
    json(StatusCode::OK, &identity)
}

pub async fn modules(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let overview = members::overview(&state, &identity).await?;
    json(StatusCode::OK, &overview)
}

pub async fn lesson(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let lesson = members::lesson_detail(&state, &identity, lesson_id).await?;
    json(StatusCode::OK, &lesson)
}

/// Accepts a playback report. The write happens in the background.
pub async fn report_progress(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, lesson_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ProgressRequest>,
) -> Result<Response> {
    payload.validate()?;
    let accepted = members::report_progress(
        &state,
        &identity,
        lesson_id,
        payload.current_time_seconds,
        payload.duration_seconds,
    );
    json(StatusCode::ACCEPTED, &Accepted { accepted })
}

pub async fn progress(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let summary = members::course_progress(&state, &identity).await?;
    json(StatusCode::OK, &summary)
}

pub async fn checkout_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, module_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let view = payment_gate::status(&state, &identity, module_id).await?;
    json(StatusCode::OK, &view)
}

/// Opens the payment dialog for a blocked module.
pub async fn checkout_open(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, module_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let view = payment_gate::open(&state, &identity, module_id).await?;
    json(StatusCode::OK, &view)
}

pub async fn checkout_dismiss(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, module_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let view = payment_gate::dismiss(&state, &identity, module_id).await?;
    json(StatusCode::OK, &view)
}

pub async fn checkout_submit(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, module_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Response> {
    tracing::info!(
        "💳 Checkout submit: module {} by {} via {}",
        module_id,
        identity.email,
        payload.method
    );
    let view = payment_gate::submit(&state, &identity, module_id, payload.method, &payload.details).await?;
    json(StatusCode::OK, &view)
}

/// Receives the bank transfer proof in the `proof` multipart field.
pub async fn checkout_proof(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((_area_id, module_id)): Path<(Uuid, Uuid)>,
    mut multipart: Multipart,
) -> Result<Response> {
    let _permit = state.upload_limiter.acquire().await?;
    tracing::debug!(
        "📤 Proof upload from {} ({} upload slots free)",
        identity.email,
        state.upload_limiter.available_permits()
    );

    let mut proof: Option<Vec<u8>> = None;
    let timeout_duration = Duration::from_secs(PROOF_UPLOAD_TIMEOUT);

    loop {
        match timeout(timeout_duration, multipart.next_field()).await {
            Ok(Ok(Some(field))) => {
                if field.name() != Some("proof") {
                    continue;
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Multipart(format!("proof: {}", e)))?;
                proof = Some(bytes.to_vec());
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(AppError::Multipart(format!("Parse error: {}", e))),
            Err(_) => return Err(AppError::Multipart("Upload timeout exceeded".to_string())),
        }
    }

    let proof = proof.ok_or_else(|| AppError::Validation("Missing proof file".to_string()))?;
    let view = payment_gate::submit_proof(&state, &identity, module_id, &proof).await?;
    json(StatusCode::OK, &view)
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let feed = notifications::list(&state, &identity.area_id, &identity.email).await?;
    json(StatusCode::OK, &feed)
}

pub async fn mark_notifications_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    notifications::mark_read(&state, &identity.area_id, &identity.email).await?;
    json(StatusCode::OK, &Success { success: true })
}

fn to_sse(event: StudentEvent) -> Option<Event> {
    let name = match &event {
        StudentEvent::Notification(_) => "notification",
        StudentEvent::EntitlementsChanged { .. } => "entitlements_changed",
    };
    match sonic_rs::to_string(&event) {
        Ok(data) => Some(Event::default().event(name).data(data)),
        Err(e) => {
            tracing::warn!("⚠️ Dropping unserializable event: {}", e);
            None
        }
    }
}

/// Server-sent events for the acting student. Delivery is at most once;
/// clients refetch on reconnect.
pub async fn notification_stream(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse> {
    let events = notifications::subscribe(&state, &identity.area_id, &identity.email).await?;
    tracing::info!("📡 SSE stream opened for {} in area {}", identity.email, identity.area_id);

    let stream: std::pin::Pin<Box<dyn Stream<Item = std::result::Result<Event, Infallible>> + Send>> =
        Box::pin(events.filter_map(|event| async move { to_sse(event).map(Ok) }));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
