use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware_layer::csrf::tokens_match,
    models::payment::PaymentStatus,
    response::json,
    services::payment_gate,
    state::AppState,
};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// What the provider reports for a waiting payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Paid,
    Failed,
}

#[derive(Deserialize)]
pub struct WebhookRequest {
    pub payment_id: Uuid,
    pub status: WebhookStatus,
    pub message: Option<String>,
}

#[derive(Serialize)]
struct WebhookResponse {
    payment_id: Uuid,
    status: PaymentStatus,
}

fn verify_secret(headers: &HeaderMap, secret: &str) -> Result<()> {
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("Missing webhook secret".to_string()))?;
    if !tokens_match(provided, secret) {
        tracing::warn!("🚫 Payment webhook with a wrong secret");
        return Err(AppError::Authentication("Invalid webhook secret".to_string()));
    }
    Ok(())
}

/// Provider callback confirming or failing a reference payment.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookRequest>,
) -> Result<Response> {
    verify_secret(&headers, state.config.payment_webhook_secret.as_str())?;
    tracing::info!("🔔 Payment webhook: {} -> {:?}", payload.payment_id, payload.status);

    let payment = match payload.status {
        WebhookStatus::Paid => payment_gate::confirm_payment(&state, payload.payment_id).await?,
        WebhookStatus::Failed => {
            payment_gate::reject_payment(
                &state,
                payload.payment_id,
                PaymentStatus::Failed,
                payload
                    .message
                    .as_deref()
                    .unwrap_or("The payment was not completed"),
            )
            .await?
        }
    };

    json(
        StatusCode::OK,
        &WebhookResponse {
            payment_id: payment.id,
            status: payment.status,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn secret_must_match() {
        let mut headers = HeaderMap::new();
        assert!(verify_secret(&headers, "s3cret").is_err());

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(verify_secret(&headers, "s3cret").is_err());

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(verify_secret(&headers, "s3cret").is_ok());
    }

    #[test]
    fn webhook_status_parses_lowercase() {
        let req: WebhookRequest = serde_json::from_str(
            r#"{"payment_id":"6c1f3b9e-2a53-4c3e-9d7a-0a1b2c3d4e5f","status":"paid"}"#,
        )
        .unwrap();
        assert_eq!(req.status, WebhookStatus::Paid);
        assert!(req.message.is_none());
    }
}
