//! Payment provider adapter.
//!
//! Payments are processed by serverless functions on the provider side; this
//! module turns a charge into a function invocation and maps the answer onto
//! a [`PaymentOutcome`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};
use crate::models::payment::{PaymentMethod, PaymentOutcome};

const FUNCTION_TIMEOUT: Duration = Duration::from_secs(30);

/// One charge against the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub area_id: Uuid,
    pub module_id: Uuid,
    pub product_id: Option<Uuid>,
    pub student_email: String,
    pub amount_cents: i64,
    pub currency: String,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Processes module purchases.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charges the student. Provider declines are `Ok(PaymentOutcome::Failure)`;
    /// `Err` means the provider could not be reached.
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentOutcome>;
}

/// The edge function that handles a payment method, if any.
pub fn function_name(method: PaymentMethod) -> Option<&'static str> {
    match method {
        PaymentMethod::Card => Some("process-card-payment"),
        PaymentMethod::MobileMoney => Some("process-mobile-money-payment"),
        PaymentMethod::Reference => Some("create-payment-reference"),
        PaymentMethod::BankTransfer => None,
    }
}

/// The `{success, ...payload}` envelope every function answers with.
#[derive(Debug, Default, Deserialize)]
struct FunctionResponse {
    #[serde(default)]
    success: bool,
    transaction_id: Option<String>,
    reference: Option<String>,
    entity: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    error: Option<String>,
    message: Option<String>,
}

/// Maps a function answer onto an outcome.
///
/// A successful reference call without a reference is treated as a failure,
/// since there is nothing the student could pay against.
pub fn outcome_from_response(method: PaymentMethod, status: u16, body: &str) -> PaymentOutcome {
    let response: FunctionResponse = match sonic_rs::from_str(body) {
        Ok(response) => response,
        Err(_) => {
            return PaymentOutcome::Failure {
                message: format!("Payment provider returned an unreadable response ({})", status),
            };
        }
    };

    if !(200..300).contains(&status) || !response.success {
        let message = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "Payment was declined".to_string());
        return PaymentOutcome::Failure { message };
    }

    match method {
        PaymentMethod::Reference => match response.reference {
            Some(reference) if !reference.trim().is_empty() => PaymentOutcome::AwaitingReference {
                reference,
                entity: response.entity,
                expires_at: response.expires_at,
            },
            _ => PaymentOutcome::Failure {
                message: "Payment provider did not return a reference".to_string(),
            },
        },
        PaymentMethod::BankTransfer => PaymentOutcome::PendingReview,
        PaymentMethod::Card | PaymentMethod::MobileMoney => PaymentOutcome::Success {
            transaction_id: response.transaction_id,
        },
    }
}

/// Invokes the provider's functions over HTTP.
pub struct EdgeFunctionProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: Zeroizing<String>,
}

impl EdgeFunctionProcessor {
    pub fn new(base_url: String, api_key: Zeroizing<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(FUNCTION_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// POSTs `body` to a function and returns the status and raw body.
    async fn invoke<T: Serialize + ?Sized>(&self, function: &str, body: &T) -> Result<(u16, String)> {
        let url = format!("{}/functions/v1/{}", self.base_url, function);
        let payload = sonic_rs::to_string(body)
            .map_err(|e| AppError::Internal(format!("Function payload serialization failed: {}", e)))?;

        tracing::debug!("📡 Invoking function {}", function);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.as_str()))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("❌ Function {} unreachable: {}", function, e);
                AppError::Http(e)
            })?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl PaymentProcessor for EdgeFunctionProcessor {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentOutcome> {
        let Some(function) = function_name(request.method) else {
            return Ok(PaymentOutcome::PendingReview);
        };

        let (status, body) = self.invoke(function, request).await?;
        let outcome = outcome_from_response(request.method, status, &body);

        match &outcome {
            PaymentOutcome::Failure { message } => {
                tracing::warn!("⚠️ Payment {} declined: {}", request.payment_id, message)
            }
            other => tracing::info!("✅ Payment {} -> {:?}", request.payment_id, other.status()),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_transfer_has_no_function() {
        assert_eq!(function_name(PaymentMethod::BankTransfer), None);
        assert_eq!(function_name(PaymentMethod::Card), Some("process-card-payment"));
    }

    #[test]
    fn card_success_carries_transaction() {
        let outcome = outcome_from_response(
            PaymentMethod::Card,
            200,
            r#"{"success":true,"transaction_id":"tx_1"}"#,
        );
        assert_eq!(
            outcome,
            PaymentOutcome::Success { transaction_id: Some("tx_1".into()) }
        );
    }

    #[test]
    fn reference_success_awaits_payment() {
        let outcome = outcome_from_response(
            PaymentMethod::Reference,
            200,
            r#"{"success":true,"reference":"123 456 789","entity":"11111"}"#,
        );
        assert!(matches!(
            outcome,
            PaymentOutcome::AwaitingReference { ref reference, .. } if reference == "123 456 789"
        ));
    }

    #[test]
    fn reference_without_number_fails() {
        let outcome = outcome_from_response(PaymentMethod::Reference, 200, r#"{"success":true}"#);
        assert!(matches!(outcome, PaymentOutcome::Failure { .. }));
    }

    #[test]
    fn declines_and_errors_surface_the_message() {
        assert_eq!(
            outcome_from_response(
                PaymentMethod::MobileMoney,
                200,
                r#"{"success":false,"error":"Insufficient funds"}"#
            ),
            PaymentOutcome::Failure { message: "Insufficient funds".into() }
        );
        assert_eq!(
            outcome_from_response(PaymentMethod::Card, 500, r#"{"success":true}"#),
            PaymentOutcome::Failure { message: "Payment was declined".into() }
        );
        assert!(matches!(
            outcome_from_response(PaymentMethod::Card, 502, "<html>bad gateway</html>"),
            PaymentOutcome::Failure { .. }
        ));
    }
}
