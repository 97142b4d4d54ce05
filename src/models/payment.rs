use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// How the student pays for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card charge, confirmed instantly.
    Card,
    /// Mobile wallet push, confirmed instantly.
    MobileMoney,
    /// Payment reference the student pays at a bank or ATM.
    Reference,
    /// Bank transfer with a proof upload reviewed by the owner.
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Reference => "reference",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "mobile_money" => Ok(PaymentMethod::MobileMoney),
            "reference" => Ok(PaymentMethod::Reference),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(AppError::Validation(format!("Unknown payment method: {}", other))),
        }
    }
}

/// Lifecycle of a stored payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded before the provider is called. A row left here was
    /// interrupted and needs the owner to confirm or reject it.
    Processing,
    Paid,
    AwaitingReference,
    PendingReview,
    Failed,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::AwaitingReference => "awaiting_reference",
            PaymentStatus::PendingReview => "pending_review",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(PaymentStatus::Processing),
            "paid" => Ok(PaymentStatus::Paid),
            "awaiting_reference" => Ok(PaymentStatus::AwaitingReference),
            "pending_review" => Ok(PaymentStatus::PendingReview),
            "failed" => Ok(PaymentStatus::Failed),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => Err(AppError::Validation(format!("Unknown payment status: {}", other))),
        }
    }
}

/// Method-specific input collected by the payment dialog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentDetails {
    pub card_token: Option<String>,
    pub phone_number: Option<String>,
}

/// What the payment provider answered, already mapped to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success { transaction_id: Option<String> },
    AwaitingReference {
        reference: String,
        entity: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    PendingReview,
    Failure { message: String },
}

impl PaymentOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Success { .. } => PaymentStatus::Paid,
            PaymentOutcome::AwaitingReference { .. } => PaymentStatus::AwaitingReference,
            PaymentOutcome::PendingReview => PaymentStatus::PendingReview,
            PaymentOutcome::Failure { .. } => PaymentStatus::Failed,
        }
    }
}

/// A payment attempt for a module.
#[derive(Debug, Clone, Serialize)]
pub struct ModulePayment {
    pub id: Uuid,
    pub area_id: Uuid,
    pub module_id: Uuid,
    pub student_email: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub reference: Option<String>,
    pub proof_path: Option<String>,
    pub proof_checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for ModulePayment {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        let method: String = row.try_get("method").map_err(|_| get("method"))?;
        let status: String = row.try_get("status").map_err(|_| get("status"))?;
        Ok(Self {
            id: row.try_get("id").map_err(|_| get("id"))?,
            area_id: row.try_get("area_id").map_err(|_| get("area_id"))?,
            module_id: row.try_get("module_id").map_err(|_| get("module_id"))?,
            student_email: row.try_get("student_email").map_err(|_| get("student_email"))?,
            method: method.parse().map_err(|_| get("method"))?,
            status: status.parse().map_err(|_| get("status"))?,
            amount_cents: row.try_get("amount_cents").map_err(|_| get("amount_cents"))?,
            currency: row.try_get("currency").map_err(|_| get("currency"))?,
            reference: row.try_get("reference").map_err(|_| get("reference"))?,
            proof_path: row.try_get("proof_path").map_err(|_| get("proof_path"))?,
            proof_checksum: row.try_get("proof_checksum").map_err(|_| get("proof_checksum"))?,
            created_at: row.try_get("created_at").map_err(|_| get("created_at"))?,
            updated_at: row.try_get("updated_at").map_err(|_| get("updated_at"))?,
        })
    }
}
