//! Module checkout.
//!
//! Each (area, student, module) has a small state machine persisted in
//! Redis:
//!
//! ```text
//! Idle -> PaymentModalOpen -> Processing -> Idle                (success)
//!                                        -> PaymentModalOpen    (failure)
//!                                        -> AwaitingReference   (reference)
//!                                        -> PendingReview       (bank transfer)
//! AwaitingReference | PendingReview -> Idle                     (access granted)
//!                                   -> PaymentModalOpen         (rejected)
//! Processing -> PaymentModalOpen                                (interrupted)
//! ```
//!
//! Only one request at a time may drive a gate through `Processing`; it
//! holds a short-lived claim key in Redis while the provider is called.
//! The payment row is written before the charge, so an interrupted charge
//! stays visible to the area owner as `processing`.
//!
//! Success never flips access locally. Access follows from the grant row
//! written here, and open clients refetch when the entitlement event
//! arrives on their channel.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::identity::{Email, Identity};
use crate::models::module::{ContentStatus, Module};
use crate::models::payment::{
    ModulePayment, PaymentDetails, PaymentMethod, PaymentOutcome, PaymentStatus,
};
use crate::repositories::{
    grant as grant_repo, module as module_repo, payment as payment_repo,
    payment::NewPayment,
};
use crate::services::members::module_access;
use crate::services::notifications;
use crate::services::payments::ChargeRequest;
use crate::state::AppState;
use crate::validation::payment::{sniff_proof, validate_method_details};

const GATE_TTL_SECS: u64 = 7 * 24 * 3600;
/// Outlives the provider call timeout.
const CHECKOUT_CLAIM_SECS: u64 = 120;
const INTERRUPTED_MESSAGE: &str =
    "Your payment could not be completed. If you were charged, the area owner will confirm it shortly.";
pub const PROOF_BUCKET: &str = "payment-proofs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    Idle,
    PaymentModalOpen {
        module_id: Uuid,
        error: Option<String>,
    },
    Processing {
        module_id: Uuid,
        method: PaymentMethod,
    },
    AwaitingReference {
        module_id: Uuid,
        payment_id: Uuid,
        reference: String,
        entity: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    PendingReview {
        module_id: Uuid,
        payment_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    BlockedModuleClicked { module_id: Uuid },
    Submitted { method: PaymentMethod },
    Completed { payment_id: Uuid, outcome: PaymentOutcome },
    /// The work after `Processing` started failed before an outcome was stored.
    Aborted { message: String },
    AccessGranted,
    PaymentRejected { message: String },
    Dismissed,
}

impl GateState {
    fn name(&self) -> &'static str {
        match self {
            GateState::Idle => "idle",
            GateState::PaymentModalOpen { .. } => "payment_modal_open",
            GateState::Processing { .. } => "processing",
            GateState::AwaitingReference { .. } => "awaiting_reference",
            GateState::PendingReview { .. } => "pending_review",
        }
    }

    /// Whether a payment is already in flight or waiting on the provider.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            GateState::Processing { .. }
                | GateState::AwaitingReference { .. }
                | GateState::PendingReview { .. }
        )
    }

    /// Applies one event. Transitions not in the machine are rejected.
    pub fn apply(self, event: GateEvent) -> Result<GateState> {
        let from = self.name();
        let next = match (self, event) {
            (
                GateState::Idle | GateState::PaymentModalOpen { .. },
                GateEvent::BlockedModuleClicked { module_id },
            ) => GateState::PaymentModalOpen { module_id, error: None },

            (GateState::PaymentModalOpen { module_id, .. }, GateEvent::Submitted { method }) => {
                GateState::Processing { module_id, method }
            }

            (GateState::Processing { module_id, .. }, GateEvent::Completed { payment_id, outcome }) => {
                match outcome {
                    PaymentOutcome::Success { .. } => GateState::Idle,
                    PaymentOutcome::Failure { message } => GateState::PaymentModalOpen {
                        module_id,
                        error: Some(message),
                    },
                    PaymentOutcome::AwaitingReference { reference, entity, expires_at } => {
                        GateState::AwaitingReference {
                            module_id,
                            payment_id,
                            reference,
                            entity,
                            expires_at,
                        }
                    }
                    PaymentOutcome::PendingReview => GateState::PendingReview { module_id, payment_id },
                }
            }

            (GateState::Processing { module_id, .. }, GateEvent::Aborted { message }) => {
                GateState::PaymentModalOpen {
                    module_id,
                    error: Some(message),
                }
            }

            (
                GateState::Idle
                | GateState::Processing { .. }
                | GateState::AwaitingReference { .. }
                | GateState::PendingReview { .. },
                GateEvent::AccessGranted,
            ) => GateState::Idle,

            (
                GateState::AwaitingReference { module_id, .. } | GateState::PendingReview { module_id, .. },
                GateEvent::PaymentRejected { message },
            ) => GateState::PaymentModalOpen {
                module_id,
                error: Some(message),
            },

            (GateState::Processing { .. }, GateEvent::Dismissed) => {
                return Err(AppError::Validation(
                    "A payment is being processed".to_string(),
                ));
            }
            (_, GateEvent::Dismissed) => GateState::Idle,

            (_, event) => {
                return Err(AppError::Validation(format!(
                    "Cannot apply {:?} while {}",
                    event, from
                )));
            }
        };
        Ok(next)
    }
}

/// What the checkout endpoints answer with.
#[derive(Debug, Clone, Serialize)]
pub struct GateView {
    pub module_id: Uuid,
    pub gate: GateState,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

impl GateView {
    fn new(module: &Module, gate: GateState) -> Self {
        Self {
            module_id: module.id,
            gate,
            amount_cents: module.paid_price_cents,
            currency: module.paid_currency.clone(),
        }
    }
}

fn gate_key(area_id: &Uuid, email: &Email, module_id: &Uuid) -> String {
    format!("payment_gate:{}:{}:{}", area_id, email, module_id)
}

fn claim_key(area_id: &Uuid, email: &Email, module_id: &Uuid) -> String {
    format!("payment_gate_claim:{}:{}:{}", area_id, email, module_id)
}

const RELEASE_CLAIM: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Exclusive right to move one gate through `Processing`.
struct CheckoutClaim {
    key: String,
    token: String,
}

impl CheckoutClaim {
    /// Takes the claim, or `None` while another request holds it.
    async fn acquire(redis: &mut ConnectionManager, key: String) -> Result<Option<Self>> {
        let token = Uuid::new_v4().to_string();
        let taken: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(CHECKOUT_CLAIM_SECS)
            .query_async(redis)
            .await?;
        Ok(taken.map(|_| Self { key, token }))
    }

    /// Drops the claim unless it already expired and was taken by someone else.
    async fn release(self, redis: &mut ConnectionManager) {
        let released: redis::RedisResult<i32> = redis::Script::new(RELEASE_CLAIM)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(redis)
            .await;
        if let Err(e) = released {
            tracing::warn!("⚠️ Failed to release checkout claim {}: {}", self.key, e);
        }
    }
}

async fn claim_checkout(state: &AppState, identity: &Identity, module_id: &Uuid) -> Result<CheckoutClaim> {
    let mut redis = state.redis.clone();
    CheckoutClaim::acquire(&mut redis, claim_key(&identity.area_id, &identity.email, module_id))
        .await?
        .ok_or_else(|| {
            AppError::Validation("A payment for this module is already being processed".to_string())
        })
}

/// Loads the gate state. Missing or unreadable entries are `Idle`.
async fn load_state(state: &AppState, area_id: &Uuid, email: &Email, module_id: &Uuid) -> GateState {
    let mut redis = state.redis.clone();
    let raw: Option<String> = match redis.get(gate_key(area_id, email, module_id)).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("⚠️ Gate state read failed, assuming idle: {}", e);
            None
        }
    };
    raw.and_then(|raw| sonic_rs::from_str(&raw).ok())
        .unwrap_or(GateState::Idle)
}

async fn save_state(
    state: &AppState,
    area_id: &Uuid,
    email: &Email,
    module_id: &Uuid,
    gate: &GateState,
) -> Result<()> {
    let mut redis = state.redis.clone();
    let key = gate_key(area_id, email, module_id);
    if *gate == GateState::Idle {
        let _: () = redis.del(key).await?;
        return Ok(());
    }
    let json = sonic_rs::to_string(gate)
        .map_err(|e| AppError::Internal(format!("Gate state serialization failed: {}", e)))?;
    let _: () = redis.set_ex(key, json, GATE_TTL_SECS).await?;
    Ok(())
}

/// Loads the gate state, reopening the dialog of a `Processing` gate whose
/// request is gone.
async fn load_recovered(state: &AppState, identity: &Identity, module_id: &Uuid) -> Result<GateState> {
    let gate = load_state(state, &identity.area_id, &identity.email, module_id).await;
    if !matches!(gate, GateState::Processing { .. }) {
        return Ok(gate);
    }

    let mut redis = state.redis.clone();
    let claimed = redis
        .exists::<_, bool>(claim_key(&identity.area_id, &identity.email, module_id))
        .await
        .unwrap_or(true);
    if claimed {
        return Ok(gate);
    }

    tracing::warn!("⚠️ Recovering interrupted checkout of module {} for {}", module_id, identity.email);
    let gate = gate.apply(GateEvent::Aborted {
        message: INTERRUPTED_MESSAGE.to_string(),
    })?;
    save_state(state, &identity.area_id, &identity.email, module_id, &gate).await?;
    Ok(gate)
}

async fn find_module(state: &AppState, identity: &Identity, module_id: &Uuid) -> Result<Module> {
    module_repo::find_module(&state.db, &identity.area_id, module_id)
        .await?
        .ok_or(AppError::NotFound)
}

/// Fails unless the module is currently blocked on payment for `identity`.
async fn ensure_blocked(state: &AppState, identity: &Identity, module: &Module) -> Result<()> {
    if module.status != ContentStatus::Published {
        return Err(AppError::NotFound);
    }
    if module_access(state, identity, module).await.is_paid_blocked {
        Ok(())
    } else {
        Err(AppError::Validation("Module does not require payment".to_string()))
    }
}

fn price_of(module: &Module) -> Result<(i64, String)> {
    match (module.paid_price_cents, module.paid_currency.as_deref()) {
        (Some(amount), Some(currency)) if amount > 0 => Ok((amount, currency.to_string())),
        _ => Err(AppError::Validation("Module has no price configured".to_string())),
    }
}

/// Current checkout state of a module.
pub async fn status(state: &AppState, identity: &Identity, module_id: Uuid) -> Result<GateView> {
    let module = find_module(state, identity, &module_id).await?;
    let gate = load_recovered(state, identity, &module_id).await?;
    Ok(GateView::new(&module, gate))
}

/// Opens the payment dialog for a blocked module. A payment already waiting
/// on the provider is returned as is.
pub async fn open(state: &AppState, identity: &Identity, module_id: Uuid) -> Result<GateView> {
    let module = find_module(state, identity, &module_id).await?;
    let gate = load_recovered(state, identity, &module_id).await?;
    if gate.is_pending() {
        return Ok(GateView::new(&module, gate));
    }

    ensure_blocked(state, identity, &module).await?;
    price_of(&module)?;

    let gate = gate.apply(GateEvent::BlockedModuleClicked { module_id })?;
    save_state(state, &identity.area_id, &identity.email, &module_id, &gate).await?;
    tracing::info!("💳 Checkout opened for module {} by {}", module_id, identity.email);
    Ok(GateView::new(&module, gate))
}

/// Closes the payment dialog.
pub async fn dismiss(state: &AppState, identity: &Identity, module_id: Uuid) -> Result<GateView> {
    let module = find_module(state, identity, &module_id).await?;
    let gate = load_recovered(state, identity, &module_id)
        .await?
        .apply(GateEvent::Dismissed)?;
    save_state(state, &identity.area_id, &identity.email, &module_id, &gate).await?;
    Ok(GateView::new(&module, gate))
}

/// Writes the grant and tells the student's clients to refetch.
async fn grant_access(state: &AppState, area_id: &Uuid, email: &Email, module: &Module) -> Result<()> {
    grant_repo::grant(&state.db, area_id, &module.id, email).await?;
    notifications::invalidate_entitlements(state, area_id, email, Some(module.id)).await;
    notifications::notify(
        state,
        area_id,
        email,
        "Access unlocked",
        &format!("You now have access to {}", module.title),
    )
    .await;
    Ok(())
}

/// Grants access on a paid outcome and moves the gate on. Nothing is saved.
async fn complete(
    state: &AppState,
    identity: &Identity,
    module: &Module,
    processing: &GateState,
    payment: &ModulePayment,
    outcome: PaymentOutcome,
) -> Result<GateState> {
    if outcome.status() == PaymentStatus::Paid {
        grant_access(state, &identity.area_id, &identity.email, module).await?;
    }
    processing.clone().apply(GateEvent::Completed {
        payment_id: payment.id,
        outcome,
    })
}

/// The gate to store once the work that followed a `Processing` save is
/// done. Any error reopens the dialog.
fn settle(processing: GateState, result: &Result<GateState>) -> GateState {
    match result {
        Ok(next) => next.clone(),
        Err(e) => {
            tracing::error!("❌ Checkout interrupted after processing started: {}", e);
            processing
                .apply(GateEvent::Aborted {
                    message: INTERRUPTED_MESSAGE.to_string(),
                })
                .unwrap_or(GateState::Idle)
        }
    }
}

/// Stores the settled gate and answers with it, or with the error that
/// interrupted the checkout.
async fn finish(
    state: &AppState,
    identity: &Identity,
    module: &Module,
    processing: GateState,
    result: Result<GateState>,
) -> Result<GateView> {
    let gate = settle(processing, &result);
    if let Err(e) = save_state(state, &identity.area_id, &identity.email, &module.id, &gate).await {
        // The released claim lets the next read recover the gate.
        tracing::error!("❌ Failed to store gate of module {}: {}", module.id, e);
    }
    result.map(|_| GateView::new(module, gate))
}

fn new_payment<'a>(
    identity: &'a Identity,
    module_id: Uuid,
    payment_id: Uuid,
    method: PaymentMethod,
    amount_cents: i64,
    currency: &'a str,
) -> NewPayment<'a> {
    NewPayment {
        id: payment_id,
        area_id: identity.area_id,
        module_id,
        student_email: identity.email.as_str(),
        method,
        status: PaymentStatus::Processing,
        amount_cents,
        currency,
        reference: None,
        proof_path: None,
        proof_checksum: None,
    }
}

/// Stores the outcome of a `processing` payment. A payment the provider's
/// webhook already confirmed leaves the gate idle.
async fn record_outcome(
    state: &AppState,
    processing: &GateState,
    payment_id: &Uuid,
    outcome: PaymentOutcome,
    proof: Option<(&str, &str)>,
) -> Result<std::result::Result<ModulePayment, GateState>> {
    let reference = match &outcome {
        PaymentOutcome::AwaitingReference { reference, .. } => Some(reference.as_str()),
        _ => None,
    };
    let recorded = payment_repo::record_outcome(
        &state.db,
        payment_id,
        outcome.status(),
        reference,
        proof.map(|(path, _)| path),
        proof.map(|(_, checksum)| checksum),
    )
    .await?;
    if let Some(payment) = recorded {
        return Ok(Ok(payment));
    }

    match payment_repo::find(&state.db, payment_id).await? {
        Some(payment) if payment.status == PaymentStatus::Paid => {
            Ok(Err(processing.clone().apply(GateEvent::AccessGranted)?))
        }
        _ => Err(AppError::Validation(
            "Payment was settled while it was processing".to_string(),
        )),
    }
}

/// Records the payment, charges it and stores the outcome.
async fn charge_and_record(
    state: &AppState,
    identity: &Identity,
    module: &Module,
    processing: &GateState,
    request: &ChargeRequest,
) -> Result<GateState> {
    payment_repo::insert(
        &state.db,
        &new_payment(
            identity,
            module.id,
            request.payment_id,
            request.method,
            request.amount_cents,
            &request.currency,
        ),
    )
    .await?;

    // An unreachable provider may still have charged; the row stays `processing`.
    let outcome = state.payments.charge(request).await?;
    let payment = match record_outcome(state, processing, &request.payment_id, outcome.clone(), None).await? {
        Ok(payment) => payment,
        Err(settled) => return Ok(settled),
    };

    complete(state, identity, module, processing, &payment, outcome).await
}

/// Submits the dialog with an instant or reference method.
pub async fn submit(
    state: &AppState,
    identity: &Identity,
    module_id: Uuid,
    method: PaymentMethod,
    details: &PaymentDetails,
) -> Result<GateView> {
    validate_method_details(method, details)?;

    let module = find_module(state, identity, &module_id).await?;
    let (amount_cents, currency) = price_of(&module)?;
    ensure_blocked(state, identity, &module).await?;

    let claim = claim_checkout(state, identity, &module_id).await?;
    let view = submit_claimed(state, identity, &module, method, details, amount_cents, currency).await;
    claim.release(&mut state.redis.clone()).await;
    view
}

async fn submit_claimed(
    state: &AppState,
    identity: &Identity,
    module: &Module,
    method: PaymentMethod,
    details: &PaymentDetails,
    amount_cents: i64,
    currency: String,
) -> Result<GateView> {
    let processing = load_recovered(state, identity, &module.id)
        .await?
        .apply(GateEvent::Submitted { method })?;
    save_state(state, &identity.area_id, &identity.email, &module.id, &processing).await?;

    let request = ChargeRequest {
        payment_id: Uuid::new_v4(),
        area_id: identity.area_id,
        module_id: module.id,
        product_id: module.paid_product_id,
        student_email: identity.email.to_string(),
        amount_cents,
        currency,
        method,
        card_token: details.card_token.clone(),
        phone_number: details.phone_number.clone(),
    };

    tracing::info!(
        "💳 Processing {} payment {} for module {} ({})",
        method,
        request.payment_id,
        module.id,
        identity.email
    );

    let result = charge_and_record(state, identity, module, &processing, &request).await;
    finish(state, identity, module, processing, result).await
}

/// Submits a bank transfer with its proof file. The payment waits for
/// review by the area owner.
pub async fn submit_proof(
    state: &AppState,
    identity: &Identity,
    module_id: Uuid,
    bytes: &[u8],
) -> Result<GateView> {
    sniff_proof(bytes)?;

    let module = find_module(state, identity, &module_id).await?;
    let (amount_cents, currency) = price_of(&module)?;
    ensure_blocked(state, identity, &module).await?;

    let claim = claim_checkout(state, identity, &module_id).await?;
    let view = submit_proof_claimed(state, identity, &module, bytes, amount_cents, &currency).await;
    claim.release(&mut state.redis.clone()).await;
    view
}

async fn submit_proof_claimed(
    state: &AppState,
    identity: &Identity,
    module: &Module,
    bytes: &[u8],
    amount_cents: i64,
    currency: &str,
) -> Result<GateView> {
    let processing = load_recovered(state, identity, &module.id)
        .await?
        .apply(GateEvent::Submitted {
            method: PaymentMethod::BankTransfer,
        })?;
    save_state(state, &identity.area_id, &identity.email, &module.id, &processing).await?;

    let result = store_proof(state, identity, module, &processing, bytes, amount_cents, currency).await;
    finish(state, identity, module, processing, result).await
}

/// Records the payment, stores the proof and marks the payment for review.
async fn store_proof(
    state: &AppState,
    identity: &Identity,
    module: &Module,
    processing: &GateState,
    bytes: &[u8],
    amount_cents: i64,
    currency: &str,
) -> Result<GateState> {
    let kind = sniff_proof(bytes)?;
    let payment_id = Uuid::new_v4();
    payment_repo::insert(
        &state.db,
        &new_payment(
            identity,
            module.id,
            payment_id,
            PaymentMethod::BankTransfer,
            amount_cents,
            currency,
        ),
    )
    .await?;

    let checksum = blake3::hash(bytes).to_hex().to_string();
    let path = format!("{}/{}/{}.{}", identity.area_id, module.id, payment_id, kind.extension);

    let stored = state.storage.upload(PROOF_BUCKET, &path, bytes).await;
    let outcome = match &stored {
        Ok(_) => PaymentOutcome::PendingReview,
        Err(e) => {
            tracing::error!("❌ Failed to store proof for payment {}: {}", payment_id, e);
            PaymentOutcome::Failure {
                message: "Could not store the proof, please try again".to_string(),
            }
        }
    };

    let proof = stored.as_ref().ok().map(|_| (path.as_str(), checksum.as_str()));
    let payment = match record_outcome(state, processing, &payment_id, outcome.clone(), proof).await? {
        Ok(payment) => payment,
        Err(settled) => return Ok(settled),
    };

    tracing::info!(
        "🧾 Proof {} ({}, {} bytes, blake3 {}) received for module {}",
        payment_id,
        kind.mime,
        bytes.len(),
        checksum,
        module.id
    );

    complete(state, identity, module, processing, &payment, outcome).await
}

/// Applies an event to the gate of a payment's student, tolerating a gate
/// that already moved on.
async fn settle_gate(state: &AppState, payment: &ModulePayment, email: &Email, event: GateEvent) {
    let gate = load_state(state, &payment.area_id, email, &payment.module_id).await;
    let next = gate.apply(event).unwrap_or(GateState::Idle);
    if let Err(e) = save_state(state, &payment.area_id, email, &payment.module_id, &next).await {
        tracing::warn!("⚠️ Failed to update gate for payment {}: {}", payment.id, e);
    }
}

/// Confirms a waiting or interrupted payment and unlocks the module.
/// Confirming an already paid payment writes its grant again.
pub async fn confirm_payment(state: &AppState, payment_id: Uuid) -> Result<ModulePayment> {
    let payment = payment_repo::transition(
        &state.db,
        &payment_id,
        &[
            PaymentStatus::Processing,
            PaymentStatus::AwaitingReference,
            PaymentStatus::PendingReview,
        ],
        PaymentStatus::Paid,
    )
    .await?;

    let payment = match payment {
        Some(payment) => payment,
        None => match payment_repo::find(&state.db, &payment_id).await? {
            Some(payment) if payment.status == PaymentStatus::Paid => payment,
            Some(_) => {
                return Err(AppError::Validation(
                    "Payment is not awaiting confirmation".to_string(),
                ));
            }
            None => return Err(AppError::NotFound),
        },
    };

    let email = Email::parse(&payment.student_email)
        .ok_or_else(|| AppError::MissingData("student_email".to_string()))?;
    let module = module_repo::find_module(&state.db, &payment.area_id, &payment.module_id)
        .await?
        .ok_or(AppError::NotFound)?;

    grant_access(state, &payment.area_id, &email, &module).await?;
    settle_gate(state, &payment, &email, GateEvent::AccessGranted).await;

    tracing::info!("✅ Payment {} confirmed, module {} unlocked for {}", payment.id, module.id, email);
    Ok(payment)
}

/// Rejects or fails a waiting or interrupted payment. The student's dialog
/// reopens with `message`.
pub async fn reject_payment(
    state: &AppState,
    payment_id: Uuid,
    status: PaymentStatus,
    message: &str,
) -> Result<ModulePayment> {
    let payment = payment_repo::transition(
        &state.db,
        &payment_id,
        &[
            PaymentStatus::Processing,
            PaymentStatus::AwaitingReference,
            PaymentStatus::PendingReview,
        ],
        status,
    )
    .await?;

    let Some(payment) = payment else {
        return Err(match payment_repo::find(&state.db, &payment_id).await? {
            Some(_) => AppError::Validation("Payment is not awaiting confirmation".to_string()),
            None => AppError::NotFound,
        });
    };

    let email = Email::parse(&payment.student_email)
        .ok_or_else(|| AppError::MissingData("student_email".to_string()))?;

    settle_gate(
        state,
        &payment,
        &email,
        GateEvent::PaymentRejected {
            message: message.to_string(),
        },
    )
    .await;
    notifications::notify(state, &payment.area_id, &email, "Payment not confirmed", message).await;

    tracing::info!("🚫 Payment {} marked {}", payment.id, status.as_str());
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_modal(module_id: Uuid) -> GateState {
        GateState::Idle
            .apply(GateEvent::BlockedModuleClicked { module_id })
            .unwrap()
    }

    #[test]
    fn success_returns_to_idle() {
        let m = Uuid::new_v4();
        let gate = open_modal(m)
            .apply(GateEvent::Submitted { method: PaymentMethod::Card })
            .unwrap();
        assert_eq!(gate, GateState::Processing { module_id: m, method: PaymentMethod::Card });

        let gate = gate
            .apply(GateEvent::Completed {
                payment_id: Uuid::new_v4(),
                outcome: PaymentOutcome::Success { transaction_id: None },
            })
            .unwrap();
        assert_eq!(gate, GateState::Idle);
    }

    #[test]
    fn failure_reopens_the_dialog_with_the_error() {
        let m = Uuid::new_v4();
        let gate = open_modal(m)
            .apply(GateEvent::Submitted { method: PaymentMethod::MobileMoney })
            .unwrap()
            .apply(GateEvent::Completed {
                payment_id: Uuid::new_v4(),
                outcome: PaymentOutcome::Failure { message: "Declined".into() },
            })
            .unwrap();
        assert_eq!(
            gate,
            GateState::PaymentModalOpen { module_id: m, error: Some("Declined".into()) }
        );

        // The student can retry straight away.
        assert!(gate.apply(GateEvent::Submitted { method: PaymentMethod::Card }).is_ok());
    }

    #[test]
    fn reference_waits_until_confirmed() {
        let m = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        let gate = open_modal(m)
            .apply(GateEvent::Submitted { method: PaymentMethod::Reference })
            .unwrap()
            .apply(GateEvent::Completed {
                payment_id,
                outcome: PaymentOutcome::AwaitingReference {
                    reference: "999 123".into(),
                    entity: None,
                    expires_at: None,
                },
            })
            .unwrap();
        assert!(matches!(gate, GateState::AwaitingReference { payment_id: p, .. } if p == payment_id));
        assert!(gate.is_pending());

        assert!(gate.clone().apply(GateEvent::Submitted { method: PaymentMethod::Card }).is_err());
        assert_eq!(gate.apply(GateEvent::AccessGranted).unwrap(), GateState::Idle);
    }

    #[test]
    fn rejected_review_reopens_the_dialog() {
        let m = Uuid::new_v4();
        let gate = GateState::PendingReview { module_id: m, payment_id: Uuid::new_v4() }
            .apply(GateEvent::PaymentRejected { message: "Unreadable proof".into() })
            .unwrap();
        assert_eq!(
            gate,
            GateState::PaymentModalOpen { module_id: m, error: Some("Unreadable proof".into()) }
        );
    }

    #[test]
    fn processing_cannot_be_dismissed_or_resubmitted() {
        let m = Uuid::new_v4();
        let processing = GateState::Processing { module_id: m, method: PaymentMethod::Card };
        assert!(processing.clone().apply(GateEvent::Dismissed).is_err());
        assert!(processing.apply(GateEvent::Submitted { method: PaymentMethod::Card }).is_err());
    }

    #[test]
    fn submitting_requires_an_open_dialog() {
        assert!(GateState::Idle
            .apply(GateEvent::Submitted { method: PaymentMethod::Card })
            .is_err());
        assert_eq!(open_modal(Uuid::new_v4()).apply(GateEvent::Dismissed).unwrap(), GateState::Idle);
    }

    #[test]
    fn state_round_trips_through_json() {
        let state = GateState::PendingReview { module_id: Uuid::nil(), payment_id: Uuid::nil() };
        let json = sonic_rs::to_string(&state).unwrap();
        assert!(json.contains(r#""state":"pending_review""#));
        assert_eq!(sonic_rs::from_str::<GateState>(&json).unwrap(), state);
    }

    #[test]
    fn interrupted_processing_reopens_the_dialog() {
        let m = Uuid::new_v4();
        let gate = GateState::Processing { module_id: m, method: PaymentMethod::Card }
            .apply(GateEvent::Aborted { message: INTERRUPTED_MESSAGE.into() })
            .unwrap();
        assert_eq!(
            gate,
            GateState::PaymentModalOpen { module_id: m, error: Some(INTERRUPTED_MESSAGE.into()) }
        );
        assert!(!gate.is_pending());

        assert!(gate.clone().apply(GateEvent::Submitted { method: PaymentMethod::Card }).is_ok());
        assert_eq!(gate.apply(GateEvent::Dismissed).unwrap(), GateState::Idle);
    }

    #[test]
    fn only_processing_can_be_interrupted() {
        let aborted = GateEvent::Aborted { message: "x".into() };
        assert!(GateState::Idle.apply(aborted.clone()).is_err());
        assert!(GateState::PendingReview { module_id: Uuid::nil(), payment_id: Uuid::nil() }
            .apply(aborted)
            .is_err());
    }

    #[test]
    fn owner_confirmation_settles_a_processing_gate() {
        let processing = GateState::Processing { module_id: Uuid::new_v4(), method: PaymentMethod::Card };
        assert_eq!(processing.apply(GateEvent::AccessGranted).unwrap(), GateState::Idle);
    }

    #[test]
    fn settled_gate_follows_a_completed_checkout() {
        let m = Uuid::new_v4();
        let processing = GateState::Processing { module_id: m, method: PaymentMethod::Card };
        assert_eq!(settle(processing, &Ok(GateState::Idle)), GateState::Idle);
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl crate::services::payments::PaymentProcessor for Unreachable {
        async fn charge(&self, _request: &ChargeRequest) -> Result<PaymentOutcome> {
            Err(AppError::Payment("connection reset".into()))
        }
    }

    fn charge_request(module_id: Uuid) -> ChargeRequest {
        ChargeRequest {
            payment_id: Uuid::new_v4(),
            area_id: Uuid::new_v4(),
            module_id,
            product_id: None,
            student_email: "student@example.com".into(),
            amount_cents: 1500,
            currency: "EUR".into(),
            method: PaymentMethod::Card,
            card_token: Some("tok".into()),
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn provider_error_never_leaves_the_gate_processing() {
        use crate::services::payments::PaymentProcessor;

        let m = Uuid::new_v4();
        let processing = GateState::Processing { module_id: m, method: PaymentMethod::Card };
        let request = charge_request(m);

        let result = match Unreachable.charge(&request).await {
            Ok(outcome) => processing.clone().apply(GateEvent::Completed {
                payment_id: request.payment_id,
                outcome,
            }),
            Err(e) => Err(e),
        };
        assert!(result.is_err());

        let gate = settle(processing, &result);
        assert!(!gate.is_pending());
        assert!(matches!(
            &gate,
            GateState::PaymentModalOpen { module_id, error: Some(_) } if *module_id == m
        ));
        assert_eq!(gate.apply(GateEvent::Dismissed).unwrap(), GateState::Idle);
    }

    #[test]
    fn storage_errors_after_processing_are_settled_too() {
        let m = Uuid::new_v4();
        let processing = GateState::Processing { module_id: m, method: PaymentMethod::BankTransfer };
        let gate = settle(processing, &Err(AppError::Internal("insert failed".into())));
        assert_eq!(
            gate,
            GateState::PaymentModalOpen { module_id: m, error: Some(INTERRUPTED_MESSAGE.into()) }
        );
    }

    #[test]
    fn claims_are_per_student_and_module() {
        let area = Uuid::new_v4();
        let a = Email::parse("a@example.com").unwrap();
        let b = Email::parse("b@example.com").unwrap();
        let m = Uuid::new_v4();
        assert_ne!(claim_key(&area, &a, &m), claim_key(&area, &b, &m));
        assert_ne!(claim_key(&area, &a, &m), gate_key(&area, &a, &m));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn concurrent_checkouts_get_a_single_claim() {
        let client = redis::Client::open("redis://127.0.0.1:6380").unwrap();
        let redis = ConnectionManager::new(client).await.unwrap();
        let key = format!("payment_gate_claim:test:{}", Uuid::new_v4());

        let (mut r1, mut r2) = (redis.clone(), redis.clone());
        let (first, second) = tokio::join!(
            CheckoutClaim::acquire(&mut r1, key.clone()),
            CheckoutClaim::acquire(&mut r2, key.clone()),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.is_some() as u8 + second.is_some() as u8, 1);

        // A stale holder cannot drop a claim it no longer owns.
        let stale = CheckoutClaim { key: key.clone(), token: "stale".into() };
        let mut conn = redis.clone();
        stale.release(&mut conn).await;
        assert!(CheckoutClaim::acquire(&mut conn, key.clone()).await.unwrap().is_none());

        first.or(second).unwrap().release(&mut conn).await;
        let again = CheckoutClaim::acquire(&mut conn, key.clone()).await.unwrap();
        assert!(again.is_some());
        again.unwrap().release(&mut conn).await;
    }
}
