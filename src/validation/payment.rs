use crate::error::{AppError, Result};
use crate::models::payment::{PaymentDetails, PaymentMethod};

/// Largest accepted payment proof.
pub const MAX_PROOF_BYTES: usize = 10 * 1024 * 1024;

/// A sniffed proof file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofKind {
    pub mime: &'static str,
    pub extension: &'static str,
}

const ACCEPTED_PROOFS: [ProofKind; 4] = [
    ProofKind { mime: "image/png", extension: "png" },
    ProofKind { mime: "image/jpeg", extension: "jpg" },
    ProofKind { mime: "image/webp", extension: "webp" },
    ProofKind { mime: "application/pdf", extension: "pdf" },
];

/// Checks the method-specific fields of a checkout submission.
///
/// Bank transfers are rejected here: they go through the proof upload.
pub fn validate_method_details(method: PaymentMethod, details: &PaymentDetails) -> Result<()> {
    match method {
        PaymentMethod::Card => {
            let token = details.card_token.as_deref().map(str::trim).unwrap_or("");
            if token.is_empty() {
                return Err(AppError::Validation("Card payments require a card token".to_string()));
            }
        }
        PaymentMethod::MobileMoney => {
            let phone = details.phone_number.as_deref().map(str::trim).unwrap_or("");
            validate_phone_number(phone)?;
        }
        PaymentMethod::Reference => {}
        PaymentMethod::BankTransfer => {
            return Err(AppError::Validation(
                "Bank transfers require a proof upload".to_string(),
            ));
        }
    }
    Ok(())
}

/// Accepts an optional leading `+` followed by 9 to 15 digits, ignoring
/// spaces.
pub fn validate_phone_number(phone: &str) -> Result<()> {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if !(9..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation("Invalid phone number".to_string()));
    }
    Ok(())
}

/// Sniffs a proof upload from its bytes. The client-declared type is ignored.
pub fn sniff_proof(bytes: &[u8]) -> Result<ProofKind> {
    if bytes.is_empty() {
        return Err(AppError::Validation("Proof file is empty".to_string()));
    }
    if bytes.len() > MAX_PROOF_BYTES {
        return Err(AppError::Validation(format!(
            "Proof file exceeds {} MB",
            MAX_PROOF_BYTES / (1024 * 1024)
        )));
    }

    let mime = infer::get(bytes)
        .map(|kind| kind.mime_type())
        .ok_or_else(|| AppError::Validation("Unrecognized proof file type".to_string()))?;

    ACCEPTED_PROOFS
        .iter()
        .find(|kind| kind.mime == mime)
        .copied()
        .ok_or_else(|| AppError::Validation(format!("Proof files of type {} are not accepted", mime)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const PDF: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";
    const ZIP: &[u8] = &[b'P', b'K', 0x03, 0x04, 0x14, 0, 0, 0];

    #[test]
    fn card_needs_token() {
        assert!(validate_method_details(PaymentMethod::Card, &PaymentDetails::default()).is_err());
        let details = PaymentDetails {
            card_token: Some("tok_123".into()),
            phone_number: None,
        };
        assert!(validate_method_details(PaymentMethod::Card, &details).is_ok());
    }

    #[test]
    fn mobile_money_needs_a_phone() {
        let details = PaymentDetails {
            card_token: None,
            phone_number: Some("+244 923 456 789".into()),
        };
        assert!(validate_method_details(PaymentMethod::MobileMoney, &details).is_ok());
        assert!(validate_phone_number("12ab5678901").is_err());
        assert!(validate_phone_number("1234").is_err());
    }

    #[test]
    fn reference_needs_nothing_and_bank_transfer_needs_proof() {
        assert!(validate_method_details(PaymentMethod::Reference, &PaymentDetails::default()).is_ok());
        assert!(validate_method_details(PaymentMethod::BankTransfer, &PaymentDetails::default()).is_err());
    }

    #[test]
    fn proofs_are_sniffed_from_content() {
        assert_eq!(sniff_proof(PNG).unwrap().extension, "png");
        assert_eq!(sniff_proof(PDF).unwrap().mime, "application/pdf");
        assert!(sniff_proof(ZIP).is_err());
        assert!(sniff_proof(b"just some text").is_err());
        assert!(sniff_proof(&[]).is_err());
    }
}
