//! Mapping from the settlement provider's status vocabulary to internal
//! transaction statuses.
//!
//! The provider reports status as a free-form string ("depix_sent",
//! "under_review", ...). The table below is the only place that vocabulary
//! is interpreted; a token outside it is a validation error, never a guess.

use crate::domain::transaction::TransactionStatus;
use crate::error::AppError;

/// Map a provider status token to the status the transaction should enter.
///
/// Comparison is case-insensitive because observed provider payloads are not
/// consistent about casing.
pub fn map_provider_status(raw: &str) -> Result<TransactionStatus, AppError> {
    let token = raw.trim().to_ascii_lowercase();
    match token.as_str() {
        "received" | "processing" | "under_review" => Ok(TransactionStatus::Processing),
        "depix_sent" | "sent" | "confirmed" | "paid" => Ok(TransactionStatus::Completed),
        "failed" | "rejected" | "refused" | "error" => Ok(TransactionStatus::Failed),
        "expired" | "canceled" | "cancelled" => Ok(TransactionStatus::Expired),
        _ => Err(AppError::Validation(format!(
            "unknown provider status '{}'",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_settlement_tokens_to_completed() {
        for token in ["depix_sent", "sent", "confirmed", "paid"] {
            assert_eq!(map_provider_status(token).unwrap(), TransactionStatus::Completed);
        }
    }

    #[test]
    fn maps_intermediate_tokens_to_processing() {
        for token in ["received", "processing", "under_review"] {
            assert_eq!(map_provider_status(token).unwrap(), TransactionStatus::Processing);
        }
    }

    #[test]
    fn maps_failure_and_expiry_tokens() {
        assert_eq!(map_provider_status("rejected").unwrap(), TransactionStatus::Failed);
        assert_eq!(map_provider_status("expired").unwrap(), TransactionStatus::Expired);
    }

    #[test]
    fn is_case_insensitive_and_trims() {
        assert_eq!(map_provider_status("DePix_Sent").unwrap(), TransactionStatus::Completed);
        assert_eq!(map_provider_status("  CONFIRMED ").unwrap(), TransactionStatus::Completed);
    }

    #[test]
    fn unknown_token_is_a_validation_error() {
        let err = map_provider_status("definitely_not_a_status").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(map_provider_status("").is_err());
        assert!(map_provider_status("   ").is_err());
    }
}
