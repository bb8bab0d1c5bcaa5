use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{DeliveryStatus, TransactionStatus, TransactionType, WebhookEventType};

/// Payment intent created when a deposit/payment is issued. The external id
/// is assigned by the settlement provider and, once set, never changes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Integer minor-unit currency; immutable after creation.
    pub amount_cents: i64,
    pub payment_link_id: Option<Uuid>,
    pub is_validation: bool,
    pub bank_tx_id: Option<String>,
    pub blockchain_tx_id: Option<String>,
    pub payer_name: Option<String>,
    pub payer_euid: Option<String>,
    pub payer_tax_number: Option<String>,
    pub pix_key: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        external_id: Option<String>,
        tx_type: TransactionType,
        amount_cents: i64,
        payment_link_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id,
            tx_type,
            status: TransactionStatus::Pending,
            amount_cents,
            payment_link_id,
            is_validation: false,
            bank_tx_id: None,
            blockchain_tx_id: None,
            payer_name: None,
            payer_euid: None,
            payer_tax_number: None,
            pix_key: None,
            processed_at: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A payment link's registration for outbound event notifications.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub payment_link_id: Uuid,
    pub url: String,
    pub events: Vec<WebhookEventType>,
    pub active: bool,
    pub secret: String,
    /// Extra headers sent with every delivery, as a JSON string map.
    pub custom_headers: Option<serde_json::Value>,
    pub max_retries: i32,
    pub base_delay_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One scheduled outbound notification of an event to a subscription.
/// Retries are time-driven through `next_retry_at`, not in-process timers,
/// so pending work survives restarts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub transaction_id: Uuid,
    pub event: WebhookEventType,
    pub payload: serde_json::Value,
    pub signature: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_response_code: Option<i32>,
    pub last_response_body: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Acknowledged-but-not-applied inbound events kept for manual review.
#[derive(Debug, FromRow, Serialize, Deserialize)]
pub struct WebhookAnomaly {
    pub id: Uuid,
    pub external_id: String,
    pub reason: String,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_starts_pending_with_immutable_amount() {
        let tx = Transaction::new(
            Some("qr-123".to_string()),
            TransactionType::Deposit,
            37500,
            None,
            None,
        );

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount_cents, 37500);
        assert!(tx.processed_at.is_none());
        assert!(!tx.is_validation);
    }

    #[test]
    fn transaction_serializes_status_lowercase() {
        let tx = Transaction::new(None, TransactionType::Deposit, 100, None, None);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["tx_type"], "deposit");
    }
}
