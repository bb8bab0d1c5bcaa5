//! Outbound webhook event vocabulary and delivery lifecycle.

use serde::{Deserialize, Serialize};

/// Event kinds a payment-link subscription can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WebhookEventType {
    Created,
    Processing,
    Completed,
    Failed,
    Refunded,
    Expired,
}

impl sqlx::postgres::PgHasArrayType for WebhookEventType {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_webhook_event_type")
    }
}

impl WebhookEventType {
    /// Name carried in the outbound payload's `event` field.
    pub fn wire_name(&self) -> &'static str {
        match self {
            WebhookEventType::Created => "payment.created",
            WebhookEventType::Processing => "payment.processing",
            WebhookEventType::Completed => "payment.completed",
            WebhookEventType::Failed => "payment.failed",
            WebhookEventType::Refunded => "payment.refunded",
            WebhookEventType::Expired => "payment.expired",
        }
    }
}

/// Lifecycle of a single delivery attempt record.
///
/// `Success` and `Cancelled` are final immediately; `Failed` is final once
/// the attempt budget is exhausted. Only `Pending` rows are ever scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_namespaced() {
        assert_eq!(WebhookEventType::Completed.wire_name(), "payment.completed");
        assert_eq!(WebhookEventType::Expired.wire_name(), "payment.expired");
    }

    #[test]
    fn only_pending_deliveries_are_live() {
        assert!(!DeliveryStatus::Pending.is_final());
        assert!(DeliveryStatus::Success.is_final());
        assert!(DeliveryStatus::Failed.is_final());
        assert!(DeliveryStatus::Cancelled.is_final());
    }
}
