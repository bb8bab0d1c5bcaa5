//! Inbound deposit webhook processing.
//!
//! One call per provider delivery: locate the transaction by external id,
//! apply exactly one state-machine transition, and record the outbound
//! fan-out in the same database transaction. Redeliveries resolve through
//! the replay guard or the idempotency path without side effects.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto;
use crate::db::models::{Transaction, WebhookDelivery, WebhookSubscription};
use crate::db::queries::{self, SettlementFields};
use crate::domain::{map_provider_status, DeliveryStatus, TransactionStatus, WebhookEventType};
use crate::error::AppError;

/// Provider event after boundary validation, ready for processing.
#[derive(Debug, Clone)]
pub struct DepositEvent {
    pub external_id: String,
    pub provider_status: String,
    pub value_cents: Option<i64>,
    /// Digest of the raw request body, used by the replay guard.
    pub body_sha256: String,
    pub settlement: SettlementFields,
}

#[derive(Debug)]
pub enum ProcessOutcome {
    /// Transition applied; fan-out rows created and ready for dispatch.
    Applied {
        transaction_id: Uuid,
        status: TransactionStatus,
        deliveries: Vec<Uuid>,
    },
    /// Transaction already sits in the state this event would produce.
    AlreadyProcessed {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    /// Byte-identical redelivery of an event we have already seen.
    Duplicate,
}

#[derive(Clone)]
pub struct DepositProcessor {
    pool: PgPool,
}

impl DepositProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn process(&self, event: DepositEvent) -> Result<ProcessOutcome, AppError> {
        // Unknown provider vocabulary never reaches the database.
        let target = map_provider_status(&event.provider_status)?;

        let mut tx = self.pool.begin().await?;

        if !queries::try_record_webhook_event(&mut tx, &event.body_sha256, &event.external_id)
            .await?
        {
            tx.rollback().await?;
            tracing::info!(
                external_id = %event.external_id,
                "duplicate provider delivery, acknowledging without reprocessing"
            );
            return Ok(ProcessOutcome::Duplicate);
        }

        let Some(transaction) =
            queries::find_transaction_by_external_id(&mut tx, &event.external_id).await?
        else {
            // Guard row and anomaly commit together: a redelivery absorbed
            // as a duplicate still has its record on file.
            queries::insert_anomaly(
                &mut tx,
                &event.external_id,
                "unknown_external_id",
                json!({
                    "provider_status": event.provider_status,
                    "value_cents": event.value_cents,
                }),
            )
            .await?;
            tx.commit().await?;
            return Err(AppError::NotFound(format!(
                "no transaction for external id {}",
                event.external_id
            )));
        };

        if let Some(reported) = event.value_cents {
            if reported != transaction.amount_cents {
                queries::insert_anomaly(
                    &mut tx,
                    &event.external_id,
                    "amount_mismatch",
                    json!({
                        "transaction_id": transaction.id,
                        "expected_cents": transaction.amount_cents,
                        "reported_cents": reported,
                        "provider_status": event.provider_status,
                    }),
                )
                .await?;
                tx.commit().await?;
                return Err(AppError::AmountMismatch {
                    expected: transaction.amount_cents,
                    reported,
                });
            }
        }

        if transaction.status == target {
            tx.commit().await?;
            return Ok(ProcessOutcome::AlreadyProcessed {
                transaction_id: transaction.id,
                status: transaction.status,
            });
        }

        if !transaction.status.can_transition_to(target) {
            queries::insert_anomaly(
                &mut tx,
                &event.external_id,
                "conflicting_transition",
                json!({
                    "transaction_id": transaction.id,
                    "current_status": transaction.status,
                    "requested_status": target,
                }),
            )
            .await?;
            tx.commit().await?;
            return Err(AppError::Conflict(format!(
                "transaction {} is {:?}, cannot move to {:?}",
                transaction.id, transaction.status, target
            )));
        }

        // Conditional update: only applies while the row is still in the
        // status we just read. A concurrent delivery (or timeout expiry)
        // may have won in between.
        let updated =
            queries::try_transition(&mut tx, transaction.id, transaction.status, target, &event.settlement)
                .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return self.resolve_lost_race(transaction.id, target).await;
        };

        let deliveries = self.create_deliveries(&mut tx, &updated, target).await?;

        // Status change and fan-out records commit together or not at all.
        tx.commit().await?;

        tracing::info!(
            transaction_id = %updated.id,
            external_id = %event.external_id,
            status = ?target,
            deliveries = deliveries.len(),
            "deposit webhook applied"
        );

        Ok(ProcessOutcome::Applied {
            transaction_id: updated.id,
            status: target,
            deliveries,
        })
    }

    /// A concurrent writer changed the row between our read and our update.
    /// Re-read and resolve exactly like a redelivery would.
    async fn resolve_lost_race(
        &self,
        transaction_id: Uuid,
        target: TransactionStatus,
    ) -> Result<ProcessOutcome, AppError> {
        let current = queries::get_transaction(&self.pool, transaction_id).await?;

        if current.status == target {
            return Ok(ProcessOutcome::AlreadyProcessed {
                transaction_id,
                status: current.status,
            });
        }

        Err(AppError::Conflict(format!(
            "transaction {} concurrently moved to {:?}, cannot move to {:?}",
            transaction_id, current.status, target
        )))
    }

    async fn create_deliveries(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        transaction: &Transaction,
        status: TransactionStatus,
    ) -> Result<Vec<Uuid>, AppError> {
        let (Some(event_type), Some(payment_link_id)) =
            (status.event_type(), transaction.payment_link_id)
        else {
            return Ok(Vec::new());
        };

        let subscriptions =
            queries::list_active_subscriptions(tx, payment_link_id, event_type).await?;

        let mut ids = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let delivery = build_delivery(subscription, transaction, event_type);
            let inserted = queries::insert_delivery(tx, &delivery).await?;
            ids.push(inserted.id);
        }

        Ok(ids)
    }
}

/// Assemble a pending delivery row: canonical payload plus its signature
/// under the subscription secret. The dispatcher later sends exactly this
/// serialization, so signature and body always agree.
fn build_delivery(
    subscription: &WebhookSubscription,
    transaction: &Transaction,
    event: WebhookEventType,
) -> WebhookDelivery {
    let now = Utc::now();
    let payload = json!({
        "event": event.wire_name(),
        "transaction": {
            "id": transaction.id,
            "external_id": transaction.external_id,
            "type": transaction.tx_type,
            "status": transaction.status,
            "amount_cents": transaction.amount_cents,
            "payment_link_id": transaction.payment_link_id,
            "processed_at": transaction.processed_at,
        },
        "timestamp": now.to_rfc3339(),
    });

    // serde_json orders map keys, so to_string is our canonical form.
    let canonical = serde_json::to_string(&payload).unwrap_or_default();
    let signature = crypto::sign(&subscription.secret, canonical.as_bytes());

    WebhookDelivery {
        id: Uuid::new_v4(),
        subscription_id: subscription.id,
        transaction_id: transaction.id,
        event,
        payload,
        signature,
        status: DeliveryStatus::Pending,
        attempts: 0,
        // Misconfigured subscriptions still get one attempt, so the count
        // can never exceed the budget.
        max_attempts: subscription.max_retries.max(1),
        last_response_code: None,
        last_response_body: None,
        next_retry_at: Some(now),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;

    fn subscription(secret: &str) -> WebhookSubscription {
        let now = Utc::now();
        WebhookSubscription {
            id: Uuid::new_v4(),
            payment_link_id: Uuid::new_v4(),
            url: "https://merchant.example/webhook".to_string(),
            events: vec![WebhookEventType::Completed],
            active: true,
            secret: secret.to_string(),
            custom_headers: None,
            max_retries: 5,
            base_delay_secs: 5,
            created_at: now,
            updated_at: now,
        }
    }

    fn completed_transaction() -> Transaction {
        let mut tx = Transaction::new(
            Some("qr-1".to_string()),
            TransactionType::Deposit,
            37500,
            Some(Uuid::new_v4()),
            None,
        );
        tx.status = TransactionStatus::Completed;
        tx.processed_at = Some(Utc::now());
        tx
    }

    #[test]
    fn delivery_payload_carries_event_and_summary() {
        let sub = subscription("s3cret");
        let tx = completed_transaction();
        let delivery = build_delivery(&sub, &tx, WebhookEventType::Completed);

        assert_eq!(delivery.payload["event"], "payment.completed");
        assert_eq!(delivery.payload["transaction"]["amount_cents"], 37500);
        assert_eq!(delivery.payload["transaction"]["status"], "completed");
        assert!(delivery.payload["timestamp"].is_string());
    }

    #[test]
    fn delivery_signature_matches_canonical_payload() {
        let sub = subscription("s3cret");
        let tx = completed_transaction();
        let delivery = build_delivery(&sub, &tx, WebhookEventType::Completed);

        let canonical = serde_json::to_string(&delivery.payload).unwrap();
        assert!(crypto::verify("s3cret", canonical.as_bytes(), &delivery.signature));
    }

    #[test]
    fn delivery_starts_pending_and_immediately_due() {
        let sub = subscription("s");
        let tx = completed_transaction();
        let delivery = build_delivery(&sub, &tx, WebhookEventType::Completed);

        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.max_attempts, 5);
        assert!(delivery.next_retry_at.unwrap() <= Utc::now());
    }

    #[test]
    fn delivery_attempt_budget_is_at_least_one() {
        let mut sub = subscription("s");
        sub.max_retries = 0;
        let delivery = build_delivery(&sub, &completed_transaction(), WebhookEventType::Completed);
        assert_eq!(delivery.max_attempts, 1);

        sub.max_retries = -3;
        let delivery = build_delivery(&sub, &completed_transaction(), WebhookEventType::Completed);
        assert_eq!(delivery.max_attempts, 1);
    }
}
