use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{Transaction, WebhookAnomaly, WebhookDelivery, WebhookSubscription};
use crate::domain::{TransactionStatus, WebhookEventType};

// --- Transaction queries ---

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn find_transaction_by_external_id(
    executor: &mut SqlxTransaction<'_, Postgres>,
    external_id: &str,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(&mut **executor)
        .await
}

/// Settlement metadata persisted alongside a status transition.
#[derive(Debug, Default, Clone)]
pub struct SettlementFields {
    pub bank_tx_id: Option<String>,
    pub blockchain_tx_id: Option<String>,
    pub payer_name: Option<String>,
    pub payer_euid: Option<String>,
    pub payer_tax_number: Option<String>,
    pub pix_key: Option<String>,
}

/// Conditionally transition a transaction: the update only applies while the
/// row is still in `expected`. Returns `None` when a concurrent writer won,
/// in which case the caller re-reads and resolves via the idempotency or
/// conflict path.
pub async fn try_transition(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    expected: TransactionStatus,
    new_status: TransactionStatus,
    fields: &SettlementFields,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $3,
            processed_at = NOW(),
            bank_tx_id = COALESCE($4, bank_tx_id),
            blockchain_tx_id = COALESCE($5, blockchain_tx_id),
            payer_name = COALESCE($6, payer_name),
            payer_euid = COALESCE($7, payer_euid),
            payer_tax_number = COALESCE($8, payer_tax_number),
            pix_key = COALESCE($9, pix_key),
            updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(expected)
    .bind(new_status)
    .bind(&fields.bank_tx_id)
    .bind(&fields.blockchain_tx_id)
    .bind(&fields.payer_name)
    .bind(&fields.payer_euid)
    .bind(&fields.payer_tax_number)
    .bind(&fields.pix_key)
    .fetch_optional(&mut **executor)
    .await
}

// --- Replay guard ---

/// Record an inbound delivery keyed by body digest. Returns false when the
/// same body was already seen, i.e. this is a provider redelivery.
pub async fn try_record_webhook_event(
    executor: &mut SqlxTransaction<'_, Postgres>,
    body_sha256: &str,
    external_id: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO webhook_events (id, body_sha256, external_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (body_sha256) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(body_sha256)
    .bind(external_id)
    .execute(&mut **executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

// --- Anomaly sink ---

/// Record an acknowledged-but-not-applied event for manual review. Runs on
/// the caller's transaction so the anomaly commits together with the replay
/// guard row: a retry absorbed as a duplicate can never lose its record.
pub async fn insert_anomaly(
    executor: &mut SqlxTransaction<'_, Postgres>,
    external_id: &str,
    reason: &str,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO webhook_anomalies (id, external_id, reason, detail) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(external_id)
    .bind(reason)
    .bind(detail)
    .execute(&mut **executor)
    .await?;

    Ok(())
}

pub async fn list_recent_anomalies(pool: &PgPool, limit: i64) -> Result<Vec<WebhookAnomaly>> {
    sqlx::query_as::<_, WebhookAnomaly>(
        "SELECT * FROM webhook_anomalies ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

// --- Subscription queries ---

pub async fn get_subscription(pool: &PgPool, id: Uuid) -> Result<Option<WebhookSubscription>> {
    sqlx::query_as::<_, WebhookSubscription>("SELECT * FROM webhook_subscriptions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_active_subscriptions(
    executor: &mut SqlxTransaction<'_, Postgres>,
    payment_link_id: Uuid,
    event: WebhookEventType,
) -> Result<Vec<WebhookSubscription>> {
    sqlx::query_as::<_, WebhookSubscription>(
        r#"
        SELECT * FROM webhook_subscriptions
        WHERE payment_link_id = $1 AND active AND $2 = ANY(events)
        "#,
    )
    .bind(payment_link_id)
    .bind(event)
    .fetch_all(&mut **executor)
    .await
}

// --- Delivery queries ---

pub async fn insert_delivery(
    executor: &mut SqlxTransaction<'_, Postgres>,
    delivery: &WebhookDelivery,
) -> Result<WebhookDelivery> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        INSERT INTO webhook_deliveries (
            id, subscription_id, transaction_id, event, payload, signature,
            status, attempts, max_attempts, next_retry_at, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(delivery.id)
    .bind(delivery.subscription_id)
    .bind(delivery.transaction_id)
    .bind(delivery.event)
    .bind(&delivery.payload)
    .bind(&delivery.signature)
    .bind(delivery.status)
    .bind(delivery.attempts)
    .bind(delivery.max_attempts)
    .bind(delivery.next_retry_at)
    .bind(delivery.created_at)
    .bind(delivery.updated_at)
    .fetch_one(&mut **executor)
    .await
}

pub async fn get_delivery(pool: &PgPool, id: Uuid) -> Result<Option<WebhookDelivery>> {
    sqlx::query_as::<_, WebhookDelivery>("SELECT * FROM webhook_deliveries WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Lease a single pending, due delivery for an immediate attempt. Returns
/// `None` when the row is final or another worker already holds the lease,
/// so at most one path sends at a time.
pub async fn try_lease_delivery(
    pool: &PgPool,
    id: Uuid,
    lease_secs: i64,
) -> Result<Option<WebhookDelivery>> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        UPDATE webhook_deliveries
        SET next_retry_at = NOW() + make_interval(secs => $2), updated_at = NOW()
        WHERE id = $1 AND status = 'pending' AND next_retry_at <= NOW()
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(lease_secs as f64)
    .fetch_optional(pool)
    .await
}

pub async fn list_deliveries_for_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<Vec<WebhookDelivery>> {
    sqlx::query_as::<_, WebhookDelivery>(
        "SELECT * FROM webhook_deliveries WHERE transaction_id = $1 ORDER BY created_at ASC",
    )
    .bind(transaction_id)
    .fetch_all(pool)
    .await
}

pub async fn mark_delivery_success(
    pool: &PgPool,
    id: Uuid,
    response_code: i32,
    response_body: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'success', attempts = attempts + 1,
            last_response_code = $2, last_response_body = $3,
            next_retry_at = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(response_code)
    .bind(response_body)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_delivery_retry(
    pool: &PgPool,
    id: Uuid,
    response_code: Option<i32>,
    response_body: &str,
    next_retry_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET attempts = attempts + 1,
            last_response_code = $2, last_response_body = $3,
            next_retry_at = $4, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(response_code)
    .bind(response_body)
    .bind(next_retry_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_delivery_failed(
    pool: &PgPool,
    id: Uuid,
    response_code: Option<i32>,
    response_body: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'failed', attempts = attempts + 1,
            last_response_code = $2, last_response_body = $3,
            next_retry_at = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(response_code)
    .bind(response_body)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_delivery_cancelled(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'cancelled', next_retry_at = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim due pending deliveries for one sweep pass. Rows are leased by
/// pushing `next_retry_at` forward inside the claiming transaction, so
/// concurrent sweepers (or a crash mid-delivery) cannot double-send within
/// the lease window. `FOR UPDATE SKIP LOCKED` keeps sweepers from blocking
/// each other.
pub async fn claim_due_deliveries(
    pool: &PgPool,
    limit: i64,
    lease_secs: i64,
) -> Result<Vec<WebhookDelivery>> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT * FROM webhook_deliveries
        WHERE status = 'pending' AND next_retry_at <= NOW()
        ORDER BY next_retry_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    if claimed.is_empty() {
        tx.rollback().await?;
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = claimed.iter().map(|d| d.id).collect();
    sqlx::query(
        "UPDATE webhook_deliveries SET next_retry_at = NOW() + make_interval(secs => $2), updated_at = NOW() WHERE id = ANY($1)",
    )
    .bind(&ids)
    .bind(lease_secs as f64)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(claimed)
}
