//! Outbound payment-link webhook delivery.
//!
//! Deliveries are durable rows scheduled by `next_retry_at`; the dispatcher
//! attempts the ones it is handed (freshly created or claimed by the
//! sweeper), records the outcome, and never holds a transaction lock while
//! talking to the network.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{WebhookDelivery, WebhookSubscription};
use crate::db::queries;
use crate::error::AppError;

const SIGNATURE_HEADER: &str = "x-signature";
const USER_AGENT_VALUE: &str = "pixgate-webhook/0.1";
/// Stored response bodies are truncated to keep rows bounded.
const MAX_RESPONSE_BODY: usize = 2048;

/// Result of one HTTP attempt against a subscriber endpoint.
#[derive(Debug)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

impl DeliveryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Thin reqwest wrapper doing exactly one signed POST with a bounded timeout.
#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub async fn post(
        &self,
        url: &str,
        signature: &str,
        custom_headers: Option<&serde_json::Value>,
        body: String,
    ) -> Result<DeliveryResponse, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        if let Ok(value) = HeaderValue::from_str(signature) {
            headers.insert(HeaderName::from_static(SIGNATURE_HEADER), value);
        }

        if let Some(serde_json::Value::Object(map)) = custom_headers {
            for (name, value) in map {
                let Some(value) = value.as_str() else { continue };
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => {
                        tracing::warn!(header = %name, "skipping invalid custom header");
                    }
                }
            }
        }

        let response = self.client.post(url).headers(headers).body(body).send().await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(MAX_RESPONSE_BODY).collect();

        Ok(DeliveryResponse { status, body })
    }
}

/// Exponential backoff with jitter: `base * 2^attempt + uniform[0, base)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    // Cap the shift so a large attempt count cannot overflow.
    let exp = attempt.min(16);
    let backoff = base.saturating_mul(1u32 << exp);
    let jitter_ms = if base.as_millis() > 0 {
        rand::thread_rng().gen_range(0..base.as_millis() as u64)
    } else {
        0
    };
    backoff + Duration::from_millis(jitter_ms)
}

/// Terminal or intermediate outcome of one dispatch pass over a delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Retrying,
    Exhausted,
    Cancelled,
    Skipped,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    pool: PgPool,
    client: DeliveryClient,
    /// How long a claimed row stays invisible to other workers. Must outlast
    /// a full attempt, HTTP timeout included.
    lease_secs: i64,
}

impl WebhookDispatcher {
    pub fn new(pool: PgPool, timeout: Duration) -> Result<Self, AppError> {
        let lease_secs = (timeout.as_secs() as i64).saturating_mul(2).max(30);
        Ok(Self {
            pool,
            client: DeliveryClient::new(timeout)?,
            lease_secs,
        })
    }

    /// Attempt a batch, logging failures. Used for fire-and-forget dispatch
    /// right after a transaction commit; errors never propagate back to the
    /// inbound webhook path.
    pub async fn deliver_many(&self, ids: Vec<Uuid>) {
        for id in ids {
            if let Err(e) = self.deliver(id).await {
                tracing::error!(delivery_id = %id, error = %e, "webhook delivery attempt errored");
            }
        }
    }

    /// Attempt one delivery and record the outcome. The row is leased first,
    /// so a sweeper pass landing mid-attempt finds it not due and backs off;
    /// only one worker sends at a time.
    pub async fn deliver(&self, id: Uuid) -> Result<DispatchOutcome, AppError> {
        let Some(delivery) = queries::try_lease_delivery(&self.pool, id, self.lease_secs).await?
        else {
            return Ok(DispatchOutcome::Skipped);
        };

        self.attempt(delivery).await
    }

    /// One HTTP attempt against an already-claimed row.
    async fn attempt(&self, delivery: WebhookDelivery) -> Result<DispatchOutcome, AppError> {
        let Some(subscription) = queries::get_subscription(&self.pool, delivery.subscription_id).await?
        else {
            queries::mark_delivery_cancelled(&self.pool, delivery.id).await?;
            return Ok(DispatchOutcome::Cancelled);
        };

        // Deactivation is re-checked at attempt time: in-flight requests may
        // finish, but nothing new is sent for an inactive subscription.
        if !subscription.active {
            queries::mark_delivery_cancelled(&self.pool, delivery.id).await?;
            tracing::info!(
                delivery_id = %delivery.id,
                subscription_id = %subscription.id,
                "subscription deactivated, delivery cancelled"
            );
            return Ok(DispatchOutcome::Cancelled);
        }

        // A URL that does not parse will never become deliverable, so the
        // retry budget is not spent on it.
        if let Err(e) = url::Url::parse(&subscription.url) {
            queries::mark_delivery_failed(
                &self.pool,
                delivery.id,
                None,
                &format!("invalid subscription url: {}", e),
            )
            .await?;
            tracing::warn!(
                delivery_id = %delivery.id,
                subscription_id = %subscription.id,
                "subscription url does not parse, delivery failed"
            );
            return Ok(DispatchOutcome::Exhausted);
        }

        let body = serde_json::to_string(&delivery.payload)
            .map_err(|e| AppError::Internal(format!("unserializable delivery payload: {}", e)))?;

        let result = self
            .client
            .post(
                &subscription.url,
                &delivery.signature,
                subscription.custom_headers.as_ref(),
                body,
            )
            .await;

        match result {
            Ok(response) if response.is_success() => {
                queries::mark_delivery_success(
                    &self.pool,
                    delivery.id,
                    response.status as i32,
                    &response.body,
                )
                .await?;
                tracing::info!(
                    delivery_id = %delivery.id,
                    status = response.status,
                    attempt = delivery.attempts + 1,
                    "webhook delivered"
                );
                Ok(DispatchOutcome::Delivered)
            }
            Ok(response) => {
                self.record_failure(
                    &delivery,
                    &subscription,
                    Some(response.status as i32),
                    response.body,
                )
                .await
            }
            Err(e) => {
                // Timeouts and connect errors follow the same retry policy
                // as HTTP failures.
                self.record_failure(&delivery, &subscription, None, e.to_string())
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        response_code: Option<i32>,
        response_body: String,
    ) -> Result<DispatchOutcome, AppError> {
        let attempts_after = delivery.attempts + 1;

        if attempts_after >= delivery.max_attempts {
            queries::mark_delivery_failed(&self.pool, delivery.id, response_code, &response_body)
                .await?;
            tracing::warn!(
                delivery_id = %delivery.id,
                attempts = attempts_after,
                code = ?response_code,
                "webhook delivery exhausted retries"
            );
            return Ok(DispatchOutcome::Exhausted);
        }

        let delay = backoff_delay(
            Duration::from_secs(subscription.base_delay_secs.max(0) as u64),
            delivery.attempts as u32,
        );
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(300));

        queries::mark_delivery_retry(
            &self.pool,
            delivery.id,
            response_code,
            &response_body,
            next_retry_at,
        )
        .await?;

        tracing::warn!(
            delivery_id = %delivery.id,
            attempt = attempts_after,
            code = ?response_code,
            next_retry_at = %next_retry_at,
            "webhook delivery failed, retry scheduled"
        );
        Ok(DispatchOutcome::Retrying)
    }

    /// One sweeper pass: claim due pending deliveries and attempt each.
    /// Returns how many were attempted. Claiming already leases the rows,
    /// so they go straight to the attempt.
    pub async fn process_due(&self, limit: i64) -> Result<usize, AppError> {
        let due = queries::claim_due_deliveries(&self.pool, limit, self.lease_secs).await?;
        let count = due.len();

        for delivery in due {
            let id = delivery.id;
            if let Err(e) = self.attempt(delivery).await {
                tracing::error!(delivery_id = %id, error = %e, "sweeper delivery errored");
            }
        }

        if count > 0 {
            tracing::info!(attempted = count, "sweeper pass complete");
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_bounded_jitter() {
        let base = Duration::from_secs(5);
        for attempt in 0..5u32 {
            let expected = base * 2u32.pow(attempt);
            let delay = backoff_delay(base, attempt);
            assert!(delay >= expected, "attempt {}: {:?} < {:?}", attempt, delay, expected);
            assert!(delay < expected + base, "attempt {}: jitter exceeds base", attempt);
        }
    }

    #[test]
    fn backoff_shift_is_capped() {
        // Absurd attempt counts must not overflow.
        let delay = backoff_delay(Duration::from_secs(5), 10_000);
        assert!(delay >= Duration::from_secs(5));
    }

    #[test]
    fn backoff_handles_zero_base() {
        assert_eq!(backoff_delay(Duration::ZERO, 3), Duration::ZERO);
    }

    #[test]
    fn success_is_2xx_only() {
        assert!(DeliveryResponse { status: 200, body: String::new() }.is_success());
        assert!(DeliveryResponse { status: 204, body: String::new() }.is_success());
        assert!(!DeliveryResponse { status: 301, body: String::new() }.is_success());
        assert!(!DeliveryResponse { status: 404, body: String::new() }.is_success());
        assert!(!DeliveryResponse { status: 500, body: String::new() }.is_success());
    }
}
