//! Inbound provider webhook endpoint.
//!
//! The provider retries until it sees a 2xx, so every recognized payload is
//! acknowledged with 200 even when it produces no state change (unknown
//! external id, amount mismatch, terminal conflict). Only a malformed
//! payload gets a 400, and only a bad signature gets a 401.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::crypto;
use crate::db::queries::SettlementFields;
use crate::error::AppError;
use crate::services::{DepositEvent, ProcessOutcome};
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Wire shape posted by the settlement provider.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositWebhookPayload {
    pub qr_id: String,
    pub status: String,
    pub bank_tx_id: Option<String>,
    #[serde(rename = "blockchainTxID")]
    pub blockchain_tx_id: Option<String>,
    pub value_in_cents: Option<i64>,
    pub payer_name: Option<String>,
    #[serde(rename = "payerEUID")]
    pub payer_euid: Option<String>,
    pub payer_tax_number: Option<String>,
    pub pix_key: Option<String>,
    pub expiration: Option<String>,
}

impl DepositWebhookPayload {
    fn validate(&self) -> Result<(), AppError> {
        if self.qr_id.trim().is_empty() {
            return Err(AppError::Validation("qrId must not be empty".to_string()));
        }
        if self.status.trim().is_empty() {
            return Err(AppError::Validation("status must not be empty".to_string()));
        }
        if matches!(self.value_in_cents, Some(v) if v < 0) {
            return Err(AppError::Validation(
                "valueInCents must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

pub async fn deposit_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.config.provider_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());

        let valid = signature
            .map(|sig| crypto::verify(secret, &body, sig))
            .unwrap_or(false);

        if !valid {
            tracing::warn!("inbound webhook rejected: missing or invalid signature");
            return AppError::Unauthorized("invalid webhook signature".to_string())
                .into_response();
        }
    }

    let payload: DepositWebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "inbound webhook rejected: malformed payload");
            return AppError::Validation(format!("malformed payload: {}", e)).into_response();
        }
    };

    if let Err(e) = payload.validate() {
        return e.into_response();
    }

    let event = DepositEvent {
        external_id: payload.qr_id.trim().to_string(),
        provider_status: payload.status.clone(),
        value_cents: payload.value_in_cents,
        body_sha256: hex::encode(Sha256::digest(&body)),
        settlement: SettlementFields {
            bank_tx_id: payload.bank_tx_id,
            blockchain_tx_id: payload.blockchain_tx_id,
            payer_name: payload.payer_name,
            payer_euid: payload.payer_euid,
            payer_tax_number: payload.payer_tax_number,
            pix_key: payload.pix_key,
        },
    };

    match state.processor.process(event).await {
        Ok(ProcessOutcome::Applied { deliveries, .. }) => {
            // Fan-out is best-effort and decoupled: the rows are already
            // committed, so a failed send here just waits for the sweeper.
            if !deliveries.is_empty() {
                let dispatcher = state.dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.deliver_many(deliveries).await;
                });
            }
            ack()
        }
        Ok(ProcessOutcome::AlreadyProcessed { transaction_id, status }) => {
            tracing::info!(
                transaction_id = %transaction_id,
                status = ?status,
                "redelivered webhook acknowledged as no-op"
            );
            ack()
        }
        Ok(ProcessOutcome::Duplicate) => ack(),
        // Recognized but not applied: acknowledge so the provider stops
        // retrying; the anomaly is already recorded for audit.
        Err(
            e @ (AppError::NotFound(_)
            | AppError::AmountMismatch { .. }
            | AppError::Conflict(_)),
        ) => {
            tracing::warn!(error = %e, "provider webhook acknowledged without state change");
            ack()
        }
        Err(e @ AppError::Validation(_)) => e.into_response(),
        Err(e) => {
            // Storage failure: let the provider retry later.
            tracing::error!(error = %e, "deposit webhook processing failed");
            e.into_response()
        }
    }
}

fn ack() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}
