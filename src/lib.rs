pub mod config;
pub mod crypto;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};

use crate::config::Config;
use crate::error::AppError;
use crate::services::{DepositProcessor, WebhookDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Config,
    pub processor: DepositProcessor,
    pub dispatcher: WebhookDispatcher,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config) -> Result<Self, AppError> {
        let processor = DepositProcessor::new(db.clone());
        let dispatcher = WebhookDispatcher::new(db.clone(), config.delivery_timeout())?;

        Ok(Self {
            db,
            config,
            processor,
            dispatcher,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/deposit", post(handlers::webhook::deposit_webhook))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/transactions/:id/deliveries",
            get(handlers::transactions::list_deliveries),
        )
        .route("/anomalies", get(handlers::transactions::list_anomalies))
        .with_state(state)
}
