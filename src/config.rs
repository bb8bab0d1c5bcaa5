use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Shared secret used to authenticate inbound provider webhooks.
    /// When unset, signature checks are skipped (local simulation).
    pub provider_webhook_secret: Option<String>,
    /// Bound on every outbound delivery attempt.
    pub delivery_timeout_secs: u64,
    /// How often the sweeper scans for due pending deliveries.
    pub sweep_interval_secs: u64,
    /// Rows claimed per sweep pass.
    pub sweep_batch_size: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            provider_webhook_secret: env::var("PROVIDER_WEBHOOK_SECRET").ok(),
            delivery_timeout_secs: env::var("DELIVERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            sweep_batch_size: env::var("SWEEP_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
        })
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}
