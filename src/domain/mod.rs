pub mod event;
pub mod provider;
pub mod transaction;

pub use event::{DeliveryStatus, WebhookEventType};
pub use provider::map_provider_status;
pub use transaction::{TransactionStatus, TransactionType};
