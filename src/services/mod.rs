pub mod deposit_processor;
pub mod dispatcher;

pub use deposit_processor::{DepositEvent, DepositProcessor, ProcessOutcome};
pub use dispatcher::{DeliveryClient, WebhookDispatcher};
