//! Transaction status state machine.
//!
//! Statuses are closed variants rather than free-form strings so that an
//! unrecognized provider token is a validation failure instead of a silent
//! match. Transitions only move forward; terminal states accept nothing.

use serde::{Deserialize, Serialize};

use crate::domain::event::WebhookEventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Expired
        )
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            // Provider may report final settlement without an intermediate
            // "received" callback, so Pending jumps straight to Completed.
            (Pending, Completed) => true,
            (Processing, Completed) => true,
            (Pending | Processing, Failed) => true,
            (current, Expired) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Outbound event published when a transaction enters this status,
    /// if subscribers are notified of it at all.
    pub fn event_type(&self) -> Option<WebhookEventType> {
        match self {
            TransactionStatus::Processing => Some(WebhookEventType::Processing),
            TransactionStatus::Completed => Some(WebhookEventType::Completed),
            TransactionStatus::Failed => Some(WebhookEventType::Failed),
            TransactionStatus::Expired => Some(WebhookEventType::Expired),
            TransactionStatus::Pending | TransactionStatus::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    const ALL: [TransactionStatus; 6] = [Pending, Processing, Completed, Failed, Cancelled, Expired];

    #[test]
    fn terminal_states_accept_no_transition() {
        for terminal in [Completed, Failed, Cancelled, Expired] {
            for next in ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{:?} -> {:?} must be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn pending_moves_forward_only() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Expired));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Cancelled));
    }

    #[test]
    fn processing_settles_fails_or_expires() {
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Expired));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn event_mapping_covers_notifiable_statuses() {
        assert_eq!(Processing.event_type(), Some(WebhookEventType::Processing));
        assert_eq!(Completed.event_type(), Some(WebhookEventType::Completed));
        assert_eq!(Failed.event_type(), Some(WebhookEventType::Failed));
        assert_eq!(Expired.event_type(), Some(WebhookEventType::Expired));
        assert_eq!(Pending.event_type(), None);
        assert_eq!(Cancelled.event_type(), None);
    }
}
