use super::UserId;
use super::money::{Amount, Money};
use super::subscription::SubscriptionStatus;
use serde::Serialize;
use uuid::Uuid;

/// State changes published after they have been committed to the store.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    CheckoutCompleted {
        session_id: Uuid,
        subscription_id: Uuid,
        amount: Money,
    },
    CheckoutFailed {
        session_id: Uuid,
        reason: String,
    },
    SubscriptionChanged {
        subscription_id: Uuid,
        user_id: UserId,
        status: SubscriptionStatus,
        cancel_at_period_end: bool,
    },
    InvoiceIssued {
        invoice_id: Uuid,
        subscription_id: Uuid,
        amount: Money,
        paid: bool,
    },
    EscrowReleased {
        escrow_id: Uuid,
        seller_id: UserId,
        amount: Amount,
    },
    MilestoneReleased {
        escrow_id: Uuid,
        milestone_id: Uuid,
        amount: Amount,
    },
    EscrowDisputed {
        escrow_id: Uuid,
    },
    EscrowRefunded {
        escrow_id: Uuid,
        buyer_id: UserId,
        amount: Amount,
    },
    WithdrawalSettled {
        transaction_id: Uuid,
        user_id: UserId,
        amount: Amount,
        completed: bool,
    },
}
