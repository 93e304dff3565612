use super::UserId;
use super::escrow::EscrowStatus;
use super::money::{Amount, Money};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Refund,
    Withdrawal,
    EscrowRelease,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Refunded)
    }
}

/// Final outcome of an in-flight transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Completed,
    Failed,
}

/// One entry in the append-only ledger.
///
/// A completed transaction credits `to_user` and debits `from_user`, except for
/// `Payment`s, which are funded from outside the platform (a card or bank
/// charge) and so only credit their recipient.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub r#type: TransactionType,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub from_user: UserId,
    pub to_user: Option<UserId>,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub escrow_status: Option<EscrowStatus>,
}

impl Transaction {
    pub fn new(
        r#type: TransactionType,
        amount: Amount,
        currency: impl Into<String>,
        from_user: impl Into<UserId>,
        to_user: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            r#type,
            amount,
            currency: currency.into(),
            status: TransactionStatus::Pending,
            from_user: from_user.into(),
            to_user,
            order_id: None,
            created_at: now,
            completed_at: None,
            escrow_status: None,
        }
    }

    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_escrow_status(mut self, status: EscrowStatus) -> Self {
        self.escrow_status = Some(status);
        self
    }

    /// Builds the entry directly in its completed state.
    pub fn completed(mut self, now: DateTime<Utc>) -> Self {
        self.status = TransactionStatus::Completed;
        self.completed_at = Some(now);
        self
    }

    pub fn mark_processing(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Pending => {
                self.status = TransactionStatus::Processing;
                Ok(())
            }
            TransactionStatus::Processing => Ok(()),
            other => Err(LedgerError::invalid_state(
                "transaction",
                self.id,
                format!("cannot start processing a {other:?} transaction"),
            )),
        }
    }

    /// Moves an in-flight entry to its final status. Allowed exactly once.
    pub fn settle(&mut self, outcome: Settlement, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LedgerError::invalid_state(
                "transaction",
                self.id,
                format!("already settled as {:?}", self.status),
            ));
        }
        match outcome {
            Settlement::Completed => {
                self.status = TransactionStatus::Completed;
                self.completed_at = Some(now);
            }
            Settlement::Failed => self.status = TransactionStatus::Failed,
        }
        Ok(())
    }

    pub fn involves(&self, user: &str) -> bool {
        self.from_user == user || self.to_user.as_deref() == Some(user)
    }

    pub fn debits_sender(&self) -> bool {
        self.r#type != TransactionType::Payment
    }

    /// Signed effect of this entry on `user`'s balance; zero unless completed.
    pub fn effect_on(&self, user: &str) -> Money {
        if self.status != TransactionStatus::Completed {
            return Money::ZERO;
        }
        let mut effect = Money::ZERO;
        if self.to_user.as_deref() == Some(user) {
            effect += self.amount.into();
        }
        if self.from_user == user && self.debits_sender() {
            effect -= self.amount.into();
        }
        effect
    }

    /// Whether this entry will debit `user` once it settles.
    pub fn reserves_from(&self, user: &str) -> bool {
        self.from_user == user
            && self.debits_sender()
            && matches!(
                self.status,
                TransactionStatus::Pending | TransactionStatus::Processing
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(r#type: TransactionType, cents: i64, from: &str, to: Option<&str>) -> Transaction {
        Transaction::new(
            r#type,
            Amount::new(cents).unwrap(),
            "USD",
            from,
            to.map(str::to_string),
            Utc::now(),
        )
    }

    #[test]
    fn test_payment_credits_recipient_only() {
        let tx = entry(TransactionType::Payment, 500, "alice", Some("platform")).completed(Utc::now());
        assert_eq!(tx.effect_on("platform"), Money::new(500));
        assert_eq!(tx.effect_on("alice"), Money::ZERO);
    }

    #[test]
    fn test_release_moves_money_between_accounts() {
        let tx = entry(TransactionType::EscrowRelease, 400, "platform", Some("seller"))
            .completed(Utc::now());
        assert_eq!(tx.effect_on("seller"), Money::new(400));
        assert_eq!(tx.effect_on("platform"), Money::new(-400));
    }

    #[test]
    fn test_pending_entry_has_no_effect_but_reserves() {
        let tx = entry(TransactionType::Withdrawal, 300, "seller", None);
        assert_eq!(tx.effect_on("seller"), Money::ZERO);
        assert!(tx.reserves_from("seller"));
    }

    #[test]
    fn test_settle_only_once() {
        let mut tx = entry(TransactionType::Withdrawal, 300, "seller", None);
        tx.mark_processing().unwrap();
        tx.settle(Settlement::Completed, Utc::now()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.completed_at.is_some());

        let second = tx.settle(Settlement::Failed, Utc::now());
        assert!(matches!(second, Err(LedgerError::InvalidState { .. })));
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_transaction_serializes_type_field() {
        let tx = entry(TransactionType::EscrowRelease, 100, "platform", Some("bob"));
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "escrow_release");
        assert_eq!(json["status"], "pending");
    }
}
