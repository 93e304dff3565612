use super::events::EventBus;
use super::locks::KeyedLocks;
use super::payment_methods::PaymentMethodRegistry;
use crate::config::EngineConfig;
use crate::domain::UserId;
use crate::domain::events::LedgerEvent;
use crate::domain::money::{Amount, Money};
use crate::domain::ports::{ChargeRequest, SharedClock, SharedGateway, SharedStore, WriteSet};
use crate::domain::transaction::{Settlement, Transaction, TransactionStatus, TransactionType};
use crate::error::{LedgerError, Result};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Balances of one account, all derived from the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSummary {
    /// Completed credits minus completed debits.
    pub balance: Money,
    /// Debits still in flight (e.g. withdrawals being paid out) and, for the
    /// platform account, money held in open escrows.
    pub reserved: Money,
    /// What the account may still withdraw.
    pub available: Money,
}

/// The append-only transaction log and everything derived from it.
pub struct Ledger {
    store: SharedStore,
    gateway: SharedGateway,
    clock: SharedClock,
    events: EventBus,
    methods: Arc<PaymentMethodRegistry>,
    config: EngineConfig,
    locks: KeyedLocks<UserId>,
}

impl Ledger {
    pub fn new(
        store: SharedStore,
        gateway: SharedGateway,
        clock: SharedClock,
        events: EventBus,
        methods: Arc<PaymentMethodRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            events,
            methods,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Derives the account's balances from its completed and in-flight entries.
    ///
    /// The platform account also reserves whatever open escrows still hold.
    /// A negative or overflowing balance means the log itself is inconsistent;
    /// it is reported as `LedgerCorrupted`, never clamped.
    pub async fn summary(&self, user: &str) -> Result<BalanceSummary> {
        let entries = self.store.transactions_for_user(user).await?;
        let balance = Money::checked_sum(entries.iter().map(|tx| tx.effect_on(user)));
        let in_flight = Money::checked_sum(
            entries
                .iter()
                .filter(|tx| tx.reserves_from(user))
                .map(|tx| tx.amount.value()),
        );
        let held = if user == self.config.platform_account {
            Money::checked_sum(self.store.escrows().await?.iter().map(|e| e.held()))
        } else {
            Some(Money::ZERO)
        };
        let reserved = in_flight.zip(held).and_then(|(in_flight, held)| in_flight.checked_add(held));
        let Some((balance, reserved)) = balance.zip(reserved) else {
            error!(user, "derived balance overflows");
            return Err(LedgerError::LedgerCorrupted(format!(
                "account {user} has a balance out of range"
            )));
        };
        let available = balance.checked_sub(reserved);
        match available {
            Some(available) if !balance.is_negative() && !available.is_negative() => Ok(BalanceSummary {
                balance,
                reserved,
                available,
            }),
            _ => {
                error!(user, %balance, %reserved, "derived balance went negative");
                Err(LedgerError::LedgerCorrupted(format!(
                    "account {user} has balance {balance} with {reserved} reserved"
                )))
            }
        }
    }

    pub async fn balance(&self, user: &str) -> Result<Money> {
        Ok(self.summary(user).await?.balance)
    }

    pub async fn history(&self, user: &str) -> Result<Vec<Transaction>> {
        self.store.transactions_for_user(user).await
    }

    /// Every account that appears in the log, sorted.
    pub async fn accounts(&self) -> Result<Vec<UserId>> {
        let mut users: Vec<UserId> = self
            .store
            .transactions()
            .await?
            .into_iter()
            .flat_map(|tx| std::iter::once(tx.from_user).chain(tx.to_user))
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    /// Appends an entry written by an outside flow.
    ///
    /// Only `pending` or `completed` entries are accepted. An entry that debits
    /// its sender is checked against the sender's available balance first.
    pub async fn record_transaction(&self, tx: Transaction) -> Result<Transaction> {
        if !matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Completed
        ) {
            return Err(LedgerError::ValidationError(format!(
                "new transactions start pending or completed, not {:?}",
                tx.status
            )));
        }
        let _guard = if tx.debits_sender() {
            Some(self.lock_account(&tx.from_user).await)
        } else {
            None
        };
        if self.store.transaction(tx.id).await?.is_some() {
            return Err(LedgerError::invalid_state(
                "transaction",
                tx.id,
                "ledger entries are append-only",
            ));
        }
        if tx.debits_sender() {
            self.ensure_available(&tx.from_user, tx.amount).await?;
        }
        self.store.commit(WriteSet::new().put(tx.clone())).await?;
        info!(tx_id = %tx.id, kind = ?tx.r#type, amount = %tx.amount, from = %tx.from_user, "transaction recorded");
        Ok(tx)
    }

    /// Resolves an in-flight entry. Each entry settles exactly once.
    pub async fn settle_transaction(&self, id: Uuid, outcome: Settlement) -> Result<Transaction> {
        let mut tx = self
            .store
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", id))?;
        let _guard = self.lock_account(&tx.from_user).await;
        tx = self
            .store
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", id))?;
        tx.settle(outcome, self.clock.now())?;
        self.store.commit(WriteSet::new().put(tx.clone())).await?;
        info!(tx_id = %id, status = ?tx.status, "transaction settled");
        Ok(tx)
    }

    /// Serializes balance-checked writes against `user`'s account.
    pub(crate) async fn lock_account(&self, user: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(&user.to_string()).await
    }

    /// Call with the account lock held.
    pub(crate) async fn ensure_available(&self, user: &str, amount: Amount) -> Result<()> {
        self.ensure_covered(user, amount, Money::ZERO).await
    }

    /// Like `ensure_available`, for a debit that also frees `released` of the
    /// account's reservation, as an escrow payout frees its own hold.
    pub(crate) async fn ensure_covered(&self, user: &str, amount: Amount, released: Money) -> Result<()> {
        let summary = self.summary(user).await?;
        let available = summary
            .available
            .checked_add(released.min(summary.reserved))
            .unwrap_or(summary.balance);
        if amount.value() > available {
            warn!(user, requested = %amount, %available, "insufficient funds");
            return Err(LedgerError::InsufficientFunds {
                user: user.to_string(),
                requested: amount.cents(),
                available: available.cents(),
            });
        }
        Ok(())
    }

    /// Pays cleared funds out to one of the user's own instruments.
    ///
    /// The reservation (a `processing` withdrawal) is written under the
    /// user's lock; the payout itself runs outside it.
    pub async fn withdraw(&self, user: &str, amount: Money, method_id: Uuid) -> Result<Transaction> {
        let amount = Amount::try_from(amount)?;
        let method = self.methods.get(user, method_id).await?;

        let mut tx = {
            let _guard = self.lock_account(user).await;
            self.ensure_available(user, amount).await?;
            let mut tx = Transaction::new(
                TransactionType::Withdrawal,
                amount,
                &self.config.currency,
                user,
                None,
                self.clock.now(),
            );
            tx.mark_processing()?;
            self.store.commit(WriteSet::new().put(tx.clone())).await?;
            tx
        };
        info!(user, tx_id = %tx.id, %amount, "withdrawal reserved");

        let payout = self
            .gateway
            .payout(ChargeRequest {
                reference: tx.id.to_string(),
                customer: user.to_string(),
                method,
                amount,
                currency: tx.currency.clone(),
                kind: TransactionType::Withdrawal,
                requested_at: self.clock.now(),
            })
            .await;

        let outcome = if payout.is_ok() {
            Settlement::Completed
        } else {
            Settlement::Failed
        };
        tx.settle(outcome, self.clock.now())?;
        self.store.commit(WriteSet::new().put(tx.clone())).await?;
        self.events.publish(LedgerEvent::WithdrawalSettled {
            transaction_id: tx.id,
            user_id: user.to_string(),
            amount,
            completed: outcome == Settlement::Completed,
        });

        match payout {
            Ok(receipt) => {
                info!(user, tx_id = %tx.id, processor_id = %receipt.processor_id, "withdrawal completed");
                Ok(tx)
            }
            Err(e) => {
                warn!(user, tx_id = %tx.id, error = %e, "withdrawal payout failed");
                Err(e)
            }
        }
    }

    /// Charges the buyer for a marketplace order and holds the money in the
    /// platform pool, ready to be placed in escrow.
    pub async fn capture_order_payment(
        &self,
        buyer: &str,
        order_id: &str,
        amount: Money,
        method_id: Uuid,
    ) -> Result<Transaction> {
        let amount = Amount::try_from(amount)?;
        let method = self.methods.get(buyer, method_id).await?;
        let receipt = self
            .gateway
            .charge(ChargeRequest {
                reference: order_id.to_string(),
                customer: buyer.to_string(),
                method,
                amount,
                currency: self.config.currency.clone(),
                kind: TransactionType::Payment,
                requested_at: self.clock.now(),
            })
            .await?;
        let now = self.clock.now();
        let tx = Transaction::new(
            TransactionType::Payment,
            amount,
            &self.config.currency,
            buyer,
            Some(self.config.platform_account.clone()),
            now,
        )
        .for_order(order_id)
        .completed(now);
        self.store.commit(WriteSet::new().put(tx.clone())).await?;
        info!(buyer, order_id, %amount, processor_id = %receipt.processor_id, "order payment captured");
        Ok(tx)
    }
}
