use super::events::EventBus;
use super::ledger::Ledger;
use super::locks::KeyedLocks;
use crate::config::EngineConfig;
use crate::domain::UserId;
use crate::domain::escrow::{EscrowAccount, EscrowStatus, MilestonePlan, Party};
use crate::domain::events::LedgerEvent;
use crate::domain::money::{Amount, Money};
use crate::domain::ports::{SharedClock, SharedStore, WriteSet};
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A request to hold a captured order payment in escrow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewEscrow {
    pub order_id: String,
    pub amount: Money,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    #[serde(default)]
    pub milestones: Vec<MilestonePlan>,
}

/// Holds captured order payments in the platform pool until they are released
/// to the seller or refunded to the buyer.
///
/// Every payout is debited from the platform account, so payouts take that
/// account's ledger lock for the balance check and commit.
pub struct EscrowManager {
    store: SharedStore,
    clock: SharedClock,
    events: EventBus,
    ledger: Arc<Ledger>,
    config: EngineConfig,
    accounts: KeyedLocks<Uuid>,
    orders: KeyedLocks<String>,
}

impl EscrowManager {
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        events: EventBus,
        ledger: Arc<Ledger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            ledger,
            config,
            accounts: KeyedLocks::new(),
            orders: KeyedLocks::new(),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<EscrowAccount> {
        self.store
            .escrow(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("escrow", id))
    }

    pub async fn for_user(&self, user: &str) -> Result<Vec<EscrowAccount>> {
        self.store.escrows_for_user(user).await
    }

    /// Opens an escrow on an order whose payment has been captured.
    pub async fn create(&self, request: NewEscrow) -> Result<EscrowAccount> {
        let amount = Amount::try_from(request.amount)?;
        let _order = self.orders.lock(&request.order_id).await;
        if let Some(existing) = self.store.escrow_for_order(&request.order_id).await? {
            return Err(LedgerError::invalid_state(
                "escrow",
                existing.id,
                format!("order {} already has an escrow", request.order_id),
            ));
        }
        let captured: Money = self
            .store
            .transactions_for_order(&request.order_id)
            .await?
            .iter()
            .filter(|tx| {
                tx.r#type == TransactionType::Payment
                    && tx.status == TransactionStatus::Completed
                    && tx.from_user == request.buyer_id
            })
            .map(|tx| tx.amount.value())
            .sum();
        if captured < amount.value() {
            return Err(LedgerError::invalid_state(
                "order",
                &request.order_id,
                format!("captured {captured} from {}, escrow needs {amount}", request.buyer_id),
            ));
        }
        let _pool = self.ledger.lock_account(&self.config.platform_account).await;
        self.ledger
            .ensure_available(&self.config.platform_account, amount)
            .await?;
        let account = EscrowAccount::open(
            &request.order_id,
            amount,
            &self.config.currency,
            &request.buyer_id,
            &request.seller_id,
            request.milestones,
            self.clock.now(),
        )?;
        self.store.commit(WriteSet::new().put(account.clone())).await?;
        info!(
            escrow_id = %account.id,
            order_id = %account.order_id,
            %amount,
            milestones = account.milestones.len(),
            "escrow opened"
        );
        Ok(account)
    }

    fn payout(&self, account: &EscrowAccount, r#type: TransactionType, amount: Amount, to: &str) -> Transaction {
        let now = self.clock.now();
        let status = match r#type {
            TransactionType::Refund => EscrowStatus::Refunded,
            _ => EscrowStatus::Released,
        };
        Transaction::new(
            r#type,
            amount,
            &account.currency,
            &self.config.platform_account,
            Some(to.to_string()),
            now,
        )
        .for_order(&account.order_id)
        .with_escrow_status(status)
        .completed(now)
    }

    /// Debits the platform pool for `payouts` and commits them with `account`.
    ///
    /// The payouts are covered by the hold they free, so they only fail when
    /// the pool no longer holds what the escrow was promised.
    async fn commit_payouts(&self, account: &EscrowAccount, payouts: &[Transaction]) -> Result<()> {
        let platform = &self.config.platform_account;
        let _pool = self.ledger.lock_account(platform).await;
        let freed = self.get(account.id).await?.held() - account.held();
        let total: Money = payouts.iter().map(|tx| tx.amount.value()).sum();
        if let Ok(total) = Amount::try_from(total)
            && let Err(e) = self.ledger.ensure_covered(platform, total, freed).await
        {
            warn!(escrow_id = %account.id, error = %e, "platform pool cannot cover escrow payout");
            return Err(e);
        }
        let mut writes = WriteSet::new().put(account.clone());
        for tx in payouts {
            writes.push(tx.clone());
        }
        self.store.commit(writes).await
    }

    /// Pays the seller everything still held. At most once per escrow.
    pub async fn release(&self, id: Uuid) -> Result<Transaction> {
        let _guard = self.accounts.lock(&id).await;
        let mut account = self.get(id).await?;
        let owed = account.release_all(self.clock.now())?;
        let tx = self.payout(&account, TransactionType::EscrowRelease, owed, &account.seller_id);
        self.commit_payouts(&account, std::slice::from_ref(&tx)).await?;
        info!(escrow_id = %id, seller = %account.seller_id, amount = %owed, "escrow released");
        self.events.publish(LedgerEvent::EscrowReleased {
            escrow_id: id,
            seller_id: account.seller_id.clone(),
            amount: owed,
        });
        Ok(tx)
    }

    /// Pays out one approved milestone. Any amount not covered by milestones
    /// goes back to the buyer when the last one is released.
    pub async fn release_milestone(&self, id: Uuid, milestone_id: Uuid) -> Result<Transaction> {
        let _guard = self.accounts.lock(&id).await;
        let mut account = self.get(id).await?;
        let release = account.release_milestone(milestone_id, self.clock.now())?;
        let tx = self.payout(&account, TransactionType::EscrowRelease, release.amount, &account.seller_id);
        let mut payouts = vec![tx.clone()];
        if let Some(rest) = release.unallocated {
            payouts.push(self.payout(&account, TransactionType::Refund, rest, &account.buyer_id));
        }
        self.commit_payouts(&account, &payouts).await?;
        info!(
            escrow_id = %id,
            %milestone_id,
            amount = %release.amount,
            escrow_status = ?account.status,
            "milestone released"
        );
        self.events.publish(LedgerEvent::MilestoneReleased {
            escrow_id: id,
            milestone_id,
            amount: release.amount,
        });
        if let Some(rest) = release.unallocated {
            info!(escrow_id = %id, buyer = %account.buyer_id, amount = %rest, "unallocated escrow refunded");
            self.events.publish(LedgerEvent::EscrowRefunded {
                escrow_id: id,
                buyer_id: account.buyer_id.clone(),
                amount: rest,
            });
        }
        Ok(tx)
    }

    /// Returns everything still held to the buyer.
    pub async fn refund(&self, id: Uuid) -> Result<Transaction> {
        let _guard = self.accounts.lock(&id).await;
        let mut account = self.get(id).await?;
        let owed = account.refund()?;
        let tx = self.payout(&account, TransactionType::Refund, owed, &account.buyer_id);
        self.commit_payouts(&account, std::slice::from_ref(&tx)).await?;
        info!(escrow_id = %id, buyer = %account.buyer_id, amount = %owed, "escrow refunded");
        self.events.publish(LedgerEvent::EscrowRefunded {
            escrow_id: id,
            buyer_id: account.buyer_id.clone(),
            amount: owed,
        });
        Ok(tx)
    }

    /// Freezes the escrow. Nothing can be released or refunded afterwards.
    pub async fn dispute(&self, id: Uuid) -> Result<EscrowAccount> {
        self.modify(id, "escrow disputed", EscrowAccount::dispute).await?;
        self.events.publish(LedgerEvent::EscrowDisputed { escrow_id: id });
        self.get(id).await
    }

    pub async fn fund_milestone(&self, id: Uuid, milestone_id: Uuid) -> Result<EscrowAccount> {
        self.modify(id, "milestone funded", |a| a.fund_milestone(milestone_id))
            .await
    }

    pub async fn approve_milestone(&self, id: Uuid, milestone_id: Uuid, party: Party) -> Result<EscrowAccount> {
        self.modify(id, "milestone approved", |a| a.approve_milestone(milestone_id, party))
            .await
    }

    pub async fn dispute_milestone(&self, id: Uuid, milestone_id: Uuid) -> Result<EscrowAccount> {
        self.modify(id, "milestone disputed", |a| a.dispute_milestone(milestone_id))
            .await
    }

    async fn modify(
        &self,
        id: Uuid,
        what: &'static str,
        change: impl FnOnce(&mut EscrowAccount) -> Result<()>,
    ) -> Result<EscrowAccount> {
        let _guard = self.accounts.lock(&id).await;
        let mut account = self.get(id).await?;
        change(&mut account)?;
        self.store.commit(WriteSet::new().put(account.clone())).await?;
        info!(escrow_id = %id, status = ?account.status, "{what}");
        Ok(account)
    }
}
