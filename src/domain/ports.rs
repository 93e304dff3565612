use super::UserId;
use super::checkout::CheckoutSession;
use super::escrow::EscrowAccount;
use super::money::Amount;
use super::payment_method::{PaymentMethod, PaymentMethodBook};
use super::promo::PromoCode;
use super::subscription::{Invoice, Subscription};
use super::transaction::{Transaction, TransactionType};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// One persisted record. Writes are grouped into a [`WriteSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Transaction(Transaction),
    Session(CheckoutSession),
    Subscription(Subscription),
    Invoice(Invoice),
    Escrow(EscrowAccount),
    Promo(PromoCode),
    PaymentMethods(PaymentMethodBook),
}

macro_rules! impl_into_record {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(impl From<$ty> for Record {
            fn from(value: $ty) -> Self {
                Record::$variant(value)
            }
        })*
    };
}

impl_into_record! {
    Transaction => Transaction,
    Session => CheckoutSession,
    Subscription => Subscription,
    Invoice => Invoice,
    Escrow => EscrowAccount,
    Promo => PromoCode,
    PaymentMethods => PaymentMethodBook,
}

/// Records that must become visible together or not at all.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteSet {
    records: Vec<Record>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, record: impl Into<Record>) -> Self {
        self.records.push(record.into());
        self
    }

    pub fn push(&mut self, record: impl Into<Record>) {
        self.records.push(record.into());
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Persistence for every ledger record.
///
/// `commit` must apply a whole `WriteSet` atomically; readers never observe
/// half of it. Records are upserted by id. The filtered lookups have default
/// implementations on top of the full scans.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn commit(&self, writes: WriteSet) -> Result<()>;

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    /// All ledger entries, oldest first.
    async fn transactions(&self) -> Result<Vec<Transaction>>;
    async fn session(&self, id: Uuid) -> Result<Option<CheckoutSession>>;
    async fn sessions(&self) -> Result<Vec<CheckoutSession>>;
    async fn subscription(&self, id: Uuid) -> Result<Option<Subscription>>;
    async fn subscriptions(&self) -> Result<Vec<Subscription>>;
    async fn invoices(&self) -> Result<Vec<Invoice>>;
    async fn escrow(&self, id: Uuid) -> Result<Option<EscrowAccount>>;
    async fn escrows(&self) -> Result<Vec<EscrowAccount>>;
    /// Looks up a normalized promo code.
    async fn promo(&self, code: &str) -> Result<Option<PromoCode>>;
    async fn promos(&self) -> Result<Vec<PromoCode>>;
    async fn payment_methods(&self, owner: &str) -> Result<Option<PaymentMethodBook>>;

    async fn transactions_for_user(&self, user: &str) -> Result<Vec<Transaction>> {
        let mut all = self.transactions().await?;
        all.retain(|tx| tx.involves(user));
        Ok(all)
    }

    async fn transactions_for_order(&self, order_id: &str) -> Result<Vec<Transaction>> {
        let mut all = self.transactions().await?;
        all.retain(|tx| tx.order_id.as_deref() == Some(order_id));
        Ok(all)
    }

    /// The subscription occupying the user's slot: the live one if any,
    /// otherwise the most recently started.
    async fn subscription_for_user(&self, user: &str) -> Result<Option<Subscription>> {
        let mut owned: Vec<Subscription> = self
            .subscriptions()
            .await?
            .into_iter()
            .filter(|s| s.user_id == user)
            .collect();
        owned.sort_by_key(|s| (s.status.is_live(), s.current_period_start));
        Ok(owned.pop())
    }

    async fn invoices_for_subscription(&self, subscription_id: Uuid) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .invoices()
            .await?
            .into_iter()
            .filter(|i| i.subscription_id == subscription_id)
            .collect();
        invoices.sort_by_key(|i| i.due_date);
        Ok(invoices)
    }

    async fn escrow_for_order(&self, order_id: &str) -> Result<Option<EscrowAccount>> {
        Ok(self
            .escrows()
            .await?
            .into_iter()
            .find(|e| e.order_id == order_id))
    }

    async fn escrows_for_user(&self, user: &str) -> Result<Vec<EscrowAccount>> {
        let mut owned: Vec<EscrowAccount> = self
            .escrows()
            .await?
            .into_iter()
            .filter(|e| e.involves(user))
            .collect();
        owned.sort_by_key(|e| e.created_at);
        Ok(owned)
    }
}

/// A charge or payout handed to the external processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Our own reference for the movement (session, transaction or order id).
    pub reference: String,
    pub customer: UserId,
    pub method: PaymentMethod,
    pub amount: Amount,
    pub currency: String,
    pub kind: TransactionType,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeReceipt {
    pub reference: String,
    pub processor_id: String,
}

/// The external payment processor.
///
/// A call either fully succeeds or fails with `PaymentDeclined`; there are no
/// partial charges. Calls may be slow and are never made under an entity lock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt>;
    async fn payout(&self, request: ChargeRequest) -> Result<ChargeReceipt>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedStore = Arc<dyn LedgerStore>;
pub type SharedGateway = Arc<dyn PaymentGateway>;
pub type SharedClock = Arc<dyn Clock>;
