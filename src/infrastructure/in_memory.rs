use crate::domain::checkout::CheckoutSession;
use crate::domain::escrow::EscrowAccount;
use crate::domain::payment_method::PaymentMethodBook;
use crate::domain::ports::{LedgerStore, Record, WriteSet};
use crate::domain::promo::PromoCode;
use crate::domain::subscription::{Invoice, Subscription};
use crate::domain::transaction::Transaction;
use crate::domain::UserId;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    /// Append-only log; `transaction_index` points into it by id.
    transactions: Vec<Transaction>,
    transaction_index: HashMap<Uuid, usize>,
    sessions: HashMap<Uuid, CheckoutSession>,
    subscriptions: HashMap<Uuid, Subscription>,
    invoices: HashMap<Uuid, Invoice>,
    escrows: HashMap<Uuid, EscrowAccount>,
    promos: HashMap<String, PromoCode>,
    payment_methods: HashMap<UserId, PaymentMethodBook>,
}

impl Tables {
    fn apply(&mut self, record: Record) {
        match record {
            Record::Transaction(tx) => match self.transaction_index.get(&tx.id) {
                Some(&position) => self.transactions[position] = tx,
                None => {
                    self.transaction_index.insert(tx.id, self.transactions.len());
                    self.transactions.push(tx);
                }
            },
            Record::Session(session) => {
                self.sessions.insert(session.id, session);
            }
            Record::Subscription(subscription) => {
                self.subscriptions.insert(subscription.id, subscription);
            }
            Record::Invoice(invoice) => {
                self.invoices.insert(invoice.id, invoice);
            }
            Record::Escrow(escrow) => {
                self.escrows.insert(escrow.id, escrow);
            }
            Record::Promo(promo) => {
                self.promos.insert(promo.code.clone(), promo);
            }
            Record::PaymentMethods(book) => {
                self.payment_methods.insert(book.owner.clone(), book);
            }
        }
    }
}

/// A thread-safe in-memory ledger store.
///
/// All tables sit behind a single `RwLock`, so a `WriteSet` is applied under
/// one write guard and readers see either none or all of it. Ideal for tests
/// and single-process runs where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn commit(&self, writes: WriteSet) -> Result<()> {
        let mut tables = self.tables.write().await;
        for record in writes.into_records() {
            tables.apply(record);
        }
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transaction_index
            .get(&id)
            .map(|&position| tables.transactions[position].clone()))
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.clone())
    }

    async fn session(&self, id: Uuid) -> Result<Option<CheckoutSession>> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn sessions(&self) -> Result<Vec<CheckoutSession>> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.values().cloned().collect())
    }

    async fn subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables.subscriptions.get(&id).cloned())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables.subscriptions.values().cloned().collect())
    }

    async fn invoices(&self) -> Result<Vec<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables.invoices.values().cloned().collect())
    }

    async fn escrow(&self, id: Uuid) -> Result<Option<EscrowAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.escrows.get(&id).cloned())
    }

    async fn escrows(&self) -> Result<Vec<EscrowAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.escrows.values().cloned().collect())
    }

    async fn promo(&self, code: &str) -> Result<Option<PromoCode>> {
        let tables = self.tables.read().await;
        Ok(tables.promos.get(code).cloned())
    }

    async fn promos(&self) -> Result<Vec<PromoCode>> {
        let tables = self.tables.read().await;
        let mut promos: Vec<PromoCode> = tables.promos.values().cloned().collect();
        promos.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(promos)
    }

    async fn payment_methods(&self, owner: &str) -> Result<Option<PaymentMethodBook>> {
        let tables = self.tables.read().await;
        Ok(tables.payment_methods.get(owner).cloned())
    }
}
