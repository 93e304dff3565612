use crate::domain::checkout::CheckoutSession;
use crate::domain::escrow::EscrowAccount;
use crate::domain::payment_method::PaymentMethodBook;
use crate::domain::ports::{LedgerStore, Record, WriteSet};
use crate::domain::promo::PromoCode;
use crate::domain::subscription::{Invoice, Subscription};
use crate::domain::transaction::Transaction;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Column Family for ledger entries.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping a big-endian append sequence to a transaction id.
pub const CF_TRANSACTION_LOG: &str = "transaction_log";
/// Column Family for checkout sessions.
pub const CF_SESSIONS: &str = "sessions";
/// Column Family for subscriptions.
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
/// Column Family for invoices.
pub const CF_INVOICES: &str = "invoices";
/// Column Family for escrow accounts.
pub const CF_ESCROWS: &str = "escrows";
/// Column Family for the promo code catalog, keyed by normalized code.
pub const CF_PROMOS: &str = "promos";
/// Column Family for payment methods, keyed by owner.
pub const CF_PAYMENT_METHODS: &str = "payment_methods";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_TRANSACTIONS,
    CF_TRANSACTION_LOG,
    CF_SESSIONS,
    CF_SUBSCRIPTIONS,
    CF_INVOICES,
    CF_ESCROWS,
    CF_PROMOS,
    CF_PAYMENT_METHODS,
];

/// A persistent ledger store using RocksDB.
///
/// Every record kind lives in its own Column Family as JSON. A `WriteSet` is
/// turned into one `WriteBatch`, which RocksDB applies atomically.
///
/// Transactions are keyed by id for lookups and settlement. The first write of
/// each id also appends it to `CF_TRANSACTION_LOG`, which keeps the log in
/// insertion order whatever the timestamps say.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    next_seq: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        let next_seq = Self::last_seq(&db)?.map_or(0, |seq| seq + 1);

        Ok(Self {
            db: Arc::new(db),
            next_seq: Arc::new(AtomicU64::new(next_seq)),
        })
    }

    fn last_seq(db: &DB) -> Result<Option<u64>> {
        let cf = db.cf_handle(CF_TRANSACTION_LOG).ok_or_else(|| {
            LedgerError::IoError(std::io::Error::other(format!(
                "{CF_TRANSACTION_LOG} column family not found"
            )))
        })?;
        match db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _id) = item?;
                Ok(Some(seq_from_key(&key)?))
            }
            None => Ok(None),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LedgerError::IoError(std::io::Error::other(format!(
                "{name} column family not found"
            )))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

fn encode(record: &Record) -> Result<(&'static str, Vec<u8>, Vec<u8>)> {
    Ok(match record {
        Record::Transaction(tx) => (CF_TRANSACTIONS, uuid_key(tx.id), serde_json::to_vec(tx)?),
        Record::Session(session) => (CF_SESSIONS, uuid_key(session.id), serde_json::to_vec(session)?),
        Record::Subscription(subscription) => (
            CF_SUBSCRIPTIONS,
            uuid_key(subscription.id),
            serde_json::to_vec(subscription)?,
        ),
        Record::Invoice(invoice) => (CF_INVOICES, uuid_key(invoice.id), serde_json::to_vec(invoice)?),
        Record::Escrow(escrow) => (CF_ESCROWS, uuid_key(escrow.id), serde_json::to_vec(escrow)?),
        Record::Promo(promo) => (
            CF_PROMOS,
            promo.code.as_bytes().to_vec(),
            serde_json::to_vec(promo)?,
        ),
        Record::PaymentMethods(book) => (
            CF_PAYMENT_METHODS,
            book.owner.as_bytes().to_vec(),
            serde_json::to_vec(book)?,
        ),
    })
}

fn uuid_key(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn seq_from_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| {
        LedgerError::IoError(std::io::Error::other(format!(
            "malformed transaction log key of {} bytes",
            key.len()
        )))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn commit(&self, writes: WriteSet) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut appended = HashSet::new();
        for record in writes.into_records() {
            if let Record::Transaction(tx) = &record
                && appended.insert(tx.id)
                && self.db.get_cf(self.cf(CF_TRANSACTIONS)?, tx.id.as_bytes())?.is_none()
            {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                batch.put_cf(self.cf(CF_TRANSACTION_LOG)?, seq.to_be_bytes(), uuid_key(tx.id));
            }
            let (cf_name, key, value) = encode(&record)?;
            batch.put_cf(self.cf(cf_name)?, key, value);
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.get_json(CF_TRANSACTIONS, id.as_bytes())
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        let log = self.cf(CF_TRANSACTION_LOG)?;
        let mut all = Vec::new();
        let mut seen = HashSet::new();
        for item in self.db.iterator_cf(log, IteratorMode::Start) {
            let (_seq, id) = item?;
            if seen.insert(id.clone())
                && let Some(tx) = self.get_json(CF_TRANSACTIONS, &id)?
            {
                all.push(tx);
            }
        }
        Ok(all)
    }

    async fn session(&self, id: Uuid) -> Result<Option<CheckoutSession>> {
        self.get_json(CF_SESSIONS, id.as_bytes())
    }

    async fn sessions(&self) -> Result<Vec<CheckoutSession>> {
        self.scan_json(CF_SESSIONS)
    }

    async fn subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        self.get_json(CF_SUBSCRIPTIONS, id.as_bytes())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        self.scan_json(CF_SUBSCRIPTIONS)
    }

    async fn invoices(&self) -> Result<Vec<Invoice>> {
        self.scan_json(CF_INVOICES)
    }

    async fn escrow(&self, id: Uuid) -> Result<Option<EscrowAccount>> {
        self.get_json(CF_ESCROWS, id.as_bytes())
    }

    async fn escrows(&self) -> Result<Vec<EscrowAccount>> {
        self.scan_json(CF_ESCROWS)
    }

    async fn promo(&self, code: &str) -> Result<Option<PromoCode>> {
        self.get_json(CF_PROMOS, code.as_bytes())
    }

    async fn promos(&self) -> Result<Vec<PromoCode>> {
        self.scan_json(CF_PROMOS)
    }

    async fn payment_methods(&self, owner: &str) -> Result<Option<PaymentMethodBook>> {
        self.get_json(CF_PAYMENT_METHODS, owner.as_bytes())
    }
}
