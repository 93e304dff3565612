use super::locks::KeyedLocks;
use crate::domain::UserId;
use crate::domain::payment_method::{NewPaymentMethod, PaymentMethod, PaymentMethodBook};
use crate::domain::ports::{SharedStore, WriteSet};
use crate::error::{LedgerError, Result};
use tracing::info;
use uuid::Uuid;

/// Stores tokenized instruments per owner. Never touches the ledger.
pub struct PaymentMethodRegistry {
    store: SharedStore,
    locks: KeyedLocks<UserId>,
}

impl PaymentMethodRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    async fn book(&self, owner: &str) -> Result<PaymentMethodBook> {
        Ok(self
            .store
            .payment_methods(owner)
            .await?
            .unwrap_or_else(|| PaymentMethodBook::new(owner)))
    }

    pub async fn add(&self, owner: &str, details: NewPaymentMethod, make_default: bool) -> Result<PaymentMethod> {
        if owner.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Payment method owner must not be empty".to_string(),
            ));
        }
        let method = PaymentMethod::register(details)?;
        let _guard = self.locks.lock(&owner.to_string()).await;
        let mut book = self.book(owner).await?;
        let added = book.add(method, make_default);
        self.store.commit(WriteSet::new().put(book)).await?;
        info!(owner, method_id = %added.id, kind = ?added.r#type, is_default = added.is_default, "payment method added");
        Ok(added)
    }

    pub async fn set_default(&self, owner: &str, id: Uuid) -> Result<PaymentMethod> {
        let _guard = self.locks.lock(&owner.to_string()).await;
        let mut book = self.book(owner).await?;
        book.set_default(id)?;
        let method = book.get(id)?.clone();
        self.store.commit(WriteSet::new().put(book)).await?;
        info!(owner, method_id = %id, "default payment method changed");
        Ok(method)
    }

    pub async fn remove(&self, owner: &str, id: Uuid) -> Result<PaymentMethod> {
        let _guard = self.locks.lock(&owner.to_string()).await;
        let mut book = self.book(owner).await?;
        let removed = book.remove(id)?;
        self.store.commit(WriteSet::new().put(book)).await?;
        info!(owner, method_id = %id, was_default = removed.is_default, "payment method removed");
        Ok(removed)
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<PaymentMethod>> {
        Ok(self.book(owner).await?.methods)
    }

    pub async fn get(&self, owner: &str, id: Uuid) -> Result<PaymentMethod> {
        Ok(self.book(owner).await?.get(id)?.clone())
    }

    pub async fn default_method(&self, owner: &str) -> Result<Option<PaymentMethod>> {
        Ok(self.book(owner).await?.default_method().cloned())
    }
}
