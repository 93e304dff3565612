use super::locks::KeyedLocks;
use crate::domain::money::Money;
use crate::domain::ports::{SharedClock, SharedStore, WriteSet};
use crate::domain::promo::{PromoCode, PromoRejection};
use crate::error::{LedgerError, Result};
use tracing::{debug, info};

/// Validates, prices and spends promo codes.
pub struct PromoEngine {
    store: SharedStore,
    clock: SharedClock,
    locks: KeyedLocks<String>,
}

impl PromoEngine {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Adds a code to the catalog. Codes are unique regardless of case.
    pub async fn register(&self, promo: PromoCode) -> Result<PromoCode> {
        let _guard = self.locks.lock(&promo.code).await;
        if self.store.promo(&promo.code).await?.is_some() {
            return Err(LedgerError::invalid_state(
                "promo code",
                &promo.code,
                "code already exists",
            ));
        }
        self.store.commit(WriteSet::new().put(promo.clone())).await?;
        info!(code = %promo.code, max_uses = promo.max_uses, "promo code registered");
        Ok(promo)
    }

    /// Switches a code off. It stays in the catalog as a historical record.
    pub async fn deactivate(&self, code: &str) -> Result<PromoCode> {
        let code = PromoCode::normalize(code);
        let _guard = self.locks.lock(&code).await;
        let mut promo = self
            .store
            .promo(&code)
            .await?
            .ok_or_else(|| LedgerError::not_found("promo code", &code))?;
        promo.is_active = false;
        self.store.commit(WriteSet::new().put(promo.clone())).await?;
        info!(code = %promo.code, "promo code deactivated");
        Ok(promo)
    }

    /// Validates `code` for a charge and, when it applies, spends one use.
    ///
    /// Returns `Ok(None)` for any code that does not apply; that is an
    /// ordinary outcome. Do not call speculatively: success consumes a use.
    pub async fn validate(&self, code: &str, plan_id: &str, amount: Money) -> Result<Option<PromoCode>> {
        let code = PromoCode::normalize(code);
        let _guard = self.locks.lock(&code).await;
        let Some(mut promo) = self.store.promo(&code).await? else {
            debug!(%code, reason = %PromoRejection::Unknown, "promo code rejected");
            return Ok(None);
        };
        if let Err(reason) = promo.check(plan_id, amount, self.clock.now()) {
            debug!(%code, plan_id, %reason, "promo code rejected");
            return Ok(None);
        }
        promo.redeem();
        self.store.commit(WriteSet::new().put(promo.clone())).await?;
        info!(%code, plan_id, used = promo.used_count, max_uses = promo.max_uses, "promo code redeemed");
        Ok(Some(promo))
    }

    pub async fn list(&self) -> Result<Vec<PromoCode>> {
        self.store.promos().await
    }
}
