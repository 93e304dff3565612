use crate::domain::UserId;
use crate::error::{LedgerError, Result};
use chrono::Duration;

/// Settings shared by every ledger component.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// ISO 4217 code stamped on every session, invoice and transaction.
    pub currency: String,
    /// Account that receives subscription payments and holds escrowed funds.
    pub platform_account: UserId,
    /// Pending checkouts older than this are failed by the expiry sweep.
    pub checkout_ttl: Duration,
    /// Buffer of the change-notification channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            platform_account: "platform".to_string(),
            checkout_ttl: Duration::minutes(30),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(LedgerError::ValidationError(format!(
                "currency must be a three-letter ISO code, got '{}'",
                self.currency
            )));
        }
        if self.platform_account.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "platform account must not be empty".to_string(),
            ));
        }
        if self.checkout_ttl <= Duration::zero() {
            return Err(LedgerError::ValidationError(
                "checkout TTL must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(LedgerError::ValidationError(
                "event capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
