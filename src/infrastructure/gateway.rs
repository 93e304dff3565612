use crate::domain::ports::{ChargeReceipt, ChargeRequest, PaymentGateway};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Card ending used by processors' test decks for a generic decline.
pub const DECLINE_LAST4: &str = "0002";
/// Card ending that declines for lack of funds.
pub const INSUFFICIENT_FUNDS_LAST4: &str = "9995";

/// Stand-in processor with configurable latency.
///
/// Declines instruments ending in [`DECLINE_LAST4`] or
/// [`INSUFFICIENT_FUNDS_LAST4`] and expired cards; approves everything else.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    latency: Duration,
}

impl SimulatedGateway {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    async fn process(&self, request: ChargeRequest) -> Result<ChargeReceipt> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reason = match request.method.last4.as_str() {
            DECLINE_LAST4 => Some("card declined"),
            INSUFFICIENT_FUNDS_LAST4 => Some("insufficient funds on instrument"),
            _ if request.method.is_expired(request.requested_at) => Some("card expired"),
            _ => None,
        };
        if let Some(reason) = reason {
            tracing::debug!(
                reference = %request.reference,
                customer = %request.customer,
                amount = %request.amount,
                reason,
                "simulated processor declined"
            );
            return Err(LedgerError::PaymentDeclined(reason.to_string()));
        }
        Ok(ChargeReceipt {
            reference: request.reference,
            processor_id: format!("sim_{}", Uuid::new_v4().simple()),
        })
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt> {
        self.process(request).await
    }

    async fn payout(&self, request: ChargeRequest) -> Result<ChargeReceipt> {
        self.process(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::payment_method::{NewPaymentMethod, PaymentMethod};
    use crate::domain::transaction::TransactionType;
    use chrono::{TimeZone, Utc};

    fn request(last4: &str, expiry_year: u16) -> ChargeRequest {
        ChargeRequest {
            reference: "session-1".to_string(),
            customer: "alice".to_string(),
            method: PaymentMethod::register(NewPaymentMethod::card(last4, "visa", 6, expiry_year))
                .unwrap(),
            amount: Amount::new(7920).unwrap(),
            currency: "USD".to_string(),
            kind: TransactionType::Payment,
            requested_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_approves_regular_card() {
        let receipt = SimulatedGateway::default()
            .charge(request("4242", 2030))
            .await
            .unwrap();
        assert_eq!(receipt.reference, "session-1");
        assert!(receipt.processor_id.starts_with("sim_"));
    }

    #[tokio::test]
    async fn test_declines_test_cards_and_expired() {
        let gateway = SimulatedGateway::default();
        for (last4, year) in [(DECLINE_LAST4, 2030), (INSUFFICIENT_FUNDS_LAST4, 2030), ("4242", 2020)] {
            assert!(matches!(
                gateway.charge(request(last4, year)).await,
                Err(LedgerError::PaymentDeclined(_))
            ));
        }
    }
}
