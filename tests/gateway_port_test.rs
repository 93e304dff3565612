use async_trait::async_trait;
use gig_ledger::domain::checkout::BillingDetails;
use gig_ledger::domain::money::Money;
use gig_ledger::domain::ports::{ChargeReceipt, ChargeRequest, PaymentGateway};
use gig_ledger::domain::transaction::TransactionType;
use gig_ledger::error::{LedgerError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

mod common;

/// Records every request and can be told to refuse payouts.
#[derive(Default)]
struct RecordingGateway {
    charges: Mutex<Vec<ChargeRequest>>,
    payouts: AtomicUsize,
    refuse_payouts: bool,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt> {
        // Long enough for racing callers to pile up behind the first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reference = request.reference.clone();
        self.charges.lock().await.push(request);
        Ok(ChargeReceipt {
            reference,
            processor_id: "rec_charge".to_string(),
        })
    }

    async fn payout(&self, request: ChargeRequest) -> Result<ChargeReceipt> {
        self.payouts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_payouts {
            return Err(LedgerError::PaymentDeclined("payouts paused".to_string()));
        }
        Ok(ChargeReceipt {
            reference: request.reference,
            processor_id: "rec_payout".to_string(),
        })
    }
}

#[tokio::test]
async fn test_checkout_charges_through_custom_gateway() {
    let gateway = Arc::new(RecordingGateway::default());
    let (engine, _clock) = common::engine_with(gateway.clone());
    engine.register_promo_code(common::welcome20()).await.unwrap();
    let card = common::card(&engine, "alice", "4242").await;
    let session = engine
        .create_checkout_session(common::professional().with_promo("WELCOME20"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .confirm_payment(session.id, card, BillingDetails::for_user("alice"))
                .await
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let charges = gateway.charges.lock().await;
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount.cents(), 7920);
    assert_eq!(charges[0].customer, "alice");
    assert_eq!(charges[0].kind, TransactionType::Payment);
    assert_eq!(charges[0].method.id, card);
}

#[tokio::test]
async fn test_refused_payout_keeps_funds() {
    let gateway = Arc::new(RecordingGateway {
        refuse_payouts: true,
        ..RecordingGateway::default()
    });
    let (engine, _clock) = common::engine_with(gateway.clone());
    let escrow = common::funded_escrow(&engine, "order-1", "bob", "carol", 1000, &[]).await;
    engine.release_escrow_funds(escrow.id).await.unwrap();
    let bank = common::bank(&engine, "carol").await;

    assert!(matches!(
        engine.withdraw_funds("carol", Money::new(400), bank).await,
        Err(LedgerError::PaymentDeclined(_))
    ));
    assert_eq!(gateway.payouts.load(Ordering::SeqCst), 1);
    assert_eq!(engine.get_balance("carol").await.unwrap(), Money::new(1000));
}
