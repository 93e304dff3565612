#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use gig_ledger::application::engine::LedgerEngine;
use gig_ledger::application::escrow::NewEscrow;
use gig_ledger::config::EngineConfig;
use gig_ledger::domain::checkout::{BillingInterval, NewCheckout};
use gig_ledger::domain::escrow::{EscrowAccount, MilestonePlan};
use gig_ledger::domain::money::{Amount, Money};
use gig_ledger::domain::payment_method::NewPaymentMethod;
use gig_ledger::domain::ports::{SharedClock, SharedGateway, SharedStore};
use gig_ledger::domain::promo::{DiscountType, PromoCode};
use gig_ledger::infrastructure::clock::ManualClock;
use gig_ledger::infrastructure::gateway::SimulatedGateway;
use gig_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use uuid::Uuid;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

/// An engine over a fresh in-memory store and a manual clock at [`start`].
pub fn engine() -> (Arc<LedgerEngine>, Arc<ManualClock>) {
    engine_with(Arc::new(SimulatedGateway::default()))
}

pub fn engine_with(gateway: SharedGateway) -> (Arc<LedgerEngine>, Arc<ManualClock>) {
    let store: SharedStore = Arc::new(InMemoryLedgerStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let shared_clock: SharedClock = clock.clone();
    let engine = LedgerEngine::new(store, gateway, shared_clock, EngineConfig::default()).unwrap();
    (Arc::new(engine), clock)
}

pub fn welcome20() -> PromoCode {
    PromoCode::new("WELCOME20", DiscountType::Percentage, dec!(20), start() + Duration::days(90), 100).unwrap()
}

pub fn save50() -> PromoCode {
    PromoCode::new("SAVE50", DiscountType::Fixed, dec!(5000), start() + Duration::days(90), 10)
        .unwrap()
        .with_plans(["professional", "enterprise"])
}

pub fn professional() -> NewCheckout {
    NewCheckout::new("professional", "Professional", Money::new(9900), BillingInterval::Month)
}

pub async fn card(engine: &LedgerEngine, user: &str, last4: &str) -> Uuid {
    engine
        .add_payment_method(user, NewPaymentMethod::card(last4, "visa", 12, 2030), true)
        .await
        .unwrap()
        .id
}

pub async fn bank(engine: &LedgerEngine, user: &str) -> Uuid {
    engine
        .add_payment_method(user, NewPaymentMethod::bank("6789"), false)
        .await
        .unwrap()
        .id
}

/// Captures `cents` from the buyer for `order` and opens an escrow on it.
pub async fn funded_escrow(
    engine: &LedgerEngine,
    order: &str,
    buyer: &str,
    seller: &str,
    cents: i64,
    milestones: &[i64],
) -> EscrowAccount {
    let method = card(engine, buyer, "4242").await;
    engine
        .capture_order_payment(buyer, order, Money::new(cents), method)
        .await
        .unwrap();
    engine
        .create_escrow_account(NewEscrow {
            order_id: order.to_string(),
            amount: Money::new(cents),
            buyer_id: buyer.to_string(),
            seller_id: seller.to_string(),
            milestones: milestones
                .iter()
                .map(|&cents| MilestonePlan {
                    description: format!("deliverable worth {cents}"),
                    amount: Amount::new(cents).unwrap(),
                    due_date: start() + Duration::days(14),
                    release_conditions: "buyer sign-off".to_string(),
                })
                .collect(),
        })
        .await
        .unwrap()
}

pub fn command_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
