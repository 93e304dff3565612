use super::analytics::AnalyticsRecorder;
use super::checkout::{CheckoutManager, CheckoutReceipt};
use super::escrow::{EscrowManager, NewEscrow};
use super::events::EventBus;
use super::ledger::{BalanceSummary, Ledger};
use super::payment_methods::PaymentMethodRegistry;
use super::promo::PromoEngine;
use super::subscription::{RolloverReport, SubscriptionManager};
use crate::config::EngineConfig;
use crate::domain::UserId;
use crate::domain::analytics::PricingAnalytics;
use crate::domain::checkout::{BillingDetails, CheckoutSession, NewCheckout};
use crate::domain::escrow::{EscrowAccount, Party};
use crate::domain::events::LedgerEvent;
use crate::domain::money::Money;
use crate::domain::payment_method::{NewPaymentMethod, PaymentMethod};
use crate::domain::ports::{SharedClock, SharedGateway, SharedStore};
use crate::domain::promo::PromoCode;
use crate::domain::subscription::{Invoice, NewTrial, Subscription};
use crate::domain::transaction::{Settlement, Transaction};
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One row of the end-of-run balance report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub user: UserId,
    pub summary: BalanceSummary,
}

/// The entry point for every ledger operation.
///
/// `LedgerEngine` wires the components over one store, one payment gateway
/// and one clock. It is cheap to share behind an `Arc`; every operation takes
/// `&self` and concurrent calls on different entities do not contend.
pub struct LedgerEngine {
    config: EngineConfig,
    events: EventBus,
    promos: Arc<PromoEngine>,
    methods: Arc<PaymentMethodRegistry>,
    ledger: Arc<Ledger>,
    subscriptions: Arc<SubscriptionManager>,
    analytics: Arc<AnalyticsRecorder>,
    checkout: CheckoutManager,
    escrow: EscrowManager,
}

impl LedgerEngine {
    /// Creates a new `LedgerEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for every record.
    /// * `gateway` - The external payment processor.
    /// * `clock` - Source of time for expiry and billing periods.
    /// * `config` - Currency, platform account and checkout TTL.
    pub fn new(store: SharedStore, gateway: SharedGateway, clock: SharedClock, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        let promos = Arc::new(PromoEngine::new(store.clone(), clock.clone()));
        let methods = Arc::new(PaymentMethodRegistry::new(store.clone()));
        let analytics = Arc::new(AnalyticsRecorder::new());
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            gateway.clone(),
            clock.clone(),
            events.clone(),
            methods.clone(),
            config.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            store.clone(),
            gateway.clone(),
            clock.clone(),
            events.clone(),
            methods.clone(),
            config.clone(),
        ));
        let checkout = CheckoutManager::new(
            store.clone(),
            gateway,
            clock.clone(),
            events.clone(),
            promos.clone(),
            methods.clone(),
            subscriptions.clone(),
            analytics.clone(),
            config.clone(),
        );
        let escrow = EscrowManager::new(store, clock, events.clone(), ledger.clone(), config.clone());
        Ok(Self {
            config,
            events,
            promos,
            methods,
            ledger,
            subscriptions,
            analytics,
            checkout,
            escrow,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A receiver for every state change committed from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    // Promo codes

    pub async fn register_promo_code(&self, promo: PromoCode) -> Result<PromoCode> {
        self.promos.register(promo).await
    }

    pub async fn deactivate_promo_code(&self, code: &str) -> Result<PromoCode> {
        self.promos.deactivate(code).await
    }

    /// Validates and, on success, spends one use of the code.
    pub async fn validate_promo_code(&self, code: &str, plan_id: &str, amount: Money) -> Result<Option<PromoCode>> {
        self.promos.validate(code, plan_id, amount).await
    }

    pub async fn list_promo_codes(&self) -> Result<Vec<PromoCode>> {
        self.promos.list().await
    }

    // Checkout and subscriptions

    pub async fn create_checkout_session(&self, request: NewCheckout) -> Result<CheckoutSession> {
        self.checkout.create_session(request).await
    }

    pub async fn get_checkout_session(&self, id: Uuid) -> Result<CheckoutSession> {
        self.checkout.session(id).await
    }

    pub async fn apply_promo_code(&self, session_id: Uuid, code: &str) -> Result<CheckoutSession> {
        self.checkout.apply_promo_code(session_id, code).await
    }

    pub async fn remove_promo_code(&self, session_id: Uuid) -> Result<CheckoutSession> {
        self.checkout.remove_promo_code(session_id).await
    }

    pub async fn confirm_payment(
        &self,
        session_id: Uuid,
        method_id: Uuid,
        billing: BillingDetails,
    ) -> Result<CheckoutReceipt> {
        self.checkout.confirm_payment(session_id, method_id, billing).await
    }

    pub async fn expire_abandoned_sessions(&self) -> Result<Vec<Uuid>> {
        self.checkout.expire_abandoned_sessions().await
    }

    pub async fn start_trial(&self, user: &str, trial: NewTrial) -> Result<Subscription> {
        self.subscriptions.start_trial(user, trial).await
    }

    pub async fn cancel_subscription(&self, id: Uuid, immediately: bool) -> Result<Subscription> {
        self.subscriptions.cancel(id, immediately).await
    }

    pub async fn resume_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.subscriptions.resume(id).await
    }

    pub async fn get_subscription(&self, user: &str) -> Result<Option<Subscription>> {
        self.subscriptions.for_user(user).await
    }

    pub async fn get_invoices(&self, user: &str) -> Result<Vec<Invoice>> {
        self.subscriptions.invoices(user).await
    }

    pub async fn roll_over_subscriptions(&self) -> Result<RolloverReport> {
        self.subscriptions.roll_over().await
    }

    // Escrow

    pub async fn capture_order_payment(
        &self,
        buyer: &str,
        order_id: &str,
        amount: Money,
        method_id: Uuid,
    ) -> Result<Transaction> {
        self.ledger
            .capture_order_payment(buyer, order_id, amount, method_id)
            .await
    }

    pub async fn create_escrow_account(&self, request: NewEscrow) -> Result<EscrowAccount> {
        self.escrow.create(request).await
    }

    pub async fn get_escrow_account(&self, id: Uuid) -> Result<EscrowAccount> {
        self.escrow.get(id).await
    }

    pub async fn get_escrow_accounts(&self, user: &str) -> Result<Vec<EscrowAccount>> {
        self.escrow.for_user(user).await
    }

    pub async fn release_escrow_funds(&self, id: Uuid) -> Result<Transaction> {
        self.escrow.release(id).await
    }

    pub async fn fund_milestone(&self, id: Uuid, milestone_id: Uuid) -> Result<EscrowAccount> {
        self.escrow.fund_milestone(id, milestone_id).await
    }

    pub async fn approve_milestone(&self, id: Uuid, milestone_id: Uuid, party: Party) -> Result<EscrowAccount> {
        self.escrow.approve_milestone(id, milestone_id, party).await
    }

    pub async fn dispute_milestone(&self, id: Uuid, milestone_id: Uuid) -> Result<EscrowAccount> {
        self.escrow.dispute_milestone(id, milestone_id).await
    }

    pub async fn release_milestone(&self, id: Uuid, milestone_id: Uuid) -> Result<Transaction> {
        self.escrow.release_milestone(id, milestone_id).await
    }

    pub async fn dispute_escrow(&self, id: Uuid) -> Result<EscrowAccount> {
        self.escrow.dispute(id).await
    }

    pub async fn refund_escrow(&self, id: Uuid) -> Result<Transaction> {
        self.escrow.refund(id).await
    }

    // Ledger

    pub async fn record_transaction(&self, tx: Transaction) -> Result<Transaction> {
        self.ledger.record_transaction(tx).await
    }

    pub async fn settle_transaction(&self, id: Uuid, outcome: Settlement) -> Result<Transaction> {
        self.ledger.settle_transaction(id, outcome).await
    }

    pub async fn get_balance(&self, user: &str) -> Result<Money> {
        self.ledger.balance(user).await
    }

    pub async fn get_balance_summary(&self, user: &str) -> Result<BalanceSummary> {
        self.ledger.summary(user).await
    }

    pub async fn get_transaction_history(&self, user: &str) -> Result<Vec<Transaction>> {
        self.ledger.history(user).await
    }

    pub async fn withdraw_funds(&self, user: &str, amount: Money, method_id: Uuid) -> Result<Transaction> {
        self.ledger.withdraw(user, amount, method_id).await
    }

    /// Balances of every account that appears in the ledger, sorted by user.
    pub async fn balance_report(&self) -> Result<Vec<BalanceRow>> {
        let mut rows = Vec::new();
        for user in self.ledger.accounts().await? {
            let summary = self.ledger.summary(&user).await?;
            rows.push(BalanceRow { user, summary });
        }
        Ok(rows)
    }

    // Payment methods

    pub async fn add_payment_method(
        &self,
        owner: &str,
        details: NewPaymentMethod,
        make_default: bool,
    ) -> Result<PaymentMethod> {
        self.methods.add(owner, details, make_default).await
    }

    pub async fn set_default_payment_method(&self, owner: &str, id: Uuid) -> Result<PaymentMethod> {
        self.methods.set_default(owner, id).await
    }

    pub async fn remove_payment_method(&self, owner: &str, id: Uuid) -> Result<PaymentMethod> {
        self.methods.remove(owner, id).await
    }

    pub async fn list_payment_methods(&self, owner: &str) -> Result<Vec<PaymentMethod>> {
        self.methods.list(owner).await
    }

    // Analytics

    pub async fn track_plan_view(&self, plan_id: &str) {
        self.analytics.track_view(plan_id).await;
    }

    pub async fn track_plan_click(&self, plan_id: &str) {
        self.analytics.track_click(plan_id).await;
    }

    pub async fn track_plan_conversion(&self, plan_id: &str, amount: Option<Money>) {
        self.analytics.track_conversion(plan_id, amount).await;
    }

    pub async fn plan_analytics(&self, plan_id: &str) -> PricingAnalytics {
        self.analytics.snapshot(plan_id).await
    }

    pub async fn all_plan_analytics(&self) -> Vec<PricingAnalytics> {
        self.analytics.all().await
    }
}
