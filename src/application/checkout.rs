use super::analytics::AnalyticsRecorder;
use super::events::EventBus;
use super::locks::{InFlight, KeyedLocks};
use super::payment_methods::PaymentMethodRegistry;
use super::promo::PromoEngine;
use super::subscription::SubscriptionManager;
use crate::config::EngineConfig;
use crate::domain::checkout::{BillingDetails, CheckoutSession, NewCheckout, SessionStatus};
use crate::domain::events::LedgerEvent;
use crate::domain::money::Amount;
use crate::domain::payment_method::PaymentMethod;
use crate::domain::ports::{ChargeReceipt, ChargeRequest, SharedClock, SharedGateway, SharedStore, WriteSet};
use crate::domain::promo::calculate_discount;
use crate::domain::subscription::{Invoice, Subscription};
use crate::domain::transaction::{Transaction, TransactionType};
use crate::error::{LedgerError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a successful confirmation committed.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub session: CheckoutSession,
    pub subscription: Subscription,
    pub invoice: Invoice,
    /// Absent when the final amount was zero and nothing was charged.
    pub payment: Option<Transaction>,
    /// A live subscription the purchase replaced.
    pub replaced: Option<Subscription>,
}

/// Drives a purchase from plan selection to an active subscription.
pub struct CheckoutManager {
    store: SharedStore,
    gateway: SharedGateway,
    clock: SharedClock,
    events: EventBus,
    promos: Arc<PromoEngine>,
    methods: Arc<PaymentMethodRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    analytics: Arc<AnalyticsRecorder>,
    config: EngineConfig,
    locks: KeyedLocks<Uuid>,
    charging: InFlight<Uuid>,
}

impl CheckoutManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore,
        gateway: SharedGateway,
        clock: SharedClock,
        events: EventBus,
        promos: Arc<PromoEngine>,
        methods: Arc<PaymentMethodRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        analytics: Arc<AnalyticsRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            events,
            promos,
            methods,
            subscriptions,
            analytics,
            config,
            locks: KeyedLocks::new(),
            charging: InFlight::new(),
        }
    }

    pub async fn session(&self, id: Uuid) -> Result<CheckoutSession> {
        self.store
            .session(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("checkout session", id))
    }

    /// Prices `session` with `code`. Returns whether the code applied; a code
    /// that does not apply leaves the session as it was.
    async fn price(&self, session: &mut CheckoutSession, code: &str) -> Result<bool> {
        let Some(promo) = self.promos.validate(code, &session.plan_id, session.amount).await? else {
            return Ok(false);
        };
        let discount = calculate_discount(session.amount, &promo);
        session.apply_discount(&promo.code, discount)?;
        Ok(true)
    }

    pub async fn create_session(&self, request: NewCheckout) -> Result<CheckoutSession> {
        let mut session = CheckoutSession::open(&request, &self.config.currency, self.clock.now())?;
        if let Some(code) = &request.promo_code {
            self.price(&mut session, code).await?;
        }
        self.store.commit(WriteSet::new().put(session.clone())).await?;
        info!(
            session_id = %session.id,
            plan = %session.plan_id,
            amount = %session.amount,
            final_amount = %session.final_amount,
            "checkout session created"
        );
        Ok(session)
    }

    pub async fn apply_promo_code(&self, session_id: Uuid, code: &str) -> Result<CheckoutSession> {
        let _guard = self.locks.lock(&session_id).await;
        let mut session = self.session(session_id).await?;
        if session.status != SessionStatus::Pending {
            return Err(LedgerError::session_state(
                session_id,
                format!("cannot apply a promo code while {:?}", session.status),
            ));
        }
        if !self.price(&mut session, code).await? {
            debug!(%session_id, code, "promo code did not apply, session unchanged");
            return Ok(session);
        }
        self.store.commit(WriteSet::new().put(session.clone())).await?;
        info!(%session_id, code = ?session.promo_code, final_amount = %session.final_amount, "promo code applied");
        Ok(session)
    }

    pub async fn remove_promo_code(&self, session_id: Uuid) -> Result<CheckoutSession> {
        let _guard = self.locks.lock(&session_id).await;
        let mut session = self.session(session_id).await?;
        session.clear_discount()?;
        self.store.commit(WriteSet::new().put(session.clone())).await?;
        info!(%session_id, "promo code removed");
        Ok(session)
    }

    /// Charges the session and activates the subscription it buys.
    ///
    /// The session is marked `processing` and committed before the gateway is
    /// called; the call itself holds no lock. On success the session,
    /// subscription, payment and invoice are committed together. On decline
    /// only the session changes, to `failed`. If that commit fails after the
    /// charge went through, the session stays `processing` and the charge is
    /// logged for reconciliation.
    pub async fn confirm_payment(
        &self,
        session_id: Uuid,
        method_id: Uuid,
        billing: BillingDetails,
    ) -> Result<CheckoutReceipt> {
        billing.validate()?;
        let user = billing.user_id.as_str();
        let _charging = self
            .charging
            .claim(&session_id)
            .ok_or_else(|| LedgerError::session_state(session_id, "payment is already being confirmed"))?;
        let _busy = self.subscriptions.claim_slot(user)?;

        let (session, method) = {
            let _guard = self.locks.lock(&session_id).await;
            let mut session = self.session(session_id).await?;
            let method = if session.final_amount.is_positive() {
                Some(self.methods.get(user, method_id).await?)
            } else {
                None
            };
            session.begin_processing()?;
            self.store.commit(WriteSet::new().put(session.clone())).await?;
            (session, method)
        };
        debug!(%session_id, user, "checkout processing");

        let charged = match self.charge(&session, user, method).await {
            Ok(charged) => charged,
            Err(e) => {
                self.fail_session(session_id, &e).await?;
                return Err(e);
            }
        };

        let Some((payment, receipt)) = charged else {
            return self.record_completion(session_id, user, None).await;
        };
        let payment_id = payment.id;
        let amount = payment.amount;
        self.record_completion(session_id, user, Some(payment))
            .await
            .inspect_err(|e| {
                error!(
                    %session_id,
                    user,
                    processor_id = %receipt.processor_id,
                    %payment_id,
                    %amount,
                    error = %e,
                    "charge taken but checkout could not be recorded"
                );
            })
    }

    /// Commits a paid (or free) session together with the subscription it buys.
    async fn record_completion(
        &self,
        session_id: Uuid,
        user: &str,
        payment: Option<Transaction>,
    ) -> Result<CheckoutReceipt> {
        let _guard = self.locks.lock(&session_id).await;
        let _slot = self.subscriptions.lock_slot(user).await;
        let mut session = self.session(session_id).await?;
        session.complete()?;
        let now = self.clock.now();
        let subscription = Subscription::activate(user, &session, now)?;
        let mut invoice = Invoice::pending(&subscription, Invoice::checkout_items(&session), now);
        invoice.mark_paid(now)?;

        let mut writes = WriteSet::new()
            .put(session.clone())
            .put(subscription.clone())
            .put(invoice.clone());
        if let Some(payment) = &payment {
            writes.push(payment.clone());
        }
        let mut replaced = None;
        if let Some(mut current) = self.subscriptions.for_user(user).await?
            && current.status.is_live()
        {
            current.cancel(true)?;
            writes.push(current.clone());
            replaced = Some(current);
        }
        self.store.commit(writes).await?;

        info!(
            %session_id,
            user,
            subscription_id = %subscription.id,
            amount = %session.final_amount,
            replaced = ?replaced.as_ref().map(|s| s.id),
            "checkout completed"
        );
        self.events.publish(LedgerEvent::CheckoutCompleted {
            session_id,
            subscription_id: subscription.id,
            amount: session.final_amount,
        });
        if let Some(old) = &replaced {
            self.subscriptions.announce(old);
        }
        self.subscriptions.announce(&subscription);
        self.subscriptions.announce_invoice(&invoice);
        self.analytics
            .track_conversion(&session.plan_id, Some(session.final_amount))
            .await;

        Ok(CheckoutReceipt {
            session,
            subscription,
            invoice,
            payment,
            replaced,
        })
    }

    /// Runs the gateway charge. A zero final amount charges nothing.
    async fn charge(
        &self,
        session: &CheckoutSession,
        user: &str,
        method: Option<PaymentMethod>,
    ) -> Result<Option<(Transaction, ChargeReceipt)>> {
        let Some(method) = method else {
            return Ok(None);
        };
        let amount = Amount::try_from(session.final_amount)?;
        let receipt = self
            .gateway
            .charge(ChargeRequest {
                reference: session.id.to_string(),
                customer: user.to_string(),
                method,
                amount,
                currency: session.currency.clone(),
                kind: TransactionType::Payment,
                requested_at: self.clock.now(),
            })
            .await?;
        debug!(session_id = %session.id, processor_id = %receipt.processor_id, "checkout charged");
        let now = self.clock.now();
        let payment = Transaction::new(
            TransactionType::Payment,
            amount,
            &session.currency,
            user,
            Some(self.config.platform_account.clone()),
            now,
        )
        .completed(now);
        Ok(Some((payment, receipt)))
    }

    async fn fail_session(&self, session_id: Uuid, cause: &LedgerError) -> Result<()> {
        let _guard = self.locks.lock(&session_id).await;
        let mut session = self.session(session_id).await?;
        session.fail()?;
        self.store.commit(WriteSet::new().put(session)).await?;
        warn!(%session_id, error = %cause, "checkout failed");
        self.events.publish(LedgerEvent::CheckoutFailed {
            session_id,
            reason: cause.to_string(),
        });
        Ok(())
    }

    /// Fails every `pending` session older than the checkout TTL. Sessions in
    /// `processing` are left alone.
    pub async fn expire_abandoned_sessions(&self) -> Result<Vec<Uuid>> {
        let now = self.clock.now();
        let ttl = self.config.checkout_ttl;
        let stale: Vec<Uuid> = self
            .store
            .sessions()
            .await?
            .into_iter()
            .filter(|s| s.is_abandoned(now, ttl))
            .map(|s| s.id)
            .collect();

        let mut expired = Vec::new();
        for id in stale {
            let Some(_charging) = self.charging.claim(&id) else {
                continue;
            };
            let _guard = self.locks.lock(&id).await;
            let mut session = self.session(id).await?;
            if !session.is_abandoned(now, ttl) {
                continue;
            }
            session.fail()?;
            self.store.commit(WriteSet::new().put(session)).await?;
            self.events.publish(LedgerEvent::CheckoutFailed {
                session_id: id,
                reason: "checkout expired".to_string(),
            });
            expired.push(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "abandoned checkout sessions expired");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::Harness;
    use crate::domain::checkout::BillingInterval;
    use crate::domain::money::Money;
    use crate::domain::payment_method::NewPaymentMethod;
    use crate::domain::ports::LedgerStore;
    use crate::domain::promo::{DiscountType, PromoCode};
    use crate::domain::subscription::SubscriptionStatus;
    use crate::infrastructure::gateway::DECLINE_LAST4;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn professional() -> NewCheckout {
        NewCheckout::new("professional", "Professional", Money::new(9900), BillingInterval::Month)
    }

    async fn setup() -> (Harness, CheckoutManager, Uuid) {
        let harness = Harness::new();
        let promo = PromoCode::new(
            "WELCOME20",
            DiscountType::Percentage,
            dec!(20),
            Harness::start() + Duration::days(30),
            100,
        )
        .unwrap();
        harness.promos.register(promo).await.unwrap();
        let card = harness
            .methods
            .add("alice", NewPaymentMethod::card("4242", "visa", 12, 2030), true)
            .await
            .unwrap();
        let manager = harness.checkout();
        (harness, manager, card.id)
    }

    #[tokio::test]
    async fn test_promo_lifecycle_on_pending_session() {
        let (_harness, manager, _) = setup().await;
        let session = manager.create_session(professional()).await.unwrap();
        assert_eq!(session.final_amount, Money::new(9900));

        let unchanged = manager.apply_promo_code(session.id, "BOGUS").await.unwrap();
        assert_eq!(unchanged, session);

        let discounted = manager.apply_promo_code(session.id, "welcome20").await.unwrap();
        assert_eq!(discounted.discount_amount, Some(Money::new(1980)));
        assert_eq!(discounted.final_amount, Money::new(7920));

        let restored = manager.remove_promo_code(session.id).await.unwrap();
        assert_eq!(restored.final_amount, Money::new(9900));
        assert_eq!(restored.promo_code, None);
    }

    #[tokio::test]
    async fn test_confirm_commits_everything() {
        let (harness, manager, card) = setup().await;
        let session = manager
            .create_session(professional().with_promo("WELCOME20"))
            .await
            .unwrap();

        let receipt = manager
            .confirm_payment(session.id, card, BillingDetails::for_user("alice"))
            .await
            .unwrap();
        assert_eq!(receipt.session.status, SessionStatus::Completed);
        assert_eq!(receipt.subscription.status, SubscriptionStatus::Active);
        assert_eq!(receipt.subscription.amount, Money::new(7920));
        assert_eq!(receipt.invoice.amount, Money::new(7920));
        assert_eq!(receipt.invoice.items.len(), 2);
        assert_eq!(receipt.payment.unwrap().to_user.as_deref(), Some("platform"));

        let conversion = harness.analytics.snapshot("professional").await;
        assert_eq!(conversion.conversions, 1);
        assert_eq!(conversion.revenue, Money::new(7920));

        assert!(matches!(
            manager.confirm_payment(session.id, card, BillingDetails::for_user("alice")).await,
            Err(LedgerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_decline_fails_session_only() {
        let (harness, manager, _) = setup().await;
        let bad = harness
            .methods
            .add("alice", NewPaymentMethod::card(DECLINE_LAST4, "visa", 12, 2030), false)
            .await
            .unwrap();
        let session = manager.create_session(professional()).await.unwrap();

        let result = manager
            .confirm_payment(session.id, bad.id, BillingDetails::for_user("alice"))
            .await;
        assert!(matches!(result, Err(LedgerError::PaymentDeclined(_))));
        assert_eq!(manager.session(session.id).await.unwrap().status, SessionStatus::Failed);
        assert!(harness.store.subscriptions().await.unwrap().is_empty());
        assert!(harness.store.invoices().await.unwrap().is_empty());
        assert!(harness.store.transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fully_discounted_checkout_charges_nothing() {
        let (harness, manager, card) = setup().await;
        let free = PromoCode::new("FREE", DiscountType::Percentage, dec!(100), Harness::start() + Duration::days(1), 1)
            .unwrap();
        harness.promos.register(free).await.unwrap();
        let session = manager.create_session(professional().with_promo("FREE")).await.unwrap();
        assert_eq!(session.final_amount, Money::ZERO);

        let receipt = manager
            .confirm_payment(session.id, card, BillingDetails::for_user("alice"))
            .await
            .unwrap();
        assert!(receipt.payment.is_none());
        assert_eq!(receipt.invoice.amount, Money::ZERO);
        assert!(receipt.invoice.paid_at.is_some());
        assert!(harness.store.transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_purchase_replaces_live_subscription() {
        let (_harness, manager, card) = setup().await;
        let first = manager.create_session(professional()).await.unwrap();
        let first = manager
            .confirm_payment(first.id, card, BillingDetails::for_user("alice"))
            .await
            .unwrap();

        let upgrade = NewCheckout::new("enterprise", "Enterprise", Money::new(29900), BillingInterval::Year);
        let second = manager.create_session(upgrade).await.unwrap();
        let second = manager
            .confirm_payment(second.id, card, BillingDetails::for_user("alice"))
            .await
            .unwrap();

        let replaced = second.replaced.unwrap();
        assert_eq!(replaced.id, first.subscription.id);
        assert_eq!(replaced.status, SubscriptionStatus::Cancelled);
        assert_eq!(second.subscription.plan_id, "enterprise");
    }

    #[tokio::test]
    async fn test_abandoned_sessions_expire() {
        let (harness, manager, _) = setup().await;
        let old = manager.create_session(professional()).await.unwrap();
        harness.clock.advance(Duration::minutes(31)).unwrap();
        let fresh = manager.create_session(professional()).await.unwrap();

        let expired = manager.expire_abandoned_sessions().await.unwrap();
        assert_eq!(expired, vec![old.id]);
        assert_eq!(manager.session(old.id).await.unwrap().status, SessionStatus::Failed);
        assert_eq!(manager.session(fresh.id).await.unwrap().status, SessionStatus::Pending);
        assert!(manager.apply_promo_code(old.id, "WELCOME20").await.is_err());
    }
}
