use super::events::EventBus;
use super::locks::{Claim, InFlight, KeyedLocks};
use super::payment_methods::PaymentMethodRegistry;
use crate::config::EngineConfig;
use crate::domain::UserId;
use crate::domain::events::LedgerEvent;
use crate::domain::money::Amount;
use crate::domain::ports::{ChargeRequest, SharedClock, SharedGateway, SharedStore, WriteSet};
use crate::domain::subscription::{Invoice, NewTrial, Subscription, SubscriptionStatus};
use crate::domain::transaction::{Transaction, TransactionType};
use crate::error::{LedgerError, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};
use uuid::Uuid;

/// What one pass of the period-rollover process did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RolloverReport {
    pub renewed: usize,
    pub past_due: usize,
    pub expired: usize,
    pub cancelled: usize,
    /// Due subscriptions left for the next pass because their user had a
    /// payment in flight.
    pub skipped: usize,
}

enum Renewal {
    Renewed,
    PastDue,
    Expired,
    Cancelled,
    Skipped,
}

/// Owns subscription lifecycles after activation: cancellation, trials and
/// the billing-period rollover.
///
/// Each user has one subscription slot. Writes to a slot serialize on its
/// lock, and a slot with a gateway call in flight (a checkout being charged
/// or a renewal) is marked busy until that call is settled.
pub struct SubscriptionManager {
    store: SharedStore,
    gateway: SharedGateway,
    clock: SharedClock,
    events: EventBus,
    methods: Arc<PaymentMethodRegistry>,
    config: EngineConfig,
    slots: KeyedLocks<UserId>,
    busy: InFlight<UserId>,
}

impl SubscriptionManager {
    pub fn new(
        store: SharedStore,
        gateway: SharedGateway,
        clock: SharedClock,
        events: EventBus,
        methods: Arc<PaymentMethodRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            events,
            methods,
            config,
            slots: KeyedLocks::new(),
            busy: InFlight::new(),
        }
    }

    pub(crate) async fn lock_slot(&self, user: &str) -> OwnedMutexGuard<()> {
        self.slots.lock(&user.to_string()).await
    }

    /// Marks the user's slot busy for the duration of a gateway call.
    pub(crate) fn claim_slot(&self, user: &str) -> Result<Claim<UserId>> {
        self.busy.claim(&user.to_string()).ok_or_else(|| {
            LedgerError::invalid_state(
                "subscription slot",
                user,
                "a payment for this user is already in progress",
            )
        })
    }

    pub(crate) fn announce(&self, subscription: &Subscription) {
        self.events.publish(LedgerEvent::SubscriptionChanged {
            subscription_id: subscription.id,
            user_id: subscription.user_id.clone(),
            status: subscription.status,
            cancel_at_period_end: subscription.cancel_at_period_end,
        });
    }

    pub(crate) fn announce_invoice(&self, invoice: &Invoice) {
        self.events.publish(LedgerEvent::InvoiceIssued {
            invoice_id: invoice.id,
            subscription_id: invoice.subscription_id,
            amount: invoice.amount,
            paid: invoice.paid_at.is_some(),
        });
    }

    pub async fn get(&self, id: Uuid) -> Result<Subscription> {
        self.store
            .subscription(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("subscription", id))
    }

    pub async fn for_user(&self, user: &str) -> Result<Option<Subscription>> {
        self.store.subscription_for_user(user).await
    }

    /// Invoices of every subscription the user ever held, by due date.
    pub async fn invoices(&self, user: &str) -> Result<Vec<Invoice>> {
        let mut invoices = Vec::new();
        for subscription in self.store.subscriptions().await? {
            if subscription.user_id == user {
                invoices.extend(self.store.invoices_for_subscription(subscription.id).await?);
            }
        }
        invoices.sort_by_key(|i| i.due_date);
        Ok(invoices)
    }

    /// Starts a free trial. The user must not already hold a live subscription.
    pub async fn start_trial(&self, user: &str, trial: NewTrial) -> Result<Subscription> {
        if user.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Trial needs a user id".to_string(),
            ));
        }
        let _slot = self.lock_slot(user).await;
        if let Some(current) = self.for_user(user).await?
            && current.status.is_live()
        {
            return Err(LedgerError::invalid_state(
                "subscription",
                current.id,
                format!("{user} already holds a {:?} subscription", current.status),
            ));
        }
        let subscription = Subscription::trial(user, &trial, &self.config.currency, self.clock.now())?;
        self.store
            .commit(WriteSet::new().put(subscription.clone()))
            .await?;
        info!(user, subscription_id = %subscription.id, plan = %subscription.plan_id, trial_days = trial.trial_days, "trial started");
        self.announce(&subscription);
        Ok(subscription)
    }

    pub async fn cancel(&self, id: Uuid, immediately: bool) -> Result<Subscription> {
        let user = self.get(id).await?.user_id;
        let _busy = self.claim_slot(&user)?;
        let _slot = self.lock_slot(&user).await;
        let mut subscription = self.get(id).await?;
        subscription.cancel(immediately)?;
        self.store
            .commit(WriteSet::new().put(subscription.clone()))
            .await?;
        info!(subscription_id = %id, user = %user, immediately, "subscription cancelled");
        self.announce(&subscription);
        Ok(subscription)
    }

    /// Withdraws a scheduled cancellation before the period rolls over.
    pub async fn resume(&self, id: Uuid) -> Result<Subscription> {
        let user = self.get(id).await?.user_id;
        let _busy = self.claim_slot(&user)?;
        let _slot = self.lock_slot(&user).await;
        let mut subscription = self.get(id).await?;
        subscription.resume()?;
        self.store
            .commit(WriteSet::new().put(subscription.clone()))
            .await?;
        info!(subscription_id = %id, user = %user, "subscription resumed");
        self.announce(&subscription);
        Ok(subscription)
    }

    /// Moves every live subscription whose period has ended into its next
    /// state. Safe to run repeatedly; a subscription is handled once per
    /// elapsed period.
    pub async fn roll_over(&self) -> Result<RolloverReport> {
        let now = self.clock.now();
        let due: Vec<Subscription> = self
            .store
            .subscriptions()
            .await?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect();

        let mut report = RolloverReport::default();
        for subscription in due {
            match self.roll_over_one(subscription).await? {
                Renewal::Renewed => report.renewed += 1,
                Renewal::PastDue => report.past_due += 1,
                Renewal::Expired => report.expired += 1,
                Renewal::Cancelled => report.cancelled += 1,
                Renewal::Skipped => report.skipped += 1,
            }
        }
        info!(?report, "subscription rollover finished");
        Ok(report)
    }

    async fn roll_over_one(&self, subscription: Subscription) -> Result<Renewal> {
        let user = subscription.user_id.clone();
        let Ok(_busy) = self.claim_slot(&user) else {
            return Ok(Renewal::Skipped);
        };

        let subscription = {
            let _slot = self.lock_slot(&user).await;
            let mut current = self.get(subscription.id).await?;
            if !current.is_due(self.clock.now()) {
                return Ok(Renewal::Skipped);
            }
            if current.cancel_at_period_end {
                current.finish_cancellation()?;
                self.store.commit(WriteSet::new().put(current.clone())).await?;
                info!(subscription_id = %current.id, user = %user, "scheduled cancellation took effect");
                self.announce(&current);
                return Ok(Renewal::Cancelled);
            }
            current
        };

        let charged = self.charge_renewal(&subscription).await;

        let _slot = self.lock_slot(&user).await;
        let mut current = self.get(subscription.id).await?;
        let now = self.clock.now();
        let mut invoice = Invoice::pending(
            &current,
            Invoice::renewal_items(&current),
            current.current_period_end,
        );
        let mut writes = WriteSet::new();
        let outcome = match charged {
            Ok(payment) => {
                current.renew()?;
                invoice.mark_paid(now)?;
                if let Some(payment) = payment {
                    writes.push(payment);
                }
                info!(subscription_id = %current.id, user = %user, period_end = %current.current_period_end, "subscription renewed");
                Renewal::Renewed
            }
            Err(e) => {
                invoice.mark_failed()?;
                let outcome = if current.status == SubscriptionStatus::PastDue {
                    current.expire()?;
                    Renewal::Expired
                } else {
                    current.mark_past_due()?;
                    Renewal::PastDue
                };
                warn!(subscription_id = %current.id, user = %user, error = %e, status = ?current.status, "renewal charge failed");
                outcome
            }
        };
        writes.push(current.clone());
        writes.push(invoice.clone());
        self.store.commit(writes).await?;
        self.announce(&current);
        self.announce_invoice(&invoice);
        Ok(outcome)
    }

    /// Charges the default method for one period. A free plan needs no charge
    /// and yields no ledger entry.
    async fn charge_renewal(&self, subscription: &Subscription) -> Result<Option<Transaction>> {
        if !subscription.amount.is_positive() {
            return Ok(None);
        }
        let amount = Amount::try_from(subscription.amount)?;
        let method = self
            .methods
            .default_method(&subscription.user_id)
            .await?
            .ok_or_else(|| {
                LedgerError::PaymentDeclined(format!(
                    "{} has no default payment method",
                    subscription.user_id
                ))
            })?;
        let receipt = self
            .gateway
            .charge(ChargeRequest {
                reference: subscription.id.to_string(),
                customer: subscription.user_id.clone(),
                method,
                amount,
                currency: subscription.currency.clone(),
                kind: TransactionType::Payment,
                requested_at: self.clock.now(),
            })
            .await?;
        info!(subscription_id = %subscription.id, processor_id = %receipt.processor_id, %amount, "renewal charged");
        let now = self.clock.now();
        Ok(Some(
            Transaction::new(
                TransactionType::Payment,
                amount,
                &subscription.currency,
                &subscription.user_id,
                Some(self.config.platform_account.clone()),
                now,
            )
            .completed(now),
        ))
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
    use crate::domain::subscription::InvoiceStatus;
    use crate::infrastructure::gateway::DECLINE_LAST4;
    use chrono::Duration;

    fn trial(days: u32) -> NewTrial {
        NewTrial {
            plan_id: "professional".to_string(),
            plan_name: "Professional".to_string(),
            amount: Money::new(9900),
            interval: BillingInterval::Month,
            trial_days: days,
        }
    }

    #[tokio::test]
    async fn test_trial_converts_on_rollover() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        harness
            .methods
            .add("alice", NewPaymentMethod::card("4242", "visa", 12, 2030), true)
            .await
            .unwrap();
        let sub = manager.start_trial("alice", trial(14)).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trial);

        harness.clock.advance(Duration::days(13)).unwrap();
        assert_eq!(manager.roll_over().await.unwrap(), RolloverReport::default());

        harness.clock.advance(Duration::days(1)).unwrap();
        let report = manager.roll_over().await.unwrap();
        assert_eq!(report.renewed, 1);

        let renewed = manager.get(sub.id).await.unwrap();
        assert_eq!(renewed.status, SubscriptionStatus::Active);
        assert_eq!(renewed.current_period_start, sub.current_period_end);
        let invoices = manager.invoices("alice").await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
        assert_eq!(invoices[0].amount, Money::new(9900));
        assert_eq!(harness.store.transactions_for_user("platform").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_renewal_goes_past_due_then_expired() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        harness
            .methods
            .add("bob", NewPaymentMethod::card(DECLINE_LAST4, "visa", 12, 2030), true)
            .await
            .unwrap();
        let sub = manager.start_trial("bob", trial(7)).await.unwrap();

        harness.clock.advance(Duration::days(7)).unwrap();
        assert_eq!(manager.roll_over().await.unwrap().past_due, 1);
        assert_eq!(manager.get(sub.id).await.unwrap().status, SubscriptionStatus::PastDue);

        assert_eq!(manager.roll_over().await.unwrap().expired, 1);
        assert_eq!(manager.get(sub.id).await.unwrap().status, SubscriptionStatus::Expired);

        let invoices = manager.invoices("bob").await.unwrap();
        assert_eq!(invoices.len(), 2);
        assert!(invoices.iter().all(|i| i.status == InvoiceStatus::Failed));
        assert!(harness.store.transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invoices_span_every_subscription_of_the_user() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        let first = manager.start_trial("gina", trial(2)).await.unwrap();
        manager.start_trial("hank", trial(2)).await.unwrap();
        harness.clock.advance(Duration::days(2)).unwrap();
        manager.roll_over().await.unwrap();
        manager.roll_over().await.unwrap();
        assert_eq!(manager.get(first.id).await.unwrap().status, SubscriptionStatus::Expired);

        manager.start_trial("gina", trial(1)).await.unwrap();
        harness.clock.advance(Duration::days(1)).unwrap();
        manager.roll_over().await.unwrap();

        let invoices = manager.invoices("gina").await.unwrap();
        assert_eq!(invoices.len(), 3);
        assert!(invoices.windows(2).all(|pair| pair[0].due_date <= pair[1].due_date));
        assert_eq!(invoices.iter().filter(|i| i.subscription_id == first.id).count(), 2);
        assert_eq!(manager.invoices("hank").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_soft_cancel_takes_effect_at_period_end() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        let sub = manager.start_trial("carol", trial(3)).await.unwrap();

        let cancelled = manager.cancel(sub.id, false).await.unwrap();
        assert!(cancelled.cancel_at_period_end);
        assert_eq!(cancelled.status, SubscriptionStatus::Trial);

        harness.clock.advance(Duration::days(3)).unwrap();
        assert_eq!(manager.roll_over().await.unwrap().cancelled, 1);
        assert_eq!(manager.get(sub.id).await.unwrap().status, SubscriptionStatus::Cancelled);
        assert!(manager.resume(sub.id).await.is_err());
    }

    #[tokio::test]
    async fn test_resume_clears_scheduled_cancellation() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        let sub = manager.start_trial("dave", trial(3)).await.unwrap();
        manager.cancel(sub.id, false).await.unwrap();
        let resumed = manager.resume(sub.id).await.unwrap();
        assert!(!resumed.cancel_at_period_end);
    }

    #[tokio::test]
    async fn test_one_live_trial_per_user() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        let first = manager.start_trial("erin", trial(3)).await.unwrap();
        assert!(matches!(
            manager.start_trial("erin", trial(3)).await,
            Err(LedgerError::InvalidState { .. })
        ));

        manager.cancel(first.id, true).await.unwrap();
        manager.start_trial("erin", trial(3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_refused_while_slot_busy() {
        let harness = Harness::new();
        let manager = harness.subscriptions();
        let sub = manager.start_trial("frank", trial(3)).await.unwrap();
        let _busy = manager.claim_slot("frank").unwrap();
        assert!(matches!(
            manager.cancel(sub.id, true).await,
            Err(LedgerError::InvalidState { .. })
        ));
    }
}
