use super::UserId;
use super::checkout::{BillingInterval, CheckoutSession};
use super::money::{Amount, Money};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    /// Occupies the user's subscription slot.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Trial | Self::Active | Self::PastDue)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub plan_id: String,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub amount: Money,
    pub currency: String,
    pub interval: BillingInterval,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

/// Parameters for a free trial.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct NewTrial {
    pub plan_id: String,
    pub plan_name: String,
    pub amount: Money,
    pub interval: BillingInterval,
    pub trial_days: u32,
}

impl Subscription {
    /// The subscription bought by a completed checkout, billed at the
    /// discounted price.
    pub fn activate(user_id: &str, session: &CheckoutSession, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            plan_id: session.plan_id.clone(),
            plan_name: session.plan_name.clone(),
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: session.interval.advance(now)?,
            cancel_at_period_end: false,
            amount: session.final_amount,
            currency: session.currency.clone(),
            interval: session.interval,
            trial_ends_at: None,
        })
    }

    pub fn trial(user_id: &str, trial: &NewTrial, currency: &str, now: DateTime<Utc>) -> Result<Self> {
        if trial.trial_days == 0 {
            return Err(LedgerError::ValidationError(
                "A trial must last at least one day".to_string(),
            ));
        }
        if trial.amount.is_negative() || trial.amount.cents() > Amount::MAX_CENTS {
            return Err(LedgerError::ValidationError(format!(
                "Plan price must lie in 0..={}, got {}",
                Amount::MAX_CENTS,
                trial.amount
            )));
        }
        let ends = Duration::try_days(i64::from(trial.trial_days))
            .and_then(|length| now.checked_add_signed(length))
            .ok_or_else(|| {
                LedgerError::ValidationError(format!(
                    "A {}-day trial starting {now} ends out of range",
                    trial.trial_days
                ))
            })?;
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            plan_id: trial.plan_id.clone(),
            plan_name: trial.plan_name.clone(),
            status: SubscriptionStatus::Trial,
            current_period_start: now,
            current_period_end: ends,
            cancel_at_period_end: false,
            amount: trial.amount,
            currency: currency.to_string(),
            interval: trial.interval,
            trial_ends_at: Some(ends),
        })
    }

    fn refuse(&self, reason: impl Into<String>) -> LedgerError {
        LedgerError::invalid_state("subscription", self.id, reason)
    }

    /// `immediately` ends the subscription now; otherwise it stays live until
    /// the period rolls over.
    pub fn cancel(&mut self, immediately: bool) -> Result<()> {
        if !self.status.is_live() {
            return Err(self.refuse(format!("cannot cancel a {:?} subscription", self.status)));
        }
        if immediately {
            self.status = SubscriptionStatus::Cancelled;
            self.cancel_at_period_end = false;
        } else {
            self.cancel_at_period_end = true;
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => {
                self.cancel_at_period_end = false;
                Ok(())
            }
            other => Err(self.refuse(format!("cannot resume a {other:?} subscription"))),
        }
    }

    /// The current period (or trial) has run out.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_live() && now >= self.current_period_end
    }

    /// Period-end transition for a soft-cancelled subscription.
    pub fn finish_cancellation(&mut self) -> Result<()> {
        if !self.status.is_live() || !self.cancel_at_period_end {
            return Err(self.refuse("no cancellation is scheduled"));
        }
        self.status = SubscriptionStatus::Cancelled;
        self.cancel_at_period_end = false;
        Ok(())
    }

    /// Starts the next period after a successful renewal charge.
    pub fn renew(&mut self) -> Result<()> {
        if !self.status.is_live() {
            return Err(self.refuse(format!("cannot renew a {:?} subscription", self.status)));
        }
        let start = self.current_period_end;
        self.current_period_end = self.interval.advance(start)?;
        self.current_period_start = start;
        self.status = SubscriptionStatus::Active;
        Ok(())
    }

    pub fn mark_past_due(&mut self) -> Result<()> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => {
                self.status = SubscriptionStatus::PastDue;
                Ok(())
            }
            other => Err(self.refuse(format!("cannot mark a {other:?} subscription past due"))),
        }
    }

    pub fn expire(&mut self) -> Result<()> {
        if self.status != SubscriptionStatus::PastDue {
            return Err(self.refuse(format!("cannot expire a {:?} subscription", self.status)));
        }
        self.status = SubscriptionStatus::Expired;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct InvoiceItem {
    pub description: String,
    pub amount: Money,
    pub quantity: u32,
}

impl InvoiceItem {
    pub fn new(description: impl Into<String>, amount: Money) -> Self {
        Self {
            description: description.into(),
            amount,
            quantity: 1,
        }
    }

    pub fn total(&self) -> Money {
        Money::new(self.amount.cents() * i64::from(self.quantity))
    }
}

/// One billing event. Immutable once paid.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Invoice {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount: Money,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    pub fn pending(subscription: &Subscription, items: Vec<InvoiceItem>, due_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            amount: items.iter().map(InvoiceItem::total).sum(),
            currency: subscription.currency.clone(),
            status: InvoiceStatus::Pending,
            due_date,
            paid_at: None,
            items,
        }
    }

    /// Line items for a checkout: the plan at list price, then the discount.
    pub fn checkout_items(session: &CheckoutSession) -> Vec<InvoiceItem> {
        let mut items = vec![InvoiceItem::new(
            format!("{} plan ({})", session.plan_name, session.interval),
            session.amount,
        )];
        if let (Some(code), Some(discount)) = (&session.promo_code, session.discount_amount)
            && discount.is_positive()
        {
            items.push(InvoiceItem::new(format!("Promo code {code}"), -discount));
        }
        items
    }

    pub fn renewal_items(subscription: &Subscription) -> Vec<InvoiceItem> {
        vec![InvoiceItem::new(
            format!("{} plan ({})", subscription.plan_name, subscription.interval),
            subscription.amount,
        )]
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != InvoiceStatus::Pending {
            return Err(LedgerError::invalid_state(
                "invoice",
                self.id,
                format!("cannot pay a {:?} invoice", self.status),
            ));
        }
        self.status = InvoiceStatus::Paid;
        self.paid_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        if self.status != InvoiceStatus::Pending {
            return Err(LedgerError::invalid_state(
                "invoice",
                self.id,
                format!("cannot fail a {:?} invoice", self.status),
            ));
        }
        self.status = InvoiceStatus::Failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkout::NewCheckout;

    fn checkout(amount: i64) -> CheckoutSession {
        let request = NewCheckout::new("professional", "Professional", Money::new(amount), BillingInterval::Month);
        CheckoutSession::open(&request, "USD", Utc::now()).unwrap()
    }

    #[test]
    fn test_activate_uses_discounted_price() {
        let mut session = checkout(9900);
        session.apply_discount("WELCOME20", Money::new(1980)).unwrap();
        let now = Utc::now();
        let sub = Subscription::activate("alice", &session, now).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.amount, Money::new(7920));
        assert_eq!(sub.current_period_start, now);
        assert!(sub.current_period_end > now);
    }

    #[test]
    fn test_trial_length_out_of_range_is_rejected() {
        let trial = NewTrial {
            plan_id: "starter".to_string(),
            plan_name: "Starter".to_string(),
            amount: Money::new(1500),
            interval: BillingInterval::Month,
            trial_days: 200_000_000,
        };
        assert!(matches!(
            Subscription::trial("alice", &trial, "USD", Utc::now()),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_soft_cancel_then_resume() {
        let mut sub = Subscription::activate("alice", &checkout(1000), Utc::now()).unwrap();
        sub.cancel(false).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.cancel_at_period_end);
        sub.resume().unwrap();
        assert!(!sub.cancel_at_period_end);
    }

    #[test]
    fn test_immediate_cancel_is_final() {
        let mut sub = Subscription::activate("alice", &checkout(1000), Utc::now()).unwrap();
        sub.cancel(true).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert!(sub.resume().is_err());
        assert!(sub.cancel(true).is_err());
    }

    #[test]
    fn test_renew_advances_from_previous_end() {
        let mut sub = Subscription::activate("alice", &checkout(1000), Utc::now()).unwrap();
        let old_end = sub.current_period_end;
        sub.renew().unwrap();
        assert_eq!(sub.current_period_start, old_end);
        assert_eq!(sub.current_period_end, BillingInterval::Month.advance(old_end).unwrap());
    }

    #[test]
    fn test_past_due_then_expired() {
        let mut sub = Subscription::activate("alice", &checkout(1000), Utc::now()).unwrap();
        assert!(sub.expire().is_err());
        sub.mark_past_due().unwrap();
        sub.expire().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert!(!sub.status.is_live());
    }

    #[test]
    fn test_invoice_amount_is_sum_of_items() {
        let mut session = checkout(9900);
        session.apply_discount("WELCOME20", Money::new(1980)).unwrap();
        let sub = Subscription::activate("alice", &session, Utc::now()).unwrap();
        let invoice = Invoice::pending(&sub, Invoice::checkout_items(&session), Utc::now());
        assert_eq!(invoice.items.len(), 2);
        assert_eq!(invoice.amount, Money::new(7920));
    }

    #[test]
    fn test_paid_invoice_is_immutable() {
        let sub = Subscription::activate("alice", &checkout(1000), Utc::now()).unwrap();
        let mut invoice = Invoice::pending(&sub, Invoice::renewal_items(&sub), Utc::now());
        invoice.mark_paid(Utc::now()).unwrap();
        assert!(invoice.mark_paid(Utc::now()).is_err());
        assert!(invoice.mark_failed().is_err());
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }
}
