use super::UserId;
use super::money::{Amount, Money};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    /// The end of a billing period that starts at `from`.
    pub fn advance(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let months = match self {
            Self::Month => Months::new(1),
            Self::Year => Months::new(12),
        };
        from.checked_add_months(months).ok_or_else(|| {
            LedgerError::ValidationError(format!("billing period starting {from} overflows"))
        })
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Month => write!(f, "monthly"),
            Self::Year => write!(f, "yearly"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// What a caller supplies to start a purchase.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct NewCheckout {
    pub plan_id: String,
    pub plan_name: String,
    pub amount: Money,
    pub interval: BillingInterval,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

impl NewCheckout {
    pub fn new(
        plan_id: impl Into<String>,
        plan_name: impl Into<String>,
        amount: Money,
        interval: BillingInterval,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            plan_name: plan_name.into(),
            amount,
            interval,
            promo_code: None,
            customer_email: None,
        }
    }

    pub fn with_promo(mut self, code: impl Into<String>) -> Self {
        self.promo_code = Some(code.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }
}

/// Who is paying, as collected by the checkout form.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BillingDetails {
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl BillingDetails {
    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            email: None,
            country: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Billing details need a user id".to_string(),
            ));
        }
        if let Some(email) = &self.email
            && !email.contains('@')
        {
            return Err(LedgerError::ValidationError(format!(
                "Billing email {email} is not an address"
            )));
        }
        Ok(())
    }
}

/// A single purchase attempt, from plan selection to payment confirmation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CheckoutSession {
    pub id: Uuid,
    pub plan_id: String,
    pub plan_name: String,
    pub amount: Money,
    pub interval: BillingInterval,
    pub promo_code: Option<String>,
    pub discount_amount: Option<Money>,
    pub final_amount: Money,
    pub currency: String,
    pub customer_email: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Opens a pending session at full price. Discounts are applied separately.
    pub fn open(request: &NewCheckout, currency: &str, now: DateTime<Utc>) -> Result<Self> {
        if request.plan_id.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Checkout needs a plan id".to_string(),
            ));
        }
        if request.amount.is_negative() || request.amount.cents() > Amount::MAX_CENTS {
            return Err(LedgerError::ValidationError(format!(
                "Checkout amount must lie in 0..={}, got {}",
                Amount::MAX_CENTS,
                request.amount
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            plan_id: request.plan_id.clone(),
            plan_name: request.plan_name.clone(),
            amount: request.amount,
            interval: request.interval,
            promo_code: None,
            discount_amount: None,
            final_amount: request.amount,
            currency: currency.to_string(),
            customer_email: request.customer_email.clone(),
            status: SessionStatus::Pending,
            created_at: now,
        })
    }

    fn ensure_pending(&self, action: &str) -> Result<()> {
        if self.status == SessionStatus::Pending {
            Ok(())
        } else {
            Err(LedgerError::session_state(
                self.id,
                format!("cannot {action} while {:?}", self.status),
            ))
        }
    }

    pub fn apply_discount(&mut self, code: &str, discount: Money) -> Result<()> {
        self.ensure_pending("apply a promo code")?;
        if discount.is_negative() || discount > self.amount {
            return Err(LedgerError::ValidationError(format!(
                "discount {discount} is outside 0..={}",
                self.amount
            )));
        }
        self.promo_code = Some(code.to_string());
        self.discount_amount = Some(discount);
        self.final_amount = self.amount - discount;
        Ok(())
    }

    pub fn clear_discount(&mut self) -> Result<()> {
        self.ensure_pending("remove a promo code")?;
        self.promo_code = None;
        self.discount_amount = None;
        self.final_amount = self.amount;
        Ok(())
    }

    pub fn discount(&self) -> Money {
        self.discount_amount.unwrap_or(Money::ZERO)
    }

    /// Claims the session for payment. A session left `processing` by an
    /// interrupted attempt may be claimed again.
    pub fn begin_processing(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Pending | SessionStatus::Processing => {
                self.status = SessionStatus::Processing;
                Ok(())
            }
            other => Err(LedgerError::session_state(
                self.id,
                format!("cannot confirm payment while {other:?}"),
            )),
        }
    }

    pub fn complete(&mut self) -> Result<()> {
        if self.status != SessionStatus::Processing {
            return Err(LedgerError::session_state(
                self.id,
                format!("cannot complete while {:?}", self.status),
            ));
        }
        self.status = SessionStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Pending | SessionStatus::Processing => {
                self.status = SessionStatus::Failed;
                Ok(())
            }
            other => Err(LedgerError::session_state(
                self.id,
                format!("cannot fail a {other:?} session"),
            )),
        }
    }

    /// A pending session nobody confirmed within `ttl`.
    pub fn is_abandoned(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == SessionStatus::Pending && now - self.created_at >= ttl
    }
}
