//! Promotional discount codes.
//!
//! A code is looked up case-insensitively, checked against its activity flag,
//! expiry, usage budget, plan list and minimum charge, and priced as either a
//! percentage of the charge or a fixed amount off. Codes are never deleted.

use super::money::Money;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// Why a code did not apply. Callers see all of these as "no discount".
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PromoRejection {
    #[error("no such code")]
    Unknown,
    #[error("code is inactive")]
    Inactive,
    #[error("code has expired")]
    Expired,
    #[error("code has no uses left")]
    Exhausted,
    #[error("code does not apply to this plan")]
    NotApplicable,
    #[error("charge is below the code's minimum amount")]
    BelowMinimum,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PromoCode {
    /// Normalized (trimmed, upper-case) code text; unique in the catalog.
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent for `Percentage`, minor units for `Fixed`.
    pub discount_value: Decimal,
    pub valid_until: DateTime<Utc>,
    pub max_uses: u32,
    pub used_count: u32,
    /// Plans the code applies to. Empty means every plan.
    pub applicable_plans: BTreeSet<String>,
    pub min_amount: Option<Money>,
    pub is_active: bool,
}

impl PromoCode {
    pub fn new(
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        valid_until: DateTime<Utc>,
        max_uses: u32,
    ) -> Result<Self> {
        let code = Self::normalize(code);
        if code.is_empty() {
            return Err(LedgerError::ValidationError(
                "Promo code must not be empty".to_string(),
            ));
        }
        if discount_value <= Decimal::ZERO {
            return Err(LedgerError::ValidationError(format!(
                "Promo code {code} must have a positive discount"
            )));
        }
        if discount_type == DiscountType::Percentage && discount_value > dec!(100) {
            return Err(LedgerError::ValidationError(format!(
                "Promo code {code} cannot discount more than 100%"
            )));
        }
        if max_uses == 0 {
            return Err(LedgerError::ValidationError(format!(
                "Promo code {code} must allow at least one use"
            )));
        }
        Ok(Self {
            code,
            discount_type,
            discount_value,
            valid_until,
            max_uses,
            used_count: 0,
            applicable_plans: BTreeSet::new(),
            min_amount: None,
            is_active: true,
        })
    }

    pub fn with_plans<I, S>(mut self, plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applicable_plans = plans.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_amount(mut self, min_amount: Money) -> Self {
        self.min_amount = Some(min_amount);
        self
    }

    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn is_exhausted(&self) -> bool {
        self.used_count >= self.max_uses
    }

    /// Checks every constraint without consuming a use.
    pub fn check(
        &self,
        plan_id: &str,
        amount: Money,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), PromoRejection> {
        if !self.is_active {
            return Err(PromoRejection::Inactive);
        }
        if now >= self.valid_until {
            return Err(PromoRejection::Expired);
        }
        if self.is_exhausted() {
            return Err(PromoRejection::Exhausted);
        }
        if !self.applicable_plans.is_empty() && !self.applicable_plans.contains(plan_id) {
            return Err(PromoRejection::NotApplicable);
        }
        if let Some(min_amount) = self.min_amount
            && amount < min_amount
        {
            return Err(PromoRejection::BelowMinimum);
        }
        Ok(())
    }

    /// Spends one use of the code.
    pub fn redeem(&mut self) {
        self.used_count += 1;
    }
}

/// Prices `promo` against a charge of `amount`.
///
/// The result always lies in `0..=amount`, so a discounted charge can never go
/// negative.
pub fn calculate_discount(amount: Money, promo: &PromoCode) -> Money {
    if !amount.is_positive() {
        return Money::ZERO;
    }
    let raw = match promo.discount_type {
        DiscountType::Percentage => (Decimal::from(amount.cents()) * promo.discount_value
            / dec!(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        DiscountType::Fixed => promo
            .discount_value
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
    };
    let cents = raw.to_i64().unwrap_or(i64::MAX);
    Money::new(cents.clamp(0, amount.cents()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn welcome20() -> PromoCode {
        PromoCode::new(
            "welcome20",
            DiscountType::Percentage,
            dec!(20),
            Utc::now() + Duration::days(30),
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_code_is_normalized() {
        assert_eq!(welcome20().code, "WELCOME20");
        assert_eq!(PromoCode::normalize("  Save50 "), "SAVE50");
    }

    #[test]
    fn test_percentage_discount_rounds_half_away_from_zero() {
        let promo = welcome20();
        assert_eq!(calculate_discount(Money::new(9900), &promo), Money::new(1980));
        // 20% of 1 cent is 0.2, 20% of 3 cents is 0.6
        assert_eq!(calculate_discount(Money::new(1), &promo), Money::ZERO);
        assert_eq!(calculate_discount(Money::new(3), &promo), Money::new(1));

        let half = PromoCode::new(
            "HALF",
            DiscountType::Percentage,
            dec!(50),
            Utc::now() + Duration::days(1),
            1,
        )
        .unwrap();
        assert_eq!(calculate_discount(Money::new(5), &half), Money::new(3));
    }

    #[test]
    fn test_fixed_discount_never_exceeds_charge() {
        let promo = PromoCode::new(
            "TENOFF",
            DiscountType::Fixed,
            dec!(1000),
            Utc::now() + Duration::days(1),
            5,
        )
        .unwrap();
        assert_eq!(calculate_discount(Money::new(4000), &promo), Money::new(1000));
        assert_eq!(calculate_discount(Money::new(600), &promo), Money::new(600));
        assert_eq!(calculate_discount(Money::ZERO, &promo), Money::ZERO);
    }

    #[test]
    fn test_check_plan_applicability() {
        let promo = PromoCode::new(
            "SAVE50",
            DiscountType::Percentage,
            dec!(50),
            Utc::now() + Duration::days(1),
            10,
        )
        .unwrap()
        .with_plans(["professional", "enterprise"]);

        assert_eq!(
            promo.check("basic", Money::new(50), Utc::now()),
            Err(PromoRejection::NotApplicable)
        );
        assert_eq!(promo.check("enterprise", Money::new(50), Utc::now()), Ok(()));
    }

    #[test]
    fn test_check_expiry_exhaustion_and_minimum() {
        let now = Utc::now();
        let mut promo = welcome20().with_min_amount(Money::new(1000));
        assert_eq!(
            promo.check("basic", Money::new(999), now),
            Err(PromoRejection::BelowMinimum)
        );
        assert_eq!(
            promo.check("basic", Money::new(1000), promo.valid_until),
            Err(PromoRejection::Expired)
        );

        promo.used_count = promo.max_uses;
        assert_eq!(
            promo.check("basic", Money::new(1000), now),
            Err(PromoRejection::Exhausted)
        );

        promo.used_count = 0;
        promo.is_active = false;
        assert_eq!(
            promo.check("basic", Money::new(1000), now),
            Err(PromoRejection::Inactive)
        );
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let until = Utc::now() + Duration::days(1);
        assert!(PromoCode::new(" ", DiscountType::Fixed, dec!(1), until, 1).is_err());
        assert!(PromoCode::new("X", DiscountType::Percentage, dec!(101), until, 1).is_err());
        assert!(PromoCode::new("X", DiscountType::Fixed, dec!(0), until, 1).is_err());
        assert!(PromoCode::new("X", DiscountType::Fixed, dec!(5), until, 0).is_err());
    }
}
