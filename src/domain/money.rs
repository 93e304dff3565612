use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A signed quantity of money in minor units (cents).
///
/// Balances and invoice lines are `Money`; they may be zero, and discount lines
/// are negative. Integer minor units keep every ledger computation exact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub i64);

/// A strictly positive amount of money.
///
/// Every ledger entry and every escrow hold carries an `Amount`, so a zero or
/// negative movement cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    pub fn new(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Sums without wrapping; `None` if the total leaves the `i64` range.
    pub fn checked_sum(values: impl IntoIterator<Item = Self>) -> Option<Self> {
        values
            .into_iter()
            .try_fold(Self::ZERO, |total, value| total.checked_add(value))
    }
}

impl Amount {
    /// Largest single movement accepted: ten trillion major units.
    pub const MAX_CENTS: i64 = 1_000_000_000_000_000;

    pub fn new(cents: i64) -> Result<Self, LedgerError> {
        if cents <= 0 {
            return Err(LedgerError::ValidationError(format!(
                "Amount must be positive, got {cents}"
            )));
        }
        if cents > Self::MAX_CENTS {
            return Err(LedgerError::ValidationError(format!(
                "Amount {cents} exceeds the maximum of {}",
                Self::MAX_CENTS
            )));
        }
        Ok(Self(cents))
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn value(&self) -> Money {
        Money(self.0)
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<Money> for Amount {
    type Error = LedgerError;

    fn try_from(value: Money) -> Result<Self, Self::Error> {
        Self::new(value.0)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(1000);
        let b = Money::new(250);
        assert_eq!(a + b, Money::new(1250));
        assert_eq!(a - b, Money::new(750));
        assert_eq!(-b, Money::new(-250));
        assert_eq!(vec![a, b, -b].into_iter().sum::<Money>(), a);
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(-5),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_is_capped() {
        assert!(Amount::new(Amount::MAX_CENTS).is_ok());
        assert!(matches!(
            Amount::new(Amount::MAX_CENTS + 1),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(serde_json::from_str::<Amount>(&i64::MAX.to_string()).is_err());
    }

    #[test]
    fn test_checked_sum_reports_overflow() {
        let big = Money::new(i64::MAX / 2 + 1);
        assert_eq!(Money::checked_sum([big, big]), None);
        assert_eq!(
            Money::checked_sum([Money::new(5), Money::new(-2)]),
            Some(Money::new(3))
        );
        assert_eq!(Money::new(i64::MIN).checked_sub(Money::new(1)), None);
    }

    #[test]
    fn test_amount_rejects_non_positive_json() {
        let ok: Amount = serde_json::from_str("7920").unwrap();
        assert_eq!(ok.value(), Money::new(7920));
        assert!(serde_json::from_str::<Amount>("0").is_err());
    }
}
