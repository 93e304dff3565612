use super::UserId;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodType {
    Card,
    Bank,
    Wallet,
}

/// Tokenized instrument details as submitted by the owner.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct NewPaymentMethod {
    pub r#type: PaymentMethodType,
    pub last4: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub expiry_month: Option<u8>,
    #[serde(default)]
    pub expiry_year: Option<u16>,
}

impl NewPaymentMethod {
    pub fn card(last4: &str, brand: &str, expiry_month: u8, expiry_year: u16) -> Self {
        Self {
            r#type: PaymentMethodType::Card,
            last4: last4.to_string(),
            brand: Some(brand.to_string()),
            expiry_month: Some(expiry_month),
            expiry_year: Some(expiry_year),
        }
    }

    pub fn bank(last4: &str) -> Self {
        Self {
            r#type: PaymentMethodType::Bank,
            last4: last4.to_string(),
            brand: None,
            expiry_month: None,
            expiry_year: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub r#type: PaymentMethodType,
    pub last4: String,
    pub brand: Option<String>,
    pub expiry_month: Option<u8>,
    pub expiry_year: Option<u16>,
    pub is_default: bool,
}

impl PaymentMethod {
    pub fn register(details: NewPaymentMethod) -> Result<Self> {
        if details.last4.len() != 4 || !details.last4.chars().all(|c| c.is_ascii_digit()) {
            return Err(LedgerError::ValidationError(format!(
                "last4 must be four digits, got '{}'",
                details.last4
            )));
        }
        if let Some(month) = details.expiry_month
            && !(1..=12).contains(&month)
        {
            return Err(LedgerError::ValidationError(format!(
                "expiry month must be 1-12, got {month}"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            r#type: details.r#type,
            last4: details.last4,
            brand: details.brand,
            expiry_month: details.expiry_month,
            expiry_year: details.expiry_year,
            is_default: false,
        })
    }

    /// Cards stay valid through the last day of their expiry month.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.expiry_year, self.expiry_month) {
            (Some(year), Some(month)) => {
                let current = (now.year(), now.month());
                (i32::from(year), u32::from(month)) < current
            }
            _ => false,
        }
    }
}

/// Every payment method one owner has registered.
///
/// Holds the single-default invariant: at most one method is default, and the
/// first method added always becomes the default.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentMethodBook {
    pub owner: UserId,
    pub methods: Vec<PaymentMethod>,
}

impl PaymentMethodBook {
    pub fn new(owner: impl Into<UserId>) -> Self {
        Self {
            owner: owner.into(),
            methods: Vec::new(),
        }
    }

    pub fn add(&mut self, mut method: PaymentMethod, make_default: bool) -> PaymentMethod {
        let becomes_default = make_default || self.default_method().is_none();
        if becomes_default {
            for existing in &mut self.methods {
                existing.is_default = false;
            }
        }
        method.is_default = becomes_default;
        self.methods.push(method.clone());
        method
    }

    pub fn get(&self, id: Uuid) -> Result<&PaymentMethod> {
        self.methods
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| LedgerError::not_found("payment method", id))
    }

    pub fn set_default(&mut self, id: Uuid) -> Result<()> {
        self.get(id)?;
        for method in &mut self.methods {
            method.is_default = method.id == id;
        }
        Ok(())
    }

    /// Removing the default leaves the owner without one.
    pub fn remove(&mut self, id: Uuid) -> Result<PaymentMethod> {
        let index = self
            .methods
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| LedgerError::not_found("payment method", id))?;
        Ok(self.methods.remove(index))
    }

    pub fn default_method(&self) -> Option<&PaymentMethod> {
        self.methods.iter().find(|m| m.is_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn card(last4: &str) -> PaymentMethod {
        PaymentMethod::register(NewPaymentMethod::card(last4, "visa", 12, 2030)).unwrap()
    }

    #[test]
    fn test_first_method_becomes_default() {
        let mut book = PaymentMethodBook::new("alice");
        let first = book.add(card("4242"), false);
        let second = book.add(card("1881"), false);
        assert!(first.is_default);
        assert!(!second.is_default);
        assert_eq!(book.default_method().unwrap().id, first.id);
    }

    #[test]
    fn test_single_default_after_swap() {
        let mut book = PaymentMethodBook::new("alice");
        let first = book.add(card("4242"), false);
        let second = book.add(card("1881"), true);
        assert!(second.is_default);
        assert_eq!(book.methods.iter().filter(|m| m.is_default).count(), 1);

        book.set_default(first.id).unwrap();
        assert_eq!(book.default_method().unwrap().id, first.id);
        assert_eq!(book.methods.iter().filter(|m| m.is_default).count(), 1);
    }

    #[test]
    fn test_removing_default_leaves_none() {
        let mut book = PaymentMethodBook::new("alice");
        let first = book.add(card("4242"), false);
        book.add(card("1881"), false);
        book.remove(first.id).unwrap();
        assert!(book.default_method().is_none());
        assert_eq!(book.methods.len(), 1);
    }

    #[test]
    fn test_unknown_method_not_found() {
        let mut book = PaymentMethodBook::new("alice");
        assert!(matches!(
            book.set_default(Uuid::new_v4()),
            Err(LedgerError::NotFound { .. })
        ));
        assert!(book.remove(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_register_validation() {
        assert!(PaymentMethod::register(NewPaymentMethod::card("42", "visa", 1, 2030)).is_err());
        assert!(PaymentMethod::register(NewPaymentMethod::card("4242", "visa", 13, 2030)).is_err());
        assert!(PaymentMethod::register(NewPaymentMethod::bank("6789")).is_ok());
    }

    #[test]
    fn test_card_expiry() {
        let method = PaymentMethod::register(NewPaymentMethod::card("4242", "visa", 3, 2026)).unwrap();
        let march = Utc.with_ymd_and_hms(2026, 3, 31, 23, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert!(!method.is_expired(march));
        assert!(method.is_expired(april));
    }
}
