use crate::domain::money::Money;
use crate::domain::promo::{DiscountType, PromoCode};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One catalog line as it appears in the file.
#[derive(Debug, Deserialize)]
struct PromoRow {
    code: String,
    discount_type: DiscountType,
    discount_value: Decimal,
    valid_until: DateTime<Utc>,
    max_uses: u32,
    /// Plan ids separated by `|`; empty means every plan.
    #[serde(default)]
    applicable_plans: Option<String>,
    #[serde(default)]
    min_amount: Option<i64>,
    #[serde(default)]
    is_active: Option<bool>,
}

impl TryFrom<PromoRow> for PromoCode {
    type Error = LedgerError;

    fn try_from(row: PromoRow) -> Result<Self> {
        let mut promo = PromoCode::new(
            &row.code,
            row.discount_type,
            row.discount_value,
            row.valid_until,
            row.max_uses,
        )?;
        if let Some(plans) = row.applicable_plans {
            promo = promo.with_plans(
                plans
                    .split('|')
                    .map(str::trim)
                    .filter(|plan| !plan.is_empty()),
            );
        }
        if let Some(min) = row.min_amount {
            promo = promo.with_min_amount(Money::new(min));
        }
        promo.is_active = row.is_active.unwrap_or(true);
        Ok(promo)
    }
}

/// Reads a promo code catalog from a CSV source.
///
/// Columns: `code,discount_type,discount_value,valid_until,max_uses,
/// applicable_plans,min_amount,is_active`. The last three may be left empty.
pub struct PromoCatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PromoCatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses and validates each line.
    pub fn promo_codes(self) -> impl Iterator<Item = Result<PromoCode>> {
        self.reader
            .into_deserialize::<PromoRow>()
            .map(|result| result.map_err(LedgerError::from).and_then(PromoCode::try_from))
    }
}
