use super::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Funnel counters for one plan. Observational only.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PricingAnalytics {
    pub plan_id: String,
    pub views: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub revenue: Money,
    pub conversion_rate: Decimal,
    pub average_order_value: Decimal,
}

impl PricingAnalytics {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            views: 0,
            clicks: 0,
            conversions: 0,
            revenue: Money::ZERO,
            conversion_rate: Decimal::ZERO,
            average_order_value: Decimal::ZERO,
        }
    }

    pub fn record_view(&mut self) {
        self.views += 1;
        self.recompute();
    }

    pub fn record_click(&mut self) {
        self.clicks += 1;
        self.recompute();
    }

    pub fn record_conversion(&mut self, amount: Option<Money>) {
        self.conversions += 1;
        if let Some(amount) = amount {
            self.revenue += amount;
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        self.conversion_rate = ratio(Decimal::from(self.conversions), self.clicks);
        self.average_order_value = ratio(Decimal::from(self.revenue.cents()), self.conversions);
    }
}

fn ratio(numerator: Decimal, denominator: u64) -> Decimal {
    if denominator == 0 {
        Decimal::ZERO
    } else {
        (numerator / Decimal::from(denominator)).round_dp(4)
    }
}
