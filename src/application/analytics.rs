use crate::domain::analytics::PricingAnalytics;
use crate::domain::money::Money;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process funnel counters per plan. Never persisted and never read by
/// money-moving code.
#[derive(Default)]
pub struct AnalyticsRecorder {
    plans: RwLock<HashMap<String, PricingAnalytics>>,
}

impl AnalyticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(&self, plan_id: &str, apply: impl FnOnce(&mut PricingAnalytics)) {
        let mut plans = self.plans.write().await;
        let entry = plans
            .entry(plan_id.to_string())
            .or_insert_with(|| PricingAnalytics::new(plan_id));
        apply(entry);
    }

    pub async fn track_view(&self, plan_id: &str) {
        self.update(plan_id, PricingAnalytics::record_view).await;
    }

    pub async fn track_click(&self, plan_id: &str) {
        self.update(plan_id, PricingAnalytics::record_click).await;
    }

    pub async fn track_conversion(&self, plan_id: &str, amount: Option<Money>) {
        self.update(plan_id, |a| a.record_conversion(amount)).await;
    }

    pub async fn snapshot(&self, plan_id: &str) -> PricingAnalytics {
        self.plans
            .read()
            .await
            .get(plan_id)
            .cloned()
            .unwrap_or_else(|| PricingAnalytics::new(plan_id))
    }

    /// Every plan with at least one recorded event, by plan id.
    pub async fn all(&self) -> Vec<PricingAnalytics> {
        let mut all: Vec<PricingAnalytics> = self.plans.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_funnel_counters() {
        let recorder = AnalyticsRecorder::new();
        for _ in 0..4 {
            recorder.track_view("professional").await;
        }
        recorder.track_click("professional").await;
        recorder.track_click("professional").await;
        recorder.track_click("professional").await;
        recorder.track_conversion("professional", Some(Money::new(7920))).await;

        let stats = recorder.snapshot("professional").await;
        assert_eq!(stats.views, 4);
        assert_eq!(stats.conversion_rate, dec!(0.3333));
        assert_eq!(stats.average_order_value, dec!(7920));
    }

    #[tokio::test]
    async fn test_unknown_plan_is_empty() {
        let recorder = AnalyticsRecorder::new();
        recorder.track_view("basic").await;
        assert_eq!(recorder.snapshot("enterprise").await.views, 0);
        assert_eq!(recorder.all().await.len(), 1);
    }
}
