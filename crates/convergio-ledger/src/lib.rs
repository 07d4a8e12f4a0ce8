mod db;
mod error;
mod types;

pub use db::CostLedger;
pub use error::{LedgerError, LedgerResult};
pub use types::{
    AlertLevel, BudgetAlert, BudgetLimits, BudgetScope, CostLedgerEntry, LedgerScope, Prediction,
    UsageSummary, UsageWindow, ALERT_THRESHOLDS,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn ledger() -> CostLedger {
        CostLedger::open_in_memory().await.unwrap()
    }

    fn entry(cost: rust_decimal::Decimal, provider: &str, conv_id: &str) -> CostLedgerEntry {
        CostLedgerEntry {
            ts: Utc::now(),
            provider: provider.to_string(),
            model: "mock-echo".to_string(),
            agent_id: "agent-a".to_string(),
            conv_id: conv_id.to_string(),
            tokens_in: 100,
            tokens_out: 50,
            cost_usd: cost,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn record_and_aggregate_usage() {
        let ledger = ledger().await;
        ledger.record(&entry(dec!(1.50), "openai", "conv-1")).await.unwrap();
        ledger.record(&entry(dec!(2.25), "openai", "conv-1")).await.unwrap();

        let usage = ledger
            .usage(&LedgerScope::Global, UsageWindow::AllTime)
            .await
            .unwrap();
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.cost_usd, dec!(3.75));
        assert_eq!(usage.tokens_in, 200);
    }

    #[tokio::test]
    async fn usage_scoped_by_provider_excludes_other_providers() {
        let ledger = ledger().await;
        ledger.record(&entry(dec!(1.00), "openai", "conv-1")).await.unwrap();
        ledger.record(&entry(dec!(5.00), "anthropic", "conv-1")).await.unwrap();

        let usage = ledger
            .usage(&LedgerScope::Provider("openai".to_string()), UsageWindow::AllTime)
            .await
            .unwrap();
        assert_eq!(usage.cost_usd, dec!(1.00));
    }

    #[tokio::test]
    async fn set_limits_rejects_daily_over_monthly() {
        let ledger = ledger().await;
        let bad = BudgetLimits {
            daily_usd: dec!(100),
            monthly_usd: dec!(10),
            ..Default::default()
        };
        let err = ledger.set_limits(&bad).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidLimits(_)));
    }

    #[tokio::test]
    async fn set_limits_rejects_negative() {
        let ledger = ledger().await;
        let bad = BudgetLimits {
            daily_usd: dec!(-1),
            monthly_usd: dec!(10),
            ..Default::default()
        };
        let err = ledger.set_limits(&bad).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidLimits(_)));
    }

    #[tokio::test]
    async fn crossing_threshold_fires_alert_exactly_once() {
        let ledger = ledger().await;
        ledger
            .set_limits(&BudgetLimits {
                daily_usd: dec!(10),
                monthly_usd: dec!(100),
                per_conversation_usd: dec!(0),
                ..Default::default()
            })
            .await
            .unwrap();

        let alerts_first = ledger.record(&entry(dec!(6), "openai", "conv-1")).await.unwrap();
        assert!(alerts_first.iter().any(|a| a.threshold_pct == 50));

        // A second call that keeps utilization >= 50% must not refire the
        // same threshold for the same window.
        let alerts_second = ledger.record(&entry(dec!(0.10), "openai", "conv-1")).await.unwrap();
        assert!(!alerts_second.iter().any(|a| a.threshold_pct == 50));
    }

    #[tokio::test]
    async fn utilization_reports_zero_when_no_limit_configured() {
        let ledger = ledger().await;
        ledger.record(&entry(dec!(50), "openai", "conv-1")).await.unwrap();
        let pct = ledger.utilization(BudgetScope::DailyGlobal).await.unwrap();
        assert_eq!(pct, 0.0);
    }

    #[tokio::test]
    async fn predict_returns_nonnegative_confidence_bounded() {
        let ledger = ledger().await;
        ledger.record(&entry(dec!(1), "openai", "conv-1")).await.unwrap();
        let prediction = ledger.predict(UsageWindow::Day(Utc::now().date_naive())).await.unwrap();
        assert!(prediction.confidence >= 0.1 && prediction.confidence <= 0.9);
        assert!(prediction.expected_cost >= rust_decimal::Decimal::ZERO);
    }
}
