use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const RATE_WINDOW_CALLS: usize = 10;
const ROLLING_MEAN_WINDOW: usize = 20;

/// Tracks per-user call timestamps (for rate-spike detection) and
/// per-provider recent costs (for cost-spike detection). Pure bookkeeping;
/// the breaker decides what to do with the signals.
#[derive(Debug, Default)]
pub(crate) struct AnomalyTracker {
    calls_by_user: HashMap<String, VecDeque<DateTime<Utc>>>,
    costs_by_provider: HashMap<String, VecDeque<Decimal>>,
}

impl AnomalyTracker {
    /// Record this call attempt and report whether it looks like a rate
    /// spike: more than 10 calls from the same user within the last minute.
    pub fn record_and_check_rate_spike(&mut self, user_id: &str, now: DateTime<Utc>) -> bool {
        let window = self.calls_by_user.entry(user_id.to_string()).or_default();
        window.push_back(now);
        let cutoff = now - chrono::Duration::minutes(1);
        while window.front().is_some_and(|ts| *ts < cutoff) {
            window.pop_front();
        }
        window.len() > RATE_WINDOW_CALLS
    }

    /// Record this call's estimated cost and report whether it exceeds 5x
    /// the rolling mean of the last 20 calls for the same provider. The
    /// first few calls for a provider never trigger (no baseline yet).
    pub fn record_and_check_cost_spike(&mut self, provider: &str, cost: Decimal) -> bool {
        let window = self.costs_by_provider.entry(provider.to_string()).or_default();
        let is_spike = if window.len() >= 3 {
            let mean: Decimal = window.iter().sum::<Decimal>() / Decimal::from(window.len());
            mean > Decimal::ZERO && cost > mean * Decimal::from(5)
        } else {
            false
        };
        window.push_back(cost);
        if window.len() > ROLLING_MEAN_WINDOW {
            window.pop_front();
        }
        is_spike
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rate_spike_after_eleven_calls_in_a_minute() {
        let mut tracker = AnomalyTracker::default();
        let now = Utc::now();
        let mut spiked = false;
        for _ in 0..11 {
            spiked = tracker.record_and_check_rate_spike("user-1", now);
        }
        assert!(spiked);
    }

    #[test]
    fn no_rate_spike_for_distinct_users() {
        let mut tracker = AnomalyTracker::default();
        let now = Utc::now();
        for i in 0..11 {
            assert!(!tracker.record_and_check_rate_spike(&format!("user-{i}"), now));
        }
    }

    #[test]
    fn cost_spike_detected_after_baseline_established() {
        let mut tracker = AnomalyTracker::default();
        for _ in 0..5 {
            tracker.record_and_check_cost_spike("openai", dec!(1.0));
        }
        assert!(tracker.record_and_check_cost_spike("openai", dec!(10.0)));
    }

    #[test]
    fn no_cost_spike_without_enough_history() {
        let mut tracker = AnomalyTracker::default();
        assert!(!tracker.record_and_check_cost_spike("openai", dec!(100.0)));
    }
}
