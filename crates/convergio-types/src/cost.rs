use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A US-dollar amount stored with 6 fractional digits, matching the
/// `cost_usd = price(model) * tokens` invariant (no float drift > 1e-6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Cost(Decimal);

impl Cost {
    pub const ZERO: Cost = Cost(Decimal::ZERO);

    pub fn from_usd(amount: Decimal) -> Self {
        Cost(amount.round_dp(6))
    }

    pub fn from_tokens(tokens: u64, price_per_1k: Decimal) -> Self {
        let amount = price_per_1k * Decimal::from(tokens) / Decimal::from(1000u32);
        Cost(amount.round_dp(6))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.try_into().unwrap_or(f64::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn saturating_add(self, other: Cost) -> Cost {
        Cost((self.0 + other.0).round_dp(6))
    }

    pub fn saturating_sub(self, other: Cost) -> Cost {
        let result = self.0 - other.0;
        Cost(result.max(Decimal::ZERO).round_dp(6))
    }
}

impl std::ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        self.saturating_add(rhs)
    }
}

impl std::iter::Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Self {
        iter.fold(Cost::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.0)
    }
}

impl FromStr for Cost {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(Cost::from_usd)
    }
}

impl From<f64> for Cost {
    fn from(value: f64) -> Self {
        Cost::from_usd(Decimal::try_from(value).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn from_tokens_rounds_to_six_fractional_digits() {
        let cost = Cost::from_tokens(333, dec!(0.0015));
        assert_eq!(cost.as_decimal(), dec!(0.0005));
    }

    #[test]
    fn saturating_sub_never_goes_negative() {
        let a = Cost::from_usd(dec!(1.0));
        let b = Cost::from_usd(dec!(2.0));
        assert_eq!(a.saturating_sub(b), Cost::ZERO);
    }

    #[test]
    fn sum_accumulates_without_drift() {
        let costs = vec![
            Cost::from_usd(dec!(0.000001)),
            Cost::from_usd(dec!(0.000002)),
            Cost::from_usd(dec!(0.000003)),
        ];
        let total: Cost = costs.into_iter().sum();
        assert_eq!(total.as_decimal(), dec!(0.000006));
    }
}
