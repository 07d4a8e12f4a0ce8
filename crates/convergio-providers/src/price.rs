use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price per 1,000 tokens, input and output priced independently.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

/// Per-(provider, model) price table. Unknown models fall back to a
/// conservative configured default rather than failing the turn — see
/// open question #3 in `SPEC_FULL.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTable {
    prices: HashMap<(String, String), ModelPrice>,
    #[serde(skip)]
    fallback: ModelPrice,
}

impl Default for PriceTable {
    fn default() -> Self {
        let fallback = ModelPrice {
            input_per_1k: Decimal::new(10, 3),  // $0.010 / 1k conservative default
            output_per_1k: Decimal::new(30, 3), // $0.030 / 1k conservative default
        };
        let mut prices = HashMap::new();
        prices.insert(
            ("openai".to_string(), "gpt-4o-mini".to_string()),
            ModelPrice {
                input_per_1k: Decimal::new(15, 4),
                output_per_1k: Decimal::new(6, 3),
            },
        );
        prices.insert(
            ("anthropic".to_string(), "claude-3-5-sonnet-latest".to_string()),
            ModelPrice {
                input_per_1k: Decimal::new(3, 3),
                output_per_1k: Decimal::new(15, 3),
            },
        );
        prices.insert(
            ("mock".to_string(), "mock-echo".to_string()),
            ModelPrice {
                input_per_1k: Decimal::new(1, 3),
                output_per_1k: Decimal::new(2, 3),
            },
        );
        Self { prices, fallback }
    }
}

impl PriceTable {
    pub fn set(&mut self, provider: impl Into<String>, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert((provider.into(), model.into()), price);
    }

    /// Look up the price for `(provider, model)`. Returns the configured
    /// fallback price and `false` when the pair is unknown.
    pub fn lookup(&self, provider: &str, model: &str) -> (ModelPrice, bool) {
        match self.prices.get(&(provider.to_string(), model.to_string())) {
            Some(price) => (*price, true),
            None => (self.fallback, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_is_found() {
        let table = PriceTable::default();
        let (_, known) = table.lookup("openai", "gpt-4o-mini");
        assert!(known);
    }

    #[test]
    fn unknown_model_falls_back() {
        let table = PriceTable::default();
        let (price, known) = table.lookup("unknown-provider", "unknown-model");
        assert!(!known);
        assert_eq!(price.input_per_1k, table.fallback.input_per_1k);
    }
}
