//! Component H: maps `(model, input_tokens, output_tokens)` to a USD
//! cost (spec.md §4.8).
//!
//! The teacher fetches live per-token pricing from a LiteLLM gateway
//! (see `litellm::LiteLlmModelInfo::{input,output}_cost_per_token`).
//! The market engine has no LiteLLM gateway in front of it, so pricing
//! is a static table instead, keyed the same way: dollars per 1,000
//! tokens, looked up by exact model string or longest-prefix match.

use std::collections::BTreeMap;

/// Per-1k-token pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// A static pricing table, keyed by exact model string or prefix.
#[derive(Debug, Clone)]
pub struct CostCalculator {
    rates: BTreeMap<&'static str, ModelRate>,
}

impl CostCalculator {
    /// The built-in table covering the model families this engine talks
    /// to by default. Prices are illustrative public list prices as of
    /// this writing and are expected to be replaced by an operator.
    pub fn with_default_rates() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(
            "gpt-4o",
            ModelRate {
                input_per_1k: 0.0025,
                output_per_1k: 0.01,
            },
        );
        rates.insert(
            "gpt-4o-mini",
            ModelRate {
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
            },
        );
        rates.insert(
            "gpt-4",
            ModelRate {
                input_per_1k: 0.03,
                output_per_1k: 0.06,
            },
        );
        rates.insert(
            "claude-3-5-sonnet",
            ModelRate {
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
        );
        rates.insert(
            "claude-3-opus",
            ModelRate {
                input_per_1k: 0.015,
                output_per_1k: 0.075,
            },
        );
        rates.insert(
            "claude-3-haiku",
            ModelRate {
                input_per_1k: 0.00025,
                output_per_1k: 0.00125,
            },
        );
        rates.insert(
            "gemini-1.5-pro",
            ModelRate {
                input_per_1k: 0.00125,
                output_per_1k: 0.005,
            },
        );
        rates.insert(
            "gemini-1.5-flash",
            ModelRate {
                input_per_1k: 0.000075,
                output_per_1k: 0.0003,
            },
        );
        rates.insert(
            "gemini-2.0-flash",
            ModelRate {
                input_per_1k: 0.0001,
                output_per_1k: 0.0004,
            },
        );
        Self { rates }
    }

    /// An empty table, useful for tests that want deterministic control
    /// over what's priced.
    pub fn empty() -> Self {
        Self {
            rates: BTreeMap::new(),
        }
    }

    /// Insert or overwrite a rate, exact-match or prefix.
    pub fn insert(&mut self, key: &'static str, rate: ModelRate) {
        self.rates.insert(key, rate);
    }

    /// Look up pricing for `model`: exact match first, then the longest
    /// key that is a prefix of `model` (spec.md §4.8, §8 "cost prefix
    /// rule").
    fn rate_for(&self, model: &str) -> Option<ModelRate> {
        if let Some(rate) = self.rates.get(model) {
            return Some(*rate);
        }
        self.rates
            .iter()
            .filter(|(key, _)| model.starts_with(**key))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, rate)| *rate)
    }

    /// Compute the USD cost of one call, rounded to 6 decimal places, or
    /// `None` if the model has no pricing entry (spec.md §4.8).
    pub fn cost_usd(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        let rate = self.rate_for(model)?;
        let cost = (input_tokens as f64 / 1000.0) * rate.input_per_1k
            + (output_tokens as f64 / 1000.0) * rate.output_per_1k;
        Some((cost * 1_000_000.0).round() / 1_000_000.0)
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::with_default_rates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_wins_over_prefix() {
        let mut calc = CostCalculator::empty();
        calc.insert(
            "gpt-4",
            ModelRate {
                input_per_1k: 1.0,
                output_per_1k: 1.0,
            },
        );
        calc.insert(
            "gpt-4o",
            ModelRate {
                input_per_1k: 2.0,
                output_per_1k: 2.0,
            },
        );
        // "gpt-4o" should match the exact "gpt-4o" entry, not the "gpt-4" prefix.
        let cost = calc.cost_usd("gpt-4o", 1000, 0).unwrap();
        assert_eq!(cost, 2.0);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut calc = CostCalculator::empty();
        calc.insert(
            "claude-3",
            ModelRate {
                input_per_1k: 1.0,
                output_per_1k: 1.0,
            },
        );
        calc.insert(
            "claude-3-opus",
            ModelRate {
                input_per_1k: 5.0,
                output_per_1k: 5.0,
            },
        );
        let cost = calc.cost_usd("claude-3-opus-20240229", 1000, 0).unwrap();
        assert_eq!(cost, 5.0);
    }

    #[test]
    fn test_no_match_returns_none() {
        let calc = CostCalculator::empty();
        assert_eq!(calc.cost_usd("unknown-model", 1000, 1000), None);
    }

    #[test]
    fn test_rounding() {
        let mut calc = CostCalculator::empty();
        calc.insert(
            "m",
            ModelRate {
                input_per_1k: 0.0000001,
                output_per_1k: 0.0,
            },
        );
        let cost = calc.cost_usd("m", 1, 0).unwrap();
        assert_eq!(cost, 0.0);
    }
}
