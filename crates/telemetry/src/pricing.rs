//! Built-in pricing table for completion models.
//!
//! Prices are in USD per 1 million tokens, with separate prompt (input)
//! and completion (output) rates. Overrides can be added at runtime from
//! the `[pricing]` config section.

use citeflow_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M prompt tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M completion tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Cost of the given usage.
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_m
            + usage.completion_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("gpt-3.5-turbo".into(), ModelPricing::new(0.5, 1.5));
        prices.insert("gpt-3.5-turbo-16k".into(), ModelPricing::new(3.0, 4.0));
        prices.insert("gpt-4".into(), ModelPricing::new(30.0, 60.0));
        prices.insert("gpt-4-32k".into(), ModelPricing::new(60.0, 120.0));
        prices.insert("gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));

        // ── Anthropic (OpenAI-compatible gateways) ─────────────────
        prices.insert("claude-3-haiku".into(), ModelPricing::new(0.25, 1.25));
        prices.insert("claude-3.5-haiku".into(), ModelPricing::new(0.8, 4.0));
        prices.insert("claude-3.5-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("claude-sonnet-4".into(), ModelPricing::new(3.0, 15.0));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model by exact name.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.read().get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name as reported by a backend.
    ///
    /// Tries an exact match, then strips a `vendor/` prefix, then takes the
    /// longest known name that prefixes the model (`gpt-4-0613` → `gpt-4`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.read();

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let bare = model.rsplit('/').next().unwrap_or(model).to_lowercase();
        if let Some(p) = prices.get(bare.as_str()) {
            return Some(*p);
        }

        prices
            .iter()
            .filter(|(key, _)| bare.starts_with(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
    }

    /// Cost of `usage` on `model`, or 0.0 for unknown models.
    pub fn compute_cost(&self, model: &str, usage: &Usage) -> f64 {
        match self.resolve(model) {
            Some(p) => p.cost(usage),
            None => {
                tracing::debug!(model, "No pricing for model, treating as free");
                0.0
            }
        }
    }

    /// All known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModelPricing>> {
        self.prices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert!(table.len() >= 10);
        assert!(table.get("gpt-4").is_some());
    }

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        // gpt-4: $30/M prompt, $60/M completion
        // (1000 * 30 + 500 * 60) / 1M = 0.06
        let cost = table.compute_cost("gpt-4", &Usage::new(1000, 500));
        assert!((cost - 0.06).abs() < 1e-10);
    }

    #[test]
    fn versioned_name_matches_longest_prefix() {
        let table = PricingTable::with_defaults();
        let p = table.resolve("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(p, ModelPricing::new(0.15, 0.6));

        let p = table.resolve("gpt-4-0613").unwrap();
        assert_eq!(p, ModelPricing::new(30.0, 60.0));
    }

    #[test]
    fn vendor_prefix_is_stripped() {
        let table = PricingTable::with_defaults();
        assert!(table.resolve("openai/gpt-3.5-turbo").is_some());
    }

    #[test]
    fn unknown_model_is_free() {
        let table = PricingTable::with_defaults();
        let cost = table.compute_cost("local/llama-70b", &Usage::new(1000, 500));
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn custom_pricing_overrides() {
        let table = PricingTable::empty();
        assert!(table.is_empty());

        table.set("custom/model", ModelPricing::new(1.0, 2.0));
        let cost = table.compute_cost("custom/model", &Usage::new(1_000_000, 1_000_000));
        assert!((cost - 3.0).abs() < 1e-10);
    }

    #[test]
    fn models_are_sorted() {
        let models = PricingTable::with_defaults().models();
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }
}
