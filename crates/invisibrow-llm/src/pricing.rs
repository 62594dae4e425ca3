//! Per-model cost estimation.
//!
//! Rates are USD per million tokens, with three tiers per model: non-cached
//! input, cached input (half the input rate), and output. Unknown models
//! fall back to the highest-tier rates so cost is never under-reported.

use invisibrow_types::ChatUsage;

/// USD-per-million-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input: f64,
    pub cached_input: f64,
    pub output: f64,
}

impl ModelRates {
    const fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            cached_input: input / 2.0,
            output,
        }
    }
}

/// Highest-tier rates, used for unknown models.
const FALLBACK_RATES: ModelRates = ModelRates::new(15.0, 75.0);

/// Look up the pricing rates for a model by substring match.
pub fn model_rates(model: &str) -> ModelRates {
    match model {
        m if m.contains("claude-opus") => ModelRates::new(15.0, 75.0),
        m if m.contains("claude-sonnet") => ModelRates::new(3.0, 15.0),
        m if m.contains("haiku") => ModelRates::new(0.8, 4.0),
        m if m.contains("gpt-4o-mini") => ModelRates::new(0.15, 0.6),
        m if m.contains("gpt-4o") => ModelRates::new(2.5, 10.0),
        m if m.contains("gpt-4.1-mini") => ModelRates::new(0.4, 1.6),
        m if m.contains("gpt-4.1") => ModelRates::new(2.0, 8.0),
        m if m.contains("o3-mini") || m.contains("o4-mini") => ModelRates::new(1.1, 4.4),
        _ => FALLBACK_RATES,
    }
}

/// Estimate the USD cost of one call.
///
/// The provider reports `prompt_tokens` inclusive of the cached portion;
/// only the non-cached remainder is billed at the full input rate.
pub fn estimate_cost(model: &str, usage: &ChatUsage) -> f64 {
    let rates = model_rates(model);
    let uncached = usage.prompt_tokens.saturating_sub(usage.cached_tokens);
    (uncached as f64 / 1_000_000.0) * rates.input
        + (usage.cached_tokens as f64 / 1_000_000.0) * rates.cached_input
        + (usage.completion_tokens as f64 / 1_000_000.0) * rates.output
}
