//! Per-session token and cost accounting.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// USD per million tokens: (model prefix, input, cached input, output).
/// Longest matching prefix wins; unknown models fall back to the last row.
const PRICING: [(&str, f64, f64, f64); 4] = [
    ("gpt-5.2", 1.75, 0.175, 14.00),
    ("gpt-5", 1.25, 0.125, 10.00),
    ("gpt-4.1", 2.00, 0.50, 8.00),
    ("", 2.00, 0.50, 8.00),
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Snapshot of a session's accumulated usage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
    pub reasoning_tokens: u64,
    pub cost_usd: f64,
}

impl TokenSnapshot {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Aggregates token counts across every model call in a session.
#[derive(Default)]
pub struct TokenTracker {
    inner: Mutex<TokenSnapshot>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call's usage and fold its cost into the session total.
    pub fn add(&self, model: &str, usage: &TokenUsage) {
        let cost = cost_usd(model, usage);
        let mut inner = self.inner.lock().expect("token lock poisoned");
        inner.input_tokens += usage.input_tokens;
        inner.output_tokens += usage.output_tokens;
        inner.cached_input_tokens += usage.cached_input_tokens;
        inner.reasoning_tokens += usage.reasoning_tokens;
        inner.cost_usd += cost;
    }

    /// Record usage whose cost was already computed per call (the
    /// dispatcher aggregates cost across turns with per-turn model ids).
    pub fn add_with_cost(&self, usage: &TokenUsage, cost: f64) {
        let mut inner = self.inner.lock().expect("token lock poisoned");
        inner.input_tokens += usage.input_tokens;
        inner.output_tokens += usage.output_tokens;
        inner.cached_input_tokens += usage.cached_input_tokens;
        inner.reasoning_tokens += usage.reasoning_tokens;
        inner.cost_usd += cost;
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        *self.inner.lock().expect("token lock poisoned")
    }
}

/// Cost of a single call. Cached input is billed at the cached rate; the
/// uncached remainder at the full input rate.
pub fn cost_usd(model: &str, usage: &TokenUsage) -> f64 {
    let (_, input_rate, cached_rate, output_rate) = PRICING
        .iter()
        .find(|(prefix, ..)| model.starts_with(prefix))
        .copied()
        .unwrap_or(PRICING[PRICING.len() - 1]);

    let uncached = usage.input_tokens.saturating_sub(usage.cached_input_tokens) as f64;
    let cached = usage.cached_input_tokens as f64;
    let output = usage.output_tokens as f64;

    (uncached * input_rate + cached * cached_rate + output * output_rate) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_calls() {
        let tracker = TokenTracker::new();
        tracker.add(
            "gpt-5.2",
            &TokenUsage {
                input_tokens: 1_000,
                output_tokens: 500,
                ..Default::default()
            },
        );
        tracker.add(
            "gpt-5.2",
            &TokenUsage {
                input_tokens: 2_000,
                output_tokens: 100,
                cached_input_tokens: 1_000,
                reasoning_tokens: 50,
            },
        );

        let snap = tracker.snapshot();
        assert_eq!(snap.input_tokens, 3_000);
        assert_eq!(snap.output_tokens, 600);
        assert_eq!(snap.cached_input_tokens, 1_000);
        assert_eq!(snap.reasoning_tokens, 50);
        assert!(snap.cost_usd > 0.0);
    }

    #[test]
    fn cached_tokens_bill_at_reduced_rate() {
        let cold = cost_usd(
            "gpt-5.2",
            &TokenUsage {
                input_tokens: 1_000_000,
                ..Default::default()
            },
        );
        let warm = cost_usd(
            "gpt-5.2",
            &TokenUsage {
                input_tokens: 1_000_000,
                cached_input_tokens: 1_000_000,
                ..Default::default()
            },
        );
        assert!(warm < cold);
    }

    #[test]
    fn unknown_model_uses_fallback_pricing() {
        let cost = cost_usd(
            "some-house-model",
            &TokenUsage {
                output_tokens: 1_000_000,
                ..Default::default()
            },
        );
        assert!((cost - 8.0).abs() < 1e-9);
    }
}
