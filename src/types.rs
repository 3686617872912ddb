//! Shared domain types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality tier selected by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Full cost and quality.
    Primary,
    /// Cheaper, lower fidelity; used while primary quota is exhausted.
    Fallback,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Primary, Tier::Fallback];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-unit price table, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default = "default_primary")]
    pub primary: f64,
    #[serde(default = "default_fallback")]
    pub fallback: f64,
    #[serde(default = "default_primary_batch")]
    pub primary_batch: f64,
    #[serde(default = "default_fallback_batch")]
    pub fallback_batch: f64,
}

fn default_primary() -> f64 {
    0.134
}

fn default_fallback() -> f64 {
    0.039
}

fn default_primary_batch() -> f64 {
    0.067
}

fn default_fallback_batch() -> f64 {
    0.0195
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: default_fallback(),
            primary_batch: default_primary_batch(),
            fallback_batch: default_fallback_batch(),
        }
    }
}

impl Pricing {
    /// Cost of one unit on `tier`, with or without batch discount.
    pub fn unit_cost(&self, tier: Tier, batch: bool) -> f64 {
        match (tier, batch) {
            (Tier::Primary, false) => self.primary,
            (Tier::Fallback, false) => self.fallback,
            (Tier::Primary, true) => self.primary_batch,
            (Tier::Fallback, true) => self.fallback_batch,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let prices = [
            self.primary,
            self.fallback,
            self.primary_batch,
            self.fallback_batch,
        ];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err("prices must be finite and non-negative".to_string());
        }
        Ok(())
    }
}

/// Round a dollar amount to four decimal places.
pub fn round_cost(amount: f64) -> f64 {
    (amount * 10_000.0).round() / 10_000.0
}
