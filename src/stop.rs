//! Stop-condition evaluation
//!
//! A pure decision over the six halt criteria, checked in fixed priority
//! order before every unit of work. The first satisfied condition wins.

use serde::Serialize;
use std::fmt;

use crate::types::{Pricing, Tier};

/// Everything the evaluator looks at. Caps of zero or less are disabled.
#[derive(Debug, Clone, Serialize)]
pub struct StopInputs {
    pub generated: u64,
    /// Zero or less means unbounded.
    pub target_count: i64,
    pub elapsed_secs: f64,
    /// Zero or less means unbounded.
    pub max_duration_hours: f64,
    pub session_cost: f64,
    pub session_cost_cap: Option<f64>,
    pub daily_total: f64,
    pub daily_cap: f64,
    pub monthly_total: f64,
    pub monthly_cap: f64,
    pub all_exhausted: bool,
    pub next_tier: Tier,
    pub batch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    TargetReached { generated: u64, target: i64 },
    DurationExceeded { hours: f64 },
    SessionCostCap { cap: f64 },
    DailyCostCap { cap: f64 },
    MonthlyCostCap { cap: f64 },
    Exhausted,
}

impl StopReason {
    /// Conditions 3-5, which raise a cost-limit notification.
    pub fn is_cost_limit(&self) -> bool {
        matches!(
            self,
            StopReason::SessionCostCap { .. }
                | StopReason::DailyCostCap { .. }
                | StopReason::MonthlyCostCap { .. }
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached { generated, target } => {
                write!(f, "target reached ({}/{})", generated, target)
            }
            StopReason::DurationExceeded { hours } => write!(f, "time limit ({}h)", hours),
            StopReason::SessionCostCap { cap } => write!(f, "session cost cap (${:.2})", cap),
            StopReason::DailyCostCap { cap } => write!(f, "daily cost cap (${:.2})", cap),
            StopReason::MonthlyCostCap { cap } => write!(f, "monthly cost cap (${:.2})", cap),
            StopReason::Exhausted => f.write_str("all credentials and tiers exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopDecision {
    Continue,
    Stop(StopReason),
}

impl StopDecision {
    pub fn should_stop(&self) -> bool {
        matches!(self, StopDecision::Stop(_))
    }

    pub fn reason(&self) -> Option<&StopReason> {
        match self {
            StopDecision::Continue => None,
            StopDecision::Stop(reason) => Some(reason),
        }
    }
}

pub fn evaluate(inputs: &StopInputs, pricing: &Pricing) -> StopDecision {
    let next_cost = pricing.unit_cost(inputs.next_tier, inputs.batch);

    if inputs.target_count > 0 && inputs.generated as i64 >= inputs.target_count {
        return StopDecision::Stop(StopReason::TargetReached {
            generated: inputs.generated,
            target: inputs.target_count,
        });
    }

    if inputs.max_duration_hours > 0.0 && inputs.elapsed_secs / 3600.0 >= inputs.max_duration_hours {
        return StopDecision::Stop(StopReason::DurationExceeded {
            hours: inputs.max_duration_hours,
        });
    }

    if let Some(cap) = inputs.session_cost_cap.filter(|cap| *cap > 0.0) {
        if inputs.session_cost + next_cost > cap {
            return StopDecision::Stop(StopReason::SessionCostCap { cap });
        }
    }

    if inputs.daily_cap > 0.0 && inputs.daily_total + next_cost > inputs.daily_cap {
        return StopDecision::Stop(StopReason::DailyCostCap {
            cap: inputs.daily_cap,
        });
    }

    if inputs.monthly_cap > 0.0 && inputs.monthly_total + next_cost > inputs.monthly_cap {
        return StopDecision::Stop(StopReason::MonthlyCostCap {
            cap: inputs.monthly_cap,
        });
    }

    if inputs.all_exhausted {
        return StopDecision::Stop(StopReason::Exhausted);
    }

    StopDecision::Continue
}

/// Why a session ended. Recorded verbatim in the archive.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    Stop(StopReason),
    Complete,
    ConsecutiveFailures { count: u32 },
    OverheadExceeded { calls: u64, attempts: u64 },
    PreCheck { estimated: f64, cap: f64, period: &'static str },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Stop(reason) => reason.fmt(f),
            HaltReason::Complete => f.write_str("complete"),
            HaltReason::ConsecutiveFailures { count } => {
                write!(f, "emergency stop: {} consecutive failures", count)
            }
            HaltReason::OverheadExceeded { calls, attempts } => write!(
                f,
                "emergency stop: call overhead {} calls for {} attempts",
                calls, attempts
            ),
            HaltReason::PreCheck {
                estimated,
                cap,
                period,
            } => write!(
                f,
                "pre-check: estimated ${:.2} exceeds {} cap (${:.2})",
                estimated, period, cap
            ),
        }
    }
}
