//! Pure scoring functions.
//!
//! Nothing here performs I/O. Oracle and prediction results arrive as
//! already-resolved outcomes, so identical inputs always yield identical
//! `DecisionResult`s.

pub mod launch;
pub mod rebalance;
pub mod risk;

use launchpad_models::decision::{SCORE_MAX, SCORE_MIN};
use launchpad_models::{Metrics, RiskConfig, RiskLevel};
use rust_decimal::Decimal;

pub const DEGRADED_ORACLE_FLAG: &str = "Degraded analysis: knowledge oracle unavailable";
pub const DEGRADED_PREDICTION_FLAG: &str = "Degraded analysis: prediction service unavailable";
pub const DEGRADED_RISK_REPLY_FLAG: &str = "Degraded analysis: risk analyzer did not answer";

pub fn clamp_score(score: Decimal) -> Decimal {
    score.clamp(SCORE_MIN, SCORE_MAX)
}

/// Three-tier level from fixed score bands. Higher scores are safer.
pub fn level_for(score: Decimal, config: &RiskConfig) -> RiskLevel {
    if score < config.high_risk_below {
        RiskLevel::High
    } else if score < config.medium_risk_below {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Fraction of `required` keys present in `metrics`.
pub fn completeness(metrics: &Metrics, required: &[&str]) -> Decimal {
    if required.is_empty() {
        return Decimal::ONE;
    }
    let present = required.iter().filter(|key| metrics.has(key)).count();
    Decimal::from(present) / Decimal::from(required.len())
}

/// Linear between the configured floor (nothing present) and 1.0 (all present).
pub fn confidence_from(completeness: Decimal, config: &RiskConfig) -> Decimal {
    let floor = config.confidence_floor;
    floor + (Decimal::ONE - floor) * completeness
}

/// Confidence after `failures` external collaborators failed.
pub fn degrade(confidence: Decimal, failures: usize, config: &RiskConfig) -> Decimal {
    (0..failures).fold(confidence, |c, _| c * config.degraded_confidence_factor)
}
