use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lowest valid decision score.
pub const SCORE_MIN: Decimal = Decimal::ZERO;
/// Highest valid decision score.
pub const SCORE_MAX: Decimal = Decimal::TEN;

/// Three-tier classification derived from a score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Risk,
    Rebalance,
    Launch,
}

/// Output of one evaluation. Never mutated after it is produced; a new
/// evaluation yields a new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionResult {
    pub kind: DecisionKind,
    /// Clamped to `SCORE_MIN..=SCORE_MAX`. Higher is safer / healthier.
    pub score: Decimal,
    pub level: RiskLevel,
    /// Human-readable issues in the order they were evaluated.
    pub flags: Vec<String>,
    /// 0.0 to 1.0.
    pub confidence: Decimal,
    pub recommendation: String,
    /// Set when an external collaborator failed and local rules were used instead.
    pub degraded: bool,
    pub detail: DecisionDetail,
}

impl DecisionResult {
    /// True when the decision asks for an action to be executed.
    pub fn is_actionable(&self) -> bool {
        match &self.detail {
            DecisionDetail::Rebalance(detail) => {
                matches!(detail.verdict, RebalanceVerdict::Rebalance { .. })
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionDetail {
    Risk {
        /// Derived from the score: `(10 - score) / 10`.
        fraud_probability: Decimal,
        /// From the risk classifier, when it answered.
        rug_pull_probability: Option<f64>,
        sell_off: Option<SellOffSignal>,
    },
    Rebalance(RebalanceDetail),
    Launch(LaunchDetail),
}

/// Price-action pattern found in an entity's price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SellOffSignal {
    pub price_drop_pct: Decimal,
    pub volume_spike: bool,
    pub rug_pull_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebalanceDetail {
    pub verdict: RebalanceVerdict,
    /// What the oracle recommended, if it answered with a usable range.
    pub recommended: Option<RangeRecommendation>,
    pub harvest_fees: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RebalanceVerdict {
    Rebalance { lower: Decimal, upper: Decimal },
    NoAction { reasons: Vec<NoActionReason> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    InsufficientImprovement,
    LowConfidence,
    CooldownActive,
    /// The oracle answered but had nothing actionable.
    NoSignal,
    /// The oracle failed or timed out.
    OracleUnavailable,
}

/// A recommended liquidity range from the knowledge oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeRecommendation {
    pub lower: Decimal,
    pub upper: Decimal,
    pub confidence: Decimal,
    /// Expected APR improvement in percentage points.
    pub expected_improvement_pct: Decimal,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchDetail {
    pub strategy: LaunchStrategy,
    pub forecast: Option<LaunchForecast>,
    /// False when the risk analyzer did not answer and local rules were used.
    pub remote_risk: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresaleMode {
    Fcfs,
    Whitelist,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurveType {
    Linear,
    Exponential,
}

/// Launch parameters recommended for a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchStrategy {
    pub presale_mode: PresaleMode,
    pub graduation_threshold: Decimal,
    pub initial_liquidity: Decimal,
    pub vesting_immediate_pct: u32,
    pub vesting_gradual_pct: u32,
    pub initial_price: Decimal,
    pub curve_type: CurveType,
    pub anti_sniper_seconds: u64,
    /// Confidence reported by the source of the strategy.
    pub confidence: Decimal,
    pub reasoning: String,
}

/// Bonding-curve forecast from the prediction service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchForecast {
    pub optimal_graduation_threshold: f64,
    pub expected_graduation_hours: f64,
    pub peak_price: f64,
    pub success_probability: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rebalance_result(verdict: RebalanceVerdict) -> DecisionResult {
        DecisionResult {
            kind: DecisionKind::Rebalance,
            score: dec!(6.0),
            level: RiskLevel::Medium,
            flags: vec![],
            confidence: dec!(1.0),
            recommendation: "Rebalance".to_string(),
            degraded: false,
            detail: DecisionDetail::Rebalance(RebalanceDetail {
                verdict,
                recommended: None,
                harvest_fees: false,
            }),
        }
    }

    #[test]
    fn only_rebalance_verdict_is_actionable() {
        let act = rebalance_result(RebalanceVerdict::Rebalance {
            lower: dec!(0.95),
            upper: dec!(1.05),
        });
        assert!(act.is_actionable());

        let hold = rebalance_result(RebalanceVerdict::NoAction {
            reasons: vec![NoActionReason::CooldownActive],
        });
        assert!(!hold.is_actionable());
    }

    #[test]
    fn detail_is_tagged() {
        let result = rebalance_result(RebalanceVerdict::NoAction {
            reasons: vec![NoActionReason::NoSignal],
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["detail"]["type"], "rebalance");
        assert_eq!(json["detail"]["verdict"]["verdict"], "no_action");
        assert_eq!(json["detail"]["verdict"]["reasons"][0], "no_signal");
    }

    #[test]
    fn risk_level_serialization() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"HIGH\"");
        assert_eq!(RiskLevel::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn presale_mode_uses_wire_names() {
        assert_eq!(serde_json::to_string(&PresaleMode::Fcfs).unwrap(), "\"FCFS\"");
        assert_eq!(serde_json::to_string(&CurveType::Exponential).unwrap(), "\"EXPONENTIAL\"");
    }
}
