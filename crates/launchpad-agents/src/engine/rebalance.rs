//! Concentrated-liquidity rebalance gating and fee harvesting.

use chrono::{DateTime, Utc};
use launchpad_models::decision::SCORE_MAX;
use launchpad_models::{
    metric_keys as keys, DecisionDetail, DecisionKind, DecisionResult, Metrics, NoActionReason,
    RangeRecommendation, RebalanceConfig, RebalanceDetail, RebalanceVerdict, RiskConfig,
};
use rust_decimal::Decimal;
use serde_json::Value;

use super::{clamp_score, completeness, confidence_from, degrade, level_for, DEGRADED_ORACLE_FLAG};
use crate::error::OracleError;
use crate::oracle::{decimal_field, decimal_field_any, unit_interval, OracleOutcome, OracleQuery};

pub const REQUIRED_FIELDS: [&str; 5] = [
    keys::CURRENT_PRICE,
    keys::VOLATILITY_24H,
    keys::VOLUME_24H,
    keys::RANGE_LOWER,
    keys::RANGE_UPPER,
];

/// Health of a position whose price left its range.
pub const OUT_OF_RANGE_HEALTH: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

/// Percentage points of expected improvement per point of lost health.
const IMPROVEMENT_PER_HEALTH_POINT: Decimal = Decimal::from_parts(25, 0, 0, false, 1);

pub struct RebalanceInputs<'a> {
    pub metrics: &'a Metrics,
    pub recommendation: &'a OracleOutcome<RangeRecommendation>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub fn range_query(metrics: &Metrics) -> OracleQuery {
    OracleQuery::new("predict-optimal-liquidity-range")
        .arg("pool", metrics.str(keys::POOL_ADDRESS).unwrap_or_default())
        .arg(
            "current-price",
            metrics.decimal(keys::CURRENT_PRICE).unwrap_or_default(),
        )
        .arg(
            "volatility",
            metrics.decimal(keys::VOLATILITY_24H).unwrap_or_default(),
        )
        .arg(
            "volume-24h",
            metrics.decimal(keys::VOLUME_24H).unwrap_or_default(),
        )
        .arg(
            "current-range-lower",
            metrics.decimal(keys::RANGE_LOWER).unwrap_or_default(),
        )
        .arg(
            "current-range-upper",
            metrics.decimal(keys::RANGE_UPPER).unwrap_or_default(),
        )
}

/// Parse `{"lower", "upper", "confidence", "expected_apr_improvement", "reasoning"}`.
pub fn parse_range(value: &Value) -> Result<RangeRecommendation, OracleError> {
    let lower = decimal_field(value, "lower")?;
    let upper = decimal_field(value, "upper")?;
    if lower < Decimal::ZERO || lower >= upper {
        return Err(OracleError::Malformed(format!(
            "invalid range [{lower}, {upper}]"
        )));
    }
    let confidence = unit_interval(decimal_field(value, "confidence")?, "confidence")?;
    let expected_improvement_pct = decimal_field_any(
        value,
        &["expected_apr_improvement", "expected_improvement_pct"],
    )?;
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(RangeRecommendation {
        lower,
        upper,
        confidence,
        expected_improvement_pct,
        reasoning,
    })
}

/// Decide whether a position should move to the recommended range.
///
/// A rebalance needs all three gates: improvement above the minimum, oracle
/// confidence above the minimum, and the cooldown elapsed. Every failed gate
/// is listed in the verdict.
pub fn decide(
    inputs: &RebalanceInputs<'_>,
    config: &RebalanceConfig,
    risk: &RiskConfig,
) -> DecisionResult {
    let metrics = inputs.metrics;
    let mut flags = Vec::new();

    let local_health = match (
        metrics.decimal(keys::CURRENT_PRICE),
        metrics.decimal(keys::RANGE_LOWER),
        metrics.decimal(keys::RANGE_UPPER),
    ) {
        (Some(price), Some(lower), Some(upper)) if price < lower || price > upper => {
            flags.push(format!(
                "Position out of range: price {} outside [{}, {}]",
                price.normalize(),
                lower.normalize(),
                upper.normalize()
            ));
            OUT_OF_RANGE_HEALTH
        }
        _ => SCORE_MAX,
    };

    let (verdict, recommended, health) = match inputs.recommendation {
        OracleOutcome::Failed => {
            flags.push(DEGRADED_ORACLE_FLAG.to_string());
            (
                RebalanceVerdict::NoAction {
                    reasons: vec![NoActionReason::OracleUnavailable],
                },
                None,
                local_health,
            )
        }
        OracleOutcome::NoSignal => (
            RebalanceVerdict::NoAction {
                reasons: vec![NoActionReason::NoSignal],
            },
            None,
            local_health,
        ),
        OracleOutcome::Answered(rec) => {
            let mut reasons = Vec::new();
            if rec.expected_improvement_pct <= config.min_improvement_pct {
                reasons.push(NoActionReason::InsufficientImprovement);
                flags.push(format!(
                    "Expected improvement {}% not above {}%",
                    rec.expected_improvement_pct.normalize(),
                    config.min_improvement_pct.normalize()
                ));
            }
            if rec.confidence <= config.min_oracle_confidence {
                reasons.push(NoActionReason::LowConfidence);
                flags.push(format!(
                    "Oracle confidence {} not above {}",
                    rec.confidence.normalize(),
                    config.min_oracle_confidence.normalize()
                ));
            }
            if let Some(last) = inputs.last_action_at {
                if !cooldown_elapsed(last, inputs.now, config.cooldown_seconds) {
                    reasons.push(NoActionReason::CooldownActive);
                    flags.push(format!("Cooldown active since {}", last.to_rfc3339()));
                }
            }

            let oracle_health =
                clamp_score(SCORE_MAX - rec.expected_improvement_pct / IMPROVEMENT_PER_HEALTH_POINT);
            let verdict = if reasons.is_empty() {
                RebalanceVerdict::Rebalance {
                    lower: rec.lower,
                    upper: rec.upper,
                }
            } else {
                RebalanceVerdict::NoAction { reasons }
            };
            (verdict, Some(rec.clone()), local_health.min(oracle_health))
        }
    };

    let harvest = harvestable_fees(metrics, config);
    if let Some(fees) = harvest {
        flags.push(format!("Unclaimed fees worth harvesting: {}", fees.normalize()));
    }

    let failed = inputs.recommendation.is_failed();
    let confidence = degrade(
        confidence_from(completeness(metrics, &REQUIRED_FIELDS), risk),
        usize::from(failed),
        risk,
    );

    let recommendation = match &verdict {
        RebalanceVerdict::Rebalance { lower, upper } => {
            format!("Rebalance to [{}, {}]", lower.normalize(), upper.normalize())
        }
        RebalanceVerdict::NoAction { .. } if harvest.is_some() => {
            "Hold current range and harvest fees".to_string()
        }
        RebalanceVerdict::NoAction { .. } => "Hold current range".to_string(),
    };

    DecisionResult {
        kind: DecisionKind::Rebalance,
        score: health,
        level: level_for(health, risk),
        flags,
        confidence,
        recommendation,
        degraded: failed,
        detail: DecisionDetail::Rebalance(RebalanceDetail {
            verdict,
            recommended,
            harvest_fees: harvest.is_some(),
        }),
    }
}

fn cooldown_elapsed(last: DateTime<Utc>, now: DateTime<Utc>, cooldown_seconds: u64) -> bool {
    let cooldown = i64::try_from(cooldown_seconds).unwrap_or(i64::MAX);
    (now - last).num_seconds() >= cooldown
}

/// Fees worth claiming: above the minimum and at least twice the gas cost.
pub fn harvestable_fees(metrics: &Metrics, config: &RebalanceConfig) -> Option<Decimal> {
    let fees = metrics.decimal(keys::UNCLAIMED_FEES)?;
    let covers_gas = fees >= config.harvest_gas_cost * Decimal::TWO;
    (fees >= config.min_harvest_fees && covers_gas).then_some(fees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use launchpad_models::RiskLevel;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn position() -> Metrics {
        Metrics::new()
            .with(keys::POOL_ADDRESS, "pool-1")
            .with(keys::CURRENT_PRICE, 1.0)
            .with(keys::VOLATILITY_24H, 0.12)
            .with(keys::VOLUME_24H, 50_000)
            .with(keys::RANGE_LOWER, 0.9)
            .with(keys::RANGE_UPPER, 1.1)
    }

    fn recommend(improvement: Decimal, confidence: Decimal) -> OracleOutcome<RangeRecommendation> {
        OracleOutcome::Answered(RangeRecommendation {
            lower: dec!(0.95),
            upper: dec!(1.05),
            confidence,
            expected_improvement_pct: improvement,
            reasoning: "tighter range".to_string(),
        })
    }

    fn run(
        metrics: &Metrics,
        recommendation: &OracleOutcome<RangeRecommendation>,
        last_action_at: Option<DateTime<Utc>>,
    ) -> DecisionResult {
        let now = Utc::now();
        decide(
            &RebalanceInputs {
                metrics,
                recommendation,
                last_action_at: last_action_at.map(|_| now - Duration::hours(1)),
                now,
            },
            &RebalanceConfig::default(),
            &RiskConfig::default(),
        )
    }

    fn verdict(result: &DecisionResult) -> &RebalanceVerdict {
        match &result.detail {
            DecisionDetail::Rebalance(detail) => &detail.verdict,
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn all_gates_pass() {
        let result = run(&position(), &recommend(dec!(10), dec!(0.9)), None);
        assert_eq!(
            verdict(&result),
            &RebalanceVerdict::Rebalance {
                lower: dec!(0.95),
                upper: dec!(1.05)
            }
        );
        assert!(result.is_actionable());
        assert_eq!(result.recommendation, "Rebalance to [0.95, 1.05]");
        // 10 - 10 / 2.5
        assert_eq!(result.score, dec!(6));
        assert_eq!(result.level, RiskLevel::Medium);
    }

    #[test]
    fn low_improvement_suppresses() {
        let result = run(&position(), &recommend(dec!(3), dec!(0.9)), None);
        assert_eq!(
            verdict(&result),
            &RebalanceVerdict::NoAction {
                reasons: vec![NoActionReason::InsufficientImprovement]
            }
        );
        assert_eq!(result.recommendation, "Hold current range");
    }

    #[test]
    fn low_confidence_suppresses() {
        let result = run(&position(), &recommend(dec!(10), dec!(0.6)), None);
        assert_eq!(
            verdict(&result),
            &RebalanceVerdict::NoAction {
                reasons: vec![NoActionReason::LowConfidence]
            }
        );
    }

    #[test]
    fn cooldown_suppresses() {
        let result = run(&position(), &recommend(dec!(10), dec!(0.9)), Some(Utc::now()));
        assert_eq!(
            verdict(&result),
            &RebalanceVerdict::NoAction {
                reasons: vec![NoActionReason::CooldownActive]
            }
        );
        assert!(!result.is_actionable());
    }

    #[test]
    fn every_failed_gate_is_reported() {
        let result = run(&position(), &recommend(dec!(5), dec!(0.8)), Some(Utc::now()));
        assert_eq!(
            verdict(&result),
            &RebalanceVerdict::NoAction {
                reasons: vec![
                    NoActionReason::InsufficientImprovement,
                    NoActionReason::LowConfidence,
                    NoActionReason::CooldownActive,
                ]
            }
        );
        assert_eq!(result.flags.len(), 3);
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(cooldown_elapsed(now - Duration::seconds(60), now, 60));
        assert!(!cooldown_elapsed(now - Duration::seconds(59), now, 60));
    }

    #[test]
    fn oracle_failure_is_degraded_no_action() {
        let ok = run(&position(), &recommend(dec!(10), dec!(0.9)), None);
        let failed = run(&position(), &OracleOutcome::Failed, None);

        assert_eq!(
            verdict(&failed),
            &RebalanceVerdict::NoAction {
                reasons: vec![NoActionReason::OracleUnavailable]
            }
        );
        assert!(failed.degraded);
        assert!(failed.confidence < ok.confidence);
        assert_eq!(failed.flags, vec![DEGRADED_ORACLE_FLAG]);
    }

    #[test]
    fn no_signal_is_not_degraded() {
        let result = run(&position(), &OracleOutcome::NoSignal, None);
        assert!(!result.degraded);
        assert_eq!(result.confidence, dec!(1.0));
        assert_eq!(result.score, dec!(10));
    }

    #[test]
    fn out_of_range_lowers_health() {
        let metrics = position().with(keys::CURRENT_PRICE, 1.3);
        let result = run(&metrics, &OracleOutcome::NoSignal, None);
        assert_eq!(result.score, dec!(3));
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(
            result.flags,
            vec!["Position out of range: price 1.3 outside [0.9, 1.1]"]
        );
    }

    #[test]
    fn harvest_requires_minimum_and_gas_cover() {
        let config = RebalanceConfig::default();
        assert_eq!(
            harvestable_fees(&Metrics::new().with(keys::UNCLAIMED_FEES, 2.5), &config),
            Some(dec!(2.5))
        );
        assert_eq!(
            harvestable_fees(&Metrics::new().with(keys::UNCLAIMED_FEES, 0.5), &config),
            None
        );

        let mut expensive = RebalanceConfig::default();
        expensive.harvest_gas_cost = dec!(2);
        assert_eq!(
            harvestable_fees(&Metrics::new().with(keys::UNCLAIMED_FEES, 3), &expensive),
            None
        );
    }

    #[test]
    fn hold_with_harvest() {
        let metrics = position().with(keys::UNCLAIMED_FEES, 4);
        let result = run(&metrics, &OracleOutcome::NoSignal, None);
        assert_eq!(result.recommendation, "Hold current range and harvest fees");
        match &result.detail {
            DecisionDetail::Rebalance(detail) => assert!(detail.harvest_fees),
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn parse_accepts_either_improvement_name() {
        let a = parse_range(&json!({
            "lower": 0.95, "upper": 1.05, "confidence": 0.9,
            "expected_apr_improvement": 12.5, "reasoning": "vol compression"
        }))
        .unwrap();
        assert_eq!(a.expected_improvement_pct, dec!(12.5));
        assert_eq!(a.reasoning, "vol compression");

        let b = parse_range(&json!({
            "lower": "0.95", "upper": "1.05", "confidence": 0.9,
            "expected_improvement_pct": 7
        }))
        .unwrap();
        assert_eq!(b.expected_improvement_pct, dec!(7));
        assert_eq!(b.reasoning, "");
    }

    #[test]
    fn parse_rejects_bad_ranges() {
        let inverted = json!({"lower": 1.05, "upper": 0.95, "confidence": 0.9, "expected_apr_improvement": 10});
        assert!(parse_range(&inverted).is_err());

        let overconfident = json!({"lower": 0.95, "upper": 1.05, "confidence": 1.2, "expected_apr_improvement": 10});
        assert!(parse_range(&overconfident).is_err());

        let missing = json!({"lower": 0.95, "upper": 1.05, "confidence": 0.9});
        assert!(parse_range(&missing).is_err());
    }

    #[test]
    fn query_shape() {
        assert_eq!(
            range_query(&position()).render(),
            "(predict-optimal-liquidity-range (pool \"pool-1\") (current-price 1) (volatility 0.12) (volume-24h 50000) (current-range-lower 0.9) (current-range-upper 1.1))"
        );
    }
}
