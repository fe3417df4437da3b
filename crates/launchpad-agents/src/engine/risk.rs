//! Token risk scoring: ordered rule deductions from a base score, oracle
//! fraud patterns, and price-action sell-off detection.

use launchpad_models::{
    metric_keys as keys, DecisionDetail, DecisionKind, DecisionResult, Metrics, RiskConfig,
    RiskLevel, SellOffSignal,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    clamp_score, completeness, confidence_from, degrade, level_for, DEGRADED_ORACLE_FLAG,
    DEGRADED_PREDICTION_FLAG,
};
use crate::error::OracleError;
use crate::oracle::{OracleOutcome, OracleQuery};
use crate::prediction::PredictionOutcome;

/// Inputs whose presence drives risk confidence.
pub const REQUIRED_FIELDS: [&str; 5] = [
    keys::LIQUIDITY_LOCK_DAYS,
    keys::TEAM_VERIFIED,
    keys::VESTING_ENABLED,
    keys::CONTRACT_VERIFIED,
    keys::TOP_HOLDER_PCT,
];

/// Fewer price points than this are not analyzed for sell-offs.
pub const MIN_PRICE_POINTS: usize = 5;
/// Sell-off drop is measured across at most this many recent points.
pub const SELL_OFF_WINDOW: usize = 10;

pub struct RiskInputs<'a> {
    pub metrics: &'a Metrics,
    pub fraud_patterns: &'a OracleOutcome<Vec<String>>,
    pub rug_pull_probability: &'a PredictionOutcome<f64>,
}

struct Tally {
    score: Decimal,
    flags: Vec<String>,
}

impl Tally {
    fn deduct(&mut self, amount: Decimal, flag: String) {
        self.score -= amount;
        self.flags.push(flag);
    }
}

pub fn risk_query(metrics: &Metrics) -> OracleQuery {
    OracleQuery::new("analyze-risk-factors")
        .arg(
            "liquidity-lock",
            metrics.decimal(keys::LIQUIDITY_LOCK_DAYS).unwrap_or_default(),
        )
        .arg(
            "team-verified",
            metrics.bool(keys::TEAM_VERIFIED).unwrap_or(false),
        )
        .arg(
            "vesting-schedule",
            metrics.bool(keys::VESTING_ENABLED).unwrap_or(false),
        )
        .arg(
            "contract-verified",
            metrics.bool(keys::CONTRACT_VERIFIED).unwrap_or(false),
        )
        .arg(
            "holder-concentration",
            metrics.decimal(keys::TOP_HOLDER_PCT).unwrap_or_default(),
        )
}

/// Expects `{"matched_patterns": ["name", ...]}`.
pub fn parse_fraud_patterns(value: &Value) -> Result<Vec<String>, OracleError> {
    let patterns = value
        .get("matched_patterns")
        .and_then(Value::as_array)
        .ok_or_else(|| OracleError::Malformed("'matched_patterns' is not an array".into()))?;

    patterns
        .iter()
        .map(|pattern| {
            pattern
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| OracleError::Malformed(format!("pattern {pattern} is not a string")))
        })
        .collect()
}

/// Score a token. Higher is safer.
pub fn assess(inputs: &RiskInputs<'_>, config: &RiskConfig) -> DecisionResult {
    let metrics = inputs.metrics;
    let mut tally = Tally {
        score: config.base_score,
        flags: Vec::new(),
    };

    let min_lock = config.min_lock_days.normalize();
    match metrics.decimal(keys::LIQUIDITY_LOCK_DAYS) {
        _ if metrics.bool(keys::LIQUIDITY_LOCKED) == Some(false) => tally.deduct(
            config.lock_deduction,
            format!("No liquidity lock ({min_lock}+ days recommended)"),
        ),
        None => tally.deduct(
            config.lock_deduction,
            format!("No liquidity lock ({min_lock}+ days recommended)"),
        ),
        Some(days) if days < config.min_lock_days => tally.deduct(
            config.lock_deduction,
            format!(
                "Short liquidity lock: {} days ({min_lock}+ recommended)",
                days.normalize()
            ),
        ),
        Some(_) => {}
    }

    if !metrics.bool(keys::TEAM_VERIFIED).unwrap_or(false) {
        tally.deduct(config.team_deduction, "Anonymous team".to_string());
    }

    if !metrics.bool(keys::VESTING_ENABLED).unwrap_or(false) {
        tally.deduct(config.vesting_deduction, "No vesting schedule".to_string());
    }

    if !metrics.bool(keys::CONTRACT_VERIFIED).unwrap_or(false) {
        tally.deduct(config.contract_deduction, "Contract not verified".to_string());
    }

    if let Some(pct) = metrics.decimal(keys::TOP_HOLDER_PCT) {
        if pct > config.max_holder_concentration_pct {
            tally.deduct(
                config.concentration_deduction,
                format!("High holder concentration: {:.1}%", pct),
            );
        }
    }

    if let Some(hours) = metrics.decimal(keys::GRADUATION_TIME_HOURS) {
        if hours < config.min_graduation_hours {
            tally.deduct(
                config.rapid_graduation_deduction,
                format!(
                    "Rapid graduation (<{}h): possible pump and dump",
                    config.min_graduation_hours.normalize()
                ),
            );
        }
    }

    if let OracleOutcome::Answered(patterns) = inputs.fraud_patterns {
        for pattern in patterns {
            tally.deduct(
                config.fraud_pattern_deduction,
                format!("Fraud pattern matched: {pattern}"),
            );
        }
    }

    let sell_off = detect_sell_off(metrics, config);
    if let Some(signal) = &sell_off {
        if signal.price_drop_pct > config.rapid_sell_off_pct {
            tally
                .flags
                .push(format!("Rapid sell-off: {:.2}% price drop", signal.price_drop_pct));
        }
        if signal.rug_pull_detected {
            tally
                .flags
                .push("Rug pull pattern: sell-off following a volume spike".to_string());
        }
    }

    let mut failures = 0;
    if inputs.fraud_patterns.is_failed() {
        failures += 1;
        tally.flags.push(DEGRADED_ORACLE_FLAG.to_string());
    }
    if inputs.rug_pull_probability.is_failed() {
        failures += 1;
        tally.flags.push(DEGRADED_PREDICTION_FLAG.to_string());
    }

    let score = clamp_score(tally.score);
    let confidence = degrade(
        confidence_from(completeness(metrics, &REQUIRED_FIELDS), config),
        failures,
        config,
    );

    DecisionResult {
        kind: DecisionKind::Risk,
        score,
        level: level_for(score, config),
        flags: tally.flags,
        confidence,
        recommendation: recommendation(score, config).to_string(),
        degraded: failures > 0,
        detail: DecisionDetail::Risk {
            fraud_probability: (Decimal::TEN - score) / Decimal::TEN,
            rug_pull_probability: inputs.rug_pull_probability.predicted().copied(),
            sell_off,
        },
    }
}

/// Rules only, without oracle or prediction input.
pub fn assess_local(metrics: &Metrics, config: &RiskConfig) -> DecisionResult {
    assess(
        &RiskInputs {
            metrics,
            fraud_patterns: &OracleOutcome::NoSignal,
            rug_pull_probability: &PredictionOutcome::NotConfigured,
        },
        config,
    )
}

/// Measure the price drop across the most recent points of `price_history`.
///
/// A drop above the configured threshold together with `volume_spike` is a
/// rug-pull pattern.
pub fn detect_sell_off(metrics: &Metrics, config: &RiskConfig) -> Option<SellOffSignal> {
    let history = metrics.series(keys::PRICE_HISTORY)?;
    if history.len() < MIN_PRICE_POINTS {
        return None;
    }

    let window = &history[history.len().saturating_sub(SELL_OFF_WINDOW)..];
    let first = *window.first()?;
    let last = *window.last()?;
    if first <= 0.0 {
        return None;
    }

    let price_drop_pct = Decimal::from_f64((first - last) / first * 100.0)?.round_dp(2);
    let volume_spike = metrics.bool(keys::VOLUME_SPIKE).unwrap_or(false);
    let rapid = price_drop_pct > config.rapid_sell_off_pct;

    Some(SellOffSignal {
        price_drop_pct,
        volume_spike,
        rug_pull_detected: rapid && volume_spike,
    })
}

/// Whether a committed risk decision must reach the alert sink.
pub fn needs_alert(result: &DecisionResult) -> bool {
    let rug_pull = matches!(
        &result.detail,
        DecisionDetail::Risk {
            sell_off: Some(SellOffSignal {
                rug_pull_detected: true,
                ..
            }),
            ..
        }
    );
    result.level == RiskLevel::High || rug_pull
}

pub fn recommendation(score: Decimal, config: &RiskConfig) -> &'static str {
    if score < config.avoid_below {
        "HIGH RISK: do not invest, multiple fraud indicators detected"
    } else if score < config.extreme_caution_below {
        "MEDIUM-HIGH RISK: proceed with extreme caution"
    } else if score < config.experienced_only_below {
        "MEDIUM RISK: acceptable for experienced investors"
    } else if score < config.due_diligence_below {
        "LOW-MEDIUM RISK: generally safe with standard due diligence"
    } else {
        "LOW RISK: strong safety indicators"
    }
}
