//! Launch strategy selection.
//!
//! Combines the oracle's strategy, the bonding-curve forecast and a risk
//! decision (remote or local) into one launch decision.

use launchpad_models::{
    metric_keys as keys, CurveType, DecisionDetail, DecisionKind, DecisionResult, LaunchDetail,
    LaunchForecast, LaunchStrategy, Metrics, PresaleMode, RiskConfig, RiskLevel,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    completeness, confidence_from, degrade, risk, DEGRADED_ORACLE_FLAG, DEGRADED_PREDICTION_FLAG,
    DEGRADED_RISK_REPLY_FLAG,
};
use crate::error::OracleError;
use crate::oracle::{decimal_field, decimal_field_any, unit_interval, OracleOutcome, OracleQuery};
use crate::prediction::{Prediction, PredictionOutcome, LAUNCH_OUTPUTS};

pub const REQUIRED_FIELDS: [&str; 5] = [
    keys::NAME,
    keys::CATEGORY,
    keys::TARGET_MARKETCAP,
    keys::COMMUNITY_SIZE,
    keys::INITIAL_LIQUIDITY,
];

const UNAVAILABLE_REASONING: &str = "Conservative default parameters (knowledge oracle unavailable)";
const NO_PATTERN_REASONING: &str = "Conservative default parameters (no matching launch pattern)";

/// Where the risk half of a launch decision comes from.
#[derive(Debug, Clone, Copy)]
pub enum RiskSource<'a> {
    /// The risk analyzer's latest decision for the token.
    Remote(&'a DecisionResult),
    /// The risk analyzer was asked but did not answer in time.
    Unavailable,
    /// No risk analyzer is configured.
    NotConfigured,
}

pub struct LaunchInputs<'a> {
    pub metrics: &'a Metrics,
    pub strategy: &'a OracleOutcome<LaunchStrategy>,
    pub forecast: &'a PredictionOutcome<LaunchForecast>,
    pub risk: RiskSource<'a>,
}

pub fn strategy_query(metrics: &Metrics) -> OracleQuery {
    OracleQuery::new("predict-optimal-launch-config")
        .arg("token-name", metrics.str(keys::NAME).unwrap_or_default())
        .symbol(
            "token-category",
            metrics.str(keys::CATEGORY).unwrap_or("unknown"),
        )
        .arg(
            "target-marketcap",
            metrics.decimal(keys::TARGET_MARKETCAP).unwrap_or_default(),
        )
        .arg(
            "community-size",
            metrics.decimal(keys::COMMUNITY_SIZE).unwrap_or_default(),
        )
}

pub fn parse_strategy(value: &Value) -> Result<LaunchStrategy, OracleError> {
    let presale_mode = enum_field::<PresaleMode>(value, "presale_mode")?;
    let curve_type = enum_field::<CurveType>(value, "curve_type")?;
    let graduation_threshold = positive(decimal_field(value, "graduation_threshold")?, "graduation_threshold")?;
    let initial_liquidity = positive(decimal_field(value, "initial_liquidity")?, "initial_liquidity")?;
    let initial_price = positive(decimal_field(value, "initial_price")?, "initial_price")?;
    let vesting_immediate_pct = percent(decimal_field_any(
        value,
        &["vesting_immediate_pct", "vesting_immediate"],
    )?)?;
    let anti_sniper_seconds = decimal_field_any(value, &["anti_sniper_seconds", "anti_sniper_duration"])?;
    let anti_sniper_seconds = anti_sniper_seconds
        .to_u64()
        .ok_or_else(|| OracleError::Malformed(format!("anti-sniper window {anti_sniper_seconds}")))?;
    let confidence = unit_interval(decimal_field(value, "confidence")?, "confidence")?;
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(LaunchStrategy {
        presale_mode,
        graduation_threshold,
        initial_liquidity,
        vesting_immediate_pct,
        vesting_gradual_pct: 100 - vesting_immediate_pct,
        initial_price,
        curve_type,
        anti_sniper_seconds,
        confidence,
        reasoning,
    })
}

fn enum_field<T: serde::de::DeserializeOwned>(value: &Value, key: &str) -> Result<T, OracleError> {
    let raw = value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| OracleError::Malformed(format!("'{key}' is not a string")))?;
    serde_json::from_value(Value::String(raw.to_ascii_uppercase()))
        .map_err(|e| OracleError::Malformed(format!("'{key}': {e}")))
}

fn positive(value: Decimal, key: &str) -> Result<Decimal, OracleError> {
    if value <= Decimal::ZERO {
        return Err(OracleError::Malformed(format!("'{key}' must be positive")));
    }
    Ok(value)
}

fn percent(value: Decimal) -> Result<u32, OracleError> {
    value
        .to_u32()
        .filter(|pct| *pct <= 100)
        .ok_or_else(|| OracleError::Malformed(format!("vesting share {value} outside 0..=100")))
}

/// Parameters used when the oracle cannot recommend a strategy.
pub fn conservative_strategy(reasoning: &str) -> LaunchStrategy {
    LaunchStrategy {
        presale_mode: PresaleMode::Fcfs,
        graduation_threshold: Decimal::new(50_000, 0),
        initial_liquidity: Decimal::new(25_000, 0),
        vesting_immediate_pct: 50,
        vesting_gradual_pct: 50,
        initial_price: Decimal::new(1, 3),
        curve_type: CurveType::Linear,
        anti_sniper_seconds: 180,
        confidence: Decimal::new(60, 2),
        reasoning: reasoning.to_string(),
    }
}

/// Read the forecaster's outputs. `None` when any of them is missing.
pub fn read_forecast(prediction: &Prediction) -> Option<LaunchForecast> {
    let [threshold, hours, peak, success] = LAUNCH_OUTPUTS;
    Some(LaunchForecast {
        optimal_graduation_threshold: prediction.get(threshold)?,
        expected_graduation_hours: prediction.get(hours)?,
        peak_price: prediction.get(peak)?,
        success_probability: prediction.get(success)?,
    })
}

pub fn decide(inputs: &LaunchInputs<'_>, config: &RiskConfig) -> DecisionResult {
    let metrics = inputs.metrics;
    let mut failures = 0;

    let risk_decision = match inputs.risk {
        RiskSource::Remote(remote) => remote.clone(),
        RiskSource::Unavailable | RiskSource::NotConfigured => risk::assess_local(metrics, config),
    };
    let mut flags = risk_decision.flags.clone();

    let strategy = match inputs.strategy {
        OracleOutcome::Answered(strategy) => strategy.clone(),
        OracleOutcome::NoSignal => conservative_strategy(NO_PATTERN_REASONING),
        OracleOutcome::Failed => {
            failures += 1;
            push_once(&mut flags, DEGRADED_ORACLE_FLAG);
            conservative_strategy(UNAVAILABLE_REASONING)
        }
    };

    if inputs.forecast.is_failed() {
        failures += 1;
        push_once(&mut flags, DEGRADED_PREDICTION_FLAG);
    }

    if let RiskSource::Unavailable = inputs.risk {
        failures += 1;
        flags.push(DEGRADED_RISK_REPLY_FLAG.to_string());
    }

    let confidence = degrade(
        confidence_from(completeness(metrics, &REQUIRED_FIELDS), config),
        failures,
        config,
    );

    let recommendation = if risk_decision.level == RiskLevel::High {
        format!("Do not launch: {}", risk_decision.recommendation)
    } else {
        format!(
            "Launch with {} presale and {} curve, graduation at {}",
            presale_name(strategy.presale_mode),
            curve_name(strategy.curve_type),
            strategy.graduation_threshold.normalize()
        )
    };

    DecisionResult {
        kind: DecisionKind::Launch,
        score: risk_decision.score,
        level: risk_decision.level,
        flags,
        confidence,
        recommendation,
        degraded: failures > 0 || risk_decision.degraded,
        detail: DecisionDetail::Launch(LaunchDetail {
            strategy,
            forecast: inputs.forecast.predicted().cloned(),
            remote_risk: matches!(inputs.risk, RiskSource::Remote(_)),
        }),
    }
}

fn push_once(flags: &mut Vec<String>, flag: &str) {
    if !flags.iter().any(|f| f == flag) {
        flags.push(flag.to_string());
    }
}

fn presale_name(mode: PresaleMode) -> &'static str {
    match mode {
        PresaleMode::Fcfs => "FCFS",
        PresaleMode::Whitelist => "WHITELIST",
    }
}

fn curve_name(curve: CurveType) -> &'static str {
    match curve {
        CurveType::Linear => "LINEAR",
        CurveType::Exponential => "EXPONENTIAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn proposal() -> Metrics {
        Metrics::new()
            .with(keys::NAME, "MoonCat")
            .with(keys::CATEGORY, "meme")
            .with(keys::TARGET_MARKETCAP, 250_000)
            .with(keys::COMMUNITY_SIZE, 1_200)
            .with(keys::INITIAL_LIQUIDITY, 20_000)
            .with(keys::LIQUIDITY_LOCK_DAYS, 90)
            .with(keys::TEAM_VERIFIED, true)
            .with(keys::VESTING_ENABLED, true)
            .with(keys::CONTRACT_VERIFIED, true)
            .with(keys::TOP_HOLDER_PCT, 10)
    }

    fn oracle_strategy() -> LaunchStrategy {
        LaunchStrategy {
            presale_mode: PresaleMode::Whitelist,
            graduation_threshold: dec!(80000),
            initial_liquidity: dec!(30000),
            vesting_immediate_pct: 30,
            vesting_gradual_pct: 70,
            initial_price: dec!(0.0005),
            curve_type: CurveType::Exponential,
            anti_sniper_seconds: 300,
            confidence: dec!(0.85),
            reasoning: "similar meme launches".to_string(),
        }
    }

    fn forecast() -> LaunchForecast {
        LaunchForecast {
            optimal_graduation_threshold: 75_000.0,
            expected_graduation_hours: 36.0,
            peak_price: 0.004,
            success_probability: 0.7,
        }
    }

    fn run(
        metrics: &Metrics,
        strategy: OracleOutcome<LaunchStrategy>,
        forecast: PredictionOutcome<LaunchForecast>,
        risk: RiskSource<'_>,
    ) -> DecisionResult {
        decide(
            &LaunchInputs {
                metrics,
                strategy: &strategy,
                forecast: &forecast,
                risk,
            },
            &RiskConfig::default(),
        )
    }

    fn detail(result: &DecisionResult) -> &LaunchDetail {
        match &result.detail {
            DecisionDetail::Launch(detail) => detail,
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn oracle_strategy_with_local_risk() {
        let result = run(
            &proposal(),
            OracleOutcome::Answered(oracle_strategy()),
            PredictionOutcome::Predicted(forecast()),
            RiskSource::NotConfigured,
        );

        assert_eq!(result.kind, DecisionKind::Launch);
        assert_eq!(result.score, dec!(7.5));
        assert_eq!(result.level, RiskLevel::Low);
        assert!(!result.degraded);
        assert_eq!(result.confidence, dec!(1.0));
        assert_eq!(
            result.recommendation,
            "Launch with WHITELIST presale and EXPONENTIAL curve, graduation at 80000"
        );
        let detail = detail(&result);
        assert_eq!(detail.strategy, oracle_strategy());
        assert_eq!(detail.forecast, Some(forecast()));
        assert!(!detail.remote_risk);
    }

    #[test]
    fn oracle_failure_falls_back_to_conservative() {
        let result = run(
            &proposal(),
            OracleOutcome::Failed,
            PredictionOutcome::NotConfigured,
            RiskSource::NotConfigured,
        );

        assert!(result.degraded);
        assert_eq!(result.confidence, dec!(0.5));
        assert_eq!(result.flags, vec![DEGRADED_ORACLE_FLAG]);
        let strategy = &detail(&result).strategy;
        assert_eq!(strategy.presale_mode, PresaleMode::Fcfs);
        assert_eq!(strategy.graduation_threshold, dec!(50000));
        assert_eq!(strategy.reasoning, UNAVAILABLE_REASONING);
    }

    #[test]
    fn no_signal_uses_conservative_without_degrading() {
        let result = run(
            &proposal(),
            OracleOutcome::NoSignal,
            PredictionOutcome::NotConfigured,
            RiskSource::NotConfigured,
        );
        assert!(!result.degraded);
        assert_eq!(detail(&result).strategy.reasoning, NO_PATTERN_REASONING);
    }

    #[test]
    fn remote_risk_drives_score() {
        let mut remote = risk::assess_local(&proposal(), &RiskConfig::default());
        remote.score = dec!(2.0);
        remote.level = RiskLevel::High;
        remote.flags = vec!["Fraud pattern matched: honeypot".to_string()];
        remote.recommendation = risk::recommendation(dec!(2.0), &RiskConfig::default()).to_string();

        let result = run(
            &proposal(),
            OracleOutcome::Answered(oracle_strategy()),
            PredictionOutcome::NotConfigured,
            RiskSource::Remote(&remote),
        );

        assert_eq!(result.score, dec!(2.0));
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(result.flags, vec!["Fraud pattern matched: honeypot"]);
        assert!(result.recommendation.starts_with("Do not launch: HIGH RISK"));
        assert!(detail(&result).remote_risk);
    }

    #[test]
    fn missed_risk_reply_degrades() {
        let result = run(
            &proposal(),
            OracleOutcome::Answered(oracle_strategy()),
            PredictionOutcome::Predicted(forecast()),
            RiskSource::Unavailable,
        );
        assert!(result.degraded);
        assert_eq!(result.flags, vec![DEGRADED_RISK_REPLY_FLAG]);
        assert_eq!(result.confidence, dec!(0.5));
        assert!(!detail(&result).remote_risk);
    }

    #[test]
    fn failures_compound() {
        let result = run(
            &proposal(),
            OracleOutcome::Failed,
            PredictionOutcome::Failed,
            RiskSource::Unavailable,
        );
        assert_eq!(result.confidence, dec!(0.125));
        assert_eq!(
            result.flags,
            vec![
                DEGRADED_ORACLE_FLAG,
                DEGRADED_PREDICTION_FLAG,
                DEGRADED_RISK_REPLY_FLAG
            ]
        );
    }

    #[test]
    fn parse_strategy_normalizes_fields() {
        let strategy = parse_strategy(&json!({
            "presale_mode": "whitelist",
            "graduation_threshold": 80000,
            "initial_liquidity": "30000",
            "vesting_immediate": 30,
            "initial_price": 0.0005,
            "curve_type": "EXPONENTIAL",
            "anti_sniper_duration": 300,
            "confidence": 0.85,
            "reasoning": "similar meme launches"
        }))
        .unwrap();
        assert_eq!(strategy, oracle_strategy());
    }

    #[test]
    fn parse_strategy_rejects_bad_values() {
        let base = json!({
            "presale_mode": "FCFS",
            "graduation_threshold": 80000,
            "initial_liquidity": 30000,
            "vesting_immediate_pct": 30,
            "initial_price": 0.0005,
            "curve_type": "LINEAR",
            "anti_sniper_seconds": 300,
            "confidence": 0.85
        });
        assert!(parse_strategy(&base).is_ok());

        for (key, bad) in [
            ("presale_mode", json!("LOTTERY")),
            ("vesting_immediate_pct", json!(140)),
            ("initial_price", json!(0)),
            ("confidence", json!(2)),
            ("anti_sniper_seconds", json!(-5)),
        ] {
            let mut value = base.clone();
            value[key] = bad;
            assert!(parse_strategy(&value).is_err(), "{key} should be rejected");
        }
    }

    #[test]
    fn forecast_needs_every_output() {
        let full = Prediction::new()
            .with("optimal_graduation_threshold", 75_000.0)
            .with("expected_graduation_hours", 36.0)
            .with("peak_price", 0.004)
            .with("success_probability", 0.7);
        assert_eq!(read_forecast(&full), Some(forecast()));

        let partial = Prediction::new().with("peak_price", 0.004);
        assert_eq!(read_forecast(&partial), None);
    }

    #[test]
    fn query_shape() {
        assert_eq!(
            strategy_query(&proposal()).render(),
            "(predict-optimal-launch-config (token-name \"MoonCat\") (token-category meme) (target-marketcap 250000) (community-size 1200))"
        );
    }
}
