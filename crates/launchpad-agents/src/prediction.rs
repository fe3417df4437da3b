use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use launchpad_models::{metric_keys as keys, Metrics};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PredictionError;
use crate::oracle::DEFAULT_CALL_TIMEOUT;
use crate::parser::{parse_answer, RawAnswer};
use crate::process::{invoke, CommandSpec};

/// Inputs of the risk classifier.
pub const RISK_FEATURE_COUNT: usize = 13;
/// Inputs of the bonding-curve forecaster.
pub const LAUNCH_FEATURE_COUNT: usize = 15;

pub const RUG_PULL_PROBABILITY: &str = "rug_pull_probability";
pub const LAUNCH_OUTPUTS: [&str; 4] = [
    "optimal_graduation_threshold",
    "expected_graduation_hours",
    "peak_price",
    "success_probability",
];

/// Fixed-length numeric model input.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Named numeric model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction(BTreeMap<String, f64>);

impl Prediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }
}

/// External numeric forecasting service. Mockable for testing.
#[async_trait]
pub trait PredictionService: Send + Sync {
    fn name(&self) -> &str;

    /// Number of features the model was built for.
    fn feature_count(&self) -> usize;

    /// Output fields every prediction must carry.
    fn outputs(&self) -> &[String];

    /// Longest wait for one prediction. Past it the call counts as failed.
    fn call_timeout(&self) -> Duration {
        DEFAULT_CALL_TIMEOUT
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictionError>;
}

/// What the decision engine receives from one prediction call.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome<T> {
    Predicted(T),
    /// No service configured for this role. Not a degradation.
    NotConfigured,
    Failed,
}

impl<T> PredictionOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, PredictionOutcome::Failed)
    }

    pub fn predicted(&self) -> Option<&T> {
        match self {
            PredictionOutcome::Predicted(value) => Some(value),
            _ => None,
        }
    }
}

/// Call a service, failing closed on any shape mismatch in either direction.
pub async fn predict_checked(
    service: &dyn PredictionService,
    features: &FeatureVector,
) -> Result<Prediction, PredictionError> {
    if features.len() != service.feature_count() {
        return Err(PredictionError::FeatureCount {
            expected: service.feature_count(),
            actual: features.len(),
        });
    }

    let prediction = service.predict(features).await?;
    for output in service.outputs() {
        match prediction.get(output) {
            Some(value) if value.is_finite() => {}
            Some(_) => {
                return Err(PredictionError::Malformed(format!(
                    "'{output}' is not finite"
                )))
            }
            None => return Err(PredictionError::MissingOutput(output.clone())),
        }
    }
    Ok(prediction)
}

/// Run an optional service and map the result into an engine input.
pub async fn forecast<T>(
    service: Option<&dyn PredictionService>,
    features: &FeatureVector,
    read: impl Fn(&Prediction) -> Option<T>,
) -> PredictionOutcome<T> {
    let Some(service) = service else {
        return PredictionOutcome::NotConfigured;
    };

    debug!(service = service.name(), features = features.len(), "Requesting prediction");
    let bound = service.call_timeout();
    let result = tokio::time::timeout(bound, predict_checked(service, features))
        .await
        .unwrap_or_else(|_| Err(PredictionError::Timeout(bound.as_millis() as u64)));
    match result {
        Ok(prediction) => match read(&prediction) {
            Some(value) => PredictionOutcome::Predicted(value),
            None => {
                warn!(service = service.name(), "Prediction lacks required outputs");
                PredictionOutcome::Failed
            }
        },
        Err(e) => {
            warn!(service = service.name(), error = %e, "Prediction failed");
            PredictionOutcome::Failed
        }
    }
}

fn flag(metrics: &Metrics, key: &str, default: bool) -> f64 {
    if metrics.bool(key).unwrap_or(default) {
        1.0
    } else {
        0.0
    }
}

fn number(metrics: &Metrics, key: &str, default: f64) -> f64 {
    metrics.f64(key).unwrap_or(default)
}

/// Risk classifier inputs: four binary safety flags followed by nine
/// normalized numeric observations.
pub fn risk_features(metrics: &Metrics) -> FeatureVector {
    let fcfs = metrics.str(keys::PRESALE_MODE) == Some("FCFS");
    FeatureVector::new(vec![
        flag(metrics, keys::LIQUIDITY_LOCKED, false),
        flag(metrics, keys::TEAM_VERIFIED, false),
        flag(metrics, keys::CONTRACT_VERIFIED, false),
        flag(metrics, keys::VESTING_ENABLED, false),
        number(metrics, keys::LIQUIDITY_LOCK_DAYS, 0.0) / 365.0,
        number(metrics, keys::TOP_HOLDER_PCT, 0.0) / 100.0,
        number(metrics, keys::GRADUATION_TIME_HOURS, 168.0) / 168.0,
        number(metrics, keys::INITIAL_LIQUIDITY, 0.0) / 100_000.0,
        if fcfs { 1.0 } else { 0.5 },
        (number(metrics, keys::HOLDER_COUNT, 0.0) / 10_000.0).min(1.0),
        (number(metrics, keys::VOLUME_24H, 0.0) / 1_000_000.0).min(1.0),
        (number(metrics, keys::PRICE_VOLATILITY, 0.0) / 0.5).min(1.0),
        (number(metrics, keys::AVG_WALLET_AGE_DAYS, 0.0) / 365.0).min(1.0),
    ])
}

/// Bonding-curve forecaster inputs: one-hot category (meme, utility,
/// governance) followed by twelve normalized launch parameters.
pub fn launch_features(metrics: &Metrics) -> FeatureVector {
    let category = match metrics.str(keys::CATEGORY).unwrap_or("utility") {
        "meme" => 0,
        "governance" => 2,
        _ => 1,
    };
    let mut values: Vec<f64> = (0..3).map(|i| if i == category { 1.0 } else { 0.0 }).collect();

    let fcfs = metrics.str(keys::PRESALE_MODE) == Some("FCFS");
    values.extend([
        number(metrics, keys::TARGET_MARKETCAP, 100_000.0) / 1_000_000.0,
        number(metrics, keys::COMMUNITY_SIZE, 1_000.0) / 10_000.0,
        number(metrics, keys::INITIAL_PRICE, 0.001) * 1_000.0,
        if fcfs { 1.0 } else { 0.0 },
        number(metrics, keys::SIMILAR_LAUNCHES, 10.0) / 50.0,
        number(metrics, keys::MARKET_SENTIMENT, 0.5),
        number(metrics, keys::VOLUME_INDICATOR, 0.5),
        number(metrics, keys::TOP_HOLDER_PCT, 20.0) / 100.0,
        number(metrics, keys::INITIAL_LIQUIDITY, 50_000.0) / 100_000.0,
        flag(metrics, keys::VESTING_ENABLED, true),
        flag(metrics, keys::TEAM_VERIFIED, true),
        flag(metrics, keys::CONTRACT_VERIFIED, true),
    ]);
    FeatureVector::new(values)
}

/// Prediction service backed by an external command.
///
/// The feature vector is passed as a JSON array in the last argument; stdout
/// must be a JSON object of numeric outputs.
pub struct CommandPredictor {
    name: String,
    spec: CommandSpec,
    feature_count: usize,
    outputs: Vec<String>,
}

impl CommandPredictor {
    pub fn new(name: &str, spec: CommandSpec, feature_count: usize, outputs: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            spec,
            feature_count,
            outputs,
        }
    }
}

#[async_trait]
impl PredictionService for CommandPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn call_timeout(&self) -> Duration {
        self.spec.timeout
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictionError> {
        let input = serde_json::to_string(features.values())
            .map_err(|e| PredictionError::Malformed(e.to_string()))?;
        let raw = invoke(&self.spec, &input).await?;

        let object = match parse_answer(&raw) {
            Some(RawAnswer::Object(Value::Object(map))) => map,
            _ => {
                return Err(PredictionError::Malformed(format!(
                    "expected a JSON object (length={})",
                    raw.len()
                )))
            }
        };

        let mut prediction = Prediction::new();
        for (name, value) in &object {
            if let Some(number) = value.as_f64() {
                prediction = prediction.with(name, number);
            }
        }
        Ok(prediction)
    }
}
