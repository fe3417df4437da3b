//! Scriptable collaborators and fixtures for driving agents in tests.
//!
//! The oracle and predictor answer from a script instead of an external
//! process; the transport and alert sink record what they were given.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use launchpad_models::{
    metric_keys as keys, AgentAddress, DecisionResult, EntityId, Envelope, Metrics, RuntimeConfig,
};
use launchpad_store::DecisionJournal;
use serde_json::Value;

use crate::alert::{AlertSink, TracingAlertSink};
use crate::error::{AlertError, OracleError, PredictionError, TransportError};
use crate::oracle::{KnowledgeOracle, OracleAnswer, OracleQuery};
use crate::prediction::{FeatureVector, Prediction, PredictionService};
use crate::runtime::AgentServices;
use crate::transport::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
enum Script {
    Answer(Value),
    NoSignal,
    Fail,
    /// Never answers within any reasonable bound.
    Hang,
}

const HANG: Duration = Duration::from_secs(3600);
const SCRIPTED_CALL_TIMEOUT: Duration = Duration::from_millis(100);

/// Oracle answering per predicate. Unscripted predicates get no signal.
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<String, Script>>,
    queries: Mutex<Vec<OracleQuery>>,
    call_timeout: Duration,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            call_timeout: SCRIPTED_CALL_TIMEOUT,
        }
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stall on `predicate` until the caller gives up.
    pub fn hanging(self, predicate: &str) -> Self {
        self.script(predicate, Script::Hang)
    }

    pub fn answer(self, predicate: &str, value: Value) -> Self {
        self.script(predicate, Script::Answer(value))
    }

    pub fn no_signal(self, predicate: &str) -> Self {
        self.script(predicate, Script::NoSignal)
    }

    pub fn failing(self, predicate: &str) -> Self {
        self.script(predicate, Script::Fail)
    }

    fn script(self, predicate: &str, script: Script) -> Self {
        lock(&self.scripts).insert(predicate.to_string(), script);
        self
    }

    /// Every query received, in order.
    pub fn queries(&self) -> Vec<OracleQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl KnowledgeOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn query(&self, query: &OracleQuery) -> Result<OracleAnswer, OracleError> {
        lock(&self.queries).push(query.clone());
        let script = lock(&self.scripts).get(query.predicate()).cloned();
        match script {
            Some(Script::Answer(value)) => Ok(OracleAnswer::Signal(value)),
            Some(Script::Hang) => {
                tokio::time::sleep(HANG).await;
                Ok(OracleAnswer::NoSignal)
            }
            Some(Script::Fail) => Err(OracleError::Unavailable(format!(
                "scripted failure for {}",
                query.predicate()
            ))),
            Some(Script::NoSignal) | None => Ok(OracleAnswer::NoSignal),
        }
    }
}

/// Prediction service returning a fixed prediction, or failing.
pub struct ScriptedPredictor {
    name: String,
    feature_count: usize,
    outputs: Vec<String>,
    result: Option<Prediction>,
    hang: bool,
    calls: Mutex<Vec<FeatureVector>>,
}

impl ScriptedPredictor {
    pub fn new(name: &str, feature_count: usize, prediction: Prediction) -> Self {
        Self {
            name: name.to_string(),
            feature_count,
            outputs: Vec::new(),
            result: Some(prediction),
            hang: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A service that never answers in time.
    pub fn hanging(name: &str, feature_count: usize) -> Self {
        Self {
            hang: true,
            ..Self::new(name, feature_count, Prediction::new())
        }
    }

    pub fn failing(name: &str, feature_count: usize) -> Self {
        Self {
            result: None,
            ..Self::new(name, feature_count, Prediction::new())
        }
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl PredictionService for ScriptedPredictor {
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
        SCRIPTED_CALL_TIMEOUT
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictionError> {
        lock(&self.calls).push(features.clone());
        if self.hang {
            tokio::time::sleep(HANG).await;
        }
        self.result
            .clone()
            .ok_or_else(|| PredictionError::Malformed("scripted failure".to_string()))
    }
}

/// Records every alert it receives.
#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<(AgentAddress, EntityId, DecisionResult)>>,
}

impl RecordingAlerts {
    pub fn alerts(&self) -> Vec<(AgentAddress, EntityId, DecisionResult)> {
        lock(&self.alerts).clone()
    }

    /// Alerts are delivered from a spawned task; poll until `count` arrived.
    pub async fn wait_for(&self, count: usize) -> bool {
        for _ in 0..100 {
            if lock(&self.alerts).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(
        &self,
        agent: &AgentAddress,
        entity_id: &EntityId,
        decision: &DecisionResult,
    ) -> Result<(), AlertError> {
        lock(&self.alerts).push((agent.clone(), entity_id.clone(), decision.clone()));
        Ok(())
    }
}

/// Transport that records instead of delivering.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Envelope>>,
    closed: Mutex<bool>,
    refused: Mutex<Vec<AgentAddress>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Envelope> {
        lock(&self.sent).clone()
    }

    /// Drain and return everything sent so far.
    pub fn take(&self) -> Vec<Envelope> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Make every later send fail.
    pub fn close(&self) {
        *lock(&self.closed) = true;
    }

    /// Make every later send to `address` fail.
    pub fn refuse(&self, address: &str) {
        lock(&self.refused).push(AgentAddress::from(address));
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if *lock(&self.closed) || lock(&self.refused).contains(&envelope.receiver) {
            return Err(TransportError::Closed(envelope.receiver.to_string()));
        }
        lock(&self.sent).push(envelope);
        Ok(())
    }
}

/// Services over `transport` with an in-memory journal and log-only alerts.
pub fn services(transport: Arc<dyn Transport>) -> AgentServices {
    services_with_alerts(transport, Arc::new(TracingAlertSink))
}

pub fn services_with_alerts(
    transport: Arc<dyn Transport>,
    alerts: Arc<dyn AlertSink>,
) -> AgentServices {
    AgentServices {
        transport,
        alerts,
        journal: Arc::new(
            DecisionJournal::in_memory().unwrap_or_else(|e| panic!("in-memory journal: {e}")),
        ),
        runtime: RuntimeConfig::default(),
    }
}

/// A token failing every safety rule. Scores 0.0 under default rules.
pub fn risky_token() -> Metrics {
    Metrics::new()
        .with(keys::LIQUIDITY_LOCK_DAYS, 10)
        .with(keys::TEAM_VERIFIED, false)
        .with(keys::VESTING_ENABLED, false)
        .with(keys::CONTRACT_VERIFIED, false)
        .with(keys::TOP_HOLDER_PCT, 35)
}

/// A token passing every safety rule. Scores 7.5 under default rules.
pub fn safe_token() -> Metrics {
    Metrics::new()
        .with(keys::LIQUIDITY_LOCK_DAYS, 90)
        .with(keys::TEAM_VERIFIED, true)
        .with(keys::VESTING_ENABLED, true)
        .with(keys::CONTRACT_VERIFIED, true)
        .with(keys::TOP_HOLDER_PCT, 12)
}

/// An in-range position with complete metrics.
pub fn position() -> Metrics {
    Metrics::new()
        .with(keys::POOL_ADDRESS, "pool-1")
        .with(keys::CURRENT_PRICE, 1.0)
        .with(keys::VOLATILITY_24H, 0.12)
        .with(keys::VOLUME_24H, 50_000)
        .with(keys::RANGE_LOWER, 0.9)
        .with(keys::RANGE_UPPER, 1.1)
}

/// A complete launch proposal with safe token parameters.
pub fn launch_proposal() -> Metrics {
    let mut metrics = safe_token()
        .with(keys::NAME, "MoonCat")
        .with(keys::CATEGORY, "meme")
        .with(keys::TARGET_MARKETCAP, 250_000)
        .with(keys::COMMUNITY_SIZE, 1_200)
        .with(keys::INITIAL_LIQUIDITY, 20_000);
    metrics.insert(keys::TOKEN_ADDRESS, "MOON");
    metrics
}

/// Oracle answer for `predict-optimal-liquidity-range`.
pub fn range_answer(improvement: f64, confidence: f64) -> Value {
    serde_json::json!({
        "lower": 0.95,
        "upper": 1.05,
        "confidence": confidence,
        "expected_apr_improvement": improvement,
        "reasoning": "volatility compression"
    })
}

/// Oracle answer for `predict-optimal-launch-config`.
pub fn strategy_answer() -> Value {
    serde_json::json!({
        "presale_mode": "WHITELIST",
        "graduation_threshold": 80000,
        "initial_liquidity": 30000,
        "vesting_immediate_pct": 30,
        "initial_price": 0.0005,
        "curve_type": "EXPONENTIAL",
        "anti_sniper_seconds": 300,
        "confidence": 0.85,
        "reasoning": "similar meme launches"
    })
}
