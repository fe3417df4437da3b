use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_models::{AgentAddress, AgentRole, MonitoredEntity, Payload, RiskConfig};

use crate::engine::risk::{self, RiskInputs};
use crate::oracle::{consult, KnowledgeOracle};
use crate::prediction::{forecast, risk_features, PredictionService, RUG_PULL_PROBABILITY};
use crate::runtime::{AgentBehavior, Evaluation};

/// Scores tokens for fraud indicators and alerts on HIGH risk or a rug pull.
pub struct RiskAnalyzer {
    oracle: Arc<dyn KnowledgeOracle>,
    classifier: Option<Arc<dyn PredictionService>>,
    config: RiskConfig,
    subscribers: Vec<AgentAddress>,
}

impl RiskAnalyzer {
    pub fn new(
        oracle: Arc<dyn KnowledgeOracle>,
        classifier: Option<Arc<dyn PredictionService>>,
        config: RiskConfig,
    ) -> Self {
        Self {
            oracle,
            classifier,
            config,
            subscribers: Vec::new(),
        }
    }

    /// Addresses that receive `evaluation_result` for every alert.
    pub fn with_subscribers(mut self, subscribers: &[String]) -> Self {
        self.subscribers = subscribers.iter().map(AgentAddress::new).collect();
        self
    }
}

#[async_trait]
impl AgentBehavior for RiskAnalyzer {
    type Pending = ();

    fn role(&self) -> AgentRole {
        AgentRole::RiskAnalyzer
    }

    async fn evaluate(&self, entity: &MonitoredEntity, _now: DateTime<Utc>) -> Evaluation<()> {
        let metrics = &entity.metrics;
        let fraud_patterns = consult(
            self.oracle.as_ref(),
            &risk::risk_query(metrics),
            risk::parse_fraud_patterns,
        )
        .await;
        let rug_pull_probability = forecast(
            self.classifier.as_deref(),
            &risk_features(metrics),
            |prediction| prediction.get(RUG_PULL_PROBABILITY),
        )
        .await;

        let decision = risk::assess(
            &RiskInputs {
                metrics,
                fraud_patterns: &fraud_patterns,
                rug_pull_probability: &rug_pull_probability,
            },
            &self.config,
        );

        let alert = risk::needs_alert(&decision);
        let mut evaluation = Evaluation::decided(decision.clone());
        if alert {
            evaluation.alert = true;
            evaluation.counters.push("alerts_raised");
            evaluation.outbound = self
                .subscribers
                .iter()
                .map(|subscriber| {
                    (
                        subscriber.clone(),
                        Payload::EvaluationResult {
                            entity_id: entity.id.clone(),
                            result: decision.clone(),
                        },
                    )
                })
                .collect();
        }
        evaluation
    }
}
