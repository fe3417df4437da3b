use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_models::{
    metric_keys as keys, AgentAddress, AgentRole, DecisionDetail, EntityId, ExecutionAction,
    Metrics, MonitoredEntity, Payload, RebalanceConfig, RebalanceVerdict, RiskConfig,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::rebalance::{self, RebalanceInputs};
use crate::error::AgentError;
use crate::oracle::{consult, KnowledgeOracle};
use crate::runtime::{AgentBehavior, AgentContext, Evaluation};

/// Keeps concentrated-liquidity positions in a productive range and
/// harvests fees worth claiming.
pub struct LiquidityOptimizer {
    oracle: Arc<dyn KnowledgeOracle>,
    rebalance: RebalanceConfig,
    risk: RiskConfig,
    execution_agent: Option<AgentAddress>,
}

impl LiquidityOptimizer {
    pub fn new(
        oracle: Arc<dyn KnowledgeOracle>,
        rebalance: RebalanceConfig,
        risk: RiskConfig,
        execution_agent: Option<AgentAddress>,
    ) -> Self {
        Self {
            oracle,
            rebalance,
            risk,
            execution_agent,
        }
    }
}

#[async_trait]
impl AgentBehavior for LiquidityOptimizer {
    type Pending = ();

    fn role(&self) -> AgentRole {
        AgentRole::LiquidityOptimizer
    }

    async fn evaluate(&self, entity: &MonitoredEntity, now: DateTime<Utc>) -> Evaluation<()> {
        let metrics = &entity.metrics;
        let recommendation = consult(
            self.oracle.as_ref(),
            &rebalance::range_query(metrics),
            rebalance::parse_range,
        )
        .await;

        let decision = rebalance::decide(
            &RebalanceInputs {
                metrics,
                recommendation: &recommendation,
                last_action_at: entity.last_action_at,
                now,
            },
            &self.rebalance,
            &self.risk,
        );

        let mut evaluation = Evaluation::decided(decision.clone());
        let DecisionDetail::Rebalance(detail) = &decision.detail else {
            return evaluation;
        };

        let wants_action = detail.harvest_fees || decision.is_actionable();
        let Some(executor) = &self.execution_agent else {
            if wants_action {
                warn!(entity = %entity.id, "Action recommended but no execution agent is configured");
            }
            return evaluation;
        };

        let mut updates = Metrics::new();
        if let RebalanceVerdict::Rebalance { lower, upper } = &detail.verdict {
            evaluation.outbound.push((
                executor.clone(),
                Payload::ExecuteStrategy {
                    entity_id: entity.id.clone(),
                    approval_id: None,
                    action: ExecutionAction::Rebalance {
                        lower: *lower,
                        upper: *upper,
                    },
                },
            ));
            updates.insert(keys::PENDING_RANGE_LOWER, lower.to_string());
            updates.insert(keys::PENDING_RANGE_UPPER, upper.to_string());
            evaluation.acted = true;
            evaluation.counters.push("rebalances_proposed");
        }

        if let Some(amount) = rebalance::harvestable_fees(metrics, &self.rebalance) {
            evaluation.outbound.push((
                executor.clone(),
                Payload::ExecuteStrategy {
                    entity_id: entity.id.clone(),
                    approval_id: None,
                    action: ExecutionAction::HarvestFees { amount },
                },
            ));
            updates.insert(keys::UNCLAIMED_FEES, 0);
            updates.insert(keys::PENDING_HARVEST, amount.to_string());
            evaluation.counters.push("harvests_proposed");
        }

        if !updates.is_empty() {
            evaluation.metric_updates = Some(updates);
        }
        evaluation
    }

    /// Settle whatever was sent for execution on this position.
    async fn on_execution(
        &mut self,
        ctx: &mut AgentContext<()>,
        entity_id: &EntityId,
        success: bool,
    ) -> Result<(), AgentError> {
        let Some(entity) = ctx.store.get(entity_id) else {
            return Ok(());
        };
        let metrics = &entity.metrics;
        let mut updates = Metrics::new();
        let mut counters = Vec::new();

        if let (Some(lower), Some(upper)) = (
            metrics.decimal(keys::PENDING_RANGE_LOWER),
            metrics.decimal(keys::PENDING_RANGE_UPPER),
        ) {
            if success {
                updates.insert(keys::RANGE_LOWER, lower.to_string());
                updates.insert(keys::RANGE_UPPER, upper.to_string());
                counters.push("rebalances_succeeded");
            } else {
                counters.push("rebalances_failed");
            }
            updates.insert(keys::PENDING_RANGE_LOWER, Value::Null);
            updates.insert(keys::PENDING_RANGE_UPPER, Value::Null);
        }

        if let Some(amount) = metrics.decimal(keys::PENDING_HARVEST) {
            if success {
                let total = metrics.decimal(keys::FEES_HARVESTED).unwrap_or_default() + amount;
                updates.insert(keys::FEES_HARVESTED, total.to_string());
                counters.push("harvests_succeeded");
            } else {
                // Fees stay claimable for the next evaluation.
                let unclaimed = metrics.decimal(keys::UNCLAIMED_FEES).unwrap_or_default() + amount;
                updates.insert(keys::UNCLAIMED_FEES, unclaimed.to_string());
                counters.push("harvests_failed");
            }
            updates.insert(keys::PENDING_HARVEST, Value::Null);
        }

        if counters.is_empty() {
            debug!(entity = %entity_id, "Execution result with nothing pending");
            return Ok(());
        }
        info!(entity = %entity_id, success, settled = ?counters, "Execution settled");
        for counter in counters {
            ctx.bump(counter);
        }
        ctx.store.update_metrics(entity_id, updates)
    }
}
