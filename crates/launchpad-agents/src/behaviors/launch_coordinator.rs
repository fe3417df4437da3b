use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_models::{
    metric_keys as keys, AgentAddress, AgentRole, ApprovalStatus, DecisionDetail, DecisionKind,
    DecisionResult, EntityId, EntityKind, Envelope, ExecutionAction, LaunchForecast,
    LaunchStrategy, Metrics, MonitoredEntity, Payload, PendingApproval, RiskConfig, RiskLevel,
};
use tracing::{debug, info, warn};

use crate::correlation::CorrelationEntry;
use crate::engine::launch::{self, LaunchInputs, RiskSource};
use crate::error::AgentError;
use crate::oracle::{consult, KnowledgeOracle, OracleOutcome};
use crate::prediction::{forecast, launch_features, PredictionOutcome, PredictionService};
use crate::runtime::{AgentBehavior, AgentContext, CommandOutcome, Evaluation};

/// A launch evaluation waiting on the risk analyzer's verdict.
#[derive(Debug)]
pub struct PendingLaunch {
    pub launch_id: EntityId,
    pub generation: u64,
    pub strategy: OracleOutcome<LaunchStrategy>,
    pub forecast: PredictionOutcome<LaunchForecast>,
    /// Proposer to open an approval for, on the first decision only.
    pub proposer: Option<AgentAddress>,
}

/// Context kept for each request sent to the risk analyzer.
#[derive(Debug)]
pub enum LaunchRequest {
    /// Registration of the launch's token. Only the acknowledgement comes back.
    Registration { launch_id: EntityId },
    RiskReport(PendingLaunch),
}

/// Plans token launches: combines a strategy from the oracle, a bonding-curve
/// forecast and the risk analyzer's verdict, then asks a human to approve.
pub struct LaunchCoordinator {
    oracle: Arc<dyn KnowledgeOracle>,
    forecaster: Option<Arc<dyn PredictionService>>,
    risk: RiskConfig,
    risk_agent: Option<AgentAddress>,
    execution_agent: Option<AgentAddress>,
    /// Who proposed each launch.
    proposals: HashMap<EntityId, AgentAddress>,
}

impl LaunchCoordinator {
    pub fn new(
        oracle: Arc<dyn KnowledgeOracle>,
        forecaster: Option<Arc<dyn PredictionService>>,
        risk: RiskConfig,
        risk_agent: Option<AgentAddress>,
        execution_agent: Option<AgentAddress>,
    ) -> Self {
        Self {
            oracle,
            forecaster,
            risk,
            risk_agent,
            execution_agent,
            proposals: HashMap::new(),
        }
    }

    /// Finish a launch evaluation once the risk source is known.
    async fn complete(
        &self,
        ctx: &mut AgentContext<LaunchRequest>,
        pending: PendingLaunch,
        risk: RiskSource<'_>,
    ) -> Result<(), AgentError> {
        let Some(entity) = ctx.store.get(&pending.launch_id) else {
            debug!(launch = %pending.launch_id, "Launch removed before the risk analyzer answered");
            return Ok(());
        };

        let decision = launch::decide(
            &LaunchInputs {
                metrics: &entity.metrics,
                strategy: &pending.strategy,
                forecast: &pending.forecast,
                risk,
            },
            &self.risk,
        );
        let evaluation = conclude(&pending.launch_id, decision, pending.proposer);
        ctx.commit(&pending.launch_id, pending.generation, evaluation, Utc::now())
            .await?;
        Ok(())
    }
}

/// Wrap a launch decision: HIGH risk goes straight back to the proposer,
/// anything else waits on an approval.
fn conclude(
    launch_id: &EntityId,
    decision: DecisionResult,
    proposer: Option<AgentAddress>,
) -> Evaluation<LaunchRequest> {
    let blocked = decision.level == RiskLevel::High;
    let mut evaluation = Evaluation::decided(decision.clone());
    match proposer {
        Some(proposer) if blocked => {
            evaluation.outbound.push((
                proposer,
                Payload::EvaluationResult {
                    entity_id: launch_id.clone(),
                    result: decision,
                },
            ));
            evaluation.counters.push("launches_blocked");
        }
        Some(proposer) => evaluation.propose_to = Some(proposer),
        None => {}
    }
    evaluation
}

/// The risk analyzer's decision from a `get_report` answer, if it had one.
fn remote_risk(reply: &Envelope) -> Option<&DecisionResult> {
    match &reply.payload {
        Payload::Report(report) => report
            .latest
            .as_ref()
            .filter(|decision| decision.kind == DecisionKind::Risk),
        _ => None,
    }
}

#[async_trait]
impl AgentBehavior for LaunchCoordinator {
    type Pending = LaunchRequest;

    fn role(&self) -> AgentRole {
        AgentRole::LaunchCoordinator
    }

    async fn evaluate(
        &self,
        entity: &MonitoredEntity,
        _now: DateTime<Utc>,
    ) -> Evaluation<LaunchRequest> {
        let metrics = &entity.metrics;
        let strategy = consult(
            self.oracle.as_ref(),
            &launch::strategy_query(metrics),
            launch::parse_strategy,
        )
        .await;
        let forecast = forecast(
            self.forecaster.as_deref(),
            &launch_features(metrics),
            launch::read_forecast,
        )
        .await;

        let first = entity.last_decision.is_none();
        let proposer = if first {
            self.proposals.get(&entity.id).cloned()
        } else {
            None
        };

        let Some(risk_agent) = &self.risk_agent else {
            let decision = launch::decide(
                &LaunchInputs {
                    metrics,
                    strategy: &strategy,
                    forecast: &forecast,
                    risk: RiskSource::NotConfigured,
                },
                &self.risk,
            );
            return conclude(&entity.id, decision, proposer);
        };

        let token_id = EntityId::new(metrics.str(keys::TOKEN_ADDRESS).unwrap_or(entity.id.as_str()));
        let mut evaluation = Evaluation::pending();
        if first {
            evaluation.requests.push((
                risk_agent.clone(),
                Payload::AddEntity {
                    entity_id: token_id.clone(),
                    entity_kind: EntityKind::Token,
                    metrics: metrics.clone(),
                },
                LaunchRequest::Registration {
                    launch_id: entity.id.clone(),
                },
            ));
        }
        evaluation.requests.push((
            risk_agent.clone(),
            Payload::GetReport { entity_id: token_id },
            LaunchRequest::RiskReport(PendingLaunch {
                launch_id: entity.id.clone(),
                generation: entity.generation,
                strategy,
                forecast,
                proposer,
            }),
        ));
        evaluation
    }

    async fn on_command(
        &mut self,
        ctx: &mut AgentContext<LaunchRequest>,
        envelope: &Envelope,
    ) -> Result<CommandOutcome, AgentError> {
        let Payload::ProposeLaunch { launch_id, metrics } = &envelope.payload else {
            return Err(AgentError::UnexpectedKind(envelope.kind()));
        };

        ctx.store
            .add(launch_id.clone(), EntityKind::Launch, metrics.clone(), Utc::now())?;
        self.proposals
            .insert(launch_id.clone(), envelope.sender.clone());
        info!(launch = %launch_id, proposer = %envelope.sender, "Launch proposed");
        Ok(CommandOutcome::Evaluate(launch_id.clone()))
    }

    async fn on_reply(
        &mut self,
        ctx: &mut AgentContext<LaunchRequest>,
        request: CorrelationEntry<LaunchRequest>,
        reply: &Envelope,
    ) -> Result<(), AgentError> {
        match request.context {
            LaunchRequest::Registration { launch_id } => {
                debug!(launch = %launch_id, kind = %reply.kind(), "Risk analyzer registration answered");
                Ok(())
            }
            LaunchRequest::RiskReport(pending) => {
                let risk = match remote_risk(reply) {
                    Some(decision) => RiskSource::Remote(decision),
                    None => {
                        warn!(launch = %pending.launch_id, kind = %reply.kind(), "Risk analyzer gave no usable decision");
                        RiskSource::Unavailable
                    }
                };
                self.complete(ctx, pending, risk).await
            }
        }
    }

    async fn on_timeout(
        &mut self,
        ctx: &mut AgentContext<LaunchRequest>,
        request: CorrelationEntry<LaunchRequest>,
    ) -> Result<(), AgentError> {
        match request.context {
            LaunchRequest::Registration { launch_id } => {
                debug!(launch = %launch_id, "Risk analyzer registration unacknowledged");
                Ok(())
            }
            LaunchRequest::RiskReport(pending) => {
                warn!(launch = %pending.launch_id, "Risk analyzer timed out, falling back to local rules");
                self.complete(ctx, pending, RiskSource::Unavailable).await
            }
        }
    }

    async fn on_approval(
        &mut self,
        ctx: &mut AgentContext<LaunchRequest>,
        approval: &PendingApproval,
    ) -> Result<(), AgentError> {
        match approval.status {
            ApprovalStatus::Approved => {
                let DecisionDetail::Launch(detail) = &approval.proposed.detail else {
                    return Ok(());
                };
                let Some(executor) = &self.execution_agent else {
                    warn!(launch = %approval.entity_id, "Launch approved but no execution agent is configured");
                    return Ok(());
                };
                ctx.send(
                    executor.clone(),
                    Payload::ExecuteStrategy {
                        entity_id: approval.entity_id.clone(),
                        approval_id: Some(approval.id),
                        action: ExecutionAction::Launch {
                            strategy: detail.strategy.clone(),
                        },
                    },
                )
                .await?;
                ctx.store.mark_action(&approval.entity_id, Utc::now());
                ctx.bump("launches_dispatched");
            }
            ApprovalStatus::Rejected | ApprovalStatus::Expired => {
                info!(launch = %approval.entity_id, status = ?approval.status, "Launch abandoned");
                ctx.bump("launches_abandoned");
            }
            ApprovalStatus::Awaiting => {}
        }
        Ok(())
    }

    async fn on_execution(
        &mut self,
        ctx: &mut AgentContext<LaunchRequest>,
        entity_id: &EntityId,
        success: bool,
    ) -> Result<(), AgentError> {
        let status = if success { "launched" } else { "failed" };
        ctx.store
            .update_metrics(entity_id, Metrics::new().with(keys::LAUNCH_STATUS, status))
    }

    fn on_removed(&mut self, entity_id: &EntityId) {
        self.proposals.remove(entity_id);
    }
}
