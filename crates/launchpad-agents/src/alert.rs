use async_trait::async_trait;
use launchpad_models::{AgentAddress, DecisionResult, EntityId};
use tracing::warn;

use crate::error::AlertError;

/// Where HIGH-risk and rug-pull decisions are reported.
///
/// Called fire-and-forget from the agent loop; a slow or failing sink never
/// delays the next event.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(
        &self,
        agent: &AgentAddress,
        entity_id: &EntityId,
        decision: &DecisionResult,
    ) -> Result<(), AlertError>;
}

/// Writes alerts to the log.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(
        &self,
        agent: &AgentAddress,
        entity_id: &EntityId,
        decision: &DecisionResult,
    ) -> Result<(), AlertError> {
        warn!(
            agent = %agent,
            entity = %entity_id,
            score = %decision.score,
            level = %decision.level,
            flags = ?decision.flags,
            "ALERT: {}",
            decision.recommendation
        );
        Ok(())
    }
}
