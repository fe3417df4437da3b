use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::{ApprovalStatus, ApprovalVerdict, PendingApproval};
use crate::decision::{DecisionResult, LaunchStrategy};
use crate::entity::{EntityId, EntityKind, Metrics};
use crate::journal_schema::JournalEntry;

/// Transport-level address of an agent or external caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentAddress(String);

impl AgentAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An addressed message between agents or between an agent and an external caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    pub sender: AgentAddress,
    pub receiver: AgentAddress,
    /// Id of the envelope this one answers, if any.
    #[serde(default)]
    pub in_reply_to: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    pub fn new(sender: AgentAddress, receiver: AgentAddress, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            in_reply_to: None,
            sent_at: Utc::now(),
            payload,
        }
    }

    /// Build an answer addressed back to this envelope's sender.
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            in_reply_to: Some(self.id),
            sent_at: Utc::now(),
            payload,
        }
    }

    pub fn ack(&self, status: AckStatus) -> Self {
        self.reply(Payload::Ack { status })
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    AddEntity {
        entity_id: EntityId,
        entity_kind: EntityKind,
        #[serde(default)]
        metrics: Metrics,
    },
    RemoveEntity {
        entity_id: EntityId,
    },
    UpdateMetrics {
        entity_id: EntityId,
        metrics: Metrics,
    },
    GetStatus,
    GetReport {
        entity_id: EntityId,
    },
    ProposeLaunch {
        launch_id: EntityId,
        metrics: Metrics,
    },
    ApprovalDecision {
        approval_id: Uuid,
        verdict: ApprovalVerdict,
        #[serde(default)]
        approver: Option<String>,
    },
    ExecutionResult {
        entity_id: EntityId,
        success: bool,
        #[serde(default)]
        detail: Option<String>,
    },
    Status(StatusReport),
    Report(EntityReport),
    EvaluationResult {
        entity_id: EntityId,
        result: DecisionResult,
    },
    ApprovalNotice {
        approval: PendingApproval,
    },
    ExecuteStrategy {
        entity_id: EntityId,
        #[serde(default)]
        approval_id: Option<Uuid>,
        action: ExecutionAction,
    },
    Ack {
        status: AckStatus,
    },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::AddEntity { .. } => MessageKind::AddEntity,
            Payload::RemoveEntity { .. } => MessageKind::RemoveEntity,
            Payload::UpdateMetrics { .. } => MessageKind::UpdateMetrics,
            Payload::GetStatus => MessageKind::GetStatus,
            Payload::GetReport { .. } => MessageKind::GetReport,
            Payload::ProposeLaunch { .. } => MessageKind::ProposeLaunch,
            Payload::ApprovalDecision { .. } => MessageKind::ApprovalDecision,
            Payload::ExecutionResult { .. } => MessageKind::ExecutionResult,
            Payload::Status(_) => MessageKind::Status,
            Payload::Report(_) => MessageKind::Report,
            Payload::EvaluationResult { .. } => MessageKind::EvaluationResult,
            Payload::ApprovalNotice { .. } => MessageKind::ApprovalNotice,
            Payload::ExecuteStrategy { .. } => MessageKind::ExecuteStrategy,
            Payload::Ack { .. } => MessageKind::Ack,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AddEntity,
    RemoveEntity,
    UpdateMetrics,
    GetStatus,
    GetReport,
    ProposeLaunch,
    ApprovalDecision,
    ExecutionResult,
    Status,
    Report,
    EvaluationResult,
    ApprovalNotice,
    ExecuteStrategy,
    Ack,
}

impl MessageKind {
    /// Commands that change state and are answered with an `ack`.
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            MessageKind::AddEntity
                | MessageKind::RemoveEntity
                | MessageKind::UpdateMetrics
                | MessageKind::ProposeLaunch
                | MessageKind::ApprovalDecision
                | MessageKind::ExecutionResult
        )
    }

    /// Answers and notifications. These are never acknowledged.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::Status
                | MessageKind::Report
                | MessageKind::EvaluationResult
                | MessageKind::ApprovalNotice
                | MessageKind::Ack
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// Outcome carried by an `ack`, correlated by `in_reply_to`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    /// The envelope id was already processed.
    Duplicate,
    /// The approval was already in a terminal state; nothing changed.
    AlreadyResolved { current: ApprovalStatus },
    Error { reason: String },
}

impl AckStatus {
    pub fn error(reason: impl Into<String>) -> Self {
        AckStatus::Error {
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AckStatus::Ok)
    }
}

/// Something an execution agent is asked to carry out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExecutionAction {
    Launch { strategy: LaunchStrategy },
    Rebalance { lower: Decimal, upper: Decimal },
    HarvestFees { amount: Decimal },
}

/// Answer to `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub agent: AgentAddress,
    pub role: String,
    pub monitored: usize,
    pub awaiting_approvals: usize,
    pub pending_requests: usize,
    pub counters: BTreeMap<String, u64>,
}

/// Answer to `get_report`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityReport {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub metrics: Metrics,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub latest: Option<DecisionResult>,
    /// Most recent journal rows for the entity, newest first.
    pub history: Vec<JournalEntry>,
}
