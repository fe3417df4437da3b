use launchpad_models::{ApprovalStatus, EntityId, EntityKind, MessageKind};
use thiserror::Error;
use uuid::Uuid;

/// How the runtime reacts to a failed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// External collaborator failed. Retried once, then the event is dropped.
    Transient,
    /// The request itself is bad. Answered with an error ack.
    Protocol,
    /// A transition on something already settled. Answered `already_resolved`.
    Invariant,
    /// The agent's own state is corrupt. Only this agent's loop halts.
    Fatal,
}

/// Failure of an external command invocation.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command timed out after {0} ms")]
    Timeout(u64),

    #[error("Failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("{command} exited {status}: {stderr}")]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{0} returned empty output")]
    Empty(String),
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Knowledge oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Knowledge oracle gave no answer within {0} ms")]
    Timeout(u64),

    #[error("Knowledge oracle command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Unexpected oracle answer: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Feature vector has {actual} values, service expects {expected}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("Prediction missing output '{0}'")]
    MissingOutput(String),

    #[error("Prediction service gave no answer within {0} ms")]
    Timeout(u64),

    #[error("Prediction command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Unexpected prediction output: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Mailbox of {0} is closed")]
    Closed(String),

    #[error("Mailbox of {0} is full")]
    Full(String),
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Entity already monitored: {0}")]
    DuplicateEntity(EntityId),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("This agent monitors {expected} entities, got {actual}")]
    WrongEntityKind {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("Unknown approval: {0}")]
    UnknownApproval(Uuid),

    #[error("Unknown correlation: {0}")]
    UnknownCorrelation(Uuid),

    #[error("Correlation already registered: {0}")]
    DuplicateCorrelation(Uuid),

    #[error("Unexpected message kind: {0}")]
    UnexpectedKind(MessageKind),

    #[error("Approval {approval_id} already resolved as {current:?}")]
    AlreadyResolved {
        approval_id: Uuid,
        current: ApprovalStatus,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),

    #[error("Store error: {0}")]
    Store(#[from] launchpad_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("State corrupted: {0}")]
    Corrupt(String),
}

impl AgentError {
    pub fn class(&self) -> FaultClass {
        match self {
            AgentError::Transport(_)
            | AgentError::Oracle(_)
            | AgentError::Prediction(_)
            | AgentError::Store(_) => FaultClass::Transient,
            AgentError::AlreadyResolved { .. } => FaultClass::Invariant,
            AgentError::Corrupt(_) => FaultClass::Fatal,
            AgentError::Protocol(_)
            | AgentError::DuplicateEntity(_)
            | AgentError::UnknownEntity(_)
            | AgentError::WrongEntityKind { .. }
            | AgentError::UnknownApproval(_)
            | AgentError::UnknownCorrelation(_)
            | AgentError::DuplicateCorrelation(_)
            | AgentError::UnexpectedKind(_)
            | AgentError::Json(_) => FaultClass::Protocol,
        }
    }
}
