pub mod approval;
pub mod config;
pub mod decision;
pub mod entity;
pub mod envelope;
pub mod journal_schema;

pub use approval::{ApprovalStatus, ApprovalVerdict, PendingApproval};
pub use config::{
    AgentConfig, AgentRole, LaunchpadConfig, OracleConfig, PredictionConfig, PredictorConfig,
    RebalanceConfig, RiskConfig, RuntimeConfig,
};
pub use decision::{
    CurveType, DecisionDetail, DecisionKind, DecisionResult, LaunchDetail, LaunchForecast,
    LaunchStrategy, NoActionReason, PresaleMode, RangeRecommendation, RebalanceDetail,
    RebalanceVerdict, RiskLevel, SellOffSignal,
};
pub use entity::{metric_keys, EntityId, EntityKind, Metrics, MonitoredEntity};
pub use envelope::{
    AckStatus, AgentAddress, EntityReport, Envelope, ExecutionAction, MessageKind, Payload,
    StatusReport,
};
pub use journal_schema::{JournalEntry, JournalEventKind};
