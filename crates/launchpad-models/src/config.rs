use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

// Risk rule defaults. Higher scores are safer.
pub const DEFAULT_BASE_SCORE: Decimal = dec!(7.5);
pub const DEFAULT_MIN_LOCK_DAYS: Decimal = dec!(30);
pub const DEFAULT_LOCK_DEDUCTION: Decimal = dec!(2.0);
pub const DEFAULT_TEAM_DEDUCTION: Decimal = dec!(1.5);
pub const DEFAULT_VESTING_DEDUCTION: Decimal = dec!(1.0);
pub const DEFAULT_CONTRACT_DEDUCTION: Decimal = dec!(1.0);
pub const DEFAULT_MAX_HOLDER_CONCENTRATION_PCT: Decimal = dec!(30);
pub const DEFAULT_CONCENTRATION_DEDUCTION: Decimal = dec!(2.0);
pub const DEFAULT_MIN_GRADUATION_HOURS: Decimal = dec!(24);
pub const DEFAULT_RAPID_GRADUATION_DEDUCTION: Decimal = dec!(1.5);
pub const DEFAULT_FRAUD_PATTERN_DEDUCTION: Decimal = dec!(1.0);
pub const DEFAULT_HIGH_RISK_BELOW: Decimal = dec!(4);
pub const DEFAULT_MEDIUM_RISK_BELOW: Decimal = dec!(7);
pub const DEFAULT_CONFIDENCE_FLOOR: Decimal = dec!(0.10);
pub const DEFAULT_DEGRADED_CONFIDENCE_FACTOR: Decimal = dec!(0.5);
pub const DEFAULT_RAPID_SELL_OFF_PCT: Decimal = dec!(20);
// Recommendation bands, each an exclusive upper bound on the score.
pub const DEFAULT_AVOID_BELOW: Decimal = dec!(3);
pub const DEFAULT_EXTREME_CAUTION_BELOW: Decimal = dec!(5);
pub const DEFAULT_EXPERIENCED_ONLY_BELOW: Decimal = dec!(7);
pub const DEFAULT_DUE_DILIGENCE_BELOW: Decimal = dec!(8.5);

// Rebalance defaults.
pub const DEFAULT_MIN_IMPROVEMENT_PCT: Decimal = dec!(5.0);
pub const DEFAULT_MIN_ORACLE_CONFIDENCE: Decimal = dec!(0.80);
pub const DEFAULT_REBALANCE_COOLDOWN_SECONDS: u64 = 86_400;
pub const DEFAULT_MIN_HARVEST_FEES: Decimal = dec!(1.0);
pub const DEFAULT_HARVEST_GAS_COST: Decimal = dec!(0.001);

/// Top-level configuration for a launchpad process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchpadConfig {
    pub runtime: RuntimeConfig,
    pub oracle: OracleConfig,
    pub prediction: PredictionConfig,
    pub risk: RiskConfig,
    pub rebalance: RebalanceConfig,
    pub agents: Vec<AgentConfig>,
}

impl Default for LaunchpadConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            oracle: OracleConfig::default(),
            prediction: PredictionConfig::default(),
            risk: RiskConfig::default(),
            rebalance: RebalanceConfig::default(),
            agents: default_agents(),
        }
    }
}

/// Settings shared by every agent runtime in the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bounded mailbox size per agent.
    pub mailbox_capacity: usize,
    /// How often correlation timeouts and approval deadlines are swept.
    pub sweep_interval_ms: u64,
    /// Maximum number of remembered envelope ids for duplicate suppression.
    pub dedup_capacity: u64,
    pub dedup_ttl_seconds: u64,
    /// SQLite file for the decision journal. In-memory when absent.
    pub journal_path: Option<String>,
    /// Journal rows included in a `report`.
    pub report_history_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            sweep_interval_ms: 1_000,
            dedup_capacity: 10_000,
            dedup_ttl_seconds: 600,
            journal_path: None,
            report_history_limit: 10,
        }
    }
}

/// Process-backed knowledge oracle. No command means the oracle is unavailable
/// and every decision runs on local rules in degraded mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PredictionConfig {
    /// Risk classifier (rug-pull probability).
    pub risk: Option<PredictorConfig>,
    /// Bonding-curve forecaster.
    pub launch: Option<PredictorConfig>,
}

/// A process-backed prediction service with a fixed input/output shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_predictor_timeout")]
    pub timeout_ms: u64,
    pub feature_count: usize,
    pub outputs: Vec<String>,
}

/// Risk rule thresholds and deductions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub base_score: Decimal,
    pub min_lock_days: Decimal,
    pub lock_deduction: Decimal,
    pub team_deduction: Decimal,
    pub vesting_deduction: Decimal,
    pub contract_deduction: Decimal,
    pub max_holder_concentration_pct: Decimal,
    pub concentration_deduction: Decimal,
    pub min_graduation_hours: Decimal,
    pub rapid_graduation_deduction: Decimal,
    /// Deducted once per fraud pattern the oracle matches.
    pub fraud_pattern_deduction: Decimal,
    /// Scores strictly below this are HIGH risk.
    pub high_risk_below: Decimal,
    /// Scores strictly below this (and not HIGH) are MEDIUM risk.
    pub medium_risk_below: Decimal,
    /// Confidence when none of the required inputs are present.
    pub confidence_floor: Decimal,
    /// Multiplier applied to confidence when an external collaborator failed.
    pub degraded_confidence_factor: Decimal,
    /// Price drop over the recent window that counts as a sell-off.
    pub rapid_sell_off_pct: Decimal,
    /// Below this the advice is not to invest.
    pub avoid_below: Decimal,
    pub extreme_caution_below: Decimal,
    pub experienced_only_below: Decimal,
    /// At or above this the token is reported as low risk.
    pub due_diligence_below: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_score: DEFAULT_BASE_SCORE,
            min_lock_days: DEFAULT_MIN_LOCK_DAYS,
            lock_deduction: DEFAULT_LOCK_DEDUCTION,
            team_deduction: DEFAULT_TEAM_DEDUCTION,
            vesting_deduction: DEFAULT_VESTING_DEDUCTION,
            contract_deduction: DEFAULT_CONTRACT_DEDUCTION,
            max_holder_concentration_pct: DEFAULT_MAX_HOLDER_CONCENTRATION_PCT,
            concentration_deduction: DEFAULT_CONCENTRATION_DEDUCTION,
            min_graduation_hours: DEFAULT_MIN_GRADUATION_HOURS,
            rapid_graduation_deduction: DEFAULT_RAPID_GRADUATION_DEDUCTION,
            fraud_pattern_deduction: DEFAULT_FRAUD_PATTERN_DEDUCTION,
            high_risk_below: DEFAULT_HIGH_RISK_BELOW,
            medium_risk_below: DEFAULT_MEDIUM_RISK_BELOW,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            degraded_confidence_factor: DEFAULT_DEGRADED_CONFIDENCE_FACTOR,
            rapid_sell_off_pct: DEFAULT_RAPID_SELL_OFF_PCT,
            avoid_below: DEFAULT_AVOID_BELOW,
            extreme_caution_below: DEFAULT_EXTREME_CAUTION_BELOW,
            experienced_only_below: DEFAULT_EXPERIENCED_ONLY_BELOW,
            due_diligence_below: DEFAULT_DUE_DILIGENCE_BELOW,
        }
    }
}

/// Gates for acting on an oracle range recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Expected APR improvement (percentage points) must exceed this.
    pub min_improvement_pct: Decimal,
    /// Oracle confidence must exceed this.
    pub min_oracle_confidence: Decimal,
    /// Minimum time between two actions on the same position.
    pub cooldown_seconds: u64,
    pub min_harvest_fees: Decimal,
    /// Fees must cover at least twice this cost before harvesting.
    pub harvest_gas_cost: Decimal,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            min_improvement_pct: DEFAULT_MIN_IMPROVEMENT_PCT,
            min_oracle_confidence: DEFAULT_MIN_ORACLE_CONFIDENCE,
            cooldown_seconds: DEFAULT_REBALANCE_COOLDOWN_SECONDS,
            min_harvest_fees: DEFAULT_MIN_HARVEST_FEES,
            harvest_gas_cost: DEFAULT_HARVEST_GAS_COST,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    RiskAnalyzer,
    LiquidityOptimizer,
    LaunchCoordinator,
}

impl AgentRole {
    /// The entity kind an agent of this role schedules for re-evaluation.
    pub fn monitored_kind(&self) -> EntityKind {
        match self {
            AgentRole::RiskAnalyzer => EntityKind::Token,
            AgentRole::LiquidityOptimizer => EntityKind::Position,
            AgentRole::LaunchCoordinator => EntityKind::Launch,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::RiskAnalyzer => "risk_analyzer",
            AgentRole::LiquidityOptimizer => "liquidity_optimizer",
            AgentRole::LaunchCoordinator => "launch_coordinator",
        }
    }

    fn default_period_seconds(&self) -> u64 {
        match self {
            AgentRole::RiskAnalyzer => 600,
            AgentRole::LiquidityOptimizer => 300,
            AgentRole::LaunchCoordinator => 600,
        }
    }
}

/// Configuration for a single agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    pub role: AgentRole,
    /// Scheduling period. Defaults per role.
    #[serde(default)]
    pub period_seconds: Option<u64>,
    /// Entities evaluated more recently than this are skipped by a tick.
    #[serde(default = "default_min_reevaluation")]
    pub min_reevaluation_seconds: u64,
    /// Timeout for requests that expect a reply from another agent.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Deadline for human approval of a proposal.
    #[serde(default = "default_approval_ttl")]
    pub approval_ttl_seconds: u64,
    /// Addresses that receive `evaluation_result` notifications for HIGH risk.
    #[serde(default)]
    pub alert_subscribers: Vec<String>,
    /// Address that carries out approved strategies and rebalances.
    #[serde(default)]
    pub execution_agent: Option<String>,
    /// Risk analyzer consulted by the launch coordinator.
    #[serde(default)]
    pub risk_agent: Option<String>,
}

impl AgentConfig {
    pub fn new(name: &str, role: AgentRole) -> Self {
        Self {
            name: name.to_string(),
            role,
            period_seconds: None,
            min_reevaluation_seconds: default_min_reevaluation(),
            request_timeout_seconds: default_request_timeout(),
            approval_ttl_seconds: default_approval_ttl(),
            alert_subscribers: Vec::new(),
            execution_agent: None,
            risk_agent: None,
        }
    }

    pub fn period_seconds(&self) -> u64 {
        self.period_seconds
            .unwrap_or_else(|| self.role.default_period_seconds())
    }
}

fn default_agents() -> Vec<AgentConfig> {
    let mut coordinator = AgentConfig::new("launch_coordinator", AgentRole::LaunchCoordinator);
    coordinator.risk_agent = Some("risk_analyzer".to_string());
    vec![
        AgentConfig::new("risk_analyzer", AgentRole::RiskAnalyzer),
        AgentConfig::new("liquidity_optimizer", AgentRole::LiquidityOptimizer),
        coordinator,
    ]
}

fn default_min_reevaluation() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}
fn default_approval_ttl() -> u64 {
    3_600
}
fn default_predictor_timeout() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_a_complete_config() {
        let config: LaunchpadConfig = toml::from_str("").unwrap();
        assert_eq!(config.agents.len(), 3);
        assert_eq!(config.risk.base_score, dec!(7.5));
        assert_eq!(config.rebalance.cooldown_seconds, 86_400);
        assert!(config.oracle.command.is_none());
        assert!(config.prediction.risk.is_none());
    }

    #[test]
    fn default_agents_wire_coordinator_to_risk_analyzer() {
        let agents = default_agents();
        let coordinator = agents
            .iter()
            .find(|a| a.role == AgentRole::LaunchCoordinator)
            .unwrap();
        assert_eq!(coordinator.risk_agent.as_deref(), Some("risk_analyzer"));
    }

    #[test]
    fn period_defaults_per_role() {
        assert_eq!(AgentConfig::new("r", AgentRole::RiskAnalyzer).period_seconds(), 600);
        assert_eq!(
            AgentConfig::new("l", AgentRole::LiquidityOptimizer).period_seconds(),
            300
        );
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[runtime]
sweep_interval_ms = 250
journal_path = "/tmp/journal.db"

[oracle]
command = "metta-bridge"
args = ["--kb", "defi_knowledge.metta"]
timeout_ms = 2000

[prediction.risk]
command = "risk-model"
feature_count = 13
outputs = ["rug_pull_probability"]

[risk]
high_risk_below = "5"

[rebalance]
cooldown_seconds = 3600

[[agents]]
name = "risk"
role = "risk_analyzer"
period_seconds = 30
alert_subscribers = ["ops"]

[[agents]]
name = "coordinator"
role = "launch_coordinator"
risk_agent = "risk"
execution_agent = "solana_executor"
"#;

        let config: LaunchpadConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runtime.sweep_interval_ms, 250);
        assert_eq!(config.runtime.mailbox_capacity, 256);
        assert_eq!(config.oracle.command.as_deref(), Some("metta-bridge"));
        let risk_model = config.prediction.risk.as_ref().unwrap();
        assert_eq!(risk_model.feature_count, 13);
        assert_eq!(risk_model.timeout_ms, 5_000);
        assert_eq!(config.risk.high_risk_below, dec!(5));
        assert_eq!(config.risk.medium_risk_below, dec!(7));
        assert_eq!(config.rebalance.cooldown_seconds, 3600);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].period_seconds(), 30);
        assert_eq!(config.agents[0].min_reevaluation_seconds, 60);
        assert_eq!(config.agents[1].execution_agent.as_deref(), Some("solana_executor"));
    }

    #[test]
    fn roundtrip_config() {
        let config = LaunchpadConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LaunchpadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
