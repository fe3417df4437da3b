//! Launchpad - autonomous monitoring agents for token launches and liquidity
//!
//! A set of long-lived agents (risk analyzer, liquidity optimizer, launch
//! coordinator) that watch entities, score them with local rules enriched by
//! an external knowledge oracle and prediction services, and exchange
//! envelopes with each other and the outside world.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use launchpad::models::LaunchpadConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = LaunchpadConfig::default();
//! let (launchpad, mut outbox) = launchpad::spawn_agents(&config, CancellationToken::new()).await?;
//! while let Some(envelope) = outbox.recv().await {
//!     println!("{}", serde_json::to_string(&envelope)?);
//! }
//! launchpad.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use launchpad_agents as agents;
pub use launchpad_models as models;
pub use launchpad_store as store;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use launchpad_agents::process::CommandSpec;
use launchpad_agents::prediction::{LAUNCH_FEATURE_COUNT, RISK_FEATURE_COUNT};
use launchpad_agents::{
    AgentHandle, AgentRuntime, AgentServices, CommandOracle, CommandPredictor, InProcessTransport,
    KnowledgeOracle, LaunchCoordinator, LiquidityOptimizer, PredictionService, RiskAnalyzer,
    TracingAlertSink, UnavailableOracle,
};
use launchpad_models::{
    AgentAddress, AgentRole, Envelope, LaunchpadConfig, OracleConfig, PredictorConfig,
};
use launchpad_store::DecisionJournal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// An agent runtime built from configuration, not yet running.
pub enum BuiltAgent {
    Risk(AgentRuntime<RiskAnalyzer>),
    Liquidity(AgentRuntime<LiquidityOptimizer>),
    Launch(AgentRuntime<LaunchCoordinator>),
}

impl BuiltAgent {
    pub fn handle(&self) -> AgentHandle {
        match self {
            BuiltAgent::Risk(runtime) => runtime.handle(),
            BuiltAgent::Liquidity(runtime) => runtime.handle(),
            BuiltAgent::Launch(runtime) => runtime.handle(),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        match self {
            BuiltAgent::Risk(runtime) => runtime.spawn(cancel),
            BuiltAgent::Liquidity(runtime) => runtime.spawn(cancel),
            BuiltAgent::Launch(runtime) => runtime.spawn(cancel),
        }
    }
}

/// Build the configured knowledge oracle. Without a command every query
/// fails and agents run on local rules.
pub fn build_oracle(config: &OracleConfig) -> Arc<dyn KnowledgeOracle> {
    match &config.command {
        Some(command) => Arc::new(CommandOracle::new(CommandSpec::new(
            command.clone(),
            config.args.clone(),
            Duration::from_millis(config.timeout_ms),
        ))),
        None => {
            warn!("No knowledge oracle configured, decisions will be degraded");
            Arc::new(UnavailableOracle)
        }
    }
}

fn build_predictor(
    name: &str,
    config: Option<&PredictorConfig>,
    expected_features: usize,
) -> Option<Arc<dyn PredictionService>> {
    let config = config?;
    if config.feature_count != expected_features {
        warn!(
            predictor = name,
            configured = config.feature_count,
            expected = expected_features,
            "Predictor feature count mismatch, every prediction will fail"
        );
    }
    Some(Arc::new(CommandPredictor::new(
        name,
        CommandSpec::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_millis(config.timeout_ms),
        ),
        config.feature_count,
        config.outputs.clone(),
    )))
}

/// Build one runtime per configured agent.
pub fn build_agents(
    config: &LaunchpadConfig,
    services: &AgentServices,
) -> anyhow::Result<Vec<BuiltAgent>> {
    let mut names = HashSet::new();
    for agent in &config.agents {
        if !names.insert(agent.name.as_str()) {
            bail!("Duplicate agent name: {}", agent.name);
        }
    }

    let oracle = build_oracle(&config.oracle);
    let classifier = build_predictor("risk", config.prediction.risk.as_ref(), RISK_FEATURE_COUNT);
    let forecaster = build_predictor(
        "launch",
        config.prediction.launch.as_ref(),
        LAUNCH_FEATURE_COUNT,
    );

    let built = config
        .agents
        .iter()
        .map(|agent| {
            let services = services.clone();
            match agent.role {
                AgentRole::RiskAnalyzer => {
                    let behavior =
                        RiskAnalyzer::new(oracle.clone(), classifier.clone(), config.risk.clone())
                            .with_subscribers(&agent.alert_subscribers);
                    BuiltAgent::Risk(AgentRuntime::new(agent.clone(), behavior, services).0)
                }
                AgentRole::LiquidityOptimizer => {
                    let behavior = LiquidityOptimizer::new(
                        oracle.clone(),
                        config.rebalance.clone(),
                        config.risk.clone(),
                        address(&agent.execution_agent),
                    );
                    BuiltAgent::Liquidity(AgentRuntime::new(agent.clone(), behavior, services).0)
                }
                AgentRole::LaunchCoordinator => {
                    let behavior = LaunchCoordinator::new(
                        oracle.clone(),
                        forecaster.clone(),
                        config.risk.clone(),
                        address(&agent.risk_agent),
                        address(&agent.execution_agent),
                    );
                    BuiltAgent::Launch(AgentRuntime::new(agent.clone(), behavior, services).0)
                }
            }
        })
        .collect();
    Ok(built)
}

fn address(name: &Option<String>) -> Option<AgentAddress> {
    name.as_deref().map(AgentAddress::from)
}

/// Running agents wired through one in-process transport.
pub struct Launchpad {
    pub transport: Arc<InProcessTransport>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Launchpad {
    pub fn agent_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every agent and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Agent task ended abnormally");
            }
        }
    }
}

/// Start every configured agent. Envelopes for addresses outside the
/// process arrive on the returned outbox.
pub async fn spawn_agents(
    config: &LaunchpadConfig,
    cancel: CancellationToken,
) -> anyhow::Result<(Launchpad, mpsc::Receiver<Envelope>)> {
    let (transport, outbox) = InProcessTransport::with_outbox(config.runtime.mailbox_capacity);
    let journal = DecisionJournal::open(config.runtime.journal_path.as_deref())
        .context("Failed to open decision journal")?;

    let services = AgentServices {
        transport: transport.clone(),
        alerts: Arc::new(TracingAlertSink),
        journal: Arc::new(journal),
        runtime: config.runtime.clone(),
    };

    let agents = build_agents(config, &services)?;
    for agent in &agents {
        transport.register(agent.handle()).await;
    }

    let tasks = agents
        .into_iter()
        .map(|agent| agent.spawn(cancel.clone()))
        .collect::<Vec<_>>();
    info!(agents = tasks.len(), "Launchpad running");

    Ok((
        Launchpad {
            transport,
            cancel,
            tasks,
        },
        outbox,
    ))
}
