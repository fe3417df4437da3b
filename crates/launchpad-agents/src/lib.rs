pub mod alert;
pub mod approval;
pub mod behaviors;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod parser;
pub mod prediction;
pub mod process;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod transport;

pub mod test_support;

pub use alert::{AlertSink, TracingAlertSink};
pub use behaviors::{LaunchCoordinator, LiquidityOptimizer, RiskAnalyzer};
pub use error::{AgentError, FaultClass};
pub use oracle::{CommandOracle, KnowledgeOracle, UnavailableOracle};
pub use prediction::{CommandPredictor, PredictionService};
pub use runtime::{AgentBehavior, AgentHandle, AgentRuntime, AgentServices, Event};
pub use transport::{InProcessTransport, Transport};
