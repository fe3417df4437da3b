//! The three agent roles.

mod launch_coordinator;
mod liquidity_optimizer;
mod risk_analyzer;

pub use launch_coordinator::{LaunchCoordinator, LaunchRequest, PendingLaunch};
pub use liquidity_optimizer::LiquidityOptimizer;
pub use risk_analyzer::RiskAnalyzer;
