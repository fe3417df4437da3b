use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decision::DecisionResult;

/// Identifier of a monitored entity, unique within one agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A token launch proposed through the launch coordinator.
    Launch,
    /// A concentrated-liquidity position.
    Position,
    /// A live token watched for fraud indicators.
    Token,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Launch => "launch",
            EntityKind::Position => "position",
            EntityKind::Token => "token",
        };
        f.write_str(name)
    }
}

/// Well-known metric keys. Data feeds should use these so the decision
/// rules can find the values they need.
pub mod metric_keys {
    // Token / launch safety
    pub const LIQUIDITY_LOCKED: &str = "liquidity_locked";
    pub const LIQUIDITY_LOCK_DAYS: &str = "liquidity_lock_duration";
    pub const TEAM_VERIFIED: &str = "team_verified";
    pub const VESTING_ENABLED: &str = "vesting_enabled";
    pub const CONTRACT_VERIFIED: &str = "contract_verified";
    pub const TOP_HOLDER_PCT: &str = "top_holder_percentage";
    pub const GRADUATION_TIME_HOURS: &str = "graduation_time_hours";
    pub const HOLDER_COUNT: &str = "holder_count";
    pub const INITIAL_LIQUIDITY: &str = "initial_liquidity";
    pub const PRESALE_MODE: &str = "presale_mode";
    pub const VOLUME_24H: &str = "volume_24h";
    pub const PRICE_VOLATILITY: &str = "price_volatility";
    pub const AVG_WALLET_AGE_DAYS: &str = "avg_wallet_age_days";
    pub const PRICE_HISTORY: &str = "price_history";
    pub const VOLUME_SPIKE: &str = "volume_spike";

    // Liquidity positions
    pub const POOL_ADDRESS: &str = "pool_address";
    pub const CURRENT_PRICE: &str = "current_price";
    pub const VOLATILITY_24H: &str = "volatility_24h";
    pub const RANGE_LOWER: &str = "range_lower";
    pub const RANGE_UPPER: &str = "range_upper";
    pub const LIQUIDITY_AMOUNT: &str = "liquidity_amount";
    pub const UNCLAIMED_FEES: &str = "unclaimed_fees";
    /// Range of a rebalance sent for execution and not yet reported back.
    pub const PENDING_RANGE_LOWER: &str = "pending_range_lower";
    pub const PENDING_RANGE_UPPER: &str = "pending_range_upper";
    /// Amount of a fee harvest sent for execution and not yet reported back.
    pub const PENDING_HARVEST: &str = "pending_harvest";
    /// Running total of successfully harvested fees.
    pub const FEES_HARVESTED: &str = "fees_harvested";

    // Launch parameters
    pub const NAME: &str = "name";
    pub const TOKEN_ADDRESS: &str = "token_address";
    pub const CATEGORY: &str = "category";
    pub const TARGET_MARKETCAP: &str = "target_marketcap";
    pub const COMMUNITY_SIZE: &str = "community_size";
    pub const INITIAL_PRICE: &str = "initial_price";
    pub const SIMILAR_LAUNCHES: &str = "similar_launches_count";
    pub const MARKET_SENTIMENT: &str = "market_sentiment";
    pub const VOLUME_INDICATOR: &str = "volume_indicator";
    /// Set from `execution_result`: "launched" or "failed".
    pub const LAUNCH_STATUS: &str = "launch_status";
}

/// Kind-specific key/value observations for an entity.
///
/// Backed by a `BTreeMap` so iteration and serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, serde_json::Value>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// True when the key exists and is not null.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Read a value as an exact decimal. Accepts JSON numbers and numeric strings.
    pub fn decimal(&self, key: &str) -> Option<Decimal> {
        match self.get(key)? {
            serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
            serde_json::Value::String(s) => parse_decimal(s.trim()),
            _ => None,
        }
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Numeric series (e.g. price history). Non-numeric elements make the whole series unusable.
    pub fn series(&self, key: &str) -> Option<Vec<f64>> {
        self.get(key)?
            .as_array()?
            .iter()
            .map(|v| v.as_f64())
            .collect()
    }

    /// Overlay fresher observations on top of the current ones. A `null`
    /// observation clears the key.
    pub fn merge(&mut self, fresh: Metrics) {
        for (key, value) in fresh.0 {
            if value.is_null() {
                self.0.remove(&key);
            } else {
                self.0.insert(key, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// A token launch, liquidity position, or risk target watched by one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub metrics: Metrics,
    pub added_at: DateTime<Utc>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Last time an action (rebalance, harvest, launch) was taken on this entity.
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_decision: Option<DecisionResult>,
    /// Bumped on every (re-)registration so stale evaluations can be told apart.
    pub generation: u64,
}

impl MonitoredEntity {
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        metrics: Metrics,
        added_at: DateTime<Utc>,
        generation: u64,
    ) -> Self {
        Self {
            id,
            kind,
            metrics,
            added_at,
            last_evaluated_at: None,
            last_action_at: None,
            last_decision: None,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decimal_reads_numbers_and_strings() {
        let metrics = Metrics::new()
            .with(metric_keys::TOP_HOLDER_PCT, 35.5)
            .with(metric_keys::LIQUIDITY_LOCK_DAYS, 10)
            .with(metric_keys::UNCLAIMED_FEES, "2.75");

        assert_eq!(metrics.decimal(metric_keys::TOP_HOLDER_PCT), Some(dec!(35.5)));
        assert_eq!(metrics.decimal(metric_keys::LIQUIDITY_LOCK_DAYS), Some(dec!(10)));
        assert_eq!(metrics.decimal(metric_keys::UNCLAIMED_FEES), Some(dec!(2.75)));
    }

    #[test]
    fn null_counts_as_absent() {
        let metrics = Metrics::new().with(metric_keys::TEAM_VERIFIED, serde_json::Value::Null);
        assert!(!metrics.has(metric_keys::TEAM_VERIFIED));
        assert_eq!(metrics.bool(metric_keys::TEAM_VERIFIED), None);
    }

    #[test]
    fn wrong_type_is_not_coerced() {
        let metrics = Metrics::new()
            .with(metric_keys::TEAM_VERIFIED, 1)
            .with(metric_keys::TOP_HOLDER_PCT, "lots");
        assert_eq!(metrics.bool(metric_keys::TEAM_VERIFIED), None);
        assert_eq!(metrics.decimal(metric_keys::TOP_HOLDER_PCT), None);
    }

    #[test]
    fn series_rejects_mixed_arrays() {
        let good = Metrics::new().with(metric_keys::PRICE_HISTORY, serde_json::json!([1.0, 0.9, 0.8]));
        assert_eq!(good.series(metric_keys::PRICE_HISTORY), Some(vec![1.0, 0.9, 0.8]));

        let bad = Metrics::new().with(metric_keys::PRICE_HISTORY, serde_json::json!([1.0, "x"]));
        assert_eq!(bad.series(metric_keys::PRICE_HISTORY), None);
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut metrics = Metrics::new()
            .with(metric_keys::CURRENT_PRICE, 1.0)
            .with(metric_keys::POOL_ADDRESS, "pool-1");
        metrics.merge(Metrics::new().with(metric_keys::CURRENT_PRICE, 1.2));

        assert_eq!(metrics.f64(metric_keys::CURRENT_PRICE), Some(1.2));
        assert_eq!(metrics.str(metric_keys::POOL_ADDRESS), Some("pool-1"));
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn merge_null_clears_key() {
        let mut metrics = Metrics::new().with(metric_keys::PENDING_HARVEST, "5");
        metrics.merge(Metrics::new().with(metric_keys::PENDING_HARVEST, serde_json::Value::Null));

        assert!(!metrics.has(metric_keys::PENDING_HARVEST));
        assert!(metrics.is_empty());
    }

    #[test]
    fn entity_kind_serialization() {
        assert_eq!(serde_json::to_string(&EntityKind::Position).unwrap(), "\"position\"");
        assert_eq!(serde_json::to_string(&EntityKind::Launch).unwrap(), "\"launch\"");
    }
}
