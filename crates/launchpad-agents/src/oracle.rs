use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::parser::{parse_answer, RawAnswer};
use crate::process::{invoke, CommandSpec};

/// How long a caller waits on a collaborator that declares no bound of its own.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A typed argument of an oracle query.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleValue {
    Bool(bool),
    Number(Decimal),
    Text(String),
    /// Bare identifier, rendered without quotes.
    Symbol(String),
}

impl fmt::Display for OracleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleValue::Bool(b) => write!(f, "{b}"),
            OracleValue::Number(n) => write!(f, "{}", n.normalize()),
            OracleValue::Text(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            OracleValue::Symbol(s) => f.write_str(s),
        }
    }
}

impl From<bool> for OracleValue {
    fn from(value: bool) -> Self {
        OracleValue::Bool(value)
    }
}

impl From<Decimal> for OracleValue {
    fn from(value: Decimal) -> Self {
        OracleValue::Number(value)
    }
}

impl From<&str> for OracleValue {
    fn from(value: &str) -> Self {
        OracleValue::Text(value.to_string())
    }
}

/// A declarative query: a predicate applied to named arguments.
///
/// Renders as `(predicate (name value) ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleQuery {
    predicate: String,
    args: Vec<(String, OracleValue)>,
}

impl OracleQuery {
    pub fn new(predicate: &str) -> Self {
        Self {
            predicate: predicate.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: &str, value: impl Into<OracleValue>) -> Self {
        self.args.push((name.to_string(), value.into()));
        self
    }

    pub fn symbol(self, name: &str, value: &str) -> Self {
        self.arg(name, OracleValue::Symbol(value.to_string()))
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn get(&self, name: &str) -> Option<&OracleValue> {
        self.args
            .iter()
            .find(|(arg, _)| arg == name)
            .map(|(_, value)| value)
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OracleQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.predicate)?;
        for (name, value) in &self.args {
            write!(f, " ({name} {value})")?;
        }
        f.write_str(")")
    }
}

/// A successful oracle call.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleAnswer {
    Signal(Value),
    /// The oracle answered but had nothing actionable.
    NoSignal,
}

/// External structured-query knowledge service. Mockable for testing.
#[async_trait]
pub trait KnowledgeOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Longest wait for one answer. Past it the call counts as failed.
    fn call_timeout(&self) -> Duration {
        DEFAULT_CALL_TIMEOUT
    }

    async fn query(&self, query: &OracleQuery) -> Result<OracleAnswer, OracleError>;
}

/// What the decision engine receives from one oracle consultation.
///
/// Failure and "no signal" are kept apart: only a failure degrades confidence.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome<T> {
    Answered(T),
    NoSignal,
    Failed,
}

impl<T> OracleOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, OracleOutcome::Failed)
    }

    pub fn answered(&self) -> Option<&T> {
        match self {
            OracleOutcome::Answered(value) => Some(value),
            _ => None,
        }
    }
}

/// Query the oracle and parse its answer. Any failure, including a call that
/// outlives the oracle's timeout or an answer of unexpected shape, becomes
/// `OracleOutcome::Failed`.
pub async fn consult<T>(
    oracle: &dyn KnowledgeOracle,
    query: &OracleQuery,
    parse: impl Fn(&Value) -> Result<T, OracleError>,
) -> OracleOutcome<T> {
    debug!(oracle = oracle.name(), query = %query, "Querying knowledge oracle");
    let bound = oracle.call_timeout();
    let answer = tokio::time::timeout(bound, oracle.query(query))
        .await
        .unwrap_or_else(|_| Err(OracleError::Timeout(bound.as_millis() as u64)));
    match answer {
        Ok(OracleAnswer::Signal(value)) => match parse(&value) {
            Ok(parsed) => OracleOutcome::Answered(parsed),
            Err(e) => {
                warn!(oracle = oracle.name(), predicate = query.predicate(), error = %e, "Discarding oracle answer");
                OracleOutcome::Failed
            }
        },
        Ok(OracleAnswer::NoSignal) => OracleOutcome::NoSignal,
        Err(e) => {
            warn!(oracle = oracle.name(), predicate = query.predicate(), error = %e, "Oracle call failed");
            OracleOutcome::Failed
        }
    }
}

/// Read a numeric field. Accepts JSON numbers and numeric strings.
pub fn decimal_field(value: &Value, key: &str) -> Result<Decimal, OracleError> {
    let raw = value
        .get(key)
        .ok_or_else(|| OracleError::Malformed(format!("missing '{key}'")))?;
    let parsed = match raw {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text))
        }
        Value::String(s) => Decimal::from_str(s.trim()),
        _ => return Err(OracleError::Malformed(format!("'{key}' is not a number"))),
    };
    parsed.map_err(|e| OracleError::Malformed(format!("'{key}': {e}")))
}

/// Read a numeric field, accepting the first of several names.
pub fn decimal_field_any(value: &Value, keys: &[&str]) -> Result<Decimal, OracleError> {
    for key in keys {
        if value.get(*key).is_some() {
            return decimal_field(value, key);
        }
    }
    Err(OracleError::Malformed(format!("missing any of {keys:?}")))
}

pub fn string_field(value: &Value, key: &str) -> Result<String, OracleError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OracleError::Malformed(format!("'{key}' is not a string")))
}

/// A confidence must lie in `0..=1`.
pub fn unit_interval(value: Decimal, key: &str) -> Result<Decimal, OracleError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(OracleError::Malformed(format!(
            "'{key}' = {value} outside 0..=1"
        )));
    }
    Ok(value)
}

/// Oracle backed by an external command.
///
/// The rendered query is passed as the last argument; stdout is either
/// `null` (no signal) or a JSON object.
pub struct CommandOracle {
    spec: CommandSpec,
}

impl CommandOracle {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl KnowledgeOracle for CommandOracle {
    fn name(&self) -> &str {
        &self.spec.program
    }

    fn call_timeout(&self) -> Duration {
        self.spec.timeout
    }

    async fn query(&self, query: &OracleQuery) -> Result<OracleAnswer, OracleError> {
        let raw = invoke(&self.spec, &query.render()).await?;
        match parse_answer(&raw) {
            Some(RawAnswer::Null) => Ok(OracleAnswer::NoSignal),
            Some(RawAnswer::Object(value)) => Ok(OracleAnswer::Signal(value)),
            None => Err(OracleError::Malformed(format!(
                "no JSON object in output (length={})",
                raw.len()
            ))),
        }
    }
}

/// Stand-in when no oracle is configured. Every call fails, so decisions
/// run on local rules and are marked degraded.
pub struct UnavailableOracle;

#[async_trait]
impl KnowledgeOracle for UnavailableOracle {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn query(&self, _query: &OracleQuery) -> Result<OracleAnswer, OracleError> {
        Err(OracleError::Unavailable(
            "no oracle command configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn render_query() {
        let query = OracleQuery::new("analyze-risk-factors")
            .arg("liquidity-lock", dec!(10))
            .arg("team-verified", false)
            .symbol("token-category", "utility")
            .arg("token-name", "Moon \"Cat\"");

        assert_eq!(
            query.render(),
            r#"(analyze-risk-factors (liquidity-lock 10) (team-verified false) (token-category utility) (token-name "Moon \"Cat\""))"#
        );
        assert_eq!(query.get("team-verified"), Some(&OracleValue::Bool(false)));
    }

    #[test]
    fn numbers_render_normalized() {
        let query = OracleQuery::new("p").arg("x", dec!(1.050));
        assert_eq!(query.render(), "(p (x 1.05))");
    }

    #[test]
    fn decimal_fields_are_read_defensively() {
        let value = json!({"a": 1.25, "b": "0.8", "c": true});
        assert_eq!(decimal_field(&value, "a").unwrap(), dec!(1.25));
        assert_eq!(decimal_field(&value, "b").unwrap(), dec!(0.8));
        assert!(decimal_field(&value, "c").is_err());
        assert!(decimal_field(&value, "missing").is_err());
        assert_eq!(decimal_field_any(&value, &["x", "b"]).unwrap(), dec!(0.8));
    }

    #[test]
    fn confidence_must_be_unit_interval() {
        assert!(unit_interval(dec!(0.5), "confidence").is_ok());
        assert!(unit_interval(dec!(1.5), "confidence").is_err());
        assert!(unit_interval(dec!(-0.1), "confidence").is_err());
    }

    #[tokio::test]
    async fn unavailable_oracle_fails_consultation() {
        let outcome = consult(&UnavailableOracle, &OracleQuery::new("p"), |_| Ok(())).await;
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn stalled_oracle_is_abandoned_after_its_timeout() {
        let oracle = crate::test_support::ScriptedOracle::new().hanging("p");

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            consult(&oracle, &OracleQuery::new("p"), |_| Ok(())),
        )
        .await
        .expect("consult must give up on its own");

        assert!(outcome.is_failed());
        assert!(started.elapsed() >= oracle.call_timeout());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_oracle_null_is_no_signal() {
        // The rendered query lands in `$0` and is ignored by the script.
        let oracle = CommandOracle::new(CommandSpec::new(
            "sh",
            vec!["-c".into(), "echo null".into()],
            std::time::Duration::from_secs(5),
        ));
        let answer = oracle.query(&OracleQuery::new("p")).await.unwrap();
        assert_eq!(answer, OracleAnswer::NoSignal);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_oracle_parses_object() {
        let oracle = CommandOracle::new(CommandSpec::new(
            "sh",
            vec![
                "-c".into(),
                r#"echo "result: {\"matched_patterns\": [\"honeypot\"]}""#.into(),
            ],
            std::time::Duration::from_secs(5),
        ));
        let answer = oracle.query(&OracleQuery::new("p")).await.unwrap();
        assert_eq!(
            answer,
            OracleAnswer::Signal(json!({"matched_patterns": ["honeypot"]}))
        );
    }
}
