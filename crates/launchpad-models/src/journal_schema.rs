use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a journal row records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JournalEventKind {
    Decision,
    ApprovalTransition,
    Execution,
}

impl JournalEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalEventKind::Decision => "decision",
            JournalEventKind::ApprovalTransition => "approval_transition",
            JournalEventKind::Execution => "execution",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "decision" => Some(JournalEventKind::Decision),
            "approval_transition" => Some(JournalEventKind::ApprovalTransition),
            "execution" => Some(JournalEventKind::Execution),
            _ => None,
        }
    }
}

/// The SQLite schema of the append-only decision journal.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS decision_journal (
///     seq          INTEGER PRIMARY KEY AUTOINCREMENT,
///     agent        TEXT NOT NULL,
///     entity_id    TEXT NOT NULL,
///     event        TEXT NOT NULL,
///     payload_json TEXT NOT NULL,
///     recorded_at  TEXT NOT NULL
/// );
///
/// CREATE INDEX IF NOT EXISTS idx_journal_entity ON decision_journal(agent, entity_id);
/// ```
pub const JOURNAL_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS decision_journal (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    agent        TEXT NOT NULL,
    entity_id    TEXT NOT NULL,
    event        TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    recorded_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_journal_entity ON decision_journal(agent, entity_id);
";

/// One journal row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    /// Assigned by the journal on insert; ignored when appending.
    pub seq: i64,
    pub agent: String,
    pub entity_id: String,
    pub event: JournalEventKind,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
