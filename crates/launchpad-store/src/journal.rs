use std::sync::Mutex;

use chrono::Utc;
use launchpad_models::journal_schema::{JournalEntry, JournalEventKind};
use serde::Serialize;

use crate::error::StoreError;
use crate::sqlite::SqliteJournal;

/// Shared handle to the decision journal.
///
/// Every agent appends through the same journal; rows are keyed by agent
/// name so reports never mix agents. SQLite access is synchronized via
/// `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct DecisionJournal {
    sqlite: Mutex<SqliteJournal>,
}

impl DecisionJournal {
    pub fn new(sqlite: SqliteJournal) -> Self {
        Self {
            sqlite: Mutex::new(sqlite),
        }
    }

    /// Open a file-backed journal, or an in-memory one when `path` is `None`.
    pub fn open(path: Option<&str>) -> Result<Self, StoreError> {
        let sqlite = match path {
            Some(path) => SqliteJournal::open(path)?,
            None => SqliteJournal::open_in_memory()?,
        };
        Ok(Self::new(sqlite))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(None)
    }

    /// Append one event. Returns the assigned sequence number.
    pub fn record<T: Serialize>(
        &self,
        agent: &str,
        entity_id: &str,
        event: JournalEventKind,
        payload: &T,
    ) -> Result<i64, StoreError> {
        let entry = JournalEntry {
            seq: 0,
            agent: agent.to_string(),
            entity_id: entity_id.to_string(),
            event,
            payload: serde_json::to_value(payload)?,
            recorded_at: Utc::now(),
        };

        let seq = self.lock()?.insert(&entry)?;
        tracing::debug!(agent, entity = entity_id, event = event.as_str(), seq, "Journaled");
        Ok(seq)
    }

    /// Most recent rows for an entity, newest first.
    pub fn history(
        &self,
        agent: &str,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        self.lock()?.recent(agent, entity_id, limit)
    }

    pub fn count(&self, agent: &str) -> Result<u64, StoreError> {
        self.lock()?.count(agent)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteJournal>, StoreError> {
        self.sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }
}
