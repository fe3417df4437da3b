use chrono::{DateTime, Utc};
use launchpad_models::journal_schema::{JournalEntry, JournalEventKind, JOURNAL_TABLE_DDL};
use rusqlite::Connection;

use crate::error::StoreError;

/// Append-only SQLite journal accessor.
///
/// Rows are only ever inserted; `seq` is assigned by SQLite and gives the
/// global append order.
pub struct SqliteJournal {
    conn: Connection,
}

struct RawRow {
    seq: i64,
    agent: String,
    entity_id: String,
    event: String,
    payload_json: String,
    recorded_at: String,
}

impl SqliteJournal {
    /// Open (or create) a journal database file and ensure the schema exists.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(JOURNAL_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Open an in-memory journal. Used when no `journal_path` is configured.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(JOURNAL_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Insert a row and return its assigned sequence number. `entry.seq` is ignored.
    pub fn insert(&self, entry: &JournalEntry) -> Result<i64, StoreError> {
        let payload_json = serde_json::to_string(&entry.payload)?;
        self.conn.execute(
            "INSERT INTO decision_journal (agent, entity_id, event, payload_json, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entry.agent,
                entry.entity_id,
                entry.event.as_str(),
                payload_json,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent rows for one entity of one agent, newest first.
    pub fn recent(
        &self,
        agent: &str,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT seq, agent, entity_id, event, payload_json, recorded_at \
             FROM decision_journal WHERE agent = ?1 AND entity_id = ?2 \
             ORDER BY seq DESC LIMIT ?3",
        )?;

        let raw = stmt
            .query_map(rusqlite::params![agent, entity_id, limit as i64], |row| {
                Ok(RawRow {
                    seq: row.get(0)?,
                    agent: row.get(1)?,
                    entity_id: row.get(2)?,
                    event: row.get(3)?,
                    payload_json: row.get(4)?,
                    recorded_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter().map(decode_row).collect()
    }

    /// Total number of rows written by an agent.
    pub fn count(&self, agent: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM decision_journal WHERE agent = ?1",
            rusqlite::params![agent],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn decode_row(raw: RawRow) -> Result<JournalEntry, StoreError> {
    let event = JournalEventKind::parse(&raw.event).ok_or_else(|| StoreError::Corrupt {
        seq: raw.seq,
        reason: format!("unknown event '{}'", raw.event),
    })?;
    let recorded_at = DateTime::parse_from_rfc3339(&raw.recorded_at)
        .map_err(|e| StoreError::Corrupt {
            seq: raw.seq,
            reason: format!("bad timestamp: {e}"),
        })?
        .with_timezone(&Utc);

    Ok(JournalEntry {
        seq: raw.seq,
        agent: raw.agent,
        entity_id: raw.entity_id,
        event,
        payload: serde_json::from_str(&raw.payload_json)?,
        recorded_at,
    })
}
