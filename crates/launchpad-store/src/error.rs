use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt journal row: seq={seq}: {reason}")]
    Corrupt { seq: i64, reason: String },

    #[error("Journal not available: {0}")]
    Unavailable(String),
}
