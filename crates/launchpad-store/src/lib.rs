pub mod dedup;
pub mod error;
pub mod journal;
pub mod sqlite;

pub use dedup::DeliveryFilter;
pub use error::StoreError;
pub use journal::DecisionJournal;
pub use sqlite::SqliteJournal;
