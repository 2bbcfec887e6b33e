use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No platform data directory for the default database location.
    #[error("No data directory available on this platform")]
    NoDataDir,

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The chat, message or mirror row does not exist.
    #[error("Not found")]
    NotFound,

    /// Rejected write, e.g. an empty payload or a non-participant sender.
    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// A stored identifier is not a valid UUID.
    #[error("Corrupt identifier: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Turn "no rows" into [`StoreError::NotFound`] for single-row lookups.
    pub(crate) fn from_query(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::QueryReturnedNoRows = err {
            StoreError::NotFound
        } else {
            StoreError::Sqlite(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
