use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store is shutting down")]
    Closed,

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for aily_core::AilyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => aily_core::AilyError::NotFound(what),
            other => aily_core::AilyError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
