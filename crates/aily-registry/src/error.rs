use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Session not found: {0}")]
    NotFound(String),
}

impl From<RegistryError> for aily_core::AilyError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(name) => aily_core::AilyError::NotFound(name),
            other => aily_core::AilyError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
