use thiserror::Error;

/// Process exit codes. The binary maps startup/shutdown outcomes onto these.
pub mod exit {
    /// Clean shutdown.
    pub const CLEAN: i32 = 0;
    /// Configuration error at startup.
    pub const CONFIG: i32 = 2;
    /// Storage open failure.
    pub const STORAGE: i32 = 3;
    /// Unrecoverable platform-auth failure.
    pub const PLATFORM_AUTH: i32 = 4;
    /// Signal-initiated shutdown.
    pub const SIGNAL: i32 = 130;
}

#[derive(Debug, Error)]
pub enum AilyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{target} is unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Dedup suppressed a write. Never surfaced to users.
    #[error("Duplicate suppressed")]
    Duplicate,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cancelled after {ms}ms")]
    Cancelled { ms: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AilyError {
    /// Stable error code string, used in API responses and failure notices.
    pub fn code(&self) -> &'static str {
        match self {
            AilyError::Config(_) => "CONFIG_ERROR",
            AilyError::Unreachable { .. } => "UNREACHABLE",
            AilyError::RateLimited { .. } => "RATE_LIMITED",
            AilyError::NotFound(_) => "NOT_FOUND",
            AilyError::Protocol(_) => "PROTOCOL_ERROR",
            AilyError::Duplicate => "DUPLICATE",
            AilyError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AilyError::Cancelled { .. } => "CANCELLED",
            AilyError::Storage(_) => "STORAGE_ERROR",
            AilyError::Serialization(_) => "SERIALIZATION_ERROR",
            AilyError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the router should retry this error internally with backoff
    /// rather than surface it immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AilyError::RateLimited { .. } | AilyError::Unreachable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AilyError>;
