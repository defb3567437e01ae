use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The thread no longer exists at the platform.
    #[error("Thread is gone")]
    Gone,

    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected platform response: {0}")]
    Protocol(String),

    /// Credentials rejected. Unrecoverable at startup (exit code 4).
    #[error("Platform authentication failed: {0}")]
    Auth(String),
}

impl From<PlatformError> for aily_core::AilyError {
    fn from(e: PlatformError) -> Self {
        use aily_core::AilyError;
        match e {
            PlatformError::RateLimited { retry_after_secs } => {
                AilyError::RateLimited { retry_after_secs }
            }
            PlatformError::Gone => AilyError::NotFound("thread".into()),
            PlatformError::Unreachable(reason) => AilyError::Unreachable {
                target: "platform gateway".into(),
                reason,
            },
            PlatformError::Protocol(m) => AilyError::Protocol(m),
            PlatformError::Auth(m) => AilyError::Protocol(format!("auth: {m}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
