use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Host {host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("Session {session} not found on {host}")]
    SessionNotFound { host: String, session: String },

    #[error("Unexpected multiplexer response: {0}")]
    Protocol(String),

    #[error("Command timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Host queue full")]
    QueueFull,

    #[error("Host channel closed")]
    Closed,

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Spawn failed: {0}")]
    Spawn(String),
}

impl From<HostError> for aily_core::AilyError {
    fn from(e: HostError) -> Self {
        use aily_core::AilyError;
        match e {
            HostError::Unreachable { host, reason } => AilyError::Unreachable {
                target: host,
                reason,
            },
            HostError::SessionNotFound { session, .. } => AilyError::NotFound(session),
            HostError::UnknownHost(h) => AilyError::NotFound(h),
            HostError::Timeout { ms } => AilyError::Cancelled { ms },
            HostError::Protocol(m) => AilyError::Protocol(m),
            HostError::QueueFull => AilyError::Unreachable {
                target: "host channel".into(),
                reason: "queue full".into(),
            },
            HostError::Closed => AilyError::Unreachable {
                target: "host channel".into(),
                reason: "channel closed".into(),
            },
            HostError::Spawn(m) => AilyError::Protocol(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
