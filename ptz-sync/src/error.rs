use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport or handshake failure towards a camera or the mixer.
    #[error("connection error: {0}")]
    Connection(String),
    /// Digest credentials were rejected on the authenticated retry.
    #[error("authentication rejected by {0}")]
    Auth(String),
    /// The device answered with something we could not parse.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("camera {0} not found")]
    NotFound(String),
    #[error("mixer not connected")]
    NotConnected,
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },
    #[error("camera {0} is busy with another preset operation")]
    Busy(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    NotFound,
    NotConnected,
    Timeout,
    Busy,
    Config,
    Io,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection(_) | SyncError::Auth(_) => ErrorKind::Connection,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::NotConnected => ErrorKind::NotConnected,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::Busy(_) => ErrorKind::Busy,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Io(_) => ErrorKind::Io,
        }
    }

    /// True when the failure means the device link is gone and the next call
    /// has to reconnect first.
    pub fn is_link_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Timeout)
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        SyncError::Connection(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
