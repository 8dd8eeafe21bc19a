// crates/job-sync/src/error.rs
use thiserror::Error;

/// Errors that cross the tracker's public boundary.
///
/// Transient transport problems (timeouts, refused connections, socket
/// drops) never appear here — the transports absorb and retry those, and
/// the derived view carries a connectivity indicator instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no user id available; sign-in is required before tracking jobs")]
    MissingUserId,

    #[error("authentication rejected by server (HTTP {status})")]
    AuthRejected { status: u16 },

    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

/// Result type alias for tracker operations.
pub type SyncResult<T> = Result<T, SyncError>;
