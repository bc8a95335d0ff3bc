//! Error types for sdnsyncd

use thiserror::Error;

use crate::types::TransportKind;

/// Errors that can occur in sdnsyncd
///
/// Failure policy: only transport-open errors abort protocol startup.
/// Everything else is logged at the point of failure and never surfaced
/// to the host routing core as a protocol fault.
#[derive(Debug, Error)]
pub enum SdnError {
    /// A transport could not bind or connect at startup
    #[error("cannot open {kind} transport at {endpoint}: {source}")]
    TransportOpen {
        kind: TransportKind,
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Write or flush failed mid-send; the message is dropped
    #[error("transport send failed: {0}")]
    TransportSend(#[source] std::io::Error),

    /// Read failed on an open channel; the channel is left as-is
    #[error("transport receive failed: {0}")]
    TransportRecv(#[source] std::io::Error),

    /// An announcement had nowhere to go
    #[error("no controller client connected")]
    ControllerUnavailable,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire message encoding failed
    #[error("message encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// A host feed line could not be parsed
    #[error("malformed feed event: {0}")]
    Feed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sdnsyncd operations
pub type Result<T> = std::result::Result<T, SdnError>;
