//! Error types surfaced by the view-sync engine.
//!
//! Classifier- and aggregator-level failures are local and non-fatal: one bad
//! event never blocks the rest of a batch. Transport-level failures surface
//! only on the specific operation that issued them.

use thiserror::Error;

/// A failure reported by the protocol-client boundary for a single operation.
///
/// These never crash the reconciler; they are delivered to the caller of the
/// affected operation (e.g. a failed send marks that one message as failed).
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The homeserver rejected the request or the connection failed.
    #[error("network failure{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Network {
        /// The HTTP status code, if the request made it to a server.
        status: Option<u16>,
        message: String,
    },
    /// The request timed out before a response arrived.
    #[error("request timed out")]
    Timeout,
    /// The caller's credential was missing or rejected.
    #[error("unauthorized")]
    Unauthorized,
    /// The target room, event, or user does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other failure reported by the underlying client.
    #[error("{0}")]
    Other(String),
}
