use thiserror::Error;

/// Top-level error type for the `relayr-api` crate.
///
/// Covers every failure a collaborator can surface: transport faults,
/// server refusals, closed links and cancelled exchanges.
/// `relayr-core` maps these into domain errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The link failed (radio dropped, socket reset, DNS failure, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection is closed and cannot carry traffic.
    #[error("Connection closed")]
    Closed,

    /// The remote side did not answer in time.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// An in-flight exchange was cancelled before it completed.
    #[error("Exchange cancelled")]
    Cancelled,

    // ── Server ──────────────────────────────────────────────────────
    /// The server received the request and refused it.
    #[error("Rejected by server (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The transport does not implement the requested operation.
    #[error("Operation not supported by this connection: {0}")]
    Unsupported(String),

    // ── Data ────────────────────────────────────────────────────────
    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Whether the failure happened on the server side after the request
    /// was delivered (as opposed to the request never arriving).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
