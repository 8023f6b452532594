//! Error taxonomy for reconciliation.
//!
//! Errors are entity-scoped: a failure reconciling one object never aborts the
//! rest of the pass. The three fatal-ish categories map to the phases of a
//! pass:
//!
//! - [`Error::Validation`]: malformed declaration, raised before any
//!   transport call, never retried.
//! - [`Error::Observation`]: a read query failed or returned unparseable
//!   data. The observed-state reader degrades this to an empty result set
//!   (a fresh or unreachable server still converges forward), so it surfaces
//!   only in logs.
//! - [`Error::Execution`]: a mutating statement failed. Fatal for that
//!   entity's current pass; the in-memory snapshot is left stale so the next
//!   pass re-observes from scratch.

use thiserror::Error as ThisError;

/// Failure of a single call on the command/query transport.
#[derive(ThisError, Debug)]
pub enum TransportError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("request to ClickHouse failed: {0}")]
    Http(#[from] reqwest::Error),

    /// ClickHouse answered with a non-success status.
    #[error("ClickHouse returned HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// The response body could not be interpreted in the requested format.
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Declaration rejected at the boundary, before any statement is issued.
    #[error("invalid {entity} declaration '{name}': {message}")]
    Validation {
        entity: &'static str,
        name: String,
        message: String,
    },

    /// A read-only introspection query failed.
    #[error("failed to observe {entity}: {source}")]
    Observation {
        entity: &'static str,
        #[source]
        source: TransportError,
    },

    /// A mutating statement failed against the backend.
    #[error("statement failed for {entity} '{name}': {source}")]
    Execution {
        entity: &'static str,
        name: String,
        #[source]
        source: TransportError,
    },
}

/// Type alias for reconciliation results
pub type Result<T> = std::result::Result<T, Error>;
