//! Error types for the replication core.

use thiserror::Error;

use crate::state_store::StateStoreError;

/// Errors that can occur in the replication core.
///
/// Conflict-resolution outcomes are never errors: every combination of
/// concurrent operations has a defined deterministic result. Committing an
/// unknown change number is a programming error and panics instead of
/// surfacing here.
#[derive(Debug, Error)]
pub enum ReplError {
    /// A wire message failed to decode.
    #[error("protocol error")]
    Proto(#[from] ferrodir_proto::ProtoError),

    /// A persisted historical attribute value failed to parse.
    #[error("malformed historical value {value:?}: {reason}")]
    HistoryParse {
        /// The rejected persisted value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Reading or writing persisted server state failed.
    #[error("state store error")]
    StateStore(#[from] StateStoreError),
}

/// Convenience alias for replication results.
pub type Result<T> = std::result::Result<T, ReplError>;
