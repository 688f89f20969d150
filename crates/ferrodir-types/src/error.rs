//! Error types for the shared data model.

use thiserror::Error;

/// Errors raised while parsing or validating replication data types.
#[derive(Debug, Error)]
pub enum TypeError {
    /// A change number string did not match the fixed-width hex form.
    #[error("invalid change number: {input:?}")]
    InvalidChangeNumber {
        /// The rejected input.
        input: String,
    },

    /// A DN string was empty or contained an empty RDN component.
    #[error("invalid DN: {input:?}")]
    InvalidDn {
        /// The rejected input.
        input: String,
    },

    /// A server state byte buffer did not decode as id/change-number pairs.
    #[error("invalid server state encoding: {msg}")]
    InvalidServerState {
        /// What went wrong while decoding.
        msg: String,
    },
}
