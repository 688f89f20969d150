//! Error types for the replication protocol.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The buffer does not match the expected field grammar.
    #[error("malformed message: {msg}")]
    DataFormat {
        /// What went wrong while decoding.
        msg: String,
    },

    /// The first byte is not the tag the decoder expected.
    #[error("unexpected message tag: expected {expected}, got {got}")]
    UnexpectedTag {
        /// The tag the decoder was called for.
        expected: u8,
        /// The tag actually present.
        got: u8,
    },

    /// The first byte does not name any known message type.
    #[error("unknown message type tag {0}")]
    UnknownMsgType(u8),

    /// The protocol version is outside the supported range.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
}

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtoError>;

impl ProtoError {
    /// Builds a [`ProtoError::DataFormat`] from anything displayable.
    pub fn data_format(msg: impl std::fmt::Display) -> Self {
        ProtoError::DataFormat {
            msg: msg.to_string(),
        }
    }
}
