#![warn(missing_docs)]

//! FerroDir replication protocol: the versioned, length-prefixed binary
//! messages replicas exchange (updates, acknowledgements, errors and
//! initialization requests) plus the operation contexts attached to
//! in-flight local operations.
//!
//! Every message is one byte tag followed by NUL-terminated UTF-8 fields in
//! a fixed, version-dependent order. Older protocol versions use strict
//! subsets of the newer field sets; a serialized [`ServerState`] snapshot is
//! always the final field of a message because its own encoding contains NUL
//! bytes.
//!
//! [`ServerState`]: ferrodir_types::ServerState

pub mod ack;
pub mod codec;
pub mod context;
pub mod error;
pub mod error_msg;
pub mod init;
pub mod monitor;
pub mod msg;
pub mod reset;
pub mod start;
pub mod update;
pub mod version;

pub use ack::AckMsg;
pub use context::{ModifyContext, ModifyDnContext};
pub use error::ProtoError;
pub use error_msg::ErrorMsg;
pub use init::{InitializeRequestMsg, InitializeTargetMsg};
pub use monitor::MonitorRequestMsg;
pub use msg::ReplicationMsg;
pub use reset::ResetGenerationIdMsg;
pub use start::ReplServerStartMsg;
pub use update::{UpdateKind, UpdateMsg, UpdateOp};
pub use version::{
    ProtocolVersion, CURRENT_PROTOCOL_VERSION, PROTOCOL_V1, PROTOCOL_V2, PROTOCOL_V3,
    PROTOCOL_V4,
};
