//! Replication-server start handshake message.

use ferrodir_types::{Dn, ReplicaId, ServerState};

use crate::codec::{FieldReader, FieldWriter};
use crate::error::{ProtoError, Result};
use crate::msg::MSG_TYPE_REPL_SERVER_START;
use crate::version::{is_supported, ProtocolVersion, PROTOCOL_V1, PROTOCOL_V2};

/// First message a replication server sends on a new session.
///
/// Unlike the other messages, the start message carries its own protocol
/// version in a header: it is exchanged *before* version negotiation
/// completes, so the receiver must learn the version from the message
/// itself. The server-state snapshot is always the final field: its
/// encoding contains NUL bytes and is decoded by reading to the end of the
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplServerStartMsg {
    /// The protocol version the sender encoded this message with.
    pub version: ProtocolVersion,
    /// Fingerprint of the domain's initial content.
    pub generation_id: i64,
    /// The sending replication server.
    pub replica_id: ReplicaId,
    /// URL peers can reach the sender at.
    pub server_url: String,
    /// The replicated base DN this session is for.
    pub base_dn: Dn,
    /// Flow-control window size.
    pub window_size: u32,
    /// Whether to keep encrypting the session after the handshake.
    pub ssl_encryption: bool,
    /// Pending-changes threshold beyond which a replica is degraded.
    /// Not on the wire in V1 (decodes as -1).
    pub degraded_status_threshold: i32,
    /// What the sender has already seen, per replica.
    pub server_state: ServerState,
}

impl ReplServerStartMsg {
    /// Encodes with the header version taken from `self.version`.
    ///
    /// Layout: `tag | version byte | generation id | base DN | replica id |
    /// server URL | window size | ssl flag [| degraded threshold (V2+)] |
    /// server state (to end of buffer)`.
    pub fn encode(&self, _session_version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_REPL_SERVER_START);
        w.write_byte(self.version as u8);
        w.write_num(self.generation_id);
        w.write_str(&self.base_dn.to_string());
        w.write_num(self.replica_id);
        w.write_str(&self.server_url);
        w.write_num(self.window_size);
        w.write_bool(self.ssl_encryption);
        if self.version >= PROTOCOL_V2 {
            w.write_num(self.degraded_status_threshold);
        }
        w.write_tail(&self.server_state.encode_wire());
        w.finish()
    }

    /// Decodes, reading the version from the message header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_REPL_SERVER_START)?;
        let version = ProtocolVersion::from(r.read_byte()?);
        if !is_supported(version) {
            return Err(ProtoError::UnsupportedVersion(version));
        }
        let generation_id = r.read_num::<i64>()?;
        let base_dn = r
            .read_str()?
            .parse::<Dn>()
            .map_err(ProtoError::data_format)?;
        let replica_id = r.read_num::<ReplicaId>()?;
        let server_url = r.read_str()?.to_string();
        let window_size = r.read_num::<u32>()?;
        let ssl_encryption = r.read_bool()?;
        let degraded_status_threshold = if version >= PROTOCOL_V2 {
            r.read_num::<i32>()?
        } else {
            -1
        };
        let server_state =
            ServerState::decode_wire(r.read_tail()).map_err(ProtoError::data_format)?;
        Ok(Self {
            version,
            generation_id,
            replica_id,
            server_url,
            base_dn,
            window_size,
            ssl_encryption,
            degraded_status_threshold,
            server_state,
        })
    }
}
