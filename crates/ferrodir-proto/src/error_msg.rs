//! Routable error reports.

use std::time::{SystemTime, UNIX_EPOCH};

use ferrodir_types::ReplicaId;

use crate::codec::{FieldReader, FieldWriter};
use crate::error::Result;
use crate::msg::MSG_TYPE_ERROR;
use crate::version::{ProtocolVersion, PROTOCOL_V4};

/// An error detected while servicing another replica, routed back to it.
///
/// Sent for instance when a total update cannot be performed. The creation
/// time travels on the wire from protocol V4 on; it lets a receiver sort
/// reports belonging to the current initialization attempt from stale ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    /// The replica that detected the error.
    pub sender: ReplicaId,
    /// The replica the report is routed to (may be a sentinel).
    pub destination: ReplicaId,
    /// Stable numeric code of the error condition.
    pub code: u32,
    /// Human-readable details.
    pub details: String,
    /// Creation time in milliseconds since the epoch; `None` when decoded
    /// from a pre-V4 peer that did not send it.
    pub creation_time_ms: Option<u64>,
}

impl ErrorMsg {
    /// Creates an error report stamped with the current time.
    pub fn new(
        sender: ReplicaId,
        destination: ReplicaId,
        code: u32,
        details: impl Into<String>,
    ) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        Self {
            sender,
            destination,
            code,
            details: details.into(),
            creation_time_ms: Some(now),
        }
    }

    /// Encodes for the given session version.
    ///
    /// Layout: `tag | sender | destination | code | details
    /// [| creation time (V4+)]`.
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_ERROR);
        w.write_num(self.sender);
        w.write_num(self.destination);
        w.write_num(self.code);
        w.write_str(&self.details);
        if version >= PROTOCOL_V4 {
            w.write_num(self.creation_time_ms.unwrap_or(0));
        }
        w.finish()
    }

    /// Decodes from the wire form.
    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_ERROR)?;
        let sender = r.read_num::<ReplicaId>()?;
        let destination = r.read_num::<ReplicaId>()?;
        let code = r.read_num::<u32>()?;
        let details = r.read_str()?.to_string();
        let creation_time_ms = if version >= PROTOCOL_V4 {
            Some(r.read_num::<u64>()?)
        } else {
            None
        };
        Ok(Self {
            sender,
            destination,
            code,
            details,
            creation_time_ms,
        })
    }
}
