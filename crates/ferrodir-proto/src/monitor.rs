//! Monitoring-information requests.

use ferrodir_types::ReplicaId;

use crate::codec::{FieldReader, FieldWriter};
use crate::error::Result;
use crate::msg::MSG_TYPE_MONITOR_REQUEST;
use crate::version::ProtocolVersion;

/// Asks the destination replica for its monitoring information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRequestMsg {
    /// The requesting replica.
    pub sender: ReplicaId,
    /// The replica (or sentinel) the request is routed to.
    pub destination: ReplicaId,
}

impl MonitorRequestMsg {
    /// Creates a request.
    pub fn new(sender: ReplicaId, destination: ReplicaId) -> Self {
        Self {
            sender,
            destination,
        }
    }

    /// Encodes for the given session version.
    ///
    /// Layout: `tag | sender | destination`.
    pub fn encode(&self, _version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_MONITOR_REQUEST);
        w.write_num(self.sender);
        w.write_num(self.destination);
        w.finish()
    }

    /// Decodes from the wire form.
    pub fn decode(buf: &[u8], _version: ProtocolVersion) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_MONITOR_REQUEST)?;
        let sender = r.read_num::<ReplicaId>()?;
        let destination = r.read_num::<ReplicaId>()?;
        Ok(Self {
            sender,
            destination,
        })
    }
}
