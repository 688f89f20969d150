//! Acknowledgement messages.
//!
//! An [`AckMsg`] travels the reverse path of an update that was sent in
//! assured mode. The change number names the acknowledged update; the error
//! markers report what went wrong on the way to the final servers, and the
//! failed-replica list names the replicas concerned.

use ferrodir_types::{ChangeNumber, ReplicaId};

use crate::codec::{FieldReader, FieldWriter};
use crate::error::{ProtoError, Result};
use crate::msg::MSG_TYPE_ACK;
use crate::version::ProtocolVersion;

/// Acknowledgement of one update, with optional error markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckMsg {
    /// The change number of the acknowledged update.
    pub change_number: ChangeNumber,
    /// Some replica timed out while the update was forwarded.
    pub has_timeout: bool,
    /// Some replica was in a status that cannot acknowledge updates.
    pub has_wrong_status: bool,
    /// Some replica failed replaying the update.
    pub has_replay_error: bool,
    /// The replicas that reported one of the errors above.
    pub failed_replicas: Vec<ReplicaId>,
}

impl AckMsg {
    /// Creates a clean acknowledgement (no errors).
    pub fn new(change_number: ChangeNumber) -> Self {
        Self {
            change_number,
            has_timeout: false,
            has_wrong_status: false,
            has_replay_error: false,
            failed_replicas: Vec::new(),
        }
    }

    /// True if any error marker is set.
    pub fn has_errors(&self) -> bool {
        self.has_timeout || self.has_wrong_status || self.has_replay_error
    }

    /// Encodes for the given session version.
    ///
    /// Layout: `tag | change number | timeout flag | wrong-status flag |
    /// replay-error flag | failed replica ids...`; the id list runs to the
    /// end of the buffer.
    pub fn encode(&self, _version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_ACK);
        w.write_str(&self.change_number.to_string());
        w.write_flag(self.has_timeout);
        w.write_flag(self.has_wrong_status);
        w.write_flag(self.has_replay_error);
        for id in &self.failed_replicas {
            w.write_num(*id);
        }
        w.finish()
    }

    /// Decodes from the wire form.
    pub fn decode(buf: &[u8], _version: ProtocolVersion) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_ACK)?;
        let change_number = r
            .read_str()?
            .parse::<ChangeNumber>()
            .map_err(ProtoError::data_format)?;
        let has_timeout = r.read_flag()?;
        let has_wrong_status = r.read_flag()?;
        let has_replay_error = r.read_flag()?;
        let mut failed_replicas = Vec::new();
        while !r.at_end() {
            failed_replicas.push(r.read_num::<ReplicaId>()?);
        }
        Ok(Self {
            change_number,
            has_timeout,
            has_wrong_status,
            has_replay_error,
            failed_replicas,
        })
    }
}
