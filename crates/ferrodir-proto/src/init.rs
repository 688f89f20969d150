//! Total-update (initialization) messages.
//!
//! A replica that needs a full copy of a domain sends an
//! [`InitializeRequestMsg`] to the replica it wants the data from; the
//! exporter announces the transfer with an [`InitializeTargetMsg`] before
//! streaming the entries.

use ferrodir_types::{Dn, ReplicaId};

use crate::codec::{FieldReader, FieldWriter};
use crate::error::{ProtoError, Result};
use crate::msg::{MSG_TYPE_INITIALIZE_REQUEST, MSG_TYPE_INITIALIZE_TARGET};
use crate::version::{ProtocolVersion, PROTOCOL_V4};

/// Asks the destination replica to export its data to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeRequestMsg {
    /// The base DN of the domain to initialize.
    pub base_dn: Dn,
    /// The replica requesting the export.
    pub sender: ReplicaId,
    /// The replica asked to export.
    pub destination: ReplicaId,
    /// Flow-control window for the transfer. Zero when talking to a pre-V4
    /// peer that does not negotiate one.
    pub init_window: u32,
}

impl InitializeRequestMsg {
    /// Creates a request.
    pub fn new(base_dn: Dn, sender: ReplicaId, destination: ReplicaId, init_window: u32) -> Self {
        Self {
            base_dn,
            sender,
            destination,
            init_window,
        }
    }

    /// Encodes for the given session version.
    ///
    /// Layout: `tag | base DN | sender | destination [| init window (V4+)]`.
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_INITIALIZE_REQUEST);
        w.write_str(&self.base_dn.to_string());
        w.write_num(self.sender);
        w.write_num(self.destination);
        if version >= PROTOCOL_V4 {
            w.write_num(self.init_window);
        }
        w.finish()
    }

    /// Decodes from the wire form.
    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_INITIALIZE_REQUEST)?;
        let base_dn = r
            .read_str()?
            .parse::<Dn>()
            .map_err(ProtoError::data_format)?;
        let sender = r.read_num::<ReplicaId>()?;
        let destination = r.read_num::<ReplicaId>()?;
        let init_window = if version >= PROTOCOL_V4 {
            r.read_num::<u32>()?
        } else {
            0
        };
        Ok(Self {
            base_dn,
            sender,
            destination,
            init_window,
        })
    }
}

/// Announces an export: sent before the entries, to the import target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeTargetMsg {
    /// The replica being initialized.
    pub destination: ReplicaId,
    /// The base DN of the exported domain.
    pub base_dn: Dn,
    /// The exporting replica.
    pub sender: ReplicaId,
    /// The replica whose request started this export; lets a target that
    /// issued an [`InitializeRequestMsg`] recognize the matching transfer.
    pub requestor: ReplicaId,
    /// Number of entries about to be sent.
    pub entry_count: u64,
    /// Flow-control window for the transfer (V4+, zero otherwise).
    pub init_window: u32,
}

impl InitializeTargetMsg {
    /// Encodes for the given session version.
    ///
    /// Layout: `tag | destination | base DN | sender | requestor |
    /// entry count [| init window (V4+)]`.
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_INITIALIZE_TARGET);
        w.write_num(self.destination);
        w.write_str(&self.base_dn.to_string());
        w.write_num(self.sender);
        w.write_num(self.requestor);
        w.write_num(self.entry_count);
        if version >= PROTOCOL_V4 {
            w.write_num(self.init_window);
        }
        w.finish()
    }

    /// Decodes from the wire form.
    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_INITIALIZE_TARGET)?;
        let destination = r.read_num::<ReplicaId>()?;
        let base_dn = r
            .read_str()?
            .parse::<Dn>()
            .map_err(ProtoError::data_format)?;
        let sender = r.read_num::<ReplicaId>()?;
        let requestor = r.read_num::<ReplicaId>()?;
        let entry_count = r.read_num::<u64>()?;
        let init_window = if version >= PROTOCOL_V4 {
            r.read_num::<u32>()?
        } else {
            0
        };
        Ok(Self {
            destination,
            base_dn,
            sender,
            requestor,
            entry_count,
            init_window,
        })
    }
}
