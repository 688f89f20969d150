//! Generation-id reset messages.

use crate::codec::{FieldReader, FieldWriter};
use crate::error::Result;
use crate::msg::MSG_TYPE_RESET_GENERATION_ID;
use crate::version::ProtocolVersion;

/// Tells the topology that the domain's generation id must be reset.
///
/// The generation id fingerprints the initial content of a domain; replicas
/// whose generation differs from the topology's refuse to exchange updates
/// until re-initialized or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetGenerationIdMsg {
    /// The new reference generation id.
    pub generation_id: i64,
}

impl ResetGenerationIdMsg {
    /// Creates a reset message.
    pub fn new(generation_id: i64) -> Self {
        Self { generation_id }
    }

    /// Encodes for the given session version.
    ///
    /// Layout: `tag | generation id`.
    pub fn encode(&self, _version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(MSG_TYPE_RESET_GENERATION_ID);
        w.write_num(self.generation_id);
        w.finish()
    }

    /// Decodes from the wire form.
    pub fn decode(buf: &[u8], _version: ProtocolVersion) -> Result<Self> {
        let mut r = FieldReader::new(buf, MSG_TYPE_RESET_GENERATION_ID)?;
        let generation_id = r.read_num::<i64>()?;
        Ok(Self { generation_id })
    }
}
