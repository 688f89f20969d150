//! The replication message sum type and its tag dispatch.
//!
//! The message kind is a closed enum dispatched by the decoder on the first
//! byte of the buffer; each variant owns its wire layout.

use crate::ack::AckMsg;
use crate::codec::peek_tag;
use crate::error::{ProtoError, Result};
use crate::error_msg::ErrorMsg;
use crate::init::{InitializeRequestMsg, InitializeTargetMsg};
use crate::monitor::MonitorRequestMsg;
use crate::reset::ResetGenerationIdMsg;
use crate::start::ReplServerStartMsg;
use crate::update::UpdateMsg;
use crate::version::{is_supported, ProtocolVersion};

/// Tag byte of a modify update.
pub const MSG_TYPE_MODIFY: u8 = 1;
/// Tag byte of an add update.
pub const MSG_TYPE_ADD: u8 = 2;
/// Tag byte of a delete update.
pub const MSG_TYPE_DELETE: u8 = 3;
/// Tag byte of a modify-DN update.
pub const MSG_TYPE_MODIFY_DN: u8 = 4;
/// Tag byte of an acknowledgement.
pub const MSG_TYPE_ACK: u8 = 5;
/// Tag byte of an error report.
pub const MSG_TYPE_ERROR: u8 = 6;
/// Tag byte of a monitoring-information request.
pub const MSG_TYPE_MONITOR_REQUEST: u8 = 7;
/// Tag byte of a total-update request.
pub const MSG_TYPE_INITIALIZE_REQUEST: u8 = 8;
/// Tag byte of a total-update announcement.
pub const MSG_TYPE_INITIALIZE_TARGET: u8 = 9;
/// Tag byte of a replication-server start message.
pub const MSG_TYPE_REPL_SERVER_START: u8 = 10;
/// Tag byte of a generation-id reset.
pub const MSG_TYPE_RESET_GENERATION_ID: u8 = 11;

/// Any message of the replication protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationMsg {
    /// A replicated LDAP update (add, modify, delete, modify-DN).
    Update(UpdateMsg),
    /// Acknowledgement of an update sent in assured mode.
    Ack(AckMsg),
    /// Error report, routable to a specific replica.
    Error(ErrorMsg),
    /// Request for monitoring information.
    MonitorRequest(MonitorRequestMsg),
    /// Request that the destination export its data to the sender.
    InitializeRequest(InitializeRequestMsg),
    /// Announcement of an export about to start.
    InitializeTarget(InitializeTargetMsg),
    /// Start handshake message of a replication server.
    ReplServerStart(ReplServerStartMsg),
    /// Request that the domain's generation id be reset.
    ResetGenerationId(ResetGenerationIdMsg),
}

impl ReplicationMsg {
    /// Encodes the message for a negotiated session version.
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>> {
        if !is_supported(version) {
            return Err(ProtoError::UnsupportedVersion(version));
        }
        Ok(match self {
            ReplicationMsg::Update(m) => m.encode(version),
            ReplicationMsg::Ack(m) => m.encode(version),
            ReplicationMsg::Error(m) => m.encode(version),
            ReplicationMsg::MonitorRequest(m) => m.encode(version),
            ReplicationMsg::InitializeRequest(m) => m.encode(version),
            ReplicationMsg::InitializeTarget(m) => m.encode(version),
            ReplicationMsg::ReplServerStart(m) => m.encode(version),
            ReplicationMsg::ResetGenerationId(m) => m.encode(version),
        })
    }

    /// Decodes one message, dispatching on the tag byte.
    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self> {
        if !is_supported(version) {
            return Err(ProtoError::UnsupportedVersion(version));
        }
        match peek_tag(buf)? {
            MSG_TYPE_MODIFY | MSG_TYPE_ADD | MSG_TYPE_DELETE | MSG_TYPE_MODIFY_DN => {
                Ok(ReplicationMsg::Update(UpdateMsg::decode(buf, version)?))
            }
            MSG_TYPE_ACK => Ok(ReplicationMsg::Ack(AckMsg::decode(buf, version)?)),
            MSG_TYPE_ERROR => Ok(ReplicationMsg::Error(ErrorMsg::decode(buf, version)?)),
            MSG_TYPE_MONITOR_REQUEST => Ok(ReplicationMsg::MonitorRequest(
                MonitorRequestMsg::decode(buf, version)?,
            )),
            MSG_TYPE_INITIALIZE_REQUEST => Ok(ReplicationMsg::InitializeRequest(
                InitializeRequestMsg::decode(buf, version)?,
            )),
            MSG_TYPE_INITIALIZE_TARGET => Ok(ReplicationMsg::InitializeTarget(
                InitializeTargetMsg::decode(buf, version)?,
            )),
            MSG_TYPE_REPL_SERVER_START => Ok(ReplicationMsg::ReplServerStart(
                ReplServerStartMsg::decode(buf)?,
            )),
            MSG_TYPE_RESET_GENERATION_ID => Ok(ReplicationMsg::ResetGenerationId(
                ResetGenerationIdMsg::decode(buf, version)?,
            )),
            tag => Err(ProtoError::UnknownMsgType(tag)),
        }
    }
}
