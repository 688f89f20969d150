//! Replicated LDAP update messages.
//!
//! One [`UpdateMsg`] is published for every committed local operation and
//! replayed for every received remote operation. The four kinds share a
//! common header (change number, entry UUID, target DN) and differ in their
//! payload.

use ferrodir_types::{
    AttrDescription, AttrValue, Attribute, ChangeNumber, Dn, ModType, Modification,
};

use crate::codec::{FieldReader, FieldWriter};
use crate::error::{ProtoError, Result};
use crate::msg::{MSG_TYPE_ADD, MSG_TYPE_DELETE, MSG_TYPE_MODIFY, MSG_TYPE_MODIFY_DN};
use crate::version::ProtocolVersion;

/// The kind of a replicated update, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// Entry creation.
    Add,
    /// Attribute modifications on an existing entry.
    Modify,
    /// Entry deletion.
    Delete,
    /// Entry rename and/or move.
    ModifyDn,
}

/// Kind-specific payload of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    /// The attributes of the created entry.
    Add {
        /// Attributes of the new entry.
        attributes: Vec<Attribute>,
    },
    /// The modifications to replay.
    Modify {
        /// Modification list, in operation order.
        mods: Vec<Modification>,
    },
    /// Entry deletion carries no payload beyond the header.
    Delete,
    /// Rename/move parameters.
    ModifyDn {
        /// The new leaf RDN.
        new_rdn: String,
        /// Whether the old RDN value is removed from the entry.
        delete_old_rdn: bool,
        /// New parent DN, when the entry moves.
        new_superior: Option<Dn>,
        /// Unique id of the new parent entry, when the entry moves.
        new_superior_uuid: Option<String>,
    },
}

/// A replicated update: common header plus kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMsg {
    /// The change number ordering this update.
    pub change_number: ChangeNumber,
    /// Stable unique id of the target entry.
    pub entry_uuid: String,
    /// DN of the target entry at the time of the operation.
    pub dn: Dn,
    /// The operation payload.
    pub op: UpdateOp,
}

impl UpdateMsg {
    /// Creates an add update.
    pub fn add(
        change_number: ChangeNumber,
        entry_uuid: impl Into<String>,
        dn: Dn,
        attributes: Vec<Attribute>,
    ) -> Self {
        Self {
            change_number,
            entry_uuid: entry_uuid.into(),
            dn,
            op: UpdateOp::Add { attributes },
        }
    }

    /// Creates a modify update.
    pub fn modify(
        change_number: ChangeNumber,
        entry_uuid: impl Into<String>,
        dn: Dn,
        mods: Vec<Modification>,
    ) -> Self {
        Self {
            change_number,
            entry_uuid: entry_uuid.into(),
            dn,
            op: UpdateOp::Modify { mods },
        }
    }

    /// Creates a delete update.
    pub fn delete(change_number: ChangeNumber, entry_uuid: impl Into<String>, dn: Dn) -> Self {
        Self {
            change_number,
            entry_uuid: entry_uuid.into(),
            dn,
            op: UpdateOp::Delete,
        }
    }

    /// Creates a modify-DN update.
    pub fn modify_dn(
        change_number: ChangeNumber,
        entry_uuid: impl Into<String>,
        dn: Dn,
        new_rdn: impl Into<String>,
        delete_old_rdn: bool,
        new_superior: Option<Dn>,
        new_superior_uuid: Option<String>,
    ) -> Self {
        Self {
            change_number,
            entry_uuid: entry_uuid.into(),
            dn,
            op: UpdateOp::ModifyDn {
                new_rdn: new_rdn.into(),
                delete_old_rdn,
                new_superior,
                new_superior_uuid,
            },
        }
    }

    /// The update kind.
    pub fn kind(&self) -> UpdateKind {
        match self.op {
            UpdateOp::Add { .. } => UpdateKind::Add,
            UpdateOp::Modify { .. } => UpdateKind::Modify,
            UpdateOp::Delete => UpdateKind::Delete,
            UpdateOp::ModifyDn { .. } => UpdateKind::ModifyDn,
        }
    }

    /// The DN the entry will have after a modify-DN, `None` for other kinds.
    pub fn new_dn(&self) -> Option<Dn> {
        if let UpdateOp::ModifyDn {
            new_rdn,
            new_superior,
            ..
        } = &self.op
        {
            match new_superior.clone().or_else(|| self.dn.parent()) {
                Some(parent) => Some(parent.child(new_rdn)),
                None => Dn::parse(new_rdn).ok(),
            }
        } else {
            None
        }
    }

    /// True if this is a modify-DN whose resulting DN equals `dn`.
    pub fn new_dn_is(&self, dn: &Dn) -> bool {
        self.new_dn().as_ref() == Some(dn)
    }

    /// True if this is a modify-DN whose resulting DN is an ancestor of `dn`.
    pub fn new_dn_is_ancestor_of(&self, dn: &Dn) -> bool {
        self.new_dn().is_some_and(|new_dn| new_dn.is_ancestor_of(dn))
    }

    /// True if this is a modify-DN moving the entry under `dn`.
    pub fn new_parent_is(&self, dn: &Dn) -> bool {
        if let UpdateOp::ModifyDn { new_superior, .. } = &self.op {
            new_superior.as_ref() == Some(dn)
        } else {
            false
        }
    }

    fn tag(&self) -> u8 {
        match self.kind() {
            UpdateKind::Add => MSG_TYPE_ADD,
            UpdateKind::Modify => MSG_TYPE_MODIFY,
            UpdateKind::Delete => MSG_TYPE_DELETE,
            UpdateKind::ModifyDn => MSG_TYPE_MODIFY_DN,
        }
    }

    /// Encodes for the given session version.
    ///
    /// Common layout: `tag | change number | entry UUID | DN | payload`.
    /// The payload encodes nested lists with explicit count fields; values
    /// must not contain NUL bytes.
    pub fn encode(&self, _version: ProtocolVersion) -> Vec<u8> {
        let mut w = FieldWriter::new(self.tag());
        w.write_str(&self.change_number.to_string());
        w.write_str(&self.entry_uuid);
        w.write_str(&self.dn.to_string());
        match &self.op {
            UpdateOp::Add { attributes } => {
                w.write_num(attributes.len());
                for attr in attributes {
                    encode_attribute(&mut w, attr);
                }
            }
            UpdateOp::Modify { mods } => {
                w.write_num(mods.len());
                for m in mods {
                    w.write_str(mod_type_token(m.kind));
                    encode_attribute(&mut w, &m.attr);
                }
            }
            UpdateOp::Delete => {}
            UpdateOp::ModifyDn {
                new_rdn,
                delete_old_rdn,
                new_superior,
                new_superior_uuid,
            } => {
                w.write_str(new_rdn);
                w.write_bool(*delete_old_rdn);
                w.write_str(&new_superior.as_ref().map(Dn::to_string).unwrap_or_default());
                w.write_str(new_superior_uuid.as_deref().unwrap_or_default());
            }
        }
        w.finish()
    }

    /// Decodes from the wire form, dispatching on the tag byte.
    pub fn decode(buf: &[u8], _version: ProtocolVersion) -> Result<Self> {
        let tag = crate::codec::peek_tag(buf)?;
        let mut r = FieldReader::new(buf, tag)?;
        let change_number = r
            .read_str()?
            .parse::<ChangeNumber>()
            .map_err(ProtoError::data_format)?;
        let entry_uuid = r.read_str()?.to_string();
        let dn = r
            .read_str()?
            .parse::<Dn>()
            .map_err(ProtoError::data_format)?;
        let op = match tag {
            MSG_TYPE_ADD => {
                let count = r.read_num::<usize>()?;
                // Counts come off the wire: never pre-allocate from them.
                let mut attributes = Vec::new();
                for _ in 0..count {
                    attributes.push(decode_attribute(&mut r)?);
                }
                UpdateOp::Add { attributes }
            }
            MSG_TYPE_MODIFY => {
                let count = r.read_num::<usize>()?;
                let mut mods = Vec::new();
                for _ in 0..count {
                    let kind = parse_mod_type(r.read_str()?)?;
                    let attr = decode_attribute(&mut r)?;
                    mods.push(Modification::new(kind, attr));
                }
                UpdateOp::Modify { mods }
            }
            MSG_TYPE_DELETE => UpdateOp::Delete,
            MSG_TYPE_MODIFY_DN => {
                let new_rdn = r.read_str()?.to_string();
                let delete_old_rdn = r.read_bool()?;
                let superior = r.read_str()?;
                let new_superior = if superior.is_empty() {
                    None
                } else {
                    Some(superior.parse::<Dn>().map_err(ProtoError::data_format)?)
                };
                let superior_uuid = r.read_str()?;
                let new_superior_uuid = if superior_uuid.is_empty() {
                    None
                } else {
                    Some(superior_uuid.to_string())
                };
                UpdateOp::ModifyDn {
                    new_rdn,
                    delete_old_rdn,
                    new_superior,
                    new_superior_uuid,
                }
            }
            other => return Err(ProtoError::UnknownMsgType(other)),
        };
        Ok(Self {
            change_number,
            entry_uuid,
            dn,
            op,
        })
    }
}

fn mod_type_token(kind: ModType) -> &'static str {
    match kind {
        ModType::Add => "add",
        ModType::Delete => "del",
        ModType::Replace => "repl",
    }
}

fn parse_mod_type(token: &str) -> Result<ModType> {
    match token {
        "add" => Ok(ModType::Add),
        "del" => Ok(ModType::Delete),
        "repl" => Ok(ModType::Replace),
        other => Err(ProtoError::data_format(format!(
            "bad modification type {other:?}"
        ))),
    }
}

fn encode_attribute(w: &mut FieldWriter, attr: &Attribute) {
    w.write_str(&attr.desc.to_string());
    w.write_num(attr.values.len());
    for value in &attr.values {
        w.write_str(value.as_str());
    }
}

fn decode_attribute(r: &mut FieldReader<'_>) -> Result<Attribute> {
    let desc = AttrDescription::parse(r.read_str()?);
    let count = r.read_num::<usize>()?;
    let mut values = Vec::new();
    for _ in 0..count {
        values.push(AttrValue::from(r.read_str()?));
    }
    Ok(Attribute::new(desc, values))
}
