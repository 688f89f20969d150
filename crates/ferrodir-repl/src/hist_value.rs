//! The persisted historical attribute grammar.
//!
//! Each entry carries its replication history as a multi-valued operational
//! attribute, one value per history record:
//!
//! ```text
//! description:00000108b3a655410000000100000001:add:added_value
//! description:00000108b3a6cbb80000000100000001:del:deleted_value
//! description;lang-fr:00000108b3a6cbb80000000200000001:repl:new_value
//! description:00000108b3a6cbb80000000300000001:attrDel
//! dn:00000108b3a655410000000100000001:add
//! dn:00000108b3a655410000000100000001:moddn
//! ```
//!
//! The sentinel attribute name `dn` records entry creation and rename dates
//! instead of attribute history. This textual grammar is load-bearing:
//! other replicas and the crash-recovery scan parse it.

use std::fmt;

use ferrodir_types::{AttrDescription, AttrValue, Attribute, ChangeNumber, ModType, Modification};

use crate::error::ReplError;

/// The kind token of one history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistAttrModificationKey {
    /// A value was added.
    Add,
    /// A value was deleted.
    Del,
    /// The attribute was replaced with a value.
    Repl,
    /// The whole attribute was deleted.
    AttrDel,
}

impl HistAttrModificationKey {
    /// The token used in the persisted grammar.
    pub fn label(&self) -> &'static str {
        match self {
            HistAttrModificationKey::Add => "add",
            HistAttrModificationKey::Del => "del",
            HistAttrModificationKey::Repl => "repl",
            HistAttrModificationKey::AttrDel => "attrDel",
        }
    }

    /// Decodes a token, returning `None` for an unknown kind.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "add" => Some(HistAttrModificationKey::Add),
            "del" => Some(HistAttrModificationKey::Del),
            "repl" => Some(HistAttrModificationKey::Repl),
            "attrDel" => Some(HistAttrModificationKey::AttrDel),
            _ => None,
        }
    }
}

impl fmt::Display for HistAttrModificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// What one history record describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistRecord {
    /// History of one attribute modification.
    AttrMod {
        /// The attribute (with options) the record is about.
        desc: AttrDescription,
        /// What happened to it.
        key: HistAttrModificationKey,
        /// The value concerned; absent for whole-attribute deletes.
        value: Option<AttrValue>,
    },
    /// The entry was created (sentinel `dn:<cn>:add`).
    EntryAdded,
    /// The entry was renamed (sentinel `dn:<cn>:moddn`).
    EntryRenamed,
}

/// One parsed value of the historical attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalAttributeValue {
    /// When the recorded change happened.
    pub cn: ChangeNumber,
    /// What the record describes.
    pub record: HistRecord,
}

impl HistoricalAttributeValue {
    /// Parses one persisted history value.
    pub fn parse(s: &str) -> Result<Self, ReplError> {
        let err = |reason: &str| ReplError::HistoryParse {
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let tokens: Vec<&str> = s.splitn(4, ':').collect();
        if tokens.len() < 3 {
            return Err(err("expected at least attr:cn:kind"));
        }
        let cn: ChangeNumber = tokens[1].parse().map_err(|_| err("bad change number"))?;

        if tokens[0] == "dn" {
            return match tokens[2] {
                "add" => Ok(Self {
                    cn,
                    record: HistRecord::EntryAdded,
                }),
                "moddn" => Ok(Self {
                    cn,
                    record: HistRecord::EntryRenamed,
                }),
                _ => Err(err("bad dn record kind")),
            };
        }

        let desc = AttrDescription::parse(tokens[0]);
        let key = HistAttrModificationKey::from_label(tokens[2]).ok_or_else(|| {
            err("unknown modification kind")
        })?;
        let value = if key == HistAttrModificationKey::AttrDel {
            None
        } else {
            tokens.get(3).map(|v| AttrValue::from(*v))
        };
        Ok(Self {
            cn,
            record: HistRecord::AttrMod { desc, key, value },
        })
    }

    /// Encodes back to the persisted form.
    pub fn encode(&self) -> String {
        match &self.record {
            HistRecord::EntryAdded => format!("dn:{}:add", self.cn),
            HistRecord::EntryRenamed => format!("dn:{}:moddn", self.cn),
            HistRecord::AttrMod { desc, key, value } => match value {
                Some(value) => format!("{desc}:{}:{}:{value}", self.cn, key.label()),
                None => format!("{desc}:{}:{}", self.cn, key.label()),
            },
        }
    }

    /// Generates the modification equivalent to this record, used when
    /// re-materializing updates from history. Entry-level records produce
    /// no modification.
    pub fn generate_mod(&self) -> Option<Modification> {
        let HistRecord::AttrMod { desc, key, value } = &self.record else {
            return None;
        };
        let values = value.iter().cloned().collect();
        let attr = Attribute::new(desc.clone(), values);
        let kind = match key {
            HistAttrModificationKey::Add => ModType::Add,
            HistAttrModificationKey::Del => ModType::Delete,
            HistAttrModificationKey::Repl => ModType::Replace,
            HistAttrModificationKey::AttrDel => ModType::Delete,
        };
        Some(Modification::new(kind, attr))
    }
}
