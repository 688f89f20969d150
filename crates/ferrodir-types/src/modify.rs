//! Modifications applied to an entry's attribute.

use serde::{Deserialize, Serialize};

use crate::attr::{AttrDescription, AttrValue, Attribute};

/// The kind of a modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModType {
    /// Add the listed values.
    Add,
    /// Delete the listed values, or the whole attribute when empty.
    Delete,
    /// Replace all values with the listed ones.
    Replace,
}

/// One modification of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// What the modification does.
    pub kind: ModType,
    /// The attribute and values it applies to.
    pub attr: Attribute,
}

impl Modification {
    /// Creates a modification.
    pub fn new(kind: ModType, attr: Attribute) -> Self {
        Self { kind, attr }
    }

    /// Shorthand for a modification from a description and value texts.
    pub fn with_values(kind: ModType, desc: AttrDescription, values: &[&str]) -> Self {
        Self {
            kind,
            attr: Attribute::new(desc, values.iter().map(|v| AttrValue::from(*v)).collect()),
        }
    }

    /// The attribute description targeted by this modification.
    pub fn desc(&self) -> &AttrDescription {
        &self.attr.desc
    }
}
