//! A minimal entry model: what the conflict resolver needs to see of the
//! backend's entries.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::attr::{AttrDescription, AttrValue};
use crate::dn::Dn;
use crate::modify::{ModType, Modification};

/// A directory entry: DN, stable unique id, and user attributes.
///
/// Attribute values are a set, as in LDAP: entries that converged to the
/// same values compare equal regardless of the order the values arrived in.
/// The storage backend owns the authoritative entries; this type carries
/// the subset the replication core reads (value presence checks) and
/// writes (replaying resolved modifications).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    uuid: String,
    attrs: BTreeMap<AttrDescription, BTreeSet<AttrValue>>,
}

impl Entry {
    /// Creates an entry with no attributes.
    pub fn new(dn: Dn, uuid: impl Into<String>) -> Self {
        Self {
            dn,
            uuid: uuid.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// The entry DN.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// The entry's stable unique identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Replaces the DN (rename support).
    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    /// The values of `desc`, in value order; empty if absent.
    pub fn values(&self, desc: &AttrDescription) -> Vec<AttrValue> {
        self.attrs
            .get(desc)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True if the attribute exists with at least one value.
    pub fn has_attribute(&self, desc: &AttrDescription) -> bool {
        self.attrs.get(desc).is_some_and(|set| !set.is_empty())
    }

    /// True if `value` is present for `desc`.
    pub fn has_value(&self, desc: &AttrDescription, value: &AttrValue) -> bool {
        self.attrs.get(desc).is_some_and(|set| set.contains(value))
    }

    /// Sets the values of an attribute directly (test and bootstrap helper).
    pub fn put_attribute(&mut self, desc: AttrDescription, values: Vec<AttrValue>) {
        if values.is_empty() {
            self.attrs.remove(&desc);
        } else {
            self.attrs.insert(desc, values.into_iter().collect());
        }
    }

    /// Applies a modification to the in-memory attributes.
    pub fn apply(&mut self, m: &Modification) {
        match m.kind {
            ModType::Add => {
                let values = self.attrs.entry(m.attr.desc.clone()).or_default();
                for value in &m.attr.values {
                    values.insert(value.clone());
                }
            }
            ModType::Delete => {
                if m.attr.values.is_empty() {
                    self.attrs.remove(&m.attr.desc);
                } else if let Some(values) = self.attrs.get_mut(&m.attr.desc) {
                    for value in &m.attr.values {
                        values.remove(value);
                    }
                    if values.is_empty() {
                        self.attrs.remove(&m.attr.desc);
                    }
                }
            }
            ModType::Replace => {
                if m.attr.values.is_empty() {
                    self.attrs.remove(&m.attr.desc);
                } else {
                    self.attrs.insert(
                        m.attr.desc.clone(),
                        m.attr.values.iter().cloned().collect(),
                    );
                }
            }
        }
    }

    /// The attribute descriptions present on the entry.
    pub fn attribute_descs(&self) -> impl Iterator<Item = &AttrDescription> {
        self.attrs.keys()
    }
}
