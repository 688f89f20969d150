//! Attribute descriptions and values.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An attribute description: the lowercased attribute name plus its tagging
/// options (`description;lang-fr` style), as persisted and replicated.
///
/// Schema knowledge (single-valued or not) deliberately lives outside this
/// type: the schema engine is an external collaborator and descriptions must
/// compare equal regardless of schema.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AttrDescription {
    name: String,
    options: BTreeSet<String>,
}

impl AttrDescription {
    /// Creates a description with no options.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_ascii_lowercase(),
            options: BTreeSet::new(),
        }
    }

    /// Creates a description with the given options.
    pub fn with_options<'a>(name: &str, options: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            name: name.trim().to_ascii_lowercase(),
            options: options
                .into_iter()
                .map(|o| o.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Parses the persisted `name[;option]*` form.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default();
        Self::with_options(name, parts)
    }

    /// The lowercased attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalized options, in sorted order.
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(String::as_str)
    }

    /// True if the description carries at least one option.
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }
}

impl fmt::Display for AttrDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for option in &self.options {
            write!(f, ";{option}")?;
        }
        Ok(())
    }
}

/// A single attribute value.
///
/// Values are UTF-8 text compared exactly; value matching rules belong to
/// the excluded schema engine.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AttrValue(String);

impl AttrValue {
    /// Creates a value from text.
    pub fn new(s: impl Into<String>) -> Self {
        AttrValue(s.into())
    }

    /// The value text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue(s)
    }
}

/// An attribute description together with a (possibly empty) set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// The attribute description.
    pub desc: AttrDescription,
    /// The values, in insertion order, without duplicates.
    pub values: Vec<AttrValue>,
}

impl Attribute {
    /// Creates an empty attribute.
    pub fn empty(desc: AttrDescription) -> Self {
        Self {
            desc,
            values: Vec::new(),
        }
    }

    /// Creates an attribute with values.
    pub fn new(desc: AttrDescription, values: Vec<AttrValue>) -> Self {
        Self { desc, values }
    }

    /// True if the attribute has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if `value` is among the attribute's values.
    pub fn contains(&self, value: &AttrValue) -> bool {
        self.values.contains(value)
    }

    /// Appends `value` unless already present.
    pub fn add(&mut self, value: AttrValue) {
        if !self.contains(&value) {
            self.values.push(value);
        }
    }

    /// Removes `value` if present.
    pub fn remove(&mut self, value: &AttrValue) {
        self.values.retain(|v| v != value);
    }
}
