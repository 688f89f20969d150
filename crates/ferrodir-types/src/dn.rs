//! Distinguished names, normalized for the ordering and dependency checks
//! the replication queues perform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A normalized distinguished name: RDN components leaf-first.
///
/// Components are trimmed and lowercased on parse; comparisons are exact on
/// the normalized form. Ancestor/descendant tests are inclusive: a DN is an
/// ancestor (and a descendant) of itself.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Dn {
    rdns: Vec<String>,
}

impl Dn {
    /// Parses and normalizes a DN string such as `ou=People,dc=example,dc=com`.
    pub fn parse(s: &str) -> Result<Dn, TypeError> {
        let invalid = || TypeError::InvalidDn {
            input: s.to_string(),
        };
        if s.trim().is_empty() {
            return Err(invalid());
        }
        let mut rdns = Vec::new();
        for component in s.split(',') {
            let normalized = component.trim().to_ascii_lowercase();
            if normalized.is_empty() {
                return Err(invalid());
            }
            rdns.push(normalized);
        }
        Ok(Dn { rdns })
    }

    /// The number of RDN components.
    pub fn num_components(&self) -> usize {
        self.rdns.len()
    }

    /// The leading (leaf) RDN component.
    pub fn rdn(&self) -> &str {
        &self.rdns[0]
    }

    /// The parent DN, or `None` for a single-component DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.len() <= 1 {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// True iff `other` lives in the subtree rooted at `self` (inclusive).
    pub fn is_ancestor_of(&self, other: &Dn) -> bool {
        let n = self.rdns.len();
        let m = other.rdns.len();
        m >= n && other.rdns[m - n..] == self.rdns[..]
    }

    /// True iff `self` lives in the subtree rooted at `other` (inclusive).
    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        other.is_ancestor_of(self)
    }

    /// True iff `self` is the immediate parent of `other`.
    pub fn is_parent_of(&self, other: &Dn) -> bool {
        other.parent().as_ref() == Some(self)
    }

    /// Builds the DN of a child entry with the given leaf RDN.
    pub fn child(&self, rdn: &str) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn.trim().to_ascii_lowercase());
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// The DN obtained by replacing the leaf RDN, keeping the parent.
    pub fn rename(&self, new_rdn: &str) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns[0] = new_rdn.trim().to_ascii_lowercase();
        Dn { rdns }
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rdns.join(","))
    }
}

impl FromStr for Dn {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

impl TryFrom<String> for Dn {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Dn::parse(&s)
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> String {
        dn.to_string()
    }
}
