//! Replication contexts attached to in-flight local operations.
//!
//! When the local queue assigns a change number to an operation, the context
//! travels with the operation through the LDAP pipeline so the post-commit
//! path can build the outgoing update message with the same change number
//! and entry UUID.

use ferrodir_types::ChangeNumber;

/// Context attached to a local modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyContext {
    /// The change number assigned to the operation.
    pub change_number: ChangeNumber,
    /// Stable unique id of the modified entry.
    pub entry_uuid: String,
}

impl ModifyContext {
    /// Creates a modify context.
    pub fn new(change_number: ChangeNumber, entry_uuid: impl Into<String>) -> Self {
        Self {
            change_number,
            entry_uuid: entry_uuid.into(),
        }
    }
}

/// Context attached to a local modify-DN operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnContext {
    /// The change number assigned to the operation.
    pub change_number: ChangeNumber,
    /// Stable unique id of the renamed entry.
    pub entry_uuid: String,
    /// Unique id of the new parent entry, `None` when the entry stays below
    /// the same parent.
    pub new_superior_uuid: Option<String>,
}

impl ModifyDnContext {
    /// Creates a modify-DN context.
    pub fn new(
        change_number: ChangeNumber,
        entry_uuid: impl Into<String>,
        new_superior_uuid: Option<String>,
    ) -> Self {
        Self {
            change_number,
            entry_uuid: entry_uuid.into(),
            new_superior_uuid,
        }
    }
}
