//! The narrow slice of schema knowledge the conflict resolver needs.

use ferrodir_types::AttrDescription;

/// Supplies the only schema fact the core consumes: whether an attribute is
/// single-valued. The schema engine itself is an external collaborator.
pub trait SchemaInfo: Send + Sync {
    /// True if `desc` names a single-valued attribute.
    fn is_single_valued(&self, desc: &AttrDescription) -> bool;
}

/// Schema stub that treats every attribute as multi-valued.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllMultiValued;

impl SchemaInfo for AllMultiValued {
    fn is_single_valued(&self, _desc: &AttrDescription) -> bool {
        false
    }
}
