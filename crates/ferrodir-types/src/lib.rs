#![warn(missing_docs)]

//! FerroDir shared replication data model: change numbers, per-replica server
//! state, distinguished names and the attribute/modification/entry types the
//! replication core operates on.

pub mod attr;
pub mod change_number;
pub mod dn;
pub mod entry;
pub mod error;
pub mod modify;
pub mod replica;
pub mod server_state;

pub use attr::{AttrDescription, AttrValue, Attribute};
pub use change_number::{ChangeNumber, ChangeNumberGenerator};
pub use dn::Dn;
pub use entry::Entry;
pub use error::TypeError;
pub use modify::{ModType, Modification};
pub use replica::ReplicaId;
pub use server_state::ServerState;
