#![warn(missing_docs)]

//! FerroDir multi-master replication core.
//!
//! This crate lets several writable replicas of the same directory data
//! accept concurrent writes and converge to an identical result without a
//! central coordinator:
//!
//! - [`pending::PendingChanges`] serializes committed local operations into
//!   change-number order before they are published;
//! - [`remote::RemotePendingChanges`] buffers inbound updates, computes the
//!   causal dependencies between operations on related DNs, and advances the
//!   shared [`ServerState`](ferrodir_types::ServerState) only over a
//!   contiguous prefix of replayed changes;
//! - [`attr_hist`] and [`entry_hist`] hold the per-attribute historical
//!   state that rewrites a replayed modification into a conflict-free
//!   equivalent, deterministically, whatever the arrival order;
//! - [`state_store::PersistentServerState`] persists the per-replica
//!   watermarks and recovers them after a crash;
//! - [`domain::ReplicationDomain`] wires the above together for one
//!   replicated base DN.

pub mod attr_hist;
pub mod config;
pub mod domain;
pub mod entry_hist;
pub mod error;
pub mod hist_value;
pub mod pending;
pub mod remote;
pub mod schema;
pub mod state_store;
pub mod stats;

pub use attr_hist::{AttrHistoricalMultiple, AttrValueHistorical, ReplayResult};
pub use config::DomainConfig;
pub use domain::ReplicationDomain;
pub use entry_hist::{EntryHistorical, FakeOperation};
pub use error::ReplError;
pub use hist_value::{HistAttrModificationKey, HistRecord, HistoricalAttributeValue};
pub use pending::{LocalOperation, PendingChanges, UpdatePublisher};
pub use remote::RemotePendingChanges;
pub use schema::{AllMultiValued, SchemaInfo};
pub use state_store::{MemoryStateStore, PersistentServerState, StateStore, StateStoreError};
pub use stats::DomainStats;
