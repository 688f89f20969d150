//! Replica identifiers and routing sentinels.

/// Identifier of a writable replica in the topology.
///
/// Real replicas always have a non-negative id; negative values are reserved
/// for the routing sentinels below and must never appear in a
/// [`ChangeNumber`](crate::ChangeNumber).
pub type ReplicaId = i32;

/// No replica is identified.
pub const UNKNOWN_REPLICA: ReplicaId = -1;

/// Every replica of the domain.
pub const ALL_REPLICAS: ReplicaId = -2;

/// The replica topologically closest to the sender.
pub const CLOSEST_REPLICA: ReplicaId = -3;

/// Returns true if `id` is one of the reserved routing sentinels.
pub fn is_routing_sentinel(id: ReplicaId) -> bool {
    matches!(id, UNKNOWN_REPLICA | ALL_REPLICAS | CLOSEST_REPLICA)
}
