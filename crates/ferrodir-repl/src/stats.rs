//! Per-domain replication statistics.

use serde::{Deserialize, Serialize};

/// Counters maintained by a [`ReplicationDomain`](crate::ReplicationDomain).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStats {
    /// Local updates published to the replication channel.
    pub updates_published: u64,
    /// Remote updates received from the replication channel.
    pub updates_received: u64,
    /// Remote updates fully replayed and committed.
    pub updates_replayed: u64,
    /// Replayed modifications that took the conflict-resolution path.
    pub conflicts_resolved: u64,
    /// Remote updates that had to wait on a dependency.
    pub dependencies_detected: u64,
    /// Acknowledgements received for assured updates.
    pub acks_received: u64,
    /// Successful server-state saves.
    pub state_saves: u64,
    /// Failed server-state saves (retried on the next cycle).
    pub state_save_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_zeroed() {
        let stats = DomainStats::default();
        assert_eq!(stats.updates_published, 0);
        assert_eq!(stats.state_save_failures, 0);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let stats = DomainStats {
            updates_published: 5,
            updates_received: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        let back: DomainStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
