//! Per-domain replication configuration.

use ferrodir_types::{Dn, ReplicaId};
use serde::{Deserialize, Serialize};

/// Configuration of one replicated base DN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// The replicated base DN.
    pub base_dn: Dn,
    /// This replica's id; must be non-negative.
    pub replica_id: ReplicaId,
    /// Flow-control window advertised in start messages.
    pub window_size: u32,
    /// Historical records older than this are purged at encode time.
    /// Zero disables purging.
    pub purge_delay_ms: u64,
    /// Interval between periodic server-state saves.
    pub state_save_interval_ms: u64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            base_dn: Dn::parse("dc=example,dc=com").unwrap(),
            replica_id: 1,
            window_size: 100,
            purge_delay_ms: 0,
            state_save_interval_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DomainConfig::default();
        assert_eq!(config.replica_id, 1);
        assert_eq!(config.window_size, 100);
        assert_eq!(config.purge_delay_ms, 0);
    }

    #[test]
    fn test_config_from_json() {
        let config: DomainConfig = serde_json::from_str(
            r#"{
                "base_dn": "dc=test,dc=com",
                "replica_id": 4,
                "window_size": 50,
                "purge_delay_ms": 86400000,
                "state_save_interval_ms": 500
            }"#,
        )
        .unwrap();
        assert_eq!(config.base_dn, Dn::parse("dc=test,dc=com").unwrap());
        assert_eq!(config.replica_id, 4);
        assert_eq!(config.purge_delay_ms, 86_400_000);
    }
}
