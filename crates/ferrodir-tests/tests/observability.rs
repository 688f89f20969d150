//! Domain statistics and configuration surface as seen by the management
//! layer (JSON snapshots).

use anyhow::Result;
use ferrodir_repl::{DomainConfig, DomainStats};
use ferrodir_tests::{dn, TestReplica};
use ferrodir_types::{AttrDescription, Entry, ModType, Modification};

#[test]
fn stats_snapshot_serializes_for_monitoring() -> Result<()> {
    let r1 = TestReplica::new(1);
    let r2 = TestReplica::new(2);
    let target = dn("cn=target,dc=example,dc=com");
    let entry = Entry::new(target.clone(), "uuid-target");
    r1.seed_entry(entry.clone());
    r2.seed_entry(entry);

    r1.local_modify(
        &target,
        vec![Modification::with_values(
            ModType::Add,
            AttrDescription::new("description"),
            &["v"],
        )],
    );
    for msg in r1.drain_outbound() {
        r2.apply_remote(msg);
    }
    r2.domain.save_state();

    let json = serde_json::to_string(&r2.domain.stats())?;
    let parsed: DomainStats = serde_json::from_str(&json)?;
    assert_eq!(parsed.updates_received, 1);
    assert_eq!(parsed.updates_replayed, 1);
    assert_eq!(parsed.state_saves, 1);
    Ok(())
}

#[test]
fn config_loads_from_json() -> Result<()> {
    let config: DomainConfig = serde_json::from_str(
        r#"{
            "base_dn": "dc=corp,dc=example",
            "replica_id": 7,
            "window_size": 200,
            "purge_delay_ms": 0,
            "state_save_interval_ms": 2000
        }"#,
    )?;
    assert_eq!(config.replica_id, 7);
    assert_eq!(config.base_dn, dn("dc=corp,dc=example"));
    Ok(())
}
