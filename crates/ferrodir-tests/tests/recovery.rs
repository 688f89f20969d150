//! Crash recovery: a restarted domain must not lose changes applied after
//! the last periodic state save.

use std::sync::Arc;

use ferrodir_proto::UpdateMsg;
use ferrodir_repl::{DomainConfig, MemoryStateStore, ReplicationDomain};
use ferrodir_tests::{dn, TestReplica};
use ferrodir_types::{AttrDescription, ChangeNumber, Entry, ModType, Modification};
use tokio::sync::mpsc;

#[test]
fn restarted_domain_reloads_saved_state() {
    let r = TestReplica::new(1);
    r.seed_entry(Entry::new(dn("cn=e,dc=example,dc=com"), "uuid-e"));
    let committed = r.local_modify(
        &dn("cn=e,dc=example,dc=com"),
        vec![Modification::with_values(
            ModType::Add,
            AttrDescription::new("description"),
            &["v"],
        )],
    );
    assert!(r.domain.save_state());

    // Restart: a fresh domain over the same store sees the saved state and
    // never re-issues a change number at or below it.
    let (tx, _rx) = mpsc::unbounded_channel::<UpdateMsg>();
    let restarted = ReplicationDomain::new(
        DomainConfig::default(),
        r.store(),
        Arc::new(tx),
    );
    assert!(restarted.server_state().cover(committed));
}

#[test]
fn recovery_scan_advances_past_last_save() {
    let store = Arc::new(MemoryStateStore::new());
    let saved = ChangeNumber::new(1_000, 1, 1);
    let applied_after_save = ChangeNumber::new(1_000, 7, 1);
    store.set_base_values(vec![saved.to_string()]);
    // An entry changed after the save carries the newer change in its
    // historical attribute; the scan must pick it up.
    store.set_changed_entries(vec![format!(
        "description:{applied_after_save}:add:recovered"
    )]);

    let (tx, _rx) = mpsc::unbounded_channel::<UpdateMsg>();
    let domain = ReplicationDomain::new(DomainConfig::default(), store, Arc::new(tx));
    assert!(domain.server_state().cover(applied_after_save));
}

#[test]
fn republish_rebuilds_updates_from_history() {
    let r = TestReplica::new(1);
    let target = dn("cn=e,dc=example,dc=com");
    r.seed_entry(Entry::new(target.clone(), "uuid-e"));

    let before = r.local_modify(
        &target,
        vec![Modification::with_values(
            ModType::Add,
            AttrDescription::new("description"),
            &["old"],
        )],
    );
    let after = r.local_modify(
        &target,
        vec![Modification::with_values(
            ModType::Add,
            AttrDescription::new("description"),
            &["new"],
        )],
    );
    r.drain_outbound();

    // Only the change newer than the resume point is republished.
    let hist = r.entry_history(&target).unwrap();
    let count = r
        .domain
        .republish_changes_newer_than(&hist, &target, "uuid-e", before);
    assert_eq!(count, 1);
    let republished = r.drain_outbound();
    assert_eq!(republished.len(), 1);
    assert_eq!(republished[0].change_number, after);
}

#[test]
fn persisted_history_roundtrips_through_store_format() {
    let r = TestReplica::new(1);
    let target = dn("cn=e,dc=example,dc=com");
    r.seed_entry(Entry::new(target.clone(), "uuid-e"));
    r.local_modify(
        &target,
        vec![Modification::with_values(
            ModType::Replace,
            AttrDescription::new("description"),
            &["persisted"],
        )],
    );

    let mut hist = r.entry_history(&target).unwrap();
    let encoded = hist.encode();
    let decoded = ferrodir_repl::EntryHistorical::decode(encoded.iter().map(String::as_str));
    assert_eq!(decoded.attr(&AttrDescription::new("description")),
               hist.attr(&AttrDescription::new("description")));
}
