//! Test harness for cross-crate replication scenarios.
//!
//! [`TestReplica`] stands in for one directory server instance: a
//! [`ReplicationDomain`] wired to an in-memory entry table and an in-memory
//! outbound channel, driving the same control flow the LDAP pipeline would
//! (announce local operation, apply, commit, publish; receive remote
//! update, dependency-check, resolve conflicts, apply, commit).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use ferrodir_proto::{UpdateMsg, UpdateOp};
use ferrodir_repl::{
    AllMultiValued, DomainConfig, EntryHistorical, LocalOperation, MemoryStateStore,
    ReplicationDomain,
};
use ferrodir_types::{ChangeNumber, Dn, Entry, Modification, ReplicaId};

/// One simulated directory server replica.
pub struct TestReplica {
    /// The replication core under test.
    pub domain: Arc<ReplicationDomain>,
    outbound: Mutex<mpsc::UnboundedReceiver<UpdateMsg>>,
    entries: Mutex<BTreeMap<Dn, (Entry, EntryHistorical)>>,
    next_op_id: Mutex<u64>,
    store: Arc<MemoryStateStore>,
}

impl TestReplica {
    /// Creates a replica with the given id over `dc=example,dc=com`.
    pub fn new(replica_id: ReplicaId) -> Self {
        let config = DomainConfig {
            replica_id,
            ..DomainConfig::default()
        };
        let store = Arc::new(MemoryStateStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let domain = Arc::new(ReplicationDomain::new(config, store.clone(), Arc::new(tx)));
        Self {
            domain,
            outbound: Mutex::new(rx),
            entries: Mutex::new(BTreeMap::new()),
            next_op_id: Mutex::new(0),
            store,
        }
    }

    /// The in-memory state store backing the domain.
    pub fn store(&self) -> Arc<MemoryStateStore> {
        self.store.clone()
    }

    fn next_op(&self) -> LocalOperation {
        let mut id = self.next_op_id.lock().unwrap();
        *id += 1;
        LocalOperation::new(*id)
    }

    /// Seeds an entry directly, bypassing replication.
    pub fn seed_entry(&self, entry: Entry) {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.dn().clone(), (entry, EntryHistorical::new()));
    }

    /// A copy of the entry at `dn`, if present.
    pub fn entry(&self, dn: &Dn) -> Option<Entry> {
        self.entries
            .lock()
            .unwrap()
            .get(dn)
            .map(|(entry, _)| entry.clone())
    }

    /// A copy of the historical information of the entry at `dn`.
    pub fn entry_history(&self, dn: &Dn) -> Option<EntryHistorical> {
        self.entries
            .lock()
            .unwrap()
            .get(dn)
            .map(|(_, hist)| hist.clone())
    }

    /// Runs a local modify through the full local pipeline and returns the
    /// change number it was assigned.
    pub fn local_modify(&self, dn: &Dn, mods: Vec<Modification>) -> ChangeNumber {
        let cn = self.domain.start_local_operation(self.next_op());
        {
            let mut entries = self.entries.lock().unwrap();
            let (entry, hist) = entries
                .get_mut(dn)
                .unwrap_or_else(|| panic!("no entry {dn}"));
            hist.process_local_mods(&mods, cn, &AllMultiValued);
            for m in &mods {
                entry.apply(m);
            }
        }
        let uuid = self.entry(dn).unwrap().uuid().to_string();
        let msg = UpdateMsg::modify(cn, uuid, dn.clone(), mods);
        self.domain.commit_local_operation(cn, msg);
        cn
    }

    /// Runs a local add through the full local pipeline.
    pub fn local_add(&self, entry: Entry) -> ChangeNumber {
        let cn = self.domain.start_local_operation(self.next_op());
        let msg = UpdateMsg::add(cn, entry.uuid(), entry.dn().clone(), Vec::new());
        {
            let mut entries = self.entries.lock().unwrap();
            let mut hist = EntryHistorical::new();
            hist.set_entry_add_time(cn);
            entries.insert(entry.dn().clone(), (entry, hist));
        }
        self.domain.commit_local_operation(cn, msg);
        cn
    }

    /// Everything published since the last drain.
    pub fn drain_outbound(&self) -> Vec<UpdateMsg> {
        let mut rx = self.outbound.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Buffers a remote update without attempting replay.
    pub fn receive(&self, msg: UpdateMsg) {
        self.domain.receive_update(msg);
    }

    /// Attempts to replay a buffered update: dependency check, conflict
    /// resolution, apply, commit. Returns false if it was deferred.
    pub fn try_replay(&self, msg: UpdateMsg) -> bool {
        if self.domain.check_dependencies(msg.change_number) {
            return false;
        }
        self.replay(msg);
        true
    }

    /// Feeds one remote update through the full replay pipeline: buffer,
    /// dependency check, conflict resolution, apply, commit.
    ///
    /// Returns true if the update was replayed, false if it was deferred on
    /// a dependency.
    pub fn apply_remote(&self, msg: UpdateMsg) -> bool {
        self.receive(msg.clone());
        self.try_replay(msg)
    }

    /// Replays updates previously deferred on dependencies until no more
    /// can be released.
    pub fn replay_deferred(&self) -> usize {
        let mut replayed = 0;
        while let Some(msg) = self.domain.next_replayable_update() {
            self.replay(msg);
            replayed += 1;
        }
        replayed
    }

    fn replay(&self, msg: UpdateMsg) {
        let cn = msg.change_number;
        let target_dn = msg.dn.clone();
        let entry_uuid = msg.entry_uuid.clone();
        let renamed_dn = msg.new_dn();
        match msg.op {
            UpdateOp::Add { .. } => {
                let mut entries = self.entries.lock().unwrap();
                let entry = Entry::new(target_dn.clone(), entry_uuid);
                let mut hist = EntryHistorical::new();
                hist.set_entry_add_time(cn);
                entries.insert(target_dn, (entry, hist));
            }
            UpdateOp::Delete => {
                self.entries.lock().unwrap().remove(&target_dn);
            }
            UpdateOp::Modify { mods } => {
                let mut entries = self.entries.lock().unwrap();
                if let Some((entry, hist)) = entries.get_mut(&target_dn) {
                    let before = entry.clone();
                    let kept = self.domain.resolve_conflicts(
                        hist,
                        mods,
                        cn,
                        &before,
                        &AllMultiValued,
                    );
                    for m in &kept {
                        entry.apply(m);
                    }
                }
            }
            UpdateOp::ModifyDn { .. } => {
                let mut entries = self.entries.lock().unwrap();
                if let Some((mut entry, mut hist)) = entries.remove(&target_dn) {
                    let new_dn = renamed_dn.expect("modify-DN update carries a new DN");
                    entry.set_dn(new_dn.clone());
                    hist.set_entry_moddn_time(cn);
                    entries.insert(new_dn, (entry, hist));
                }
            }
        }
        self.domain.commit_replayed(cn);
    }
}

/// Convenience DN constructor for tests.
pub fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}
