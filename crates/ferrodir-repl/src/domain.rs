//! The per-base-DN replication domain.
//!
//! One [`ReplicationDomain`] exists per replicated base DN. It owns the
//! change-number generator, the two pending-change queues, the shared
//! server state and its persistence, and the domain statistics. The LDAP
//! pipeline drives it from the outside: local operations are announced
//! before commit and committed after the backend write; decoded inbound
//! messages are fed to [`ReplicationDomain::process_message`] and replayed
//! through the conflict resolver.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use ferrodir_proto::{ReplicationMsg, UpdateMsg};
use ferrodir_types::{ChangeNumber, ChangeNumberGenerator, Dn, Entry, Modification, ReplicaId, ServerState};

use crate::config::DomainConfig;
use crate::entry_hist::EntryHistorical;
use crate::pending::{LocalOperation, PendingChanges, UpdatePublisher};
use crate::remote::RemotePendingChanges;
use crate::schema::SchemaInfo;
use crate::state_store::{PersistentServerState, StateStore};
use crate::stats::DomainStats;

/// Generation id of a domain that has not been initialized yet.
pub const INVALID_GENERATION_ID: i64 = -1;

/// The replication core of one replicated base DN.
pub struct ReplicationDomain {
    config: DomainConfig,
    generator: Arc<ChangeNumberGenerator>,
    server_state: Arc<Mutex<ServerState>>,
    pending: PendingChanges,
    remote_pending: RemotePendingChanges,
    persistent: PersistentServerState,
    publisher: Arc<dyn UpdatePublisher>,
    generation_id: AtomicI64,
    stats: Mutex<DomainStats>,
    stopped: AtomicBool,
    shutdown: Notify,
}

impl std::fmt::Debug for ReplicationDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationDomain")
            .field("base_dn", &self.config.base_dn)
            .field("replica_id", &self.config.replica_id)
            .finish_non_exhaustive()
    }
}

impl ReplicationDomain {
    /// Creates the domain: loads persisted state, seeds the generator so it
    /// never re-issues an old change number, and wires the queues.
    pub fn new(
        config: DomainConfig,
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn UpdatePublisher>,
    ) -> Self {
        let server_state = Arc::new(Mutex::new(ServerState::new()));
        let persistent = PersistentServerState::new(
            config.base_dn.clone(),
            config.replica_id,
            server_state.clone(),
            store,
        );
        let generator = {
            let state = server_state.lock().unwrap();
            Arc::new(ChangeNumberGenerator::from_state(config.replica_id, &state))
        };
        let pending = PendingChanges::new(
            generator.clone(),
            server_state.clone(),
            publisher.clone(),
        );
        let remote_pending = RemotePendingChanges::new(server_state.clone());
        Self {
            config,
            generator,
            server_state,
            pending,
            remote_pending,
            persistent,
            publisher,
            generation_id: AtomicI64::new(INVALID_GENERATION_ID),
            stats: Mutex::new(DomainStats::default()),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// The replicated base DN.
    pub fn base_dn(&self) -> &Dn {
        &self.config.base_dn
    }

    /// This replica's id.
    pub fn replica_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    /// The domain's generation id.
    pub fn generation_id(&self) -> i64 {
        self.generation_id.load(Ordering::SeqCst)
    }

    /// A snapshot of the shared server state.
    pub fn server_state(&self) -> ServerState {
        self.server_state.lock().unwrap().clone()
    }

    /// A snapshot of the domain statistics.
    pub fn stats(&self) -> DomainStats {
        self.stats.lock().unwrap().clone()
    }

    // =====================================================================
    // Local operation lifecycle
    // =====================================================================

    /// Assigns a change number to a local operation about to run.
    pub fn start_local_operation(&self, operation: LocalOperation) -> ChangeNumber {
        self.pending.put_local_operation(operation)
    }

    /// Commits a local operation after its backend write succeeded, and
    /// flushes whatever the commit unblocked. Returns the number of updates
    /// pushed out.
    pub fn commit_local_operation(&self, change_number: ChangeNumber, msg: UpdateMsg) -> usize {
        let pushed = self.pending.commit_and_push(change_number, msg);
        if pushed > 0 {
            self.stats.lock().unwrap().updates_published += pushed as u64;
        }
        pushed
    }

    /// Commits a local synchronization operation (a replayed remote change
    /// written back by the LDAP pipeline); never republished.
    pub fn commit_local_sync_operation(&self, change_number: ChangeNumber) {
        self.pending.commit(change_number);
        self.pending.push_committed_changes();
    }

    /// Updates the history of an entry for a local modification list.
    pub fn process_local_mods(
        &self,
        hist: &mut EntryHistorical,
        mods: &[Modification],
        change_number: ChangeNumber,
        schema: &dyn SchemaInfo,
    ) {
        hist.process_local_mods(mods, change_number, schema);
    }

    // =====================================================================
    // Remote replay lifecycle
    // =====================================================================

    /// Feeds one decoded message into the domain.
    pub fn process_message(&self, msg: ReplicationMsg) {
        match msg {
            ReplicationMsg::Update(update) => self.receive_update(update),
            ReplicationMsg::Ack(ack) => {
                self.stats.lock().unwrap().acks_received += 1;
                if ack.has_errors() {
                    tracing::warn!(csn = %ack.change_number,
                        failed = ?ack.failed_replicas, "assured update reported errors");
                }
            }
            ReplicationMsg::Error(error) => {
                tracing::warn!(sender = error.sender, code = error.code,
                    details = %error.details, "error message received");
            }
            ReplicationMsg::ResetGenerationId(reset) => {
                self.reset_generation_id(reset.generation_id);
            }
            ReplicationMsg::ReplServerStart(start) => {
                // Make sure nothing we generate afterwards can collide with
                // what the replication server has already seen.
                self.generator.adjust_with_state(&start.server_state);
            }
            ReplicationMsg::MonitorRequest(request) => {
                tracing::debug!(sender = request.sender,
                    "monitor request handled by the monitoring layer");
            }
            ReplicationMsg::InitializeRequest(request) => {
                tracing::info!(sender = request.sender,
                    "initialize request handed to the total-update layer");
            }
            ReplicationMsg::InitializeTarget(target) => {
                tracing::info!(sender = target.sender, entries = target.entry_count,
                    "initialize target handed to the total-update layer");
            }
        }
    }

    /// Buffers an inbound update for replay.
    pub fn receive_update(&self, msg: UpdateMsg) {
        self.generator.adjust(msg.change_number);
        self.remote_pending.put_remote_update(msg);
        self.stats.lock().unwrap().updates_received += 1;
    }

    /// Checks whether a buffered update must wait on older ones.
    pub fn check_dependencies(&self, change_number: ChangeNumber) -> bool {
        let has_dependencies = self.remote_pending.check_dependencies(change_number);
        if has_dependencies {
            self.stats.lock().unwrap().dependencies_detected += 1;
        }
        has_dependencies
    }

    /// Releases the next deferred update whose dependencies are satisfied.
    pub fn next_replayable_update(&self) -> Option<UpdateMsg> {
        self.remote_pending.get_next_update()
    }

    /// Rewrites a replayed modification list into its conflict-free
    /// equivalent against the entry's history.
    pub fn resolve_conflicts(
        &self,
        hist: &mut EntryHistorical,
        mods: Vec<Modification>,
        change_number: ChangeNumber,
        entry: &Entry,
        schema: &dyn SchemaInfo,
    ) -> Vec<Modification> {
        let (kept, conflicts) = hist.replay_mods(mods, change_number, entry, schema);
        if conflicts > 0 {
            self.stats.lock().unwrap().conflicts_resolved += conflicts as u64;
        }
        kept
    }

    /// Marks a replayed update as applied; the server state advances over
    /// the contiguous committed prefix.
    pub fn commit_replayed(&self, change_number: ChangeNumber) {
        self.remote_pending.commit(change_number);
        self.stats.lock().unwrap().updates_replayed += 1;
    }

    // =====================================================================
    // Recovery and generation id
    // =====================================================================

    /// Enters or leaves recovering mode (flushes advance state but are not
    /// republished while catching up a resumed connection).
    pub fn set_recovering(&self, recovering: bool) {
        self.pending.set_recovering(recovering);
    }

    /// Re-evaluates recovering mode against the last change the replication
    /// server reports having seen. Returns true while recovery continues.
    pub fn recovery_until(&self, recovered: Option<ChangeNumber>) -> bool {
        self.pending.recovery_until(recovered)
    }

    /// Re-publishes the changes of one entry recorded after `since`, from
    /// its historical information. Returns how many were published.
    pub fn republish_changes_newer_than(
        &self,
        hist: &EntryHistorical,
        entry_dn: &Dn,
        entry_uuid: &str,
        since: ChangeNumber,
    ) -> usize {
        let ops = hist.fake_operations_newer_than(since, entry_dn, entry_uuid);
        let count = ops.len();
        for op in ops {
            self.publisher.publish(op.into_update_msg());
        }
        count
    }

    /// Resets the domain's generation id.
    pub fn reset_generation_id(&self, generation_id: i64) {
        let old = self.generation_id.swap(generation_id, Ordering::SeqCst);
        if old != generation_id {
            tracing::info!(base_dn = %self.config.base_dn, old, new = generation_id,
                "generation id reset");
        }
    }

    // =====================================================================
    // State persistence
    // =====================================================================

    /// Saves the server state if dirty, updating the statistics.
    pub fn save_state(&self) -> bool {
        let saved = self.persistent.save();
        let mut stats = self.stats.lock().unwrap();
        if saved {
            stats.state_saves += 1;
        } else {
            stats.state_save_failures += 1;
        }
        saved
    }

    /// Periodically saves the server state until [`ReplicationDomain::stop`]
    /// is called, then performs a final save.
    pub async fn run_periodic_save(self: Arc<Self>) {
        let period = Duration::from_millis(self.config.state_save_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.save_state();
                }
                _ = self.shutdown.notified() => break,
            }
        }
        self.save_state();
    }

    /// Stops the periodic saver; in-flight queue entries are left to finish
    /// or be discarded wholesale by the owner of the queues.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AllMultiValued;
    use crate::state_store::MemoryStateStore;
    use ferrodir_proto::{AckMsg, ResetGenerationIdMsg};
    use ferrodir_types::{AttrDescription, ModType};
    use tokio::sync::mpsc;

    struct Fixture {
        domain: Arc<ReplicationDomain>,
        rx: std::sync::Mutex<mpsc::UnboundedReceiver<UpdateMsg>>,
        store: Arc<MemoryStateStore>,
    }

    fn fixture_with_config(config: DomainConfig) -> Fixture {
        let store = Arc::new(MemoryStateStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let domain = Arc::new(ReplicationDomain::new(config, store.clone(), Arc::new(tx)));
        Fixture {
            domain,
            rx: std::sync::Mutex::new(rx),
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_config(DomainConfig::default())
    }

    fn drain(f: &Fixture) -> Vec<UpdateMsg> {
        let mut rx = f.rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn test_local_operation_roundtrip() {
        let f = fixture();
        let cn = f.domain.start_local_operation(LocalOperation::new(1));
        assert_eq!(cn.replica_id(), f.domain.replica_id());
        let msg = UpdateMsg::delete(cn, "uuid-1", dn("cn=a,dc=example,dc=com"));
        let pushed = f.domain.commit_local_operation(cn, msg);
        assert_eq!(pushed, 1);
        assert_eq!(drain(&f).len(), 1);
        assert_eq!(f.domain.stats().updates_published, 1);
        assert!(f.domain.server_state().cover(cn));
    }

    #[test]
    fn test_receive_update_adjusts_generator() {
        let f = fixture();
        let remote = ChangeNumber::new(u64::MAX / 2, 3, 2);
        f.domain
            .receive_update(UpdateMsg::delete(remote, "uuid-r", dn("cn=r,dc=example,dc=com")));
        assert_eq!(f.domain.stats().updates_received, 1);
        // The next local change number must sort after the remote one.
        let local = f.domain.start_local_operation(LocalOperation::new(1));
        assert!(remote.older(local));
    }

    #[test]
    fn test_remote_replay_lifecycle() {
        let f = fixture();
        let parent = ChangeNumber::new(1_000, 1, 2);
        let child = ChangeNumber::new(1_000, 2, 2);
        f.domain.receive_update(UpdateMsg::add(
            parent,
            "uuid-p",
            dn("dc=example,dc=com"),
            vec![],
        ));
        f.domain.receive_update(UpdateMsg::add(
            child,
            "uuid-c",
            dn("ou=people,dc=example,dc=com"),
            vec![],
        ));

        assert!(f.domain.check_dependencies(child));
        assert_eq!(f.domain.stats().dependencies_detected, 1);
        assert!(f.domain.next_replayable_update().is_none());

        f.domain.commit_replayed(parent);
        let released = f.domain.next_replayable_update().unwrap();
        assert_eq!(released.change_number, child);
        f.domain.commit_replayed(released.change_number);
        assert_eq!(f.domain.stats().updates_replayed, 2);
        assert!(f.domain.server_state().cover(child));
    }

    #[test]
    fn test_resolve_conflicts_counts() {
        let f = fixture();
        let mut hist = EntryHistorical::new();
        let entry = Entry::new(dn("cn=e,dc=example,dc=com"), "uuid-e");
        let mods = vec![Modification::with_values(
            ModType::Add,
            AttrDescription::new("description"),
            &["v"],
        )];
        let kept = f.domain.resolve_conflicts(
            &mut hist,
            mods,
            ChangeNumber::new(1_000, 1, 2),
            &entry,
            &AllMultiValued,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(f.domain.stats().conflicts_resolved, 1);
    }

    #[test]
    fn test_process_message_dispatch() {
        let f = fixture();
        let cn = ChangeNumber::new(1_000, 1, 2);
        f.domain
            .process_message(ReplicationMsg::Ack(AckMsg::new(cn)));
        assert_eq!(f.domain.stats().acks_received, 1);

        f.domain.process_message(ReplicationMsg::ResetGenerationId(
            ResetGenerationIdMsg::new(777),
        ));
        assert_eq!(f.domain.generation_id(), 777);

        f.domain.process_message(ReplicationMsg::Update(UpdateMsg::delete(
            cn,
            "uuid-1",
            dn("cn=a,dc=example,dc=com"),
        )));
        assert_eq!(f.domain.stats().updates_received, 1);
    }

    #[test]
    fn test_recovering_mode_suppresses_publish() {
        let f = fixture();
        f.domain.set_recovering(true);
        let cn = f.domain.start_local_operation(LocalOperation::new(1));
        f.domain
            .commit_local_operation(cn, UpdateMsg::delete(cn, "u", dn("cn=a,dc=x")));
        assert!(drain(&f).is_empty());
        assert!(f.domain.server_state().cover(cn));

        // Recovery completes once the replication server caught up.
        assert!(!f.domain.recovery_until(Some(cn)));
    }

    #[test]
    fn test_republish_from_history() {
        let f = fixture();
        let mut hist = EntryHistorical::new();
        let since = ChangeNumber::new(1_000, 1, 1);
        hist.attr_mut(&AttrDescription::new("description"))
            .record_add_value(&"v".into(), ChangeNumber::new(1_000, 5, 1));
        let count = f.domain.republish_changes_newer_than(
            &hist,
            &dn("cn=e,dc=example,dc=com"),
            "uuid-e",
            since,
        );
        assert_eq!(count, 1);
        assert_eq!(drain(&f).len(), 1);
    }

    #[test]
    fn test_save_state_updates_stats() {
        let f = fixture();
        let cn = f.domain.start_local_operation(LocalOperation::new(1));
        f.domain
            .commit_local_operation(cn, UpdateMsg::delete(cn, "u", dn("cn=a,dc=x")));
        assert!(f.domain.save_state());
        assert_eq!(f.domain.stats().state_saves, 1);
        assert_eq!(f.store.base_values().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_save_runs_and_stops() {
        let f = fixture_with_config(DomainConfig {
            state_save_interval_ms: 10,
            ..DomainConfig::default()
        });
        let cn = f.domain.start_local_operation(LocalOperation::new(1));
        f.domain
            .commit_local_operation(cn, UpdateMsg::delete(cn, "u", dn("cn=a,dc=x")));

        let handle = tokio::spawn(f.domain.clone().run_periodic_save());
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.domain.stop();
        handle.await.unwrap();

        assert!(f.store.base_values().is_some());
        assert!(f.domain.stats().state_saves >= 1);
    }
}
