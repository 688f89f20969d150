//! The local-origin pending-change queue.
//!
//! Local operations get their change number *before* the backend write
//! commits, and commits can finish out of order (a slow transaction
//! interleaved with fast ones). This queue holds every assigned change until
//! the underlying write has durably succeeded, then flushes committed
//! changes strictly in change-number order: a later commit simply waits
//! behind an uncommitted head. One queue is instantiated per replication
//! domain.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ferrodir_proto::UpdateMsg;
use ferrodir_types::{ChangeNumber, ChangeNumberGenerator, ServerState};

/// Outbound sink for published update messages.
///
/// The transport layer owns the real channel; the core only ever hands it
/// fully-ordered messages.
pub trait UpdatePublisher: Send + Sync {
    /// Publishes one update to the replication channel.
    fn publish(&self, msg: UpdateMsg);
}

impl UpdatePublisher for tokio::sync::mpsc::UnboundedSender<UpdateMsg> {
    fn publish(&self, msg: UpdateMsg) {
        // A closed receiver means the domain is shutting down; the message
        // is dropped with the rest of the in-flight queue.
        let _ = self.send(msg);
    }
}

/// Handle to an in-progress local operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalOperation {
    /// Operation id assigned by the LDAP pipeline.
    pub id: u64,
    /// True when the operation is itself a replay of a remote change;
    /// such operations are never re-published.
    pub synchronization: bool,
}

impl LocalOperation {
    /// Creates a regular (non-synchronization) operation handle.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            synchronization: false,
        }
    }

    /// Creates a synchronization operation handle.
    pub fn synchronization(id: u64) -> Self {
        Self {
            id,
            synchronization: true,
        }
    }
}

#[derive(Debug)]
struct PendingChange {
    operation: Option<LocalOperation>,
    msg: Option<UpdateMsg>,
    committed: bool,
}

#[derive(Debug)]
struct Inner {
    queue: BTreeMap<ChangeNumber, PendingChange>,
    recovering: bool,
    last_assigned: Option<ChangeNumber>,
}

/// The local pending-change queue of one replication domain.
///
/// Every state-changing method takes the queue's single lock; queues of
/// different domains never share a lock and proceed fully in parallel.
pub struct PendingChanges {
    generator: Arc<ChangeNumberGenerator>,
    server_state: Arc<Mutex<ServerState>>,
    publisher: Arc<dyn UpdatePublisher>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PendingChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingChanges")
            .field("replica_id", &self.generator.replica_id())
            .finish_non_exhaustive()
    }
}

impl PendingChanges {
    /// Creates the queue for one domain.
    pub fn new(
        generator: Arc<ChangeNumberGenerator>,
        server_state: Arc<Mutex<ServerState>>,
        publisher: Arc<dyn UpdatePublisher>,
    ) -> Self {
        Self {
            generator,
            server_state,
            publisher,
            inner: Mutex::new(Inner {
                queue: BTreeMap::new(),
                recovering: false,
                last_assigned: None,
            }),
        }
    }

    /// Number of changes currently pending.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Assigns the next change number to a local operation and inserts it
    /// uncommitted.
    pub fn put_local_operation(&self, operation: LocalOperation) -> ChangeNumber {
        let change_number = self.generator.new_change_number();
        let mut inner = self.inner.lock().unwrap();
        inner.queue.insert(
            change_number,
            PendingChange {
                operation: Some(operation),
                msg: None,
                committed: false,
            },
        );
        inner.last_assigned = Some(change_number);
        change_number
    }

    /// Marks a change as committed, without a message.
    ///
    /// Only valid for synchronization operations, which are never
    /// republished. Panics if `change_number` is not pending: committing an
    /// unknown change number is a programming error.
    pub fn commit(&self, change_number: ChangeNumber) {
        let mut inner = self.inner.lock().unwrap();
        let change = inner
            .queue
            .get_mut(&change_number)
            .unwrap_or_else(|| panic!("commit of unknown change number {change_number}"));
        change.committed = true;
    }

    /// Marks a change as committed and attaches its update message.
    ///
    /// May only be called after the underlying local write transaction has
    /// durably succeeded. Panics if `change_number` is not pending.
    pub fn commit_with_msg(&self, change_number: ChangeNumber, msg: UpdateMsg) {
        let mut inner = self.inner.lock().unwrap();
        let change = inner
            .queue
            .get_mut(&change_number)
            .unwrap_or_else(|| panic!("commit of unknown change number {change_number}"));
        change.committed = true;
        change.msg = Some(msg);
    }

    /// Flushes every committed change at the head of the queue, in
    /// change-number order. Returns the number of updates published.
    ///
    /// While the queue is recovering, flushed changes only advance the
    /// server state instead of being re-published: older changes must reach
    /// the replication server before the pending ones may go out.
    pub fn push_committed_changes(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut pushed = 0;
        loop {
            let Some((&change_number, change)) = inner.queue.first_key_value() else {
                break;
            };
            if !change.committed {
                break;
            }
            let is_regular = change
                .operation
                .as_ref()
                .is_some_and(|op| !op.synchronization);
            let change = inner.queue.remove(&change_number).unwrap();
            if is_regular {
                let msg = change.msg.unwrap_or_else(|| {
                    panic!("committed change {change_number} has no update message")
                });
                pushed += 1;
                self.server_state.lock().unwrap().update(change_number);
                if !inner.recovering {
                    self.publisher.publish(msg);
                }
            }
        }
        pushed
    }

    /// Commits with a message and flushes, as one atomic queue operation.
    pub fn commit_and_push(&self, change_number: ChangeNumber, msg: UpdateMsg) -> usize {
        {
            let mut inner = self.inner.lock().unwrap();
            let change = inner
                .queue
                .get_mut(&change_number)
                .unwrap_or_else(|| panic!("commit of unknown change number {change_number}"));
            change.committed = true;
            change.msg = Some(msg);
        }
        self.push_committed_changes()
    }

    /// Enters or leaves recovering mode.
    ///
    /// The flush path consults this flag before every publish decision.
    pub fn set_recovering(&self, recovering: bool) {
        self.inner.lock().unwrap().recovering = recovering;
    }

    /// True while the queue is in recovering mode.
    pub fn is_recovering(&self) -> bool {
        self.inner.lock().unwrap().recovering
    }

    /// Updates the recovery situation: once the replication server has
    /// acknowledged everything up to the last locally-assigned change,
    /// recovery is over and publishing resumes.
    ///
    /// Returns true while recovery must continue.
    pub fn recovery_until(&self, recovered: Option<ChangeNumber>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(recovered) = recovered {
            match inner.last_assigned {
                Some(last) if recovered.older(last) => {}
                _ => inner.recovering = false,
            }
        }
        inner.recovering
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodir_types::Dn;
    use tokio::sync::mpsc;

    struct Fixture {
        queue: PendingChanges,
        rx: std::sync::Mutex<mpsc::UnboundedReceiver<UpdateMsg>>,
        state: Arc<Mutex<ServerState>>,
    }

    fn fixture() -> Fixture {
        let generator = Arc::new(ChangeNumberGenerator::new(1, 0));
        let state = Arc::new(Mutex::new(ServerState::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = PendingChanges::new(generator, state.clone(), Arc::new(tx));
        Fixture {
            queue,
            rx: std::sync::Mutex::new(rx),
            state,
        }
    }

    fn delete_msg(cn: ChangeNumber) -> UpdateMsg {
        UpdateMsg::delete(cn, "uuid-1", Dn::parse("cn=a,dc=example,dc=com").unwrap())
    }

    fn drain(f: &Fixture) -> Vec<UpdateMsg> {
        let mut rx = f.rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_put_assigns_increasing_change_numbers() {
        let f = fixture();
        let a = f.queue.put_local_operation(LocalOperation::new(1));
        let b = f.queue.put_local_operation(LocalOperation::new(2));
        assert!(a.older(b));
        assert_eq!(f.queue.size(), 2);
    }

    #[test]
    fn test_in_order_commit_publishes_immediately() {
        let f = fixture();
        let cn = f.queue.put_local_operation(LocalOperation::new(1));
        let pushed = f.queue.commit_and_push(cn, delete_msg(cn));
        assert_eq!(pushed, 1);
        assert_eq!(f.queue.size(), 0);
        let msgs = drain(&f);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].change_number, cn);
        assert!(f.state.lock().unwrap().cover(cn));
    }

    #[test]
    fn test_out_of_order_commit_waits_for_head() {
        let f = fixture();
        let first = f.queue.put_local_operation(LocalOperation::new(1));
        let second = f.queue.put_local_operation(LocalOperation::new(2));

        // The later operation commits first: nothing may be published yet.
        let pushed = f.queue.commit_and_push(second, delete_msg(second));
        assert_eq!(pushed, 0);
        assert!(drain(&f).is_empty());
        assert_eq!(f.queue.size(), 2);

        // Head commits: both flush, in change-number order.
        let pushed = f.queue.commit_and_push(first, delete_msg(first));
        assert_eq!(pushed, 2);
        let msgs = drain(&f);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].change_number, first);
        assert_eq!(msgs[1].change_number, second);
    }

    #[test]
    fn test_publish_order_is_sorted_for_any_commit_order() {
        let f = fixture();
        let cns: Vec<ChangeNumber> = (0..6)
            .map(|i| f.queue.put_local_operation(LocalOperation::new(i)))
            .collect();
        // Commit in a scrambled order.
        for &i in &[3usize, 0, 5, 1, 4, 2] {
            f.queue.commit_and_push(cns[i], delete_msg(cns[i]));
        }
        let published: Vec<ChangeNumber> = drain(&f).iter().map(|m| m.change_number).collect();
        let mut sorted = published.clone();
        sorted.sort();
        assert_eq!(published, sorted);
        assert_eq!(published.len(), 6);
    }

    #[test]
    fn test_synchronization_operations_are_not_published() {
        let f = fixture();
        let cn = f.queue.put_local_operation(LocalOperation::synchronization(1));
        f.queue.commit(cn);
        let pushed = f.queue.push_committed_changes();
        assert_eq!(pushed, 0);
        assert!(drain(&f).is_empty());
        assert_eq!(f.queue.size(), 0);
    }

    #[test]
    fn test_recovering_advances_state_without_publishing() {
        let f = fixture();
        f.queue.set_recovering(true);
        let cn = f.queue.put_local_operation(LocalOperation::new(1));
        let pushed = f.queue.commit_and_push(cn, delete_msg(cn));
        assert_eq!(pushed, 1);
        assert!(drain(&f).is_empty());
        assert!(f.state.lock().unwrap().cover(cn));
    }

    #[test]
    fn test_recovery_until() {
        let f = fixture();
        f.queue.set_recovering(true);
        let first = f.queue.put_local_operation(LocalOperation::new(1));
        let last = f.queue.put_local_operation(LocalOperation::new(2));

        // Replication server has only seen up to `first`: still recovering.
        assert!(f.queue.recovery_until(Some(first)));
        assert!(f.queue.is_recovering());

        // Everything local has been seen: recovery completes.
        assert!(!f.queue.recovery_until(Some(last)));
        assert!(!f.queue.is_recovering());
    }

    #[test]
    fn test_recovery_until_none_keeps_recovering() {
        let f = fixture();
        f.queue.set_recovering(true);
        f.queue.put_local_operation(LocalOperation::new(1));
        assert!(f.queue.recovery_until(None));
    }

    #[test]
    #[should_panic(expected = "unknown change number")]
    fn test_commit_unknown_change_number_panics() {
        let f = fixture();
        f.queue.commit(ChangeNumber::new(1, 1, 1));
    }
}
