//! The remote-origin pending-change queue.
//!
//! Updates received from the replication channel may touch related DNs in
//! ways that constrain replay order (a child cannot be added before its
//! parent). This queue buffers inbound updates, records a dependency edge
//! for every such constraint, releases dependency-free updates for replay,
//! and advances the shared server state only over a contiguous prefix of
//! committed changes, so a persisted state never claims to have seen a
//! change whose causal prerequisites were skipped. One queue is
//! instantiated per replication domain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use ferrodir_proto::{UpdateKind, UpdateMsg};
use ferrodir_types::{ChangeNumber, ServerState};

#[derive(Debug)]
struct RemotePendingChange {
    msg: UpdateMsg,
    committed: bool,
    dependencies: BTreeSet<ChangeNumber>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: BTreeMap<ChangeNumber, RemotePendingChange>,
    /// Changes whose replay was aborted because of an unresolved
    /// dependency, ordered by change number.
    dependent: BTreeSet<ChangeNumber>,
}

/// The remote pending-change queue of one replication domain.
///
/// Every state-changing method takes the queue's single lock; queues of
/// different domains never share a lock.
pub struct RemotePendingChanges {
    server_state: Arc<Mutex<ServerState>>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RemotePendingChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePendingChanges").finish_non_exhaustive()
    }
}

impl RemotePendingChanges {
    /// Creates the queue, advancing `server_state` as changes commit.
    pub fn new(server_state: Arc<Mutex<ServerState>>) -> Self {
        Self {
            server_state,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of changes currently buffered.
    pub fn queue_size(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Buffers an update received from the replication channel.
    pub fn put_remote_update(&self, msg: UpdateMsg) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.insert(
            msg.change_number,
            RemotePendingChange {
                msg,
                committed: false,
                dependencies: BTreeSet::new(),
            },
        );
    }

    /// Marks a change as committed and advances the server state over the
    /// contiguous committed prefix of the queue.
    ///
    /// Panics if `change_number` is not pending: committing an unknown
    /// change number is a programming error.
    pub fn commit(&self, change_number: ChangeNumber) {
        let mut inner = self.inner.lock().unwrap();
        let change = inner
            .queue
            .get_mut(&change_number)
            .unwrap_or_else(|| panic!("commit of unknown change number {change_number}"));
        change.committed = true;

        loop {
            let Some((&head, change)) = inner.queue.first_key_value() else {
                break;
            };
            if !change.committed {
                break;
            }
            self.server_state.lock().unwrap().update(head);
            inner.queue.remove(&head);
        }
    }

    /// Checks whether the queued change `change_number` must wait on older
    /// queued changes before it can be replayed, recording a dependency edge
    /// for every constraint found. Returns true if the change has
    /// dependencies and must be deferred.
    ///
    /// The constraints, per update kind:
    /// - **Add** waits on an older delete of the same DN, an older add of an
    ///   ancestor DN, and an older rename of the same DN or whose new DN is
    ///   an ancestor of the added DN;
    /// - **Modify** waits on an older add of the same DN;
    /// - **Delete** waits on an older delete of a descendant DN, an older
    ///   add of the same DN, and an older rename touching a descendant DN or
    ///   renaming into the deleted subtree;
    /// - **ModifyDn** waits on an older delete of its new DN, an older add
    ///   of its new parent or of the renamed DN, and an older rename whose
    ///   target is its new DN.
    ///
    /// Returns false for a change that is no longer queued.
    pub fn check_dependencies(&self, change_number: ChangeNumber) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(change) = inner.queue.get(&change_number) else {
            return false;
        };
        let msg = change.msg.clone();
        let target_dn = msg.dn.clone();

        let mut dependencies = BTreeSet::new();
        // Only strictly older entries can be depended on; the range ends at
        // the first newer change so a long queue is never fully scanned.
        for (&older_cn, older) in inner.queue.range(..change_number) {
            let pending = &older.msg;
            let depends = match msg.kind() {
                UpdateKind::Add => match pending.kind() {
                    UpdateKind::Delete => pending.dn == target_dn,
                    UpdateKind::Add => pending.dn.is_ancestor_of(&target_dn),
                    UpdateKind::ModifyDn => {
                        pending.dn == target_dn || pending.new_dn_is_ancestor_of(&target_dn)
                    }
                    UpdateKind::Modify => false,
                },
                UpdateKind::Modify => match pending.kind() {
                    UpdateKind::Add => pending.dn == target_dn,
                    _ => false,
                },
                UpdateKind::Delete => match pending.kind() {
                    UpdateKind::Delete => pending.dn.is_descendant_of(&target_dn),
                    UpdateKind::Add => pending.dn == target_dn,
                    UpdateKind::ModifyDn => {
                        pending.dn.is_descendant_of(&target_dn)
                            || pending.new_dn_is_ancestor_of(&target_dn)
                    }
                    UpdateKind::Modify => false,
                },
                UpdateKind::ModifyDn => match pending.kind() {
                    UpdateKind::Delete => msg.new_dn_is(&pending.dn),
                    UpdateKind::Add => {
                        msg.new_parent_is(&pending.dn) || pending.dn == target_dn
                    }
                    UpdateKind::ModifyDn => msg.new_dn_is(&pending.dn),
                    UpdateKind::Modify => false,
                },
            };
            if depends {
                dependencies.insert(older_cn);
            }
        }

        if dependencies.is_empty() {
            return false;
        }
        tracing::debug!(
            csn = %change_number,
            dn = %target_dn,
            count = dependencies.len(),
            "deferring remote update with unresolved dependencies"
        );
        let change = inner.queue.get_mut(&change_number).unwrap();
        change.dependencies.extend(dependencies);
        inner.dependent.insert(change_number);
        true
    }

    /// Releases the first deferred update whose dependencies are all covered
    /// by the current server state, if any.
    pub fn get_next_update(&self) -> Option<UpdateMsg> {
        let mut inner = self.inner.lock().unwrap();
        let state = self.server_state.lock().unwrap().clone();
        let release = inner.dependent.iter().copied().find(|cn| {
            inner
                .queue
                .get(cn)
                .is_some_and(|change| change.dependencies.iter().all(|dep| state.cover(*dep)))
        })?;
        inner.dependent.remove(&release);
        inner.queue.get(&release).map(|change| change.msg.clone())
    }
}
