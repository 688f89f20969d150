//! Durable server state.
//!
//! The in-memory [`ServerState`] is saved periodically; after a crash the
//! persisted copy may lag behind what was actually applied, so loading
//! re-scans the entries changed since the last save (via the backend's
//! search-since primitive) and advances past them. The backend itself is an
//! external collaborator reached through the [`StateStore`] trait.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use ferrodir_types::{ChangeNumber, Dn, ReplicaId, ServerState};

use crate::hist_value::HistoricalAttributeValue;

/// Errors surfaced by a [`StateStore`] backend.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The entry that holds the state does not exist (yet, or anymore).
    #[error("state entry does not exist")]
    NoSuchEntry,

    /// Any other backend failure.
    #[error("backend error: {msg}")]
    Backend {
        /// What the backend reported.
        msg: String,
    },
}

/// Backend contract for persisting server state and scanning for changes.
///
/// The state lives in the domain's base entry; when that entry does not
/// exist (fresh or emptied backend) the domain-configuration entry is the
/// fallback location.
pub trait StateStore: Send + Sync {
    /// Reads the persisted state values from the base entry.
    /// `Ok(None)` means the base entry exists but carries no state.
    fn read_state_values(&self) -> Result<Option<Vec<String>>, StateStoreError>;

    /// Reads the persisted state values from the fallback (configuration)
    /// location.
    fn read_fallback_state_values(&self) -> Result<Option<Vec<String>>, StateStoreError>;

    /// Writes the state values to the base entry.
    fn write_state_values(&self, values: &[String]) -> Result<(), StateStoreError>;

    /// Writes the state values to the fallback location.
    fn write_fallback_state_values(&self, values: &[String]) -> Result<(), StateStoreError>;

    /// Returns the historical attribute values of every entry changed after
    /// `cn` (the crash-recovery scan).
    fn changed_since(&self, cn: ChangeNumber) -> Result<Vec<String>, StateStoreError>;
}

/// A [`ServerState`] kept in sync with persistent storage.
pub struct PersistentServerState {
    base_dn: Dn,
    replica_id: ReplicaId,
    state: Arc<Mutex<ServerState>>,
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for PersistentServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentServerState")
            .field("base_dn", &self.base_dn)
            .field("replica_id", &self.replica_id)
            .finish_non_exhaustive()
    }
}

impl PersistentServerState {
    /// Creates the wrapper and loads the persisted state, including the
    /// crash-recovery scan.
    pub fn new(
        base_dn: Dn,
        replica_id: ReplicaId,
        state: Arc<Mutex<ServerState>>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let this = Self {
            base_dn,
            replica_id,
            state,
            store,
        };
        this.load_state();
        this
    }

    /// The shared in-memory state.
    pub fn state(&self) -> Arc<Mutex<ServerState>> {
        self.state.clone()
    }

    /// True iff `cn` is covered by the in-memory state.
    pub fn cover(&self, cn: ChangeNumber) -> bool {
        self.state.lock().unwrap().cover(cn)
    }

    /// Records `cn` as seen. Returns true iff the state advanced.
    pub fn update(&self, cn: ChangeNumber) -> bool {
        self.state.lock().unwrap().update(cn)
    }

    /// Loads the state from the base entry, falling back to the domain
    /// configuration, then runs the crash-recovery scan.
    pub fn load_state(&self) {
        let loaded = match self.store.read_state_values() {
            Ok(Some(values)) => Some(values),
            Ok(None) | Err(StateStoreError::NoSuchEntry) => {
                match self.store.read_fallback_state_values() {
                    Ok(values) => values,
                    Err(error) => {
                        tracing::warn!(base_dn = %self.base_dn, %error,
                            "cannot read fallback server state");
                        None
                    }
                }
            }
            Err(error) => {
                tracing::warn!(base_dn = %self.base_dn, %error, "cannot read server state");
                None
            }
        };
        if let Some(values) = loaded {
            let loaded_state =
                ServerState::from_string_values(values.iter().map(String::as_str));
            let mut state = self.state.lock().unwrap();
            for id in loaded_state.replica_ids() {
                if let Some(cn) = loaded_state.max_change_number(id) {
                    state.update(cn);
                }
            }
        }
        self.check_and_update_server_state();
    }

    /// Saves the state unless it is already marked saved. A failed save
    /// clears the flag again so the next cycle retries; the in-memory path
    /// is never blocked.
    pub fn save(&self) -> bool {
        let values = {
            let mut state = self.state.lock().unwrap();
            if state.is_saved() {
                return true;
            }
            state.set_saved(true);
            state.string_values()
        };

        let result = match self.store.write_state_values(&values) {
            Err(StateStoreError::NoSuchEntry) => {
                // The base entry is gone (fresh import, deleted suffix):
                // the configuration entry keeps the state instead.
                self.store.write_fallback_state_values(&values)
            }
            other => other,
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(base_dn = %self.base_dn, %error, "failed to save server state");
                self.state.lock().unwrap().set_saved(false);
                false
            }
        }
    }

    /// Empties the in-memory state without persisting.
    pub fn clear_in_memory(&self) {
        let mut state = self.state.lock().unwrap();
        state.clear();
        state.set_saved(false);
    }

    /// Empties the state and persists the empty form.
    pub fn clear(&self) {
        self.clear_in_memory();
        self.save();
    }

    /// The state is saved periodically, so after a crash it may miss the
    /// most recent applied changes. Scan every entry changed after our own
    /// maximum and advance the state to the newest change number this
    /// replica had actually applied.
    pub fn check_and_update_server_state(&self) {
        let state_max = self
            .state
            .lock()
            .unwrap()
            .max_change_number(self.replica_id);
        let Some(state_max) = state_max else {
            return;
        };

        let values = match self.store.changed_since(state_max) {
            Ok(values) => values,
            Err(error) => {
                tracing::warn!(base_dn = %self.base_dn, %error,
                    "cannot scan for changes to recover");
                return;
            }
        };

        let mut db_max = state_max;
        for value in &values {
            match HistoricalAttributeValue::parse(value) {
                Ok(parsed) => {
                    if parsed.cn.replica_id() == self.replica_id && parsed.cn.newer(db_max) {
                        db_max = parsed.cn;
                    }
                }
                Err(error) => {
                    tracing::warn!(value = %value, %error,
                        "skipping malformed historical value during recovery");
                }
            }
        }

        if db_max.newer(state_max) {
            self.update(db_max);
            tracing::info!(base_dn = %self.base_dn, csn = %db_max,
                "server state recovered past last saved value");
        }
    }
}

/// In-memory [`StateStore`], used in tests and as the backing for domains
/// whose backend is not yet wired.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryStateStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStateStoreInner {
    base_values: Option<Vec<String>>,
    fallback_values: Option<Vec<String>>,
    base_entry_missing: bool,
    changed_entries: Vec<String>,
    fail_writes: bool,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the persisted base-entry values.
    pub fn set_base_values(&self, values: Vec<String>) {
        self.inner.lock().unwrap().base_values = Some(values);
    }

    /// Seeds the persisted fallback values.
    pub fn set_fallback_values(&self, values: Vec<String>) {
        self.inner.lock().unwrap().fallback_values = Some(values);
    }

    /// Simulates a missing base entry (writes route to the fallback).
    pub fn set_base_entry_missing(&self, missing: bool) {
        self.inner.lock().unwrap().base_entry_missing = missing;
    }

    /// Makes every write fail (persistence-outage simulation).
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Seeds the historical values returned by the recovery scan.
    pub fn set_changed_entries(&self, values: Vec<String>) {
        self.inner.lock().unwrap().changed_entries = values;
    }

    /// The values last written to the base entry.
    pub fn base_values(&self) -> Option<Vec<String>> {
        self.inner.lock().unwrap().base_values.clone()
    }

    /// The values last written to the fallback location.
    pub fn fallback_values(&self) -> Option<Vec<String>> {
        self.inner.lock().unwrap().fallback_values.clone()
    }
}

impl StateStore for MemoryStateStore {
    fn read_state_values(&self) -> Result<Option<Vec<String>>, StateStoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.base_entry_missing {
            return Err(StateStoreError::NoSuchEntry);
        }
        Ok(inner.base_values.clone())
    }

    fn read_fallback_state_values(&self) -> Result<Option<Vec<String>>, StateStoreError> {
        Ok(self.inner.lock().unwrap().fallback_values.clone())
    }

    fn write_state_values(&self, values: &[String]) -> Result<(), StateStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StateStoreError::Backend {
                msg: "simulated write failure".to_string(),
            });
        }
        if inner.base_entry_missing {
            return Err(StateStoreError::NoSuchEntry);
        }
        inner.base_values = Some(values.to_vec());
        Ok(())
    }

    fn write_fallback_state_values(&self, values: &[String]) -> Result<(), StateStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StateStoreError::Backend {
                msg: "simulated write failure".to_string(),
            });
        }
        inner.fallback_values = Some(values.to_vec());
        Ok(())
    }

    fn changed_since(&self, _cn: ChangeNumber) -> Result<Vec<String>, StateStoreError> {
        Ok(self.inner.lock().unwrap().changed_entries.clone())
    }
}
