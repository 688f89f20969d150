//! Change numbers: the logical timestamps that totally order every update
//! applied anywhere in the replication topology.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::replica::ReplicaId;
use crate::server_state::ServerState;

/// Width in characters of the fixed hex string form of a change number.
pub const CHANGE_NUMBER_STRING_LEN: usize = 32;

/// A logical timestamp `(time, seq, replica)` ordering one update.
///
/// Change numbers are compared by wall-clock milliseconds first, then by the
/// sequence counter, then by replica id; the replica id is a pure tie-break
/// that makes the order total and deterministic across replicas. The derived
/// `Ord` follows the field declaration order, which is the contractual
/// comparison order.
///
/// The string form is 32 hex characters, `%016x%08x%08x` over
/// `(time, seq, replica)`, so that lexicographic byte comparison of two
/// encoded change numbers is equivalent to their numeric comparison. Backend
/// ordering indexes rely on this equivalence: width and field order are part
/// of the contract.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChangeNumber {
    time: u64,
    seq: u32,
    replica_id: ReplicaId,
}

impl ChangeNumber {
    /// Creates a change number from its raw parts.
    pub fn new(time: u64, seq: u32, replica_id: ReplicaId) -> Self {
        Self {
            time,
            seq,
            replica_id,
        }
    }

    /// The wall-clock component, in milliseconds since the Unix epoch.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// The per-generator sequence counter.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// The replica that issued this change number.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// True if `self` sorts strictly before `other`.
    pub fn older(&self, other: ChangeNumber) -> bool {
        *self < other
    }

    /// True if `self` sorts before `other` or equals it.
    pub fn older_or_equals(&self, other: ChangeNumber) -> bool {
        *self <= other
    }

    /// True if `self` sorts strictly after `other`.
    pub fn newer(&self, other: ChangeNumber) -> bool {
        *self > other
    }

    /// True if `self` sorts after `other` or equals it.
    pub fn newer_or_equals(&self, other: ChangeNumber) -> bool {
        *self >= other
    }
}

impl fmt::Display for ChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}{:08x}{:08x}",
            self.time, self.seq, self.replica_id as u32
        )
    }
}

impl FromStr for ChangeNumber {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidChangeNumber {
            input: s.to_string(),
        };
        if s.len() != CHANGE_NUMBER_STRING_LEN || !s.is_ascii() {
            return Err(invalid());
        }
        let time = u64::from_str_radix(&s[0..16], 16).map_err(|_| invalid())?;
        let seq = u32::from_str_radix(&s[16..24], 16).map_err(|_| invalid())?;
        let replica = u32::from_str_radix(&s[24..32], 16).map_err(|_| invalid())?;
        Ok(ChangeNumber::new(time, seq, replica as ReplicaId))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[derive(Debug)]
struct GeneratorState {
    last_time: u64,
    seq: u32,
}

/// Issues change numbers that are strictly greater than every change number
/// previously issued by, or fed back into, this generator.
///
/// When the wall clock does not advance between two calls the sequence
/// counter provides the strict increase; a sequence overflow wraps the
/// counter and bumps the timestamp instead.
#[derive(Debug)]
pub struct ChangeNumberGenerator {
    replica_id: ReplicaId,
    state: Mutex<GeneratorState>,
}

impl ChangeNumberGenerator {
    /// Creates a generator for `replica_id` starting from `timestamp`.
    pub fn new(replica_id: ReplicaId, timestamp: u64) -> Self {
        Self {
            replica_id,
            state: Mutex::new(GeneratorState {
                last_time: timestamp,
                seq: 0,
            }),
        }
    }

    /// Creates a generator guaranteed to issue change numbers larger than
    /// everything recorded in `state`.
    ///
    /// Used at domain startup so a restarted replica never re-issues a
    /// change number that other replicas have already seen.
    pub fn from_state(replica_id: ReplicaId, state: &ServerState) -> Self {
        let mut last_time = now_millis();
        let mut seq = 0;
        for id in state.replica_ids() {
            if let Some(cn) = state.max_change_number(id) {
                if cn.time() > last_time {
                    last_time = cn.time();
                }
                if id == replica_id {
                    seq = cn.seq();
                }
            }
        }
        Self {
            replica_id,
            state: Mutex::new(GeneratorState { last_time, seq }),
        }
    }

    /// The replica id stamped on every generated change number.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Generates the next change number.
    pub fn new_change_number(&self) -> ChangeNumber {
        let cur_time = now_millis();
        let mut state = self.state.lock().unwrap();
        if cur_time > state.last_time {
            state.last_time = cur_time;
        }
        state.seq = state.seq.wrapping_add(1);
        if state.seq == 0 {
            state.last_time += 1;
        }
        ChangeNumber::new(state.last_time, state.seq, self.replica_id)
    }

    /// Raises this generator's clock past a change number received from
    /// another replica, so that every change number generated after
    /// processing a remote update sorts after that update.
    pub fn adjust(&self, cn: ChangeNumber) {
        let mut state = self.state.lock().unwrap();
        if state.last_time <= cn.time() {
            state.last_time = cn.time() + 1;
        }
        if self.replica_id == cn.replica_id() && state.seq < cn.seq() {
            state.seq = cn.seq();
        }
    }

    /// Adjusts with every per-replica maximum recorded in `state`.
    pub fn adjust_with_state(&self, state: &ServerState) {
        for id in state.replica_ids() {
            if let Some(cn) = state.max_change_number(id) {
                self.adjust(cn);
            }
        }
    }
}
