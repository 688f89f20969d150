//! Per-replica watermarks: the highest change number seen from each replica.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::change_number::ChangeNumber;
use crate::error::TypeError;
use crate::replica::ReplicaId;

/// A compact summary of "what this replica has seen": the maximum
/// [`ChangeNumber`] processed per replica id.
///
/// Entries are monotonically non-decreasing: [`ServerState::update`] is a
/// no-op unless the new change number is strictly newer than the stored one
/// for that replica. A change number is *covered* when the stored maximum for
/// its replica is greater than or equal to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    max_by_replica: BTreeMap<ReplicaId, ChangeNumber>,
    #[serde(skip)]
    saved: bool,
}

impl ServerState {
    /// Creates an empty server state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `cn` as seen. Returns true iff some entry advanced.
    ///
    /// The `saved` flag is cleared on every advance so the persistence layer
    /// knows the state is dirty.
    pub fn update(&mut self, cn: ChangeNumber) -> bool {
        match self.max_by_replica.get(&cn.replica_id()) {
            Some(existing) if cn.older_or_equals(*existing) => false,
            _ => {
                self.max_by_replica.insert(cn.replica_id(), cn);
                self.saved = false;
                true
            }
        }
    }

    /// True iff `cn` is covered by this state.
    pub fn cover(&self, cn: ChangeNumber) -> bool {
        self.max_by_replica
            .get(&cn.replica_id())
            .is_some_and(|max| max.newer_or_equals(cn))
    }

    /// True iff every entry of `other` is covered by this state.
    pub fn cover_state(&self, other: &ServerState) -> bool {
        other
            .max_by_replica
            .values()
            .all(|cn| self.cover(*cn))
    }

    /// The maximum change number seen from `replica_id`, if any.
    pub fn max_change_number(&self, replica_id: ReplicaId) -> Option<ChangeNumber> {
        self.max_by_replica.get(&replica_id).copied()
    }

    /// The replica ids with at least one recorded change, in ascending order.
    pub fn replica_ids(&self) -> Vec<ReplicaId> {
        self.max_by_replica.keys().copied().collect()
    }

    /// True if no change has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.max_by_replica.is_empty()
    }

    /// Forgets everything, as if freshly created.
    pub fn clear(&mut self) {
        self.max_by_replica.clear();
        self.saved = false;
    }

    /// Whether the current content has been persisted.
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Marks the current content as persisted (or dirty again on failure).
    pub fn set_saved(&mut self, saved: bool) {
        self.saved = saved;
    }

    /// The persisted form: one fixed-width change-number string per replica,
    /// in ascending replica order. The replica id is recovered from the
    /// change number itself when loading.
    pub fn string_values(&self) -> Vec<String> {
        self.max_by_replica.values().map(|cn| cn.to_string()).collect()
    }

    /// The wire form: `<decimal replica id> NUL <cn hex> NUL` pairs.
    ///
    /// The encoding contains NUL bytes, so any message carrying it must put
    /// it last and decode it with [`ServerState::decode_wire`] over the
    /// remainder of the buffer.
    pub fn encode_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (id, cn) in &self.max_by_replica {
            out.extend_from_slice(id.to_string().as_bytes());
            out.push(0);
            out.extend_from_slice(cn.to_string().as_bytes());
            out.push(0);
        }
        out
    }

    /// Decodes the wire form produced by [`ServerState::encode_wire`].
    pub fn decode_wire(buf: &[u8]) -> Result<ServerState, TypeError> {
        let mut state = ServerState::new();
        let mut fields = Vec::new();
        let mut start = 0;
        for (i, b) in buf.iter().enumerate() {
            if *b == 0 {
                fields.push(&buf[start..i]);
                start = i + 1;
            }
        }
        if start != buf.len() {
            return Err(TypeError::InvalidServerState {
                msg: "trailing bytes after last terminator".to_string(),
            });
        }
        if fields.len() % 2 != 0 {
            return Err(TypeError::InvalidServerState {
                msg: format!("odd field count {}", fields.len()),
            });
        }
        for pair in fields.chunks(2) {
            let id_str =
                std::str::from_utf8(pair[0]).map_err(|_| TypeError::InvalidServerState {
                    msg: "replica id is not UTF-8".to_string(),
                })?;
            let id: ReplicaId = id_str.parse().map_err(|_| TypeError::InvalidServerState {
                msg: format!("bad replica id {id_str:?}"),
            })?;
            let cn_str =
                std::str::from_utf8(pair[1]).map_err(|_| TypeError::InvalidServerState {
                    msg: "change number is not UTF-8".to_string(),
                })?;
            let cn: ChangeNumber = cn_str.parse().map_err(|_| TypeError::InvalidServerState {
                msg: format!("bad change number {cn_str:?}"),
            })?;
            if cn.replica_id() != id {
                return Err(TypeError::InvalidServerState {
                    msg: format!("replica id {id} does not match change number {cn}"),
                });
            }
            state.update(cn);
        }
        Ok(state)
    }

    /// Rebuilds a state from persisted change-number strings, skipping
    /// values that fail to parse.
    pub fn from_string_values<'a>(values: impl IntoIterator<Item = &'a str>) -> ServerState {
        let mut state = ServerState::new();
        for value in values {
            match value.parse::<ChangeNumber>() {
                Ok(cn) => {
                    state.update(cn);
                }
                Err(_) => {
                    tracing::warn!(value, "skipping malformed persisted change number");
                }
            }
        }
        state
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (id, cn) in &self.max_by_replica {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{id}:{cn}")?;
            first = false;
        }
        Ok(())
    }
}
