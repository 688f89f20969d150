//! Per-entry historical information.
//!
//! Aggregates the [`AttrHistoricalMultiple`] records of every attribute
//! modified on one entry, plus two entry-level dates: when the entry was
//! created and when it was last renamed. The whole structure round-trips
//! through the persisted historical attribute (one string per record, see
//! [`crate::hist_value`]) and can re-materialize update messages from
//! history during recovery.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use ferrodir_proto::UpdateMsg;
use ferrodir_types::{AttrDescription, ChangeNumber, Dn, Entry, Modification};

use crate::attr_hist::AttrHistoricalMultiple;
use crate::hist_value::{HistAttrModificationKey, HistRecord, HistoricalAttributeValue};
use crate::schema::SchemaInfo;

/// An operation re-created from historical information, used to re-publish
/// changes that a reconnecting replication server has not seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOperation {
    /// Re-publishes an entry deletion.
    Delete {
        /// When the deletion happened.
        change_number: ChangeNumber,
        /// DN of the deleted entry.
        dn: Dn,
        /// Unique id of the deleted entry.
        entry_uuid: String,
    },
    /// Re-publishes one historical modification.
    Modify {
        /// When the modification happened.
        change_number: ChangeNumber,
        /// DN of the modified entry.
        dn: Dn,
        /// Unique id of the modified entry.
        entry_uuid: String,
        /// The modification equivalent to the history record.
        modification: Modification,
    },
}

impl FakeOperation {
    /// The change number of the re-created operation.
    pub fn change_number(&self) -> ChangeNumber {
        match self {
            FakeOperation::Delete { change_number, .. } => *change_number,
            FakeOperation::Modify { change_number, .. } => *change_number,
        }
    }

    /// Builds the update message to re-publish.
    pub fn into_update_msg(self) -> UpdateMsg {
        match self {
            FakeOperation::Delete {
                change_number,
                dn,
                entry_uuid,
            } => UpdateMsg::delete(change_number, entry_uuid, dn),
            FakeOperation::Modify {
                change_number,
                dn,
                entry_uuid,
                modification,
            } => UpdateMsg::modify(change_number, entry_uuid, dn, vec![modification]),
        }
    }
}

/// The complete replication history of one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryHistorical {
    attrs: BTreeMap<AttrDescription, AttrHistoricalMultiple>,
    entry_add_time: Option<ChangeNumber>,
    entry_moddn_time: Option<ChangeNumber>,
    purge_delay_ms: u64,
    last_purged_count: u64,
}

impl EntryHistorical {
    /// Creates empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the purge delay applied at encode time. Zero disables purging.
    pub fn set_purge_delay_ms(&mut self, purge_delay_ms: u64) {
        self.purge_delay_ms = purge_delay_ms;
    }

    /// How many records the last [`EntryHistorical::encode`] purged.
    pub fn last_purged_count(&self) -> u64 {
        self.last_purged_count
    }

    /// The history of one attribute, if any was recorded.
    pub fn attr(&self, desc: &AttrDescription) -> Option<&AttrHistoricalMultiple> {
        self.attrs.get(desc)
    }

    /// The history of one attribute, created lazily on first modification.
    pub fn attr_mut(&mut self, desc: &AttrDescription) -> &mut AttrHistoricalMultiple {
        self.attrs.entry(desc.clone()).or_default()
    }

    /// When the entry was created, as recorded in history.
    pub fn entry_add_time(&self) -> Option<ChangeNumber> {
        self.entry_add_time
    }

    /// When the entry was last renamed, as recorded in history.
    pub fn entry_moddn_time(&self) -> Option<ChangeNumber> {
        self.entry_moddn_time
    }

    /// Records the entry creation date.
    pub fn set_entry_add_time(&mut self, cn: ChangeNumber) {
        if Some(cn) > self.entry_add_time {
            self.entry_add_time = Some(cn);
        }
    }

    /// Records an entry rename date.
    pub fn set_entry_moddn_time(&mut self, cn: ChangeNumber) {
        if Some(cn) > self.entry_moddn_time {
            self.entry_moddn_time = Some(cn);
        }
    }

    /// True if the entry was created or renamed after `cn`.
    pub fn added_or_renamed_after(&self, cn: ChangeNumber) -> bool {
        Some(cn) < self.entry_add_time || Some(cn) < self.entry_moddn_time
    }

    /// Replays a whole modification list with change number `cn` against
    /// this history. Returns the conflict-free modifications to apply and
    /// the number of modifications that took the conflict path.
    pub fn replay_mods(
        &mut self,
        mods: Vec<Modification>,
        cn: ChangeNumber,
        entry: &Entry,
        schema: &dyn SchemaInfo,
    ) -> (Vec<Modification>, usize) {
        let mut kept = Vec::new();
        let mut conflicts = 0;
        for mut m in mods {
            let desc = m.desc().clone();
            let single_valued = schema.is_single_valued(&desc);
            let result = self.attr_mut(&desc).replay(&mut m, cn, entry, single_valued);
            if result.conflict {
                conflicts += 1;
            }
            if result.keep {
                kept.push(m);
            }
        }
        (kept, conflicts)
    }

    /// Updates the history for a local modification list (pre-commit path,
    /// no conflict possible).
    pub fn process_local_mods(
        &mut self,
        mods: &[Modification],
        cn: ChangeNumber,
        schema: &dyn SchemaInfo,
    ) {
        for m in mods {
            let desc = m.desc().clone();
            let single_valued = schema.is_single_valued(&desc);
            self.attr_mut(&desc).process_local_or_nonconflict(cn, m, single_valued);
        }
    }

    /// Encodes to the persisted multi-valued form, purging records older
    /// than the configured purge delay.
    pub fn encode(&mut self) -> Vec<String> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        self.encode_at(now_ms)
    }

    /// Encodes against an explicit clock. See [`EntryHistorical::encode`].
    pub fn encode_at(&mut self, now_ms: u64) -> Vec<String> {
        let purge_date = if self.purge_delay_ms > 0 {
            now_ms.saturating_sub(self.purge_delay_ms)
        } else {
            0
        };
        let purge_delay = self.purge_delay_ms;
        let mut purged = 0u64;
        let mut needs_purge = |cn: ChangeNumber| -> bool {
            let purge = purge_delay > 0 && cn.time() <= purge_date;
            if purge {
                purged += 1;
            }
            purge
        };

        let mut out = Vec::new();
        for (desc, hist) in &self.attrs {
            let delete_time = hist.delete_time();
            let mut attr_del = delete_time.is_some();

            for avh in hist.values_historical() {
                if let Some(dt) = avh.delete_time {
                    if needs_purge(dt) {
                        continue;
                    }
                    out.push(
                        HistoricalAttributeValue {
                            cn: dt,
                            record: HistRecord::AttrMod {
                                desc: desc.clone(),
                                key: HistAttrModificationKey::Del,
                                value: Some(avh.value.clone()),
                            },
                        }
                        .encode(),
                    );
                } else if let Some(ut) = avh.add_time {
                    if needs_purge(ut) {
                        continue;
                    }
                    // A value added at the exact time of the whole-attribute
                    // delete is the replacing value: fold both into one
                    // `repl` record.
                    let key = if attr_del && Some(ut) == delete_time {
                        attr_del = false;
                        HistAttrModificationKey::Repl
                    } else {
                        HistAttrModificationKey::Add
                    };
                    out.push(
                        HistoricalAttributeValue {
                            cn: ut,
                            record: HistRecord::AttrMod {
                                desc: desc.clone(),
                                key,
                                value: Some(avh.value.clone()),
                            },
                        }
                        .encode(),
                    );
                }
            }

            if attr_del {
                let dt = delete_time.unwrap();
                if !needs_purge(dt) {
                    out.push(
                        HistoricalAttributeValue {
                            cn: dt,
                            record: HistRecord::AttrMod {
                                desc: desc.clone(),
                                key: HistAttrModificationKey::AttrDel,
                                value: None,
                            },
                        }
                        .encode(),
                    );
                }
            }
        }

        if let Some(t) = self.entry_add_time {
            if !needs_purge(t) {
                out.push(
                    HistoricalAttributeValue {
                        cn: t,
                        record: HistRecord::EntryAdded,
                    }
                    .encode(),
                );
            }
        }
        if let Some(t) = self.entry_moddn_time {
            if !needs_purge(t) {
                out.push(
                    HistoricalAttributeValue {
                        cn: t,
                        record: HistRecord::EntryRenamed,
                    }
                    .encode(),
                );
            }
        }

        self.last_purged_count = purged;
        out
    }

    /// Rebuilds history from persisted values. Malformed values are logged
    /// and skipped; they never abort the entry.
    pub fn decode<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hist = Self::new();
        for raw in values {
            match HistoricalAttributeValue::parse(raw) {
                Ok(parsed) => match parsed.record {
                    HistRecord::AttrMod { desc, key, value } => {
                        hist.attr_mut(&desc).assign(key, value.as_ref(), parsed.cn);
                    }
                    HistRecord::EntryAdded => hist.set_entry_add_time(parsed.cn),
                    HistRecord::EntryRenamed => hist.set_entry_moddn_time(parsed.cn),
                },
                Err(error) => {
                    tracing::warn!(value = raw, %error, "skipping malformed historical value");
                }
            }
        }
        hist
    }

    /// Re-creates the operations recorded after `since`, oldest first, for
    /// re-publication to a replication server that missed them.
    pub fn fake_operations_newer_than(
        &self,
        since: ChangeNumber,
        dn: &Dn,
        entry_uuid: &str,
    ) -> Vec<FakeOperation> {
        let mut ops = Vec::new();
        for (desc, hist) in &self.attrs {
            for avh in hist.values_historical() {
                let (cn, key) = if let Some(dt) = avh.delete_time {
                    (dt, HistAttrModificationKey::Del)
                } else if let Some(ut) = avh.add_time {
                    (ut, HistAttrModificationKey::Add)
                } else {
                    continue;
                };
                if cn.newer(since) {
                    let record = HistoricalAttributeValue {
                        cn,
                        record: HistRecord::AttrMod {
                            desc: desc.clone(),
                            key,
                            value: Some(avh.value.clone()),
                        },
                    };
                    if let Some(modification) = record.generate_mod() {
                        ops.push(FakeOperation::Modify {
                            change_number: cn,
                            dn: dn.clone(),
                            entry_uuid: entry_uuid.to_string(),
                            modification,
                        });
                    }
                }
            }
            if let Some(dt) = hist.delete_time() {
                if dt.newer(since) {
                    let record = HistoricalAttributeValue {
                        cn: dt,
                        record: HistRecord::AttrMod {
                            desc: desc.clone(),
                            key: HistAttrModificationKey::AttrDel,
                            value: None,
                        },
                    };
                    if let Some(modification) = record.generate_mod() {
                        ops.push(FakeOperation::Modify {
                            change_number: dt,
                            dn: dn.clone(),
                            entry_uuid: entry_uuid.to_string(),
                            modification,
                        });
                    }
                }
            }
        }
        ops.sort_by_key(FakeOperation::change_number);
        ops
    }
}
