//! Per-attribute historical state and conflict resolution.
//!
//! For every attribute modified on an entry, an [`AttrHistoricalMultiple`]
//! records the last time each value was added or deleted and the last time
//! the whole attribute was deleted. Replaying an inbound modification
//! against this state rewrites it into a conflict-free equivalent (or
//! suppresses it entirely), so that applying concurrent modifications in
//! any order yields the same final entry on every replica.
//!
//! Change-number order is the only tie-break: when two concurrent
//! operations are otherwise equal, the one with the larger change number
//! wins. That is what makes replay deterministic and order-independent.

use std::collections::BTreeMap;

use ferrodir_types::{AttrValue, Attribute, ChangeNumber, Entry, ModType, Modification};

use crate::hist_value::HistAttrModificationKey;

/// The recorded history of one attribute value.
///
/// Lookup identity is the value alone; the times say whether the value is
/// currently present or tombstoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrValueHistorical {
    /// The value this record is about.
    pub value: AttrValue,
    /// When the value was last added, if that add still stands.
    pub add_time: Option<ChangeNumber>,
    /// When the value was last deleted, if that delete still stands.
    pub delete_time: Option<ChangeNumber>,
}

impl AttrValueHistorical {
    /// A record for a value added at `cn`.
    pub fn added(value: AttrValue, cn: ChangeNumber) -> Self {
        Self {
            value,
            add_time: Some(cn),
            delete_time: None,
        }
    }

    /// A record for a value deleted at `cn`.
    pub fn deleted(value: AttrValue, cn: ChangeNumber) -> Self {
        Self {
            value,
            add_time: None,
            delete_time: Some(cn),
        }
    }

    /// True if the record says the value is currently present: the add time
    /// stands and is not superseded by a delete.
    pub fn is_update(&self) -> bool {
        self.add_time.is_some() && self.add_time > self.delete_time
    }
}

/// Outcome of replaying one modification against the historical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayResult {
    /// True if the conflict-resolution path was taken.
    pub conflict: bool,
    /// False if the modification was entirely suppressed and must not be
    /// applied to the entry.
    pub keep: bool,
}

/// Historical state of one (entry, attribute) pair.
///
/// Created lazily the first time the attribute is modified on the entry,
/// persisted as part of the entry's historical attribute, destroyed with
/// the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrHistoricalMultiple {
    delete_time: Option<ChangeNumber>,
    last_update_time: Option<ChangeNumber>,
    values_hist: BTreeMap<AttrValue, AttrValueHistorical>,
}

impl AttrHistoricalMultiple {
    /// Creates empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last time the whole attribute was deleted.
    pub fn delete_time(&self) -> Option<ChangeNumber> {
        self.delete_time
    }

    /// Last time the attribute was modified at all.
    pub fn last_update_time(&self) -> Option<ChangeNumber> {
        self.last_update_time
    }

    /// The per-value records, in value order.
    pub fn values_historical(&self) -> impl Iterator<Item = &AttrValueHistorical> {
        self.values_hist.values()
    }

    /// The record for one value, if any.
    pub fn value_historical(&self, value: &AttrValue) -> Option<&AttrValueHistorical> {
        self.values_hist.get(value)
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.values_hist.is_empty() && self.delete_time.is_none()
    }

    fn touch(&mut self, cn: ChangeNumber) {
        if Some(cn) > self.last_update_time {
            self.last_update_time = Some(cn);
        }
    }

    /// Records a whole-attribute delete at `cn`: every value record the
    /// delete supersedes is dropped, and the attribute-level delete time
    /// covers them from then on.
    pub fn record_delete_attr(&mut self, cn: ChangeNumber) {
        self.values_hist
            .retain(|_, hist| !(Some(cn) >= hist.add_time && Some(cn) >= hist.delete_time));
        if Some(cn) > self.delete_time {
            self.delete_time = Some(cn);
        }
        self.touch(cn);
    }

    /// Records the delete of one value at `cn`.
    pub fn record_delete_value(&mut self, value: &AttrValue, cn: ChangeNumber) {
        self.values_hist.insert(
            value.clone(),
            AttrValueHistorical::deleted(value.clone(), cn),
        );
        self.touch(cn);
    }

    /// Records the delete of a set of values at `cn`.
    pub fn record_delete_values(&mut self, attr: &Attribute, cn: ChangeNumber) {
        for value in &attr.values {
            self.record_delete_value(value, cn);
        }
    }

    /// Records the add of one value at `cn`.
    pub fn record_add_value(&mut self, value: &AttrValue, cn: ChangeNumber) {
        self.values_hist.insert(
            value.clone(),
            AttrValueHistorical::added(value.clone(), cn),
        );
        self.touch(cn);
    }

    /// Records the add of a set of values at `cn`.
    pub fn record_add_values(&mut self, attr: &Attribute, cn: ChangeNumber) {
        for value in &attr.values {
            self.record_add_value(value, cn);
        }
    }

    /// Applies one decoded history record (used when rebuilding from the
    /// persisted form).
    pub fn assign(
        &mut self,
        key: HistAttrModificationKey,
        value: Option<&AttrValue>,
        cn: ChangeNumber,
    ) {
        match key {
            HistAttrModificationKey::Add => {
                if let Some(value) = value {
                    self.record_add_value(value, cn);
                }
            }
            HistAttrModificationKey::Del => {
                if let Some(value) = value {
                    self.record_delete_value(value, cn);
                }
            }
            HistAttrModificationKey::Repl => {
                self.record_delete_attr(cn);
                if let Some(value) = value {
                    self.record_add_value(value, cn);
                }
            }
            HistAttrModificationKey::AttrDel => {
                self.record_delete_attr(cn);
            }
        }
    }

    /// Replays one modification with change number `cn` against this
    /// history, rewriting it in place into its conflict-free equivalent.
    ///
    /// The fast path applies when the modification is a REPLACE at least as
    /// new as everything recorded: the history is updated unconditionally.
    /// Every other case takes the conflict path, which compares the
    /// modification against the per-value records and may drop values from
    /// it or suppress it entirely.
    ///
    /// `entry` is the entry *before* this modification; `single_valued`
    /// is the schema fact for the modified attribute.
    pub fn replay(
        &mut self,
        m: &mut Modification,
        cn: ChangeNumber,
        entry: &Entry,
        single_valued: bool,
    ) -> ReplayResult {
        if Some(cn) >= self.last_update_time && m.kind == ModType::Replace {
            self.process_local_or_nonconflict(cn, m, single_valued);
            return ReplayResult {
                conflict: false,
                keep: true,
            };
        }

        let keep = match m.kind {
            ModType::Delete => {
                if Some(cn) < self.delete_time {
                    // Already obsoleted by a more recent whole-attribute
                    // delete: skip this modification.
                    false
                } else {
                    self.conflict_delete(cn, m, entry)
                }
            }
            ModType::Add => self.conflict_add(cn, m),
            ModType::Replace => {
                if Some(cn) < self.delete_time {
                    false
                } else {
                    // A replace decomposes into a delete pass (what older
                    // values survive) and an add pass (what new values go
                    // in), concatenated back into one replace.
                    let added = std::mem::take(&mut m.attr.values);
                    self.conflict_delete(cn, m, entry);
                    let mut values = std::mem::replace(&mut m.attr.values, added);
                    self.conflict_add(cn, m);
                    for value in std::mem::take(&mut m.attr.values) {
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                    m.kind = ModType::Replace;
                    m.attr.values = values;
                    true
                }
            }
        };
        ReplayResult {
            conflict: true,
            keep,
        }
    }

    /// Updates the history for a modification known not to conflict (a
    /// local operation, or a replayed one newer than everything recorded).
    /// This is the usual path; the caller is responsible for having checked
    /// that no conflict is possible.
    pub fn process_local_or_nonconflict(
        &mut self,
        cn: ChangeNumber,
        m: &Modification,
        single_valued: bool,
    ) {
        match m.kind {
            ModType::Delete => {
                if m.attr.values.is_empty() {
                    self.record_delete_attr(cn);
                } else {
                    self.record_delete_values(&m.attr, cn);
                }
            }
            ModType::Add => {
                if single_valued {
                    self.record_delete_attr(cn);
                }
                self.record_add_values(&m.attr, cn);
            }
            ModType::Replace => {
                self.record_delete_attr(cn);
                self.record_add_values(&m.attr, cn);
            }
        }
    }

    /// Conflict path for a DELETE. Returns false if nothing is left to do
    /// and the modification must be suppressed.
    fn conflict_delete(&mut self, cn: ChangeNumber, m: &mut Modification, entry: &Entry) -> bool {
        if m.attr.values.is_empty() {
            // Whole-attribute delete: rewrite into a REPLACE that keeps
            // every value updated after this delete. A value present on the
            // entry without any state record is simply dropped.
            m.kind = ModType::Replace;
            let mut kept_values = Vec::new();
            let mut kept_hist = BTreeMap::new();
            for (value, hist) in std::mem::take(&mut self.values_hist) {
                if Some(cn) < hist.add_time {
                    // Updated after this delete: the value survives.
                    kept_values.push(value.clone());
                    kept_hist.insert(value, hist);
                } else if Some(cn) < hist.delete_time {
                    // A tombstone more recent than this delete stands.
                    kept_hist.insert(value, hist);
                }
            }
            self.values_hist = kept_hist;
            m.attr.values = kept_values;
            if Some(cn) > self.delete_time {
                self.delete_time = Some(cn);
            }
            self.touch(cn);
            return true;
        }

        // Delete of specific values: decide value by value, sequentially.
        // The same-operation add marker interacts with the suppression rule
        // below in an order-sensitive way; the per-value sequence is part of
        // the observable behavior and is pinned by property tests.
        let mut retained = m.attr.values.clone();
        for value in m.attr.values.clone() {
            let mut delete_it = true;
            let mut added_in_current_op = false;
            match self.values_hist.get(&value).cloned() {
                Some(old) => {
                    if old.add_time == Some(cn) {
                        // Added earlier in this same operation: the delete
                        // must still be performed.
                        added_in_current_op = true;
                    }
                    if Some(cn) >= old.delete_time && Some(cn) >= old.add_time {
                        self.values_hist.insert(
                            value.clone(),
                            AttrValueHistorical::deleted(value.clone(), cn),
                        );
                    } else if old.is_update() {
                        delete_it = false;
                    }
                }
                None => {
                    self.values_hist.insert(
                        value.clone(),
                        AttrValueHistorical::deleted(value.clone(), cn),
                    );
                }
            }

            // Filter the value out when it was already removed with an
            // equal-or-newer change, or when it is absent from the live
            // entry and was not added by this very operation.
            if !delete_it || (!entry.has_value(&m.attr.desc, &value) && !added_in_current_op) {
                retained.retain(|v| v != &value);
                if retained.is_empty() {
                    // Last value filtered out: the whole modification is
                    // suppressed. Values after this one keep their history
                    // untouched.
                    return false;
                }
            }
        }
        m.attr.values = retained;
        self.touch(cn);
        true
    }

    /// Conflict path for an ADD. Returns false if the modification must be
    /// suppressed (obsoleted by a newer whole-attribute delete, or every
    /// value dropped as an idempotent or superseded re-add).
    fn conflict_add(&mut self, cn: ChangeNumber, m: &mut Modification) -> bool {
        if Some(cn) < self.delete_time {
            // The whole attribute was deleted more recently: forget this add.
            return false;
        }

        let mut retained = m.attr.values.clone();
        for value in m.attr.values.clone() {
            match self.values_hist.get(&value).cloned() {
                None => {
                    self.values_hist.insert(
                        value.clone(),
                        AttrValueHistorical::added(value.clone(), cn),
                    );
                }
                Some(old) => {
                    if old.is_update() {
                        // Already present: keep the newest add time and drop
                        // the value from the outgoing modification.
                        if Some(cn) > old.add_time {
                            self.values_hist.insert(
                                value.clone(),
                                AttrValueHistorical::added(value.clone(), cn),
                            );
                        }
                        retained.retain(|v| v != &value);
                    } else if Some(cn) >= old.delete_time {
                        // This add supersedes the recorded delete.
                        self.values_hist.insert(
                            value.clone(),
                            AttrValueHistorical::added(value.clone(), cn),
                        );
                    } else {
                        // The recorded delete is newer and wins.
                        retained.retain(|v| v != &value);
                    }
                }
            }
        }
        m.attr.values = retained;
        self.touch(cn);
        !m.attr.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodir_types::{AttrDescription, Dn};
    use proptest::prelude::*;

    fn cn(seq: u32) -> ChangeNumber {
        ChangeNumber::new(1_000, seq, 1)
    }

    fn cn_at(seq: u32, replica: i32) -> ChangeNumber {
        ChangeNumber::new(1_000, seq, replica)
    }

    fn desc() -> AttrDescription {
        AttrDescription::new("description")
    }

    fn entry_with(values: &[&str]) -> Entry {
        let mut entry = Entry::new(Dn::parse("cn=e,dc=x").unwrap(), "uuid-e");
        entry.put_attribute(desc(), values.iter().map(|v| AttrValue::from(*v)).collect());
        entry
    }

    fn add_mod(values: &[&str]) -> Modification {
        Modification::with_values(ModType::Add, desc(), values)
    }

    fn del_mod(values: &[&str]) -> Modification {
        Modification::with_values(ModType::Delete, desc(), values)
    }

    fn repl_mod(values: &[&str]) -> Modification {
        Modification::with_values(ModType::Replace, desc(), values)
    }

    fn values(m: &Modification) -> Vec<&str> {
        m.attr.values.iter().map(AttrValue::as_str).collect()
    }

    #[test]
    fn test_value_historical_is_update() {
        let v = AttrValueHistorical::added("x".into(), cn(2));
        assert!(v.is_update());
        let t = AttrValueHistorical::deleted("x".into(), cn(2));
        assert!(!t.is_update());
    }

    #[test]
    fn test_fast_path_replace() {
        let mut hist = AttrHistoricalMultiple::new();
        let mut m = repl_mod(&["a"]);
        let result = hist.replay(&mut m, cn(5), &entry_with(&[]), false);
        assert!(!result.conflict);
        assert!(result.keep);
        assert_eq!(hist.delete_time(), Some(cn(5)));
        assert_eq!(hist.last_update_time(), Some(cn(5)));
        assert!(hist.value_historical(&"a".into()).unwrap().is_update());
    }

    #[test]
    fn test_add_takes_conflict_path_even_when_newest() {
        let mut hist = AttrHistoricalMultiple::new();
        let mut m = add_mod(&["a"]);
        let result = hist.replay(&mut m, cn(5), &entry_with(&[]), false);
        assert!(result.conflict);
        assert!(result.keep);
        assert_eq!(values(&m), vec!["a"]);
    }

    #[test]
    fn test_newer_add_wins_over_older_delete() {
        // No history yet; ADD v1 at cn1, then a concurrent
        // DELETE v1 with an older change number arrives. The newer add
        // wins: the delete is suppressed and the add time stands.
        let mut hist = AttrHistoricalMultiple::new();
        let mut add = add_mod(&["v1"]);
        assert!(hist.replay(&mut add, cn(10), &entry_with(&[]), false).keep);

        let mut del = del_mod(&["v1"]);
        let result = hist.replay(&mut del, cn(5), &entry_with(&["v1"]), false);
        assert!(result.conflict);
        assert!(!result.keep);
        assert_eq!(
            hist.value_historical(&"v1".into()).unwrap().add_time,
            Some(cn(10))
        );
    }

    #[test]
    fn test_replace_empty_clears_and_tombstones() {
        // ADD v1@cn1, ADD v2@cn2, then REPLACE [] @cn3 with cn3 newest:
        // attribute empty, whole-attribute delete at cn3, and both values
        // dead at cn3 (their records superseded, any older re-add
        // suppressed by the delete time).
        let mut hist = AttrHistoricalMultiple::new();
        assert!(hist.replay(&mut add_mod(&["v1"]), cn(1), &entry_with(&[]), false).keep);
        assert!(hist.replay(&mut add_mod(&["v2"]), cn(2), &entry_with(&["v1"]), false).keep);

        let mut repl = repl_mod(&[]);
        let result = hist.replay(&mut repl, cn(3), &entry_with(&["v1", "v2"]), false);
        assert!(!result.conflict);
        assert!(result.keep);
        assert_eq!(hist.delete_time(), Some(cn(3)));
        for value in ["v1", "v2"] {
            let present = hist
                .value_historical(&value.into())
                .is_some_and(AttrValueHistorical::is_update);
            assert!(!present, "{value} must be dead after the empty replace");
        }

        // A concurrent re-add older than the replace stays suppressed.
        let mut late_add = add_mod(&["v1"]);
        let late = hist.replay(&mut late_add, cn(2), &entry_with(&[]), false);
        assert!(!late.keep);
    }

    #[test]
    fn test_attr_delete_concurrent_with_newer_add_any_order() {
        // Whole-attribute DELETE at cn2 concurrent with
        // ADD v3 at cn3 > cn2, arriving in either order. Result: v3
        // present, pre-cn2 values absent.
        let run = |delete_first: bool| {
            let mut hist = AttrHistoricalMultiple::new();
            // Pre-existing value added before the delete.
            assert!(hist.replay(&mut add_mod(&["v0"]), cn(1), &entry_with(&[]), false).keep);

            let mut entry = entry_with(&["v0"]);
            let apply_delete = |hist: &mut AttrHistoricalMultiple, entry: &mut Entry| {
                let mut del = del_mod(&[]);
                let result = hist.replay(&mut del, cn(2), entry, false);
                if result.keep {
                    entry.apply(&del);
                }
            };
            let apply_add = |hist: &mut AttrHistoricalMultiple, entry: &mut Entry| {
                let mut add = add_mod(&["v3"]);
                let result = hist.replay(&mut add, cn(3), entry, false);
                if result.keep {
                    entry.apply(&add);
                }
            };
            if delete_first {
                apply_delete(&mut hist, &mut entry);
                apply_add(&mut hist, &mut entry);
            } else {
                apply_add(&mut hist, &mut entry);
                apply_delete(&mut hist, &mut entry);
            }
            (hist, entry)
        };

        let (hist_a, entry_a) = run(true);
        let (hist_b, entry_b) = run(false);
        for (hist, entry) in [(&hist_a, &entry_a), (&hist_b, &entry_b)] {
            assert!(entry.has_value(&desc(), &"v3".into()), "v3 must survive");
            assert!(!entry.has_value(&desc(), &"v0".into()), "v0 must be gone");
            assert_eq!(hist.delete_time(), Some(cn(2)));
        }
        assert_eq!(hist_a, hist_b);
        assert_eq!(entry_a, entry_b);
    }

    #[test]
    fn test_idempotent_delete_replay() {
        // Replaying the same (value, DELETE, cn) twice: the second replay is
        // a no-op and the historical state is unchanged.
        let mut hist = AttrHistoricalMultiple::new();
        assert!(hist.replay(&mut add_mod(&["v"]), cn(1), &entry_with(&[]), false).keep);

        let mut entry = entry_with(&["v"]);
        let mut first = del_mod(&["v"]);
        assert!(hist.replay(&mut first, cn(2), &entry, false).keep);
        entry.apply(&first);
        let after_first = hist.clone();

        let mut second = del_mod(&["v"]);
        let result = hist.replay(&mut second, cn(2), &entry, false);
        assert!(!result.keep, "replayed delete must be suppressed");
        assert_eq!(hist, after_first);
    }

    #[test]
    fn test_idempotent_add_replay() {
        let mut hist = AttrHistoricalMultiple::new();
        let mut entry = entry_with(&[]);
        let mut first = add_mod(&["v"]);
        assert!(hist.replay(&mut first, cn(2), &entry, false).keep);
        entry.apply(&first);
        let after_first = hist.clone();

        let mut second = add_mod(&["v"]);
        let result = hist.replay(&mut second, cn(2), &entry, false);
        assert!(!result.keep, "idempotent re-add must be suppressed");
        assert_eq!(hist, after_first);
    }

    #[test]
    fn test_add_obsoleted_by_newer_attr_delete() {
        let mut hist = AttrHistoricalMultiple::new();
        hist.record_delete_attr(cn(10));
        let mut add = add_mod(&["v"]);
        let result = hist.replay(&mut add, cn(5), &entry_with(&[]), false);
        assert!(!result.keep);
        assert!(hist.value_historical(&"v".into()).is_none());
    }

    #[test]
    fn test_replace_older_than_attr_delete_is_suppressed() {
        let mut hist = AttrHistoricalMultiple::new();
        hist.record_delete_attr(cn(10));
        let mut repl = repl_mod(&["v"]);
        let result = hist.replay(&mut repl, cn(5), &entry_with(&[]), false);
        assert!(result.conflict);
        assert!(!result.keep);
    }

    #[test]
    fn test_conflict_replace_merges_survivors_and_additions() {
        // old: a@1, b@5. REPLACE [c] @3 (older than b's add): b survives the
        // delete pass, a does not; c comes from the add pass.
        let mut hist = AttrHistoricalMultiple::new();
        assert!(hist.replay(&mut add_mod(&["a"]), cn(1), &entry_with(&[]), false).keep);
        assert!(hist.replay(&mut add_mod(&["b"]), cn(5), &entry_with(&["a"]), false).keep);

        let mut repl = repl_mod(&["c"]);
        let result = hist.replay(&mut repl, cn(3), &entry_with(&["a", "b"]), false);
        assert!(result.conflict);
        assert!(result.keep);
        assert_eq!(repl.kind, ModType::Replace);
        let mut got = values(&repl);
        got.sort_unstable();
        assert_eq!(got, vec!["b", "c"]);
        assert_eq!(hist.delete_time(), Some(cn(3)));
        assert!(hist.value_historical(&"b".into()).unwrap().is_update());
        assert!(hist.value_historical(&"c".into()).unwrap().is_update());
    }

    #[test]
    fn test_conflict_replace_with_all_additions_shadowed_still_clears() {
        // REPLACE [v] at cn2 where v was deleted at cn3 > cn2: the add half
        // is dropped but the replace itself must still clear older values.
        let mut hist = AttrHistoricalMultiple::new();
        assert!(hist.replay(&mut add_mod(&["old"]), cn(1), &entry_with(&[]), false).keep);
        hist.record_delete_value(&"v".into(), cn(3));

        let mut repl = repl_mod(&["v"]);
        let result = hist.replay(&mut repl, cn(2), &entry_with(&["old"]), false);
        assert!(result.keep);
        assert_eq!(repl.kind, ModType::Replace);
        assert!(values(&repl).is_empty(), "v shadowed, old not kept");
    }

    #[test]
    fn test_delete_value_absent_from_entry_is_filtered() {
        let mut hist = AttrHistoricalMultiple::new();
        assert!(hist.replay(&mut add_mod(&["a", "b"]), cn(1), &entry_with(&[]), false).keep);

        // Entry only carries "a": deleting "a" and "b" rewrites to just "a".
        let mut del = del_mod(&["a", "b"]);
        let result = hist.replay(&mut del, cn(2), &entry_with(&["a"]), false);
        assert!(result.keep);
        assert_eq!(values(&del), vec!["a"]);
    }

    #[test]
    fn test_single_valued_add_fast_path_clears_previous() {
        let mut hist = AttrHistoricalMultiple::new();
        let mut first = repl_mod(&["old"]);
        hist.replay(&mut first, cn(1), &entry_with(&[]), true);

        // A newer local add on a single-valued attribute removes-then-adds:
        // the old value's record is superseded by the attribute delete.
        let m = add_mod(&["new"]);
        hist.process_local_or_nonconflict(cn(2), &m, true);
        assert!(hist.value_historical(&"old".into()).is_none());
        assert!(hist.value_historical(&"new".into()).unwrap().is_update());
        assert_eq!(hist.delete_time(), Some(cn(2)));
    }

    #[test]
    fn test_tombstone_newer_than_attr_delete_survives() {
        let mut hist = AttrHistoricalMultiple::new();
        hist.record_delete_value(&"v".into(), cn(9));

        let mut del = del_mod(&[]);
        assert!(hist.replay(&mut del, cn(4), &entry_with(&[]), false).keep);
        // The tombstone at cn9 is newer than the whole-attribute delete at
        // cn4 and must survive in history.
        assert_eq!(
            hist.value_historical(&"v".into()).unwrap().delete_time,
            Some(cn(9))
        );
    }

    #[test]
    fn test_same_operation_add_then_delete() {
        // A value added earlier in the same operation (same change number)
        // must still be deletable by that operation.
        let mut hist = AttrHistoricalMultiple::new();
        let op_cn = cn(7);
        let mut entry = entry_with(&[]);

        let mut add = add_mod(&["tmp"]);
        assert!(hist.replay(&mut add, op_cn, &entry, false).keep);
        entry.apply(&add);

        let mut del = del_mod(&["tmp"]);
        let result = hist.replay(&mut del, op_cn, &entry, false);
        assert!(result.keep, "same-operation delete must not be filtered");
        assert_eq!(values(&del), vec!["tmp"]);
        assert!(!hist.value_historical(&"tmp".into()).unwrap().is_update());
    }

    fn apply(
        hist: &mut AttrHistoricalMultiple,
        entry: &mut Entry,
        m: &Modification,
        cn: ChangeNumber,
    ) {
        let mut m = m.clone();
        let result = hist.replay(&mut m, cn, entry, false);
        if result.keep {
            entry.apply(&m);
        }
    }

    /// The observable historical state: per-value records and the
    /// whole-attribute delete time. The last-update bookkeeping is excluded:
    /// a fully-suppressed modification does not advance it, which makes it
    /// legitimately arrival-order dependent.
    fn snapshot(
        hist: &AttrHistoricalMultiple,
    ) -> (Option<ChangeNumber>, Vec<AttrValueHistorical>) {
        (
            hist.delete_time(),
            hist.values_historical().cloned().collect(),
        )
    }

    proptest! {
        // Commutativity under the change-number tie-break: two concurrent
        // single-value operations applied in either order leave identical
        // per-value history and identical live values.
        //
        // Both values carry seeded history: a replica only ever publishes a
        // delete of a value some replica added, so histories where a value
        // was never added anywhere are not reachable inputs.
        #[test]
        fn prop_two_concurrent_ops_commute(
            kind_a in 0u8..3,
            kind_b in 0u8..3,
            value_a in 0u8..2,
            value_b in 0u8..2,
        ) {
            let pick = |kind: u8, value: u8| {
                let value = if value == 0 { "x" } else { "y" };
                match kind {
                    0 => add_mod(&[value]),
                    1 => del_mod(&[value]),
                    _ => repl_mod(&[value]),
                }
            };
            let op_a = pick(kind_a, value_a);
            let op_b = pick(kind_b, value_b);
            let cn_a = cn_at(10, 1);
            let cn_b = cn_at(10, 2);

            let base_hist = {
                let mut h = AttrHistoricalMultiple::new();
                let mut seed = add_mod(&["x", "y"]);
                h.replay(&mut seed, cn_at(1, 1), &entry_with(&[]), false);
                h
            };
            let base_entry = entry_with(&["x", "y"]);

            let mut hist_ab = base_hist.clone();
            let mut entry_ab = base_entry.clone();
            apply(&mut hist_ab, &mut entry_ab, &op_a, cn_a);
            apply(&mut hist_ab, &mut entry_ab, &op_b, cn_b);

            let mut hist_ba = base_hist.clone();
            let mut entry_ba = base_entry.clone();
            apply(&mut hist_ba, &mut entry_ba, &op_b, cn_b);
            apply(&mut hist_ba, &mut entry_ba, &op_a, cn_a);

            prop_assert_eq!(snapshot(&hist_ab), snapshot(&hist_ba));
            prop_assert_eq!(entry_ab, entry_ba);
        }

        // Pins the order-sensitive interaction between the same-operation
        // add marker and delete suppression for multi-value deletes within
        // one operation: repeated replay of the identical operation reaches
        // a fixed point (the state after the second replay never changes
        // again).
        #[test]
        fn prop_same_operation_multi_value_delete_converges(
            in_op in prop::collection::vec(any::<bool>(), 2..4),
            on_entry in prop::collection::vec(any::<bool>(), 2..4),
        ) {
            let names = ["a", "b", "c", "d"];
            let op_cn = cn_at(20, 1);
            let n = in_op.len().min(on_entry.len());

            let mut hist = AttrHistoricalMultiple::new();
            let mut entry = entry_with(&[]);
            let pre: Vec<&str> = (0..n).filter(|&i| on_entry[i]).map(|i| names[i]).collect();
            entry.put_attribute(desc(), pre.iter().map(|v| AttrValue::from(*v)).collect());
            for value in &pre {
                hist.record_add_value(&AttrValue::from(*value), cn_at(1, 1));
            }
            // Values added earlier in the same operation share its change
            // number.
            for i in (0..n).filter(|&i| in_op[i]) {
                let mut add = add_mod(&[names[i]]);
                if hist.replay(&mut add, op_cn, &entry, false).keep {
                    entry.apply(&add);
                }
            }

            let all: Vec<&str> = names[..n].to_vec();
            let replay_once = |hist: &mut AttrHistoricalMultiple, entry: &mut Entry| {
                let mut del = Modification::with_values(ModType::Delete, desc(), &all);
                if hist.replay(&mut del, op_cn, entry, false).keep {
                    entry.apply(&del);
                }
            };

            replay_once(&mut hist, &mut entry);
            replay_once(&mut hist, &mut entry);
            let settled = (snapshot(&hist), entry.clone());
            replay_once(&mut hist, &mut entry);
            prop_assert_eq!((snapshot(&hist), entry.clone()), settled);
        }
    }
}
