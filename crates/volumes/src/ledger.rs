//! Volume ledger: per-invoice dimension sets.
//!
//! Entries are keyed by invoice number until the invoice is stored, then
//! re-keyed to the invoice's durable id. An entry whose invoice failed to
//! persist stays under its number and is flagged, never dropped.
//!
//! Two unsaved invoices may share a number (a keyed upload and a manual entry
//! of the same document), so a pending key also names the owning invoice.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use loadorder_core::{DurableId, LocalId};

use crate::unit::{VolumeDimensionSet, round2};

/// Address of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LedgerKey {
    /// An invoice the store has not assigned an id to yet.
    Pending { invoice: LocalId, number: String },
    Durable(DurableId),
}

impl LedgerKey {
    pub fn pending(invoice: LocalId, number: impl Into<String>) -> Self {
        Self::Pending {
            invoice,
            number: number.into(),
        }
    }
}

impl core::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LedgerKey::Pending { invoice, number } => write!(f, "pending:{number}:{invoice}"),
            LedgerKey::Durable(id) => write!(f, "durable:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    set: VolumeDimensionSet,
    /// The store holds exactly this set.
    synced: bool,
    /// A commit attempt could not re-key this entry; retried on the next one.
    unpersisted: bool,
}

impl LedgerEntry {
    pub fn set(&self) -> &VolumeDimensionSet {
        &self.set
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_unpersisted(&self) -> bool {
        self.unpersisted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Same unit count and totals as the stored entry; nothing changed.
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Result of moving pending entries to durable keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyReport {
    pub moved: Vec<(String, DurableId)>,
    /// Invoice numbers left under their pending key.
    pub retained: Vec<String>,
}

/// Serializable view of the ledger, embedded in the order header.
pub type LedgerSnapshot = BTreeMap<String, VolumeDimensionSet>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeLedger {
    entries: BTreeMap<LedgerKey, LedgerEntry>,
}

impl VolumeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `set` under `key` unless it matches what is already there.
    pub fn upsert(&mut self, key: LedgerKey, set: VolumeDimensionSet) -> UpsertOutcome {
        match self.entries.get_mut(&key) {
            Some(entry) if !entry.set.differs_materially(&set) => UpsertOutcome::Unchanged,
            Some(entry) => {
                entry.set = set;
                entry.synced = false;
                UpsertOutcome::Replaced
            }
            None => {
                self.entries.insert(
                    key,
                    LedgerEntry {
                        set,
                        synced: false,
                        unpersisted: false,
                    },
                );
                UpsertOutcome::Inserted
            }
        }
    }

    /// Seed an entry read back from storage; it is considered in sync.
    pub fn load_persisted(&mut self, id: DurableId, set: VolumeDimensionSet) {
        self.entries.insert(
            LedgerKey::Durable(id),
            LedgerEntry {
                set,
                synced: true,
                unpersisted: false,
            },
        );
    }

    pub fn get(&self, key: &LedgerKey) -> Option<&VolumeDimensionSet> {
        self.entries.get(key).map(|e| &e.set)
    }

    pub fn entry(&self, key: &LedgerKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &LedgerKey) -> Option<VolumeDimensionSet> {
        self.entries.remove(key).map(|e| e.set)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LedgerKey, &LedgerEntry)> {
        self.entries.iter()
    }

    /// Whether the entry differs from what the store last acknowledged.
    pub fn needs_persist(&self, key: &LedgerKey) -> bool {
        self.entries.get(key).is_some_and(|e| !e.synced)
    }

    pub fn mark_synced(&mut self, key: &LedgerKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.synced = true;
            entry.unpersisted = false;
        }
    }

    /// Move every pending entry whose invoice appears in `mapping` to its
    /// durable key. Pending entries without a mapping stay put, flagged.
    pub fn rekey(&mut self, mapping: &HashMap<LocalId, DurableId>) -> RekeyReport {
        let pending: Vec<(LedgerKey, LocalId, String)> = self
            .entries
            .keys()
            .filter_map(|k| match k {
                LedgerKey::Pending { invoice, number } => Some((k.clone(), *invoice, number.clone())),
                LedgerKey::Durable(_) => None,
            })
            .collect();

        let mut report = RekeyReport::default();
        for (old_key, invoice, number) in pending {
            match mapping.get(&invoice) {
                Some(id) => {
                    if let Some(mut entry) = self.entries.remove(&old_key) {
                        entry.unpersisted = false;
                        entry.synced = false;
                        self.entries.insert(LedgerKey::Durable(id.clone()), entry);
                        tracing::debug!(number = %number, durable_id = %id, "ledger entry re-keyed");
                        report.moved.push((number, id.clone()));
                    }
                }
                None => {
                    if let Some(entry) = self.entries.get_mut(&old_key) {
                        entry.unpersisted = true;
                    }
                    tracing::warn!(
                        number = %number,
                        "ledger entry left unpersisted; will be retried on next commit attempt"
                    );
                    report.retained.push(number);
                }
            }
        }
        report
    }

    pub fn unpersisted_numbers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|(k, e)| match k {
                LedgerKey::Pending { number, .. } if e.unpersisted => Some(number.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn total_cubic_m3(&self) -> f64 {
        round2(self.entries.values().map(|e| e.set.total_cubic_m3()).sum())
    }

    pub fn total_weight(&self) -> f64 {
        round2(self.entries.values().map(|e| e.set.total_weight()).sum())
    }

    pub fn unit_count(&self) -> usize {
        self.entries.values().map(|e| e.set.len()).sum()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.entries
            .iter()
            .map(|(k, e)| (k.to_string(), e.set.clone()))
            .collect()
    }
}
