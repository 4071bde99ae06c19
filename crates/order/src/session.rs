//! The loading order aggregate and its editing session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use loadorder_core::{AggregateRoot, DomainError, DomainResult, DurableId, LocalId, TenantId};
use loadorder_invoicing::{
    Admission, AdmissionRejection, BatchAdmission, IdentityResolver, InvoiceCandidate,
    InvoiceRecord,
};
use loadorder_parties::PartyRecord;
use loadorder_volumes::{
    Dimensions, LedgerKey, LedgerSnapshot, RekeyReport, UpsertOutcome, VolumeDimensionSet,
    VolumeLedger, round2,
};

use crate::dirty::DirtyStateTracker;
use crate::header::OrderHeader;

/// Why label generation or printing is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LabelGateError {
    #[error("save the order before generating labels")]
    NotPersisted,
    #[error("the order has unsaved changes; save it before generating labels")]
    UnsavedChanges,
    #[error("the order was never saved and has unsaved changes; save it before generating labels")]
    NotPersistedAndUnsaved,
}

/// Aggregate totals sent with the order header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub invoice_count: usize,
    pub volume_count: usize,
    pub cubic_m3: f64,
    /// Sum of the invoices' declared weights, in kilograms.
    pub weight: f64,
    /// Sum of the invoices' declared values.
    pub value: f64,
}

/// Structural view of the aggregate, used for change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub header: OrderHeader,
    pub invoices: Vec<InvoiceRecord>,
    pub ledger: LedgerSnapshot,
    pub sender: PartyRecord,
    pub recipient: PartyRecord,
}

/// Dimension set of a stored invoice that the store does not hold yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVolumes {
    pub invoice_number: String,
    pub invoice_id: DurableId,
    pub set: VolumeDimensionSet,
}

/// A loading order being assembled.
///
/// Invoices live in an arena keyed by `LocalId`; `order` keeps their
/// insertion order. Removing one invoice never disturbs another.
#[derive(Debug, Clone)]
pub struct OrderSession {
    id: LocalId,
    tenant_id: TenantId,
    durable_id: Option<DurableId>,
    header: OrderHeader,
    invoices: HashMap<LocalId, InvoiceRecord>,
    order: Vec<LocalId>,
    ledger: VolumeLedger,
    sender: PartyRecord,
    recipient: PartyRecord,
    version: u64,
    tracker: DirtyStateTracker,
}

impl OrderSession {
    /// Start a new, never-saved order.
    pub fn new(tenant_id: TenantId, header: OrderHeader) -> Self {
        Self::with_grace(tenant_id, header, Duration::ZERO)
    }

    /// Start a new order whose first `grace` of changes are treated as
    /// initial loading and never flag it dirty.
    pub fn with_grace(tenant_id: TenantId, header: OrderHeader, grace: Duration) -> Self {
        Self {
            id: LocalId::new(),
            tenant_id,
            durable_id: None,
            header,
            invoices: HashMap::new(),
            order: Vec::new(),
            ledger: VolumeLedger::new(),
            sender: PartyRecord::default(),
            recipient: PartyRecord::default(),
            version: 0,
            tracker: DirtyStateTracker::with_grace(grace, Instant::now()),
        }
    }

    /// Rebuild a stored order. The result is clean.
    ///
    /// `invoices` must all carry durable ids; `volumes` are keyed by them.
    pub fn load(
        tenant_id: TenantId,
        durable_id: DurableId,
        header: OrderHeader,
        invoices: Vec<InvoiceCandidate>,
        volumes: Vec<(DurableId, VolumeDimensionSet)>,
        sender: PartyRecord,
        recipient: PartyRecord,
    ) -> DomainResult<Self> {
        let mut session = Self::new(tenant_id, header);
        session.durable_id = Some(durable_id);

        for candidate in invoices {
            if candidate.durable_id.is_none() {
                return Err(DomainError::invariant(format!(
                    "stored invoice {} has no durable id",
                    candidate.number
                )));
            }
            match session.admit(candidate)? {
                Admission::Accepted(_) => {}
                Admission::RejectedDuplicate(dup) => {
                    return Err(DomainError::invariant(format!("stored order repeats {}", dup.key)));
                }
            }
        }
        for (id, set) in volumes {
            session.ledger.load_persisted(id, set);
        }

        session.sender = sender;
        session.recipient = recipient;
        session.version = 0;
        let fingerprint = session.fingerprint();
        session.tracker.finish_loading(fingerprint);
        Ok(session)
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn durable_id(&self) -> Option<&DurableId> {
        self.durable_id.as_ref()
    }

    pub fn header(&self) -> &OrderHeader {
        &self.header
    }

    pub fn sender(&self) -> &PartyRecord {
        &self.sender
    }

    pub fn recipient(&self) -> &PartyRecord {
        &self.recipient
    }

    pub fn ledger(&self) -> &VolumeLedger {
        &self.ledger
    }

    /// Invoices in the order they were admitted.
    pub fn invoices(&self) -> impl Iterator<Item = &InvoiceRecord> {
        self.order.iter().filter_map(|id| self.invoices.get(id))
    }

    pub fn invoice(&self, id: LocalId) -> Option<&InvoiceRecord> {
        self.invoices.get(&id)
    }

    pub fn invoice_count(&self) -> usize {
        self.order.len()
    }

    fn touch(&mut self) {
        self.version += 1;
        self.tracker.mark_changed();
    }

    // ---- ingestion ----

    /// Admit one candidate. Check and insert happen under the same `&mut`
    /// borrow, so admission is atomic per session.
    pub fn admit(&mut self, candidate: InvoiceCandidate) -> DomainResult<Admission> {
        let outcome = {
            let existing: Vec<&InvoiceRecord> = self.invoices().collect();
            IdentityResolver::admit(candidate, &existing, &[])?
        };
        if let Admission::Accepted(record) = &outcome {
            self.insert_accepted(record.as_ref().clone());
        }
        Ok(outcome)
    }

    /// Admit one candidate, returning its local id or why it was refused.
    pub fn try_admit(&mut self, candidate: InvoiceCandidate) -> Result<LocalId, AdmissionRejection> {
        let record = {
            let existing: Vec<&InvoiceRecord> = self.invoices().collect();
            IdentityResolver::try_admit(candidate, &existing, &[])?
        };
        let id = record.local_id();
        self.insert_accepted(record);
        Ok(id)
    }

    /// Admit a multi-document batch; duplicates inside the batch are refused.
    pub fn admit_batch(&mut self, candidates: Vec<InvoiceCandidate>) -> BatchAdmission {
        let batch = {
            let existing: Vec<&InvoiceRecord> = self.invoices().collect();
            IdentityResolver::admit_batch(candidates, &existing)
        };
        for record in &batch.accepted {
            self.insert_accepted(record.clone());
        }
        batch
    }

    fn insert_accepted(&mut self, record: InvoiceRecord) {
        // First accepted invoice with party data fills empty order parties;
        // parties already set are never overwritten.
        if self.sender.is_empty() && !record.sender().is_empty() {
            self.sender = record.sender().clone();
        }
        if self.recipient.is_empty() && !record.recipient().is_empty() {
            self.recipient = record.recipient().clone();
        }
        tracing::info!(
            number = %record.number(),
            channel = ?record.channel(),
            persisted = record.persistence().is_persisted(),
            "invoice admitted"
        );
        let id = record.local_id();
        self.order.push(id);
        self.invoices.insert(id, record);
        self.touch();
    }

    /// Remove an invoice and its volumes.
    pub fn remove_invoice(&mut self, id: LocalId) -> DomainResult<InvoiceRecord> {
        let record = self
            .invoices
            .remove(&id)
            .ok_or_else(|| DomainError::not_found(format!("invoice {id}")))?;
        self.order.retain(|x| *x != id);
        self.ledger.remove(&ledger_key(&record));
        tracing::info!(number = %record.number(), "invoice removed");
        self.touch();
        Ok(record)
    }

    pub fn replace_invoice_parties(
        &mut self,
        id: LocalId,
        sender: PartyRecord,
        recipient: PartyRecord,
    ) -> DomainResult<()> {
        let record = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("invoice {id}")))?;
        record.replace_parties(sender, recipient);
        self.touch();
        Ok(())
    }

    // ---- editing ----

    pub fn update_header<F>(&mut self, edit: F) -> DomainResult<()>
    where
        F: FnOnce(&mut OrderHeader),
    {
        let mut header = self.header.clone();
        edit(&mut header);
        header.validate()?;
        if header != self.header {
            self.header = header;
            self.touch();
        }
        Ok(())
    }

    pub fn set_sender(&mut self, party: PartyRecord) {
        if party != self.sender {
            self.sender = party;
            self.touch();
        }
    }

    pub fn set_recipient(&mut self, party: PartyRecord) {
        if party != self.recipient {
            self.recipient = party;
            self.touch();
        }
    }

    /// Replace the volumes of an invoice from raw measurements.
    pub fn set_volumes(&mut self, id: LocalId, dims: &[Dimensions]) -> DomainResult<UpsertOutcome> {
        let record = self
            .invoices
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("invoice {id}")))?;

        let set = VolumeDimensionSet::from_dimensions(dims, record.declared_weight())?;
        let outcome = self.ledger.upsert(ledger_key(record), set);
        if outcome.changed() {
            self.touch();
        }
        Ok(outcome)
    }

    pub fn volumes_of(&self, id: LocalId) -> Option<&VolumeDimensionSet> {
        self.invoices
            .get(&id)
            .and_then(|record| self.ledger.get(&ledger_key(record)))
    }

    // ---- derived views ----

    pub fn totals(&self) -> OrderTotals {
        let (weight, value) = self.invoices().fold((0.0, 0.0), |(w, v), r| {
            (w + r.declared_weight(), v + r.declared_value())
        });
        OrderTotals {
            invoice_count: self.invoice_count(),
            volume_count: self.ledger.unit_count(),
            cubic_m3: self.ledger.total_cubic_m3(),
            weight: round2(weight),
            value: round2(value),
        }
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            header: self.header.clone(),
            invoices: self.invoices().cloned().collect(),
            ledger: self.ledger.snapshot(),
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
        }
    }

    fn fingerprint(&self) -> JsonValue {
        serde_json::to_value(self.snapshot()).unwrap_or(JsonValue::Null)
    }

    /// At least one invoice, or a named party.
    pub fn has_significant_data(&self) -> bool {
        !self.order.is_empty() || self.sender.has_name() || self.recipient.has_name()
    }

    /// Whether the aggregate differs from the last committed state.
    pub fn is_dirty(&mut self) -> bool {
        self.is_dirty_at(Instant::now())
    }

    pub fn is_dirty_at(&mut self, now: Instant) -> bool {
        if !self.tracker.check_pending() {
            return self.tracker.last_known();
        }
        let snapshot = self.fingerprint();
        let significant = self.has_significant_data();
        self.tracker.evaluate(now, move || (snapshot, significant))
    }

    /// End the initial loading grace period now, taking the current state as
    /// the baseline.
    pub fn finish_loading(&mut self) {
        let fingerprint = self.fingerprint();
        self.tracker.finish_loading(fingerprint);
    }

    /// Labels may only be generated or printed for a saved, unchanged order.
    pub fn ensure_labels_allowed(&mut self) -> Result<DurableId, LabelGateError> {
        let dirty = self.is_dirty();
        match (&self.durable_id, dirty) {
            (Some(id), false) => Ok(id.clone()),
            (Some(_), true) => Err(LabelGateError::UnsavedChanges),
            (None, false) => Err(LabelGateError::NotPersisted),
            (None, true) => Err(LabelGateError::NotPersistedAndUnsaved),
        }
    }

    // ---- commit support ----

    /// Checks run before any write.
    pub fn validate_for_commit(&self) -> DomainResult<()> {
        self.header.validate()?;
        if self.order.is_empty() {
            return Err(DomainError::validation("an order needs at least one invoice"));
        }
        Ok(())
    }

    /// Invoices the store has not assigned an id to, in aggregate order.
    pub fn new_invoices(&self) -> Vec<&InvoiceRecord> {
        self.invoices()
            .filter(|r| !r.persistence().is_persisted())
            .collect()
    }

    pub fn record_invoice_persisted(&mut self, id: LocalId, durable: DurableId) -> DomainResult<()> {
        let record = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("invoice {id}")))?;
        record.mark_persisted(durable)?;
        self.touch();
        Ok(())
    }

    /// Move the volumes of newly stored invoices to their durable ids.
    /// `mapping` is keyed by the invoices' local ids.
    pub fn rekey_ledger(&mut self, mapping: &HashMap<LocalId, DurableId>) -> RekeyReport {
        let report = self.ledger.rekey(mapping);
        if !report.moved.is_empty() {
            self.touch();
        }
        report
    }

    /// Stored invoices whose volumes differ from what the store holds.
    pub fn volumes_to_persist(&self) -> Vec<PendingVolumes> {
        self.invoices()
            .filter_map(|r| {
                let id = r.durable_id()?;
                let key = LedgerKey::Durable(id.clone());
                if !self.ledger.needs_persist(&key) {
                    return None;
                }
                Some(PendingVolumes {
                    invoice_number: r.number().to_string(),
                    invoice_id: id.clone(),
                    set: self.ledger.get(&key)?.clone(),
                })
            })
            .collect()
    }

    pub fn mark_volumes_persisted(&mut self, invoice_id: &DurableId) {
        self.ledger.mark_synced(&LedgerKey::Durable(invoice_id.clone()));
    }

    /// Adopt the order id assigned by the store.
    ///
    /// A later id replaces an earlier one: the id read back during
    /// verification is authoritative over the one a write call returned.
    pub fn record_order_persisted(&mut self, id: DurableId) {
        if let Some(existing) = &self.durable_id {
            if *existing != id {
                tracing::warn!(previous = %existing, adopted = %id, "order id changed on read-back");
            }
        }
        self.durable_id = Some(id);
    }

    /// The current state is what the store holds.
    pub fn mark_committed(&mut self) {
        let fingerprint = self.fingerprint();
        self.tracker.adopt_baseline(fingerprint);
    }

    /// A commit attempt failed: keep the order flagged as unsaved.
    pub fn mark_commit_failed(&mut self) {
        self.tracker.force_dirty();
    }
}

impl AggregateRoot for OrderSession {
    type Id = LocalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Ledger address of an invoice's volumes.
pub fn ledger_key(record: &InvoiceRecord) -> LedgerKey {
    match record.durable_id() {
        Some(id) => LedgerKey::Durable(id.clone()),
        None => LedgerKey::pending(record.local_id(), record.number()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use loadorder_invoicing::IngestionChannel;
    use proptest::prelude::*;

    const KEY_123: &str = "35240812345678000195550010000001231876543210";
    const KEY_124: &str = "35240812345678000195550010000001241876543218";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 11, 12, 0, 0).unwrap()
    }

    fn upload(key: &str, sender: &str) -> InvoiceCandidate {
        InvoiceCandidate {
            sender: PartyRecord::named(sender),
            recipient: PartyRecord::named("Recipient Ltd"),
            declared_weight: 20.0,
            declared_value: 150.0,
            ..InvoiceCandidate::new(IngestionChannel::DocumentUpload, "", at()).with_access_key(key)
        }
    }

    fn session() -> OrderSession {
        OrderSession::new(TenantId::new(), OrderHeader::new("OC-1"))
    }

    fn accepted(outcome: Admission) -> LocalId {
        match outcome {
            Admission::Accepted(r) => r.local_id(),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn parties_are_filled_first_write_wins() {
        let mut s = session();
        s.admit(upload(KEY_123, "First Sender")).unwrap();
        s.admit(upload(KEY_124, "Second Sender")).unwrap();
        assert_eq!(s.sender().name, "First Sender");
        assert_eq!(s.recipient().name, "Recipient Ltd");
    }

    #[test]
    fn manually_set_party_is_not_overwritten() {
        let mut s = session();
        s.set_sender(PartyRecord::named("Typed By User"));
        s.admit(upload(KEY_123, "From Invoice")).unwrap();
        assert_eq!(s.sender().name, "Typed By User");
    }

    #[test]
    fn duplicate_admission_leaves_state_untouched() {
        let mut s = session();
        s.admit(upload(KEY_123, "A")).unwrap();
        let version = s.version();
        let outcome = s.admit(upload(KEY_123, "A")).unwrap();
        assert!(matches!(outcome, Admission::RejectedDuplicate(_)));
        assert_eq!(s.invoice_count(), 1);
        assert_eq!(s.version(), version);
    }

    #[test]
    fn removal_cascades_to_volumes_and_keeps_other_invoices() {
        let mut s = session();
        let a = accepted(s.admit(upload(KEY_123, "A")).unwrap());
        let b = accepted(s.admit(upload(KEY_124, "A")).unwrap());
        s.set_volumes(a, &[Dimensions::new(1.0, 1.0, 1.0)]).unwrap();
        s.set_volumes(b, &[Dimensions::new(2.0, 1.0, 1.0)]).unwrap();

        s.remove_invoice(a).unwrap();
        assert_eq!(s.invoice_count(), 1);
        assert_eq!(s.ledger().len(), 1);
        assert_eq!(s.volumes_of(b).unwrap().total_cubic_m3(), 2.0);
    }

    #[test]
    fn unchanged_volumes_do_not_mark_dirty() {
        let mut s = session();
        let a = accepted(s.admit(upload(KEY_123, "A")).unwrap());
        s.set_volumes(a, &[Dimensions::new(1.0, 1.0, 1.0)]).unwrap();
        s.record_order_persisted(DurableId::new("ord-1").unwrap());
        s.mark_committed();
        assert!(!s.is_dirty());

        let outcome = s.set_volumes(a, &[Dimensions::new(1.0, 1.0, 1.0)]).unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert!(!s.is_dirty());
    }

    #[test]
    fn label_gate_requires_saved_and_clean_order() {
        let mut s = session();
        s.admit(upload(KEY_123, "A")).unwrap();
        assert_eq!(s.ensure_labels_allowed(), Err(LabelGateError::NotPersistedAndUnsaved));

        s.record_order_persisted(DurableId::new("ord-1").unwrap());
        assert_eq!(s.ensure_labels_allowed(), Err(LabelGateError::UnsavedChanges));

        s.mark_committed();
        assert_eq!(s.ensure_labels_allowed().unwrap().as_str(), "ord-1");

        s.update_header(|h| h.notes = "fragile".into()).unwrap();
        assert_eq!(s.ensure_labels_allowed(), Err(LabelGateError::UnsavedChanges));
    }

    #[test]
    fn empty_new_order_is_clean_but_unsaved() {
        let mut s = session();
        s.update_header(|h| h.notes = "draft".into()).unwrap();
        assert!(!s.is_dirty());
        assert_eq!(s.ensure_labels_allowed(), Err(LabelGateError::NotPersisted));
    }

    #[test]
    fn dirty_returns_only_after_significant_change() {
        let mut s = session();
        s.admit(upload(KEY_123, "A")).unwrap();
        s.record_order_persisted(DurableId::new("ord-1").unwrap());
        s.mark_committed();
        assert!(!s.is_dirty());

        s.admit(upload(KEY_124, "A")).unwrap();
        assert!(s.is_dirty());
    }

    #[test]
    fn grace_period_swallows_initial_load() {
        let mut s = OrderSession::with_grace(
            TenantId::new(),
            OrderHeader::new("OC-1"),
            Duration::from_secs(60),
        );
        s.admit(upload(KEY_123, "A")).unwrap();
        assert!(!s.is_dirty());
    }

    #[test]
    fn unsaved_invoices_sharing_a_number_keep_separate_volumes() {
        let mut s = session();
        let a = accepted(s.admit(upload(KEY_123, "A")).unwrap());
        s.set_volumes(a, &[Dimensions::new(1.0, 1.0, 1.0); 3]).unwrap();
        // Same number, different issuer key, admitted after A was measured.
        let other_key = "41240898765432000100550010000001231876543219";
        let b = accepted(s.admit(upload(other_key, "B")).unwrap());
        s.set_volumes(b, &[Dimensions::new(2.0, 1.0, 1.0)]).unwrap();

        assert_eq!(s.volumes_of(a).unwrap().len(), 3);
        assert_eq!(s.volumes_of(b).unwrap().len(), 1);
        assert_eq!(s.ledger().len(), 2);
    }

    #[test]
    fn totals_sum_invoices_and_ledger() {
        let mut s = session();
        let a = accepted(s.admit(upload(KEY_123, "A")).unwrap());
        s.admit(upload(KEY_124, "A")).unwrap();
        s.set_volumes(a, &[Dimensions::new(2.0, 1.5, 0.8), Dimensions::new(1.0, 1.0, 1.0)])
            .unwrap();
        let totals = s.totals();
        assert_eq!(totals.invoice_count, 2);
        assert_eq!(totals.volume_count, 2);
        assert_eq!(totals.cubic_m3, 3.4);
        assert_eq!(totals.weight, 40.0);
        assert_eq!(totals.value, 300.0);
    }

    #[test]
    fn loaded_order_is_clean() {
        let invoice = InvoiceCandidate::new(IngestionChannel::SearchImport, "10", at())
            .with_durable_id(DurableId::new("inv-10").unwrap());
        let set = VolumeDimensionSet::from_dimensions(&[Dimensions::new(1.0, 1.0, 1.0)], 5.0).unwrap();
        let mut s = OrderSession::load(
            TenantId::new(),
            DurableId::new("ord-7").unwrap(),
            OrderHeader::new("OC-7"),
            vec![invoice],
            vec![(DurableId::new("inv-10").unwrap(), set)],
            PartyRecord::named("S"),
            PartyRecord::named("R"),
        )
        .unwrap();
        assert!(!s.is_dirty());
        assert!(s.volumes_to_persist().is_empty());
        assert!(s.ensure_labels_allowed().is_ok());
    }

    proptest! {
        /// After any sequence of volume edits, the order is dirty exactly when
        /// the final dimensions differ from the committed ones.
        #[test]
        fn dirty_tracks_difference_from_committed_volumes(
            edits in prop::collection::vec(prop::collection::vec(1u8..4, 1..4), 1..6)
        ) {
            let committed = [Dimensions::new(1.0, 1.0, 1.0)];
            let mut s = session();
            let a = accepted(s.admit(upload(KEY_123, "A")).unwrap());
            s.set_volumes(a, &committed).unwrap();
            s.record_order_persisted(DurableId::new("ord-1").unwrap());
            s.mark_committed();

            let mut last: Vec<Dimensions> = committed.to_vec();
            for sides in &edits {
                last = sides
                    .iter()
                    .map(|side| Dimensions::new(f64::from(*side), 1.0, 1.0))
                    .collect();
                s.set_volumes(a, &last).unwrap();
            }
            prop_assert_eq!(s.is_dirty(), last.as_slice() != committed.as_slice());
        }
    }
}
