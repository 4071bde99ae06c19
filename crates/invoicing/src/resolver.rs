//! Identity resolver: keeps duplicate invoices out of a loading order.
//!
//! Checks, in order:
//! 1. the in-flight batch of the same ingestion operation,
//! 2. invoices already accepted into the aggregate,
//! 3. for search imports only, every known identity at once (access key,
//!    number and synthetic identity), since search results may lack a key.
//!
//! Rejection never mutates anything. Malformed candidates surface as
//! `DomainError`, duplicates as `Admission::RejectedDuplicate`;
//! `try_admit` folds both into `AdmissionRejection`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use loadorder_core::DomainError;

use crate::invoice::{DedupKey, IngestionChannel, InvoiceCandidate, InvoiceRecord};

/// Where a duplicate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateOf {
    InFlightBatch,
    Aggregate,
}

/// A candidate refused because its identity is already present.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{key} is already present ({against:?})")]
pub struct DuplicateInvoice {
    pub key: DedupKey,
    pub against: DuplicateOf,
}

/// Outcome of admitting one well-formed candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted(Box<InvoiceRecord>),
    RejectedDuplicate(DuplicateInvoice),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted(_))
    }
}

/// Why a candidate was not admitted: already present, or not an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejection {
    #[error(transparent)]
    Duplicate(#[from] DuplicateInvoice),

    #[error("malformed invoice: {0}")]
    Malformed(#[from] DomainError),
}

impl AdmissionRejection {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AdmissionRejection::Duplicate(_))
    }
}

/// Outcome of admitting a multi-document batch.
#[derive(Debug, Default)]
pub struct BatchAdmission {
    pub accepted: Vec<InvoiceRecord>,
    pub duplicates: Vec<DuplicateInvoice>,
    /// Candidate position in the batch, with the reason it was refused.
    pub malformed: Vec<(usize, DomainError)>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityResolver;

impl IdentityResolver {
    /// Admit one candidate against the current aggregate and in-flight batch.
    pub fn admit(
        candidate: InvoiceCandidate,
        existing: &[&InvoiceRecord],
        in_flight: &[InvoiceRecord],
    ) -> Result<Admission, DomainError> {
        let (identity, number) = candidate.validate()?;
        let record = InvoiceRecord::from_candidate(candidate, identity, number);
        let key = record.dedup_key();

        if in_flight.iter().any(|r| r.dedup_key() == key) {
            tracing::debug!(%key, "duplicate within in-flight batch");
            return Ok(duplicate(key, DuplicateOf::InFlightBatch));
        }

        if existing.iter().any(|r| r.dedup_key() == key) {
            tracing::debug!(%key, "duplicate of accepted invoice");
            return Ok(duplicate(key, DuplicateOf::Aggregate));
        }

        if record.channel() == IngestionChannel::SearchImport {
            if in_flight.iter().any(|r| overlaps(&record, r)) {
                tracing::debug!(%key, "search import overlaps in-flight batch");
                return Ok(duplicate(key, DuplicateOf::InFlightBatch));
            }
            if existing.iter().any(|r| overlaps(&record, r)) {
                tracing::debug!(%key, "search import overlaps accepted invoice");
                return Ok(duplicate(key, DuplicateOf::Aggregate));
            }
        }

        Ok(Admission::Accepted(Box::new(record)))
    }

    /// Admit one candidate, folding both kinds of refusal into one error.
    pub fn try_admit(
        candidate: InvoiceCandidate,
        existing: &[&InvoiceRecord],
        in_flight: &[InvoiceRecord],
    ) -> Result<InvoiceRecord, AdmissionRejection> {
        match Self::admit(candidate, existing, in_flight)? {
            Admission::Accepted(record) => Ok(*record),
            Admission::RejectedDuplicate(dup) => Err(dup.into()),
        }
    }

    /// Admit a batch, treating earlier accepted members as in flight for later ones.
    pub fn admit_batch(
        candidates: Vec<InvoiceCandidate>,
        existing: &[&InvoiceRecord],
    ) -> BatchAdmission {
        let mut out = BatchAdmission::default();
        for (idx, candidate) in candidates.into_iter().enumerate() {
            match Self::admit(candidate, existing, &out.accepted) {
                Ok(Admission::Accepted(record)) => out.accepted.push(*record),
                Ok(Admission::RejectedDuplicate(dup)) => out.duplicates.push(dup),
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "malformed invoice candidate");
                    out.malformed.push((idx, e));
                }
            }
        }
        out
    }
}

fn duplicate(key: DedupKey, against: DuplicateOf) -> Admission {
    Admission::RejectedDuplicate(DuplicateInvoice { key, against })
}

/// Broadest overlap: any of access key, number or identity string in common.
fn overlaps(candidate: &InvoiceRecord, other: &InvoiceRecord) -> bool {
    let same_key = match (candidate.access_key(), other.access_key()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    same_key
        || candidate.number() == other.number()
        || candidate.identity().as_str() == other.identity().as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    const KEY_123: &str = "35240812345678000195550010000001231876543210";
    const KEY_124: &str = "35240812345678000195550010000001241876543218";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 11, 12, 0, 0).unwrap()
    }

    fn upload(key: &str) -> InvoiceCandidate {
        InvoiceCandidate::new(IngestionChannel::DocumentUpload, "", at()).with_access_key(key)
    }

    fn accept(candidate: InvoiceCandidate, existing: &[&InvoiceRecord]) -> InvoiceRecord {
        match IdentityResolver::admit(candidate, existing, &[]).unwrap() {
            Admission::Accepted(r) => *r,
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn same_key_is_rejected_against_aggregate() {
        let first = accept(upload(KEY_123), &[]);
        let outcome = IdentityResolver::admit(upload(KEY_123), &[&first], &[]).unwrap();
        assert_eq!(
            outcome,
            Admission::RejectedDuplicate(DuplicateInvoice {
                key: DedupKey::AccessKey(KEY_123.into()),
                against: DuplicateOf::Aggregate,
            })
        );
    }

    #[test]
    fn batch_rejects_intra_batch_duplicates() {
        let batch = vec![upload(KEY_123), upload(KEY_124), upload(KEY_123)];
        let out = IdentityResolver::admit_batch(batch, &[]);
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(out.duplicates.len(), 1);
        assert_eq!(out.duplicates[0].against, DuplicateOf::InFlightBatch);
        assert!(out.malformed.is_empty());
    }

    #[test]
    fn malformed_key_is_distinct_from_duplicate() {
        let out = IdentityResolver::admit(upload("123"), &[], &[]);
        assert!(matches!(out, Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn try_admit_separates_duplicate_from_malformed() {
        let first = accept(upload(KEY_123), &[]);

        let dup = IdentityResolver::try_admit(upload(KEY_123), &[&first], &[]).unwrap_err();
        assert!(dup.is_duplicate());

        match IdentityResolver::try_admit(upload("3524"), &[&first], &[]).unwrap_err() {
            AdmissionRejection::Malformed(DomainError::InvalidId(_)) => {}
            other => panic!("expected malformed key, got {other:?}"),
        }
    }

    #[test]
    fn manual_entries_dedup_by_number() {
        let first = accept(InvoiceCandidate::new(IngestionChannel::ManualEntry, "77", at()), &[]);
        let later = at() + chrono::Duration::seconds(5);
        let outcome = IdentityResolver::admit(
            InvoiceCandidate::new(IngestionChannel::ManualEntry, "77", later),
            &[&first],
            &[],
        )
        .unwrap();
        assert!(matches!(outcome, Admission::RejectedDuplicate(_)));
    }

    #[test]
    fn keyed_upload_does_not_clash_with_manual_entry_of_same_number() {
        let manual = accept(InvoiceCandidate::new(IngestionChannel::ManualEntry, "123", at()), &[]);
        let outcome = IdentityResolver::admit(upload(KEY_123), &[&manual], &[]).unwrap();
        assert!(matches!(outcome, Admission::Accepted(_)));
    }

    #[test]
    fn search_import_uses_broadest_check() {
        let keyed = accept(upload(KEY_123), &[]);
        // Search result without key but with the same number.
        let result = InvoiceCandidate {
            synthetic_id: Some("123-1723380000000".into()),
            ..InvoiceCandidate::new(IngestionChannel::SearchImport, "123", at())
        };
        let outcome = IdentityResolver::admit(result, &[&keyed], &[]).unwrap();
        assert!(matches!(
            outcome,
            Admission::RejectedDuplicate(DuplicateInvoice { against: DuplicateOf::Aggregate, .. })
        ));
    }

    #[test]
    fn search_import_with_durable_id_is_tagged_persisted() {
        let result = InvoiceCandidate::new(IngestionChannel::SearchImport, "900", at())
            .with_durable_id(loadorder_core::DurableId::new("inv-900").unwrap());
        let record = accept(result, &[]);
        assert!(record.persistence().is_persisted());
    }

    proptest! {
        /// Admitting the same key any number of times leaves exactly one record.
        #[test]
        fn repeated_admission_keeps_one_record(repeats in 1usize..8) {
            let mut accepted: Vec<InvoiceRecord> = Vec::new();
            for _ in 0..repeats {
                let existing: Vec<&InvoiceRecord> = accepted.iter().collect();
                if let Admission::Accepted(r) =
                    IdentityResolver::admit(upload(KEY_123), &existing, &[]).unwrap()
                {
                    accepted.push(*r);
                }
            }
            prop_assert_eq!(accepted.len(), 1);
        }
    }
}
