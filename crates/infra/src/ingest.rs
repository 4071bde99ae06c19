//! Ingestion channels.
//!
//! Fetching and parsing happen outside the session lock; admission happens
//! under it, one check-then-insert step per channel call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use loadorder_core::{DomainError, LocalId};
use loadorder_invoicing::{
    AccessKey, AdmissionRejection, BatchAdmission, DuplicateInvoice, IngestionChannel,
    InvoiceCandidate, OperationMetadata,
};
use loadorder_parties::{PartyRecord, TaxId};

use crate::external::{DocumentParser, PartyLookupError, PartyResolver};
use crate::gateway::{GatewayError, InvoiceSource};
use crate::handle::OrderHandle;

pub use crate::gateway::InvoiceQuery;

/// An input that could not become an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Malformed {
    /// Position of the input in the call (document index, result index).
    pub position: usize,
    pub reason: String,
}

/// What one channel call did to the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub accepted: Vec<LocalId>,
    pub duplicates: Vec<DuplicateInvoice>,
    pub malformed: Vec<Malformed>,
}

impl IngestReport {
    fn malformed(position: usize, reason: impl ToString) -> Self {
        Self {
            malformed: vec![Malformed {
                position,
                reason: reason.to_string(),
            }],
            ..Self::default()
        }
    }

    fn from_single(result: Result<LocalId, AdmissionRejection>) -> Self {
        match result {
            Ok(id) => Self {
                accepted: vec![id],
                ..Self::default()
            },
            Err(AdmissionRejection::Duplicate(dup)) => Self {
                duplicates: vec![dup],
                ..Self::default()
            },
            Err(AdmissionRejection::Malformed(e)) => Self::malformed(0, e),
        }
    }

    /// `positions[i]` is the caller-facing position of batch entry `i`.
    fn from_batch(batch: BatchAdmission, positions: &[usize]) -> Self {
        Self {
            accepted: batch.accepted.iter().map(|r| r.local_id()).collect(),
            duplicates: batch.duplicates,
            malformed: batch
                .malformed
                .into_iter()
                .map(|(i, e)| Malformed {
                    position: positions.get(i).copied().unwrap_or(i),
                    reason: e.to_string(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.duplicates.is_empty() && self.malformed.is_empty()
    }

    fn log(&self, channel: IngestionChannel) {
        tracing::info!(
            ?channel,
            accepted = self.accepted.len(),
            duplicates = self.duplicates.len(),
            malformed = self.malformed.len(),
            "ingestion finished"
        );
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invoice source unavailable: {0}")]
    Source(#[from] GatewayError),
}

/// Invoice typed in by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualInvoice {
    pub number: String,
    pub series: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub sender_tax_id: Option<String>,
    pub sender_name: String,
    pub recipient_tax_id: Option<String>,
    pub recipient_name: String,
    pub declared_weight: f64,
    pub declared_value: f64,
    pub declared_volumes: u32,
    pub operation: OperationMetadata,
}

impl ManualInvoice {
    fn party(tax_id: Option<&str>, name: &str) -> Result<PartyRecord, DomainError> {
        let mut party = PartyRecord::named(name.trim());
        if let Some(raw) = tax_id.map(str::trim).filter(|t| !t.is_empty()) {
            party = party.with_tax_id(TaxId::parse(raw)?);
        }
        Ok(party)
    }

    /// Candidate with a synthetic identity derived from `created_at`.
    pub fn into_candidate(self, created_at: DateTime<Utc>) -> Result<InvoiceCandidate, DomainError> {
        let sender = Self::party(self.sender_tax_id.as_deref(), &self.sender_name)?;
        let recipient = Self::party(self.recipient_tax_id.as_deref(), &self.recipient_name)?;
        Ok(InvoiceCandidate {
            series: self.series,
            issued_at: self.issued_at,
            sender,
            recipient,
            declared_weight: self.declared_weight,
            declared_value: self.declared_value,
            declared_volumes: self.declared_volumes,
            operation: self.operation,
            ..InvoiceCandidate::new(IngestionChannel::ManualEntry, self.number, created_at)
        })
    }
}

/// Parse uploaded documents and admit them as one batch.
///
/// Documents that fail to parse are reported by index; the rest are still
/// admitted. Two uploads of the same document in one call yield one invoice.
pub async fn upload_documents<P>(
    handle: &OrderHandle,
    parser: &P,
    documents: &[Vec<u8>],
) -> IngestReport
where
    P: DocumentParser + ?Sized,
{
    let mut parse_failures = Vec::new();
    let mut positions = Vec::new();
    let mut candidates = Vec::new();
    for (index, raw) in documents.iter().enumerate() {
        match parser.parse(raw) {
            Ok(mut candidate) => {
                candidate.channel = IngestionChannel::DocumentUpload;
                positions.push(index);
                candidates.push(candidate);
            }
            Err(e) => {
                tracing::warn!(document = index, error = %e, "document could not be parsed");
                parse_failures.push(Malformed {
                    position: index,
                    reason: e.to_string(),
                });
            }
        }
    }

    let batch = handle.with_session(|s| s.admit_batch(candidates)).await;
    let mut report = IngestReport::from_batch(batch, &positions);
    report.malformed.extend(parse_failures);
    report.malformed.sort_by_key(|m| m.position);
    report.log(IngestionChannel::DocumentUpload);
    report
}

/// Fetch one invoice by access key and admit it.
pub async fn fetch_by_key<S>(
    handle: &OrderHandle,
    source: &S,
    raw_key: &str,
) -> Result<IngestReport, IngestError>
where
    S: InvoiceSource + ?Sized,
{
    let key = match AccessKey::parse(raw_key) {
        Ok(key) => key,
        Err(e) => return Ok(IngestReport::malformed(0, e)),
    };
    let tenant_id = handle.with_session(|s| s.tenant_id()).await;
    let mut candidate = source.fetch_by_key(tenant_id, &key).await?;
    candidate.channel = IngestionChannel::KeyFetch;
    if candidate.access_key.is_none() {
        candidate.access_key = Some(key.as_str().to_string());
    }

    let report = IngestReport::from_single(handle.with_session(|s| s.try_admit(candidate)).await);
    report.log(IngestionChannel::KeyFetch);
    Ok(report)
}

/// Admit a hand-typed invoice.
///
/// Parties given only by tax id are completed through `resolver`; a failed
/// lookup keeps the tax id and leaves the name blank.
pub async fn manual_entry(
    handle: &OrderHandle,
    resolver: Option<&dyn PartyResolver>,
    form: ManualInvoice,
) -> IngestReport {
    let mut candidate = match form.into_candidate(Utc::now()) {
        Ok(candidate) => candidate,
        Err(e) => return IngestReport::malformed(0, e),
    };
    if let Some(resolver) = resolver {
        complete_party(resolver, &mut candidate.sender).await;
        complete_party(resolver, &mut candidate.recipient).await;
    }

    let report = IngestReport::from_single(handle.with_session(|s| s.try_admit(candidate)).await);
    report.log(IngestionChannel::ManualEntry);
    report
}

async fn complete_party(resolver: &dyn PartyResolver, party: &mut PartyRecord) {
    if party.has_name() {
        return;
    }
    let Some(tax_id) = party.tax_id.clone() else {
        return;
    };
    match resolver.resolve(&tax_id).await {
        Ok(mut found) => {
            found.tax_id = Some(tax_id);
            *party = found;
        }
        Err(PartyLookupError::NotFound(_)) => {
            tracing::info!(tax_id = tax_id.as_str(), "party not registered");
        }
        Err(e) => {
            tracing::warn!(tax_id = tax_id.as_str(), error = %e, "party lookup failed");
        }
    }
}

/// Search the remote store and admit every result.
///
/// Results are checked against access key, number and identity at once,
/// since they may come back without a key.
pub async fn search_import<S>(
    handle: &OrderHandle,
    source: &S,
    query: &InvoiceQuery,
) -> Result<IngestReport, IngestError>
where
    S: InvoiceSource + ?Sized,
{
    let tenant_id = handle.with_session(|s| s.tenant_id()).await;
    let results: Vec<InvoiceCandidate> = source
        .search(tenant_id, query)
        .await?
        .into_iter()
        .map(|mut c| {
            c.channel = IngestionChannel::SearchImport;
            c
        })
        .collect();
    let positions: Vec<usize> = (0..results.len()).collect();

    let batch = handle.with_session(|s| s.admit_batch(results)).await;
    let report = IngestReport::from_batch(batch, &positions);
    report.log(IngestionChannel::SearchImport);
    Ok(report)
}
