use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loadorder_core::{DomainError, DurableId, Entity, LocalId};
use loadorder_parties::PartyRecord;

use crate::access_key::AccessKey;

/// Channel an invoice entered the order through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionChannel {
    /// Fiscal document (XML) uploaded and parsed.
    DocumentUpload,
    /// Fetched from a remote service by access key.
    KeyFetch,
    /// Typed in by hand.
    ManualEntry,
    /// Picked from a search over already stored invoices.
    SearchImport,
}

/// Identity of an invoice inside an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InvoiceIdentity {
    AccessKey(AccessKey),
    /// `"{number}-{created_at millis}"` for entries without a key.
    Synthetic(String),
}

impl InvoiceIdentity {
    pub fn synthetic(number: &str, created_at: DateTime<Utc>) -> Self {
        Self::Synthetic(format!("{number}-{}", created_at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            InvoiceIdentity::AccessKey(k) => k.as_str(),
            InvoiceIdentity::Synthetic(s) => s,
        }
    }

    pub fn access_key(&self) -> Option<&AccessKey> {
        match self {
            InvoiceIdentity::AccessKey(k) => Some(k),
            InvoiceIdentity::Synthetic(_) => None,
        }
    }
}

/// Whether the persistence layer already holds this invoice.
///
/// Set explicitly when the record is created or loaded; never inferred from
/// the shape of any identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum InvoiceRef {
    New,
    Persisted(DurableId),
}

impl InvoiceRef {
    pub fn durable_id(&self) -> Option<&DurableId> {
        match self {
            InvoiceRef::New => None,
            InvoiceRef::Persisted(id) => Some(id),
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, InvoiceRef::Persisted(_))
    }
}

/// Key used to detect duplicates: access key when present, else the number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DedupKey {
    AccessKey(String),
    Number(String),
}

impl core::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DedupKey::AccessKey(k) => write!(f, "access key {k}"),
            DedupKey::Number(n) => write!(f, "invoice number {n}"),
        }
    }
}

/// Fiscal operation details carried along for the header and labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Nature of the operation as printed on the document.
    pub nature: String,
    /// Fiscal operation code.
    pub cfop: Option<String>,
    /// `true` for an outbound document.
    pub outbound: bool,
}

/// An invoice as produced by an ingestion channel, before admission.
///
/// Raw fields: nothing here has been validated yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceCandidate {
    pub channel: IngestionChannel,
    pub access_key: Option<String>,
    /// Identity reported by the store for search results without a key.
    pub synthetic_id: Option<String>,
    /// Durable id, when the candidate came back from the persistence layer.
    pub durable_id: Option<DurableId>,
    pub number: String,
    pub series: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sender: PartyRecord,
    pub recipient: PartyRecord,
    /// Declared gross weight in kilograms.
    pub declared_weight: f64,
    /// Declared value in currency units.
    pub declared_value: f64,
    pub declared_volumes: u32,
    pub operation: OperationMetadata,
    pub source_payload: Option<String>,
}

impl InvoiceCandidate {
    /// Minimal candidate; the remaining fields can be filled with struct update.
    pub fn new(channel: IngestionChannel, number: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            channel,
            access_key: None,
            synthetic_id: None,
            durable_id: None,
            number: number.into(),
            series: String::new(),
            issued_at: None,
            created_at,
            sender: PartyRecord::default(),
            recipient: PartyRecord::default(),
            declared_weight: 0.0,
            declared_value: 0.0,
            declared_volumes: 0,
            operation: OperationMetadata::default(),
            source_payload: None,
        }
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    pub fn with_durable_id(mut self, id: DurableId) -> Self {
        self.durable_id = Some(id);
        self
    }

    /// Validate the raw fields and resolve the candidate's identity.
    pub(crate) fn validate(&self) -> Result<(InvoiceIdentity, String), DomainError> {
        let mut number = self.number.trim().to_string();

        let identity = match self.access_key.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let key = AccessKey::parse(raw)?;
                if number.is_empty() {
                    number = key.number().to_string();
                }
                InvoiceIdentity::AccessKey(key)
            }
            _ => match self.synthetic_id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => InvoiceIdentity::Synthetic(id.to_string()),
                _ => InvoiceIdentity::synthetic(&number, self.created_at),
            },
        };

        if number.is_empty() {
            return Err(DomainError::validation("invoice number is required"));
        }
        if !self.declared_weight.is_finite() || self.declared_weight < 0.0 {
            return Err(DomainError::validation(format!(
                "invoice {number}: declared weight must be a non-negative number"
            )));
        }
        if !self.declared_value.is_finite() || self.declared_value < 0.0 {
            return Err(DomainError::validation(format!(
                "invoice {number}: declared value must be a non-negative number"
            )));
        }

        Ok((identity, number))
    }

    /// Key this candidate would be deduplicated by, if it is well formed.
    pub fn dedup_key(&self) -> Result<DedupKey, DomainError> {
        let (identity, number) = self.validate()?;
        Ok(match identity {
            InvoiceIdentity::AccessKey(k) => DedupKey::AccessKey(k.into()),
            InvoiceIdentity::Synthetic(_) => DedupKey::Number(number),
        })
    }
}

/// One fiscal document admitted into a loading order.
///
/// After admission only the party snapshots may change, and the persistence
/// tag moves from `New` to `Persisted` once the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    local_id: LocalId,
    identity: InvoiceIdentity,
    persistence: InvoiceRef,
    channel: IngestionChannel,
    number: String,
    series: String,
    issued_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    sender: PartyRecord,
    recipient: PartyRecord,
    declared_weight: f64,
    declared_value: f64,
    declared_volumes: u32,
    operation: OperationMetadata,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    source_payload: Option<String>,
}

impl InvoiceRecord {
    /// Build a record from a validated candidate.
    pub(crate) fn from_candidate(
        candidate: InvoiceCandidate,
        identity: InvoiceIdentity,
        number: String,
    ) -> Self {
        let persistence = match candidate.durable_id {
            Some(id) => InvoiceRef::Persisted(id),
            None => InvoiceRef::New,
        };
        Self {
            local_id: LocalId::new(),
            identity,
            persistence,
            channel: candidate.channel,
            number,
            series: candidate.series.trim().to_string(),
            issued_at: candidate.issued_at,
            created_at: candidate.created_at,
            sender: candidate.sender,
            recipient: candidate.recipient,
            declared_weight: candidate.declared_weight,
            declared_value: candidate.declared_value,
            declared_volumes: candidate.declared_volumes,
            operation: candidate.operation,
            source_payload: candidate.source_payload,
        }
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn identity(&self) -> &InvoiceIdentity {
        &self.identity
    }

    pub fn access_key(&self) -> Option<&AccessKey> {
        self.identity.access_key()
    }

    pub fn persistence(&self) -> &InvoiceRef {
        &self.persistence
    }

    pub fn durable_id(&self) -> Option<&DurableId> {
        self.persistence.durable_id()
    }

    pub fn channel(&self) -> IngestionChannel {
        self.channel
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sender(&self) -> &PartyRecord {
        &self.sender
    }

    pub fn recipient(&self) -> &PartyRecord {
        &self.recipient
    }

    pub fn declared_weight(&self) -> f64 {
        self.declared_weight
    }

    pub fn declared_value(&self) -> f64 {
        self.declared_value
    }

    pub fn declared_volumes(&self) -> u32 {
        self.declared_volumes
    }

    pub fn operation(&self) -> &OperationMetadata {
        &self.operation
    }

    pub fn source_payload(&self) -> Option<&str> {
        self.source_payload.as_deref()
    }

    pub fn dedup_key(&self) -> DedupKey {
        match &self.identity {
            InvoiceIdentity::AccessKey(k) => DedupKey::AccessKey(k.as_str().to_string()),
            InvoiceIdentity::Synthetic(_) => DedupKey::Number(self.number.clone()),
        }
    }

    /// Replace the party snapshots (the only in-place edit an invoice accepts).
    pub fn replace_parties(&mut self, sender: PartyRecord, recipient: PartyRecord) {
        self.sender = sender;
        self.recipient = recipient;
    }

    /// Tag the record with the id the store assigned to it.
    ///
    /// A record that is already persisted keeps its first id.
    pub fn mark_persisted(&mut self, id: DurableId) -> Result<(), DomainError> {
        match &self.persistence {
            InvoiceRef::New => {
                self.persistence = InvoiceRef::Persisted(id);
                Ok(())
            }
            InvoiceRef::Persisted(existing) if *existing == id => Ok(()),
            InvoiceRef::Persisted(existing) => Err(DomainError::conflict(format!(
                "invoice {} already persisted as {existing}, refusing {id}",
                self.number
            ))),
        }
    }

    /// Copy of this record without its raw source document.
    pub fn without_source_payload(&self) -> Self {
        Self {
            source_payload: None,
            ..self.clone()
        }
    }
}

impl Entity for InvoiceRecord {
    type Id = LocalId;

    fn id(&self) -> &Self::Id {
        &self.local_id
    }
}
