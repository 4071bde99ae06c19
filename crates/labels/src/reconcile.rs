//! Reconciliation of generated label identities against stored labels.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::code::LabelCode;
use crate::generator::{Clock, LabelIdGenerator};

/// Label lifecycle. Ordered by progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelStatus {
    #[default]
    Pending,
    Generated,
    Printed,
}

/// A label record as returned by the label store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableLabelRecord {
    pub code: String,
    pub status: LabelStatus,
}

/// One printable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelIdentity {
    pub invoice_number: String,
    pub sequence: u32,
    /// Identity shown on the label; generated until a stored code exists.
    pub display_id: String,
    /// Code of the stored record this label matched, if any.
    pub durable_code: Option<String>,
    pub status: LabelStatus,
}

impl LabelIdentity {
    /// Code to write status updates against.
    pub fn storage_code(&self) -> &str {
        self.durable_code.as_deref().unwrap_or(&self.display_id)
    }
}

/// Labels of one invoice, in sequence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSheet {
    invoice_number: String,
    generated_at: DateTime<Utc>,
    labels: Vec<LabelIdentity>,
}

impl LabelSheet {
    /// Generate `count` pending labels sharing one timestamp.
    pub fn generate(
        invoice_number: &str,
        count: u32,
        generator: &LabelIdGenerator,
        clock: &dyn Clock,
    ) -> Self {
        let generated_at = clock.now();
        let labels = (1..=count)
            .map(|sequence| LabelIdentity {
                invoice_number: invoice_number.to_string(),
                sequence,
                display_id: generator.generate_at(invoice_number, sequence, generated_at),
                durable_code: None,
                status: LabelStatus::Pending,
            })
            .collect();
        Self {
            invoice_number: invoice_number.to_string(),
            generated_at,
            labels,
        }
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn labels(&self) -> &[LabelIdentity] {
        &self.labels
    }

    pub fn into_labels(self) -> Vec<LabelIdentity> {
        self.labels
    }

    /// Status per display id after matching `records` by sequence.
    ///
    /// Labels without a matching stored record are `Pending`. When several
    /// stored records share a sequence (one per format), the most advanced
    /// status wins. Pure: the same inputs give the same map.
    pub fn reconcile(&self, records: &[DurableLabelRecord]) -> BTreeMap<String, LabelStatus> {
        let matched = self.match_records(records);
        self.labels
            .iter()
            .map(|l| {
                let status = matched
                    .get(&l.sequence)
                    .map(|r| r.status)
                    .unwrap_or(LabelStatus::Pending);
                (l.display_id.clone(), status)
            })
            .collect()
    }

    /// Overwrite each label's status and durable code from `records`.
    pub fn apply(&mut self, records: &[DurableLabelRecord]) {
        let matched = self.match_records(records);
        for label in &mut self.labels {
            match matched.get(&label.sequence) {
                Some(record) => {
                    label.status = record.status;
                    label.durable_code = Some(record.code.clone());
                }
                None => {
                    label.status = LabelStatus::Pending;
                    label.durable_code = None;
                }
            }
        }
    }

    fn match_records<'a>(
        &self,
        records: &'a [DurableLabelRecord],
    ) -> HashMap<u32, &'a DurableLabelRecord> {
        let mut by_sequence: HashMap<u32, &DurableLabelRecord> = HashMap::new();
        for record in records {
            let Some(code) = LabelCode::parse(&record.code, &self.invoice_number) else {
                tracing::debug!(code = %record.code, invoice = %self.invoice_number, "ignoring unrecognised label code");
                continue;
            };
            by_sequence
                .entry(code.sequence)
                .and_modify(|current| {
                    let better = (record.status, std::cmp::Reverse(&record.code))
                        > (current.status, std::cmp::Reverse(&current.code));
                    if better {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        by_sequence
    }
}
