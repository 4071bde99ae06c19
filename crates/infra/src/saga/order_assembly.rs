//! Order assembly saga.
//!
//! Drives one commit attempt of a loading order:
//! 1. create every new invoice, in aggregate order, stopping at the first failure
//! 2. re-key the volume ledger from invoice numbers to durable ids
//! 3. upsert the volume set of every stored invoice whose dimensions changed
//! 4. create or update the order header with totals, invoices and ledger
//! 5. read the order back by number; a hit commits the attempt even when
//!    the header call reported an error
//!
//! Nothing is rolled back. Ids acquired before a failure stay on the session
//! so the next attempt does not create the same records twice.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use loadorder_core::{DomainError, DurableId, LocalId};
use loadorder_order::OrderSession;
use loadorder_volumes::RekeyReport;

use crate::config::CommitConfig;
use crate::gateway::{GatewayError, InvoiceGateway, OrderGateway, OrderPayload, VolumeGateway};
use crate::retry::retry_with_backoff;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    #[default]
    Idle,
    PersistingInvoices,
    PersistingVolumes,
    PersistingHeader,
    Verifying,
    Committed,
    Failed,
}

impl CommitStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommitStage::Committed | CommitStage::Failed)
    }

    /// Legal moves of one attempt. Any non-terminal stage may fail.
    pub fn can_transition_to(self, next: CommitStage) -> bool {
        use CommitStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, PersistingInvoices)
            | (PersistingInvoices, PersistingVolumes)
            | (PersistingVolumes, PersistingHeader)
            | (PersistingHeader, Verifying)
            | (Verifying, Committed) => true,
            _ => false,
        }
    }
}

/// Which kind of write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStage {
    Invoice,
    Volume,
    Header,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteStage::Invoice => "invoice",
            WriteStage::Volume => "volume",
            WriteStage::Header => "header",
        })
    }
}

/// What an attempt managed to store before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCommit {
    /// `(invoice number, durable id)` of invoices created by this attempt.
    pub created_invoices: Vec<(String, DurableId)>,
    /// Invoices whose volume set was stored by this attempt.
    pub volumes_persisted: Vec<DurableId>,
    pub order_id: Option<DurableId>,
    /// Numbers of invoices whose volumes still wait for their invoice.
    pub unpersisted: Vec<String>,
}

impl PartialCommit {
    /// Whether anything was stored before the failure.
    pub fn has_progress(&self) -> bool {
        !self.created_invoices.is_empty()
            || !self.volumes_persisted.is_empty()
            || self.order_id.is_some()
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("order is not ready to be saved: {0}")]
    Validation(DomainError),

    #[error("this order is already being saved")]
    AlreadyInFlight,

    #[error("saving {stage} failed{}: {source}", invoice_suffix(.invoice_number))]
    Persistence {
        stage: WriteStage,
        invoice_number: Option<String>,
        source: GatewayError,
        partial: PartialCommit,
    },

    #[error("the order could not be confirmed as saved: {source}")]
    VerificationMismatch {
        source: GatewayError,
        partial: PartialCommit,
    },

    #[error("order state is inconsistent: {0}")]
    Inconsistent(DomainError),
}

fn invoice_suffix(number: &Option<String>) -> String {
    match number {
        Some(n) => format!(" for invoice {n}"),
        None => String::new(),
    }
}

impl CommitError {
    /// Progress kept from the failed attempt, if any writes were issued.
    pub fn partial(&self) -> Option<&PartialCommit> {
        match self {
            CommitError::Persistence { partial, .. }
            | CommitError::VerificationMismatch { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<WriteStage> {
        match self {
            CommitError::Persistence { stage, .. } => Some(*stage),
            CommitError::VerificationMismatch { .. } => Some(WriteStage::Header),
            _ => None,
        }
    }
}

/// Result of a committed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub order_id: DurableId,
    pub created_invoices: Vec<(String, DurableId)>,
    pub volume_calls: u32,
    /// The header call reported an error but the read-back found the order.
    pub recovered_by_verification: bool,
    pub rekey: RekeyReport,
}

/// Bookkeeping of one attempt.
struct Attempt<'a> {
    order_number: &'a str,
    stage: CommitStage,
    partial: PartialCommit,
}

impl<'a> Attempt<'a> {
    fn new(order_number: &'a str) -> Self {
        Self {
            order_number,
            stage: CommitStage::Idle,
            partial: PartialCommit::default(),
        }
    }

    fn enter(&mut self, next: CommitStage) -> Result<(), CommitError> {
        if !self.stage.can_transition_to(next) {
            return Err(CommitError::Inconsistent(DomainError::invariant(format!(
                "commit cannot move from {:?} to {next:?}",
                self.stage
            ))));
        }
        tracing::debug!(order_number = self.order_number, from = ?self.stage, to = ?next, "commit stage");
        self.stage = next;
        Ok(())
    }

    fn persistence_failure(
        &mut self,
        stage: WriteStage,
        invoice_number: Option<String>,
        source: GatewayError,
    ) -> CommitError {
        self.stage = CommitStage::Failed;
        tracing::error!(
            order_number = self.order_number,
            %stage,
            invoice_number = invoice_number.as_deref().unwrap_or(""),
            error = %source,
            partial = self.partial.has_progress(),
            "order commit failed"
        );
        CommitError::Persistence {
            stage,
            invoice_number,
            source,
            partial: std::mem::take(&mut self.partial),
        }
    }
}

/// Runs commit attempts against a store.
pub struct OrderAssemblyCoordinator<G> {
    gateway: G,
    config: CommitConfig,
}

impl<G> OrderAssemblyCoordinator<G>
where
    G: InvoiceGateway + VolumeGateway + OrderGateway,
{
    pub fn new(gateway: G) -> Self {
        Self::with_config(gateway, CommitConfig::default())
    }

    pub fn with_config(gateway: G, config: CommitConfig) -> Self {
        Self { gateway, config }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &CommitConfig {
        &self.config
    }

    /// Run one attempt to `Committed` or `Failed`.
    ///
    /// On success the session's current state becomes its clean baseline.
    /// On a write failure the session stays dirty and keeps every id it
    /// acquired. Validation failures touch neither the store nor the session.
    pub async fn commit(&self, session: &mut OrderSession) -> Result<CommitOutcome, CommitError> {
        let result = self.run(session).await;
        match &result {
            Ok(outcome) => {
                session.mark_committed();
                tracing::info!(
                    order_number = %session.header().order_number,
                    order_id = %outcome.order_id,
                    created = outcome.created_invoices.len(),
                    volume_calls = outcome.volume_calls,
                    recovered = outcome.recovered_by_verification,
                    "order committed"
                );
            }
            Err(CommitError::Validation(_)) | Err(CommitError::AlreadyInFlight) => {}
            Err(_) => session.mark_commit_failed(),
        }
        result
    }

    async fn run(&self, session: &mut OrderSession) -> Result<CommitOutcome, CommitError> {
        session.validate_for_commit().map_err(CommitError::Validation)?;

        let tenant_id = session.tenant_id();
        let order_number = session.header().order_number.clone();
        let mut attempt = Attempt::new(&order_number);

        // Invoices, one at a time, in aggregate order.
        attempt.enter(CommitStage::PersistingInvoices)?;
        let new_invoices: Vec<_> = session.new_invoices().into_iter().cloned().collect();
        let mut mapping: HashMap<LocalId, DurableId> = HashMap::new();
        let mut invoice_failure = None;
        for invoice in new_invoices {
            match self.gateway.create_invoice(tenant_id, &invoice).await {
                Ok(id) => {
                    session
                        .record_invoice_persisted(invoice.local_id(), id.clone())
                        .map_err(CommitError::Inconsistent)?;
                    mapping.insert(invoice.local_id(), id.clone());
                    attempt
                        .partial
                        .created_invoices
                        .push((invoice.number().to_string(), id));
                }
                Err(e) => {
                    invoice_failure = Some((invoice.number().to_string(), e));
                    break;
                }
            }
        }

        // Re-key even after a failure so created invoices keep their volumes.
        let rekey = session.rekey_ledger(&mapping);
        attempt.partial.unpersisted = session
            .ledger()
            .unpersisted_numbers()
            .into_iter()
            .map(str::to_string)
            .collect();
        if let Some((number, source)) = invoice_failure {
            return Err(attempt.persistence_failure(WriteStage::Invoice, Some(number), source));
        }

        attempt.enter(CommitStage::PersistingVolumes)?;
        let mut volume_calls = 0;
        for pending in session.volumes_to_persist() {
            volume_calls += 1;
            let result = self
                .gateway
                .upsert_volumes(tenant_id, &pending.invoice_id, &pending.set)
                .await;
            match result {
                Ok(()) => {
                    session.mark_volumes_persisted(&pending.invoice_id);
                    attempt.partial.volumes_persisted.push(pending.invoice_id);
                }
                Err(source) => {
                    return Err(attempt.persistence_failure(
                        WriteStage::Volume,
                        Some(pending.invoice_number),
                        source,
                    ));
                }
            }
        }

        attempt.enter(CommitStage::PersistingHeader)?;
        let payload = OrderPayload::from_session(session);
        let header_result = match session.durable_id().cloned() {
            Some(id) => self.gateway.update_order(tenant_id, &id, &payload).await,
            None => self.gateway.create_order(tenant_id, &payload).await,
        };
        let header_error = match header_result {
            Ok(id) => {
                session.record_order_persisted(id.clone());
                attempt.partial.order_id = Some(id);
                None
            }
            Err(e) => {
                tracing::warn!(
                    order_number = %order_number,
                    error = %e,
                    ambiguous = e.is_ambiguous(),
                    "order header call failed; verifying"
                );
                Some(e)
            }
        };

        attempt.enter(CommitStage::Verifying)?;
        let lookup = retry_with_backoff(
            &self.config.verify_retry,
            "order read-back",
            || self.gateway.find_order_by_number(tenant_id, &order_number),
            |r| !matches!(r, Ok(Some(_))),
        )
        .await;

        let (order_id, recovered) = match (lookup, header_error) {
            (Ok(Some(found)), header_error) => {
                let recovered = header_error.is_some();
                if recovered {
                    tracing::info!(
                        order_number = %order_number,
                        order_id = %found.id,
                        "order found on read-back despite header error"
                    );
                }
                session.record_order_persisted(found.id.clone());
                (found.id, recovered)
            }
            (lookup, Some(source)) => {
                if let Err(lookup_error) = &lookup {
                    tracing::warn!(order_number = %order_number, error = %lookup_error, "order read-back failed");
                }
                attempt.stage = CommitStage::Failed;
                tracing::error!(order_number = %order_number, error = %source, "order header not confirmed");
                return Err(CommitError::VerificationMismatch {
                    source,
                    partial: attempt.partial,
                });
            }
            (lookup, None) => {
                let id = attempt.partial.order_id.clone().ok_or_else(|| {
                    CommitError::Inconsistent(DomainError::invariant(
                        "header call succeeded without an order id",
                    ))
                })?;
                match lookup {
                    Err(e) => tracing::warn!(order_number = %order_number, error = %e, "order read-back failed; trusting header response"),
                    _ => tracing::warn!(order_number = %order_number, order_id = %id, "order not visible on read-back; trusting header response"),
                }
                (id, false)
            }
        };

        attempt.enter(CommitStage::Committed)?;
        Ok(CommitOutcome {
            order_id,
            created_invoices: attempt.partial.created_invoices,
            volume_calls,
            recovered_by_verification: recovered,
            rekey,
        })
    }
}
