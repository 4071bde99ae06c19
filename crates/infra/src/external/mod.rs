//! Collaborators the core calls as black boxes: document parsing, party
//! lookup and printable rendering.

use std::sync::Arc;

use thiserror::Error;

use loadorder_invoicing::InvoiceCandidate;
use loadorder_labels::LabelIdentity;
use loadorder_order::OrderSession;
use loadorder_parties::{PartyRecord, TaxId};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported document: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PartyLookupError {
    #[error("no party registered under {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
#[error("rendering failed: {0}")]
pub struct RenderError(#[from] pub anyhow::Error);

/// Turns an uploaded fiscal document into an invoice candidate.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<InvoiceCandidate, ParseError>;
}

/// Looks up a party's registration by tax id.
#[async_trait::async_trait]
pub trait PartyResolver: Send + Sync {
    async fn resolve(&self, tax_id: &TaxId) -> Result<PartyRecord, PartyLookupError>;
}

/// Produces printable output for an order and its labels.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, order: &OrderSession, labels: &[LabelIdentity]) -> Result<Vec<u8>, RenderError>;
}

impl<P> DocumentParser for Arc<P>
where
    P: DocumentParser + ?Sized,
{
    fn parse(&self, raw: &[u8]) -> Result<InvoiceCandidate, ParseError> {
        (**self).parse(raw)
    }
}

#[async_trait::async_trait]
impl<P> PartyResolver for Arc<P>
where
    P: PartyResolver + ?Sized,
{
    async fn resolve(&self, tax_id: &TaxId) -> Result<PartyRecord, PartyLookupError> {
        (**self).resolve(tax_id).await
    }
}

impl<R> DocumentRenderer for Arc<R>
where
    R: DocumentRenderer + ?Sized,
{
    fn render(&self, order: &OrderSession, labels: &[LabelIdentity]) -> Result<Vec<u8>, RenderError> {
        (**self).render(order, labels)
    }
}
