//! Persistence gateways used by the commit path, ingestion and labels.
//!
//! Every call is a point-to-point request; nothing here is transactional.
//! Ordering across calls is the coordinator's job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use loadorder_core::{DurableId, TenantId};
use loadorder_invoicing::{AccessKey, InvoiceCandidate, InvoiceRecord};
use loadorder_labels::{DurableLabelRecord, LabelStatus};
use loadorder_volumes::VolumeDimensionSet;

#[cfg(feature = "http")]
pub mod http;
pub mod in_memory;
pub mod payload;

#[cfg(feature = "http")]
pub use http::HttpGateway;
pub use in_memory::{CallCounts, HeaderFault, InMemoryGateway};
pub use payload::{OrderPayload, StoredOrderRef};

/// Failure of a single gateway call.
///
/// `Transport` and `Server` leave the outcome of a write unknown: the store
/// may have applied it before the response was lost.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Whether the write may have landed despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Server { .. })
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

/// Filter for a remote invoice search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceQuery {
    pub number: Option<String>,
    pub access_key: Option<String>,
    pub sender_tax_id: Option<String>,
    pub recipient_tax_id: Option<String>,
}

impl InvoiceQuery {
    pub fn by_number(number: impl Into<String>) -> Self {
        Self {
            number: Some(number.into()),
            ..Self::default()
        }
    }
}

/// Invoice create.
#[async_trait::async_trait]
pub trait InvoiceGateway: Send + Sync {
    /// Store a new invoice and return the id the store assigned.
    async fn create_invoice(
        &self,
        tenant_id: TenantId,
        invoice: &InvoiceRecord,
    ) -> Result<DurableId, GatewayError>;
}

/// Volume-dimensions upsert. Repeated calls for one invoice replace its units.
#[async_trait::async_trait]
pub trait VolumeGateway: Send + Sync {
    async fn upsert_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: &DurableId,
        volumes: &VolumeDimensionSet,
    ) -> Result<(), GatewayError>;
}

/// Order header create/update and read-back.
#[async_trait::async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(
        &self,
        tenant_id: TenantId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError>;

    async fn update_order(
        &self,
        tenant_id: TenantId,
        order_id: &DurableId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError>;

    /// Look an order up by its human-readable number.
    async fn find_order_by_number(
        &self,
        tenant_id: TenantId,
        order_number: &str,
    ) -> Result<Option<StoredOrderRef>, GatewayError>;
}

/// Durable label codes and their print status.
#[async_trait::async_trait]
pub trait LabelStatusGateway: Send + Sync {
    async fn label_records(
        &self,
        tenant_id: TenantId,
        invoice_number: &str,
    ) -> Result<Vec<DurableLabelRecord>, GatewayError>;

    async fn set_label_status(
        &self,
        tenant_id: TenantId,
        code: &str,
        status: LabelStatus,
    ) -> Result<(), GatewayError>;
}

/// Remote invoice lookup used by the key-fetch and search-import channels.
#[async_trait::async_trait]
pub trait InvoiceSource: Send + Sync {
    async fn fetch_by_key(
        &self,
        tenant_id: TenantId,
        key: &AccessKey,
    ) -> Result<InvoiceCandidate, GatewayError>;

    async fn search(
        &self,
        tenant_id: TenantId,
        query: &InvoiceQuery,
    ) -> Result<Vec<InvoiceCandidate>, GatewayError>;
}

#[async_trait::async_trait]
impl<G> InvoiceGateway for Arc<G>
where
    G: InvoiceGateway + ?Sized,
{
    async fn create_invoice(
        &self,
        tenant_id: TenantId,
        invoice: &InvoiceRecord,
    ) -> Result<DurableId, GatewayError> {
        (**self).create_invoice(tenant_id, invoice).await
    }
}

#[async_trait::async_trait]
impl<G> VolumeGateway for Arc<G>
where
    G: VolumeGateway + ?Sized,
{
    async fn upsert_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: &DurableId,
        volumes: &VolumeDimensionSet,
    ) -> Result<(), GatewayError> {
        (**self).upsert_volumes(tenant_id, invoice_id, volumes).await
    }
}

#[async_trait::async_trait]
impl<G> OrderGateway for Arc<G>
where
    G: OrderGateway + ?Sized,
{
    async fn create_order(
        &self,
        tenant_id: TenantId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        (**self).create_order(tenant_id, order).await
    }

    async fn update_order(
        &self,
        tenant_id: TenantId,
        order_id: &DurableId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        (**self).update_order(tenant_id, order_id, order).await
    }

    async fn find_order_by_number(
        &self,
        tenant_id: TenantId,
        order_number: &str,
    ) -> Result<Option<StoredOrderRef>, GatewayError> {
        (**self).find_order_by_number(tenant_id, order_number).await
    }
}

#[async_trait::async_trait]
impl<G> LabelStatusGateway for Arc<G>
where
    G: LabelStatusGateway + ?Sized,
{
    async fn label_records(
        &self,
        tenant_id: TenantId,
        invoice_number: &str,
    ) -> Result<Vec<DurableLabelRecord>, GatewayError> {
        (**self).label_records(tenant_id, invoice_number).await
    }

    async fn set_label_status(
        &self,
        tenant_id: TenantId,
        code: &str,
        status: LabelStatus,
    ) -> Result<(), GatewayError> {
        (**self).set_label_status(tenant_id, code, status).await
    }
}

#[async_trait::async_trait]
impl<G> InvoiceSource for Arc<G>
where
    G: InvoiceSource + ?Sized,
{
    async fn fetch_by_key(
        &self,
        tenant_id: TenantId,
        key: &AccessKey,
    ) -> Result<InvoiceCandidate, GatewayError> {
        (**self).fetch_by_key(tenant_id, key).await
    }

    async fn search(
        &self,
        tenant_id: TenantId,
        query: &InvoiceQuery,
    ) -> Result<Vec<InvoiceCandidate>, GatewayError> {
        (**self).search(tenant_id, query).await
    }
}
