//! REST client for the persistence API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use loadorder_core::{DurableId, TenantId};
use loadorder_invoicing::{AccessKey, InvoiceCandidate, InvoiceRecord};
use loadorder_labels::{DurableLabelRecord, LabelStatus};
use loadorder_volumes::VolumeDimensionSet;

use super::{
    GatewayError, InvoiceGateway, InvoiceQuery, InvoiceSource, LabelStatusGateway, OrderGateway,
    OrderPayload, StoredOrderRef, VolumeGateway,
};

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: DurableId,
}

/// Gateway over HTTP. Every route is scoped by tenant.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, tenant_id: TenantId, path: &str) -> String {
        format!("{}/tenants/{tenant_id}/{path}", self.base_url)
    }
}

fn status_error(status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(body),
        s if s.is_server_error() => GatewayError::Server {
            status: s.as_u16(),
            message: body,
        },
        _ => GatewayError::Rejected(format!("{status}: {body}")),
    }
}

async fn send_raw(request: RequestBuilder) -> Result<reqwest::Response, GatewayError> {
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GatewayError> {
    let response = send_raw(request).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl InvoiceGateway for HttpGateway {
    async fn create_invoice(
        &self,
        tenant_id: TenantId,
        invoice: &InvoiceRecord,
    ) -> Result<DurableId, GatewayError> {
        let created: CreatedId =
            send(self.client.post(self.url(tenant_id, "invoices")).json(invoice)).await?;
        Ok(created.id)
    }
}

#[async_trait::async_trait]
impl VolumeGateway for HttpGateway {
    async fn upsert_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: &DurableId,
        volumes: &VolumeDimensionSet,
    ) -> Result<(), GatewayError> {
        let url = self.url(tenant_id, &format!("invoices/{invoice_id}/volumes"));
        send_raw(self.client.put(url).json(volumes.units())).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrderGateway for HttpGateway {
    async fn create_order(
        &self,
        tenant_id: TenantId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        let created: CreatedId =
            send(self.client.post(self.url(tenant_id, "orders")).json(order)).await?;
        Ok(created.id)
    }

    async fn update_order(
        &self,
        tenant_id: TenantId,
        order_id: &DurableId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        let url = self.url(tenant_id, &format!("orders/{order_id}"));
        let updated: CreatedId = send(self.client.put(url).json(order)).await?;
        Ok(updated.id)
    }

    async fn find_order_by_number(
        &self,
        tenant_id: TenantId,
        order_number: &str,
    ) -> Result<Option<StoredOrderRef>, GatewayError> {
        let request = self
            .client
            .get(self.url(tenant_id, "orders"))
            .query(&[("number", order_number)]);
        match send::<StoredOrderRef>(request).await {
            Ok(found) => Ok(Some(found)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl LabelStatusGateway for HttpGateway {
    async fn label_records(
        &self,
        tenant_id: TenantId,
        invoice_number: &str,
    ) -> Result<Vec<DurableLabelRecord>, GatewayError> {
        let request = self
            .client
            .get(self.url(tenant_id, "labels"))
            .query(&[("invoice_number", invoice_number)]);
        match send(request).await {
            Err(GatewayError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn set_label_status(
        &self,
        tenant_id: TenantId,
        code: &str,
        status: LabelStatus,
    ) -> Result<(), GatewayError> {
        let body = DurableLabelRecord {
            code: code.to_string(),
            status,
        };
        send_raw(self.client.put(self.url(tenant_id, "labels")).json(&body)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl InvoiceSource for HttpGateway {
    async fn fetch_by_key(
        &self,
        tenant_id: TenantId,
        key: &AccessKey,
    ) -> Result<InvoiceCandidate, GatewayError> {
        let url = self.url(tenant_id, &format!("invoice-source/{}", key.as_str()));
        send(self.client.get(url)).await
    }

    async fn search(
        &self,
        tenant_id: TenantId,
        query: &InvoiceQuery,
    ) -> Result<Vec<InvoiceCandidate>, GatewayError> {
        let url = self.url(tenant_id, "invoice-source/search");
        send(self.client.post(url).json(query)).await
    }
}
