#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use loadorder_core::{DurableId, LocalId, TenantId};
use loadorder_infra::gateway::{InMemoryGateway, OrderGateway, OrderPayload};
use loadorder_infra::retry::RetryPolicy;
use loadorder_infra::CommitConfig;
use loadorder_invoicing::{IngestionChannel, InvoiceCandidate};
use loadorder_order::{OrderHeader, OrderSession};
use loadorder_parties::PartyRecord;
use loadorder_volumes::{Dimensions, VolumeDimensionSet};

pub const KEY_123: &str = "35240812345678000195550010000001231876543210";
pub const KEY_124: &str = "35240812345678000195550010000001241876543218";

pub fn test_created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 12, 2, 13, 45).unwrap()
}

pub fn test_config() -> CommitConfig {
    CommitConfig::default()
        .with_verify_retry(RetryPolicy::immediate(3))
        .with_dirty_grace(std::time::Duration::ZERO)
}

pub fn test_header(number: &str) -> OrderHeader {
    OrderHeader::new(number)
}

pub fn keyed_invoice(key: &str, number: &str) -> InvoiceCandidate {
    InvoiceCandidate {
        sender: PartyRecord::named("Acme Distribuidora"),
        recipient: PartyRecord::named("Loja Central"),
        declared_weight: 20.0,
        declared_value: 1000.0,
        declared_volumes: 2,
        source_payload: Some(format!("<nfe><nNF>{number}</nNF></nfe>")),
        ..InvoiceCandidate::new(IngestionChannel::DocumentUpload, number, test_created_at())
            .with_access_key(key)
    }
}

pub fn manual_invoice(number: &str) -> InvoiceCandidate {
    InvoiceCandidate {
        declared_weight: 10.0,
        declared_value: 250.0,
        declared_volumes: 1,
        ..InvoiceCandidate::new(IngestionChannel::ManualEntry, number, test_created_at())
    }
}

pub fn boxes(n: usize) -> Vec<Dimensions> {
    vec![Dimensions::new(1.0, 1.0, 1.0); n]
}

pub fn local_id_of(session: &OrderSession, number: &str) -> LocalId {
    session
        .invoices()
        .find(|r| r.number() == number)
        .map(|r| r.local_id())
        .unwrap()
}

/// A stored order "OC-100" holding invoice 123 (key `KEY_123`) with two
/// stored volumes, loaded back into a clean session. Call counters are reset.
pub async fn stored_order(gateway: &InMemoryGateway, tenant: TenantId) -> (OrderSession, DurableId) {
    let invoice = keyed_invoice(KEY_123, "123");

    let mut scratch = OrderSession::new(tenant, test_header("OC-100"));
    scratch.admit(invoice.clone()).unwrap();
    let record = scratch.invoices().next().cloned().unwrap();
    let invoice_id = gateway.seed_invoice(tenant, record).unwrap();

    let set = VolumeDimensionSet::from_dimensions(&boxes(2), 20.0).unwrap();
    gateway.seed_volumes(tenant, invoice_id.clone(), set.clone()).unwrap();

    let order_id = gateway
        .create_order(tenant, &OrderPayload::from_session(&scratch))
        .await
        .unwrap();

    let session = OrderSession::load(
        tenant,
        order_id,
        test_header("OC-100"),
        vec![invoice.with_durable_id(invoice_id.clone())],
        vec![(invoice_id.clone(), set)],
        scratch.sender().clone(),
        scratch.recipient().clone(),
    )
    .unwrap();

    gateway.reset_counts().unwrap();
    (session, invoice_id)
}
