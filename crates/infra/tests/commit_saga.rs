//! Commit attempts against the in-memory store, with injected faults.

mod common;

use std::sync::Arc;

use tokio::sync::Notify;

use loadorder_core::{DurableId, TenantId};
use loadorder_infra::gateway::{
    GatewayError, HeaderFault, InMemoryGateway, InvoiceGateway, OrderGateway, OrderPayload,
    StoredOrderRef, VolumeGateway,
};
use loadorder_infra::{CommitError, OrderAssemblyCoordinator, OrderHandle, WriteStage};
use loadorder_invoicing::InvoiceRecord;
use loadorder_order::OrderSession;
use loadorder_volumes::{Dimensions, LedgerKey, VolumeDimensionSet};

use common::*;

fn setup() -> (Arc<InMemoryGateway>, OrderAssemblyCoordinator<Arc<InMemoryGateway>>) {
    loadorder_observability::init_for_tests();
    let gateway = Arc::new(InMemoryGateway::new());
    let coordinator = OrderAssemblyCoordinator::with_config(gateway.clone(), test_config());
    (gateway, coordinator)
}

fn new_order(tenant: TenantId, numbers: &[&str]) -> OrderSession {
    let mut session = OrderSession::new(tenant, test_header("OC-200"));
    for number in numbers {
        session.admit(manual_invoice(number)).unwrap();
        let id = local_id_of(&session, number);
        session.set_volumes(id, &boxes(2)).unwrap();
    }
    session
}

#[tokio::test]
async fn stored_and_new_invoice_commit_with_minimal_calls() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let (mut session, invoice_a) = stored_order(&gateway, tenant).await;
    assert!(!session.is_dirty());

    session.admit(keyed_invoice(KEY_124, "124")).unwrap();
    let b = local_id_of(&session, "124");
    session.set_volumes(b, &boxes(2)).unwrap();
    let a = local_id_of(&session, "123");
    session
        .set_volumes(a, &[Dimensions::new(2.0, 1.5, 0.8), Dimensions::new(1.0, 1.0, 1.0)])
        .unwrap();
    assert!(session.is_dirty());

    let outcome = coordinator.commit(&mut session).await.unwrap();

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.invoice_creates, 1);
    assert_eq!(counts.volume_upserts, 2);
    assert_eq!(counts.header_calls(), 1);
    assert_eq!(counts.order_updates, 1);
    assert!(!session.is_dirty());

    assert_eq!(outcome.created_invoices.len(), 1);
    assert_eq!(outcome.created_invoices[0].0, "124");
    assert!(!outcome.recovered_by_verification);
    assert_eq!(Some(&outcome.order_id), session.durable_id());

    let invoice_b = outcome.created_invoices[0].1.clone();
    assert_eq!(outcome.rekey.moved, vec![("124".to_string(), invoice_b.clone())]);
    assert!(session.ledger().get(&LedgerKey::Durable(invoice_b.clone())).is_some());
    assert!(session.ledger().get(&LedgerKey::pending(b, "124")).is_none());

    let stored_a = gateway.stored_volumes(tenant, &invoice_a).unwrap().unwrap();
    assert_eq!(stored_a.total_cubic_m3(), 3.4);
    assert_eq!(gateway.stored_volumes(tenant, &invoice_b).unwrap().unwrap().len(), 2);

    let (_, payload) = gateway.stored_order(tenant, "OC-100").unwrap().unwrap();
    assert_eq!(payload.invoices.len(), 2);
    assert!(payload.invoices.iter().all(|i| i.source_payload().is_none()));
    assert_eq!(payload.totals.volume_count, 4);
    assert_eq!(payload.totals.weight, 40.0);
    assert_eq!(payload.totals.value, 2000.0);
}

#[tokio::test]
async fn unchanged_volumes_are_not_resent() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let (mut session, _) = stored_order(&gateway, tenant).await;

    session.admit(keyed_invoice(KEY_124, "124")).unwrap();
    let b = local_id_of(&session, "124");
    session.set_volumes(b, &boxes(2)).unwrap();
    let a = local_id_of(&session, "123");
    session.set_volumes(a, &boxes(2)).unwrap();

    coordinator.commit(&mut session).await.unwrap();

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.invoice_creates, 1);
    assert_eq!(counts.volume_upserts, 1);
    assert_eq!(counts.header_calls(), 1);
    assert!(!session.is_dirty());
}

#[tokio::test]
async fn dirty_again_only_after_a_real_change() {
    let (_gateway, coordinator) = setup();
    let mut session = new_order(TenantId::new(), &["500"]);
    coordinator.commit(&mut session).await.unwrap();
    assert!(!session.is_dirty());

    let id = local_id_of(&session, "500");
    session.set_volumes(id, &boxes(2)).unwrap();
    assert!(!session.is_dirty());

    session.update_header(|h| h.notes = "dock 4".to_string()).unwrap();
    assert!(session.is_dirty());
}

#[tokio::test]
async fn header_error_is_overridden_when_read_back_finds_the_order() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let mut session = new_order(tenant, &["300"]);
    gateway.set_header_fault(Some(HeaderFault::FailAfterWrite)).unwrap();

    let outcome = coordinator.commit(&mut session).await.unwrap();

    assert!(outcome.recovered_by_verification);
    let (stored_id, _) = gateway.stored_order(tenant, "OC-200").unwrap().unwrap();
    assert_eq!(outcome.order_id, stored_id);
    assert_eq!(session.durable_id(), Some(&stored_id));
    assert!(!session.is_dirty());
    assert_eq!(gateway.counts().unwrap().order_creates, 1);
    assert_eq!(gateway.counts().unwrap().order_lookups, 1);
}

#[tokio::test]
async fn flaky_read_back_is_retried() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let mut session = new_order(tenant, &["300"]);
    gateway.set_header_fault(Some(HeaderFault::FailAfterWrite)).unwrap();
    gateway.fail_lookups(2).unwrap();

    let outcome = coordinator.commit(&mut session).await.unwrap();

    assert!(outcome.recovered_by_verification);
    assert_eq!(gateway.counts().unwrap().order_lookups, 3);
}

#[tokio::test]
async fn header_failure_without_read_back_is_a_mismatch_and_retry_does_not_recreate() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let mut session = new_order(tenant, &["300", "301"]);
    gateway.set_header_fault(Some(HeaderFault::FailBeforeWrite)).unwrap();

    let err = coordinator.commit(&mut session).await.unwrap_err();
    match &err {
        CommitError::VerificationMismatch { source, partial } => {
            assert!(matches!(source, GatewayError::Server { status: 503, .. }));
            assert_eq!(partial.created_invoices.len(), 2);
            assert_eq!(partial.volumes_persisted.len(), 2);
            assert!(partial.order_id.is_none());
        }
        other => panic!("expected verification mismatch, got {other:?}"),
    }
    assert_eq!(err.stage(), Some(WriteStage::Header));
    assert!(session.is_dirty());
    assert!(session.new_invoices().is_empty());
    assert!(session.durable_id().is_none());
    assert_eq!(gateway.counts().unwrap().order_lookups, 3);

    gateway.clear_faults().unwrap();
    gateway.reset_counts().unwrap();
    let outcome = coordinator.commit(&mut session).await.unwrap();

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.invoice_creates, 0);
    assert_eq!(counts.volume_upserts, 0);
    assert_eq!(counts.order_creates, 1);
    assert!(outcome.created_invoices.is_empty());
    assert_eq!(gateway.stored_invoice_count().unwrap(), 2);
    assert!(!session.is_dirty());
}

#[tokio::test]
async fn invoice_failure_keeps_created_ids_and_flags_unpersisted_volumes() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let mut session = new_order(tenant, &["200", "201", "202"]);
    gateway.fail_invoice("201").unwrap();

    let err = coordinator.commit(&mut session).await.unwrap_err();
    let partial = match &err {
        CommitError::Persistence {
            stage: WriteStage::Invoice,
            invoice_number: Some(number),
            partial,
            ..
        } if number == "201" => partial.clone(),
        other => panic!("expected invoice failure for 201, got {other:?}"),
    };
    assert!(err.to_string().contains("invoice 201"));
    assert_eq!(partial.created_invoices.len(), 1);
    assert_eq!(partial.created_invoices[0].0, "200");
    assert_eq!(partial.unpersisted, vec!["201".to_string(), "202".to_string()]);

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.invoice_creates, 2);
    assert_eq!(counts.volume_upserts, 0);
    assert_eq!(counts.header_calls(), 0);

    let created = partial.created_invoices[0].1.clone();
    let ledger = session.ledger();
    assert!(ledger.get(&LedgerKey::Durable(created)).is_some());
    let pending = ledger
        .entry(&LedgerKey::pending(local_id_of(&session, "201"), "201"))
        .unwrap();
    assert!(pending.is_unpersisted());
    assert_eq!(ledger.len(), 3);
    assert!(session.is_dirty());

    gateway.clear_faults().unwrap();
    gateway.reset_counts().unwrap();
    let outcome = coordinator.commit(&mut session).await.unwrap();

    let counts = gateway.counts().unwrap();
    assert_eq!(counts.invoice_creates, 2);
    assert_eq!(counts.volume_upserts, 3);
    let created: Vec<_> = outcome.created_invoices.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(created, vec!["201", "202"]);
    assert_eq!(gateway.stored_invoice_count().unwrap(), 3);
    assert!(session.ledger().unpersisted_numbers().is_empty());
    assert!(!session.is_dirty());
}

#[tokio::test]
async fn volume_failure_aborts_and_names_the_invoice() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let mut session = new_order(tenant, &["400", "401"]);
    gateway.fail_volumes_for(&DurableId::new("inv-2").unwrap()).unwrap();

    let err = coordinator.commit(&mut session).await.unwrap_err();
    match &err {
        CommitError::Persistence {
            stage: WriteStage::Volume,
            invoice_number,
            partial,
            ..
        } => {
            assert_eq!(invoice_number.as_deref(), Some("401"));
            assert_eq!(partial.volumes_persisted, vec![DurableId::new("inv-1").unwrap()]);
        }
        other => panic!("expected volume failure, got {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "saving volume failed for invoice 401: transport failure: connection reset while storing volumes of inv-2"
    );
    assert_eq!(gateway.counts().unwrap().volume_upserts, 2);
    assert_eq!(gateway.counts().unwrap().header_calls(), 0);

    gateway.clear_faults().unwrap();
    gateway.reset_counts().unwrap();
    coordinator.commit(&mut session).await.unwrap();
    assert_eq!(gateway.counts().unwrap().invoice_creates, 0);
    assert_eq!(gateway.counts().unwrap().volume_upserts, 1);
}

#[tokio::test]
async fn volumes_follow_their_own_invoice_when_numbers_repeat() {
    let (gateway, coordinator) = setup();
    let tenant = TenantId::new();
    let mut session = OrderSession::new(tenant, test_header("OC-300"));

    // Measured before a manual entry with the same number arrives.
    let keyed = session.try_admit(keyed_invoice(KEY_123, "123")).unwrap();
    session.set_volumes(keyed, &boxes(3)).unwrap();
    let manual = session.try_admit(manual_invoice("123")).unwrap();

    let outcome = coordinator.commit(&mut session).await.unwrap();
    assert_eq!(outcome.created_invoices.len(), 2);
    assert_eq!(outcome.volume_calls, 1);

    let keyed_id = session.invoice(keyed).unwrap().durable_id().unwrap().clone();
    let manual_id = session.invoice(manual).unwrap().durable_id().unwrap().clone();
    assert_ne!(keyed_id, manual_id);
    assert_eq!(outcome.rekey.moved, vec![("123".to_string(), keyed_id.clone())]);
    assert_eq!(gateway.stored_volumes(tenant, &keyed_id).unwrap().unwrap().len(), 3);
    assert!(gateway.stored_volumes(tenant, &manual_id).unwrap().is_none());
    assert_eq!(session.volumes_of(keyed).unwrap().len(), 3);
    assert!(session.volumes_of(manual).is_none());
}

#[tokio::test]
async fn empty_order_is_rejected_before_any_write() {
    let (gateway, coordinator) = setup();
    let mut session = OrderSession::new(TenantId::new(), test_header("OC-1"));

    let err = coordinator.commit(&mut session).await.unwrap_err();
    assert!(matches!(err, CommitError::Validation(_)));
    assert_eq!(gateway.counts().unwrap(), Default::default());
}

/// Gateway whose invoice create blocks until released.
struct GatedGateway {
    inner: Arc<InMemoryGateway>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait::async_trait]
impl InvoiceGateway for GatedGateway {
    async fn create_invoice(
        &self,
        tenant_id: TenantId,
        invoice: &InvoiceRecord,
    ) -> Result<DurableId, GatewayError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_invoice(tenant_id, invoice).await
    }
}

#[async_trait::async_trait]
impl VolumeGateway for GatedGateway {
    async fn upsert_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: &DurableId,
        volumes: &VolumeDimensionSet,
    ) -> Result<(), GatewayError> {
        self.inner.upsert_volumes(tenant_id, invoice_id, volumes).await
    }
}

#[async_trait::async_trait]
impl OrderGateway for GatedGateway {
    async fn create_order(
        &self,
        tenant_id: TenantId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        self.inner.create_order(tenant_id, order).await
    }

    async fn update_order(
        &self,
        tenant_id: TenantId,
        order_id: &DurableId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        self.inner.update_order(tenant_id, order_id, order).await
    }

    async fn find_order_by_number(
        &self,
        tenant_id: TenantId,
        order_number: &str,
    ) -> Result<Option<StoredOrderRef>, GatewayError> {
        self.inner.find_order_by_number(tenant_id, order_number).await
    }
}

#[tokio::test]
async fn second_finalize_while_committing_is_rejected() {
    loadorder_observability::init_for_tests();
    let inner = Arc::new(InMemoryGateway::new());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let coordinator = OrderAssemblyCoordinator::with_config(
        GatedGateway {
            inner: inner.clone(),
            entered: entered.clone(),
            release: release.clone(),
        },
        test_config(),
    );
    let handle = OrderHandle::new(new_order(TenantId::new(), &["600"]));

    let (first, second) = tokio::join!(handle.finalize(&coordinator), async {
        entered.notified().await;
        assert!(handle.is_committing());
        let second = handle.finalize(&coordinator).await;
        release.notify_one();
        second
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(CommitError::AlreadyInFlight)));
    assert!(!handle.is_committing());
    assert_eq!(inner.counts().unwrap().invoice_creates, 1);
    assert!(!handle.lock().await.is_dirty());
}
