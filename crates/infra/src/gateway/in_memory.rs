use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockWriteGuard};

use loadorder_core::{DurableId, TenantId};
use loadorder_invoicing::{AccessKey, InvoiceCandidate, InvoiceRecord};
use loadorder_labels::{DurableLabelRecord, LabelCode, LabelStatus};
use loadorder_volumes::VolumeDimensionSet;

use super::{
    GatewayError, InvoiceGateway, InvoiceQuery, InvoiceSource, LabelStatusGateway, OrderGateway,
    OrderPayload, StoredOrderRef, VolumeGateway,
};

/// How the next header call misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFault {
    /// The call fails and nothing is stored.
    FailBeforeWrite,
    /// The order is stored but the response is lost.
    FailAfterWrite,
}

/// Number of calls received per operation, failed ones included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub invoice_creates: u32,
    pub volume_upserts: u32,
    pub order_creates: u32,
    pub order_updates: u32,
    pub order_lookups: u32,
    pub label_reads: u32,
    pub label_writes: u32,
    pub key_fetches: u32,
    pub searches: u32,
}

impl CallCounts {
    /// Header create and update calls together.
    pub fn header_calls(&self) -> u32 {
        self.order_creates + self.order_updates
    }
}

#[derive(Debug, Default)]
struct Faults {
    invoice_numbers: HashSet<String>,
    volume_ids: HashSet<DurableId>,
    header: Option<HeaderFault>,
    failing_lookups: u32,
}

#[derive(Debug, Clone)]
struct StoredOrder {
    tenant_id: TenantId,
    payload: OrderPayload,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    invoices: HashMap<DurableId, (TenantId, InvoiceRecord)>,
    volumes: HashMap<(TenantId, DurableId), VolumeDimensionSet>,
    orders: HashMap<DurableId, StoredOrder>,
    labels: HashMap<(TenantId, String), LabelStatus>,
    catalogue: HashMap<TenantId, Vec<InvoiceCandidate>>,
    counts: CallCounts,
    faults: Faults,
}

impl State {
    fn allocate(&mut self, prefix: &str) -> Result<DurableId, GatewayError> {
        self.next_id += 1;
        DurableId::new(format!("{prefix}-{}", self.next_id))
            .map_err(|e| GatewayError::Serialization(e.to_string()))
    }
}

/// Store kept in process memory, with call counters and fault injection.
///
/// Intended for tests/dev. Implements every gateway trait.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: RwLock<State>,
}

fn poisoned() -> GatewayError {
    GatewayError::Transport("in-memory store lock poisoned".to_string())
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, GatewayError> {
        self.state.write().map_err(|_| poisoned())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> Result<R, GatewayError> {
        let mut state = self.write()?;
        Ok(f(&mut state))
    }

    pub fn counts(&self) -> Result<CallCounts, GatewayError> {
        self.with_state(|s| s.counts)
    }

    pub fn reset_counts(&self) -> Result<(), GatewayError> {
        self.with_state(|s| s.counts = CallCounts::default())
    }

    // ---- fault injection ----

    /// Fail every create of the invoice with this number.
    pub fn fail_invoice(&self, number: impl Into<String>) -> Result<(), GatewayError> {
        let number = number.into();
        self.with_state(|s| {
            s.faults.invoice_numbers.insert(number);
        })
    }

    /// Fail every volume upsert for this invoice id.
    pub fn fail_volumes_for(&self, invoice_id: &DurableId) -> Result<(), GatewayError> {
        self.with_state(|s| {
            s.faults.volume_ids.insert(invoice_id.clone());
        })
    }

    /// Make every header call misbehave until cleared.
    pub fn set_header_fault(&self, fault: Option<HeaderFault>) -> Result<(), GatewayError> {
        self.with_state(|s| s.faults.header = fault)
    }

    /// Fail the next `n` order lookups with a transport error.
    pub fn fail_lookups(&self, n: u32) -> Result<(), GatewayError> {
        self.with_state(|s| s.faults.failing_lookups = n)
    }

    pub fn clear_faults(&self) -> Result<(), GatewayError> {
        self.with_state(|s| s.faults = Faults::default())
    }

    // ---- seeding and inspection ----

    /// Store an invoice as if an earlier session had created it.
    pub fn seed_invoice(&self, tenant_id: TenantId, mut invoice: InvoiceRecord) -> Result<DurableId, GatewayError> {
        let mut state = self.write()?;
        let id = match invoice.durable_id() {
            Some(id) => id.clone(),
            None => state.allocate("inv")?,
        };
        invoice
            .mark_persisted(id.clone())
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        state.invoices.insert(id.clone(), (tenant_id, invoice));
        Ok(id)
    }

    pub fn seed_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: DurableId,
        set: VolumeDimensionSet,
    ) -> Result<(), GatewayError> {
        self.with_state(|s| {
            s.volumes.insert((tenant_id, invoice_id), set);
        })
    }

    pub fn seed_label(
        &self,
        tenant_id: TenantId,
        code: impl Into<String>,
        status: LabelStatus,
    ) -> Result<(), GatewayError> {
        let code = code.into();
        self.with_state(|s| {
            s.labels.insert((tenant_id, code), status);
        })
    }

    /// Make an invoice available to key fetch and search.
    pub fn add_source_invoice(&self, tenant_id: TenantId, candidate: InvoiceCandidate) -> Result<(), GatewayError> {
        self.with_state(|s| s.catalogue.entry(tenant_id).or_default().push(candidate))
    }

    pub fn stored_invoice_count(&self) -> Result<usize, GatewayError> {
        self.with_state(|s| s.invoices.len())
    }

    pub fn stored_invoice(&self, id: &DurableId) -> Result<Option<InvoiceRecord>, GatewayError> {
        self.with_state(|s| s.invoices.get(id).map(|(_, r)| r.clone()))
    }

    pub fn stored_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: &DurableId,
    ) -> Result<Option<VolumeDimensionSet>, GatewayError> {
        self.with_state(|s| s.volumes.get(&(tenant_id, invoice_id.clone())).cloned())
    }

    pub fn stored_order(
        &self,
        tenant_id: TenantId,
        order_number: &str,
    ) -> Result<Option<(DurableId, OrderPayload)>, GatewayError> {
        self.with_state(|s| {
            s.orders
                .iter()
                .find(|(_, o)| o.tenant_id == tenant_id && o.payload.order_number() == order_number)
                .map(|(id, o)| (id.clone(), o.payload.clone()))
        })
    }

    pub fn label_status(&self, tenant_id: TenantId, code: &str) -> Result<Option<LabelStatus>, GatewayError> {
        self.with_state(|s| s.labels.get(&(tenant_id, code.to_string())).copied())
    }
}

#[async_trait::async_trait]
impl InvoiceGateway for InMemoryGateway {
    async fn create_invoice(
        &self,
        tenant_id: TenantId,
        invoice: &InvoiceRecord,
    ) -> Result<DurableId, GatewayError> {
        let mut state = self.write()?;
        state.counts.invoice_creates += 1;
        if state.faults.invoice_numbers.contains(invoice.number()) {
            return Err(GatewayError::Server {
                status: 500,
                message: format!("invoice {} could not be stored", invoice.number()),
            });
        }
        let id = state.allocate("inv")?;
        let mut stored = invoice.clone();
        stored
            .mark_persisted(id.clone())
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        state.invoices.insert(id.clone(), (tenant_id, stored));
        Ok(id)
    }
}

#[async_trait::async_trait]
impl VolumeGateway for InMemoryGateway {
    async fn upsert_volumes(
        &self,
        tenant_id: TenantId,
        invoice_id: &DurableId,
        volumes: &VolumeDimensionSet,
    ) -> Result<(), GatewayError> {
        let mut state = self.write()?;
        state.counts.volume_upserts += 1;
        if state.faults.volume_ids.contains(invoice_id) {
            return Err(GatewayError::Transport(format!(
                "connection reset while storing volumes of {invoice_id}"
            )));
        }
        match state.invoices.get(invoice_id) {
            Some((owner, _)) if *owner == tenant_id => {}
            _ => return Err(GatewayError::NotFound(format!("invoice {invoice_id}"))),
        }
        state
            .volumes
            .insert((tenant_id, invoice_id.clone()), volumes.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrderGateway for InMemoryGateway {
    async fn create_order(
        &self,
        tenant_id: TenantId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        let mut state = self.write()?;
        state.counts.order_creates += 1;
        if state.faults.header == Some(HeaderFault::FailBeforeWrite) {
            return Err(GatewayError::Server {
                status: 503,
                message: "order store unavailable".to_string(),
            });
        }
        let taken = state.orders.values().any(|o| {
            o.tenant_id == tenant_id && o.payload.order_number() == order.order_number()
        });
        if taken {
            return Err(GatewayError::Rejected(format!(
                "order number {} already exists",
                order.order_number()
            )));
        }
        let id = state.allocate("ord")?;
        state.orders.insert(
            id.clone(),
            StoredOrder {
                tenant_id,
                payload: order.clone(),
            },
        );
        if state.faults.header == Some(HeaderFault::FailAfterWrite) {
            return Err(GatewayError::Transport("response lost after write".to_string()));
        }
        Ok(id)
    }

    async fn update_order(
        &self,
        tenant_id: TenantId,
        order_id: &DurableId,
        order: &OrderPayload,
    ) -> Result<DurableId, GatewayError> {
        let mut state = self.write()?;
        state.counts.order_updates += 1;
        if state.faults.header == Some(HeaderFault::FailBeforeWrite) {
            return Err(GatewayError::Server {
                status: 503,
                message: "order store unavailable".to_string(),
            });
        }
        match state.orders.get_mut(order_id) {
            Some(stored) if stored.tenant_id == tenant_id => stored.payload = order.clone(),
            _ => return Err(GatewayError::NotFound(format!("order {order_id}"))),
        }
        if state.faults.header == Some(HeaderFault::FailAfterWrite) {
            return Err(GatewayError::Transport("response lost after write".to_string()));
        }
        Ok(order_id.clone())
    }

    async fn find_order_by_number(
        &self,
        tenant_id: TenantId,
        order_number: &str,
    ) -> Result<Option<StoredOrderRef>, GatewayError> {
        let mut state = self.write()?;
        state.counts.order_lookups += 1;
        if state.faults.failing_lookups > 0 {
            state.faults.failing_lookups -= 1;
            return Err(GatewayError::Transport("lookup timed out".to_string()));
        }
        Ok(state
            .orders
            .iter()
            .find(|(_, o)| o.tenant_id == tenant_id && o.payload.order_number() == order_number)
            .map(|(id, o)| StoredOrderRef {
                id: id.clone(),
                order_number: o.payload.order_number().to_string(),
            }))
    }
}

#[async_trait::async_trait]
impl LabelStatusGateway for InMemoryGateway {
    async fn label_records(
        &self,
        tenant_id: TenantId,
        invoice_number: &str,
    ) -> Result<Vec<DurableLabelRecord>, GatewayError> {
        let mut state = self.write()?;
        state.counts.label_reads += 1;
        let mut records: Vec<DurableLabelRecord> = state
            .labels
            .iter()
            .filter(|((owner, code), _)| {
                *owner == tenant_id && LabelCode::parse(code, invoice_number).is_some()
            })
            .map(|((_, code), status)| DurableLabelRecord {
                code: code.clone(),
                status: *status,
            })
            .collect();
        records.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(records)
    }

    async fn set_label_status(
        &self,
        tenant_id: TenantId,
        code: &str,
        status: LabelStatus,
    ) -> Result<(), GatewayError> {
        let mut state = self.write()?;
        state.counts.label_writes += 1;
        state.labels.insert((tenant_id, code.to_string()), status);
        Ok(())
    }
}

#[async_trait::async_trait]
impl InvoiceSource for InMemoryGateway {
    async fn fetch_by_key(
        &self,
        tenant_id: TenantId,
        key: &AccessKey,
    ) -> Result<InvoiceCandidate, GatewayError> {
        let mut state = self.write()?;
        state.counts.key_fetches += 1;
        state
            .catalogue
            .get(&tenant_id)
            .and_then(|c| c.iter().find(|i| i.access_key.as_deref() == Some(key.as_str())))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("invoice with key {}", key.as_str())))
    }

    async fn search(
        &self,
        tenant_id: TenantId,
        query: &InvoiceQuery,
    ) -> Result<Vec<InvoiceCandidate>, GatewayError> {
        let mut state = self.write()?;
        state.counts.searches += 1;
        let Some(catalogue) = state.catalogue.get(&tenant_id) else {
            return Ok(Vec::new());
        };
        let field_matches = |want: &Option<String>, have: Option<&str>| match want {
            Some(w) => have == Some(w.as_str()),
            None => true,
        };
        Ok(catalogue
            .iter()
            .filter(|c| {
                field_matches(&query.number, Some(c.number.as_str()))
                    && field_matches(&query.access_key, c.access_key.as_deref())
                    && field_matches(
                        &query.sender_tax_id,
                        c.sender.tax_id.as_ref().map(|t| t.as_str()),
                    )
                    && field_matches(
                        &query.recipient_tax_id,
                        c.recipient.tax_id.as_ref().map(|t| t.as_str()),
                    )
            })
            .cloned()
            .collect())
    }
}
