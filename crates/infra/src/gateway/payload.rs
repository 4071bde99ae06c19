//! Wire shapes of the order header call.

use serde::{Deserialize, Serialize};

use loadorder_core::DurableId;
use loadorder_invoicing::InvoiceRecord;
use loadorder_order::{OrderHeader, OrderSession, OrderTotals};
use loadorder_parties::PartyRecord;
use loadorder_volumes::LedgerSnapshot;

/// Header create/update body: header fields, totals, the invoice list and the
/// full ledger snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub header: OrderHeader,
    pub totals: OrderTotals,
    /// Invoices with their raw source payload stripped.
    pub invoices: Vec<InvoiceRecord>,
    pub volumes: LedgerSnapshot,
    pub sender: PartyRecord,
    pub recipient: PartyRecord,
}

impl OrderPayload {
    pub fn from_session(session: &OrderSession) -> Self {
        Self {
            header: session.header().clone(),
            totals: session.totals(),
            invoices: session
                .invoices()
                .map(InvoiceRecord::without_source_payload)
                .collect(),
            volumes: session.ledger().snapshot(),
            sender: session.sender().clone(),
            recipient: session.recipient().clone(),
        }
    }

    pub fn order_number(&self) -> &str {
        &self.header.order_number
    }
}

/// What the read-back returns for a stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOrderRef {
    pub id: DurableId,
    pub order_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use loadorder_core::TenantId;
    use loadorder_invoicing::{IngestionChannel, InvoiceCandidate};

    #[test]
    fn payload_strips_source_documents() {
        let mut session = OrderSession::new(TenantId::new(), OrderHeader::new("OC-1"));
        let created_at = Utc.with_ymd_and_hms(2025, 8, 12, 10, 0, 0).unwrap();
        let mut candidate = InvoiceCandidate::new(IngestionChannel::DocumentUpload, "123", created_at);
        candidate.source_payload = Some("<nfeProc>...</nfeProc>".to_string());
        candidate.declared_value = 150.0;
        session.admit(candidate).unwrap();

        let payload = OrderPayload::from_session(&session);
        assert_eq!(payload.order_number(), "OC-1");
        assert_eq!(payload.invoices.len(), 1);
        assert!(payload.invoices[0].source_payload().is_none());
        assert_eq!(payload.totals.value, 150.0);

        let json = serde_json::to_value(&payload).unwrap();
        assert!(!json.to_string().contains("nfeProc"));
    }
}
