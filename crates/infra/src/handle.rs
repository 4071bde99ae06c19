//! Shared access to one order session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use loadorder_core::TenantId;
use loadorder_order::{OrderHeader, OrderSession};

use crate::config::CommitConfig;
use crate::gateway::{InvoiceGateway, OrderGateway, VolumeGateway};
use crate::saga::{CommitError, CommitOutcome, OrderAssemblyCoordinator};

/// Cloneable handle to an order session.
///
/// Every mutation goes through one mutex, so admission from concurrent
/// ingestion channels is a single check-then-insert step. At most one commit
/// runs at a time; a second `finalize` while one is running is rejected.
#[derive(Debug, Clone)]
pub struct OrderHandle {
    session: Arc<Mutex<OrderSession>>,
    committing: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the commit future completes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OrderHandle {
    pub fn new(session: OrderSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            committing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to a new order; changes within the configured grace period
    /// count as initial loading.
    pub fn start(tenant_id: TenantId, header: OrderHeader, config: &CommitConfig) -> Self {
        Self::new(OrderSession::with_grace(tenant_id, header, config.dirty_grace))
    }

    pub async fn lock(&self) -> MutexGuard<'_, OrderSession> {
        self.session.lock().await
    }

    /// Run `f` with exclusive access to the session.
    pub async fn with_session<R>(&self, f: impl FnOnce(&mut OrderSession) -> R) -> R {
        let mut session = self.session.lock().await;
        f(&mut session)
    }

    pub fn is_committing(&self) -> bool {
        self.committing.load(Ordering::Acquire)
    }

    /// Commit the session. Rejected, not queued, while another commit runs.
    pub async fn finalize<G>(
        &self,
        coordinator: &OrderAssemblyCoordinator<G>,
    ) -> Result<CommitOutcome, CommitError>
    where
        G: InvoiceGateway + VolumeGateway + OrderGateway,
    {
        let Some(_in_flight) = InFlight::acquire(&self.committing) else {
            tracing::warn!("commit requested while another is in flight");
            return Err(CommitError::AlreadyInFlight);
        };
        let mut session = self.session.lock().await;
        coordinator.commit(&mut session).await
    }
}
