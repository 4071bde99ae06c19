//! Label preparation and printing for a saved order.

use std::sync::Arc;

use thiserror::Error;

use loadorder_labels::{Clock, LabelIdGenerator, LabelIdentity, LabelSheet, LabelStatus, SystemClock};
use loadorder_order::{LabelGateError, OrderSession};

use crate::config::CommitConfig;
use crate::external::{DocumentRenderer, RenderError};
use crate::gateway::{GatewayError, LabelStatusGateway};

#[derive(Debug, Error)]
pub enum LabelError {
    #[error(transparent)]
    Blocked(#[from] LabelGateError),

    #[error("label store unavailable: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct LabelService<G> {
    gateway: G,
    generator: LabelIdGenerator,
    clock: Arc<dyn Clock>,
}

impl<G> LabelService<G>
where
    G: LabelStatusGateway,
{
    pub fn new(gateway: G, generator: LabelIdGenerator) -> Self {
        Self::with_clock(gateway, generator, Arc::new(SystemClock))
    }

    pub fn from_config(gateway: G, config: &CommitConfig) -> Self {
        Self::new(gateway, config.label_generator())
    }

    pub fn with_clock(gateway: G, generator: LabelIdGenerator, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            generator,
            clock,
        }
    }

    /// Labels of every invoice, with statuses taken from the label store.
    ///
    /// One label per measured volume; invoices without measurements get
    /// their declared volume count.
    pub async fn prepare(&self, session: &mut OrderSession) -> Result<Vec<LabelIdentity>, LabelError> {
        session.ensure_labels_allowed()?;
        let tenant_id = session.tenant_id();

        let plan: Vec<(String, u32)> = session
            .invoices()
            .map(|r| {
                let measured = session
                    .volumes_of(r.local_id())
                    .map(|set| set.len() as u32)
                    .unwrap_or(0);
                let count = if measured > 0 { measured } else { r.declared_volumes() };
                (r.number().to_string(), count)
            })
            .collect();

        let mut labels = Vec::new();
        for (number, count) in plan {
            let mut sheet = LabelSheet::generate(&number, count, &self.generator, self.clock.as_ref());
            let records = self.gateway.label_records(tenant_id, &number).await?;
            sheet.apply(&records);
            labels.extend(sheet.into_labels());
        }
        tracing::debug!(labels = labels.len(), "labels prepared");
        Ok(labels)
    }

    /// Record `labels` as printed in the label store.
    pub async fn mark_printed(
        &self,
        session: &mut OrderSession,
        labels: &mut [LabelIdentity],
    ) -> Result<(), LabelError> {
        session.ensure_labels_allowed()?;
        let tenant_id = session.tenant_id();
        for label in labels.iter_mut() {
            self.gateway
                .set_label_status(tenant_id, label.storage_code(), LabelStatus::Printed)
                .await?;
            label.status = LabelStatus::Printed;
        }
        tracing::info!(labels = labels.len(), "labels marked printed");
        Ok(())
    }

    pub fn render<R>(
        &self,
        session: &mut OrderSession,
        labels: &[LabelIdentity],
        renderer: &R,
    ) -> Result<Vec<u8>, LabelError>
    where
        R: DocumentRenderer + ?Sized,
    {
        session.ensure_labels_allowed()?;
        Ok(renderer.render(session, labels)?)
    }
}
