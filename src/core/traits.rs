use crate::core::{AssetRecord, Result};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tracing::warn;

pub type HandleStream<H> = Pin<Box<dyn Stream<Item = Result<H>> + Send>>;

/// Producer of asset records.
///
/// Handles are cheap references to entities on the source platform; turning
/// one into a record is a separate, individually fallible step.
#[async_trait]
pub trait InventorySource: Send + Sync {
    type Handle: Send + Sync;

    /// Failure here is fatal for the whole run.
    async fn connect(&mut self) -> Result<()>;

    async fn iterate(&self) -> Result<HandleStream<Self::Handle>>;

    async fn extract(&self, handle: &Self::Handle) -> Result<AssetRecord>;

    /// Short label for log context.
    fn describe(&self, handle: &Self::Handle) -> String;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-item tally of a batched delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;

    async fn consume(&mut self, record: &AssetRecord) -> Result<()>;

    /// Delivers every record, logging individual failures instead of
    /// aborting the batch.
    async fn consume_batch(&mut self, records: &[AssetRecord]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for record in records {
            match self.consume(record).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    warn!(sink = self.name(), vm = %record.name, error = %e, "batch item failed");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}
