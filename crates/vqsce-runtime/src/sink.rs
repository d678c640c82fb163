use anyhow::Result;

use crate::types::{Batch, EpochSummary};

/// Synchronous delivery interface for training loops that do not poll a stream.
///
/// Delivery runs on the blocking pool while the batch's lease is held, so a
/// slow sink blocks upstream and the runtime stays RAM-bounded.
pub trait Sink: Send + Sync + 'static {
    fn deliver(&self, batch: &Batch) -> Result<()>;

    fn epoch_complete(&self, _summary: &EpochSummary) -> Result<()> {
        Ok(())
    }
}
