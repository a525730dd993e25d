//! The publish seam between the tracker and whatever fans events out.

use crate::error::{Result, TrackerError};
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;

use super::types::EventBatch;

/// Accepts committed event batches.
///
/// Called outside the store lock, one batch at a time in revision order,
/// possibly from a different thread than the one that committed it. A slow
/// sink delays later batches but never the store. Failures are logged by
/// the caller and never retried.
pub trait EventSink: Send + Sync {
    fn publish(&self, batch: &EventBatch) -> Result<()>;
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn publish(&self, batch: &EventBatch) -> Result<()> {
        (**self).publish(batch)
    }
}

/// A bounded channel works as a private delivery path.
impl EventSink for Sender<EventBatch> {
    fn publish(&self, batch: &EventBatch) -> Result<()> {
        match self.try_send(batch.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TrackerError::Publish("channel full".into())),
            Err(TrySendError::Disconnected(_)) => {
                Err(TrackerError::Publish("channel disconnected".into()))
            }
        }
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _batch: &EventBatch) -> Result<()> {
        Ok(())
    }
}
