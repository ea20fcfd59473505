//! Status - キューの状態集計

use std::sync::Arc;

use crate::error::Result;
use crate::ports::{Clock, MessageStore, QueueCounts};

/// Read-only view for operators and dashboards.
#[derive(Clone)]
pub struct QueueStatus {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl QueueStatus {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Counts by effective state at the current instant. A delayed message
    /// moves from `delayed` to `waiting` once its delay passes.
    pub async fn counts(&self) -> Result<QueueCounts> {
        Ok(self.store.counts(self.clock.now()).await?)
    }
}
