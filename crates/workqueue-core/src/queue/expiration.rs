//! ExpirationReaper - deletes messages past their expiration
//!
//! Expiration dominates every status: Waiting, Processing and Error records
//! are all removed once `expiration <= now`. A consumer still working on a
//! reaped message finds its commit reported as already gone and its rollback
//! as a lost lease.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::QueueId;
use crate::error::Result;
use crate::ports::{Clock, MessageStore, RecordFilter};

#[derive(Clone)]
pub struct ExpirationReaper {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    batch_limit: Option<usize>,
}

impl ExpirationReaper {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            batch_limit: None,
        }
    }

    /// At most `limit` records per pass; the rest wait for the next tick.
    pub fn with_batch_limit(mut self, limit: Option<usize>) -> Self {
        self.batch_limit = limit;
        self
    }

    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<QueueId>> {
        let filter = RecordFilter::expired(now).limit(self.batch_limit);
        let records = self.store.find(&filter).await?;
        Ok(records.into_iter().map(|record| record.queue_id).collect())
    }

    /// Returns rows deleted; ids deleted concurrently are not counted.
    pub async fn delete_expired(&self, ids: &[QueueId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete_many(ids).await?)
    }

    pub async fn reap_once(&self) -> Result<u64> {
        let expired = self.find_expired(self.clock.now()).await?;
        let deleted = self.delete_expired(&expired).await?;
        if deleted > 0 {
            tracing::info!(deleted, found = expired.len(), "expired messages deleted");
        }
        Ok(deleted)
    }
}
