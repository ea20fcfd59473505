//! MessageLease and LeaseKeeper
//!
//! A lease is the consumer's proof of claim: the record snapshot taken at
//! dequeue plus the heartbeat value the store currently expects. Every
//! conditional operation (renew, requeue, move to error) compares against that
//! heartbeat, so it is shared and kept current by the renewal task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;

use crate::domain::{CorrelationId, Headers, Priority, QueueId, QueueMessageRecord};
use crate::error::{QueueError, StorageError};
use crate::queue::heartbeat::HeartbeatManager;
use crate::schedule::Schedule;

/// A claimed message.
///
/// Cloning shares the heartbeat, so a clone held by a `LeaseKeeper` and the
/// worker's copy always agree on what the store expects.
#[derive(Debug, Clone)]
pub struct MessageLease {
    record: Arc<QueueMessageRecord>,
    heartbeat: Arc<Mutex<DateTime<Utc>>>,
}

impl MessageLease {
    /// Wraps the record returned by `MessageStore::claim_next`.
    pub fn from_claimed(record: QueueMessageRecord) -> Result<Self, QueueError> {
        let heartbeat = record.heartbeat.ok_or_else(|| {
            StorageError::Backend(format!(
                "claimed message {} has no heartbeat",
                record.queue_id
            ))
        })?;
        Ok(Self {
            record: Arc::new(record),
            heartbeat: Arc::new(Mutex::new(heartbeat)),
        })
    }

    pub fn queue_id(&self) -> QueueId {
        self.record.queue_id
    }

    pub fn body(&self) -> &[u8] {
        &self.record.body
    }

    /// Headers as they were at claim time.
    pub fn headers(&self) -> &Headers {
        &self.record.headers
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.record.correlation_id
    }

    pub fn route(&self) -> Option<&str> {
        self.record.route.as_deref()
    }

    pub fn priority(&self) -> Option<Priority> {
        self.record.priority
    }

    /// Snapshot taken at claim time. Status and heartbeat are not kept current.
    pub fn record(&self) -> &QueueMessageRecord {
        &self.record
    }

    /// Heartbeat the store is expected to hold right now.
    pub async fn heartbeat(&self) -> DateTime<Utc> {
        *self.heartbeat.lock().await
    }

    /// Holding the guard serialises renewal against requeue / move-to-error.
    pub(crate) async fn lock_heartbeat(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.heartbeat.lock().await
    }
}

/// Resolves once the keeper has observed that the lease is gone.
#[derive(Debug, Clone)]
pub struct LeaseLostSignal {
    rx: watch::Receiver<bool>,
}

impl LeaseLostSignal {
    pub fn is_lost(&self) -> bool {
        *self.rx.borrow()
    }

    /// Never resolves if the keeper stops without losing the lease.
    pub async fn lost(&mut self) {
        if self.rx.wait_for(|lost| *lost).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Background renewal for one lease.
///
/// # 停止
/// `stop()` は停止要求を送ってからタスクの終了を待つ。実行中の heartbeat CAS は
/// 中断されず、完了した値が lease に反映されてから返る。
pub struct LeaseKeeper {
    stop_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
    join: JoinHandle<()>,
}

impl LeaseKeeper {
    pub fn start(heartbeats: HeartbeatManager, lease: MessageLease, schedule: Schedule) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (lost_tx, lost_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let queue_id = lease.queue_id();
            loop {
                let delay = match schedule.next_delay(heartbeats.now()) {
                    Ok(delay) => delay,
                    Err(e) => {
                        tracing::error!(%queue_id, error = %e, "lease renewal schedule exhausted");
                        break;
                    }
                };

                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                match heartbeats.send_heartbeat(&lease).await {
                    Ok(()) => tracing::trace!(%queue_id, "lease renewed"),
                    Err(QueueError::LeaseLost(_)) => {
                        tracing::warn!(%queue_id, "lease lost during renewal");
                        let _ = lost_tx.send(true);
                        break;
                    }
                    // 一時的な障害は次の周期で再試行
                    Err(e) => tracing::warn!(%queue_id, error = %e, "lease renewal failed"),
                }

                if *stop_rx.borrow() {
                    break;
                }
            }
        });

        Self {
            stop_tx,
            lost_rx,
            join,
        }
    }

    pub fn lost_signal(&self) -> LeaseLostSignal {
        LeaseLostSignal {
            rx: self.lost_rx.clone(),
        }
    }

    pub fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }

    /// Stop renewing and wait for the task. Returns whether the lease was lost.
    pub async fn stop(self) -> bool {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "lease keeper task panicked");
        }
        *self.lost_rx.borrow()
    }
}
