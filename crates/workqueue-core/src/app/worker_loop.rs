//! WorkerLoop - メッセージ処理ループ
//!
//! # フロー
//! 1. `MessageQueue::dequeue()` で claim（なければ poll interval だけ待つ）
//! 2. `LeaseKeeper` で heartbeat を更新し続ける
//! 3. Pipeline（middleware → handler）を実行し、lease 喪失と競合させる
//! 4. `Ok` → commit、`Err(reason)` → rollback、lease 喪失 → 何もしない

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::middleware::{MessageContext, Pipeline};
use crate::queue::{MessageLease, MessageQueue};

/// Worker group handle.
/// - `request_shutdown()` で新しい claim を止める
/// - `shutdown_and_join()` で処理中のメッセージの完了まで待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one queue and pipeline.
    pub fn spawn(n: usize, queue: MessageQueue, pipeline: Arc<Pipeline>, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                queue: queue.clone(),
                pipeline: Arc::clone(&pipeline),
                poll_interval,
            };
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker.run(rx)));
        }
        tracing::info!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new messages. In-flight handlers run to completion and are
    /// committed or rolled back as usual.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        tracing::info!("worker group stopped");
    }
}

struct Worker {
    id: usize,
    queue: MessageQueue,
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.queue.dequeue().await {
                Ok(Some(lease)) => {
                    self.process(lease).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "dequeue failed, backing off");
                }
            }

            tokio::select! {
                // 変更が入ったら次のループで判定
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, lease: MessageLease) {
        let queue_id = lease.queue_id();
        let keeper = self.queue.keep_alive(&lease);
        let mut lost = keeper.lost_signal();
        let ctx = MessageContext::new(lease.clone(), self.id);

        let result = tokio::select! {
            result = self.pipeline.run(&ctx) => Some(result),
            _ = lost.lost() => None,
        };

        // 実行中の heartbeat 更新を待ってから commit / rollback する
        let lease_lost = keeper.stop().await;

        match result {
            Some(Ok(())) if !lease_lost => {
                if let Err(e) = self.queue.commit(queue_id).await {
                    tracing::error!(worker = self.id, %queue_id, error = %e, "commit failed");
                }
            }
            Some(Err(reason)) if !lease_lost => {
                match self.queue.rollback(&lease, reason, None).await {
                    Ok(outcome) => {
                        tracing::debug!(worker = self.id, %queue_id, ?outcome, "message rolled back");
                    }
                    Err(e) => {
                        tracing::error!(worker = self.id, %queue_id, error = %e, "rollback failed");
                    }
                }
            }
            _ => {
                tracing::warn!(worker = self.id, %queue_id, "lease lost, abandoning message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::middleware::handler_fn;
    use crate::domain::{FailureReason, Headers, MessageStatus};
    use crate::impls::InMemoryMessageStore;
    use crate::ports::{MessageStore, SystemClock};
    use crate::schedule::Schedule;
    use crate::queue::{QueueSettings, RetryPolicy, SendOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue(store: Arc<InMemoryMessageStore>) -> MessageQueue {
        MessageQueue::new(
            store,
            Arc::new(SystemClock),
            RetryPolicy::default(),
            QueueSettings::default(),
        )
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn successful_messages_are_committed() {
        let store = Arc::new(InMemoryMessageStore::new());
        let queue = queue(store.clone());
        let ids = [
            queue.send("a", Headers::new(), SendOptions::new()).await.unwrap(),
            queue.send("b", Headers::new(), SendOptions::new()).await.unwrap(),
        ];

        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let pipeline = Pipeline::traced(handler_fn(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let group = WorkerGroup::spawn(2, queue, Arc::new(pipeline), Duration::from_millis(5));
        wait_until(|| handled.load(Ordering::SeqCst) == 2).await;
        group.shutdown_and_join().await;

        for id in ids {
            assert!(store.get(id).await.is_none());
        }
    }

    #[tokio::test]
    async fn failed_messages_are_rolled_back() {
        let store = Arc::new(InMemoryMessageStore::new());
        let queue = queue(store.clone());
        let id = queue.send("bad", Headers::new(), SendOptions::new()).await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pipeline = Pipeline::new(handler_fn(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FailureReason::new("decode", "unreadable"))
            }
        }));

        let group = WorkerGroup::spawn(1, queue, Arc::new(pipeline), Duration::from_millis(5));
        wait_until(|| attempts.load(Ordering::SeqCst) >= 1).await;
        group.shutdown_and_join().await;

        // リトライ未設定なので 1 回で error queue へ
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(id).await.unwrap().status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_work() {
        let store = Arc::new(InMemoryMessageStore::new());
        let queue = queue(store.clone());
        let id = queue.send("slow", Headers::new(), SendOptions::new()).await.unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&started);
        let pipeline = Pipeline::new(handler_fn(move |_ctx| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        }));

        let group = WorkerGroup::spawn(1, queue, Arc::new(pipeline), Duration::from_millis(5));
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;
        group.shutdown_and_join().await;

        assert!(store.get(id).await.is_none());
    }

    #[tokio::test]
    async fn lost_lease_is_abandoned_without_commit() {
        let store = Arc::new(InMemoryMessageStore::new());
        let queue = MessageQueue::new(
            store.clone(),
            Arc::new(SystemClock),
            RetryPolicy::default(),
            QueueSettings {
                heartbeat_update: Schedule::interval(Duration::from_millis(5)).unwrap(),
                ..QueueSettings::default()
            },
        );
        let id = queue.send("contested", Headers::new(), SendOptions::new()).await.unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let store_in_handler = store.clone();
        let pipeline = Pipeline::new(handler_fn(move |ctx| {
            let store = store_in_handler.clone();
            let counter = Arc::clone(&counter);
            async move {
                // 別の回収者が奪った状態を再現: 読んだ heartbeat で reset する
                let record = store.get(ctx.queue_id()).await.unwrap();
                store
                    .reset_heartbeat(ctx.queue_id(), record.heartbeat.unwrap(), &Headers::new())
                    .await
                    .unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }));

        let group = WorkerGroup::spawn(1, queue, Arc::new(pipeline), Duration::from_millis(5));
        wait_until(|| runs.load(Ordering::SeqCst) >= 1).await;
        group.shutdown_and_join().await;

        // commit されず Waiting のまま残る
        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, MessageStatus::Waiting);
    }
}
