//! Handler pipeline - 明示的な middleware チェーン
//!
//! # 学習ポイント
//! - Object-safe trait (MessageHandler, Middleware)
//! - 継続 (`Next`) を渡す合成。起動時に一度だけ組み立てる
//! - 失敗は例外ではなく `Result<(), FailureReason>` で返す

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::domain::headers::standard::TRACE_PARENT;
use crate::domain::{FailureReason, HeaderError, HeaderKey, Headers, QueueId};
use crate::queue::MessageLease;

pub type HandlerResult = Result<(), FailureReason>;

/// Failure type used when the body does not decode.
pub const DECODE_FAILURE: &str = "decode";

/// What a handler sees of a claimed message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    lease: MessageLease,
    worker_id: usize,
}

impl MessageContext {
    pub fn new(lease: MessageLease, worker_id: usize) -> Self {
        Self { lease, worker_id }
    }

    pub fn queue_id(&self) -> QueueId {
        self.lease.queue_id()
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn body(&self) -> &[u8] {
        self.lease.body()
    }

    pub fn headers(&self) -> &Headers {
        self.lease.headers()
    }

    pub fn header<T: DeserializeOwned>(&self, key: &HeaderKey<T>) -> Result<Option<T>, HeaderError> {
        self.lease.headers().get(key)
    }

    pub fn lease(&self) -> &MessageLease {
        &self.lease
    }

    /// Decode the body as JSON. A malformed body fails with `DECODE_FAILURE`.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, FailureReason> {
        serde_json::from_slice(self.body())
            .map_err(|e| FailureReason::from_error(DECODE_FAILURE, &e))
    }
}

/// The application's processing logic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &MessageContext) -> HandlerResult;
}

/// Closure adapter. The closure receives an owned context.
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(MessageContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(MessageContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, ctx: &MessageContext) -> HandlerResult {
        (self.f)(ctx.clone()).await
    }
}

/// Cross-cutting wrapper around the handler.
///
/// A middleware may run code before and after `next.run(ctx)`, replace the
/// result, or return without calling `next` at all.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &MessageContext, next: Next<'_>) -> HandlerResult;
}

/// The rest of the chain, ending in the handler.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a dyn MessageHandler,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &MessageContext) -> HandlerResult {
        match self.middlewares.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    middlewares: rest,
                    handler: self.handler,
                };
                current.handle(ctx, next).await
            }
            None => self.handler.handle(ctx).await,
        }
    }
}

/// Ordered middleware list plus the handler. The first middleware added is
/// the outermost.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn MessageHandler>,
}

impl Pipeline {
    pub fn new(handler: impl MessageHandler + 'static) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            middlewares: Vec::new(),
            handler,
        }
    }

    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Pipeline with `TracingMiddleware` as the outermost layer.
    pub fn traced(handler: impl MessageHandler + 'static) -> Self {
        Self::new(handler).with(TracingMiddleware)
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub async fn run(&self, ctx: &MessageContext) -> HandlerResult {
        Next {
            middlewares: &self.middlewares,
            handler: self.handler.as_ref(),
        }
        .run(ctx)
        .await
    }
}

/// Wraps each message in a span and logs the result.
///
/// The span carries the `workqueue.trace_parent` header when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, ctx: &MessageContext, next: Next<'_>) -> HandlerResult {
        let trace_parent = ctx.header(&TRACE_PARENT).ok().flatten().unwrap_or_default();
        let span = tracing::info_span!(
            "message",
            queue_id = %ctx.queue_id(),
            worker = ctx.worker_id(),
            trace_parent = %trace_parent,
        );

        async move {
            let started = Instant::now();
            let result = next.run(ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(()) => tracing::debug!(elapsed_ms, "handler succeeded"),
                Err(reason) => tracing::warn!(
                    elapsed_ms,
                    failure_type = %reason.failure_type,
                    error = %reason.message,
                    "handler failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewMessage, RouteFilter};
    use crate::impls::InMemoryMessageStore;
    use crate::ports::MessageStore;
    use chrono::Utc;
    use std::sync::Mutex;

    async fn context(body: &[u8]) -> MessageContext {
        let store = InMemoryMessageStore::new();
        store
            .insert(NewMessage {
                body: body.to_vec(),
                headers: Headers::new(),
                correlation_id: None,
                route: None,
                priority: None,
                queued_at: Utc::now(),
                delay_until: None,
                expiration: None,
            })
            .await
            .unwrap();
        let record = store
            .claim_next(&RouteFilter::Any, Utc::now())
            .await
            .unwrap()
            .unwrap();
        MessageContext::new(MessageLease::from_claimed(record).unwrap(), 0)
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(&self, ctx: &MessageContext, next: Next<'_>) -> HandlerResult {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            let result = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{} after", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _ctx: &MessageContext, _next: Next<'_>) -> HandlerResult {
            Err(FailureReason::new("rejected", "blocked by middleware"))
        }
    }

    #[tokio::test]
    async fn middlewares_run_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = Arc::clone(&log);
        let pipeline = Pipeline::new(handler_fn(move |_ctx| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().unwrap().push("handler".to_string());
                Ok(())
            }
        }))
        .with(Recorder {
            name: "outer",
            log: Arc::clone(&log),
        })
        .with(Recorder {
            name: "inner",
            log: Arc::clone(&log),
        });

        pipeline.run(&context(b"{}").await).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer before", "inner before", "handler", "inner after", "outer after"]
        );
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let pipeline = Pipeline::new(handler_fn(|_ctx| async { Ok(()) })).with(ShortCircuit);
        let err = pipeline.run(&context(b"").await).await.unwrap_err();
        assert_eq!(err.failure_type.as_str(), "rejected");
    }

    #[tokio::test]
    async fn traced_pipeline_passes_result_through() {
        let pipeline = Pipeline::traced(handler_fn(|_ctx| async {
            Err(FailureReason::new("timeout", "slow"))
        }));
        assert_eq!(pipeline.len(), 1);
        let err = pipeline.run(&context(b"").await).await.unwrap_err();
        assert_eq!(err.failure_type.as_str(), "timeout");
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Invoice {
        id: u32,
    }

    #[tokio::test]
    async fn decode_json_reports_decode_failure() {
        let ok = context(br#"{"id": 7}"#).await;
        assert_eq!(ok.decode_json::<Invoice>().unwrap(), Invoice { id: 7 });

        let bad = context(b"not json").await;
        let err = bad.decode_json::<Invoice>().unwrap_err();
        assert_eq!(err.failure_type.as_str(), DECODE_FAILURE);
    }
}
