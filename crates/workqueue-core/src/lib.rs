//! workqueue-core
//!
//! Durable, storage-agnostic message queue semantics on top of a pluggable
//! `MessageStore`.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, headers, message, failure, route）
//! - **ports**: 抽象化レイヤー（MessageStore, Clock, IdGenerator）
//! - **queue**: プロトコル本体（MessageQueue, HeartbeatManager, RetryPolicy, ErrorQueue, ExpirationReaper）
//! - **impls**: 実装（InMemoryMessageStore など開発用）
//! - **app**: 実行時の部品（QueueBuilder, QueueRuntime, WorkerGroup, Pipeline, 背景ループ）
//! - **config** / **schedule** / **telemetry** / **error**

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod schedule;
pub mod telemetry;

pub use app::{
    handler_fn, BuildError, HandlerResult, MessageContext, MessageHandler, Middleware, Next,
    Pipeline, QueueBuilder, QueueRuntime, QueueStatus, TracingMiddleware, WorkerGroup,
};
pub use config::QueueConfig;
pub use domain::{
    FailureReason, FailureType, HeaderKey, Headers, MessageStatus, QueueId, RouteFilter,
};
pub use error::{QueueError, StorageError};
pub use impls::InMemoryMessageStore;
pub use ports::{Clock, MessageStore, QueueCounts};
pub use queue::{CommitOutcome, MessageLease, MessageQueue, RollbackOutcome, SendOptions};
