//! App - アプリケーション層
//!
//! このモジュールは、queue と ports を組み合わせて実行時の部品を提供します。
//!
//! # 主要コンポーネント
//! - **QueueBuilder**: 設定・ストア・時計のワイヤリングと起動時検証
//! - **QueueRuntime**: MessageQueue と背景モニターの起動
//! - **WorkerGroup**: メッセージ処理ループ（dequeue→handle→commit/rollback）
//! - **Pipeline**: middleware チェーン + handler
//! - **ReaperLoop**: 放置された lease の回収
//! - **GcLoop**: 期限切れメッセージの削除
//! - **ErrorPurgeLoop**: error queue の保持期間管理

pub mod builder;
pub mod error_purge_loop;
pub mod gc_loop;
pub mod middleware;
pub mod reaper_loop;
pub mod runtime;
pub mod status;
mod ticker;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, QueueBuilder};
pub use self::error_purge_loop::ErrorPurgeLoop;
pub use self::gc_loop::GcLoop;
pub use self::middleware::{
    handler_fn, HandlerResult, MessageContext, MessageHandler, Middleware, Next, Pipeline,
    TracingMiddleware,
};
pub use self::reaper_loop::ReaperLoop;
pub use self::runtime::{MonitorGroup, QueueRuntime};
pub use self::status::QueueStatus;
pub use self::worker_loop::WorkerGroup;
