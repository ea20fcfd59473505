//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。The protocol engine depends only on
//! these traits; backends and test doubles plug in behind them.

pub mod clock;
pub mod id_generator;
pub mod message_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_store::{MessageStore, QueueCounts, RecordFilter};
