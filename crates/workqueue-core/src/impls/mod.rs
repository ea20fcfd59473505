//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryMessageStore**: full-contract `MessageStore` for development and tests
//!
//! Relational, Redis and embedded backends implement the same trait in their
//! own crates.

pub mod inmem_store;

pub use self::inmem_store::InMemoryMessageStore;
