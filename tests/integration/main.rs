//! Integration Tests
//!
//! Cross-crate tests through the `revstore` facade:
//! - persistence: data, conflicts and attachments across close/reopen
//! - concurrency: many threads writing through one shared store
//! - sync: bidirectional replication between on-disk stores

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod persistence;
mod sync;
