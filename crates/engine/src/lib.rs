//! Revision-tree engine for revstore
//!
//! This crate orchestrates the storage layer:
//! - Database: open/close, config, registry, facade operations
//! - Transaction: one SQLite unit of work carrying buffered events
//! - Insertion engine: create, update, delete, force-insert, conflict resolution
//! - Revision tree and winner selection
//!
//! The engine is the only component that knows about:
//! - Transaction boundaries and rollback
//! - When `current` flags are recomputed
//! - Publishing events after commit

#![warn(missing_docs)]
#![warn(clippy::all)]

mod attachments;
pub mod database;
mod events;
pub mod force_insert;
pub mod insertion;
pub mod resolve;
pub mod transaction;
pub mod tree;
pub mod winner;

pub use database::{CompactionStats, Database, DatabaseConfig, CONFIG_FILE_NAME};
pub use force_insert::{ForceInsertItem, ForceInsertOutcome};
pub use insertion::RevisionInput;
pub use resolve::{ConflictResolver, Resolution};
pub use transaction::Transaction;
pub use tree::RevisionTree;
