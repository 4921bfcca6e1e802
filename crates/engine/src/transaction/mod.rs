//! Units of work
//!
//! A [`Transaction`] wraps one open SQLite transaction together with the
//! blob store and the events produced so far. Every document operation
//! (create, update, delete, force-insert, conflict resolution) is a method
//! on it, so several operations can share one atomic unit:
//!
//! ```text
//! db.transaction(|txn| {
//!     let rev = txn.create_document(Some("doc1"), RevisionInput::new(body))?;
//!     txn.update_document("doc1", &rev.rev_id, RevisionInput::new(next))?;
//!     Ok(())
//! })?;
//! ```

pub mod context;

pub use context::Transaction;
