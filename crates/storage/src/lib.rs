//! Storage layer for revstore
//!
//! This crate owns everything that touches disk:
//! - schema: DDL, `user_version` migrations, connection pragmas
//! - revs: row-level reads and writes of `docs` and `revs`
//! - attachments: attachment metadata rows and copy-forward
//! - blobs: content-addressed blob files and the attachment lifecycle
//!   (`Unsaved` -> `Prepared` -> `Saved`)
//! - local: non-replicated local documents
//!
//! Functions here never open transactions; the engine decides the unit of
//! work and passes in a connection (or a `rusqlite::Transaction`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachments;
pub mod blobs;
pub mod local;
pub mod revs;
pub mod schema;
pub mod sql;

pub use blobs::{Attachment, BlobStore, Committed, PreparedAttachment, PurgeStats, UnsavedAttachment};
pub use revs::NewRevision;
pub use schema::Synchronous;
pub use sql::SqlContext;
