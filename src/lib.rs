//! revstore - embedded MVCC revision-tree document store
//!
//! Documents keep a tree of revisions, conflicting branches included, over
//! a local SQLite file. Replication with CouchDB-style peers grafts remote
//! histories into that tree without inventing revision ids.
//!
//! # Quick Start
//!
//! ```ignore
//! use revstore::{Database, DocumentBody, RevisionInput};
//! use serde_json::json;
//!
//! let db = Database::open("/tmp/store")?;
//! let body = DocumentBody::from_value(json!({"name": "Alice"}))?;
//! let rev = db.create_document(Some("user:1"), RevisionInput::new(body))?;
//!
//! let next = DocumentBody::from_value(json!({"name": "Alice", "age": 30}))?;
//! db.update_document("user:1", &rev.rev_id, RevisionInput::new(next))?;
//! ```
//!
//! # Architecture
//!
//! - `revstore-core`: revision ids, documents, attachments metadata, errors
//! - `revstore-storage`: SQLite schema, row access, content-addressed blobs
//! - `revstore-engine`: revision tree, insertion engine, `Database` facade
//! - `revstore-replication`: pull/push over a `RemoteDatabase` peer

pub use revstore_core::{
    AttachmentStub, BlobKey, Changes, DocumentBody, DocumentEvent, Encoding, Error, LocalDocument,
    Result, RevId, Revision, SavedAttachment,
};
pub use revstore_engine::{
    CompactionStats, ConflictResolver, Database, DatabaseConfig, ForceInsertItem,
    ForceInsertOutcome, Resolution, RevisionInput, RevisionTree, Transaction, CONFIG_FILE_NAME,
};
pub use revstore_replication::{
    LocalPeer, PullReplication, PushReplication, RemoteDatabase, RemoteRevision,
    ReplicationConfig, ReplicationStats,
};
pub use revstore_storage::{Attachment, PreparedAttachment, UnsavedAttachment};
