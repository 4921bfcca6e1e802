//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

pub use revstore::{
    Database, DatabaseConfig, DocumentBody, Error, ForceInsertItem, LocalPeer, PullReplication,
    PushReplication, ReplicationConfig, RevId, Revision, RevisionInput, UnsavedAttachment,
};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// TestDb - on-disk database in a temp directory
// ============================================================================

/// On-disk test database that can be closed and reopened in place.
pub struct TestDb {
    pub db: Arc<Database>,
    pub dir: TempDir,
}

impl TestDb {
    /// Default configuration (standard durability)
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = Database::open(dir.path()).expect("Failed to open test database");
        TestDb { db, dir }
    }

    /// `durability = "always"`
    pub fn new_strict() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = DatabaseConfig {
            durability: "always".to_string(),
            ..DatabaseConfig::default()
        };
        let db = Database::open_with_config(dir.path(), config).expect("Failed to open test database");
        TestDb { db, dir }
    }

    /// Close the store and open the same directory again.
    pub fn reopen(&mut self) {
        self.db.close().expect("Failed to close test database");
        self.db = Database::open(self.dir.path()).expect("Failed to reopen test database");
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn body(value: serde_json::Value) -> DocumentBody {
    DocumentBody::from_value(value).expect("test body must be a JSON object")
}

pub fn rev(s: &str) -> RevId {
    RevId::parse(s).expect("test revision id must parse")
}

pub fn text_attachment(name: &str, content: &str) -> UnsavedAttachment {
    UnsavedAttachment::from_bytes(name, "text/plain", content.as_bytes().to_vec())
}

/// Force-insert the branch `ids` (oldest first) with a body naming its leaf
pub fn graft(db: &Database, doc_id: &str, ids: &[&str]) {
    let history: Vec<RevId> = ids.iter().map(|s| rev(s)).collect();
    let leaf = ids[ids.len() - 1];
    let item = ForceInsertItem::new(doc_id, history, body(serde_json::json!({ "leaf": leaf })))
        .expect("non-empty history");
    db.force_insert(item).expect("force insert");
}

/// Exactly one leaf per document carries `current`
pub fn assert_single_current(db: &Database, doc_id: &str) {
    let tree = db.get_all_revisions_of_document(doc_id).unwrap();
    let current: Vec<&Revision> = tree.revisions().into_iter().filter(|r| r.current).collect();
    assert_eq!(current.len(), 1, "{} should have one current revision", doc_id);
    assert!(tree.is_leaf(current[0].sequence));
}
