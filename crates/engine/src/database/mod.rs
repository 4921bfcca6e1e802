//! Database struct and open/close logic
//!
//! A `Database` owns one SQLite connection, the attachment blob store and
//! the subscriber list for document events. Every public operation runs in
//! exactly one SQLite transaction:
//!
//! - writes go through [`Database::transaction`] (`BEGIN IMMEDIATE`), so
//!   concurrent writers queue on the connection mutex and the optimistic
//!   `current` check is always made against committed state
//! - reads go through [`Database::read`] (deferred) for a consistent view
//!
//! Attachment bytes are streamed to temp files *before* the write
//! transaction opens; only the metadata insert and the final rename happen
//! inside it.
//!
//! ## Transaction API
//!
//! ```text
//! let rev = db.transaction(|txn| {
//!     let rev = txn.create_document(Some("doc1"), RevisionInput::new(body))?;
//!     txn.update_document("doc1", &rev.rev_id, RevisionInput::new(next))
//! })?;
//! ```
//!
//! Events produced inside the closure are published to subscribers only
//! after the commit succeeds; a rollback discards them.

pub mod config;
mod registry;

pub use config::{DatabaseConfig, CONFIG_FILE_NAME};
pub use registry::OPEN_DATABASES;

use crate::events::EventBus;
use crate::force_insert::{ForceInsertItem, ForceInsertOutcome};
use crate::insertion::RevisionInput;
use crate::resolve::{ConflictResolver, Resolution};
use crate::transaction::Transaction;
use crate::tree::RevisionTree;
use parking_lot::Mutex;
use revstore_core::limits::DEFAULT_CHANGES_LIMIT;
use revstore_core::{
    validate_local_document_id, Changes, DocumentBody, DocumentEvent, Error, LocalDocument,
    Result, RevId, Revision, SavedAttachment,
};
use revstore_storage::{
    attachments, local, revs, schema, Attachment, BlobStore, PreparedAttachment, PurgeStats,
    SqlContext, UnsavedAttachment,
};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// SQLite file inside the database directory
pub const DB_FILE_NAME: &str = "db.sqlite";

/// Lock file preventing a second process from opening the same directory
pub const LOCK_FILE_NAME: &str = ".lock";

/// What a [`Database::compact`] pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Non-leaf revisions whose body was cleared
    pub bodies_cleared: usize,
    /// Attachment rows of those revisions
    pub attachment_rows_removed: usize,
    /// Blob files kept or deleted
    pub blobs: PurgeStats,
}

// ============================================================================
// Database Struct
// ============================================================================

/// Embedded revision-tree document store.
///
/// Create one with [`Database::open`] (on disk, shared per path) or
/// [`Database::ephemeral`] (in memory, private).
pub struct Database {
    /// Canonical data directory; `None` for ephemeral databases
    data_dir: Option<PathBuf>,

    /// The single SQLite connection; `None` once closed
    conn: Mutex<Option<Connection>>,

    /// Content-addressed attachment files
    blobs: BlobStore,

    /// Settings the database was opened with (mirrors revstore.toml)
    config: DatabaseConfig,

    /// Post-commit event subscribers
    events: EventBus,

    /// Keeps the blob directory of an ephemeral database alive
    _scratch: Option<TempDir>,

    /// Exclusive lock held while open. Dropped on close.
    lock_file: Mutex<Option<File>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.data_dir)
            .field("open", &self.is_open())
            .field("config", &self.config)
            .finish()
    }
}

impl Database {
    /// Open the database at `path`, creating it if needed.
    ///
    /// Reads `revstore.toml` from the directory, writing one with defaults
    /// if it is missing. Opening the same path again while the first
    /// instance is alive returns the same `Arc`.
    ///
    /// ```text
    /// let db1 = Database::open("/data")?;
    /// let db2 = Database::open("/data")?;
    /// assert!(Arc::ptr_eq(&db1, &db2));
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        DatabaseConfig::write_default_if_missing(&config_path)?;
        let cfg = DatabaseConfig::from_file(&config_path)?;

        Self::open_at(&data_dir, cfg, false)
    }

    /// Open with an explicit configuration.
    ///
    /// The config is written to `revstore.toml` so a later
    /// [`Database::open`] picks up the same settings.
    pub fn open_with_config<P: AsRef<Path>>(path: P, cfg: DatabaseConfig) -> Result<Arc<Self>> {
        cfg.validate()?;
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        Self::open_at(&data_dir, cfg, true)
    }

    fn open_at(data_dir: &Path, cfg: DatabaseConfig, write_config: bool) -> Result<Arc<Self>> {
        let canonical_path = data_dir.canonicalize()?;

        // Held for the whole open so two threads cannot both create an
        // instance for the same path.
        let mut registry = OPEN_DATABASES.lock();
        if let Some(db) = registry.get(&canonical_path).and_then(|w| w.upgrade()) {
            info!(target: "revstore::db", path = ?canonical_path, "Returning existing database instance");
            return Ok(db);
        }

        let lock_path = canonical_path.join(LOCK_FILE_NAME);
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::storage(format!("failed to open lock file: {}", e)))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            Error::storage(format!(
                "database at '{}' is already in use by another process",
                canonical_path.display()
            ))
        })?;

        if write_config {
            cfg.write_to_file(&canonical_path.join(CONFIG_FILE_NAME))?;
        }
        let synchronous = cfg.durability_mode()?;

        let mut conn = Connection::open(canonical_path.join(DB_FILE_NAME))
            .context("opening database file")?;
        schema::configure(&conn, synchronous, true)?;
        schema::migrate(&mut conn)?;

        let blobs = BlobStore::open(canonical_path.join(&cfg.attachments_dir))?;

        info!(
            target: "revstore::db",
            path = ?canonical_path,
            durability = %cfg.durability,
            "Opened database"
        );

        let db = Arc::new(Database {
            data_dir: Some(canonical_path.clone()),
            conn: Mutex::new(Some(conn)),
            blobs,
            config: cfg,
            events: EventBus::new(),
            _scratch: None,
            lock_file: Mutex::new(Some(lock_file)),
        });
        registry.insert(canonical_path, Arc::downgrade(&db));
        Ok(db)
    }

    /// In-memory database with a temporary blob directory.
    ///
    /// Never registered and never writes config; every call returns a new,
    /// empty store. Meant for tests.
    pub fn ephemeral() -> Result<Arc<Self>> {
        let config = DatabaseConfig::default();
        let scratch = TempDir::new()?;
        let blobs = BlobStore::open(scratch.path().join(&config.attachments_dir))?;

        let mut conn = Connection::open_in_memory().context("opening in-memory database")?;
        schema::configure(&conn, config.durability_mode()?, false)?;
        schema::migrate(&mut conn)?;

        Ok(Arc::new(Database {
            data_dir: None,
            conn: Mutex::new(Some(conn)),
            blobs,
            config,
            events: EventBus::new(),
            _scratch: Some(scratch),
            lock_file: Mutex::new(None),
        }))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Data directory, `None` for ephemeral databases
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// True for databases created by [`Database::ephemeral`]
    pub fn is_ephemeral(&self) -> bool {
        self.data_dir.is_none()
    }

    /// Configuration in effect
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// False once [`Database::close`] has run
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Identifier of this store, stable across reopen
    pub fn public_identifier(&self) -> Result<String> {
        self.read(|txn| schema::public_identifier(txn.connection()))
    }

    /// Blob directory
    pub fn attachments_dir(&self) -> &Path {
        self.blobs.dir()
    }

    // ========================================================================
    // Transaction API
    // ========================================================================

    /// Run `f` inside a write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back on `Err` and returns the
    /// closure's error unchanged. Events are published after the commit.
    ///
    /// # Errors
    ///
    /// `Closed` after [`Database::close`]; `Storage` if begin or commit
    /// fails; anything `f` returns.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(Error::Closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("beginning write transaction")?;

        let mut txn = Transaction::new(&tx, &self.blobs);
        let result = f(&mut txn);
        let (events, created_blobs) = txn.into_parts();

        match result {
            Ok(value) => {
                if let Err(e) = tx.commit().context("committing transaction") {
                    // The connection lock is still held, so no other write
                    // can reference these blobs yet.
                    self.blobs.discard(&created_blobs);
                    return Err(e);
                }
                drop(guard);
                debug!(target: "revstore::txn", events = events.len(), "Committed transaction");
                self.events.publish(events);
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(target: "revstore::txn", error = %rollback, "Rollback failed");
                }
                self.blobs.discard(&created_blobs);
                debug!(target: "revstore::txn", error = %e, blobs = created_blobs.len(), "Rolled back transaction");
                Err(e)
            }
        }
    }

    /// Run `f` inside a read transaction for a consistent view.
    pub fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(Error::Closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .context("beginning read transaction")?;
        let value = f(&Transaction::new(&tx, &self.blobs))?;
        tx.commit().context("ending read transaction")?;
        Ok(value)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current revision of a document (a tombstone if it was deleted).
    pub fn get_document(&self, doc_id: &str) -> Result<Revision> {
        self.read(|txn| txn.get_document(doc_id))
    }

    /// A specific revision of a document
    pub fn get_document_revision(&self, doc_id: &str, rev_id: &RevId) -> Result<Revision> {
        self.read(|txn| txn.get_document_revision(doc_id, rev_id))
    }

    /// True if the document has a current revision, deleted or not
    pub fn contains_document(&self, doc_id: &str) -> Result<bool> {
        self.read(|txn| Ok(revs::current_revision(txn.connection(), doc_id)?.is_some()))
    }

    /// True if `rev_id` is stored for `doc_id` (stubs included)
    pub fn contains_revision(&self, doc_id: &str, rev_id: &RevId) -> Result<bool> {
        self.read(|txn| Ok(revs::revision(txn.connection(), doc_id, rev_id)?.is_some()))
    }

    /// Every stored revision of a document as a tree
    pub fn get_all_revisions_of_document(&self, doc_id: &str) -> Result<RevisionTree> {
        self.read(|txn| txn.revision_tree(doc_id))
    }

    /// Current non-deleted revisions ordered by sequence
    pub fn all_documents(&self, offset: usize, limit: usize, descending: bool) -> Result<Vec<Revision>> {
        self.read(|txn| {
            revs::all_documents(txn.connection(), offset, limit, descending)?
                .into_iter()
                .map(|r| txn.with_attachments(r))
                .collect()
        })
    }

    /// Ids of every non-deleted document
    pub fn all_document_ids(&self) -> Result<Vec<String>> {
        self.read(|txn| revs::all_document_ids(txn.connection()))
    }

    /// Current revisions for `doc_ids` in input order; unknown ids are skipped.
    pub fn documents_with_ids(&self, doc_ids: &[String]) -> Result<Vec<Revision>> {
        let chunk = self.config.query_placeholder_limit;
        self.read(|txn| {
            let mut found: HashMap<String, Revision> = HashMap::with_capacity(doc_ids.len());
            for ids in doc_ids.chunks(chunk) {
                for revision in revs::current_revisions_for_ids(txn.connection(), ids)? {
                    found.insert(revision.doc_id.clone(), revision);
                }
            }
            let mut out = Vec::with_capacity(found.len());
            for id in doc_ids {
                if let Some(revision) = found.remove(id) {
                    out.push(txn.with_attachments(revision)?);
                }
            }
            Ok(out)
        })
    }

    /// Number of documents whose winner is not deleted
    pub fn document_count(&self) -> Result<u64> {
        self.read(|txn| revs::document_count(txn.connection()))
    }

    /// Highest sequence assigned so far
    pub fn last_sequence(&self) -> Result<u64> {
        self.read(|txn| revs::last_sequence(txn.connection()))
    }

    /// Documents changed after `since`, at most `limit` of them (0 means the
    /// default page size), ordered by their latest sequence.
    pub fn changes(&self, since: u64, limit: usize) -> Result<Changes> {
        let limit = if limit == 0 { DEFAULT_CHANGES_LIMIT } else { limit };
        self.read(|txn| {
            let conn = txn.connection();
            let changed = revs::changed_documents(conn, since, limit)?;
            let mut last_sequence = since;
            let mut results = Vec::with_capacity(changed.len());
            for (numeric, sequence) in changed {
                last_sequence = last_sequence.max(sequence);
                if let Some(current) = revs::current_revision_by_numeric_id(conn, numeric)? {
                    results.push(txn.with_attachments(current)?);
                }
            }
            Ok(Changes {
                last_sequence,
                results,
            })
        })
    }

    /// Ids of documents with more than one non-deleted leaf
    pub fn conflicted_document_ids(&self) -> Result<Vec<String>> {
        self.read(|txn| revs::conflicted_document_ids(txn.connection()))
    }

    /// Which of the requested revisions are missing locally.
    ///
    /// Documents with nothing missing are left out of the result.
    pub fn revs_diff(
        &self,
        requested: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        // One placeholder goes to the document id.
        let chunk = self.config.query_placeholder_limit.saturating_sub(1).max(1);
        self.read(|txn| {
            let mut missing = BTreeMap::new();
            for (doc_id, rev_ids) in requested {
                let wanted: Vec<String> = rev_ids.iter().cloned().collect();
                let mut absent: BTreeSet<String> = rev_ids.clone();
                for ids in wanted.chunks(chunk) {
                    for present in revs::present_revision_ids(txn.connection(), doc_id, ids)? {
                        absent.remove(&present);
                    }
                }
                if !absent.is_empty() {
                    missing.insert(doc_id.clone(), absent);
                }
            }
            Ok(missing)
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Stream an attachment to a temp file outside any transaction.
    pub fn prepare_attachment(&self, attachment: UnsavedAttachment) -> Result<PreparedAttachment> {
        self.blobs.prepare(attachment)
    }

    fn prepare_input(&self, input: RevisionInput) -> Result<RevisionInput> {
        let RevisionInput {
            body,
            attachments,
            removed,
        } = input;
        let attachments = attachments
            .into_iter()
            .map(|a| match a {
                Attachment::Unsaved(unsaved) => Ok(Attachment::Prepared(self.blobs.prepare(unsaved)?)),
                other => Ok(other),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RevisionInput {
            body,
            attachments,
            removed,
        })
    }

    /// Create a document (or resurrect a deleted one). See
    /// [`Transaction::create_document`].
    pub fn create_document(&self, doc_id: Option<&str>, input: RevisionInput) -> Result<Revision> {
        let input = self.prepare_input(input)?;
        self.transaction(|txn| txn.create_document(doc_id, input))
    }

    /// Update the current revision. See [`Transaction::update_document`].
    pub fn update_document(&self, doc_id: &str, prev_rev: &RevId, input: RevisionInput) -> Result<Revision> {
        let input = self.prepare_input(input)?;
        self.transaction(|txn| txn.update_document(doc_id, prev_rev, input))
    }

    /// Tombstone one leaf. See [`Transaction::delete_document_revision`].
    pub fn delete_document_revision(&self, doc_id: &str, prev_rev: &RevId) -> Result<Revision> {
        self.transaction(|txn| txn.delete_document_revision(doc_id, prev_rev))
    }

    /// Tombstone every live leaf of a document
    pub fn delete_document(&self, doc_id: &str) -> Result<Vec<Revision>> {
        self.transaction(|txn| txn.delete_document(doc_id))
    }

    /// Graft one remote revision. Inline attachment data is decoded and
    /// streamed before the transaction opens.
    pub fn force_insert(&self, mut item: ForceInsertItem) -> Result<ForceInsertOutcome> {
        item.validate()?;
        item.prepare_inline(&self.blobs)?;
        self.transaction(|txn| txn.force_insert(item))
    }

    /// Graft several revisions, each in its own transaction.
    ///
    /// Stops at the first failure; items before it stay committed.
    pub fn force_insert_batch(&self, items: Vec<ForceInsertItem>) -> Result<Vec<ForceInsertOutcome>> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            outcomes.push(self.force_insert(item)?);
        }
        Ok(outcomes)
    }

    /// Let `resolver` settle a conflicted document.
    ///
    /// The resolver sees a snapshot of every leaf. A resolver error or
    /// [`Resolution::NoDecision`] leaves the document unchanged and returns
    /// `Ok(None)`, as does a document without conflicts.
    ///
    /// # Errors
    ///
    /// `Conflict` when the leaves changed between the snapshot and the write.
    pub fn resolve_conflicts<R>(&self, doc_id: &str, resolver: &R) -> Result<Option<Revision>>
    where
        R: ConflictResolver + ?Sized,
    {
        let snapshot = self.read(|txn| {
            let tree = txn.revision_tree(doc_id)?;
            if !tree.has_conflicts() {
                return Ok(None);
            }
            tree.leaves()
                .into_iter()
                .map(|leaf| txn.with_attachments(leaf.clone()))
                .collect::<Result<Vec<_>>>()
                .map(Some)
        })?;
        let Some(leaves) = snapshot else {
            return Ok(None);
        };

        let resolution = match resolver.resolve(doc_id, &leaves) {
            Ok(Resolution::NoDecision) => return Ok(None),
            Ok(Resolution::Graft(input)) => Resolution::Graft(self.prepare_input(input)?),
            Ok(keep) => keep,
            Err(e) => {
                warn!(target: "revstore::revs", doc_id, error = %e, "Conflict resolver failed");
                return Ok(None);
            }
        };
        let expected: BTreeSet<String> = leaves.iter().map(|r| r.rev_id.to_string()).collect();
        self.transaction(|txn| txn.apply_resolution(doc_id, &expected, resolution))
    }

    /// Reclaim space: clear bodies of superseded revisions, drop their
    /// attachment rows, delete unreferenced blobs, then `VACUUM`.
    ///
    /// Leaf bodies are always kept.
    pub fn compact(&self) -> Result<CompactionStats> {
        let (bodies_cleared, attachment_rows_removed) = self.transaction(|txn| {
            let conn = txn.connection();
            let bodies = revs::compact_bodies(conn)?;
            let rows = attachments::delete_for_compacted_revisions(conn)?;
            Ok((bodies, rows))
        })?;
        let blobs = self.read(|txn| self.blobs.purge(txn.connection()))?;

        {
            let guard = self.conn.lock();
            let conn = guard.as_ref().ok_or(Error::Closed)?;
            conn.execute_batch("VACUUM").context("vacuuming database")?;
        }

        info!(
            target: "revstore::db",
            bodies_cleared,
            attachment_rows_removed,
            blobs_removed = blobs.removed,
            blobs_retained = blobs.retained,
            "Compaction complete"
        );
        Ok(CompactionStats {
            bodies_cleared,
            attachment_rows_removed,
            blobs,
        })
    }

    // ========================================================================
    // Local documents
    // ========================================================================

    /// Insert or replace a local (non-replicated) document
    pub fn put_local_document(&self, doc_id: &str, body: &DocumentBody) -> Result<LocalDocument> {
        validate_local_document_id(doc_id)?;
        self.transaction(|txn| {
            local::put(txn.connection(), doc_id, body)?;
            Ok(LocalDocument {
                doc_id: doc_id.to_string(),
                body: body.clone(),
            })
        })
    }

    /// Read a local document
    pub fn get_local_document(&self, doc_id: &str) -> Result<LocalDocument> {
        self.read(|txn| local::get(txn.connection(), doc_id)?.ok_or_else(|| Error::not_found(doc_id)))
    }

    /// Delete a local document
    pub fn delete_local_document(&self, doc_id: &str) -> Result<()> {
        self.transaction(|txn| {
            if local::delete(txn.connection(), doc_id)? {
                Ok(())
            } else {
                Err(Error::not_found(doc_id))
            }
        })
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    /// Attachment rows of a revision
    pub fn attachments_for_revision(&self, revision: &Revision) -> Result<Vec<SavedAttachment>> {
        self.read(|txn| attachments::for_sequence(txn.connection(), revision.sequence))
    }

    /// One attachment of a specific revision
    pub fn get_attachment(&self, doc_id: &str, rev_id: &RevId, name: &str) -> Result<Option<SavedAttachment>> {
        self.read(|txn| {
            let revision = txn.get_document_revision(doc_id, rev_id)?;
            attachments::get(txn.connection(), revision.sequence, name)
        })
    }

    /// Stored bytes of an attachment (still gzip-encoded if it was stored so)
    pub fn read_attachment(&self, attachment: &SavedAttachment) -> Result<Vec<u8>> {
        self.blobs.read(attachment)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Receive document events published after each commit
    pub fn subscribe(&self) -> Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close the connection and release the directory lock.
    ///
    /// Every later call fails with [`Error::Closed`]. Closing twice is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        let Some(conn) = conn else {
            return Ok(());
        };
        let closed = conn
            .close()
            .map_err(|(_, e)| Error::storage(format!("closing database: {}", e)));
        self.lock_file.lock().take();
        if let Some(path) = &self.data_dir {
            registry::forget(path, self as *const Database);
        }
        info!(target: "revstore::db", path = ?self.data_dir, "Closed database");
        closed
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(path) = &self.data_dir {
            registry::forget(path, self as *const Database);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> DocumentBody {
        DocumentBody::from_value(value).unwrap()
    }

    // ========================================================================
    // Singleton Registry Tests
    // ========================================================================

    #[test]
    fn test_open_same_path_returns_same_instance() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("singleton_test");

        let db1 = Database::open(&db_path).unwrap();
        let db2 = Database::open(&db_path).unwrap();

        assert!(Arc::ptr_eq(&db1, &db2));
    }

    #[test]
    fn test_open_different_paths_returns_different_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db1 = Database::open(temp_dir.path().join("db1")).unwrap();
        let db2 = Database::open(temp_dir.path().join("db2")).unwrap();
        assert!(!Arc::ptr_eq(&db1, &db2));
    }

    #[test]
    fn test_ephemeral_not_registered() {
        let db1 = Database::ephemeral().unwrap();
        let db2 = Database::ephemeral().unwrap();
        assert!(!Arc::ptr_eq(&db1, &db2));
        assert!(db1.is_ephemeral());
        assert!(db1.data_dir().is_none());
    }

    #[test]
    fn test_drop_removes_registry_entry() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("dropped");
        let db = Database::open(&db_path).unwrap();
        let canonical = db.data_dir().unwrap().to_path_buf();
        drop(db);
        assert!(!OPEN_DATABASES.lock().contains_key(&canonical));
    }

    // ========================================================================
    // Config Tests
    // ========================================================================

    #[test]
    fn test_open_creates_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("config_test");

        let db = Database::open(&db_path).unwrap();

        assert!(!db.is_ephemeral());
        assert!(db_path.join(CONFIG_FILE_NAME).exists());
        assert!(db_path.join(DB_FILE_NAME).exists());
        assert!(db_path.join("attachments").is_dir());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("bad_config");
        std::fs::create_dir_all(&db_path).unwrap();
        std::fs::write(db_path.join(CONFIG_FILE_NAME), "durability = \"turbo\"\n").unwrap();

        assert!(Database::open(&db_path).is_err());
    }

    #[test]
    fn test_open_with_config_persists_settings() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("explicit");
        let cfg = DatabaseConfig {
            durability: "always".into(),
            attachments_dir: "blobs".into(),
            ..DatabaseConfig::default()
        };
        let db = Database::open_with_config(&db_path, cfg.clone()).unwrap();
        assert!(db.attachments_dir().ends_with("blobs"));
        db.close().unwrap();

        let reopened = Database::open(&db_path).unwrap();
        assert_eq!(reopened.config(), &cfg);
    }

    // ========================================================================
    // Lifecycle Tests
    // ========================================================================

    #[test]
    fn test_closed_database_rejects_calls() {
        let db = Database::ephemeral().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.document_count(), Err(Error::Closed)));
        assert!(matches!(
            db.create_document(None, RevisionInput::new(DocumentBody::empty())),
            Err(Error::Closed)
        ));
        // idempotent
        db.close().unwrap();
    }

    #[test]
    fn test_lock_file_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("locked");
        let db = Database::open(&db_path).unwrap();

        let other = File::open(db_path.join(LOCK_FILE_NAME)).unwrap();
        assert!(fs2::FileExt::try_lock_exclusive(&other).is_err());

        db.close().unwrap();
        assert!(fs2::FileExt::try_lock_exclusive(&other).is_ok());
    }

    #[test]
    fn test_reopen_after_close_keeps_data_and_identifier() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("reopen");

        let db = Database::open(&db_path).unwrap();
        let id = db.public_identifier().unwrap();
        db.create_document(Some("doc1"), RevisionInput::new(body(json!({"a": 1}))))
            .unwrap();
        db.close().unwrap();

        let reopened = Database::open(&db_path).unwrap();
        assert!(!Arc::ptr_eq(&db, &reopened));
        assert_eq!(reopened.public_identifier().unwrap(), id);
        assert_eq!(reopened.get_document("doc1").unwrap().body.get("a"), Some(&json!(1)));
    }

    // ========================================================================
    // Transaction Tests
    // ========================================================================

    #[test]
    fn test_transaction_aborts_on_closure_error() {
        let db = Database::ephemeral().unwrap();
        let result: Result<()> = db.transaction(|txn| {
            txn.create_document(Some("doc1"), RevisionInput::new(DocumentBody::empty()))?;
            Err(Error::illegal_argument("abort"))
        });
        assert!(matches!(result, Err(Error::IllegalArgument(_))));
        assert!(!db.contains_document("doc1").unwrap());
        assert_eq!(db.last_sequence().unwrap(), 0);
    }

    #[test]
    fn test_events_published_only_after_commit() {
        let db = Database::ephemeral().unwrap();
        let events = db.subscribe();

        let _: Result<()> = db.transaction(|txn| {
            txn.create_document(Some("gone"), RevisionInput::new(DocumentBody::empty()))?;
            assert_eq!(txn.pending_events().len(), 1);
            Err(Error::illegal_argument("abort"))
        });
        assert!(events.try_recv().is_err());

        db.create_document(Some("kept"), RevisionInput::new(DocumentBody::empty()))
            .unwrap();
        let event = events.try_recv().unwrap();
        assert!(matches!(event, DocumentEvent::Created { .. }));
        assert_eq!(event.doc_id(), "kept");
    }

    #[test]
    fn test_local_documents() {
        let db = Database::ephemeral().unwrap();
        db.put_local_document("_local/cp", &body(json!({"seq": 1})))
            .unwrap();
        db.put_local_document("_local/cp", &body(json!({"seq": 2})))
            .unwrap();
        assert_eq!(
            db.get_local_document("_local/cp").unwrap().body.get("seq"),
            Some(&json!(2))
        );
        // local documents never show up in the change feed
        assert_eq!(db.last_sequence().unwrap(), 0);

        db.delete_local_document("_local/cp").unwrap();
        assert!(db.get_local_document("_local/cp").unwrap_err().is_not_found());
        assert!(db.delete_local_document("_local/cp").unwrap_err().is_not_found());
    }
}
