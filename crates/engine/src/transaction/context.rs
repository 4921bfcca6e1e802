//! Transaction handle passed to `Database::transaction` closures

use crate::tree::RevisionTree;
use revstore_core::{BlobKey, DocumentEvent, Error, Result, RevId, Revision, SavedAttachment};
use revstore_storage::{attachments, revs, BlobStore, PreparedAttachment};
use rusqlite::Connection;

/// Handle to one open unit of work.
///
/// Borrowed from the database for the duration of a `transaction` or `read`
/// closure. Writes become visible to other callers only when the closure
/// returns `Ok` and the commit succeeds; events are buffered until then.
pub struct Transaction<'a> {
    conn: &'a Connection,
    blobs: &'a BlobStore,
    pending_events: Vec<DocumentEvent>,
    created_blobs: Vec<BlobKey>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(conn: &'a Connection, blobs: &'a BlobStore) -> Self {
        Transaction {
            conn,
            blobs,
            pending_events: Vec::new(),
            created_blobs: Vec::new(),
        }
    }

    /// The underlying connection, inside the open transaction
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    pub(crate) fn blobs(&self) -> &'a BlobStore {
        self.blobs
    }

    pub(crate) fn emit(&mut self, event: DocumentEvent) {
        self.pending_events.push(event);
    }

    /// Buffered events and the blob files this unit of work created
    pub(crate) fn into_parts(self) -> (Vec<DocumentEvent>, Vec<BlobKey>) {
        (self.pending_events, self.created_blobs)
    }

    /// Store a prepared attachment on `sequence`, remembering a newly
    /// created blob file so a rollback can remove it.
    pub(crate) fn commit_attachment(
        &mut self,
        prepared: PreparedAttachment,
        sequence: u64,
        revpos: u64,
    ) -> Result<SavedAttachment> {
        let committed = self.blobs.commit(self.conn, prepared, sequence, revpos)?;
        if committed.created_blob {
            self.created_blobs.push(committed.saved.key);
        }
        Ok(committed.saved)
    }

    /// Events buffered so far
    pub fn pending_events(&self) -> &[DocumentEvent] {
        &self.pending_events
    }

    // ========== Reads ==========

    /// Reload a revision by sequence, attachments included.
    pub(crate) fn load_revision(&self, sequence: u64) -> Result<Revision> {
        let revision = revs::revision_by_sequence(self.conn, sequence)?.ok_or_else(|| {
            Error::storage(format!("revision with sequence {} vanished", sequence))
        })?;
        self.with_attachments(revision)
    }

    pub(crate) fn with_attachments(&self, revision: Revision) -> Result<Revision> {
        let saved = attachments::for_sequence(self.conn, revision.sequence)?;
        Ok(revision.with_attachments(saved))
    }

    /// Current revision of a document, attachments included
    pub fn get_document(&self, doc_id: &str) -> Result<Revision> {
        let revision =
            revs::current_revision(self.conn, doc_id)?.ok_or_else(|| Error::not_found(doc_id))?;
        self.with_attachments(revision)
    }

    /// A specific revision, attachments included
    pub fn get_document_revision(&self, doc_id: &str, rev_id: &RevId) -> Result<Revision> {
        let revision = revs::revision(self.conn, doc_id, rev_id)?
            .ok_or_else(|| Error::revision_not_found(doc_id, rev_id))?;
        self.with_attachments(revision)
    }

    /// Rebuild the full revision forest of a document
    pub fn revision_tree(&self, doc_id: &str) -> Result<RevisionTree> {
        let numeric = revs::doc_numeric_id(self.conn, doc_id)?
            .ok_or_else(|| Error::not_found(doc_id))?;
        RevisionTree::from_revisions(doc_id, revs::all_revisions(self.conn, numeric)?)
    }
}
