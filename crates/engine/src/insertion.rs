//! Local edits: create, update and delete
//!
//! Each operation runs inside the caller's [`Transaction`]; on error the
//! whole transaction is rolled back by `Database::transaction`, so no
//! partially inserted revision or attachment row survives.

use crate::transaction::Transaction;
use crate::winner;
use revstore_core::{
    generate_document_id, validate_document_id, DocumentBody, DocumentEvent, Error, Result, RevId,
    Revision,
};
use revstore_storage::{revs, Attachment, NewRevision};
use std::collections::BTreeSet;
use tracing::debug;

const TOMBSTONE_JSON: &[u8] = b"{}";

/// Content of a new revision, built in one go.
///
/// ```ignore
/// let input = RevisionInput::new(body)
///     .with_attachment(UnsavedAttachment::from_bytes("a.txt", "text/plain", bytes))
///     .without_attachment("old.png");
/// ```
#[derive(Debug, Default)]
pub struct RevisionInput {
    /// JSON body
    pub body: DocumentBody,
    /// Attachments added or replaced by this revision
    pub attachments: Vec<Attachment>,
    /// Names of parent attachments to drop
    pub removed: BTreeSet<String>,
}

impl RevisionInput {
    /// Input with only a body
    pub fn new(body: DocumentBody) -> Self {
        RevisionInput {
            body,
            attachments: Vec::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Add or replace an attachment
    pub fn with_attachment(mut self, attachment: impl Into<Attachment>) -> Self {
        self.attachments.push(attachment.into());
        self
    }

    /// Drop an attachment inherited from the parent
    pub fn without_attachment(mut self, name: impl Into<String>) -> Self {
        self.removed.insert(name.into());
        self
    }
}

impl Transaction<'_> {
    /// Create a document, or resurrect one whose current revision is a
    /// tombstone. A missing `doc_id` is generated.
    ///
    /// # Errors
    ///
    /// `DocumentAlreadyExists` when the current revision is live.
    pub fn create_document(&mut self, doc_id: Option<&str>, input: RevisionInput) -> Result<Revision> {
        let doc_id = match doc_id {
            Some(id) => {
                validate_document_id(id)?;
                id.to_string()
            }
            None => generate_document_id(),
        };
        input.body.validate()?;
        let json = input.body.to_bytes()?;
        let conn = self.connection();

        // Only the current leaf's deleted flag decides between create and
        // resurrect; other branches are not consulted.
        let (numeric, tombstone) = match revs::doc_numeric_id(conn, &doc_id)? {
            None => (revs::insert_doc_id(conn, &doc_id)?, None),
            Some(numeric) => match revs::current_revision_by_numeric_id(conn, numeric)? {
                Some(current) if !current.deleted => {
                    return Err(Error::DocumentAlreadyExists(doc_id));
                }
                current => (numeric, current),
            },
        };

        let rev_id = match &tombstone {
            Some(t) => t.rev_id.next()?,
            None => RevId::first(),
        };
        if let Some(t) = &tombstone {
            revs::set_current(conn, t.sequence, false)?;
        }
        let sequence = revs::insert_revision(
            conn,
            &NewRevision {
                doc_numeric_id: numeric,
                rev_id: &rev_id,
                parent: tombstone.as_ref().map(|t| t.sequence),
                current: true,
                deleted: false,
                available: true,
                json: Some(json.as_slice()),
            },
        )?;
        self.apply_attachments(None, sequence, rev_id.generation(), input.attachments, &BTreeSet::new())?;
        winner::pick_winner(conn, numeric)?;

        let revision = self.load_revision(sequence)?;
        debug!(
            target: "revstore::revs",
            doc_id = %revision.doc_id,
            rev_id = %revision.rev_id,
            sequence,
            resurrected = tombstone.is_some(),
            "Created document"
        );
        self.emit(DocumentEvent::Created {
            revision: revision.clone(),
        });
        Ok(revision)
    }

    /// Add a child to the current revision `prev_rev`.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if `prev_rev` is unknown or a tombstone;
    /// `Conflict` if it exists but is not the current revision.
    pub fn update_document(
        &mut self,
        doc_id: &str,
        prev_rev: &RevId,
        input: RevisionInput,
    ) -> Result<Revision> {
        input.body.validate()?;
        let json = input.body.to_bytes()?;
        let conn = self.connection();

        let previous = revs::revision(conn, doc_id, prev_rev)?
            .ok_or_else(|| Error::revision_not_found(doc_id, prev_rev))?;
        if previous.deleted {
            return Err(Error::revision_not_found(doc_id, prev_rev));
        }
        if !previous.current {
            return Err(Error::conflict(
                doc_id,
                format!("revision {} is not the current revision", prev_rev),
            ));
        }

        let rev_id = previous.rev_id.next()?;
        revs::set_current(conn, previous.sequence, false)?;
        let sequence = revs::insert_revision(
            conn,
            &NewRevision {
                doc_numeric_id: previous.doc_numeric_id,
                rev_id: &rev_id,
                parent: Some(previous.sequence),
                current: true,
                deleted: false,
                available: true,
                json: Some(json.as_slice()),
            },
        )?;
        self.apply_attachments(
            Some(previous.sequence),
            sequence,
            rev_id.generation(),
            input.attachments,
            &input.removed,
        )?;

        let previous = self.with_attachments(previous)?;
        let revision = self.load_revision(sequence)?;
        debug!(
            target: "revstore::revs",
            doc_id,
            rev_id = %revision.rev_id,
            sequence,
            "Updated document"
        );
        self.emit(DocumentEvent::Updated {
            previous,
            revision: revision.clone(),
        });
        Ok(revision)
    }

    /// Tombstone the leaf `prev_rev`. Deleting a losing conflict leaf is
    /// allowed and leaves the winner untouched.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if `prev_rev` is unknown or already deleted;
    /// `Conflict` if it has children.
    pub fn delete_document_revision(&mut self, doc_id: &str, prev_rev: &RevId) -> Result<Revision> {
        let conn = self.connection();
        let previous = revs::revision(conn, doc_id, prev_rev)?
            .ok_or_else(|| Error::revision_not_found(doc_id, prev_rev))?;
        if !revs::is_leaf(conn, previous.sequence)? {
            return Err(Error::conflict(
                doc_id,
                format!("revision {} is not a leaf", prev_rev),
            ));
        }
        if previous.deleted {
            return Err(Error::revision_not_found(doc_id, prev_rev));
        }

        let sequence = self.insert_tombstone(&previous, previous.current)?;
        winner::pick_winner(conn, previous.doc_numeric_id)?;

        let previous = self.with_attachments(previous)?;
        let revision = self.load_revision(sequence)?;
        debug!(
            target: "revstore::revs",
            doc_id,
            rev_id = %revision.rev_id,
            sequence,
            "Deleted revision"
        );
        self.emit(DocumentEvent::Deleted {
            previous,
            revision: revision.clone(),
        });
        Ok(revision)
    }

    /// Tombstone every live leaf of a document.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if the document is unknown or has no live leaf.
    pub fn delete_document(&mut self, doc_id: &str) -> Result<Vec<Revision>> {
        let conn = self.connection();
        let numeric = revs::doc_numeric_id(conn, doc_id)?.ok_or_else(|| Error::not_found(doc_id))?;
        let live = revs::leaves(conn, numeric, false)?;
        if live.is_empty() {
            return Err(Error::not_found(doc_id));
        }

        let mut tombstones = Vec::with_capacity(live.len());
        for leaf in &live {
            tombstones.push(self.insert_tombstone(leaf, leaf.current)?);
        }
        winner::pick_winner(conn, numeric)?;

        let mut deleted = Vec::with_capacity(live.len());
        for (previous, sequence) in live.into_iter().zip(tombstones) {
            let previous = self.with_attachments(previous)?;
            let revision = self.load_revision(sequence)?;
            self.emit(DocumentEvent::Deleted {
                previous,
                revision: revision.clone(),
            });
            deleted.push(revision);
        }
        debug!(target: "revstore::revs", doc_id, leaves = deleted.len(), "Deleted document");
        Ok(deleted)
    }

    /// Insert a deleted child of `leaf`, clearing the leaf's current flag.
    pub(crate) fn insert_tombstone(&mut self, leaf: &Revision, current: bool) -> Result<u64> {
        let conn = self.connection();
        let rev_id = leaf.rev_id.next()?;
        if leaf.current {
            revs::set_current(conn, leaf.sequence, false)?;
        }
        revs::insert_revision(
            conn,
            &NewRevision {
                doc_numeric_id: leaf.doc_numeric_id,
                rev_id: &rev_id,
                parent: Some(leaf.sequence),
                current,
                deleted: true,
                available: false,
                json: Some(TOMBSTONE_JSON),
            },
        )
    }
}
