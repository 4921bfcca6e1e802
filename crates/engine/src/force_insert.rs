//! Grafting remote revisions (force-insert)
//!
//! The replicator hands over a revision together with its ancestry, oldest
//! first. Ids are dictated by the remote peer and never regenerated. The
//! history is matched against the local forest from its first id forward;
//! at the point of divergence the remaining ancestors are inserted as stub
//! rows (`available = false`, no body) and the revision itself as a real
//! leaf. Winner selection then runs over all leaves.
//!
//! When the first history id is unknown locally the whole history becomes a
//! new, disconnected tree of the same document.

use crate::transaction::Transaction;
use crate::tree::RevisionTree;
use crate::winner;
use base64::Engine as _;
use revstore_core::{
    validate_document_id, AttachmentStub, DocumentBody, DocumentEvent, Error, Result, RevId,
};
use revstore_storage::{
    attachments, revs, BlobStore, NewRevision, PreparedAttachment, UnsavedAttachment,
};
use std::collections::BTreeMap;
use tracing::debug;

/// One remote revision to graft
#[derive(Debug)]
pub struct ForceInsertItem {
    /// Document id
    pub doc_id: String,
    /// Revision id of the leaf; must equal the last history entry
    pub rev_id: RevId,
    /// Tombstone flag of the leaf
    pub deleted: bool,
    /// Leaf body
    pub body: DocumentBody,
    /// Ancestry, oldest first, ending with `rev_id`
    pub history: Vec<RevId>,
    /// Attachment metadata as declared by the remote
    pub attachments: BTreeMap<String, AttachmentStub>,
    /// Non-stub entries of `attachments` carry base64 data
    pub pull_attachments_inline: bool,
    /// Attachments already streamed to temp files
    pub prepared_attachments: Vec<PreparedAttachment>,
}

impl ForceInsertItem {
    /// Live revision with no attachments
    pub fn new(doc_id: impl Into<String>, history: Vec<RevId>, body: DocumentBody) -> Result<Self> {
        let rev_id = history
            .last()
            .cloned()
            .ok_or_else(|| Error::illegal_argument("revision history must not be empty"))?;
        Ok(ForceInsertItem {
            doc_id: doc_id.into(),
            rev_id,
            deleted: false,
            body,
            history,
            attachments: BTreeMap::new(),
            pull_attachments_inline: false,
            prepared_attachments: Vec::new(),
        })
    }

    /// Mark the leaf as a tombstone
    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// Declare attachments. `inline` means non-stub entries carry data.
    pub fn with_attachments(mut self, attachments: BTreeMap<String, AttachmentStub>, inline: bool) -> Self {
        self.attachments = attachments;
        self.pull_attachments_inline = inline;
        self
    }

    /// Reject malformed input before any write happens.
    pub fn validate(&self) -> Result<()> {
        validate_document_id(&self.doc_id)?;
        let last = self
            .history
            .last()
            .ok_or_else(|| Error::illegal_argument("revision history must not be empty"))?;
        if last != &self.rev_id {
            return Err(Error::illegal_argument(format!(
                "revision {} is not the last entry of its history (found {})",
                self.rev_id, last
            )));
        }
        for pair in self.history.windows(2) {
            if pair[1].generation() != pair[0].generation() + 1 {
                return Err(Error::illegal_argument(format!(
                    "history of {} skips or repeats a generation: {} then {}",
                    self.doc_id, pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }

    /// Decode inline attachment data and stream it into temp files.
    ///
    /// Must run before the write transaction opens. Afterwards
    /// `attachments` holds only stubs.
    pub fn prepare_inline(&mut self, blobs: &BlobStore) -> Result<()> {
        if !self.pull_attachments_inline {
            return Ok(());
        }
        let inline: Vec<String> = self
            .attachments
            .iter()
            .filter(|(_, stub)| !stub.stub)
            .map(|(name, _)| name.clone())
            .collect();
        for name in inline {
            let Some(stub) = self.attachments.remove(&name) else {
                continue;
            };
            let data = stub.data.as_deref().ok_or_else(|| {
                Error::illegal_argument(format!("attachment '{}' is neither a stub nor inline", name))
            })?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| Error::illegal_argument(format!("attachment '{}': {}", name, e)))?;
            let prepared = blobs.prepare(UnsavedAttachment {
                name,
                content_type: stub.content_type,
                encoding: stub.encoding,
                source: Box::new(std::io::Cursor::new(bytes)),
                length: Some(stub.length),
                revpos: Some(stub.revpos),
            })?;
            self.prepared_attachments.push(prepared);
        }
        Ok(())
    }
}

/// What a force-insert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceInsertOutcome {
    /// New rows were added; `sequence` is the leaf's
    Inserted {
        /// Sequence of the new leaf
        sequence: u64,
    },
    /// A known stub received its body
    Materialized {
        /// Sequence of the stub row
        sequence: u64,
    },
    /// Every history id was already present
    AlreadyPresent,
}

impl ForceInsertOutcome {
    /// Sequence written, if anything was written
    pub fn sequence(&self) -> Option<u64> {
        match self {
            ForceInsertOutcome::Inserted { sequence }
            | ForceInsertOutcome::Materialized { sequence } => Some(*sequence),
            ForceInsertOutcome::AlreadyPresent => None,
        }
    }

    /// True when nothing was written
    pub fn is_noop(&self) -> bool {
        matches!(self, ForceInsertOutcome::AlreadyPresent)
    }
}

impl Transaction<'_> {
    /// Graft a remote revision and its history into the local forest.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for a malformed item (checked before any write) or
    /// for inline attachment data that was not prepared beforehand;
    /// `AttachmentNotSaved` when a stub attachment has nothing to copy from.
    pub fn force_insert(&mut self, item: ForceInsertItem) -> Result<ForceInsertOutcome> {
        item.validate()?;
        if let Some((name, _)) = item.attachments.iter().find(|(_, stub)| !stub.stub) {
            return Err(Error::illegal_argument(format!(
                "inline attachment '{}' must be prepared before the transaction starts",
                name
            )));
        }

        let ForceInsertItem {
            doc_id,
            rev_id,
            deleted,
            body,
            history,
            attachments: stubs,
            prepared_attachments,
            ..
        } = item;
        let json = body.to_bytes()?;
        let conn = self.connection();

        let Some(numeric) = revs::doc_numeric_id(conn, &doc_id)? else {
            let numeric = revs::insert_doc_id(conn, &doc_id)?;
            let leaf = self.insert_history(numeric, None, &history, deleted, &json)?;
            self.attach_to_leaf(leaf, rev_id.generation(), &stubs, prepared_attachments, None)?;
            winner::pick_winner(conn, numeric)?;
            let revision = self.load_revision(leaf)?;
            debug!(target: "revstore::revs", doc_id = %doc_id, rev_id = %rev_id, sequence = leaf, "Force-inserted new document");
            self.emit(DocumentEvent::Created { revision });
            return Ok(ForceInsertOutcome::Inserted { sequence: leaf });
        };

        let previous_winner = revs::current_revision_by_numeric_id(conn, numeric)?;
        let tree = RevisionTree::from_revisions(&doc_id, revs::all_revisions(conn, numeric)?)?;

        let leaf = match tree.lookup(&doc_id, &history[0]) {
            None => self.insert_history(numeric, None, &history, deleted, &json)?,
            Some(start) => {
                let mut parent = start;
                let mut matched = 1;
                while matched < history.len() {
                    match tree.lookup_child(parent.sequence, &history[matched]) {
                        Some(child) => {
                            parent = child;
                            matched += 1;
                        }
                        None => break,
                    }
                }

                if matched == history.len() {
                    if parent.is_stub() && !deleted {
                        let sequence = parent.sequence;
                        revs::materialize(conn, sequence, &json)?;
                        self.attach_to_leaf(
                            sequence,
                            rev_id.generation(),
                            &stubs,
                            prepared_attachments,
                            previous_winner.as_ref().map(|r| r.sequence),
                        )?;
                        winner::pick_winner(conn, numeric)?;
                        let revision = self.load_revision(sequence)?;
                        debug!(target: "revstore::revs", doc_id = %doc_id, rev_id = %rev_id, sequence, "Materialized stub revision");
                        self.emit(match previous_winner {
                            Some(previous) => DocumentEvent::Updated { previous, revision },
                            None => DocumentEvent::Created { revision },
                        });
                        return Ok(ForceInsertOutcome::Materialized { sequence });
                    }
                    debug!(target: "revstore::revs", doc_id = %doc_id, rev_id = %rev_id, "Revision already present");
                    return Ok(ForceInsertOutcome::AlreadyPresent);
                }

                if history[matched].generation() != parent.rev_id.generation() + 1 {
                    return Err(Error::illegal_argument(format!(
                        "revision {} cannot be a child of {} in '{}'",
                        history[matched], parent.rev_id, doc_id
                    )));
                }
                // A former leaf that gains a child can no longer be current.
                if parent.current {
                    revs::set_current(conn, parent.sequence, false)?;
                }
                self.insert_history(numeric, Some(parent.sequence), &history[matched..], deleted, &json)?
            }
        };

        self.attach_to_leaf(
            leaf,
            rev_id.generation(),
            &stubs,
            prepared_attachments,
            previous_winner.as_ref().map(|r| r.sequence),
        )?;
        winner::pick_winner(conn, numeric)?;

        let revision = self.load_revision(leaf)?;
        debug!(target: "revstore::revs", doc_id = %doc_id, rev_id = %rev_id, sequence = leaf, "Force-inserted revision");
        self.emit(match previous_winner {
            Some(previous) if revision.deleted => DocumentEvent::Deleted { previous, revision },
            Some(previous) => DocumentEvent::Updated { previous, revision },
            None => DocumentEvent::Created { revision },
        });
        Ok(ForceInsertOutcome::Inserted { sequence: leaf })
    }

    /// Insert `ids` as a chain under `parent`: stubs for all but the last,
    /// then the real leaf. Returns the leaf's sequence.
    fn insert_history(
        &mut self,
        doc_numeric_id: i64,
        parent: Option<u64>,
        ids: &[RevId],
        deleted: bool,
        json: &[u8],
    ) -> Result<u64> {
        let conn = self.connection();
        let (leaf_id, ancestors) = ids
            .split_last()
            .ok_or_else(|| Error::illegal_argument("revision history must not be empty"))?;
        let mut parent = parent;
        for id in ancestors {
            let stub = revs::insert_revision(
                conn,
                &NewRevision {
                    doc_numeric_id,
                    rev_id: id,
                    parent,
                    current: false,
                    deleted: false,
                    available: false,
                    json: None,
                },
            )?;
            parent = Some(stub);
        }
        revs::insert_revision(
            conn,
            &NewRevision {
                doc_numeric_id,
                rev_id: leaf_id,
                parent,
                current: false,
                deleted,
                available: !deleted,
                json: Some(json),
            },
        )
    }

    fn attach_to_leaf(
        &mut self,
        leaf: u64,
        generation: u64,
        stubs: &BTreeMap<String, AttachmentStub>,
        prepared: Vec<PreparedAttachment>,
        previous_winner: Option<u64>,
    ) -> Result<()> {
        let conn = self.connection();
        for name in stubs.keys() {
            let from = previous_winner.ok_or_else(|| {
                Error::attachment_not_saved(format!(
                    "stub attachment '{}' has no local revision to copy from",
                    name
                ))
            })?;
            attachments::copy_forward(conn, from, leaf, Some(name))?;
        }
        for attachment in prepared {
            self.commit_attachment(attachment, leaf, generation)?;
        }
        Ok(())
    }
}
