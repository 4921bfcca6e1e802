//! The peer a replication talks to, and the shapes exchanged with it

use base64::Engine;
use revstore_core::{AttachmentStub, DocumentBody, Result, RevId, Revision};
use revstore_engine::{Database, ForceInsertItem, RevisionTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One document in a remote change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Document id
    pub doc_id: String,
    /// Sequence of the document's latest change
    pub sequence: u64,
    /// Every leaf revision id, deleted leaves included
    pub leaf_revs: Vec<RevId>,
    /// True if the winning revision is a tombstone
    pub deleted: bool,
}

/// A page of a remote change feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChanges {
    /// Sequence to resume from
    pub last_sequence: u64,
    /// Changed documents, oldest change first
    pub results: Vec<ChangeEntry>,
}

impl RemoteChanges {
    /// Leaf revision ids per document, the input of a `revs_diff`
    pub fn open_revisions(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut requested: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in &self.results {
            requested
                .entry(entry.doc_id.clone())
                .or_default()
                .extend(entry.leaf_revs.iter().map(RevId::to_string));
        }
        requested
    }
}

/// A revision as a peer sends it: body, ancestry and inline attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRevision {
    /// Document id
    pub doc_id: String,
    /// Revision id
    pub rev_id: RevId,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
    /// JSON body
    pub body: DocumentBody,
    /// Ancestry, oldest first, ending with `rev_id`
    pub history: Vec<RevId>,
    /// Attachments, inline or stubbed
    #[serde(default)]
    pub attachments: BTreeMap<String, AttachmentStub>,
}

impl RemoteRevision {
    /// Snapshot `revision` of a local store with every attachment inlined.
    pub fn from_local(db: &Database, tree: &RevisionTree, revision: &Revision) -> Result<Self> {
        let mut attachments = BTreeMap::new();
        for saved in db.attachments_for_revision(revision)? {
            let bytes = db.read_attachment(&saved)?;
            attachments.insert(
                saved.name.clone(),
                AttachmentStub {
                    content_type: saved.content_type.clone(),
                    revpos: saved.revpos,
                    length: saved.length,
                    encoding: saved.encoding,
                    stub: false,
                    data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                },
            );
        }
        Ok(RemoteRevision {
            doc_id: revision.doc_id.clone(),
            rev_id: revision.rev_id.clone(),
            deleted: revision.deleted,
            body: revision.body.clone(),
            history: tree.history(revision.sequence),
            attachments,
        })
    }

    /// Turn into a force-insert item. Non-stub attachments are decoded
    /// inline when the item is inserted.
    pub fn into_item(self) -> Result<ForceInsertItem> {
        let mut item = ForceInsertItem::new(self.doc_id, self.history, self.body)?
            .deleted(self.deleted)
            .with_attachments(self.attachments, true);
        // keep the claimed id so validation catches a history that ends elsewhere
        item.rev_id = self.rev_id;
        Ok(item)
    }
}

/// A replication peer.
///
/// Mirrors the handful of CouchDB endpoints replication needs. Inserts
/// follow `new_edits=false` semantics: revision ids and histories are
/// taken as given.
pub trait RemoteDatabase {
    /// Stable identifier used to derive replication ids
    fn identifier(&self) -> Result<String>;

    /// Documents changed after `since`, at most `limit` of them
    fn changes(&self, since: u64, limit: usize) -> Result<RemoteChanges>;

    /// Which of `requested` the peer is missing
    fn revs_diff(
        &self,
        requested: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>>;

    /// Full revisions of `doc_id`, with history and inline attachments.
    /// Ids the peer cannot serve are skipped.
    fn open_revisions(&self, doc_id: &str, rev_ids: &BTreeSet<String>) -> Result<Vec<RemoteRevision>>;

    /// Graft revisions; returns how many were not already present
    fn bulk_insert(&self, revisions: Vec<RemoteRevision>) -> Result<usize>;

    /// Last sequence recorded for `replication_id`, if any
    fn get_checkpoint(&self, replication_id: &str) -> Result<Option<u64>>;

    /// Record progress for `replication_id`
    fn put_checkpoint(&self, replication_id: &str, sequence: u64) -> Result<()>;
}
