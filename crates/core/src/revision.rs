//! Revision value types

use crate::attachment::SavedAttachment;
use crate::body::DocumentBody;
use crate::rev_id::RevId;
use std::collections::BTreeMap;

/// One node of a document's revision tree, as stored in the `revs` table.
///
/// Revisions are values: the store never mutates a `Revision` handed out to
/// a caller. `attachments` is only populated by reads that ask for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    /// Document id
    pub doc_id: String,
    /// Revision id
    pub rev_id: RevId,
    /// Global sequence assigned at insert
    pub sequence: u64,
    /// Parent sequence, `None` for roots
    pub parent: Option<u64>,
    /// Surrogate key of the owning document
    pub doc_numeric_id: i64,
    /// Winning leaf flag
    pub current: bool,
    /// Tombstone flag
    pub deleted: bool,
    /// False for stubs (no body) and compacted revisions
    pub available: bool,
    /// JSON body
    pub body: DocumentBody,
    /// Attachments by name
    pub attachments: BTreeMap<String, SavedAttachment>,
}

impl Revision {
    /// Generation of the revision id
    pub fn generation(&self) -> u64 {
        self.rev_id.generation()
    }

    /// Placeholder row inserted to keep a grafted history connected
    pub fn is_stub(&self) -> bool {
        !self.available && !self.deleted
    }

    /// Attach loaded attachment rows
    pub fn with_attachments(mut self, attachments: Vec<SavedAttachment>) -> Self {
        self.attachments = attachments
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        self
    }
}

/// One page of the change feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    /// Highest sequence covered by this page (or the requested `since`)
    pub last_sequence: u64,
    /// Current revision of each changed document, in sequence order
    pub results: Vec<Revision>,
}

impl Changes {
    /// Number of documents in the page
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when nothing changed after `since`
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Document ids in feed order
    pub fn doc_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.doc_id.as_str()).collect()
    }
}

/// Non-replicated single-version document
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument {
    /// Local document id
    pub doc_id: String,
    /// JSON body
    pub body: DocumentBody,
}
