//! Document change notifications
//!
//! Events are buffered while a write transaction runs and delivered to
//! subscribers only once it has committed.

use crate::revision::Revision;

/// A committed change to one document
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// First live revision of a document (including resurrection)
    Created {
        /// The new revision
        revision: Revision,
    },
    /// New revision added on top of an existing one
    Updated {
        /// The revision that was current before the write
        previous: Revision,
        /// The new revision
        revision: Revision,
    },
    /// Tombstone added
    Deleted {
        /// The revision that was deleted
        previous: Revision,
        /// The tombstone
        revision: Revision,
    },
}

impl DocumentEvent {
    /// The revision written by this change
    pub fn revision(&self) -> &Revision {
        match self {
            DocumentEvent::Created { revision }
            | DocumentEvent::Updated { revision, .. }
            | DocumentEvent::Deleted { revision, .. } => revision,
        }
    }

    /// Document id
    pub fn doc_id(&self) -> &str {
        &self.revision().doc_id
    }
}
