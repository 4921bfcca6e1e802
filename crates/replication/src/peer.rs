//! A local store exposed as a replication peer

use crate::checkpoint;
use crate::remote::{ChangeEntry, RemoteChanges, RemoteDatabase, RemoteRevision};
use revstore_core::{Result, RevId};
use revstore_engine::Database;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Serves a [`Database`] through [`RemoteDatabase`] so two stores in the
/// same process can replicate with each other.
#[derive(Debug, Clone)]
pub struct LocalPeer {
    db: Arc<Database>,
}

impl LocalPeer {
    /// Wrap `db`
    pub fn new(db: Arc<Database>) -> Self {
        LocalPeer { db }
    }

    /// The wrapped store
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl RemoteDatabase for LocalPeer {
    fn identifier(&self) -> Result<String> {
        self.db.public_identifier()
    }

    fn changes(&self, since: u64, limit: usize) -> Result<RemoteChanges> {
        let changes = self.db.changes(since, limit)?;
        let mut results = Vec::with_capacity(changes.results.len());
        for revision in changes.results {
            let tree = self.db.get_all_revisions_of_document(&revision.doc_id)?;
            let leaf_revs = tree.leaves().into_iter().map(|r| r.rev_id.clone()).collect();
            results.push(ChangeEntry {
                doc_id: revision.doc_id,
                sequence: revision.sequence,
                leaf_revs,
                deleted: revision.deleted,
            });
        }
        Ok(RemoteChanges {
            last_sequence: changes.last_sequence,
            results,
        })
    }

    fn revs_diff(
        &self,
        requested: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.db.revs_diff(requested)
    }

    fn open_revisions(&self, doc_id: &str, rev_ids: &BTreeSet<String>) -> Result<Vec<RemoteRevision>> {
        let tree = self.db.get_all_revisions_of_document(doc_id)?;
        let mut out = Vec::with_capacity(rev_ids.len());
        for rev_id in rev_ids {
            let rev_id = RevId::parse(rev_id)?;
            match tree.lookup(doc_id, &rev_id) {
                Some(revision) if !revision.is_stub() => {
                    out.push(RemoteRevision::from_local(&self.db, &tree, revision)?);
                }
                _ => {
                    debug!(target: "revstore::replication", doc_id, rev_id = %rev_id, "No body to serve");
                }
            }
        }
        Ok(out)
    }

    fn bulk_insert(&self, revisions: Vec<RemoteRevision>) -> Result<usize> {
        let mut inserted = 0;
        for revision in revisions {
            if !self.db.force_insert(revision.into_item()?)?.is_noop() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn get_checkpoint(&self, replication_id: &str) -> Result<Option<u64>> {
        checkpoint::read(&self.db, replication_id)
    }

    fn put_checkpoint(&self, replication_id: &str, sequence: u64) -> Result<()> {
        checkpoint::write(&self.db, replication_id, sequence)
    }
}
