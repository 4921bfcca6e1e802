//! Push replication: local store out to a remote peer
//!
//! Mirrors [`crate::pull`]: walk the local change feed from the checkpoint
//! the remote holds, diff each document's leaves against the remote, send
//! the missing revisions one document at a time, then checkpoint on the
//! remote.

use crate::checkpoint::{self, Direction};
use crate::config::{ReplicationConfig, ReplicationStats};
use crate::remote::{RemoteDatabase, RemoteRevision};
use revstore_core::{Result, RevId};
use revstore_engine::{Database, RevisionTree};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Copies revisions from a local [`Database`] to a [`RemoteDatabase`]
pub struct PushReplication<R: RemoteDatabase> {
    source: Arc<Database>,
    target: R,
    config: ReplicationConfig,
    cancel: Arc<AtomicBool>,
}

impl<R: RemoteDatabase> PushReplication<R> {
    /// Push from `source` to `target`
    pub fn new(source: Arc<Database>, target: R, config: ReplicationConfig) -> Self {
        PushReplication {
            source,
            target,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an existing cancel flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The flag [`PushReplication::run`] polls
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Ask a running replication to stop after the current document
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Identifier of this (source, target) push
    pub fn replication_id(&self) -> Result<String> {
        checkpoint::replication_id(
            &self.source.public_identifier()?,
            &self.target.identifier()?,
            Direction::Push,
        )
    }

    /// Run until the local feed is drained or cancellation is requested.
    pub fn run(&self) -> Result<ReplicationStats> {
        self.config.validate()?;
        let name = self.config.name.as_str();
        let replication_id = self.replication_id()?;
        let mut since = self.target.get_checkpoint(&replication_id)?.unwrap_or(0);
        let mut stats = ReplicationStats::default();
        info!(target: "revstore::replication", name, since, "Push replication started");

        'batches: loop {
            if self.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let changes = self.source.changes(since, self.config.batch_size)?;
            if changes.results.is_empty() {
                break;
            }
            stats.batches += 1;
            stats.documents_checked += changes.results.len();
            info!(
                target: "revstore::replication",
                name,
                batch = stats.batches,
                changes = changes.results.len(),
                "Push batch started"
            );

            let mut trees: HashMap<String, RevisionTree> = HashMap::with_capacity(changes.len());
            let mut open_revisions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for revision in &changes.results {
                let tree = self.source.get_all_revisions_of_document(&revision.doc_id)?;
                open_revisions.insert(revision.doc_id.clone(), tree.leaf_revision_ids());
                trees.insert(revision.doc_id.clone(), tree);
            }

            let missing = self.target.revs_diff(&open_revisions)?;
            for (doc_id, rev_ids) in &missing {
                if self.is_cancelled() {
                    stats.cancelled = true;
                    break 'batches;
                }
                let Some(tree) = trees.get(doc_id) else {
                    continue;
                };
                let outgoing = self.collect(tree, doc_id, rev_ids)?;
                if outgoing.is_empty() {
                    continue;
                }
                let sent = outgoing.len();
                stats.revisions_transferred += self.target.bulk_insert(outgoing)?;
                debug!(target: "revstore::replication", doc_id = %doc_id, revisions = sent, "Pushed document");
            }

            if let Err(e) = self.target.put_checkpoint(&replication_id, changes.last_sequence) {
                warn!(
                    target: "revstore::replication",
                    name,
                    error = %e,
                    "Failed to save checkpoint; the next run restarts from the previous one"
                );
            }
            since = changes.last_sequence;
            if changes.results.len() < self.config.batch_size {
                break;
            }
        }

        info!(
            target: "revstore::replication",
            name,
            batches = stats.batches,
            transferred = stats.revisions_transferred,
            cancelled = stats.cancelled,
            "Push replication finished"
        );
        Ok(stats)
    }

    fn collect(
        &self,
        tree: &RevisionTree,
        doc_id: &str,
        rev_ids: &BTreeSet<String>,
    ) -> Result<Vec<RemoteRevision>> {
        let mut outgoing = Vec::with_capacity(rev_ids.len());
        for rev_id in rev_ids {
            let rev_id = RevId::parse(rev_id)?;
            match tree.lookup(doc_id, &rev_id) {
                Some(revision) if !revision.is_stub() => {
                    outgoing.push(RemoteRevision::from_local(&self.source, tree, revision)?);
                }
                _ => {
                    debug!(target: "revstore::replication", doc_id, rev_id = %rev_id, "Skipping revision without a body");
                }
            }
        }
        Ok(outgoing)
    }
}
