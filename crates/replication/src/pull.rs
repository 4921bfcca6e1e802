//! Pull replication: remote peer into a local store
//!
//! Each batch:
//! 1. read the remote change feed from the last checkpoint
//! 2. ask the local store which leaf revisions it is missing
//! 3. fetch those revisions with full history and inline attachments
//! 4. force-insert them one at a time, each in its own transaction
//! 5. record the batch's `last_sequence` as the new checkpoint
//!
//! Cancellation is checked before every document and every revision. A
//! cancelled batch keeps what it already inserted but does not move the
//! checkpoint, so the next run fetches the batch again and finds those
//! revisions present.

use crate::checkpoint::{self, Direction};
use crate::config::{ReplicationConfig, ReplicationStats};
use crate::remote::RemoteDatabase;
use revstore_core::Result;
use revstore_engine::Database;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Copies revisions from a [`RemoteDatabase`] into a local [`Database`]
pub struct PullReplication<R: RemoteDatabase> {
    source: R,
    target: Arc<Database>,
    config: ReplicationConfig,
    cancel: Arc<AtomicBool>,
}

impl<R: RemoteDatabase> PullReplication<R> {
    /// Pull from `source` into `target`
    pub fn new(source: R, target: Arc<Database>, config: ReplicationConfig) -> Self {
        PullReplication {
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

    /// The flag [`PullReplication::run`] polls; set it from any thread
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Ask a running replication to stop after the current revision
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Identifier of this (source, target) pull
    pub fn replication_id(&self) -> Result<String> {
        checkpoint::replication_id(
            &self.source.identifier()?,
            &self.target.public_identifier()?,
            Direction::Pull,
        )
    }

    /// Run until the remote feed is drained or cancellation is requested.
    pub fn run(&self) -> Result<ReplicationStats> {
        self.config.validate()?;
        let name = self.config.name.as_str();
        let replication_id = self.replication_id()?;
        let mut since = checkpoint::read(&self.target, &replication_id)?.unwrap_or(0);
        let mut stats = ReplicationStats::default();
        info!(target: "revstore::replication", name, since, "Pull replication started");

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
                "Pull batch started"
            );

            let missing = self.target.revs_diff(&changes.open_revisions())?;
            for (doc_id, rev_ids) in &missing {
                if self.is_cancelled() {
                    stats.cancelled = true;
                    break 'batches;
                }
                for revision in self.source.open_revisions(doc_id, rev_ids)? {
                    if self.is_cancelled() {
                        stats.cancelled = true;
                        break 'batches;
                    }
                    let rev_id = revision.rev_id.clone();
                    let outcome = self.target.force_insert(revision.into_item()?)?;
                    if !outcome.is_noop() {
                        stats.revisions_transferred += 1;
                    }
                    debug!(target: "revstore::replication", doc_id = %doc_id, rev_id = %rev_id, ?outcome, "Pulled revision");
                }
            }

            if let Err(e) = checkpoint::write(&self.target, &replication_id, changes.last_sequence) {
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
            "Pull replication finished"
        );
        Ok(stats)
    }
}
