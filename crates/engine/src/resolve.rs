//! Conflict resolution
//!
//! A resolver looks at the leaves of a conflicted document and either picks
//! one of them, supplies a merged body, or declines. Applying the decision
//! tombstones every other live leaf so the document ends up with exactly
//! one live leaf.

use crate::insertion::RevisionInput;
use crate::transaction::Transaction;
use revstore_core::{DocumentEvent, Error, Result, RevId, Revision};
use revstore_storage::{revs, NewRevision};
use std::collections::BTreeSet;
use tracing::debug;

/// Decision returned by a [`ConflictResolver`]
#[derive(Debug)]
pub enum Resolution {
    /// Keep this leaf as the winner
    Keep(RevId),
    /// Write a new revision as a child of the current winner
    Graft(RevisionInput),
    /// Leave the document conflicted
    NoDecision,
}

/// Chooses how a conflicted document should be resolved.
///
/// Called outside the write transaction with a snapshot of the leaves
/// (deleted leaves included, ordered by sequence). Closures implement it.
pub trait ConflictResolver {
    /// Decide for one document
    fn resolve(&self, doc_id: &str, leaves: &[Revision]) -> Result<Resolution>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&str, &[Revision]) -> Result<Resolution>,
{
    fn resolve(&self, doc_id: &str, leaves: &[Revision]) -> Result<Resolution> {
        self(doc_id, leaves)
    }
}

impl Transaction<'_> {
    /// Apply a resolver decision taken against the leaf set `expected`.
    ///
    /// Returns the new winner, or `None` for [`Resolution::NoDecision`].
    ///
    /// # Errors
    ///
    /// `Conflict` if the leaves changed since the snapshot was taken;
    /// `IllegalArgument` if `Keep` names a revision that is not a leaf.
    pub fn apply_resolution(
        &mut self,
        doc_id: &str,
        expected: &BTreeSet<String>,
        resolution: Resolution,
    ) -> Result<Option<Revision>> {
        let conn = self.connection();
        let numeric = revs::doc_numeric_id(conn, doc_id)?.ok_or_else(|| Error::not_found(doc_id))?;
        let leaves = revs::leaves(conn, numeric, true)?;
        let actual: BTreeSet<String> = leaves.iter().map(|r| r.rev_id.to_string()).collect();
        if &actual != expected {
            return Err(Error::conflict(
                doc_id,
                "leaves changed while the conflict was being resolved",
            ));
        }
        let previous = leaves.iter().find(|r| r.current).cloned();

        let mut grafted_on = None;
        let winner = match resolution {
            Resolution::NoDecision => return Ok(None),
            Resolution::Keep(rev_id) => leaves
                .iter()
                .filter(|r| r.rev_id == rev_id)
                .max_by_key(|r| r.sequence)
                .map(|r| r.sequence)
                .ok_or_else(|| {
                    Error::illegal_argument(format!("revision {} is not a leaf of '{}'", rev_id, doc_id))
                })?,
            Resolution::Graft(input) => {
                let base = previous
                    .as_ref()
                    .ok_or_else(|| Error::storage(format!("document '{}' has no current revision", doc_id)))?;
                if base.deleted {
                    return Err(Error::conflict(doc_id, "current revision is deleted"));
                }
                input.body.validate()?;
                let json = input.body.to_bytes()?;
                let rev_id = base.rev_id.next()?;
                let sequence = revs::insert_revision(
                    conn,
                    &NewRevision {
                        doc_numeric_id: numeric,
                        rev_id: &rev_id,
                        parent: Some(base.sequence),
                        current: false,
                        deleted: false,
                        available: true,
                        json: Some(json.as_slice()),
                    },
                )?;
                self.apply_attachments(
                    Some(base.sequence),
                    sequence,
                    rev_id.generation(),
                    input.attachments,
                    &input.removed,
                )?;
                grafted_on = Some(base.sequence);
                sequence
            }
        };

        let mut tombstoned = Vec::new();
        for leaf in &leaves {
            if leaf.sequence == winner || Some(leaf.sequence) == grafted_on {
                continue;
            }
            if leaf.deleted {
                if leaf.current {
                    revs::set_current(conn, leaf.sequence, false)?;
                }
                continue;
            }
            let sequence = self.insert_tombstone(leaf, false)?;
            tombstoned.push((leaf.clone(), sequence));
        }
        revs::set_current(conn, winner, true)?;
        revs::clear_current_except(conn, numeric, winner)?;

        for (leaf, sequence) in tombstoned {
            let previous = self.with_attachments(leaf)?;
            let revision = self.load_revision(sequence)?;
            self.emit(DocumentEvent::Deleted { previous, revision });
        }
        let revision = self.load_revision(winner)?;
        if let Some(previous) = previous {
            if previous.sequence != winner {
                let previous = self.with_attachments(previous)?;
                self.emit(DocumentEvent::Updated {
                    previous,
                    revision: revision.clone(),
                });
            }
        }
        debug!(
            target: "revstore::revs",
            doc_id,
            rev_id = %revision.rev_id,
            sequence = winner,
            "Resolved conflicts"
        );
        Ok(Some(revision))
    }
}
