//! Winner selection ("pick winner of conflicts")
//!
//! The winner of a document is the highest-ranked non-deleted leaf, or the
//! highest-ranked leaf of any kind when every leaf is a tombstone. Rank is
//! [`RevId`] order: generation first, then the suffix compared as a string.
//! Insertion order and wall-clock time never matter, so two replicas with
//! the same leaves always agree.

use revstore_core::{Result, Revision};
use revstore_storage::revs;
use rusqlite::Connection;
use std::cmp::Ordering;
use tracing::trace;

/// Rank two leaves; `Greater` means `a` wins.
///
/// Identical revision ids (possible across disconnected trees) fall back to
/// the later sequence so the choice stays deterministic.
pub fn rank(a: &Revision, b: &Revision) -> Ordering {
    a.rev_id.cmp(&b.rev_id).then(a.sequence.cmp(&b.sequence))
}

/// Choose the winner among `leaves` without touching storage.
pub fn select_winner<'a, I>(leaves: I) -> Option<&'a Revision>
where
    I: IntoIterator<Item = &'a Revision>,
{
    let leaves: Vec<&Revision> = leaves.into_iter().collect();
    leaves
        .iter()
        .copied()
        .filter(|r| !r.deleted)
        .max_by(|a, b| rank(a, b))
        .or_else(|| leaves.iter().copied().max_by(|a, b| rank(a, b)))
}

/// Recompute the winner of one document and persist the `current` flags.
///
/// Returns the winning sequence, or `None` for a document with no leaves.
/// Running it twice over unchanged leaves is a no-op.
pub fn pick_winner(conn: &Connection, doc_numeric_id: i64) -> Result<Option<u64>> {
    let leaves = revs::leaves(conn, doc_numeric_id, true)?;
    let Some(winner) = select_winner(&leaves) else {
        return Ok(None);
    };
    let sequence = winner.sequence;
    revs::set_current(conn, sequence, true)?;
    revs::clear_current_except(conn, doc_numeric_id, sequence)?;
    trace!(
        target: "revstore::revs",
        doc_id = %winner.doc_id,
        rev_id = %winner.rev_id,
        leaves = leaves.len(),
        "Picked winning revision"
    );
    Ok(Some(sequence))
}
