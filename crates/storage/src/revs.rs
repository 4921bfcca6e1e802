//! Row-level access to `docs` and `revs`
//!
//! Every function takes a `&Connection` so it can run against a plain
//! connection or inside a `rusqlite::Transaction` (which derefs to one).
//! None of these functions open transactions themselves; atomicity is the
//! caller's responsibility.

use crate::sql::{conversion_error, placeholders, seq_from_sql, seq_to_sql, SqlContext};
use revstore_core::{DocumentBody, Result, RevId, Revision};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const REVISION_COLUMNS: &str = "docs.docid, docs.doc_id, revs.revid, revs.sequence, \
     revs.current, revs.deleted, revs.parent, revs.json, revs.available";

fn revision_from_row(row: &Row<'_>) -> rusqlite::Result<Revision> {
    let rev_text: String = row.get(2)?;
    let rev_id = RevId::parse(&rev_text).map_err(|e| conversion_error(2, e))?;
    let json: Option<Vec<u8>> = row.get(7)?;
    let body = match json {
        Some(bytes) => DocumentBody::from_bytes(&bytes).map_err(|e| conversion_error(7, e))?,
        None => DocumentBody::empty(),
    };
    let parent: Option<i64> = row.get(6)?;
    Ok(Revision {
        doc_id: row.get(0)?,
        doc_numeric_id: row.get(1)?,
        rev_id,
        sequence: seq_from_sql(row.get(3)?),
        current: row.get(4)?,
        deleted: row.get(5)?,
        parent: parent.map(seq_from_sql),
        body,
        available: row.get(8)?,
        attachments: BTreeMap::new(),
    })
}

fn query_revisions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    what: &str,
) -> Result<Vec<Revision>> {
    let mut stmt = conn.prepare_cached(sql).context(what)?;
    let rows = stmt.query_map(params, revision_from_row).context(what)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().context(what)
}

fn query_revision<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    what: &str,
) -> Result<Option<Revision>> {
    conn.prepare_cached(sql)
        .context(what)?
        .query_row(params, revision_from_row)
        .optional()
        .context(what)
}

// ========== docs ==========

/// Surrogate key of a document, if it has ever been written
pub fn doc_numeric_id(conn: &Connection, doc_id: &str) -> Result<Option<i64>> {
    conn.prepare_cached("SELECT doc_id FROM docs WHERE docid = ?1")
        .context("looking up document id")?
        .query_row(params![doc_id], |row| row.get(0))
        .optional()
        .context("looking up document id")
}

/// Allocate a surrogate key for a new document
pub fn insert_doc_id(conn: &Connection, doc_id: &str) -> Result<i64> {
    conn.execute("INSERT INTO docs (docid) VALUES (?1)", params![doc_id])
        .context("inserting document id")?;
    Ok(conn.last_insert_rowid())
}

// ========== revs: writes ==========

/// Row to insert into `revs`
#[derive(Debug, Clone, Copy)]
pub struct NewRevision<'a> {
    /// Owning document
    pub doc_numeric_id: i64,
    /// Revision id
    pub rev_id: &'a RevId,
    /// Parent sequence (`None` for a root)
    pub parent: Option<u64>,
    /// Winning-leaf flag
    pub current: bool,
    /// Tombstone flag
    pub deleted: bool,
    /// False for stubs
    pub available: bool,
    /// Encoded body, `None` for stubs
    pub json: Option<&'a [u8]>,
}

/// Insert a revision row and return its freshly allocated sequence
pub fn insert_revision(conn: &Connection, rev: &NewRevision<'_>) -> Result<u64> {
    conn.prepare_cached(
        "INSERT INTO revs (doc_id, parent, current, deleted, available, revid, json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .context("inserting revision")?
    .execute(params![
        rev.doc_numeric_id,
        rev.parent.map(seq_to_sql),
        rev.current,
        rev.deleted,
        rev.available,
        rev.rev_id.to_string(),
        rev.json,
    ])
    .context("inserting revision")?;
    Ok(seq_from_sql(conn.last_insert_rowid()))
}

/// Set or clear the `current` flag of one revision
pub fn set_current(conn: &Connection, sequence: u64, current: bool) -> Result<()> {
    conn.prepare_cached("UPDATE revs SET current = ?1 WHERE sequence = ?2")
        .context("updating current flag")?
        .execute(params![current, seq_to_sql(sequence)])
        .context("updating current flag")?;
    Ok(())
}

/// Clear `current` on every revision of a document except `keep`
pub fn clear_current_except(conn: &Connection, doc_numeric_id: i64, keep: u64) -> Result<usize> {
    conn.prepare_cached(
        "UPDATE revs SET current = 0 WHERE doc_id = ?1 AND sequence != ?2 AND current = 1",
    )
    .context("clearing current flags")?
    .execute(params![doc_numeric_id, seq_to_sql(keep)])
    .context("clearing current flags")
}

/// Give a stub row its real body
pub fn materialize(conn: &Connection, sequence: u64, json: &[u8]) -> Result<()> {
    conn.prepare_cached("UPDATE revs SET json = ?1, available = 1 WHERE sequence = ?2")
        .context("materializing stub revision")?
        .execute(params![json, seq_to_sql(sequence)])
        .context("materializing stub revision")?;
    Ok(())
}

/// Drop bodies of revisions that are neither leaves nor current.
///
/// Returns the number of revisions compacted.
pub fn compact_bodies(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE revs SET json = NULL, available = 0 \
         WHERE current = 0 AND json IS NOT NULL \
         AND sequence IN (SELECT parent FROM revs WHERE parent IS NOT NULL)",
        [],
    )
    .context("compacting revision bodies")
}

// ========== revs: reads ==========

/// Current revision of a document by id
pub fn current_revision(conn: &Connection, doc_id: &str) -> Result<Option<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE docs.docid = ?1 AND revs.doc_id = docs.doc_id \
         AND revs.current = 1 ORDER BY revs.sequence DESC LIMIT 1",
        REVISION_COLUMNS
    );
    query_revision(conn, &sql, params![doc_id], "fetching current revision")
}

/// Current revision of a document by surrogate key
pub fn current_revision_by_numeric_id(
    conn: &Connection,
    doc_numeric_id: i64,
) -> Result<Option<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE revs.doc_id = ?1 AND revs.doc_id = docs.doc_id \
         AND revs.current = 1 ORDER BY revs.sequence DESC LIMIT 1",
        REVISION_COLUMNS
    );
    query_revision(conn, &sql, params![doc_numeric_id], "fetching current revision")
}

/// A specific revision. When the same id appears in two disconnected trees
/// the most recently inserted row wins.
pub fn revision(conn: &Connection, doc_id: &str, rev_id: &RevId) -> Result<Option<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE docs.docid = ?1 AND revs.doc_id = docs.doc_id \
         AND revs.revid = ?2 ORDER BY revs.sequence DESC LIMIT 1",
        REVISION_COLUMNS
    );
    query_revision(
        conn,
        &sql,
        params![doc_id, rev_id.to_string()],
        "fetching revision",
    )
}

/// Revision by sequence
pub fn revision_by_sequence(conn: &Connection, sequence: u64) -> Result<Option<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE revs.sequence = ?1 AND revs.doc_id = docs.doc_id",
        REVISION_COLUMNS
    );
    query_revision(
        conn,
        &sql,
        params![seq_to_sql(sequence)],
        "fetching revision by sequence",
    )
}

/// Every revision of a document in sequence order
pub fn all_revisions(conn: &Connection, doc_numeric_id: i64) -> Result<Vec<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE revs.doc_id = ?1 AND revs.doc_id = docs.doc_id \
         ORDER BY revs.sequence ASC",
        REVISION_COLUMNS
    );
    query_revisions(conn, &sql, params![doc_numeric_id], "fetching all revisions")
}

/// Leaves of a document's forest in sequence order.
pub fn leaves(conn: &Connection, doc_numeric_id: i64, include_deleted: bool) -> Result<Vec<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE revs.doc_id = ?1 AND revs.doc_id = docs.doc_id \
         AND (?2 OR revs.deleted = 0) \
         AND revs.sequence NOT IN \
             (SELECT parent FROM revs WHERE doc_id = ?1 AND parent IS NOT NULL) \
         ORDER BY revs.sequence ASC",
        REVISION_COLUMNS
    );
    query_revisions(
        conn,
        &sql,
        params![doc_numeric_id, include_deleted],
        "fetching leaf revisions",
    )
}

/// True if no revision names `sequence` as its parent
pub fn is_leaf(conn: &Connection, sequence: u64) -> Result<bool> {
    let has_child: bool = conn
        .prepare_cached("SELECT EXISTS (SELECT 1 FROM revs WHERE parent = ?1)")
        .context("checking for child revisions")?
        .query_row(params![seq_to_sql(sequence)], |row| row.get(0))
        .context("checking for child revisions")?;
    Ok(!has_child)
}

/// Highest sequence ever assigned, 0 for an empty store
pub fn last_sequence(conn: &Connection) -> Result<u64> {
    let max: Option<i64> = conn
        .query_row("SELECT MAX(sequence) FROM revs", [], |row| row.get(0))
        .context("reading last sequence")?;
    Ok(max.map(seq_from_sql).unwrap_or(0))
}

/// Number of documents whose current revision is not deleted
pub fn document_count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT doc_id) FROM revs WHERE current = 1 AND deleted = 0",
            [],
            |row| row.get(0),
        )
        .context("counting documents")?;
    Ok(count as u64)
}

/// Documents changed after `since`, as `(doc_numeric_id, last_sequence)`
/// ordered by their latest sequence, at most `limit` entries.
pub fn changed_documents(conn: &Connection, since: u64, limit: usize) -> Result<Vec<(i64, u64)>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT doc_id, MAX(sequence) AS last FROM revs \
             GROUP BY doc_id HAVING last > ?1 ORDER BY last ASC LIMIT ?2",
        )
        .context("querying changes")?;
    let rows = stmt
        .query_map(params![seq_to_sql(since), limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, seq_from_sql(row.get(1)?)))
        })
        .context("querying changes")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("querying changes")
}

/// Current non-deleted revisions ordered by sequence
pub fn all_documents(
    conn: &Connection,
    offset: usize,
    limit: usize,
    descending: bool,
) -> Result<Vec<Revision>> {
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE revs.doc_id = docs.doc_id \
         AND revs.current = 1 AND revs.deleted = 0 \
         ORDER BY revs.sequence {} LIMIT ?1 OFFSET ?2",
        REVISION_COLUMNS,
        if descending { "DESC" } else { "ASC" }
    );
    query_revisions(
        conn,
        &sql,
        params![limit as i64, offset as i64],
        "listing documents",
    )
}

/// Ids of every document whose current revision is not deleted
pub fn all_document_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT docs.docid FROM revs, docs WHERE revs.doc_id = docs.doc_id \
             AND revs.current = 1 AND revs.deleted = 0 ORDER BY docs.docid",
        )
        .context("listing document ids")?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .context("listing document ids")?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .context("listing document ids")
}

/// Current revisions (deleted ones included) for a batch of ids.
///
/// `doc_ids.len()` must stay under the placeholder limit.
pub fn current_revisions_for_ids(conn: &Connection, doc_ids: &[String]) -> Result<Vec<Revision>> {
    if doc_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM revs, docs WHERE revs.doc_id = docs.doc_id AND revs.current = 1 \
         AND docs.docid IN ({}) ORDER BY revs.sequence ASC",
        REVISION_COLUMNS,
        placeholders(doc_ids.len())
    );
    let mut stmt = conn.prepare(&sql).context("fetching documents by id")?;
    let rows = stmt
        .query_map(params_from_iter(doc_ids.iter()), revision_from_row)
        .context("fetching documents by id")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("fetching documents by id")
}

/// Ids of documents with more than one non-deleted leaf
pub fn conflicted_document_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT docs.docid FROM revs, docs WHERE revs.doc_id = docs.doc_id \
             AND revs.deleted = 0 \
             AND revs.sequence NOT IN (SELECT parent FROM revs WHERE parent IS NOT NULL) \
             GROUP BY docs.docid HAVING COUNT(*) > 1 ORDER BY docs.docid",
        )
        .context("listing conflicted documents")?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .context("listing conflicted documents")?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .context("listing conflicted documents")
}

/// Which of `rev_ids` exist locally for `doc_id`.
///
/// The caller is responsible for keeping `rev_ids.len() + 1` under the
/// placeholder limit.
pub fn present_revision_ids(
    conn: &Connection,
    doc_id: &str,
    rev_ids: &[String],
) -> Result<Vec<String>> {
    if rev_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT revs.revid FROM revs, docs WHERE docs.docid = ? AND revs.doc_id = docs.doc_id \
         AND revs.revid IN ({})",
        placeholders(rev_ids.len())
    );
    let mut stmt = conn.prepare(&sql).context("diffing revisions")?;
    let bound = std::iter::once(doc_id).chain(rev_ids.iter().map(String::as_str));
    let rows = stmt
        .query_map(params_from_iter(bound), |row| row.get(0))
        .context("diffing revisions")?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .context("diffing revisions")
}
