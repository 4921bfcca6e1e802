//! `attachments` metadata rows
//!
//! A row ties an attachment name on one revision to a blob key. Rows are
//! never updated in place: unchanged attachments are copied forward to the
//! child revision's sequence and keep pointing at the same blob.

use crate::sql::{seq_from_sql, seq_to_sql, SqlContext};
use revstore_core::{BlobKey, Encoding, Error, Result, SavedAttachment};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

const ATTACHMENT_COLUMNS: &str =
    "sequence, filename, key, type, encoding, length, encoded_length, revpos";

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<SavedAttachment> {
    let key_bytes: Vec<u8> = row.get(2)?;
    let key = BlobKey::from_slice(&key_bytes).map_err(|e| crate::sql::conversion_error(2, e))?;
    let encoding = Encoding::from_i64(row.get(4)?).map_err(|e| crate::sql::conversion_error(4, e))?;
    let content_type: Option<String> = row.get(3)?;
    Ok(SavedAttachment {
        sequence: seq_from_sql(row.get(0)?),
        name: row.get(1)?,
        key,
        content_type: content_type.unwrap_or_default(),
        encoding,
        length: row.get::<_, i64>(5)? as u64,
        encoded_length: row.get::<_, i64>(6)? as u64,
        revpos: row.get::<_, i64>(7)? as u64,
    })
}

/// Write the metadata row for `attachment`, replacing any row with the same
/// `(sequence, name)`.
pub fn insert(conn: &Connection, attachment: &SavedAttachment) -> Result<()> {
    let sequence = seq_to_sql(attachment.sequence);
    conn.prepare_cached("DELETE FROM attachments WHERE sequence = ?1 AND filename = ?2")
        .context("replacing attachment row")?
        .execute(params![sequence, attachment.name])
        .context("replacing attachment row")?;
    conn.prepare_cached(
        "INSERT INTO attachments \
         (sequence, filename, key, type, encoding, length, encoded_length, revpos) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .context("inserting attachment row")?
    .execute(params![
        sequence,
        attachment.name,
        attachment.key.as_bytes(),
        attachment.content_type,
        attachment.encoding.as_i64(),
        attachment.length as i64,
        attachment.encoded_length as i64,
        attachment.revpos as i64,
    ])
    .context("inserting attachment row")?;
    Ok(())
}

/// Copy metadata rows from `from` to `to`.
///
/// With `name`, exactly that attachment is copied and a missing source row
/// is an [`Error::AttachmentNotSaved`]. Without it, every attachment of
/// `from` is copied. Returns the number of rows written.
pub fn copy_forward(conn: &Connection, from: u64, to: u64, name: Option<&str>) -> Result<usize> {
    let copied = match name {
        Some(name) => {
            conn.prepare_cached("DELETE FROM attachments WHERE sequence = ?1 AND filename = ?2")
                .context("copying attachment")?
                .execute(params![seq_to_sql(to), name])
                .context("copying attachment")?;
            conn.prepare_cached(
                "INSERT INTO attachments \
                 (sequence, filename, key, type, encoding, length, encoded_length, revpos) \
                 SELECT ?1, filename, key, type, encoding, length, encoded_length, revpos \
                 FROM attachments WHERE sequence = ?2 AND filename = ?3",
            )
            .context("copying attachment")?
            .execute(params![seq_to_sql(to), seq_to_sql(from), name])
            .context("copying attachment")?
        }
        None => conn
            .prepare_cached(
                "INSERT OR REPLACE INTO attachments \
                 (sequence, filename, key, type, encoding, length, encoded_length, revpos) \
                 SELECT ?1, filename, key, type, encoding, length, encoded_length, revpos \
                 FROM attachments WHERE sequence = ?2",
            )
            .context("copying attachments")?
            .execute(params![seq_to_sql(to), seq_to_sql(from)])
            .context("copying attachments")?,
    };
    if let Some(name) = name {
        if copied == 0 {
            return Err(Error::attachment_not_saved(format!(
                "attachment '{}' not found on sequence {}",
                name, from
            )));
        }
    }
    Ok(copied)
}

/// Attachments of one revision, ordered by name
pub fn for_sequence(conn: &Connection, sequence: u64) -> Result<Vec<SavedAttachment>> {
    let sql = format!(
        "SELECT {} FROM attachments WHERE sequence = ?1 ORDER BY filename",
        ATTACHMENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql).context("listing attachments")?;
    let rows = stmt
        .query_map(params![seq_to_sql(sequence)], attachment_from_row)
        .context("listing attachments")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("listing attachments")
}

/// One attachment of one revision
pub fn get(conn: &Connection, sequence: u64, name: &str) -> Result<Option<SavedAttachment>> {
    let sql = format!(
        "SELECT {} FROM attachments WHERE sequence = ?1 AND filename = ?2",
        ATTACHMENT_COLUMNS
    );
    conn.prepare_cached(&sql)
        .context("reading attachment")?
        .query_row(params![seq_to_sql(sequence), name], attachment_from_row)
        .optional()
        .context("reading attachment")
}

/// Delete rows of revisions whose bodies were compacted away
pub fn delete_for_compacted_revisions(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM attachments WHERE sequence IN \
         (SELECT sequence FROM revs WHERE json IS NULL AND available = 0)",
        [],
    )
    .context("deleting attachments of compacted revisions")
}

/// Every blob key still referenced by a metadata row
pub fn referenced_keys(conn: &Connection) -> Result<HashSet<BlobKey>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT key FROM attachments")
        .context("listing attachment keys")?;
    let rows = stmt
        .query_map([], |row| {
            let bytes: Vec<u8> = row.get(0)?;
            BlobKey::from_slice(&bytes).map_err(|e| crate::sql::conversion_error(0, e))
        })
        .context("listing attachment keys")?;
    rows.collect::<rusqlite::Result<HashSet<_>>>()
        .context("listing attachment keys")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revs::{insert_doc_id, insert_revision, NewRevision};
    use crate::schema;
    use revstore_core::RevId;

    fn setup() -> (Connection, u64, u64) {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::configure(&conn, schema::Synchronous::Normal, false).unwrap();
        schema::migrate(&mut conn).unwrap();
        let doc = insert_doc_id(&conn, "doc1").unwrap();
        let r1 = RevId::parse("1-a").unwrap();
        let r2 = RevId::parse("2-b").unwrap();
        let s1 = insert_revision(
            &conn,
            &NewRevision {
                doc_numeric_id: doc,
                rev_id: &r1,
                parent: None,
                current: false,
                deleted: false,
                available: true,
                json: Some(&b"{}"[..]),
            },
        )
        .unwrap();
        let s2 = insert_revision(
            &conn,
            &NewRevision {
                doc_numeric_id: doc,
                rev_id: &r2,
                parent: Some(s1),
                current: true,
                deleted: false,
                available: true,
                json: Some(&b"{}"[..]),
            },
        )
        .unwrap();
        (conn, s1, s2)
    }

    fn saved(sequence: u64, name: &str, fill: u8) -> SavedAttachment {
        SavedAttachment {
            name: name.to_string(),
            sequence,
            key: BlobKey::new([fill; 20]),
            content_type: "text/plain".to_string(),
            encoding: Encoding::Plain,
            length: 3,
            encoded_length: 3,
            revpos: 1,
        }
    }

    #[test]
    fn test_insert_and_read() {
        let (conn, s1, _) = setup();
        insert(&conn, &saved(s1, "a.txt", 1)).unwrap();
        let got = get(&conn, s1, "a.txt").unwrap().unwrap();
        assert_eq!(got, saved(s1, "a.txt", 1));

        // same name replaces
        insert(&conn, &saved(s1, "a.txt", 2)).unwrap();
        assert_eq!(for_sequence(&conn, s1).unwrap().len(), 1);
        assert_eq!(get(&conn, s1, "a.txt").unwrap().unwrap().key, BlobKey::new([2; 20]));
    }

    #[test]
    fn test_copy_forward_all_and_named() {
        let (conn, s1, s2) = setup();
        insert(&conn, &saved(s1, "a.txt", 1)).unwrap();
        insert(&conn, &saved(s1, "b.txt", 2)).unwrap();

        assert_eq!(copy_forward(&conn, s1, s2, None).unwrap(), 2);
        let names: Vec<String> = for_sequence(&conn, s2)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(referenced_keys(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_copy_forward_missing_name_fails() {
        let (conn, s1, s2) = setup();
        let err = copy_forward(&conn, s1, s2, Some("nope")).unwrap_err();
        assert!(matches!(err, Error::AttachmentNotSaved(_)));
    }
}
