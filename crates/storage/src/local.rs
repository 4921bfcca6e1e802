//! `localdocs`: single-version documents that never replicate

use crate::sql::SqlContext;
use revstore_core::{DocumentBody, LocalDocument, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Insert or replace a local document
pub fn put(conn: &Connection, doc_id: &str, body: &DocumentBody) -> Result<()> {
    let json = body.to_bytes()?;
    conn.execute(
        "INSERT OR REPLACE INTO localdocs (docid, json) VALUES (?1, ?2)",
        params![doc_id, json],
    )
    .context("writing local document")?;
    Ok(())
}

/// Read a local document
pub fn get(conn: &Connection, doc_id: &str) -> Result<Option<LocalDocument>> {
    let json: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT json FROM localdocs WHERE docid = ?1",
            params![doc_id],
            |row| row.get(0),
        )
        .optional()
        .context("reading local document")?;
    match json {
        Some(bytes) => Ok(Some(LocalDocument {
            doc_id: doc_id.to_string(),
            body: DocumentBody::from_bytes(&bytes.unwrap_or_default())?,
        })),
        None => Ok(None),
    }
}

/// Delete a local document; returns false if it did not exist
pub fn delete(conn: &Connection, doc_id: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM localdocs WHERE docid = ?1", params![doc_id])
        .context("deleting local document")?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use serde_json::json;

    #[test]
    fn test_put_get_delete() {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::migrate(&mut conn).unwrap();

        let body = DocumentBody::from_value(json!({"last_sequence": 5})).unwrap();
        put(&conn, "_local/checkpoint", &body).unwrap();
        let doc = get(&conn, "_local/checkpoint").unwrap().unwrap();
        assert_eq!(doc.body, body);

        let replaced = DocumentBody::from_value(json!({"last_sequence": 9})).unwrap();
        put(&conn, "_local/checkpoint", &replaced).unwrap();
        assert_eq!(get(&conn, "_local/checkpoint").unwrap().unwrap().body, replaced);

        assert!(delete(&conn, "_local/checkpoint").unwrap());
        assert!(!delete(&conn, "_local/checkpoint").unwrap());
        assert!(get(&conn, "_local/checkpoint").unwrap().is_none());
    }
}
