//! Schema and migrations
//!
//! The schema version is tracked in `PRAGMA user_version`. Each migration
//! runs in its own transaction and bumps the version on success, so a crash
//! midway leaves the database at the last fully applied version.

use crate::sql::SqlContext;
use revstore_core::Result;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

const SCHEMA_V1: &str = "
    CREATE TABLE docs (
        doc_id INTEGER PRIMARY KEY,
        docid TEXT UNIQUE NOT NULL);
    CREATE INDEX docs_docid ON docs(docid);
    CREATE TABLE revs (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id INTEGER NOT NULL REFERENCES docs(doc_id) ON DELETE CASCADE,
        parent INTEGER REFERENCES revs(sequence) ON DELETE SET NULL,
        current BOOLEAN NOT NULL DEFAULT 0,
        deleted BOOLEAN NOT NULL DEFAULT 0,
        available BOOLEAN NOT NULL DEFAULT 1,
        revid TEXT NOT NULL,
        json BLOB);
    CREATE INDEX revs_by_id ON revs(revid, doc_id);
    CREATE INDEX revs_current ON revs(doc_id, current);
    CREATE INDEX revs_parent ON revs(parent);
    CREATE TABLE localdocs (
        docid TEXT UNIQUE NOT NULL,
        json BLOB);
    CREATE TABLE attachments (
        sequence INTEGER NOT NULL REFERENCES revs(sequence) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        key BLOB NOT NULL,
        type TEXT,
        length INTEGER NOT NULL,
        revpos INTEGER DEFAULT 0,
        UNIQUE (sequence, filename));
    CREATE INDEX attachments_by_key ON attachments(key);
";

const SCHEMA_V2: &str = "
    CREATE TABLE info (
        key TEXT PRIMARY KEY,
        value TEXT);
";

const SCHEMA_V3: &str = "
    ALTER TABLE attachments ADD COLUMN encoding INTEGER DEFAULT 0;
    ALTER TABLE attachments ADD COLUMN encoded_length INTEGER DEFAULT 0;
";

const MIGRATIONS: &[&str] = &[SCHEMA_V1, SCHEMA_V2, SCHEMA_V3];

/// Schema version after all migrations ran
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

const PUBLIC_UUID_KEY: &str = "publicUUID";

/// Connection-level settings applied at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    /// `synchronous = NORMAL`
    Normal,
    /// `synchronous = FULL`
    Full,
}

impl Synchronous {
    fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Apply pragmas. `wal` is false for in-memory connections.
pub fn configure(conn: &Connection, synchronous: Synchronous, wal: bool) -> Result<()> {
    if wal {
        conn.execute_batch("PRAGMA journal_mode = WAL")
            .context("enabling WAL journal")?;
    }
    conn.execute_batch(&format!("PRAGMA synchronous = {}", synchronous.pragma_value()))
        .context("setting synchronous mode")?;
    conn.execute_batch("PRAGMA foreign_keys = ON")
        .context("enabling foreign keys")?;
    Ok(())
}

/// Current `user_version`
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("reading schema version")
}

/// Bring the schema up to [`SCHEMA_VERSION`] and make sure the store has a
/// public identifier.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let from = schema_version(conn)?;
    for (idx, ddl) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= from {
            continue;
        }
        let tx = conn.transaction().context("starting migration")?;
        tx.execute_batch(ddl)
            .context(&format!("applying schema version {}", version))?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", version))
            .context("updating schema version")?;
        tx.commit().context("committing migration")?;
        info!(target: "revstore::db", version, "Applied schema migration");
    }

    conn.execute(
        "INSERT OR IGNORE INTO info (key, value) VALUES (?1, ?2)",
        params![PUBLIC_UUID_KEY, Uuid::new_v4().simple().to_string()],
    )
    .context("initialising public identifier")?;
    Ok(())
}

/// Identifier published to replication peers
pub fn public_identifier(conn: &Connection) -> Result<String> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM info WHERE key = ?1",
            params![PUBLIC_UUID_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("reading public identifier")?;
    value.ok_or_else(|| revstore_core::Error::storage("public identifier missing from info table"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        configure(&conn, Synchronous::Normal, false).unwrap();
        migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_migrate_sets_version() {
        let conn = memory();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = memory();
        let id = public_identifier(&conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(public_identifier(&conn).unwrap(), id);
    }

    #[test]
    fn test_attachments_has_encoding_columns() {
        let conn = memory();
        let mut stmt = conn.prepare("PRAGMA table_info(attachments)").unwrap();
        let cols: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(cols.contains(&"encoding".to_string()));
        assert!(cols.contains(&"encoded_length".to_string()));
    }
}
