//! Replication ids and checkpoint documents
//!
//! A checkpoint is a local (non-replicated) document named
//! `_local/replication-<id>` whose body records the last source sequence a
//! replication fully applied.

use revstore_core::{DocumentBody, Error, Result};
use revstore_engine::Database;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use tracing::debug;

/// Prefix of checkpoint document ids
pub const CHECKPOINT_PREFIX: &str = "_local/replication-";

const LAST_SEQUENCE_FIELD: &str = "last_sequence";

/// Which way revisions flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote to local
    Pull,
    /// Local to remote
    Push,
}

impl Direction {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}

/// Hex SHA-1 identifying one (source, target, direction) replication
pub fn replication_id(source: &str, target: &str, direction: Direction) -> Result<String> {
    let mut fields = BTreeMap::new();
    fields.insert("direction", direction.as_str());
    fields.insert("source", source);
    fields.insert("target", target);
    let bytes = serde_json::to_vec(&fields)?;
    Ok(format!("{:x}", Sha1::digest(&bytes)))
}

/// Local document id holding the checkpoint of `replication_id`
pub fn checkpoint_doc_id(replication_id: &str) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, replication_id)
}

/// Last recorded sequence, `None` if the replication never checkpointed
pub fn read(db: &Database, replication_id: &str) -> Result<Option<u64>> {
    let doc_id = checkpoint_doc_id(replication_id);
    let doc = match db.get_local_document(&doc_id) {
        Ok(doc) => doc,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    doc.body
        .get(LAST_SEQUENCE_FIELD)
        .and_then(Value::as_u64)
        .map(Some)
        .ok_or_else(|| Error::storage(format!("checkpoint '{}' has no {}", doc_id, LAST_SEQUENCE_FIELD)))
}

/// Record `sequence` as fully applied
pub fn write(db: &Database, replication_id: &str, sequence: u64) -> Result<()> {
    let doc_id = checkpoint_doc_id(replication_id);
    let body = DocumentBody::from_value(json!({ LAST_SEQUENCE_FIELD: sequence }))?;
    db.put_local_document(&doc_id, &body)?;
    debug!(target: "revstore::replication", checkpoint = %doc_id, sequence, "Saved checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication_id_depends_on_direction_and_ends() {
        let pull = replication_id("a", "b", Direction::Pull).unwrap();
        assert_eq!(pull.len(), 40);
        assert!(pull.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(pull, replication_id("a", "b", Direction::Pull).unwrap());
        assert_ne!(pull, replication_id("a", "b", Direction::Push).unwrap());
        assert_ne!(pull, replication_id("b", "a", Direction::Pull).unwrap());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let db = Database::ephemeral().unwrap();
        assert_eq!(read(&db, "abc").unwrap(), None);
        write(&db, "abc", 42).unwrap();
        assert_eq!(read(&db, "abc").unwrap(), Some(42));
        write(&db, "abc", 50).unwrap();
        assert_eq!(read(&db, "abc").unwrap(), Some(50));
        assert!(db.get_local_document("_local/replication-abc").is_ok());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let db = Database::ephemeral().unwrap();
        let body = DocumentBody::from_value(json!({"other": true})).unwrap();
        db.put_local_document(&checkpoint_doc_id("abc"), &body).unwrap();
        assert!(read(&db, "abc").is_err());
    }
}
