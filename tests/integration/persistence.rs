//! Persistence across close/reopen

use crate::common::*;
use serde_json::json;

#[test]
fn test_documents_and_attachments_survive_reopen() {
    let mut t = TestDb::new();
    let r1 = t
        .db
        .create_document(
            Some("doc1"),
            RevisionInput::new(body(json!({"v": 1}))).with_attachment(text_attachment("notes.txt", "hello")),
        )
        .unwrap();
    let r2 = t
        .db
        .update_document("doc1", &r1.rev_id, RevisionInput::new(body(json!({"v": 2}))))
        .unwrap();
    let identifier = t.db.public_identifier().unwrap();
    let last_sequence = t.db.last_sequence().unwrap();

    t.reopen();

    let current = t.db.get_document("doc1").unwrap();
    assert_eq!(current.rev_id, r2.rev_id);
    assert_eq!(current.body.get("v"), Some(&json!(2)));
    assert_eq!(t.db.read_attachment(&current.attachments["notes.txt"]).unwrap(), b"hello");
    assert_eq!(t.db.public_identifier().unwrap(), identifier);
    assert_eq!(t.db.last_sequence().unwrap(), last_sequence);

    // sequences keep growing after reopen
    let r3 = t
        .db
        .update_document("doc1", &r2.rev_id, RevisionInput::new(body(json!({"v": 3}))))
        .unwrap();
    assert!(r3.sequence > last_sequence);
}

#[test]
fn test_conflicts_survive_reopen() {
    let mut t = TestDb::new();
    graft(&t.db, "doc1", &["1-a", "2-b"]);
    graft(&t.db, "doc1", &["1-a", "2-c"]);
    graft(&t.db, "doc1", &["1-x"]);

    t.reopen();

    assert_eq!(t.db.conflicted_document_ids().unwrap(), vec!["doc1"]);
    assert_eq!(t.db.get_document("doc1").unwrap().rev_id, rev("2-c"));
    let tree = t.db.get_all_revisions_of_document("doc1").unwrap();
    assert_eq!(tree.roots().len(), 2);
    assert_eq!(tree.leaves().len(), 3);
    assert_single_current(&t.db, "doc1");
}

#[test]
fn test_strict_config_persists() {
    let mut t = TestDb::new_strict();
    assert!(t.dir.path().join(revstore::CONFIG_FILE_NAME).exists());
    t.reopen();
    assert_eq!(t.db.config().durability, "always");
}

#[test]
fn test_compaction_after_reopen_keeps_winner() {
    let mut t = TestDb::new();
    let mut rev_id = t
        .db
        .create_document(Some("doc1"), RevisionInput::new(body(json!({"v": 0}))))
        .unwrap()
        .rev_id;
    for v in 1..=3 {
        rev_id = t
            .db
            .update_document("doc1", &rev_id, RevisionInput::new(body(json!({ "v": v }))))
            .unwrap()
            .rev_id;
    }
    t.reopen();

    let stats = t.db.compact().unwrap();
    assert_eq!(stats.bodies_cleared, 3);
    assert_eq!(t.db.get_document("doc1").unwrap().body.get("v"), Some(&json!(3)));
    assert_eq!(t.db.get_all_revisions_of_document("doc1").unwrap().len(), 4);
}

#[test]
fn test_local_documents_survive_reopen() {
    let mut t = TestDb::new();
    t.db.put_local_document("_local/settings", &body(json!({"theme": "dark"})))
        .unwrap();
    t.reopen();
    let doc = t.db.get_local_document("_local/settings").unwrap();
    assert_eq!(doc.body.get("theme"), Some(&json!("dark")));
    assert!(t.db.all_document_ids().unwrap().is_empty());
}

#[test]
fn test_closed_store_rejects_calls() {
    let t = TestDb::new();
    t.db.close().unwrap();
    assert!(matches!(t.db.get_document("doc1"), Err(Error::Closed)));
    assert!(matches!(
        t.db.create_document(None, RevisionInput::new(body(json!({})))),
        Err(Error::Closed)
    ));
}
