//! Bidirectional replication between on-disk stores

use crate::common::*;
use revstore::RemoteDatabase;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn sync_both_ways(a: &Arc<Database>, b: &Arc<Database>) {
    PushReplication::new(Arc::clone(a), LocalPeer::new(Arc::clone(b)), ReplicationConfig::default())
        .run()
        .unwrap();
    PullReplication::new(LocalPeer::new(Arc::clone(b)), Arc::clone(a), ReplicationConfig::default())
        .run()
        .unwrap();
}

#[test]
fn test_independent_edits_converge() {
    let a = TestDb::new();
    let b = TestDb::new();
    a.db.create_document(Some("from-a"), RevisionInput::new(body(json!({"origin": "a"}))))
        .unwrap();
    b.db.create_document(
        Some("from-b"),
        RevisionInput::new(body(json!({"origin": "b"}))).with_attachment(text_attachment("b.txt", "bee")),
    )
    .unwrap();

    sync_both_ways(&a.db, &b.db);

    let ids_a = a.db.all_document_ids().unwrap();
    let ids_b = b.db.all_document_ids().unwrap();
    assert_eq!(ids_a.len(), 2);
    let mut sorted_a = ids_a.clone();
    let mut sorted_b = ids_b.clone();
    sorted_a.sort();
    sorted_b.sort();
    assert_eq!(sorted_a, sorted_b);

    let copy = a.db.get_document("from-b").unwrap();
    assert_eq!(a.db.read_attachment(&copy.attachments["b.txt"]).unwrap(), b"bee");
}

#[test]
fn test_concurrent_edits_pick_same_winner_on_both_sides() {
    let a = TestDb::new();
    let b = TestDb::new();
    let base = a
        .db
        .create_document(Some("doc1"), RevisionInput::new(body(json!({"v": 0}))))
        .unwrap();
    sync_both_ways(&a.db, &b.db);
    assert_eq!(b.db.get_document("doc1").unwrap().rev_id, base.rev_id);

    a.db.update_document("doc1", &base.rev_id, RevisionInput::new(body(json!({"v": "a"}))))
        .unwrap();
    b.db.update_document("doc1", &base.rev_id, RevisionInput::new(body(json!({"v": "b"}))))
        .unwrap();
    sync_both_ways(&a.db, &b.db);

    let winner_a = a.db.get_document("doc1").unwrap();
    let winner_b = b.db.get_document("doc1").unwrap();
    assert_eq!(winner_a.rev_id, winner_b.rev_id);
    assert_eq!(winner_a.body, winner_b.body);
    assert_eq!(a.db.conflicted_document_ids().unwrap(), vec!["doc1"]);
    assert_eq!(b.db.conflicted_document_ids().unwrap(), vec!["doc1"]);
    assert_single_current(&a.db, "doc1");
    assert_single_current(&b.db, "doc1");
}

#[test]
fn test_deletion_replicates() {
    let a = TestDb::new();
    let b = TestDb::new();
    let created = a
        .db
        .create_document(Some("doc1"), RevisionInput::new(body(json!({}))))
        .unwrap();
    sync_both_ways(&a.db, &b.db);
    a.db.delete_document_revision("doc1", &created.rev_id).unwrap();
    sync_both_ways(&a.db, &b.db);

    assert!(b.db.get_document("doc1").unwrap().deleted);
    assert_eq!(b.db.document_count().unwrap(), 0);
}

#[test]
fn test_peer_reports_missing_revisions() {
    let a = TestDb::new();
    graft(&a.db, "doc1", &["1-a", "2-b"]);
    let peer = LocalPeer::new(Arc::clone(&a.db));

    let mut requested: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    requested.insert(
        "doc1".to_string(),
        ["1-a", "2-b", "3-c"].iter().map(|s| s.to_string()).collect(),
    );
    let missing = peer.revs_diff(&requested).unwrap();
    assert_eq!(missing["doc1"].len(), 1);
    assert!(missing["doc1"].contains("3-c"));
}
