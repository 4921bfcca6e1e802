//! Many threads writing through one shared store

use crate::common::*;
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

#[test]
fn test_parallel_creates_get_unique_sequences() {
    let t = TestDb::new();
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|n| {
            let db = Arc::clone(&t.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let doc_id = format!("t{}-{}", n, i);
                    db.create_document(Some(&doc_id), RevisionInput::new(body(json!({ "i": i }))))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (THREADS * per_thread) as u64;
    assert_eq!(t.db.document_count().unwrap(), total);
    assert_eq!(t.db.last_sequence().unwrap(), total);

    let changes = t.db.changes(0, THREADS * per_thread).unwrap();
    assert_eq!(changes.len(), THREADS * per_thread);
    assert!(changes.results.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert_eq!(changes.last_sequence, total);
}

#[test]
fn test_contended_updates_retry_until_linear() {
    let t = TestDb::new();
    t.db.create_document(Some("counter"), RevisionInput::new(body(json!({"n": 0}))))
        .unwrap();
    let rounds = 10;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&t.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut conflicts = 0;
                for _ in 0..rounds {
                    loop {
                        let current = db.get_document("counter").unwrap();
                        let n = current.body.get("n").and_then(|v| v.as_u64()).unwrap();
                        match db.update_document(
                            "counter",
                            &current.rev_id,
                            RevisionInput::new(body(json!({ "n": n + 1 }))),
                        ) {
                            Ok(_) => break,
                            Err(e) if e.is_conflict() => conflicts += 1,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
                conflicts
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (THREADS * rounds) as u64;
    let current = t.db.get_document("counter").unwrap();
    assert_eq!(current.body.get("n"), Some(&json!(expected)));
    assert_eq!(current.rev_id.generation(), expected + 1);
    assert!(t.db.conflicted_document_ids().unwrap().is_empty());
    assert_single_current(&t.db, "counter");
}

#[test]
fn test_every_commit_publishes_one_event() {
    let t = TestDb::new();
    let events = t.db.subscribe();

    let handles: Vec<_> = (0..THREADS)
        .map(|n| {
            let db = Arc::clone(&t.db);
            thread::spawn(move || {
                db.create_document(Some(&format!("doc{}", n)), RevisionInput::new(body(json!({}))))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let sequences: Vec<u64> = events.try_iter().map(|e| e.revision().sequence).collect();
    assert_eq!(sequences.len(), THREADS);
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), THREADS);
}
