//! Submitting transactions and reading them back through snapshots.

use chronodb_core::{EqualityMatcher, EqualityQuery};
use chronodb_testkit::prelude::*;

fn ts(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

#[test]
fn transaction_ids_are_gapless_and_times_increase() {
    let node = TestNode::manual();
    let txs: Vec<_> = (0..10)
        .map(|n| node.submit(&TransactionBuilder::new().put("a", doc(n)).build()))
        .collect();

    for (n, tx) in txs.iter().enumerate() {
        assert_eq!(tx.tx_id, TxId::new(n as u64));
    }
    for pair in txs.windows(2) {
        assert!(pair[1].tx_time > pair[0].tx_time);
    }

    let logged: Vec<_> = node
        .open_tx_log(TxId::new(3), false)
        .map(|record| record.unwrap().instant())
        .collect();
    assert_eq!(logged, txs[3..]);
}

#[test]
fn deleted_documents_keep_their_history() {
    init_tracing();
    let node = TestNode::background();
    let id = EntityId::from("doc-1");
    let body = Document::new().with("bar", "baz");

    let put = node.submit(&TransactionBuilder::new().put("doc-1", body.clone()).build());
    node.sync(Some(AWAIT_TIMEOUT)).unwrap();
    assert_eq!(node.snapshot().entity(&id).unwrap(), Some(body.clone()));

    let delete = node.submit(&TransactionBuilder::new().delete("doc-1").build());
    node.sync(Some(AWAIT_TIMEOUT)).unwrap();
    let snapshot = node.snapshot();
    assert_eq!(snapshot.entity(&id).unwrap(), None);

    let history = snapshot
        .entity_history(&id, HistoryOptions::new().with_docs(true))
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].tx_id, delete.tx_id);
    assert_eq!(history[0].valid_time, delete.tx_time);
    assert_eq!(history[0].content_hash, None);
    assert_eq!(history[1].tx_id, put.tx_id);
    assert_eq!(history[1].content_hash, Some(body.content_hash().unwrap()));
    assert_eq!(history[1].document, Some(body.clone()));

    // the past is still readable
    let before = node.snapshot_at(Some(put.tx_time), None).unwrap();
    assert_eq!(before.entity(&id).unwrap(), Some(body));
}

#[test]
fn failed_match_aborts_every_operation() {
    let node = TestNode::manual();
    node.commit(&TransactionBuilder::new().put("b", doc(2)).build());

    let tx = node.commit(
        &TransactionBuilder::new()
            .put("a", doc(1))
            .match_doc("b", doc(9))
            .build(),
    );
    assert!(!node.has_tx_committed(tx).unwrap());
    assert_eq!(node.snapshot().entity(&"a".into()).unwrap(), None);

    let tx = node.commit(
        &TransactionBuilder::new()
            .put("a", doc(1))
            .match_doc("b", doc(2))
            .build(),
    );
    assert!(node.has_tx_committed(tx).unwrap());
    assert_eq!(node.snapshot().entity(&"a".into()).unwrap(), Some(doc(1)));

    let stats = node.stats().unwrap();
    assert_eq!(stats.transactions_committed, 2);
    assert_eq!(stats.transactions_aborted, 1);
}

#[test]
fn match_not_exists_guards_creation() {
    let node = TestNode::manual();
    let create = TransactionBuilder::new()
        .match_not_exists("user")
        .put("user", doc(1))
        .build();

    let first = node.commit(&create);
    let second = node.commit(&create);
    assert!(node.has_tx_committed(first).unwrap());
    assert!(!node.has_tx_committed(second).unwrap());
}

#[test]
fn matches_see_earlier_operations_in_the_same_transaction() {
    let node = TestNode::manual();
    let tx = node.commit(
        &TransactionBuilder::new()
            .put_at("a", doc(1), ts(0))
            .match_doc_at("a", doc(1), ts(50))
            .delete_at("a", ts(10))
            .match_not_exists_at("a", ts(50))
            .build(),
    );
    assert!(node.has_tx_committed(tx).unwrap());

    let early = node.snapshot_at(None, Some(ts(5))).unwrap();
    assert_eq!(early.entity(&"a".into()).unwrap(), Some(doc(1)));
}

#[test]
fn valid_time_ranges_are_honoured() {
    let node = TestNode::manual();
    node.commit(&TransactionBuilder::new().put_at("a", doc(1), ts(0)).build());
    node.commit(
        &TransactionBuilder::new()
            .put_between("a", doc(2), ts(10), ts(20))
            .build(),
    );

    let at = |vt| node.snapshot_at(None, Some(ts(vt))).unwrap().entity(&"a".into()).unwrap();
    assert_eq!(at(5), Some(doc(1)));
    assert_eq!(at(10), Some(doc(2)));
    assert_eq!(at(19), Some(doc(2)));
    assert_eq!(at(20), Some(doc(1)));

    let meta = node
        .snapshot_at(None, Some(ts(15)))
        .unwrap()
        .entity_tx(&"a".into())
        .unwrap();
    assert_eq!(meta.valid_time, ts(10));
    assert_eq!(meta.valid_to, Some(ts(20)));
    assert_eq!(meta.tx_id, TxId::new(1));
}

#[test]
fn corrections_show_up_only_when_asked_for() {
    let node = TestNode::manual();
    let original = node.commit(&TransactionBuilder::new().put_at("a", doc(1), ts(10)).build());
    let correction = node.commit(&TransactionBuilder::new().put_at("a", doc(2), ts(10)).build());

    let snapshot = node.snapshot_at(None, Some(ts(100))).unwrap();
    let id = EntityId::from("a");
    let plain = snapshot.entity_history(&id, HistoryOptions::new()).unwrap();
    assert_eq!(plain.len(), 1);
    assert_eq!(plain[0].tx_id, correction.tx_id);

    let corrected = snapshot
        .entity_history(&id, HistoryOptions::new().with_corrections(true))
        .unwrap();
    let txs: Vec<_> = corrected.iter().map(|e| e.tx_id).collect();
    assert_eq!(txs, vec![original.tx_id, correction.tx_id]);

    // as of the first transaction the original is not a correction
    let old = node.snapshot_at(Some(original.tx_time), Some(ts(100))).unwrap();
    let old_history = old.entity_history(&id, HistoryOptions::new()).unwrap();
    assert_eq!(old_history.len(), 1);
    assert_eq!(old_history[0].tx_id, original.tx_id);
}

#[test]
fn history_lists_what_a_bounded_correction_leaves_behind() {
    let node = TestNode::manual();
    let original = node.commit(&TransactionBuilder::new().put_at("e", doc(1), ts(10)).build());
    let correction = node.commit(
        &TransactionBuilder::new()
            .put_between("e", doc(2), ts(0), ts(20))
            .build(),
    );

    let snapshot = node.snapshot_at(None, Some(ts(100))).unwrap();
    let id = EntityId::from("e");
    assert_eq!(snapshot.entity(&id).unwrap(), Some(doc(1)));

    let history = snapshot
        .entity_history(&id, HistoryOptions::new().with_docs(true))
        .unwrap();
    let listed: Vec<_> = history
        .iter()
        .map(|e| (e.valid_time, e.valid_to, e.tx_id, e.document.clone()))
        .collect();
    assert_eq!(
        listed,
        vec![
            (ts(20), None, original.tx_id, Some(doc(1))),
            (ts(0), Some(ts(20)), correction.tx_id, Some(doc(2))),
        ]
    );
}

#[test]
fn history_cursor_is_lazy_and_filterable() {
    let node = TestNode::manual();
    for vt in [10, 20, 30, 40] {
        node.commit(&TransactionBuilder::new().put_at("a", doc(vt), ts(vt)).build());
    }
    let snapshot = node.snapshot_at(None, Some(ts(100))).unwrap();
    let id = EntityId::from("a");

    let ascending: Vec<_> = snapshot
        .open_entity_history(&id, HistoryOptions::new().ascending())
        .map(|e| e.unwrap().valid_time)
        .collect();
    assert_eq!(ascending, vec![ts(10), ts(20), ts(30), ts(40)]);

    let mut cursor = snapshot.open_entity_history(
        &id,
        HistoryOptions::new()
            .with_docs(true)
            .valid_time_range(Some(ts(20)), Some(ts(40))),
    );
    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.valid_time, ts(30));
    assert_eq!(first.document, Some(doc(30)));
    cursor.close();

    let capped = node.snapshot_at(None, Some(ts(25))).unwrap();
    let visible: Vec<_> = capped
        .open_entity_history(&id, HistoryOptions::new())
        .map(|e| e.unwrap().valid_time)
        .collect();
    assert_eq!(visible, vec![ts(20), ts(10)]);
}

#[test]
fn evicted_entities_disappear_with_their_bodies() {
    let node = TestNode::manual();
    let put = node.commit(
        &TransactionBuilder::new()
            .put("a", doc(1))
            .put("b", doc(2))
            .build(),
    );
    let hash = doc(1).content_hash().unwrap();

    node.commit(&TransactionBuilder::new().evict("a").build());

    assert_eq!(node.snapshot().entity(&"a".into()).unwrap(), None);
    let past = node.snapshot_at(Some(put.tx_time), None).unwrap();
    assert_eq!(past.entity(&"a".into()).unwrap(), None);
    assert!(past
        .entity_history(&"a".into(), HistoryOptions::new().with_corrections(true))
        .unwrap()
        .is_empty());
    assert_eq!(past.entity(&"b".into()).unwrap(), Some(doc(2)));

    assert_eq!(node.document(&hash).unwrap(), None);
    assert_eq!(node.stats().unwrap().documents_evicted, 1);
}

#[test]
fn shared_and_pending_bodies_survive_eviction() {
    let node = TestNode::manual();
    node.commit(
        &TransactionBuilder::new()
            .put("a", doc(1))
            .put("b", doc(1))
            .put("c", doc(2))
            .build(),
    );

    // still referenced by "b"
    node.commit(&TransactionBuilder::new().evict("a").build());
    assert_eq!(node.document(&doc(1).content_hash().unwrap()).unwrap(), Some(doc(1)));

    // referenced by a transaction submitted before the evict is indexed
    node.submit(&TransactionBuilder::new().evict("c").build());
    node.submit(&TransactionBuilder::new().put("d", doc(2)).build());
    node.catch_up();

    assert_eq!(node.snapshot().entity(&"c".into()).unwrap(), None);
    assert_eq!(node.snapshot().entity(&"d".into()).unwrap(), Some(doc(2)));
}

#[test]
fn evict_then_put_in_one_transaction_starts_over() {
    let node = TestNode::manual();
    node.commit(&TransactionBuilder::new().put_at("a", doc(1), ts(0)).build());
    let tx = node.commit(
        &TransactionBuilder::new()
            .evict("a")
            .put_at("a", doc(2), ts(50))
            .build(),
    );
    assert!(node.has_tx_committed(tx).unwrap());

    let snapshot = node.snapshot_at(None, Some(ts(100))).unwrap();
    let history = snapshot
        .entity_history(&"a".into(), HistoryOptions::new().with_corrections(true))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].tx_id, tx.tx_id);
    assert_eq!(node.snapshot_at(None, Some(ts(10))).unwrap().entity(&"a".into()).unwrap(), None);
}

#[test]
fn empty_ranges_are_rejected_or_aborted() {
    let node = TestNode::manual();

    let explicit = TransactionBuilder::new()
        .put_between("a", doc(1), ts(10), ts(10))
        .build();
    assert!(matches!(
        node.submit_tx(&explicit),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert!(matches!(
        node.snapshot().with_tx(&explicit),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert_eq!(node.latest_submitted_tx(), None);

    // the end is before the transaction time the start defaults to
    let defaulted = vec![Operation::Put {
        entity_id: "a".into(),
        document: doc(1),
        valid_from: None,
        valid_to: Some(ts(1)),
    }];
    let tx = node.commit(&defaulted);
    assert!(!node.has_tx_committed(tx).unwrap());
}

#[test]
fn with_tx_is_private_to_the_returned_snapshot() {
    let node = TestNode::manual();
    let basis = node.commit(&TransactionBuilder::new().put("a", doc(1)).build());
    let snapshot = node.snapshot();

    let speculative = snapshot
        .with_tx(
            &TransactionBuilder::new()
                .put("a", doc(2))
                .put("b", doc(3))
                .build(),
        )
        .unwrap()
        .expect("transaction should apply");

    assert_eq!(speculative.entity(&"a".into()).unwrap(), Some(doc(2)));
    assert_eq!(speculative.entity(&"b".into()).unwrap(), Some(doc(3)));
    assert_eq!(speculative.entities(), vec![EntityId::from("a"), EntityId::from("b")]);
    assert_eq!(speculative.speculative_tx().unwrap().tx_id, basis.tx_id.next());
    assert_eq!(speculative.basis(), Some(basis));

    assert_eq!(snapshot.entity(&"a".into()).unwrap(), Some(doc(1)));
    assert_eq!(node.snapshot().entity(&"b".into()).unwrap(), None);
    assert_eq!(node.latest_submitted_tx(), Some(basis));
    assert_eq!(node.document(&doc(3).content_hash().unwrap()).unwrap(), None);

    // speculative transactions stack
    let stacked = speculative
        .with_tx(&TransactionBuilder::new().match_doc("b", doc(3)).delete("b").build())
        .unwrap()
        .expect("match should hold");
    assert_eq!(stacked.entity(&"b".into()).unwrap(), None);
    assert_eq!(stacked.entity(&"a".into()).unwrap(), Some(doc(2)));
    assert_eq!(stacked.speculative_tx().unwrap().tx_id, basis.tx_id.next().next());

    let failed = snapshot
        .with_tx(&TransactionBuilder::new().match_doc("a", doc(5)).build())
        .unwrap();
    assert!(failed.is_none());
}

#[test]
fn with_tx_on_a_past_snapshot_ignores_later_transactions() {
    let node = TestNode::manual();
    let first = node.commit(&TransactionBuilder::new().put("a", doc(1)).build());
    node.commit(&TransactionBuilder::new().put("a", doc(2)).build());

    let past = node.snapshot_at(Some(first.tx_time), None).unwrap();
    let speculative = past
        .with_tx(&TransactionBuilder::new().match_doc("a", doc(1)).put("b", doc(3)).build())
        .unwrap()
        .expect("match against the past should hold");
    assert_eq!(speculative.entity(&"a".into()).unwrap(), Some(doc(1)));
    assert_eq!(speculative.entity(&"b".into()).unwrap(), Some(doc(3)));
}

#[test]
fn queries_and_projections_read_the_snapshot() {
    let node = TestNode::manual();
    node.commit(
        &TransactionBuilder::new()
            .put("a", Document::new().with("name", "ivan").with("age", 30_i64))
            .put("b", Document::new().with("name", "petr"))
            .put("c", Document::new().with("name", "ivan"))
            .build(),
    );
    let snapshot = node.snapshot();

    let rows = snapshot
        .query(
            &EqualityMatcher,
            &EqualityQuery::new().filter("name", "ivan").select("age"),
        )
        .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::text("a"), Value::Integer(30)],
            vec![Value::text("c"), Value::Null],
        ]
    );

    let projected = snapshot.project(&"a".into(), &["name"]).unwrap().unwrap();
    assert_eq!(projected, Document::new().with("name", "ivan"));

    let many = snapshot
        .project_many(&["a".into(), "missing".into(), "b".into()], &["name"])
        .unwrap();
    assert_eq!(many.len(), 2);
    assert_eq!(many[1], (EntityId::from("b"), Document::new().with("name", "petr")));

    let attributes = node.attribute_stats();
    assert_eq!(attributes.get("name"), Some(&3));
    assert_eq!(attributes.get("age"), Some(&1));
}
