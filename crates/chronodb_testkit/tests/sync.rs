//! Awaiting the indexer and listening to it.

use chronodb_core::{Config, EventFilter, EventType, TxOperation};
use chronodb_testkit::prelude::*;
use std::thread;
use std::time::Duration;

#[test]
fn zero_timeouts_fail_fast_when_behind() {
    let node = TestNode::manual();
    let tx = node.submit(&TransactionBuilder::new().put("a", doc(1)).build());

    let err = node.await_tx(tx, Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, CoreError::TimeoutExceeded { .. }));
    assert!(err.is_timing());
    assert!(matches!(
        node.snapshot_at(Some(tx.tx_time), None),
        Err(CoreError::NodeOutOfSync { .. })
    ));

    node.index_pending().unwrap();
    assert_eq!(node.await_tx(tx, Some(Duration::ZERO)).unwrap(), tx);
    assert_eq!(node.await_tx_time(tx.tx_time, Some(Duration::ZERO)).unwrap(), tx);
}

#[test]
fn waiters_wake_when_the_indexer_catches_up() {
    let node = TestNode::manual();
    let tx = node.submit(&TransactionBuilder::new().put("a", doc(1)).build());

    thread::scope(|scope| {
        let waiter = scope.spawn(|| node.await_snapshot_at(Some(tx.tx_time), None, Some(AWAIT_TIMEOUT)));
        thread::sleep(Duration::from_millis(50));
        node.index_pending().unwrap();

        let snapshot = waiter.join().unwrap().unwrap();
        assert_eq!(snapshot.basis(), Some(tx));
        assert_eq!(snapshot.entity(&"a".into()).unwrap(), Some(doc(1)));
    });
}

#[test]
fn background_indexing_keeps_up_with_many_submitters() {
    let node = TestNode::background();
    thread::scope(|scope| {
        for writer in 0..4_i64 {
            let node = &node;
            scope.spawn(move || {
                for n in 0..25 {
                    node.submit(&TransactionBuilder::new().put(writer, doc(n)).build());
                }
            });
        }
    });

    let latest = node.sync(Some(AWAIT_TIMEOUT)).unwrap().unwrap();
    assert_eq!(latest.tx_id, TxId::new(99));
    let snapshot = node.snapshot();
    for writer in 0..4_i64 {
        assert_eq!(snapshot.entity(&writer.into()).unwrap(), Some(doc(24)));
    }
    assert_eq!(node.stats().unwrap().transactions_committed, 100);
}

#[test]
fn sync_on_an_empty_node_returns_at_once() {
    let node = TestNode::manual();
    assert_eq!(node.sync(Some(Duration::ZERO)).unwrap(), None);
}

#[test]
fn subscribers_see_every_transaction_in_order() {
    let node = TestNode::background();
    let with_ops = node.subscribe(EventFilter::default().with_operations(true));
    let without_ops = node.subscribe(EventFilter::default());

    let txs = [
        node.submit(&TransactionBuilder::new().put("a", doc(1)).build()),
        node.submit(&TransactionBuilder::new().match_not_exists("a").build()),
        node.submit(&TransactionBuilder::new().delete("a").build()),
    ];

    for (tx, committed) in txs.iter().zip([true, false, true]) {
        let event = with_ops.recv_timeout(AWAIT_TIMEOUT).unwrap();
        assert_eq!(event.event_type, EventType::IndexedTx);
        assert_eq!(event.tx_id, tx.tx_id);
        assert_eq!(event.tx_time, tx.tx_time);
        assert_eq!(event.committed, committed);
        assert_eq!(event.operations.map(|ops| ops.len()), Some(1));

        let event = without_ops.recv_timeout(AWAIT_TIMEOUT).unwrap();
        assert_eq!(event.tx_id, tx.tx_id);
        assert_eq!(event.operations, None);
    }

    let mut with_ops = with_ops;
    with_ops.close();
    assert!(with_ops.is_closed());
    assert_eq!(with_ops.recv(), None);
}

#[test]
fn events_carry_the_logged_operations() {
    let node = TestNode::manual();
    let subscription = node.subscribe(EventFilter::default().with_operations(true));
    node.commit(&TransactionBuilder::new().put("a", doc(1)).evict("b").build());

    let ops = subscription.try_recv().unwrap().operations.unwrap();
    assert!(matches!(&ops[0], TxOperation::Put { content, .. } if *content == doc(1).content_hash().unwrap()));
    assert!(matches!(&ops[1], TxOperation::Evict { entity_id } if *entity_id == EntityId::from("b")));
    assert!(subscription.try_recv().is_err());
}

#[test]
fn dropped_subscriptions_stop_receiving() {
    let node = TestNode::manual();
    let subscription = node.subscribe(EventFilter::default());
    drop(subscription);
    node.commit(&TransactionBuilder::new().put("a", doc(1)).build());
    let kept = node.subscribe(EventFilter::default());
    node.commit(&TransactionBuilder::new().put("a", doc(2)).build());
    assert_eq!(kept.iter().next().map(|e| e.tx_id), Some(TxId::new(1)));
}

#[test]
fn corrupt_documents_stop_the_indexer() {
    init_tracing();
    let node = TestNode::manual();
    let body = Document::new().with("text", "x".repeat(64));
    node.submit(&TransactionBuilder::new().put("a", body).build());

    // inside the body, past the 45 byte record header
    node.document_backend().unwrap().corrupt_byte(60);

    let err = node.index_pending().unwrap_err();
    assert!(err.is_integrity_failure());
    assert!(matches!(
        node.sync(Some(Duration::ZERO)),
        Err(CoreError::IndexerStopped { .. })
    ));
    assert!(matches!(
        node.index_pending(),
        Err(CoreError::IndexerStopped { .. })
    ));
    assert_eq!(node.latest_completed_tx(), None);
}

#[test]
fn closing_wakes_waiters() {
    let node = TestNode::memory(Config::default().background_indexing(false));
    let tx = node.submit(&TransactionBuilder::new().put("a", doc(1)).build());

    thread::scope(|scope| {
        let waiter = scope.spawn(|| node.await_tx(tx, Some(AWAIT_TIMEOUT)));
        thread::sleep(Duration::from_millis(50));
        node.close().unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(CoreError::NodeClosed)));
    });
}
