//! End-to-end request/reply and subscription lifecycle over the in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use designer_bus::{BusError, Connection, ConnectionState, Correlator, InMemoryBroker};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn connected(broker: &InMemoryBroker, name: &str) -> Connection {
    let conn = Connection::new(format!("memory://{name}"), Arc::new(broker.connector()));
    conn.connect().await.unwrap();
    conn
}

/// A responder that answers each request twice, echoing the request body.
async fn duplicating_responder(broker: &InMemoryBroker, subject: &str) {
    let responder = connected(broker, "responder").await;
    let mut requests = responder.subscribe(subject).await.unwrap();
    tokio::spawn(async move {
        while let Some(msg) = requests.recv().await {
            let Some(inbox) = msg.reply else { continue };
            let mut first = b"first:".to_vec();
            first.extend_from_slice(&msg.payload);
            responder.publish(&inbox, first).await.unwrap();
            responder.publish(&inbox, "second").await.unwrap();
        }
    });
}

#[tokio::test]
async fn first_reply_wins_and_duplicates_are_discarded() {
    let broker = InMemoryBroker::new();
    duplicating_responder(&broker, "svc.dup").await;

    let conn = connected(&broker, "client").await;
    let correlator = Correlator::new(conn.clone(), "designer.inbox", Duration::from_secs(1));

    let mut inbox = String::new();
    let reply = correlator
        .request("svc.dup", None, |reply_to| {
            inbox = reply_to.to_string();
            Ok(Bytes::from_static(b"a"))
        })
        .await
        .unwrap();

    assert_eq!(reply.payload, Bytes::from_static(b"first:a"));
    // The second reply was routed after release and found no subscriber.
    assert_eq!(broker.interest(&inbox), 0);
    assert_eq!(conn.active_subscriptions(), 0);
}

#[tokio::test]
async fn concurrent_requests_do_not_cross_resolve() {
    let broker = InMemoryBroker::new();
    duplicating_responder(&broker, "svc.dup").await;

    let conn = connected(&broker, "client").await;
    let correlator = Arc::new(Correlator::new(conn, "designer.inbox", Duration::from_secs(1)));

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let correlator = correlator.clone();
        handles.push(tokio::spawn(async move {
            let reply = correlator
                .request("svc.dup", None, move |_| Ok(Bytes::from(vec![b'0' + i % 10])))
                .await
                .unwrap();
            (i, reply.payload)
        }));
    }

    for handle in handles {
        let (i, payload) = handle.await.unwrap();
        let mut expected = b"first:".to_vec();
        expected.push(b'0' + i % 10);
        assert_eq!(payload, Bytes::from(expected));
    }
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn timeout_releases_reply_subscription() {
    let broker = InMemoryBroker::new();
    let conn = connected(&broker, "client").await;
    let correlator = Correlator::new(conn.clone(), "designer.inbox", Duration::from_millis(30));

    let mut inbox = String::new();
    let err = correlator
        .request("svc.silent", None, |reply_to| {
            inbox = reply_to.to_string();
            Ok(Bytes::new())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Timeout { .. }));
    assert_eq!(broker.publish(&inbox, None, "too late"), 0);
    assert_eq!(conn.active_subscriptions(), 0);
}

#[tokio::test]
async fn no_delivery_after_unsubscribe() {
    let broker = InMemoryBroker::new();
    let conn = connected(&broker, "client").await;

    let mut sub = conn.subscribe("workflow.logs.stream").await.unwrap();
    conn.publish("workflow.logs.stream", "before").await.unwrap();
    let msg = sub.recv().await.unwrap();
    assert_eq!(msg.payload, Bytes::from_static(b"before"));

    sub.unsubscribe();
    assert_eq!(broker.publish("workflow.logs.stream", None, "after"), 0);
}

#[tokio::test]
async fn subjects_are_consumed_independently() {
    let broker = InMemoryBroker::new();
    let conn = connected(&broker, "client").await;

    let mut logs = conn.subscribe("workflow.logs.stream").await.unwrap();
    let mut events = conn.subscribe("workflow.events.>").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let tx_logs = tx.clone();
    tokio::spawn(async move {
        while let Some(msg) = logs.recv().await {
            tx_logs.send(("logs", msg.payload)).unwrap();
        }
    });
    tokio::spawn(async move {
        while let Some(msg) = events.recv().await {
            tx.send(("events", msg.payload)).unwrap();
        }
    });

    for i in 0..5 {
        conn.publish("workflow.logs.stream", format!("l{i}")).await.unwrap();
        conn.publish("workflow.events.run", format!("e{i}")).await.unwrap();
    }

    let mut logs_seen = Vec::new();
    let mut events_seen = Vec::new();
    while logs_seen.len() + events_seen.len() < 10 {
        let (source, payload) = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout")
            .unwrap();
        match source {
            "logs" => logs_seen.push(payload),
            _ => events_seen.push(payload),
        }
    }

    let expected_logs: Vec<Bytes> = (0..5).map(|i| Bytes::from(format!("l{i}"))).collect();
    let expected_events: Vec<Bytes> = (0..5).map(|i| Bytes::from(format!("e{i}"))).collect();
    assert_eq!(logs_seen, expected_logs);
    assert_eq!(events_seen, expected_events);
}

#[tokio::test]
async fn connect_failure_then_retry() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);

    let conn = Connection::new("memory://client", Arc::new(broker.connector()));
    let err = conn.connect().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    broker.set_reachable(true);
    conn.connect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn link_loss_fails_inflight_request() {
    let broker = InMemoryBroker::new();
    let conn = connected(&broker, "client").await;
    let correlator = Arc::new(Correlator::new(conn.clone(), "designer.inbox", Duration::from_secs(5)));

    let waiting = {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .request("svc.silent", None, |_| Ok(Bytes::new()))
                .await
        })
    };

    // Let the request subscribe and publish.
    while correlator.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    broker.sever();

    let result = timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), BusError::Closed);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(correlator.pending_count(), 0);
}
