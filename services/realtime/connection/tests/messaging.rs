//! Outbound queueing, ack and nack handling, and inbound channel messages.

mod common;

use common::*;
use realtime_connection::{AckResult, ConnectionError, ConnectionOptions, ConnectionState};
use realtime_wire::{error_info, Action, ErrorInfo, ProtocolMessage};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_ack_and_nack_complete_ranges() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        send_tracked(&h.connection, i, &outcomes).await;
    }
    let serials: Vec<Option<i64>> = h
        .factory
        .last()
        .sent_with(Action::Message)
        .iter()
        .map(|m| m.msg_serial)
        .collect();
    assert_eq!(serials, vec![Some(0), Some(1), Some(2)]);

    h.factory.last().receive(ack(Action::Ack, 0, 2));
    h.settle().await;
    {
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    }

    let mut nack = ack(Action::Nack, 2, 1);
    nack.error = Some(ErrorInfo::new(40160, Some(401), "not permitted"));
    h.factory.last().receive(nack);
    h.settle().await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2].0, 2);
    assert_eq!(outcomes[2].1.as_ref().unwrap_err().code, 40160);
}

#[tokio::test]
async fn test_publish_waits_for_ack() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let transport = h.factory.last();

    let acker = async {
        loop {
            h.settle().await;
            if let Some(sent) = transport.sent_with(Action::Message).last() {
                transport.receive(ack(Action::Ack, sent.msg_serial.unwrap(), 1));
                break;
            }
            tokio::task::yield_now().await;
        }
    };
    let message = ProtocolMessage::publish("chan", serde_json::json!({"n": 1}));
    let (result, ()) = tokio::join!(h.connection.publish(message), acker);

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_publish_reports_nack() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let transport = h.factory.last();

    let nacker = async {
        loop {
            h.settle().await;
            if !transport.sent_with(Action::Message).is_empty() {
                transport.receive(ack(Action::Nack, 0, 1));
                break;
            }
            tokio::task::yield_now().await;
        }
    };
    let message = ProtocolMessage::publish("chan", serde_json::json!("x"));
    let (result, ()) = tokio::join!(h.connection.publish(message), nacker);

    match result {
        Err(ConnectionError::Protocol(error)) => {
            assert_eq!(error.code, error_info::INTERNAL_ERROR)
        }
        other => panic!("unexpected publish result: {:?}", other),
    }
}

#[tokio::test]
async fn test_messages_queued_until_connected() {
    let h = Harness::new(options(), FakeAuth::renewable());
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;
    send_tracked(&h.connection, 1, &outcomes).await;
    assert_eq!(h.factory.count(), 0);

    h.connection.connect().await.unwrap();
    assert!(h.factory.last().sent_with(Action::Message).is_empty());

    h.factory
        .last()
        .receive(connected_message("1", "connectionKey", 0));
    h.settle().await;

    let sent = h.factory.last().sent_with(Action::Message);
    let serials: Vec<Option<i64>> = sent.iter().map(|m| m.msg_serial).collect();
    assert_eq!(serials, vec![Some(0), Some(1)]);
    assert_eq!(sent[0].data, Some(serde_json::json!("m0")));
    assert!(outcomes.lock().unwrap().is_empty());
    assert_eq!(h.connection.message_serial(), 2);
}

#[tokio::test]
async fn test_queueing_disabled_fails_immediately() {
    let options = ConnectionOptions {
        queue_messages: false,
        ..options()
    };
    let h = Harness::new(options, FakeAuth::renewable());
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0].1.as_ref().unwrap_err().code,
        error_info::CONNECTION_FAILED
    );
}

#[tokio::test]
async fn test_send_after_failure_is_rejected() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    h.factory.last().receive(message_with_error(
        Action::Error,
        error_info::INTERNAL_ERROR,
        500,
    ));
    h.settle().await;
    assert_eq!(h.connection.state(), ConnectionState::Failed);

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_err());
}

#[tokio::test]
async fn test_close_fails_pending_messages() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;

    h.connection.close().await.unwrap();
    h.factory.last().receive(ProtocolMessage::new(Action::Closed));
    h.settle().await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0].1.as_ref().unwrap_err().code,
        error_info::CONNECTION_CLOSED
    );
}

#[tokio::test]
async fn test_messages_survive_disconnect_while_queued() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    h.factory.last().drop_connection(None);
    h.settle().await;
    assert_eq!(h.connection.state(), ConnectionState::Connecting);

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;
    h.factory
        .last()
        .receive(connected_message("1", "connectionKey", 100));
    h.settle().await;

    assert_eq!(h.factory.last().sent_with(Action::Message).len(), 1);
    assert!(outcomes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_channel_messages_are_delivered() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let mut messages = h.connection.messages();

    let mut message = ProtocolMessage::publish("chan", serde_json::json!({"hello": "world"}));
    message.connection_serial = Some(101);
    h.factory.last().receive(message);
    h.settle().await;

    let received = messages.try_recv().unwrap();
    assert_eq!(received.channel.as_deref(), Some("chan"));
    assert_eq!(received.data, Some(serde_json::json!({"hello": "world"})));
    assert_eq!(h.connection.serial(), Some(101));
}

#[tokio::test]
async fn test_write_failure_is_treated_as_disconnect() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let first = h.factory.last();
    first.break_writes();

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;
    h.settle().await;

    assert_eq!(h.connection.state(), ConnectionState::Connecting);
    assert_eq!(h.factory.count(), 2);
    assert!(outcomes.lock().unwrap().is_empty());

    // The message stays pending and goes out again once resumed.
    let second = h.factory.last();
    second.receive(connected_message("1", "connectionKey", 100));
    h.settle().await;
    let resent = second.sent_with(Action::Message);
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].msg_serial, Some(0));
}

#[tokio::test]
async fn test_ack_at_serial_limit_is_harmless() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 0, &outcomes).await;

    h.factory.last().receive(ack(Action::Ack, i64::MAX, 1));
    h.factory.last().receive(ack(Action::Nack, i64::MAX, u32::MAX));
    h.settle().await;
    assert!(outcomes.lock().unwrap().is_empty());
    assert_eq!(h.connection.state(), ConnectionState::Connected);

    h.factory.last().receive(ack(Action::Ack, 0, 1));
    h.settle().await;
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_ok());
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_the_connection() {
    let h = Harness::connected(options(), FakeAuth::renewable()).await;
    h.connection
        .send(
            ProtocolMessage::publish("chan", serde_json::json!("boom")),
            Some(Box::new(|_: AckResult| panic!("callback failed"))),
        )
        .await
        .unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    send_tracked(&h.connection, 1, &outcomes).await;

    h.factory.last().receive(ack(Action::Ack, 0, 2));
    h.settle().await;
    assert_eq!(outcomes.lock().unwrap().len(), 1);

    h.connection.close().await.unwrap();
    h.factory.last().receive(ProtocolMessage::new(Action::Closed));
    h.settle().await;
    assert_eq!(h.connection.state(), ConnectionState::Closed);
}
