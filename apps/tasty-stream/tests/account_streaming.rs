//! Account Streamer Integration Tests
//!
//! Drives `AccountStreamer` against a local WebSocket peer: readiness,
//! action envelopes, inbound frames, heartbeat and close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use common::{MockServer, STEP_TIMEOUT};
use tasty_stream::infrastructure::tastytrade::account::AccountEventStream;
use tasty_stream::{
    AccountEvent, AccountStreamError, AccountStreamer, AccountStreamerConfig, Credential,
};

fn start(server: &MockServer) -> (Arc<AccountStreamer>, AccountEventStream) {
    let config = AccountStreamerConfig::new(server.url(), Credential::new("session").unwrap());
    let (streamer, events) = AccountStreamer::new(config);
    (Arc::new(streamer), events)
}

async fn next_event(events: &mut AccountEventStream) -> AccountEvent {
    tokio::time::timeout(STEP_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

#[tokio::test]
async fn actions_carry_auth_token_and_value() {
    let server = MockServer::bind().await;
    let (streamer, _events) = start(&server);
    let _run = streamer.connect();

    let mut peer = server.accept().await;
    assert!(peer.authorization.is_none());
    streamer.wait_for_connection(STEP_TIMEOUT).await.unwrap();
    assert!(streamer.is_ready());

    streamer
        .connect_accounts(&["5WT0001".to_string(), "5WT0002".to_string()])
        .unwrap();
    assert_eq!(
        peer.next_json().await.unwrap(),
        json!({"auth-token": "session", "action": "connect", "value": ["5WT0001", "5WT0002"]})
    );

    streamer.account_subscribe(&["5WT0001".to_string()]).unwrap();
    assert_eq!(
        peer.next_json().await.unwrap(),
        json!({"auth-token": "session", "action": "account-subscribe", "value": ["5WT0001"]})
    );

    streamer.public_watchlists_subscribe().unwrap();
    assert_eq!(
        peer.next_json().await.unwrap(),
        json!({"auth-token": "session", "action": "public-watchlists-subscribe", "value": ""})
    );

    streamer.quote_alerts_subscribe().unwrap();
    assert_eq!(
        peer.next_json().await.unwrap()["action"],
        "quote-alerts-subscribe"
    );

    streamer.user_message_subscribe("U0001").unwrap();
    assert_eq!(
        peer.next_json().await.unwrap(),
        json!({"auth-token": "session", "action": "user-message-subscribe", "value": "U0001"})
    );

    streamer.heartbeat().unwrap();
    assert_eq!(
        peer.next_json().await.unwrap(),
        json!({"auth-token": "session", "action": "heartbeat", "value": ""})
    );

    streamer.close();
}

#[tokio::test]
async fn inbound_frames_reach_the_stream_in_order() {
    let server = MockServer::bind().await;
    let (streamer, mut events) = start(&server);
    let run = streamer.connect();

    let mut peer = server.accept().await;
    streamer.wait_for_connection(STEP_TIMEOUT).await.unwrap();

    peer.send_json(json!({"type": "Order", "data": {"id": 1}})).await;
    peer.send_text("not json").await;
    peer.send_json(json!({"type": "AccountBalance", "data": {"id": 2}})).await;

    assert_eq!(
        next_event(&mut events).await,
        AccountEvent::Message(json!({"type": "Order", "data": {"id": 1}}))
    );
    assert_eq!(
        next_event(&mut events).await,
        AccountEvent::Message(json!({"type": "AccountBalance", "data": {"id": 2}}))
    );

    streamer.close();
    tokio::time::timeout(STEP_TIMEOUT, run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        AccountEvent::Disconnected { error: None }
    );
    assert!(events.next().await.is_none());
    assert!(!streamer.is_ready());
}

#[tokio::test]
async fn heartbeat_runs_until_stopped() {
    let server = MockServer::bind().await;
    let (streamer, _events) = start(&server);
    let _run = streamer.connect();

    let mut peer = server.accept().await;
    streamer.wait_for_connection(STEP_TIMEOUT).await.unwrap();

    let handle = streamer.start_heartbeat(Duration::from_millis(30)).unwrap();
    for _ in 0..2 {
        let frame = peer.next_json().await.unwrap();
        assert_eq!(frame["action"], "heartbeat");
        assert_eq!(frame["auth-token"], "session");
    }

    handle.stop();
    let sent = tokio::time::timeout(STEP_TIMEOUT, handle.join())
        .await
        .unwrap()
        .unwrap();
    assert!(sent >= 2);

    streamer.close();
}

#[tokio::test]
async fn transport_loss_is_reported_on_stream() {
    let server = MockServer::bind().await;
    let (streamer, mut events) = start(&server);
    let run = streamer.connect();

    let peer = server.accept().await;
    streamer.wait_for_connection(STEP_TIMEOUT).await.unwrap();
    let heartbeat = streamer.start_heartbeat(Duration::from_secs(60)).unwrap();

    peer.abort();

    let result = tokio::time::timeout(STEP_TIMEOUT, run).await.unwrap().unwrap();
    assert!(matches!(result, Err(AccountStreamError::Disconnected(_))));

    let last = next_event(&mut events).await;
    assert!(
        matches!(&last, AccountEvent::Disconnected { error: Some(e) } if e.contains("disconnected")),
        "unexpected terminal event: {last:?}"
    );
    assert!(events.next().await.is_none());

    // Connection teardown stops the heartbeat without a send
    let sent = tokio::time::timeout(STEP_TIMEOUT, heartbeat.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent, 0);

    assert!(matches!(
        streamer.public_watchlists_subscribe(),
        Err(AccountStreamError::NotReady)
    ));
}

#[tokio::test]
async fn wait_for_connection_fails_when_server_is_gone() {
    let server = MockServer::bind().await;
    let url = server.url().to_string();
    drop(server);

    let config = AccountStreamerConfig::new(url, Credential::new("session").unwrap());
    let (streamer, _events) = AccountStreamer::new(config);
    let streamer = Arc::new(streamer);
    let _run = streamer.connect();

    let err = streamer
        .wait_for_connection(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AccountStreamError::Disconnected(_)));
}
