//! Price Feed Integration Tests
//!
//! Runs the feed client and supervisor against a local WebSocket server
//! that speaks the ticker protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use price_alert_service::infrastructure::coinbase::{
    BackoffConfig, FeedClient, FeedError, FeedEvent, FeedStats, FeedSupervisor,
};

const SUBSCRIPTIONS_ACK: &str = r#"{
    "channel": "subscriptions",
    "timestamp": "2026-02-09T20:30:37Z",
    "sequence_num": 1,
    "events": [{"subscriptions": {"ticker": ["BTC-USD"]}}]
}"#;

fn ticker_frame(product: &str, price: &str) -> String {
    format!(
        r#"{{
            "channel": "ticker",
            "timestamp": "2026-02-09T20:30:38Z",
            "sequence_num": 2,
            "events": [{{"type": "update", "tickers": [{{"product_id": "{product}", "price": "{price}"}}]}}]
        }}"#
    )
}

fn products() -> BTreeSet<String> {
    BTreeSet::from(["BTC-USD".to_string()])
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}"))
}

/// Accept one client and consume its two subscribe requests.
async fn accept_subscriber(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

    let ticker = ws.next().await.unwrap().unwrap().into_text().unwrap();
    assert!(ticker.contains(r#""channel":"ticker""#));
    assert!(ticker.contains("BTC-USD"));

    let heartbeats = ws.next().await.unwrap().unwrap().into_text().unwrap();
    assert!(heartbeats.contains(r#""channel":"heartbeats""#));

    ws
}

#[tokio::test]
async fn subscribes_and_streams_ticks() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept_subscriber(&listener).await;
        ws.send(Message::Text(SUBSCRIPTIONS_ACK.into())).await.unwrap();
        ws.send(Message::Text(r#"{"channel": "heartbeats", "events": []}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(Message::Text(ticker_frame("BTC-USD", "50123.45").into()))
            .await
            .unwrap();
        // Hold the connection open until the client closes it.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let stats = Arc::new(FeedStats::new());
    let client = FeedClient::new(url, Duration::from_secs(5), Arc::clone(&stats));
    let mut connection = client.connect().await.unwrap();
    connection.subscribe(&products()).await.unwrap();

    let (tick_tx, mut tick_rx) = mpsc::channel(8);
    let (event_tx, _event_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let session =
        tokio::spawn(async move { connection.run(&tick_tx, &event_tx, &run_cancel).await });

    let tick = timeout(Duration::from_secs(5), tick_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.symbol, "BTC-USD");
    assert_eq!(tick.price, Decimal::from_str("50123.45").unwrap());

    cancel.cancel();
    assert!(session.await.unwrap().is_ok());
    assert_eq!(stats.ticks_received(), 1);
    assert_eq!(stats.decode_errors(), 1);
    assert!(stats.last_tick_at().is_some());

    server.await.unwrap();
}

#[tokio::test]
async fn ticks_sent_before_the_ack_are_replayed() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept_subscriber(&listener).await;
        ws.send(Message::Text(ticker_frame("BTC-USD", "1.5").into()))
            .await
            .unwrap();
        ws.send(Message::Text(SUBSCRIPTIONS_ACK.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = FeedClient::new(url, Duration::from_secs(5), Arc::new(FeedStats::new()));
    let mut connection = client.connect().await.unwrap();
    connection.subscribe(&products()).await.unwrap();

    let (tick_tx, mut tick_rx) = mpsc::channel(8);
    let (event_tx, _event_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let session =
        tokio::spawn(async move { connection.run(&tick_tx, &event_tx, &run_cancel).await });

    let tick = timeout(Duration::from_secs(5), tick_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.price, Decimal::from_str("1.5").unwrap());

    cancel.cancel();
    session.await.unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn error_frame_rejects_subscription() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept_subscriber(&listener).await;
        ws.send(Message::Text(
            r#"{"type": "error", "message": "unknown product BTC-USD"}"#.into(),
        ))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = FeedClient::new(url, Duration::from_secs(5), Arc::new(FeedStats::new()));
    let mut connection = client.connect().await.unwrap();
    let err = connection.subscribe(&products()).await.unwrap_err();

    match err {
        FeedError::Subscription(message) => assert!(message.contains("unknown product")),
        other => panic!("expected subscription error, got {other:?}"),
    }

    drop(connection);
    server.await.unwrap();
}

#[tokio::test]
async fn silent_feed_times_out() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept_subscriber(&listener).await;
        ws.send(Message::Text(SUBSCRIPTIONS_ACK.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = FeedClient::new(url, Duration::from_millis(200), Arc::new(FeedStats::new()));
    let mut connection = client.connect().await.unwrap();
    connection.subscribe(&products()).await.unwrap();

    let (tick_tx, _tick_rx) = mpsc::channel(8);
    let (event_tx, _event_rx) = mpsc::channel(8);
    let result = timeout(
        Duration::from_secs(5),
        connection.run(&tick_tx, &event_tx, &CancellationToken::new()),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(FeedError::IdleTimeout(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn supervisor_reconnects_after_the_server_drops() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // First session delivers one tick and hangs up.
        let mut ws = accept_subscriber(&listener).await;
        ws.send(Message::Text(SUBSCRIPTIONS_ACK.into())).await.unwrap();
        ws.send(Message::Text(ticker_frame("BTC-USD", "100").into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        // Second session stays up.
        let mut ws = accept_subscriber(&listener).await;
        ws.send(Message::Text(SUBSCRIPTIONS_ACK.into())).await.unwrap();
        ws.send(Message::Text(ticker_frame("BTC-USD", "101").into()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter_factor: 0.0,
        ..BackoffConfig::default()
    };
    let client = FeedClient::new(url, Duration::from_secs(5), Arc::new(FeedStats::new()));
    let (tick_tx, mut tick_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let supervisor = FeedSupervisor::new(
        client,
        products(),
        backoff,
        tick_tx,
        event_tx,
        cancel.clone(),
    );
    let handle = tokio::spawn(supervisor.run());

    for expected in ["100", "101"] {
        let tick = timeout(Duration::from_secs(5), tick_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tick.price, Decimal::from_str(expected).unwrap());
    }

    cancel.cancel();
    assert!(handle.await.unwrap().is_ok());

    let mut events = Vec::new();
    while let Some(event) = event_rx.recv().await {
        events.push(event);
    }

    let subscribed = events
        .iter()
        .filter(|e| matches!(e, FeedEvent::Subscribed { .. }))
        .count();
    assert_eq!(subscribed, 2);
    assert!(events.iter().any(|e| matches!(e, FeedEvent::Disconnected { .. })));
    assert!(events.iter().any(|e| matches!(e, FeedEvent::Reconnecting { attempt: 1, .. })));
    assert_eq!(events.last(), Some(&FeedEvent::Stopped));

    server.await.unwrap();
}
