//! Alert Stream Integration Tests
//!
//! Serves the router on a local port and talks to `/ws` as a real client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use price_alert_service::{
    Alert, AlertEngine, AlertHub, AppState, HubConfig, InMemoryRuleStore, InstrumentId, NewRule,
    ThresholdKind, Tick, create_router,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    store: Arc<InMemoryRuleStore>,
    hub: AlertHub,
    cancel: CancellationToken,
    url: String,
}

async fn serve() -> Server {
    let store = Arc::new(InMemoryRuleStore::new());
    let engine = Arc::new(AlertEngine::new(store.clone(), Duration::from_secs(300)));
    let cancel = CancellationToken::new();
    let (hub, _handle) = AlertHub::spawn(HubConfig::default(), cancel.clone());

    let router = create_router(AppState {
        store: store.clone(),
        engine,
        hub: hub.clone(),
        default_owner: Arc::from("demo-user"),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Server {
        store,
        hub,
        cancel,
        url: format!("ws://{addr}/ws"),
    }
}

async fn connect(server: &Server) -> Client {
    let (ws, _response) = tokio_tungstenite::connect_async(server.url.as_str())
        .await
        .unwrap();
    ws
}

/// Poll the hub until it reports `expected` subscribers.
async fn wait_for_subscribers(hub: &AlertHub, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while hub.stats().subscribers != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} subscribers, hub reports {}",
            hub.stats().subscribers
        )
    });
}

fn btc_alert(store: &InMemoryRuleStore) -> Alert {
    let rule = store.insert(NewRule {
        owner_id: "demo-user".to_string(),
        instrument_id: InstrumentId(1),
        kind: ThresholdKind::Above,
        threshold: Decimal::from(50_000),
    });
    let tick = Tick::new("BTC-USD", Decimal::from(50_500), Utc::now());
    Alert::triggered(&rule, &tick, Utc::now())
}

#[tokio::test]
async fn client_receives_alerts_as_text_frames() {
    let server = serve().await;
    let mut ws = connect(&server).await;
    wait_for_subscribers(&server.hub, 1).await;

    let alert = btc_alert(&server.store);
    let rule_id = alert.rule_id.get();
    server.hub.broadcast(alert);

    let frame = timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame, got {frame:?}");
    };
    let body: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(body["rule_id"], rule_id);
    assert_eq!(body["product_id"], 1);
    assert_eq!(body["symbol"], "BTC-USD");
    assert_eq!(body["type"], "above");

    server.cancel.cancel();
}

#[tokio::test]
async fn closing_the_client_unregisters_the_subscriber() {
    let server = serve().await;
    let mut first = connect(&server).await;
    let second = connect(&server).await;
    wait_for_subscribers(&server.hub, 2).await;

    first.close(None).await.unwrap();
    wait_for_subscribers(&server.hub, 1).await;

    drop(second);
    wait_for_subscribers(&server.hub, 0).await;

    server.cancel.cancel();
}

#[tokio::test]
async fn hub_shutdown_sends_a_close_frame() {
    let server = serve().await;
    let mut ws = connect(&server).await;
    wait_for_subscribers(&server.hub, 1).await;

    server.cancel.cancel();

    let frame = timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    match frame {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected the server to close the stream, got {other:?}"),
    }
    wait_for_subscribers(&server.hub, 0).await;
}
