//! HTTP Surface Integration Tests
//!
//! Serves the full router on an ephemeral port and talks to it with real
//! HTTP, WebSocket and SSE clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use common::{ScriptedProvider, fetcher, symbols};
use quote_broadcaster::{
    AppState, BroadcastConfig, Broadcaster, ChangeDetector, FetchResult, PollingScheduler,
    PushTiming, Quote, QuoteServer, SlowConsumerPolicy, Snapshot, Symbol,
};

const INDEX: &str = "<html><body>quotes</body></html>";

struct TestServer {
    addr: SocketAddr,
    broadcaster: Arc<Broadcaster>,
    scheduler: Arc<PollingScheduler>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    _static_dir: tempfile::TempDir,
}

impl TestServer {
    async fn start(provider: Arc<ScriptedProvider>) -> Self {
        let push = PushTiming {
            keepalive_interval: Duration::from_secs(60),
            send_timeout: Duration::from_secs(1),
        };
        Self::start_with(provider, push, BroadcastConfig::default()).await
    }

    async fn start_with(
        provider: Arc<ScriptedProvider>,
        push: PushTiming,
        broadcast: BroadcastConfig,
    ) -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), INDEX).unwrap();
        std::fs::write(static_dir.path().join("script.js"), "connect();").unwrap();

        let symbols = symbols(&["AAPL", "MSFT"]);
        let broadcaster = Arc::new(Broadcaster::new(broadcast));
        let scheduler = Arc::new(PollingScheduler::new(
            fetcher(Arc::clone(&provider)),
            symbols.clone(),
            Arc::new(ChangeDetector::new()),
            Arc::clone(&broadcaster),
            Duration::from_secs(5),
        ));
        let cancel = CancellationToken::new();

        let state = Arc::new(AppState::new(
            fetcher(provider),
            symbols,
            Arc::clone(&broadcaster),
            scheduler.status(),
            push,
            INDEX.to_string(),
            cancel.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = QuoteServer::new(0, static_dir.path().to_path_buf(), state, cancel.clone());
        let handle = tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self {
            addr,
            broadcaster,
            scheduler,
            cancel,
            handle,
            _static_dir: static_dir,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn wait_for_subscribers(&self, count: usize) {
        timeout(Duration::from_secs(2), async {
            while self.broadcaster.subscriber_count() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscriber count reached");
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server stops after cancel")
            .unwrap();
    }
}

fn default_provider() -> Arc<ScriptedProvider> {
    ScriptedProvider::with_prices(&[("AAPL", 15000), ("MSFT", 30000)])
}

#[tokio::test]
async fn poll_returns_fresh_snapshot() {
    let server = TestServer::start(default_provider()).await;

    let response = reqwest::get(server.url("/data")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(
        body,
        serde_json::json!({
            "message": "Welcome to the Stock Data API",
            "stock_data": {
                "AAPL": {"symbol": "AAPL", "price": 150.0},
                "MSFT": {"symbol": "MSFT", "price": 300.0}
            }
        })
    );

    server.shutdown().await;
}

#[tokio::test]
async fn poll_with_every_symbol_failing_returns_empty_data() {
    let server = TestServer::start(ScriptedProvider::with_prices(&[])).await;

    let body: serde_json::Value = reqwest::get(server.url("/data"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["stock_data"], serde_json::json!({}));
    assert_eq!(body["message"], "Welcome to the Stock Data API");

    server.shutdown().await;
}

#[tokio::test]
async fn index_and_static_assets_are_served() {
    let server = TestServer::start(default_provider()).await;

    let index = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(index.status(), 200);
    assert_eq!(index.text().await.unwrap(), INDEX);

    let script = reqwest::get(server.url("/static/script.js")).await.unwrap();
    assert_eq!(script.status(), 200);
    assert_eq!(script.text().await.unwrap(), "connect();");

    let favicon = reqwest::get(server.url("/favicon.ico")).await.unwrap();
    assert_eq!(favicon.status(), 204);

    let missing = reqwest::get(server.url("/static/nope.css")).await.unwrap();
    assert_eq!(missing.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn readiness_follows_first_round() {
    let server = TestServer::start(default_provider()).await;

    let before = reqwest::get(server.url("/readyz")).await.unwrap();
    assert_eq!(before.status(), 503);

    server.scheduler.run_round().await.unwrap();

    let after = reqwest::get(server.url("/readyz")).await.unwrap();
    assert_eq!(after.status(), 200);

    let health: serde_json::Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["scheduler"]["rounds_completed"], 1);

    server.shutdown().await;
}

#[tokio::test]
async fn websocket_receives_published_snapshots() {
    let server = TestServer::start(default_provider()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();
    server.wait_for_subscribers(1).await;

    server.scheduler.run_round().await.unwrap();

    let message = timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(message.is_text(), "expected text frame, got {message:?}");
    let payload: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
    assert_eq!(payload["AAPL"]["price"], 150.0);
    assert_eq!(payload["MSFT"]["price"], 300.0);

    socket.close(None).await.unwrap();
    server.wait_for_subscribers(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn websocket_replays_last_snapshot_on_connect() {
    let server = TestServer::start(default_provider()).await;
    server.scheduler.run_round().await.unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
    assert_eq!(payload["AAPL"]["symbol"], "AAPL");

    server.shutdown().await;
}

#[tokio::test]
async fn websocket_closes_on_shutdown() {
    let server = TestServer::start(default_provider()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();
    server.wait_for_subscribers(1).await;

    let broadcaster = Arc::clone(&server.broadcaster);
    server.shutdown().await;

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn sse_streams_published_snapshots() {
    let server = TestServer::start(default_provider()).await;

    let mut response = reqwest::get(server.url("/events")).await.unwrap();
    assert_eq!(response.status(), 200);
    server.wait_for_subscribers(1).await;

    let snapshot_published = server.scheduler.run_round().await.unwrap();
    assert!(snapshot_published.published);

    let mut received = String::new();
    timeout(Duration::from_secs(2), async {
        while !received.contains("\n\n") {
            let chunk = response.chunk().await.unwrap().expect("stream open");
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .unwrap();

    let field = |name: &str| {
        received
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .map(str::trim)
            .map(str::to_string)
            .expect("field present")
    };
    assert_eq!(field("id:"), "1");
    let data = field("data:");
    let payload: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert_eq!(payload["MSFT"]["price"], 300.0);

    drop(response);
    server.shutdown().await;
}

#[tokio::test]
async fn empty_snapshot_publishes_empty_object() {
    let server = TestServer::start(ScriptedProvider::with_prices(&[])).await;

    let report = server.scheduler.run_round().await.unwrap();
    assert!(report.published);

    let frame = server.broadcaster.last_frame().expect("frame recorded");
    assert_eq!(&*frame.payload, "{}");
    assert_eq!(Snapshot::empty(0).to_push_json(false).unwrap(), "{}");

    server.shutdown().await;
}

fn fast_keepalive() -> PushTiming {
    PushTiming {
        keepalive_interval: Duration::from_millis(100),
        send_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn websocket_pings_without_publish() {
    let server =
        TestServer::start_with(default_provider(), fast_keepalive(), BroadcastConfig::default())
            .await;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    let message = timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("keep-alive within deadline")
        .unwrap()
        .unwrap();
    assert!(matches!(message, Message::Ping(_)), "got {message:?}");
    assert_eq!(server.broadcaster.stats().frames_published, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn sse_sends_keepalive_comments_without_publish() {
    let server =
        TestServer::start_with(default_provider(), fast_keepalive(), BroadcastConfig::default())
            .await;

    let mut response = reqwest::get(server.url("/events")).await.unwrap();

    let mut received = String::new();
    timeout(Duration::from_secs(2), async {
        while !received.lines().any(|line| line.starts_with(':')) {
            let chunk = response.chunk().await.unwrap().expect("stream open");
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .expect("keep-alive comment within deadline");

    assert!(!received.contains("data:"));

    drop(response);
    server.shutdown().await;
}

/// Snapshot carrying a large intraday history so each frame is big enough to
/// fill socket buffers quickly.
fn heavy_snapshot(round_id: u64) -> Snapshot {
    let history = vec![Decimal::new(12_345, 2); 25_000];
    let price = Decimal::from(round_id);
    let quote = Quote::new(Symbol::new("AAPL"), price, history);
    Snapshot::aggregate([FetchResult::Fetched(quote)], round_id)
}

#[tokio::test]
async fn stalled_client_does_not_delay_healthy_client() {
    let push = PushTiming {
        keepalive_interval: Duration::from_secs(60),
        send_timeout: Duration::from_millis(200),
    };
    let broadcast = BroadcastConfig {
        queue_capacity: 4,
        slow_consumer_policy: SlowConsumerPolicy::Disconnect,
        replay_last_on_connect: false,
        include_history: true,
    };
    let server = TestServer::start_with(default_provider(), push, broadcast).await;

    let (_stalled, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
    let (mut healthy, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
    server.wait_for_subscribers(2).await;

    for round in 1..=100_u32 {
        server
            .broadcaster
            .publish(&heavy_snapshot(u64::from(round)))
            .unwrap();

        let message = timeout(Duration::from_secs(1), healthy.next())
            .await
            .expect("healthy client not held up")
            .unwrap()
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(payload["AAPL"]["price"], f64::from(round));
    }

    // Stalled client is removed by eviction or by its send timeout.
    server.wait_for_subscribers(1).await;

    server.shutdown().await;
}
