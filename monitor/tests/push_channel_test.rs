//! Push channel integration tests
//!
//! Run the channel against a scripted WebSocket server: lifecycle event
//! translation, span-event re-fetch behavior, tolerance of unknown events,
//! and reconnection after the stream drops.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use ractor::{Actor, ActorRef};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use monitor::actors::push_channel::{PushChannelActor, PushChannelArguments, PushChannelMsg};
use monitor::actors::trace_store::{
    StoreSnapshot, TraceStoreActor, TraceStoreArguments, TraceStoreMsg,
};
use monitor::client::TraceApiClient;
use shared_types::{ConnectionStatus, RunStatus, TraceUpdate};

/// Sentinel telling the server-side socket task to drop the connection.
const CLOSE_SENTINEL: &str = "__close__";

#[derive(Clone)]
struct ServerState {
    events: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
    list_hits: Arc<AtomicUsize>,
    detail_hits: Arc<AtomicUsize>,
}

struct TestServer {
    addr: SocketAddr,
    state: ServerState,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn events_url(&self) -> String {
        format!("ws://{}/ws/events", self.addr)
    }

    fn push(&self, event: serde_json::Value) {
        self.state
            .events
            .send(event.to_string())
            .expect("push event to live socket");
    }

    fn drop_connection(&self) {
        let _ = self.state.events.send(CLOSE_SENTINEL.to_string());
    }
}

async fn ws_events(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: ServerState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut events = state.events.subscribe();
    while let Ok(text) = events.recv().await {
        if text == CLOSE_SENTINEL {
            break;
        }
        if socket.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn list_traces(State(state): State<ServerState>) -> impl IntoResponse {
    state.list_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!([]))
}

async fn get_trace(State(state): State<ServerState>, Path(id): Path<String>) -> impl IntoResponse {
    state.detail_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "id": id,
        "status": "running",
        "started_at": "2024-06-01T10:00:00Z",
    }))
}

async fn start_test_server() -> TestServer {
    let (events, _) = broadcast::channel(64);
    let state = ServerState {
        events,
        connections: Arc::new(AtomicUsize::new(0)),
        list_hits: Arc::new(AtomicUsize::new(0)),
        detail_hits: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/ws/events", get(ws_events))
        .route("/traces/", get(list_traces))
        .route("/traces/{id}", get(get_trace))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("Server failed");
    });

    TestServer {
        addr,
        state,
        handle,
    }
}

async fn spawn_store_and_channel(
    server: &TestServer,
) -> (ActorRef<TraceStoreMsg>, ActorRef<PushChannelMsg>) {
    let client = TraceApiClient::new(server.base_url());
    let (store, _store_handle) = Actor::spawn(
        None,
        TraceStoreActor,
        TraceStoreArguments {
            client: client.clone(),
        },
    )
    .await
    .expect("Failed to spawn trace store");

    let (channel, _channel_handle) = Actor::spawn(
        None,
        PushChannelActor,
        PushChannelArguments {
            events_url: server.events_url(),
            store: store.clone(),
            client,
            reconnect_delay: Duration::from_millis(100),
        },
    )
    .await
    .expect("Failed to spawn push channel");

    (store, channel)
}

async fn snapshot(store: &ActorRef<TraceStoreMsg>) -> StoreSnapshot {
    ractor::call!(store, |reply| TraceStoreMsg::GetSnapshot { reply }).expect("snapshot rpc")
}

async fn wait_for(
    store: &ActorRef<TraceStoreMsg>,
    what: &str,
    predicate: impl Fn(&StoreSnapshot) -> bool,
) -> StoreSnapshot {
    for _ in 0..100 {
        let snap = snapshot(store).await;
        if predicate(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_connected(server: &TestServer, store: &ActorRef<TraceStoreMsg>) {
    wait_for(store, "push channel connect", |s| {
        s.connection == ConnectionStatus::Connected
    })
    .await;
    for _ in 0..100 {
        if server.state.connections.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Let the server-side task reach its subscribe before the first push.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_trace_started_then_errored_trace_ended() {
    let server = start_test_server().await;
    let (store, _channel) = spawn_store_and_channel(&server).await;
    wait_connected(&server, &store).await;

    server.push(json!({
        "event_type": "trace_started",
        "trace_id": "t1",
        "data": {"input_prompt": "standing desk"},
    }));
    let snap = wait_for(&store, "trace_started", |s| s.traces.len() == 1).await;
    assert_eq!(snap.traces[0].status, RunStatus::Running);
    assert_eq!(snap.traces[0].input_prompt, "standing desk");

    server.push(json!({
        "event_type": "trace_ended",
        "trace_id": "t1",
        "data": {"error": "timeout"},
    }));
    let snap = wait_for(&store, "trace_ended", |s| {
        s.traces[0].status != RunStatus::Running
    })
    .await;
    // An error field always wins over "completed".
    assert_eq!(snap.traces[0].status, RunStatus::Error);
    assert_eq!(snap.traces[0].error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_span_event_refetches_instead_of_patching() {
    let server = start_test_server().await;
    let (store, _channel) = spawn_store_and_channel(&server).await;
    wait_connected(&server, &store).await;

    store
        .cast(TraceStoreMsg::UpsertTrace {
            update: TraceUpdate {
                id: "t1".to_string(),
                status: Some(RunStatus::Running),
                ..TraceUpdate::default()
            },
        })
        .unwrap();
    store
        .cast(TraceStoreMsg::SelectTrace {
            id: Some("t1".to_string()),
        })
        .unwrap();
    wait_for(&store, "detail fetch after select", |s| s.detail.is_some()).await;

    let list_before = server.state.list_hits.load(Ordering::SeqCst);
    let detail_before = server.state.detail_hits.load(Ordering::SeqCst);

    server.push(json!({
        "event_type": "span_ended",
        "trace_id": "t1",
        "span_id": "s1",
        "data": {},
    }));

    for _ in 0..100 {
        if server.state.detail_hits.load(Ordering::SeqCst) > detail_before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // One list re-fetch and exactly one detail re-fetch; no span patching.
    assert_eq!(
        server.state.list_hits.load(Ordering::SeqCst),
        list_before + 1
    );
    assert_eq!(
        server.state.detail_hits.load(Ordering::SeqCst),
        detail_before + 1
    );

    // A span event for a trace that is not selected re-fetches the list only.
    server.push(json!({
        "event_type": "span_ended",
        "trace_id": "t-other",
        "span_id": "s9",
        "data": {},
    }));
    for _ in 0..100 {
        if server.state.list_hits.load(Ordering::SeqCst) > list_before + 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        server.state.detail_hits.load(Ordering::SeqCst),
        detail_before + 1
    );
}

#[tokio::test]
async fn test_unrecognized_events_are_ignored() {
    let server = start_test_server().await;
    let (store, _channel) = spawn_store_and_channel(&server).await;
    wait_connected(&server, &store).await;

    server.push(json!({"event_type": "heartbeat"}));
    server.push(json!({"event_type": "agent_mood", "data": {"mood": "optimistic"}}));
    server.push(json!({
        "event_type": "trace_started",
        "trace_id": "t1",
        "data": {},
    }));

    // The channel survives unknown kinds and keeps processing.
    let snap = wait_for(&store, "trace after unknown events", |s| {
        s.traces.len() == 1
    })
    .await;
    assert_eq!(snap.traces[0].id, "t1");
}

#[tokio::test]
async fn test_reconnects_after_stream_drop() {
    let server = start_test_server().await;
    let (store, channel) = spawn_store_and_channel(&server).await;
    wait_connected(&server, &store).await;
    assert_eq!(server.state.connections.load(Ordering::SeqCst), 1);

    server.drop_connection();
    wait_for(&store, "disconnect", |s| {
        s.connection == ConnectionStatus::Disconnected
    })
    .await;

    // One reconnect attempt after the fixed delay.
    wait_for(&store, "reconnect", |s| {
        s.connection == ConnectionStatus::Connected
    })
    .await;
    assert!(server.state.connections.load(Ordering::SeqCst) >= 2);

    let status = ractor::call!(channel, |reply| PushChannelMsg::GetStatus { reply }).unwrap();
    assert_eq!(status, ConnectionStatus::Connected);
}
