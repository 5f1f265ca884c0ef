//! Poll scheduler integration tests
//!
//! Run the scheduler against a scripted trace API whose running state the
//! test flips at will: cadence adaptation, detail polling lifecycle, and
//! teardown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use ractor::{Actor, ActorRef};
use serde_json::json;
use tokio::net::TcpListener;

use monitor::actors::poller::{PollSchedulerActor, PollSchedulerArguments, PollerMsg};
use monitor::actors::trace_store::{TraceStoreActor, TraceStoreArguments, TraceStoreMsg};
use monitor::client::TraceApiClient;

const ACTIVE: Duration = Duration::from_millis(100);
const IDLE: Duration = Duration::from_millis(300);
const DETAIL: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct ServerState {
    running: Arc<AtomicBool>,
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

    fn set_running(&self, running: bool) {
        self.state.running.store(running, Ordering::SeqCst);
    }
}

fn trace_json(id: &str, running: bool) -> serde_json::Value {
    if running {
        json!({
            "id": id,
            "status": "running",
            "started_at": "2024-06-01T10:00:00Z",
        })
    } else {
        json!({
            "id": id,
            "status": "completed",
            "started_at": "2024-06-01T10:00:00Z",
            "ended_at": "2024-06-01T10:00:05Z",
        })
    }
}

async fn list_traces(State(state): State<ServerState>) -> impl IntoResponse {
    state.list_hits.fetch_add(1, Ordering::SeqCst);
    let running = state.running.load(Ordering::SeqCst);
    Json(json!([trace_json("t1", running)]))
}

async fn get_trace(State(state): State<ServerState>, Path(id): Path<String>) -> impl IntoResponse {
    state.detail_hits.fetch_add(1, Ordering::SeqCst);
    let running = state.running.load(Ordering::SeqCst);
    Json(trace_json(&id, running))
}

async fn start_test_server() -> TestServer {
    let state = ServerState {
        running: Arc::new(AtomicBool::new(false)),
        list_hits: Arc::new(AtomicUsize::new(0)),
        detail_hits: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
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

async fn spawn_store_and_scheduler(
    server: &TestServer,
) -> (ActorRef<TraceStoreMsg>, ActorRef<PollerMsg>) {
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

    let (scheduler, _scheduler_handle) = Actor::spawn(
        None,
        PollSchedulerActor,
        PollSchedulerArguments {
            client,
            store: store.clone(),
            active_interval: ACTIVE,
            idle_interval: IDLE,
            detail_interval: DETAIL,
        },
    )
    .await
    .expect("Failed to spawn poll scheduler");
    store
        .cast(TraceStoreMsg::BindScheduler {
            scheduler: scheduler.clone(),
        })
        .unwrap();

    (store, scheduler)
}

async fn list_interval(scheduler: &ActorRef<PollerMsg>) -> Duration {
    ractor::call!(scheduler, |reply| PollerMsg::GetListInterval { reply }).expect("interval rpc")
}

async fn wait_for_interval(scheduler: &ActorRef<PollerMsg>, expected: Duration) {
    for _ in 0..100 {
        if list_interval(scheduler).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for list interval {expected:?}");
}

#[tokio::test]
async fn test_list_interval_adapts_to_running_state() {
    let server = start_test_server().await;
    let (_store, scheduler) = spawn_store_and_scheduler(&server).await;

    // Nothing runs: the scheduler settles on the idle cadence.
    wait_for_interval(&scheduler, IDLE).await;

    // A running trace appears in the next poll: cadence tightens.
    server.set_running(true);
    wait_for_interval(&scheduler, ACTIVE).await;

    // Everything settles again: cadence relaxes.
    server.set_running(false);
    wait_for_interval(&scheduler, IDLE).await;

    // And the list keeps being fetched throughout.
    assert!(server.state.list_hits.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_detail_polls_only_while_selected_trace_runs() {
    let server = start_test_server().await;
    server.set_running(true);
    let (store, _scheduler) = spawn_store_and_scheduler(&server).await;

    store
        .cast(TraceStoreMsg::SelectTrace {
            id: Some("t1".to_string()),
        })
        .unwrap();

    // Selection + running trace: the detail endpoint gets a steady cadence.
    for _ in 0..100 {
        if server.state.detail_hits.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(server.state.detail_hits.load(Ordering::SeqCst) >= 3);

    // The trace finishing stops detail polling entirely.
    server.set_running(false);
    tokio::time::sleep(IDLE + DETAIL * 2).await;
    let settled = server.state.detail_hits.load(Ordering::SeqCst);
    tokio::time::sleep(IDLE + DETAIL * 2).await;
    assert_eq!(server.state.detail_hits.load(Ordering::SeqCst), settled);
}

#[tokio::test]
async fn test_teardown_cancels_timers() {
    let server = start_test_server().await;
    server.set_running(true);
    let (store, scheduler) = spawn_store_and_scheduler(&server).await;
    store
        .cast(TraceStoreMsg::SelectTrace {
            id: Some("t1".to_string()),
        })
        .unwrap();

    for _ in 0..100 {
        if server.state.list_hits.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    scheduler.stop(None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let list_after_stop = server.state.list_hits.load(Ordering::SeqCst);
    let detail_after_stop = server.state.detail_hits.load(Ordering::SeqCst);

    // No periodic work may survive the owning actor.
    tokio::time::sleep(ACTIVE * 4 + DETAIL * 4).await;
    assert_eq!(
        server.state.list_hits.load(Ordering::SeqCst),
        list_after_stop
    );
    assert_eq!(
        server.state.detail_hits.load(Ordering::SeqCst),
        detail_after_stop
    );
}
