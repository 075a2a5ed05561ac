//! Test harness for render gateway integration tests.
//!
//! Provides mock render workers (real HTTP servers on loopback), a gateway
//! spawned over an in-memory fleet, and polling helpers.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use mapanim_fleet::InMemoryFleet;
use mapanim_gateway::{
    allocator::AdmissionConfig, api, probe::ProbeConfig, proxy::ProxyConfig, Gateway,
    GatewaySettings,
};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};

pub const SHUTDOWN_KEY: &str = "test-shutdown-key";
pub const WORKER_KEY: &str = "test-worker-key";

/// Chunks every mock worker streams back for a render.
pub const ARTIFACT_CHUNKS: [&str; 3] = ["frame-1;", "frame-2;", "frame-3;"];

pub fn artifact() -> String {
    ARTIFACT_CHUNKS.concat()
}

/// Shared gate that holds renders until permits are added.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    /// Let `n` held renders finish.
    pub fn open(&self, n: usize) {
        self.0.add_permits(n);
    }
}

#[derive(Default)]
struct WorkerState {
    name: String,
    gate: Option<Gate>,
    render_delay: Duration,
    break_stream: bool,
    health_status: AtomicU16,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    renders: AtomicU32,
    last_api_key: Mutex<Option<String>>,
    last_body: Mutex<Option<Vec<u8>>>,
}

pub struct MockWorker {
    pub addr: SocketAddr,
    state: Arc<WorkerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockWorker {
    pub async fn spawn(name: &str) -> Self {
        Self::spawn_with(name, None, Duration::ZERO, false).await
    }

    pub async fn spawn_gated(name: &str, gate: &Gate) -> Self {
        Self::spawn_with(name, Some(gate.clone()), Duration::ZERO, false).await
    }

    pub async fn spawn_slow(name: &str, render_delay: Duration) -> Self {
        Self::spawn_with(name, None, render_delay, false).await
    }

    /// A worker that sends the first chunk and then aborts the stream.
    pub async fn spawn_broken(name: &str) -> Self {
        Self::spawn_with(name, None, Duration::ZERO, true).await
    }

    async fn spawn_with(
        name: &str,
        gate: Option<Gate>,
        render_delay: Duration,
        break_stream: bool,
    ) -> Self {
        let state = Arc::new(WorkerState {
            name: name.to_string(),
            gate,
            render_delay,
            break_stream,
            health_status: AtomicU16::new(200),
            ..Default::default()
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/render", post(render))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn set_health_status(&self, status: u16) {
        self.state.health_status.store(status, Ordering::SeqCst);
    }

    pub fn renders(&self) -> u32 {
        self.state.renders.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_api_key(&self) -> Option<String> {
        self.state.last_api_key.lock().unwrap().clone()
    }

    pub fn last_body(&self) -> Option<Vec<u8>> {
        self.state.last_body.lock().unwrap().clone()
    }
}

impl Drop for MockWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn health(State(state): State<Arc<WorkerState>>) -> StatusCode {
    StatusCode::from_u16(state.health_status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

async fn render(
    State(state): State<Arc<WorkerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    state.renders.fetch_add(1, Ordering::SeqCst);
    *state.last_api_key.lock().unwrap() = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.last_body.lock().unwrap() = Some(body.to_vec());

    if let Some(gate) = &state.gate {
        gate.0.acquire().await.unwrap().forget();
    }
    tokio::time::sleep(state.render_delay).await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let mut chunks: Vec<io::Result<Bytes>> = ARTIFACT_CHUNKS
        .iter()
        .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
        .collect();
    if state.break_stream {
        chunks.truncate(1);
        chunks.push(Err(io::Error::other("renderer crashed")));
    }
    (
        StatusCode::OK,
        [
            ("content-type", "video/mp4".to_string()),
            ("x-render-worker", state.name.clone()),
        ],
        Body::from_stream(futures_util::stream::iter(chunks)),
    )
        .into_response()
}

/// Settings with short intervals so failure paths finish quickly.
pub fn fast_settings(max_workers: u32) -> GatewaySettings {
    GatewaySettings {
        max_workers,
        shutdown_key: SHUTDOWN_KEY.to_string(),
        admission: AdmissionConfig {
            poll_attempts: 50,
            poll_interval: Duration::from_millis(20),
        },
        probe: ProbeConfig {
            max_attempts: 3,
            interval: Duration::from_millis(10),
            request_timeout: Duration::from_millis(200),
        },
        proxy: ProxyConfig {
            render_timeout: Duration::from_secs(10),
            worker_api_key: Some(WORKER_KEY.to_string()),
        },
    }
}

pub struct GatewayHandle {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    pub fleet: Arc<InMemoryFleet>,
    pub client: reqwest::Client,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl GatewayHandle {
    pub async fn spawn(fleet: Arc<InMemoryFleet>, settings: GatewaySettings) -> Self {
        let gateway = Gateway::new(fleet.clone(), settings).unwrap();
        let app = api::create_router(gateway.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            gateway,
            fleet,
            client: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn submit(&self, job: &str) -> reqwest::Response {
        self.client
            .post(self.url("/render"))
            .header("content-type", "application/json")
            .body(job.to_string())
            .send()
            .await
            .unwrap()
    }

    pub async fn shutdown(&self, key: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(self.url("/shutdown"));
        if let Some(key) = key {
            request = request.header("x-api-key", key);
        }
        request.send().await.unwrap()
    }

    pub async fn status(&self) -> serde_json::Value {
        self.client
            .get(self.url("/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
