use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::services::scheduler::{InMemoryJobStore, JobStore, SchedulerError, StoreBackend};
use crate::types::models::{AnalysisJob, JobPatch, NewJob};

/// A stub upstream served on an ephemeral port; shuts down when dropped.
pub struct StubServer {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    _shutdown: oneshot::Sender<()>,
}

impl StubServer {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn spawn_http_server(app: Router, hits: Arc<AtomicUsize>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });
    StubServer {
        url: format!("http://{addr}"),
        hits,
        _shutdown: shutdown_tx,
    }
}

/// Serves `GET /wallets/count` with a fixed status and body, after an optional delay.
pub async fn spawn_wallet_api(status: StatusCode, body: &'static str, delay: Duration) -> StubServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/wallets/count",
        axum::routing::get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                (status, body)
            }
        }),
    );
    spawn_http_server(app, hits).await
}

/// Serves `POST /` as the analysis function with a fixed status and body.
pub async fn spawn_analysis_function(status: StatusCode, body: &'static str) -> StubServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/",
        axum::routing::post(move |axum::Json(_payload): axum::Json<serde_json::Value>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, [(axum::http::header::CONTENT_TYPE, "application/json")], body)
            }
        }),
    );
    spawn_http_server(app, hits).await
}

/// Wraps the in-memory store and fails chosen updates, or every run, like an unavailable scheduler.
pub struct FailingStore {
    inner: InMemoryJobStore,
    failing_updates: Vec<String>,
    failing_runs: bool,
}

impl FailingStore {
    pub fn new(inner: InMemoryJobStore) -> Self {
        Self {
            inner,
            failing_updates: Vec::new(),
            failing_runs: false,
        }
    }

    pub fn failing_update(mut self, id: &str) -> Self {
        self.failing_updates.push(id.to_string());
        self
    }

    pub fn failing_runs(mut self) -> Self {
        self.failing_runs = true;
        self
    }

    fn unavailable() -> SchedulerError {
        SchedulerError::Api {
            status: 503,
            message: "scheduler unavailable".to_string(),
        }
    }
}

#[async_trait]
impl JobStore for FailingStore {
    fn backend(&self) -> StoreBackend {
        self.inner.backend()
    }

    async fn list(&self) -> Result<Vec<AnalysisJob>, SchedulerError> {
        self.inner.list().await
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, SchedulerError> {
        self.inner.get(id).await
    }

    async fn create(&self, job: &NewJob) -> Result<AnalysisJob, SchedulerError> {
        self.inner.create(job).await
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<AnalysisJob, SchedulerError> {
        if self.failing_updates.iter().any(|failing| failing == id) {
            return Err(Self::unavailable());
        }
        self.inner.update(id, patch).await
    }

    async fn pause(&self, id: &str) -> Result<(), SchedulerError> {
        self.inner.pause(id).await
    }

    async fn resume(&self, id: &str) -> Result<(), SchedulerError> {
        self.inner.resume(id).await
    }

    async fn run(&self, id: &str) -> Result<(), SchedulerError> {
        if self.failing_runs {
            return Err(Self::unavailable());
        }
        self.inner.run(id).await
    }

    async fn delete(&self, id: &str) -> Result<(), SchedulerError> {
        self.inner.delete(id).await
    }
}
