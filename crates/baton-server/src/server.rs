use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use baton_protocol::SUBPROTOCOL;
use baton_token::{ClientId, InMemorySubstrate, Substrate, TokenName};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{metrics::Metrics, session, ServerConfig};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) cfg: Arc<ServerConfig>,
    pub(crate) substrate: InMemorySubstrate,
    pub(crate) metrics: Metrics,
    /// Client ids with a live session; a second connection under the same id is refused.
    pub(crate) clients: Arc<Mutex<HashSet<ClientId>>>,
    pub(crate) shutting_down: Arc<AtomicBool>,
    /// Cancelled on shutdown; every session closes with `1001 Going Away`.
    pub(crate) sessions: CancellationToken,
}

pub struct ServerHandle {
    addr: SocketAddr,
    shutting_down: Arc<AtomicBool>,
    sessions: CancellationToken,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Flip `/readyz` to 503 and refuse new sessions; existing sessions keep running.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub async fn shutdown(mut self) {
        self.mark_shutting_down();
        self.sessions.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.sessions.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub async fn start_server(cfg: ServerConfig) -> std::io::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let addr = listener.local_addr()?;

    let shutting_down = Arc::new(AtomicBool::new(false));
    let sessions = CancellationToken::new();
    let state = AppState {
        substrate: InMemorySubstrate::with_handoff_timeout(cfg.handoff_timeout),
        cfg: Arc::new(cfg),
        metrics: Metrics::new(),
        clients: Arc::default(),
        shutting_down: Arc::clone(&shutting_down),
        sessions: sessions.clone(),
    };
    let app = build_app(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Ok(ServerHandle {
        addr,
        shutting_down,
        sessions,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/tokens/:name", get(token_snapshot))
        .route("/baton", get(baton_ws_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.shutting_down.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render_prometheus(state.substrate.stats());
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

async fn token_snapshot(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Ok(token) = TokenName::new(name) else {
        return (StatusCode::BAD_REQUEST, "invalid token name").into_response();
    };
    match state.substrate.snapshot(&token).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn baton_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if !has_subprotocol(&headers, SUBPROTOCOL) {
        return (
            StatusCode::BAD_REQUEST,
            format!("missing required websocket subprotocol {SUBPROTOCOL:?}"),
        )
            .into_response();
    }
    if state.shutting_down.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_baton_ws(socket, state))
}

async fn handle_baton_ws(socket: WebSocket, state: AppState) {
    let session_id = state.metrics.next_session_id();
    let span = tracing::info_span!("session", session_id);
    if let Err(err) = session::run_session(socket, state, session_id)
        .instrument(span)
        .await
    {
        tracing::debug!(session_id, "baton session ended: {err:#}");
    }
}

fn has_subprotocol(headers: &HeaderMap, required: &str) -> bool {
    let Some(value) = headers
        .get(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    value
        .split(',')
        .map(str::trim)
        .any(|proto| proto == required)
}
