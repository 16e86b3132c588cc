use formpilot_agent::{HttpAutomationEngine, OrchestratorSettings, TaskOrchestrator};
use formpilot_browser::{BrowserSupervisor, CdpPageInspector};
use formpilot_core::{Config, Decision, Error, JobRequest, JobSnapshot, Paths, ProgressEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use axum::{
    body::Bytes,
    extract::{
        rejection::JsonRejection,
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, Query, State,
    },
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// ---------------------------------------------------------------------------
// WebSocket event types
// ---------------------------------------------------------------------------

/// Frames pushed to a job's WebSocket observers. The current snapshot goes
/// first, every later change follows as a `progress` frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsEvent {
    Snapshot(JobSnapshot),
    Progress(ProgressEvent),
}

// ---------------------------------------------------------------------------
// Shared state passed to HTTP/WS handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct GatewayState {
    orchestrator: TaskOrchestrator,
    api_token: Option<String>,
    port: u16,
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn token_from_query<B>(req: &Request<B>) -> Option<String> {
    Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove("token"))
}

// ---------------------------------------------------------------------------
// Bearer token authentication middleware
// ---------------------------------------------------------------------------

async fn auth_middleware(
    State(state): State<GatewayState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match &state.api_token {
        Some(t) if !t.is_empty() => t,
        _ => return next.run(req).await,
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = match auth_header {
        Some(h) if h.starts_with("Bearer ") => secure_eq(&h[7..], token.as_str()),
        _ => false,
    };

    // Browsers cannot set headers on a WebSocket handshake.
    let authorized = authorized
        || token_from_query(&req)
            .map(|v| secure_eq(&v, token.as_str()))
            .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized: invalid or missing Bearer token").into_response()
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_caller_error() => StatusCode::BAD_REQUEST,
            Error::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn handle_root(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "service": "formpilot",
        "port": state.port,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    let report = state.orchestrator.health().await;
    Json(json!({
        "status": if report.ready { "healthy" } else { "degraded" },
        "problems": report.problems(),
        "report": report,
    }))
}

async fn handle_create_job(
    State(state): State<GatewayState>,
    body: std::result::Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body.map_err(|e| Error::InvalidSpec(e.body_text()))?;
    let job_id = state.orchestrator.create_job(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job_id, "state": "queued" })),
    ))
}

async fn handle_list_jobs(State(state): State<GatewayState>) -> impl IntoResponse {
    let jobs = state.orchestrator.list_jobs().await;
    let summary = state.orchestrator.summary().await;
    Json(json!({ "jobs": jobs, "summary": summary }))
}

async fn handle_job_status(
    State(state): State<GatewayState>,
    AxumPath(job_id): AxumPath<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.orchestrator.get_status(&job_id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct DecisionRequest {
    action: Option<String>,
}

async fn handle_decision(
    State(state): State<GatewayState>,
    AxumPath(job_id): AxumPath<String>,
    Query(query): Query<DecisionRequest>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        DecisionRequest::default()
    } else {
        serde_json::from_slice::<DecisionRequest>(&body)
            .map_err(|e| Error::InvalidSpec(format!("decision body: {}", e)))?
    };
    let action = from_body
        .action
        .or(query.action)
        .ok_or_else(|| Error::InvalidSpec("action is required (submit or cancel)".to_string()))?;
    let decision = Decision::parse(&action)
        .ok_or_else(|| Error::InvalidSpec(format!("unknown action '{}'", action)))?;

    state.orchestrator.decide(&job_id, decision).await?;
    Ok(Json(json!({ "jobId": job_id, "action": decision, "accepted": true })))
}

async fn handle_cancel(
    State(state): State<GatewayState>,
    AxumPath(job_id): AxumPath<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.orchestrator.cancel_job(&job_id).await?))
}

// ---------------------------------------------------------------------------
// WebSocket progress stream
// ---------------------------------------------------------------------------

async fn handle_ws_upgrade(
    State(state): State<GatewayState>,
    AxumPath(job_id): AxumPath<String>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    // Subscribe before reading the snapshot so no change falls between them.
    let events = state.orchestrator.subscribe(&job_id).await?;
    let snapshot = state.orchestrator.get_status(&job_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, snapshot, events)))
}

async fn handle_ws_connection(
    socket: WebSocket,
    snapshot: JobSnapshot,
    mut events: broadcast::Receiver<ProgressEvent>,
) {
    use futures::{SinkExt, StreamExt};

    let job_id = snapshot.job_id.clone();
    debug!(job_id = %job_id, "WebSocket observer connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let finished = snapshot.state.is_terminal();
    if send_event(&mut ws_sender, &WsEvent::Snapshot(snapshot)).await.is_err() {
        return;
    }

    if !finished {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let terminal = event.state.is_terminal();
                        if send_event(&mut ws_sender, &WsEvent::Progress(event)).await.is_err() {
                            return;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(job_id = %job_id, skipped, "WebSocket observer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(job_id = %job_id, "WebSocket observer left");
                        return;
                    }
                    Some(Err(e)) => {
                        debug!(job_id = %job_id, error = %e, "WebSocket receive error");
                        return;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    let _ = ws_sender
        .send(WsMessage::Close(Some(CloseFrame {
            code: axum::extract::ws::close_code::NORMAL,
            reason: std::borrow::Cow::Borrowed("job finished"),
        })))
        .await;
}

async fn send_event<S>(sender: &mut S, event: &WsEvent) -> std::result::Result<(), ()>
where
    S: futures::Sink<WsMessage> + Unpin,
{
    use futures::SinkExt;

    let text = serde_json::to_string(event).map_err(|_| ())?;
    sender.send(WsMessage::Text(text)).await.map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Router and server
// ---------------------------------------------------------------------------

fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/jobs", get(handle_list_jobs).post(handle_create_job))
        .route("/v1/jobs/:id", get(handle_job_status))
        .route("/v1/jobs/:id/decision", post(handle_decision))
        .route("/v1/jobs/:id/cancel", post(handle_cancel))
        .route("/v1/jobs/:id/ws", get(handle_ws_upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        // Public endpoints, outside the auth middleware
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the production browser supervisor, page inspector and engine adapter.
pub(crate) fn build_orchestrator(config: &Config, paths: &Paths) -> TaskOrchestrator {
    TaskOrchestrator::new(
        Arc::new(BrowserSupervisor::new(&config.browser, paths)),
        Arc::new(CdpPageInspector::new()),
        Arc::new(HttpAutomationEngine::from_config(&config.engine)),
        OrchestratorSettings::from_config(config),
    )
}

fn spawn_purge_sweeper(
    orchestrator: TaskOrchestrator,
    every: Duration,
    max_age: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = orchestrator.purge_finished(max_age).await;
                    if purged > 0 {
                        info!(purged, "Purged finished jobs");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let host = cli_host.unwrap_or_else(|| config.server.host.clone());
    let port = cli_port.unwrap_or(config.server.port);

    let orchestrator = build_orchestrator(&config, &paths);
    let api_token = config.api_token();
    if api_token.is_none() && host != "127.0.0.1" && host != "localhost" {
        warn!(host = %host, "Gateway is exposed without server.apiToken; /v1 routes are open");
    }

    let report = orchestrator.health().await;
    for problem in report.problems() {
        warn!("{}", problem);
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let sweeper_handle = spawn_purge_sweeper(
        orchestrator.clone(),
        Duration::from_secs(config.jobs.sweep_interval_secs.max(1)),
        Duration::from_secs(config.jobs.retention_secs),
        shutdown_tx.subscribe(),
    );

    let app = build_router(GatewayState {
        orchestrator: orchestrator.clone(),
        api_token,
        port,
    });

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    let mut http_shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
            })
            .await
        {
            error!(error = %e, "HTTP server stopped with error");
        }
    });

    println!();
    println!("🚀 formpilot gateway listening on http://{}", bind_addr);
    println!("   Health:    http://{}/health", bind_addr);
    println!("   Jobs API:  http://{}/v1/jobs", bind_addr);
    println!(
        "   Engine:    {}",
        config.engine.endpoint().unwrap_or_else(|| "not configured".to_string())
    );
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cancelling jobs...");

    // Cancelling first lets open progress streams see their terminal event.
    let cancelled = orchestrator.cancel_all().await;
    if cancelled > 0 {
        info!(cancelled, "Cancelled unfinished jobs");
    }
    let _ = shutdown_tx.send(());

    let drain = async {
        let _ = http_handle.await;
        let _ = sweeper_handle.await;
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("Gateway did not drain within 10s, exiting anyway");
    }

    info!("Gateway stopped");
    Ok(())
}
