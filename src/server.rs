use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::execute::{self, AgentOutcome, OutcomeStatus, Task};
use crate::harness::Harness;

#[derive(Clone)]
pub struct AppState {
    harness: Arc<dyn Harness>,
    inner: Arc<RwLock<ServerState>>, // run status, last outcome and the active run's token
}

#[derive(Debug, Default)]
struct ServerState {
    status: Status,
    outcome: Option<AgentOutcome>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub state: String, // "idle" | "running" | "done"
    pub task_id: Option<String>,
    pub outcome: Option<OutcomeStatus>,
}

impl AppState {
    pub fn new(harness: Arc<dyn Harness>) -> Self {
        Self {
            harness,
            inner: Arc::new(RwLock::new(ServerState {
                status: Status { state: "idle".into(), ..Status::default() },
                ..ServerState::default()
            })),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/run", post(post_run))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, harness: Arc<dyn Harness>) -> Result<()> {
    let app = router(AppState::new(harness));
    info!(%bind, "serving diagnostics API");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(outcome) = s.outcome.as_ref() {
        (StatusCode::OK, Json(outcome.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_run(State(app): State<AppState>, Json(task): Json<Task>) -> impl IntoResponse {
    let cancel = CancellationToken::new();

    {
        let mut s = app.inner.write().await;
        // Cancel any existing run
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.status = Status { state: "running".into(), task_id: Some(task.id.clone()), outcome: None };
        s.outcome = None;
        s.cancel = Some(cancel.clone());
    }

    let app2 = app.clone();
    let status = Status { state: "running".into(), task_id: Some(task.id.clone()), outcome: None };
    tokio::spawn(async move {
        let outcome = execute::execute(Arc::clone(&app2.harness), &task, &cancel).await;
        if let Some(e) = outcome.error.as_deref() {
            error!(task_id = %task.id, error = e, "run failed");
        }

        let mut s = app2.inner.write().await;
        // A newer run cancelled our token and owns the state now.
        if !cancel.is_cancelled() {
            s.status.state = "done".into();
            s.status.outcome = Some(outcome.status);
            s.outcome = Some(outcome);
            s.cancel = None;
        }
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}
