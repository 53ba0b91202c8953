//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::backend::Backends;
use crate::config::Config;
use crate::gateway::{GatewayError, TaskGateway, TaskStats};
use crate::llm::OpenRouterClient;
use crate::pipeline::{EngineOptions, PipelineEngine};
use crate::task::{InMemoryTaskStore, SharedTaskStore, TaskId, TaskStatus, TaskView};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub gateway: TaskGateway,
}

impl AppState {
    /// Wire the production back-ends, store and engine from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut client = OpenRouterClient::new(config.require_api_key()?.to_string());
        if let Some(endpoint) = &config.llm_endpoint {
            client = client.with_endpoint(endpoint.clone());
        }
        let backends = Backends::llm(Arc::new(client), config.models.clone())?;

        let store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let engine = Arc::new(PipelineEngine::new(
            Arc::clone(&store),
            backends,
            EngineOptions::from(&config.pipeline),
        ));
        let gateway = TaskGateway::new(
            store,
            engine,
            config.pipeline.clone(),
            config.models.clone(),
        );
        Ok(Self { gateway })
    }
}

/// All API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/dashboards/generate", post(generate_dashboard))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/stats", get(task_stats))
        .route("/api/tasks/:id", get(get_task).delete(delete_task))
        .route("/api/tasks/:id/feedback", post(submit_feedback))
        .route("/api/models", get(list_models))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    tracing::info!(
        "Pipeline defaults: max_retries={}, augmentation={}, backoff={:?}, feedback={:?}",
        config.pipeline.max_retries,
        config.pipeline.use_augmentation,
        config.pipeline.retry_backoff,
        config.pipeline.feedback_policy
    );

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT and report what is being dropped.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");

    match state.gateway.stats().await {
        Ok(stats) if stats.pending + stats.awaiting_review > 0 => {
            tracing::warn!(
                "Dropping {} running and {} review-pending tasks",
                stats.pending,
                stats.awaiting_review
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Failed to collect task stats: {}", e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn error_response(err: GatewayError) -> (StatusCode, String) {
    let status = match &err {
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::InvalidState(_) => StatusCode::CONFLICT,
        GatewayError::FeedbackRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match &err {
        GatewayError::FeedbackRejected(report) => {
            let details: Vec<String> = report
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.location, e.message))
                .collect();
            format!("{}\n{}", err, details.join("\n"))
        }
        _ => err.to_string(),
    };
    (status, message)
}

/// Malformed or mistyped JSON bodies are bad requests, like any other shape error.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, (StatusCode, String)> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let status = match &rejection {
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                StatusCode::BAD_REQUEST
            }
            other => other.status(),
        };
        (status, rejection.body_text())
    })
}

fn parse_task_id(raw: &str) -> Result<TaskId, (StatusCode, String)> {
    raw.parse()
        .map_err(|_| (StatusCode::NOT_FOUND, format!("Task {} not found", raw)))
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Queue a dashboard generation task.
async fn generate_dashboard(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateDashboardRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GenerateDashboardResponse>), (StatusCode, String)> {
    let req = json_body(payload)?;
    let task_id = state
        .gateway
        .submit(req.into())
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateDashboardResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    ))
}

/// List all tasks.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskView>>, (StatusCode, String)> {
    state.gateway.list().await.map(Json).map_err(error_response)
}

/// Task counters.
async fn task_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TaskStats>, (StatusCode, String)> {
    state.gateway.stats().await.map(Json).map_err(error_response)
}

/// Get a task's current state.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, (StatusCode, String)> {
    let id = parse_task_id(&id)?;
    state.gateway.status(id).await.map(Json).map_err(error_response)
}

/// Forget a task.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let id = parse_task_id(&id)?;
    state.gateway.delete(id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit a reviewer's document for a task awaiting review.
async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<TaskView>, (StatusCode, String)> {
    let id = parse_task_id(&id)?;
    let req = json_body(payload)?;
    state
        .gateway
        .submit_feedback(id, req.document, req.note)
        .await
        .map(Json)
        .map_err(error_response)
}

/// List selectable providers.
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.gateway.models(),
    })
}
