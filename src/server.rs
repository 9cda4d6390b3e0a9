//! HTTP adapter over the classification engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/classify` | Classify `{ "text", "top_k"?, "isic"?, "explain"? }` |
//! | `GET`  | `/nodes/{code}` | Node with its ancestors and children |
//! | `GET`  | `/isic/{code}` | ISIC → HS mapping |
//! | `POST` | `/reload` | Re-read the taxonomy source and swap it in |
//! | `GET`  | `/stats` | Snapshot, reload, and cache counters |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_input", "message": "input is empty after normalization" } }
//! ```
//!
//! Classification errors reuse [`MatchError::code`]. Status mapping:
//! `empty_input`/`invalid_top_k` → 400, `not_found` → 404,
//! `embedding_unavailable`/`empty_taxonomy`/`shut_down` → 503, `embedding_timeout` → 504,
//! `taxonomy_integrity`/`reload_failed` → 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use hs_match_core::error::MatchError;
use hs_match_core::models::TaxonomyNode;

use crate::config::Config;
use crate::engine::{ClassifyOptions, Classification, Engine, EngineStats};
use crate::isic::IsicMapping;

/// Shared state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Build the engine from `config` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::from_config(config).await?);
    run_server_with_engine(&config.server.bind, engine).await
}

/// Serve an existing engine on `bind` until Ctrl-C, then shut it down.
pub async fn run_server_with_engine(bind: &str, engine: Arc<Engine>) -> anyhow::Result<()> {
    serve_until(bind, engine, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Serve `engine` on `bind` until `signal` resolves.
///
/// In-flight requests are drained, then [`Engine::shutdown`] releases the
/// taxonomy.
pub async fn serve_until<F>(bind: &str, engine: Arc<Engine>, signal: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HS match server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await?;
    engine.shutdown();
    info!("HS match server stopped");
    Ok(())
}

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/classify", post(handle_classify))
        .route("/nodes/{code}", get(handle_node))
        .route("/isic/{code}", get(handle_isic))
        .route("/reload", post(handle_reload))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        let status = match &err {
            MatchError::EmptyInput | MatchError::InvalidTopK(_) => StatusCode::BAD_REQUEST,
            MatchError::EmbeddingUnavailable(_) | MatchError::EmptyTaxonomy | MatchError::ShutDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            MatchError::EmbeddingTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            MatchError::TaxonomyIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /classify ============

#[derive(Deserialize)]
struct ClassifyBody {
    text: String,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    isic: Option<String>,
    #[serde(default)]
    explain: bool,
}

async fn handle_classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyBody>,
) -> Result<Json<Classification>, AppError> {
    let options = ClassifyOptions {
        top_k: body.top_k,
        isic: body.isic,
        explain: body.explain,
    };
    let result = state.engine.classify_with(&body.text, &options).await?;
    Ok(Json(result))
}

// ============ GET /nodes/{code} ============

#[derive(Serialize)]
struct NodeResponse {
    node: TaxonomyNode,
    ancestors: Vec<TaxonomyNode>,
    children: Vec<TaxonomyNode>,
}

async fn handle_node(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<NodeResponse>, AppError> {
    let snapshot = state.engine.snapshot();
    let taxonomy = snapshot.taxonomy();
    let node = taxonomy
        .lookup(&code)
        .ok_or_else(|| not_found(format!("no taxonomy node with code: {}", code)))?;
    let owned = |nodes: Option<Vec<&TaxonomyNode>>| -> Vec<TaxonomyNode> {
        nodes.unwrap_or_default().into_iter().cloned().collect()
    };
    Ok(Json(NodeResponse {
        node: node.clone(),
        ancestors: owned(taxonomy.ancestors(&code)),
        children: owned(taxonomy.children(&code)),
    }))
}

// ============ GET /isic/{code} ============

async fn handle_isic(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<IsicMapping>, AppError> {
    let snapshot = state.engine.snapshot();
    snapshot
        .isic()
        .and_then(|m| m.lookup(&code))
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found(format!("no ISIC mapping for code: {}", code)))
}

// ============ POST /reload ============

#[derive(Serialize)]
struct ReloadResponse {
    generation: u64,
    nodes: usize,
    taxonomy_version: Option<String>,
}

async fn handle_reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, AppError> {
    let snapshot = state.engine.reload().await.map_err(|e| {
        warn!(error = %format!("{:#}", e), "reload via HTTP failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "reload_failed".to_string(),
            message: format!("{:#}", e),
        }
    })?;
    Ok(Json(ReloadResponse {
        generation: snapshot.generation(),
        nodes: snapshot.taxonomy().len(),
        taxonomy_version: snapshot.taxonomy().version().map(str::to_string),
    }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.stats().await)
}
