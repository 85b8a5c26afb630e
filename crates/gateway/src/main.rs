//! bookchat API Gateway
//!
//! The HTTP entry point for the book chat service. Handles:
//! - Chat, history, ingestion and search endpoints
//! - Request routing and CORS
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use axum::http::HeaderValue;
use axum::{
    routing::{delete, get, post},
    Router,
};
use bookchat_common::{
    chat::create_chat_model,
    config::AppConfig,
    db::create_store,
    embeddings::create_embedder,
    index::{create_index, Distance},
    metrics,
    rag::RagEngine,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<RagEngine>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    let config = Arc::new(config);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!("Starting bookchat API Gateway v{}", bookchat_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from((
                [0, 0, 0, 0],
                config.observability.metrics_port,
            )))
            .install()?;
    }
    metrics::register_metrics();

    // Wire up the pipeline
    let embedder = create_embedder(&config.embedding)?;
    let index = create_index(&config.index)?;
    let chat_model = create_chat_model(&config.chat)?;
    let store = create_store(&config.database).await?;

    // Collection bootstrap is fatal: a dimension mismatch here means the
    // index was built by a different embedding model.
    index
        .ensure_collection(config.embedding.dimension, Distance::Cosine)
        .await?;

    let engine = Arc::new(RagEngine::new(
        embedder,
        index,
        chat_model,
        store,
        config.retrieval.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        engine,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Chat endpoints
        .route("/api/chat", post(handlers::chat::chat))
        .route(
            "/api/chat/history/{session_id}",
            get(handlers::history::get_history),
        )
        .route(
            "/api/chat/history/{session_id}",
            delete(handlers::history::clear_history),
        )
        // Ingestion endpoint
        .route("/api/documents/ingest", post(handlers::ingest::ingest))
        // Search and summary endpoints
        .route("/api/search", post(handlers::search::search))
        .route(
            "/api/chapters/{chapter_id}/summary",
            get(handlers::chat::chapter_summary),
        )
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// CORS layer from the configured origin list; "*" opens it up
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = config.cors_origins_list();
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
