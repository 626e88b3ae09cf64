//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use llmtap_cook::adapters::AdapterRegistry;
use tower_http::trace::TraceLayer;

use crate::capture::CaptureStore;
use crate::config::ProxyConfig;
use crate::proxy::forward;

/// Largest client request body the proxy will buffer.
const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub store: CaptureStore,
    pub eager_reassembly: bool,
    pub registry: Arc<AdapterRegistry>,
}

/// Build and run the proxy server until shutdown.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let upstream_url = config
        .upstream
        .url
        .clone()
        .context("upstream target URL is required (--target)")?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    let store = CaptureStore::create(&config.capture.output)
        .await
        .with_context(|| {
            format!(
                "cannot open capture log {}",
                config.capture.output.display()
            )
        })?;

    tracing::info!(
        listen_address = %config.server.listen_address,
        upstream = %upstream_url,
        output = %config.capture.output.display(),
        eager_reassembly = config.capture.eager_reassembly,
        "Starting llmtap proxy"
    );

    let state = AppState {
        client,
        upstream_url,
        store,
        eager_reassembly: config.capture.eager_reassembly,
        registry: Arc::new(AdapterRegistry::new()),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.listen_address)
        .await
        .with_context(|| format!("cannot bind {}", config.server.listen_address))?;
    tracing::info!(address = %config.server.listen_address, "llmtap listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("llmtap shut down gracefully");
    Ok(())
}

/// Everything under the root path is proxied; routing never parses bodies.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Catch-all handler: buffer the request body, then forward.
async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let method = request.method().clone();
    let path_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = request.headers().clone();

    let body = match axum::body::to_bytes(request.into_body(), MAX_REQUEST_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    forward::proxy_exchange(&state, method, path_query, headers, body).await
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}
