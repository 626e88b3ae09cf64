//! Static viewer server plus the `/_local` bundle endpoint.
//!
//! Serves the embedded single-page viewer at `/` and cooked bundles via
//! `GET /_local?path=<relative>`, resolved against the server's working
//! directory. Paths that escape the root are rejected with 400.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const VIEWER_HTML: &str = include_str!("../assets/viewer.html");

struct ViewerState {
    root: PathBuf,
    default_trace: String,
}

/// Serve the viewer for `trace` until shutdown.
pub async fn run(trace: &Path, listen_address: &str) -> anyhow::Result<()> {
    let root = std::env::current_dir()?;
    let app = router(root, trace.display().to_string());

    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("cannot bind {listen_address}"))?;
    tracing::info!(
        address = %listen_address,
        trace = %trace.display(),
        "Viewer at http://{listen_address}/"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn router(root: PathBuf, default_trace: String) -> Router {
    let state = Arc::new(ViewerState {
        root,
        default_trace,
    });
    Router::new()
        .route("/", get(index))
        .route("/_local", get(local_file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index(State(state): State<Arc<ViewerState>>) -> Html<String> {
    // The placeholder becomes a JS string literal with the default bundle path.
    let default_js = serde_json::to_string(&state.default_trace).unwrap_or_else(|_| "\"\"".into());
    Html(VIEWER_HTML.replace("\"__DEFAULT_TRACE__\"", &default_js))
}

#[derive(Deserialize)]
struct LocalQuery {
    path: String,
}

/// `GET /_local?path=<relative>` — return a local JSON file verbatim.
async fn local_file(
    State(state): State<Arc<ViewerState>>,
    Query(query): Query<LocalQuery>,
) -> Response {
    match read_local(&state.root, &query.path) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Error)]
enum LocalFileError {
    #[error("path escapes the server root")]
    PathEscape,
    #[error("not found")]
    NotFound,
    #[error("io: {0}")]
    Io(std::io::Error),
}

impl IntoResponse for LocalFileError {
    fn into_response(self) -> Response {
        let status = match self {
            LocalFileError::PathEscape => StatusCode::BAD_REQUEST,
            LocalFileError::NotFound => StatusCode::NOT_FOUND,
            LocalFileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

fn read_local(root: &Path, relative: &str) -> Result<Vec<u8>, LocalFileError> {
    let relative = Path::new(relative);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(LocalFileError::PathEscape);
    }
    match std::fs::read(root.join(relative)) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LocalFileError::NotFound),
        Err(e) => Err(LocalFileError::Io(e)),
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
}
