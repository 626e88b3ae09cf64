//! Raw byte forwarding to the upstream provider.
//!
//! The forward path streams bytes verbatim: no parsing, no transformation.
//! Two code paths, selected by the upstream response's content-type:
//!
//! - Whole responses are awaited in full, returned to the client, and
//!   captured in one step.
//! - SSE responses stream through a `TapBody` wrapper that forwards each
//!   chunk unchanged while accumulating a copy. Exactly one capture record
//!   is finalized when the stream ends, errors mid-flight, or the client
//!   disconnects — and the store write is deferred to a spawned task so a
//!   slow disk never stalls the byte stream.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::Bytes;
use futures_core::Stream;
use llmtap_cook::adapters::AdapterRegistry;
use llmtap_cook::record::{RawRecord, RawRequest, RawResponse};
use llmtap_cook::sse;
use serde_json::{json, Value};

use crate::capture::CaptureStore;
use crate::server::AppState;

/// Headers that should NOT be forwarded (hop-by-hop headers).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

/// Request headers whose values are masked in capture records. Captures are
/// meant to be shareable; keys are not.
const REDACTED_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key", "x-goog-api-key"];

/// Response header carrying the capture record id back to the client.
pub const CAPTURE_ID_HEADER: &str = "x-llmtap-id";

/// Forward one exchange to the upstream and capture it.
///
/// The caller has already buffered the request body (it is both re-sent and
/// captured). `path_query` is the path plus query of the original request.
pub async fn proxy_exchange(
    state: &AppState,
    method: Method,
    path_query: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let capture_id = uuid::Uuid::new_v4().to_string();
    let timestamp = unix_millis();
    let started = Instant::now();

    let captured_request = build_raw_request(&method, &path_query, &headers, &body);
    let url = format!("{}{}", state.upstream_url.trim_end_matches('/'), path_query);

    let mut builder = state.client.request(method.clone(), &url).body(body);
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&name_str.as_str()) {
            continue;
        }
        // reqwest recomputes content-length from the actual body.
        if name_str == "content-length" {
            continue;
        }
        builder = builder.header(name, value);
    }

    let upstream = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            let latency = started.elapsed().as_millis() as u64;
            spawn_append(
                state.store.clone(),
                RawRecord {
                    id: capture_id.clone(),
                    timestamp,
                    request: captured_request,
                    response: None,
                    duration_ms: latency,
                    error: Some(format!("upstream_connect: {e}")),
                },
            );
            if e.is_timeout() {
                tracing::error!(capture_id = %capture_id, error = %e, "Upstream timeout");
                return (StatusCode::GATEWAY_TIMEOUT, "upstream timeout").into_response();
            }
            tracing::error!(capture_id = %capture_id, error = %e, "Upstream connection error");
            return (StatusCode::BAD_GATEWAY, "upstream connection error").into_response();
        }
    };

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_stream = content_type.contains("text/event-stream");

    tracing::info!(
        capture_id = %capture_id,
        method = %method,
        path = %path_query,
        status = status.as_u16(),
        streamed = is_stream,
        ttfb_ms = started.elapsed().as_millis() as u64,
        "Upstream responded"
    );

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers().iter() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str().to_lowercase().as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header(CAPTURE_ID_HEADER, &capture_id);

    let captured_response_headers = capture_headers(upstream.headers(), false);

    if is_stream {
        // Forward chunks as they arrive; the tee finalizes the capture
        // record when the stream terminates (EOF, error, or client drop).
        let tap = TapBody {
            inner: Box::pin(upstream.bytes_stream()),
            buffer: Vec::new(),
            finalizer: Some(Finalizer {
                store: state.store.clone(),
                capture_id,
                timestamp,
                request: captured_request,
                status: status.as_u16(),
                response_headers: captured_response_headers,
                started,
                reassembler: state.eager_reassembly.then(|| state.registry.clone()),
            }),
        };
        return finish_response(builder.body(Body::from_stream(tap)));
    }

    // Whole-response path: await the complete body before replying.
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            spawn_append(
                state.store.clone(),
                RawRecord {
                    id: capture_id.clone(),
                    timestamp,
                    request: captured_request,
                    response: Some(RawResponse {
                        status: status.as_u16(),
                        headers: captured_response_headers,
                        body: Value::Null,
                    }),
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: Some(format!("upstream_truncated: {e}")),
                },
            );
            tracing::error!(capture_id = %capture_id, error = %e, "Upstream body read failed");
            return (StatusCode::BAD_GATEWAY, "upstream body error").into_response();
        }
    };

    spawn_append(
        state.store.clone(),
        RawRecord {
            id: capture_id,
            timestamp,
            request: captured_request,
            response: Some(RawResponse {
                status: status.as_u16(),
                headers: captured_response_headers,
                body: decode_body(&content_type, &bytes),
            }),
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        },
    );

    finish_response(builder.body(Body::from(bytes)))
}

/// A stream wrapper that passes bytes through unchanged while accumulating
/// a copy, finalizing exactly one capture record when the stream ends.
struct TapBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    finalizer: Option<Finalizer>,
}

/// Everything needed to assemble the capture record once the stream is over.
struct Finalizer {
    store: CaptureStore,
    capture_id: String,
    timestamp: u64,
    request: RawRequest,
    status: u16,
    response_headers: BTreeMap<String, String>,
    started: Instant,
    /// Present when the proxy reassembles SSE eagerly at capture time.
    reassembler: Option<Arc<AdapterRegistry>>,
}

impl TapBody {
    /// Build and enqueue the capture record. Idempotent: only the first
    /// call does anything.
    fn finalize(&mut self, error: Option<String>) {
        let Some(finalizer) = self.finalizer.take() else {
            return;
        };
        let buffer = std::mem::take(&mut self.buffer);

        let text = String::from_utf8_lossy(&buffer);
        let events = sse::parse_sse_payloads(&text);
        let mut record = RawRecord {
            id: finalizer.capture_id,
            timestamp: finalizer.timestamp,
            request: finalizer.request,
            response: Some(RawResponse {
                status: finalizer.status,
                headers: finalizer.response_headers,
                body: Value::Array(events),
            }),
            duration_ms: finalizer.started.elapsed().as_millis() as u64,
            error,
        };
        if let Some(registry) = finalizer.reassembler {
            reassemble_in_place(&registry, &mut record);
        }
        spawn_append(finalizer.store, record);
    }
}

impl Stream for TapBody {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.buffer.extend_from_slice(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                // Mid-stream upstream failure (including timeout expiry):
                // the chunks already forwarded stand; capture the rest.
                self.finalize(Some(format!("upstream_truncated: {e}")));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finalize(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TapBody {
    fn drop(&mut self) {
        // Client disconnected mid-stream: dropping `inner` cancels the
        // upstream call; the partial body is still captured.
        self.finalize(Some("client_cancelled".into()));
    }
}

/// Collapse a raw SSE event array into the provider's logical response.
/// Failure keeps the raw events — the cook pass can still reassemble.
fn reassemble_in_place(registry: &AdapterRegistry, record: &mut RawRecord) {
    let logical = {
        let Some(response) = record.response.as_ref() else {
            return;
        };
        let Value::Array(events) = &response.body else {
            return;
        };
        match registry
            .resolve(None, record)
            .and_then(|adapter| adapter.reassemble_stream(events))
        {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(capture_id = %record.id, error = %e, "Eager reassembly skipped");
                return;
            }
        }
    };
    if let Some(response) = record.response.as_mut() {
        response.body = logical;
    }
}

/// Write the record from a spawned task so the store mutex never blocks a
/// client byte stream. Failures are logged; the exchange still completes.
fn spawn_append(store: CaptureStore, record: RawRecord) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::error!(capture_id = %record.id, "capture_io: no runtime, record lost");
        return;
    };
    handle.spawn(async move {
        if let Err(e) = store.append(&record).await {
            tracing::error!(capture_id = %record.id, error = %e, "capture_io: append failed");
        }
    });
}

fn build_raw_request(
    method: &Method,
    path_query: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> RawRequest {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    RawRequest {
        url: path_query.to_string(),
        method: method.as_str().to_string(),
        headers: capture_headers(headers, true),
        body: decode_body(&content_type, body),
    }
}

/// Headers as they go into the capture record: hop-by-hop dropped,
/// credential values masked on the request side.
fn capture_headers(headers: &HeaderMap, redact_credentials: bool) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_lowercase();
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                return None;
            }
            let value = if redact_credentials && REDACTED_HEADERS.contains(&name.as_str()) {
                "[redacted]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            Some((name, value))
        })
        .collect()
}

/// Decode a captured body: JSON stays JSON, anything else is base64.
fn decode_body(content_type: &str, bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    if content_type.contains("application/json") {
        if let Ok(value) = serde_json::from_slice(bytes) {
            return value;
        }
    }
    json!({"base64": base64::engine::general_purpose::STANDARD.encode(bytes)})
}

fn finish_response(result: Result<Response, axum::http::Error>) -> Response {
    result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build response");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    })
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
