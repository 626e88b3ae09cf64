//! Transparent capture proxy and trace viewer for LLM HTTP APIs.
//!
//! Point a client library's base URL at the proxy and every exchange —
//! streaming or not — is forwarded verbatim and appended to a JSONL capture
//! log. The cook pipeline (in `llmtap-cook`) turns a capture log into the
//! deduplicated, dependency-linked bundle the viewer renders.

pub mod capture;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod viewer;
