//! Offline "cook" pipeline for llmtap capture files.
//!
//! Consumes the append-only JSONL capture log written by the proxy and
//! produces a single trace bundle: provider-neutral messages and tools,
//! deduplicated by content hash, with requests linked into a dependency
//! forest by message-prefix analysis.
//!
//! The pipeline is straight-line and synchronous: raw record -> provider
//! adapter -> interner -> dependency analyzer. Each stage is a pure function
//! over its inputs; the proxy shares only the [`record`] and [`sse`] modules.

pub mod adapters;
pub mod bundle;
pub mod cook;
pub mod dedup;
pub mod deps;
pub mod error;
pub mod record;
pub mod sse;

pub use bundle::{Message, RequestNode, Role, Tool, ToolCall, TraceBundle};
pub use cook::{cook_records, CookOutput, SkippedRecord};
pub use error::CookError;
pub use record::{RawRecord, RawRequest, RawResponse};
