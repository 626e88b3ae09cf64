//! The cook orchestrator: raw records in, trace bundle out.
//!
//! Straight-line pipeline per record: resolve the provider adapter, extract
//! the neutral triple, intern messages and tools, assemble a request node.
//! Unsupported or malformed records are skipped with a diagnostic, never
//! aborting the run. The dependency analyzer links the surviving requests
//! at the end.

use std::path::Path;

use crate::adapters::{AdapterRegistry, ProviderAdapter};
use crate::bundle::{RequestNode, TraceBundle};
use crate::dedup::Interner;
use crate::deps;
use crate::error::CookError;
use crate::record::{self, RawRecord};

/// A record the pipeline could not normalize.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    /// Capture record id, or `line <n>` when the line never parsed.
    pub record: String,
    pub reason: String,
}

/// The cooked bundle plus everything that was skipped along the way.
#[derive(Debug)]
pub struct CookOutput {
    pub bundle: TraceBundle,
    pub skipped: Vec<SkippedRecord>,
}

/// Cook an iterator of raw records into a trace bundle.
///
/// Deterministic: the same records in the same order always produce the
/// same bundle.
pub fn cook_records(
    records: impl IntoIterator<Item = RawRecord>,
    forced_format: Option<&str>,
) -> CookOutput {
    let registry = AdapterRegistry::new();
    let mut interner = Interner::new();
    let mut requests = Vec::new();
    let mut skipped = Vec::new();

    for raw in records {
        match normalize(&registry, &mut interner, &raw, forced_format) {
            Ok(node) => requests.push(node),
            Err(e) => skipped.push(SkippedRecord {
                record: raw.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    deps::link_requests(&mut requests);
    let (messages, tools) = interner.into_collections();

    CookOutput {
        bundle: TraceBundle {
            messages,
            tools,
            requests,
        },
        skipped,
    }
}

/// Cook a capture file from disk. Unparsable lines join the skip list;
/// only input io errors are fatal.
pub fn cook_file(input: &Path, forced_format: Option<&str>) -> Result<CookOutput, CookError> {
    let (records, line_diagnostics) = record::read_capture_file(input)?;
    let mut output = cook_records(records, forced_format);

    let parse_skips = line_diagnostics.into_iter().map(|diagnostic| {
        match diagnostic.split_once(": ") {
            Some((line, reason)) => SkippedRecord {
                record: line.into(),
                reason: reason.into(),
            },
            None => SkippedRecord {
                record: "?".into(),
                reason: diagnostic,
            },
        }
    });
    output.skipped.splice(0..0, parse_skips);
    Ok(output)
}

fn normalize(
    registry: &AdapterRegistry,
    interner: &mut Interner,
    raw: &RawRecord,
    forced_format: Option<&str>,
) -> Result<RequestNode, CookError> {
    let adapter: &dyn ProviderAdapter = registry.resolve(forced_format, raw)?;

    // Extract everything before interning so a failing record leaves the
    // master collections untouched.
    let request_messages = adapter.extract_messages(raw)?;
    let tools = adapter.extract_tools(raw);
    let response_messages = adapter.response_messages(raw)?;
    let model = adapter
        .extract_model(raw)
        .unwrap_or_else(|| "unknown".into());

    Ok(RequestNode {
        id: raw.id.clone(),
        parent_id: None,
        timestamp: raw.timestamp,
        request_messages: request_messages
            .into_iter()
            .map(|m| interner.intern_message(m))
            .collect(),
        response_messages: response_messages
            .into_iter()
            .map(|m| interner.intern_message(m))
            .collect(),
        model,
        tools: tools.into_iter().map(|t| interner.intern_tool(t)).collect(),
        duration_ms: raw.duration_ms,
    })
}
