//! Cook pipeline error types.

use thiserror::Error;

/// Errors surfaced by the cook pipeline.
///
/// `UnsupportedFormat` and `MalformedRecord` are per-record: the cooker
/// skips the record with a diagnostic and keeps going. `Io` is fatal to the
/// whole run (unreadable input, unwritable output).
#[derive(Debug, Error)]
pub enum CookError {
    #[error("unsupported_format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed_record: {0}")]
    MalformedRecord(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
