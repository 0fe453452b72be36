//! Item-level fetch failure. Recorded as data, never propagated as `Err`.

use std::time::Duration;
use thiserror::Error;

/// Why a single item failed: transport, timeout, HTTP status, or content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, DNS or other network-level failure.
    #[error("network error: {0}")]
    Transport(String),
    /// The fetch exceeded its deadline.
    #[error("timeout after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// Response arrived with a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Transport succeeded but the record lacks a required field.
    #[error("missing required field: {0}")]
    MissingField(String),
    /// Transport succeeded but the extractor produced nothing usable.
    #[error("empty record")]
    EmptyRecord,
}

impl FetchError {
    /// True for failures found in the extracted content rather than on the wire.
    pub fn is_content(&self) -> bool {
        matches!(self, FetchError::MissingField(_) | FetchError::EmptyRecord)
    }
}
