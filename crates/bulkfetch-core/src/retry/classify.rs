//! Classify HTTP status, curl errors and fetch errors into retry error kinds.

use std::time::Duration;

use super::error::FetchError;
use super::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Map a curl error to a `FetchError`, separating deadline hits from other
/// network failures. `timeout` is the deadline the request was given.
pub fn classify_curl_error(e: &curl::Error, timeout: Duration) -> FetchError {
    if e.is_operation_timedout() {
        return FetchError::Timeout(timeout);
    }
    FetchError::Transport(e.description().to_string())
}

/// Classify a fetch error into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Timeout(_) => ErrorKind::Timeout,
        FetchError::Transport(_) => ErrorKind::Connection,
        FetchError::Http(code) => classify_http_status(*code),
        _ if e.is_content() => ErrorKind::Content,
        _ => ErrorKind::Other,
    }
}
