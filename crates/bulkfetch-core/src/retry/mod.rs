//! Retry and backoff policy for single fetch operations.
//!
//! Error classification (timeouts, throttling, connection failures, content
//! errors) and exponential backoff decisions live here so the pool and the
//! fetchers share one policy. In-place retry is distinct from retry-jobs: a
//! retry-job re-runs items that still failed after this policy gave up.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::FetchError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
