//! Retry loop: run an async operation until it succeeds or the policy says stop.

use std::future::Future;

use super::policy::{ErrorKind, RetryDecision, RetryPolicy};

/// Runs `f` until `kind_of` reports no error or the retry policy says to stop.
/// `f` receives the 1-based try number. On a retryable failure, sleeps for the
/// backoff duration then tries again. Returns the last outcome either way.
pub async fn run_with_retry<T, F, Fut, C>(policy: &RetryPolicy, mut f: F, kind_of: C) -> T
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    C: Fn(&T) -> Option<ErrorKind>,
{
    let mut attempt = 1u32;
    loop {
        let outcome = f(attempt).await;
        let Some(kind) = kind_of(&outcome) else {
            return outcome;
        };
        match policy.decide(attempt, kind) {
            RetryDecision::NoRetry => return outcome,
            RetryDecision::RetryAfter(d) => {
                tracing::debug!(attempt, ?kind, delay_ms = d.as_millis() as u64, "retrying fetch");
                tokio::time::sleep(d).await;
                attempt += 1;
            }
        }
    }
}
