//! Fetch operation: one resource in, one outcome out.
//!
//! The coordinator core treats a fetcher as an opaque, possibly slow,
//! possibly failing black box. This module adds the pieces every fetch gets
//! regardless of backend: an overall deadline, in-place retry, and the
//! completeness check that turns an unusable record into a content error.

mod http;
mod extract;

pub use http::CurlFetcher;
pub use extract::{Extractor, JsonExtractor, TextExtractor};

use std::future::Future;
use std::time::{Duration, Instant};

use crate::model::{JobConfig, Record};
use crate::retry::{self, FetchError, RetryPolicy};

/// Result of one fetch: record (possibly empty), error, HTTP status, duration.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub record: Record,
    pub error: Option<FetchError>,
    /// HTTP status, 0 when no response was received.
    pub status: u32,
    pub duration: Duration,
}

impl FetchOutcome {
    pub fn ok(record: Record, status: u32, duration: Duration) -> Self {
        Self {
            record,
            error: None,
            status,
            duration,
        }
    }

    pub fn failed(error: FetchError, status: u32, duration: Duration) -> Self {
        Self {
            record: Record::new(),
            error: Some(error),
            status,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A pluggable fetch+extract operation.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch `resource` and extract a record. Implementations should honour
    /// `timeout`; the caller enforces it as well.
    fn fetch(&self, resource: &str, timeout: Duration)
        -> impl Future<Output = FetchOutcome> + Send;
}

/// Per-item rules derived from a job's config.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub required_fields: Vec<String>,
}

impl FetchPlan {
    pub fn from_config(cfg: &JobConfig) -> Self {
        Self {
            timeout: cfg.fetch_timeout(),
            retry: cfg
                .retry
                .as_ref()
                .map(RetryPolicy::from_config)
                .unwrap_or_default(),
            required_fields: cfg.required_fields.clone(),
        }
    }
}

/// Fetch one item under the plan: deadline per try, completeness check,
/// in-place retry. Never fails; every failure is carried in the outcome.
pub async fn fetch_item<F: Fetcher>(fetcher: &F, resource: &str, plan: &FetchPlan) -> FetchOutcome {
    retry::run_with_retry(
        &plan.retry,
        |_| fetch_once(fetcher, resource, plan),
        |outcome: &FetchOutcome| outcome.error.as_ref().map(retry::classify),
    )
    .await
}

async fn fetch_once<F: Fetcher>(fetcher: &F, resource: &str, plan: &FetchPlan) -> FetchOutcome {
    let started = Instant::now();
    let mut outcome =
        match tokio::time::timeout(plan.timeout, fetcher.fetch(resource, plan.timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return FetchOutcome::failed(
                    FetchError::Timeout(plan.timeout),
                    0,
                    started.elapsed(),
                )
            }
        };
    if outcome.is_success() {
        if let Err(e) = check_complete(&outcome.record, &plan.required_fields) {
            outcome.error = Some(e);
        }
    }
    outcome
}

/// A record is complete when it is non-empty and every required field is
/// present with a non-empty value.
pub fn check_complete(record: &Record, required_fields: &[String]) -> Result<(), FetchError> {
    if record.is_empty() {
        return Err(FetchError::EmptyRecord);
    }
    for field in required_fields {
        let present = match record.get(field) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(FetchError::MissingField(field.clone()));
        }
    }
    Ok(())
}
