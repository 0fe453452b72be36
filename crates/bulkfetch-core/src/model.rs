//! Data model shared by the coordinator, shard workers and the store.
//!
//! Everything here is serialized as JSON into the coordination store, so the
//! coordinator and workers can live in different processes.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{BulkConfig, RetryConfig};

/// Job identifier (opaque string, unique per job and per retry-job).
pub type JobId = String;

/// Structured record produced by an extractor for one resource.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One unit of work. `original_index` is the position in the caller's list
/// and is the only ordering key for merged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub original_index: usize,
    pub resource: String,
}

impl WorkItem {
    /// Number a list of resources by position.
    pub fn from_resources<I, S>(resources: I) -> Vec<WorkItem>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        resources
            .into_iter()
            .enumerate()
            .map(|(original_index, r)| WorkItem {
                original_index,
                resource: r.into(),
            })
            .collect()
    }
}

/// Immutable per-job parameters, created once per job or retry-job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: JobId,
    pub shard_count: usize,
    pub pool_size: usize,
    pub inter_dispatch_delay_ms: u64,
    /// 1 for an original run, +1 for each retry-job derived from it.
    pub attempt: u32,
    /// Deadline for a single fetch operation.
    pub fetch_timeout_ms: u64,
    /// Record fields that must be present and non-empty for an item to succeed.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// In-place retry inside the pool; `None` uses built-in defaults.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl JobConfig {
    /// Config for a fresh job (attempt 1) from the global settings.
    pub fn from_settings(cfg: &BulkConfig) -> Self {
        Self {
            job_id: new_job_id(),
            shard_count: cfg.shard_count.max(1),
            pool_size: cfg.pool_size.max(1),
            inter_dispatch_delay_ms: cfg.inter_dispatch_delay_ms,
            attempt: 1,
            fetch_timeout_ms: cfg.fetch_timeout_secs.saturating_mul(1000),
            required_fields: cfg.required_fields.clone(),
            retry: cfg.retry.clone(),
        }
    }

    /// Same parameters under a fresh id with `attempt + 1`.
    pub fn next_attempt(&self) -> Self {
        Self {
            job_id: new_job_id(),
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_dispatch_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// What the coordinator publishes for workers to pull: config plus the job's items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub config: JobConfig,
    pub items: Vec<WorkItem>,
}

/// Per-shard progress, written only by the owning shard worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardProgress {
    pub done: usize,
    pub total: usize,
}

/// One failed item, appended by the shard that fetched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub resource: String,
    pub reason: String,
    /// HTTP status, 0 when no response was received.
    pub status: u32,
    pub duration_ms: u64,
    pub attempt: u32,
    pub shard_idx: usize,
    /// Unix milliseconds.
    pub when: i64,
}

/// One entry of a shard's published result. Failed items carry an empty
/// record and the failure reason so no position is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub original_index: usize,
    #[serde(default)]
    pub record: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEntry {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

static JOB_SEQ: AtomicU32 = AtomicU32::new(0);

/// Generate a job id: millisecond timestamp, process id and an in-process counter.
pub fn new_job_id() -> JobId {
    let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}-{}", unix_millis(), std::process::id(), seq)
}

/// Current time as Unix milliseconds.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_resources_numbers_by_position() {
        let items = WorkItem::from_resources(["a", "b", "c"]);
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].original_index, 2);
        assert_eq!(items[2].resource, "c");
    }

    #[test]
    fn next_attempt_bumps_attempt_and_id() {
        let cfg = JobConfig::from_settings(&BulkConfig::default());
        let next = cfg.next_attempt();
        assert_eq!(next.attempt, cfg.attempt + 1);
        assert_ne!(next.job_id, cfg.job_id);
        assert_eq!(next.shard_count, cfg.shard_count);
        assert_eq!(next.pool_size, cfg.pool_size);
    }

    #[test]
    fn job_ids_are_unique_within_process() {
        let a = new_job_id();
        let b = new_job_id();
        assert_ne!(a, b);
    }

    #[test]
    fn result_entry_omits_missing_error() {
        let e = ResultEntry {
            original_index: 3,
            record: Record::new(),
            error: None,
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("error"));
        let back: ResultEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
