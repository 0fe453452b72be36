//! Shard worker: fetches one partition of a job and reports through the store.
//!
//! A worker is told only `(job_id, shard_idx)`. It pulls the job spec from the
//! store, picks its items by `original_index mod shard_count`, runs them
//! through a [`ConcurrencyPool`], and writes only its own keys: progress,
//! errors, result and done. Item failures never stop the shard, including a
//! fetch task that panics. The abort flag is read before every refill; once
//! seen, nothing new is dispatched, in-flight fetches are drained, and neither
//! result nor done is written.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::fetch::{fetch_item, FetchOutcome, FetchPlan, Fetcher};
use crate::model::{unix_millis, ErrorRecord, JobSpec, ResultEntry, ShardProgress, WorkItem};
use crate::pool::ConcurrencyPool;
use crate::retry::FetchError;
use crate::store::{get_flag, get_json, keys, set_json, CoordinationStore};

/// How a shard worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardExit {
    /// Every item settled; result published and done set.
    Completed { done: usize, failed: usize },
    /// Abort flag observed; done left false.
    Aborted { done: usize },
}

/// Items owned by `shard_idx`: those with `original_index mod shard_count == shard_idx`.
/// Indices stay in the job-wide space.
pub fn shard_items(items: &[WorkItem], shard_idx: usize, shard_count: usize) -> Vec<WorkItem> {
    let shard_count = shard_count.max(1);
    items
        .iter()
        .filter(|item| item.original_index % shard_count == shard_idx)
        .cloned()
        .collect()
}

/// Run one shard of `job_id` to completion or abort.
///
/// Returns `Err` only for store or task failures; fetch failures become
/// `ErrorRecord`s and error entries in the published result.
pub async fn run_shard<S, F>(
    store: &S,
    fetcher: Arc<F>,
    job_id: &str,
    shard_idx: usize,
) -> Result<ShardExit>
where
    S: CoordinationStore,
    F: Fetcher,
{
    let spec: JobSpec = get_json(store, &keys::spec(job_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {} not found in store", job_id))?;
    let cfg = &spec.config;
    if shard_idx >= cfg.shard_count {
        anyhow::bail!(
            "shard {} out of range for job {} ({} shards)",
            shard_idx,
            job_id,
            cfg.shard_count
        );
    }

    let subset = shard_items(&spec.items, shard_idx, cfg.shard_count);
    let mut progress = ShardProgress {
        done: 0,
        total: subset.len(),
    };
    let mut errors: Vec<ErrorRecord> = Vec::new();
    set_json(store, &keys::progress(job_id, shard_idx), &progress).await?;
    set_json(store, &keys::errors(job_id, shard_idx), &errors).await?;
    tracing::info!(
        job_id,
        shard = shard_idx,
        total = progress.total,
        attempt = cfg.attempt,
        "shard started"
    );

    let plan = Arc::new(FetchPlan::from_config(cfg));
    let fetch = |item: WorkItem| {
        let fetcher = Arc::clone(&fetcher);
        let plan = Arc::clone(&plan);
        async move { fetch_item(&*fetcher, &item.resource, &plan).await }
    };

    let mut pool: ConcurrencyPool<FetchOutcome> =
        ConcurrencyPool::new(subset.clone(), cfg.pool_size, cfg.dispatch_delay());
    let mut results: Vec<ResultEntry> = Vec::with_capacity(subset.len());
    let mut aborted = false;

    loop {
        if !aborted {
            if get_flag(store, &keys::abort(job_id)).await? {
                aborted = true;
                tracing::info!(
                    job_id,
                    shard = shard_idx,
                    in_flight = pool.active(),
                    skipped = pool.queued(),
                    "abort observed; draining in-flight fetches"
                );
            } else {
                pool.refill(&fetch);
            }
        }

        let Some(settled) = pool.next_settled().await else {
            break;
        };
        let (pos, joined) = settled?;
        let item = &subset[pos];
        progress.done += 1;
        let outcome = joined.unwrap_or_else(|e| {
            tracing::warn!(
                job_id,
                shard = shard_idx,
                resource = %item.resource,
                "fetch task failed: {}",
                e
            );
            FetchOutcome::failed(
                FetchError::Transport(format!("fetch task failed: {}", e)),
                0,
                Duration::ZERO,
            )
        });

        let error = outcome.error.as_ref().map(|e| e.to_string());
        if let Some(reason) = &error {
            tracing::debug!(
                job_id,
                shard = shard_idx,
                resource = %item.resource,
                status = outcome.status,
                "item failed: {}",
                reason
            );
            errors.push(ErrorRecord {
                resource: item.resource.clone(),
                reason: reason.clone(),
                status: outcome.status,
                duration_ms: outcome.duration.as_millis() as u64,
                attempt: cfg.attempt,
                shard_idx,
                when: unix_millis(),
            });
            set_json(store, &keys::errors(job_id, shard_idx), &errors).await?;
        }
        results.push(ResultEntry {
            original_index: item.original_index,
            record: outcome.record,
            error,
        });
        set_json(store, &keys::progress(job_id, shard_idx), &progress).await?;
    }

    // Abort may land after the last dispatch; it still wins over completion.
    if aborted || get_flag(store, &keys::abort(job_id)).await? {
        tracing::info!(job_id, shard = shard_idx, done = progress.done, "shard aborted");
        return Ok(ShardExit::Aborted {
            done: progress.done,
        });
    }

    results.sort_by_key(|e| e.original_index);
    set_json(store, &keys::result(job_id, shard_idx), &results).await?;
    set_json(store, &keys::done(job_id, shard_idx), &true).await?;
    tracing::info!(
        job_id,
        shard = shard_idx,
        done = progress.done,
        failed = errors.len(),
        "shard completed"
    );
    Ok(ShardExit::Completed {
        done: progress.done,
        failed: errors.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BulkConfig, RetryConfig};
    use crate::model::{JobConfig, Record};
    use crate::store::MemoryStore;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resources starting with "bad" fail, "panic" panics; everything else
    /// yields `{"r": resource}`.
    struct Echo {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Echo {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    impl Fetcher for Echo {
        async fn fetch(&self, resource: &str, _timeout: Duration) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if resource == "panic" {
                panic!("extractor bug");
            }
            if resource.starts_with("bad") {
                return FetchOutcome::failed(
                    FetchError::Transport("connection refused".into()),
                    0,
                    self.delay,
                );
            }
            let mut r = Record::new();
            r.insert("r".into(), resource.into());
            FetchOutcome::ok(r, 200, self.delay)
        }
    }

    fn config(shards: usize, pool: usize) -> JobConfig {
        let mut cfg = JobConfig::from_settings(&BulkConfig::default());
        cfg.shard_count = shards;
        cfg.pool_size = pool;
        cfg.inter_dispatch_delay_ms = 0;
        cfg.fetch_timeout_ms = 1_000;
        cfg.retry = Some(RetryConfig {
            max_attempts: 1,
            base_delay_secs: 0.0,
            max_delay_secs: 0,
        });
        cfg
    }

    async fn publish(store: &MemoryStore, cfg: &JobConfig, resources: &[&str]) {
        let spec = JobSpec {
            config: cfg.clone(),
            items: WorkItem::from_resources(resources.iter().copied()),
        };
        set_json(store, &keys::spec(&cfg.job_id), &spec).await.unwrap();
    }

    #[test]
    fn shards_partition_the_item_set() {
        for n in 0..25 {
            let items = WorkItem::from_resources((0..n).map(|i| i.to_string()));
            for s in 1..7 {
                let mut seen = BTreeSet::new();
                let mut count = 0;
                for k in 0..s {
                    for item in shard_items(&items, k, s) {
                        assert_eq!(item.original_index % s, k);
                        seen.insert(item.original_index);
                        count += 1;
                    }
                }
                assert_eq!(count, n, "disjoint for n={} s={}", n, s);
                assert_eq!(seen.len(), n, "covering for n={} s={}", n, s);
            }
        }
    }

    #[tokio::test]
    async fn completed_shard_publishes_indexed_results_and_errors() {
        let store = MemoryStore::new();
        let cfg = config(2, 2);
        publish(&store, &cfg, &["a", "bad-b", "c", "bad-d", "e"]).await;

        let exit = run_shard(&store, Echo::new(Duration::ZERO), &cfg.job_id, 1)
            .await
            .unwrap();
        assert_eq!(exit, ShardExit::Completed { done: 2, failed: 2 });

        let results: Vec<ResultEntry> = get_json(&store, &keys::result(&cfg.job_id, 1))
            .await
            .unwrap()
            .unwrap();
        let indices: Vec<_> = results.iter().map(|e| e.original_index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(results.iter().all(|e| e.is_error() && e.record.is_empty()));

        let errors: Vec<ErrorRecord> = get_json(&store, &keys::errors(&cfg.job_id, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].shard_idx, 1);
        assert_eq!(errors[0].attempt, 1);
        assert!(errors[0].reason.contains("network error"));

        let progress: ShardProgress = get_json(&store, &keys::progress(&cfg.job_id, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress, ShardProgress { done: 2, total: 2 });
        assert!(get_flag(&store, &keys::done(&cfg.job_id, 1)).await.unwrap());
    }

    #[tokio::test]
    async fn panicking_fetch_fails_only_its_item() {
        let store = MemoryStore::new();
        let cfg = config(1, 2);
        publish(&store, &cfg, &["a", "panic", "c"]).await;

        let exit = run_shard(&store, Echo::new(Duration::ZERO), &cfg.job_id, 0)
            .await
            .unwrap();
        assert_eq!(exit, ShardExit::Completed { done: 3, failed: 1 });
        assert!(get_flag(&store, &keys::done(&cfg.job_id, 0)).await.unwrap());

        let results: Vec<ResultEntry> = get_json(&store, &keys::result(&cfg.job_id, 0))
            .await
            .unwrap()
            .unwrap();
        let failed: Vec<_> = results.iter().filter(|e| e.is_error()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].original_index, 1);
        assert!(failed[0].error.as_deref().unwrap().contains("fetch task failed"));
        let errors: Vec<ErrorRecord> = get_json(&store, &keys::errors(&cfg.job_id, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(errors[0].resource, "panic");
    }

    #[tokio::test]
    async fn empty_shard_completes_without_fetching() {
        let store = MemoryStore::new();
        let cfg = config(4, 2);
        publish(&store, &cfg, &["only"]).await;
        let fetcher = Echo::new(Duration::ZERO);

        let exit = run_shard(&store, Arc::clone(&fetcher), &cfg.job_id, 3)
            .await
            .unwrap();
        assert_eq!(exit, ShardExit::Completed { done: 0, failed: 0 });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        let progress: ShardProgress = get_json(&store, &keys::progress(&cfg.job_id, 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.total, 0);
        assert!(get_flag(&store, &keys::done(&cfg.job_id, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn abort_before_start_dispatches_nothing_and_never_sets_done() {
        let store = MemoryStore::new();
        let cfg = config(1, 2);
        publish(&store, &cfg, &["a", "b", "c"]).await;
        set_json(&store, &keys::abort(&cfg.job_id), &true).await.unwrap();
        let fetcher = Echo::new(Duration::ZERO);

        let exit = run_shard(&store, Arc::clone(&fetcher), &cfg.job_id, 0)
            .await
            .unwrap();
        assert_eq!(exit, ShardExit::Aborted { done: 0 });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(!get_flag(&store, &keys::done(&cfg.job_id, 0)).await.unwrap());
        assert!(store.get(&keys::result(&cfg.job_id, 0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abort_mid_run_drains_in_flight_only() {
        let store = Arc::new(MemoryStore::new());
        let cfg = config(1, 2);
        let resources: Vec<String> = (0..10).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = resources.iter().map(String::as_str).collect();
        publish(&store, &cfg, &refs).await;
        let fetcher = Echo::new(Duration::from_millis(50));

        let worker = {
            let store = Arc::clone(&store);
            let fetcher = Arc::clone(&fetcher);
            let job_id = cfg.job_id.clone();
            tokio::spawn(async move { run_shard(&*store, fetcher, &job_id, 0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        set_json(&*store, &keys::abort(&cfg.job_id), &true).await.unwrap();

        let exit = worker.await.unwrap().unwrap();
        let ShardExit::Aborted { done } = exit else {
            panic!("expected abort, got {:?}", exit);
        };
        assert!(done >= 2 && done < 10, "done = {}", done);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), done);
        assert!(!get_flag(&*store, &keys::done(&cfg.job_id, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_job_or_shard_is_an_error() {
        let store = MemoryStore::new();
        assert!(run_shard(&store, Echo::new(Duration::ZERO), "nope", 0)
            .await
            .is_err());
        let cfg = config(2, 1);
        publish(&store, &cfg, &["a"]).await;
        assert!(run_shard(&store, Echo::new(Duration::ZERO), &cfg.job_id, 2)
            .await
            .is_err());
    }
}
