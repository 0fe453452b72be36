//! Job coordinator: starts jobs, polls shard state, merges results once per shard.
//!
//! The coordinator and its workers share nothing but the coordination store.
//! `start_job` seeds the store and spawns one worker per shard, then returns.
//! Callers drive everything else by calling `poll_once` on an interval: each
//! call sums shard progress, hands back errors not seen before, and folds in
//! any shard that has finished but not been merged. The merge guard lives in
//! the store (`merged` flag per shard), so polling as often as you like never
//! merges a shard twice. A poll reports the job complete only once every
//! shard is both done and merged, so its results are final at that point.
//!
//! Retry-jobs write into their parent's result array. A retry can only be
//! built from a settled job (every shard merged, or abort requested), and a
//! started retry claims its indices: no other job sharing the array may
//! write them afterwards.
//!
//! There is no built-in bound on how long a job may take. An aborted or
//! stalled job simply never reports complete; callers impose their own
//! deadline.

mod merge;
mod spawn;

pub use merge::MergedResults;
pub use spawn::{ProcessSpawner, TaskSpawner, WorkerSpawner};

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::model::{
    ErrorRecord, JobConfig, JobId, JobSpec, Record, ResultEntry, ShardProgress, WorkItem,
};
use crate::progress::JobProgress;
use crate::store::{get_flag, get_json, keys, set_json, CoordinationStore};
use crate::worker::shard_items;

/// What one `poll_once` call observed.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub job_id: JobId,
    pub progress: JobProgress,
    /// Error records appended since the previous poll of this job.
    pub new_errors: Vec<ErrorRecord>,
    /// Shards merged during this poll.
    pub merged_shards: Vec<usize>,
    /// Shards that have reported done.
    pub shards_done: usize,
    /// Shards whose result is in the merged array.
    pub shards_merged: usize,
    pub shard_count: usize,
    /// Every shard is done and merged; the job's slots are final.
    pub complete: bool,
}

/// Coordinator-side bookkeeping for one job.
struct JobEntry {
    config: JobConfig,
    /// Index into `JobCoordinator::targets`; shared with retry-jobs.
    target: usize,
    /// Original indices this job may still write; a later retry-job removes
    /// the ones it claims.
    indices: BTreeSet<usize>,
    /// Per-shard count of error records already returned.
    seen_errors: Vec<usize>,
    started: Instant,
    discarded: bool,
}

/// Creates jobs and retry-jobs, polls their progress and owns merged results.
pub struct JobCoordinator<S, W> {
    store: Arc<S>,
    spawner: W,
    jobs: HashMap<JobId, JobEntry>,
    targets: Vec<MergedResults>,
}

impl<S: CoordinationStore, W: WorkerSpawner> JobCoordinator<S, W> {
    pub fn new(store: Arc<S>, spawner: W) -> Self {
        Self {
            store,
            spawner,
            jobs: HashMap::new(),
            targets: Vec::new(),
        }
    }

    /// Start a job over `items` (numbered `0..n` in caller order). Seeds the
    /// store, spawns one worker per shard and returns without waiting.
    pub async fn start_job(&mut self, items: Vec<WorkItem>, config: JobConfig) -> Result<JobId> {
        if let Some((pos, item)) = items
            .iter()
            .enumerate()
            .find(|(pos, item)| item.original_index != *pos)
        {
            anyhow::bail!(
                "item at position {} has original_index {}; fresh jobs must be numbered in order",
                pos,
                item.original_index
            );
        }
        self.targets.push(MergedResults::new(items.clone()));
        let target = self.targets.len() - 1;
        self.launch(items, config, target).await
    }

    /// Start a retry-job for `items` selected from `parent`'s results. Uses
    /// the parent's config with `attempt + 1` and merges into the parent's
    /// result array, touching only the given indices. The parent must be
    /// settled; every other job on the same array loses write access to
    /// those indices.
    pub async fn start_retry_job(&mut self, parent: &str, items: Vec<WorkItem>) -> Result<JobId> {
        self.ensure_settled(parent).await?;
        let entry = self.entry(parent)?;
        let config = entry.config.next_attempt();
        let target = entry.target;
        let len = self.targets[target].len();
        if let Some(item) = items.iter().find(|item| item.original_index >= len) {
            anyhow::bail!(
                "retry item index {} out of range ({} items)",
                item.original_index,
                len
            );
        }
        let claimed: BTreeSet<usize> = items.iter().map(|i| i.original_index).collect();
        let job_id = self.launch(items, config, target).await?;
        for (id, other) in self.jobs.iter_mut() {
            if other.target == target && *id != job_id {
                other.indices.retain(|idx| !claimed.contains(idx));
            }
        }
        Ok(job_id)
    }

    async fn launch(
        &mut self,
        items: Vec<WorkItem>,
        mut config: JobConfig,
        target: usize,
    ) -> Result<JobId> {
        config.shard_count = config.shard_count.max(1);
        config.pool_size = config.pool_size.max(1);
        let job_id = config.job_id.clone();
        if self.jobs.contains_key(&job_id) {
            anyhow::bail!("job {} already exists", job_id);
        }
        let shard_count = config.shard_count;
        let store = &*self.store;

        let spec = JobSpec {
            config: config.clone(),
            items,
        };
        set_json(store, &keys::spec(&job_id), &spec).await?;
        set_json(store, &keys::abort(&job_id), &false).await?;
        for k in 0..shard_count {
            let total = shard_items(&spec.items, k, shard_count).len();
            set_json(store, &keys::progress(&job_id, k), &ShardProgress { done: 0, total }).await?;
            set_json(store, &keys::errors(&job_id, k), &Vec::<ErrorRecord>::new()).await?;
            set_json(store, &keys::done(&job_id, k), &false).await?;
            set_json(store, &keys::merged(&job_id, k), &false).await?;
            store.remove(&keys::result(&job_id, k)).await?;
        }

        let indices: BTreeSet<usize> = spec.items.iter().map(|i| i.original_index).collect();
        self.jobs.insert(
            job_id.clone(),
            JobEntry {
                config,
                target,
                indices,
                seen_errors: vec![0; shard_count],
                started: Instant::now(),
                discarded: false,
            },
        );

        if spec.items.is_empty() {
            // No worker would have anything to do; publish the empty result directly.
            for k in 0..shard_count {
                set_json(store, &keys::result(&job_id, k), &Vec::<ResultEntry>::new()).await?;
                set_json(store, &keys::done(&job_id, k), &true).await?;
            }
            tracing::info!(job_id, "empty job complete");
            return Ok(job_id);
        }

        for k in 0..shard_count {
            self.spawner.spawn(&job_id, k)?;
        }
        tracing::info!(
            job_id,
            items = spec.items.len(),
            shards = shard_count,
            attempt = spec.config.attempt,
            "job started"
        );
        Ok(job_id)
    }

    /// Read every shard once: aggregate progress, collect unseen errors and
    /// merge newly finished shards. Safe to call repeatedly.
    pub async fn poll_once(&mut self, job_id: &str) -> Result<JobStatus> {
        let entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))?;
        if entry.discarded {
            anyhow::bail!("job {} was discarded", job_id);
        }
        let store = &*self.store;
        let target = &mut self.targets[entry.target];
        let shard_count = entry.config.shard_count;

        let mut shard_progress = Vec::with_capacity(shard_count);
        let mut new_errors = Vec::new();
        let mut merged_shards = Vec::new();
        let mut shards_done = 0;
        let mut shards_merged = 0;

        for k in 0..shard_count {
            let progress: ShardProgress = get_json(store, &keys::progress(job_id, k))
                .await?
                .unwrap_or_default();
            shard_progress.push(progress);

            let errors: Vec<ErrorRecord> = get_json(store, &keys::errors(job_id, k))
                .await?
                .unwrap_or_default();
            let seen = &mut entry.seen_errors[k];
            let len = errors.len();
            if len > *seen {
                new_errors.extend(errors.into_iter().skip(*seen));
                *seen = len;
            }

            let shard = merge::merge_shard(store, job_id, k, target, &entry.indices).await?;
            if shard.merged_now {
                merged_shards.push(k);
            }
            if shard.done {
                shards_done += 1;
            }
            if shard.merged {
                shards_merged += 1;
            }
        }

        let progress = JobProgress::aggregate(&shard_progress, entry.started.elapsed().as_secs_f64());
        let complete = shards_merged == shard_count;
        tracing::debug!(
            job_id,
            done = progress.done_all,
            total = progress.total_all,
            new_errors = new_errors.len(),
            merged = merged_shards.len(),
            "poll"
        );
        Ok(JobStatus {
            job_id: job_id.to_string(),
            progress,
            new_errors,
            merged_shards,
            shards_done,
            shards_merged,
            shard_count,
            complete,
        })
    }

    /// True when every shard of the job reported done. Results may still be
    /// waiting for the next `poll_once` to merge them.
    pub async fn is_complete(&self, job_id: &str) -> Result<bool> {
        let entry = self.entry(job_id)?;
        if entry.discarded {
            return Ok(true);
        }
        for k in 0..entry.config.shard_count {
            if !get_flag(&*self.store, &keys::done(job_id, k)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Set the job's abort flag. In-flight fetches finish on their own; the
    /// job will never report complete afterwards.
    pub async fn abort(&self, job_id: &str) -> Result<()> {
        self.entry(job_id)?;
        request_abort(&*self.store, job_id).await
    }

    /// Items to re-run: every slot of the job's result array that is pending,
    /// carries an error, or whose record `is_bad`. Resource and original
    /// index are kept; nothing is modified. Fails while the job is still
    /// running.
    pub async fn build_retry_job<P>(&self, job_id: &str, is_bad: P) -> Result<Vec<WorkItem>>
    where
        P: Fn(&Record) -> bool,
    {
        self.ensure_settled(job_id).await?;
        let entry = self.entry(job_id)?;
        Ok(self.targets[entry.target].retry_items(is_bad))
    }

    /// A job is settled when nothing it runs can still land in its slots
    /// unannounced: every shard done and merged, abort requested, or discarded.
    async fn ensure_settled(&self, job_id: &str) -> Result<()> {
        let entry = self.entry(job_id)?;
        if entry.discarded || get_flag(&*self.store, &keys::abort(job_id)).await? {
            return Ok(());
        }
        for k in 0..entry.config.shard_count {
            let store = &*self.store;
            if !get_flag(store, &keys::done(job_id, k)).await?
                || !get_flag(store, &keys::merged(job_id, k)).await?
            {
                anyhow::bail!(
                    "job {} shard {} not finished and merged; poll until complete or abort first",
                    job_id,
                    k
                );
            }
        }
        Ok(())
    }

    /// Merged results for the job (shared with its retry-jobs), in index order.
    pub fn results(&self, job_id: &str) -> Result<&MergedResults> {
        let entry = self.entry(job_id)?;
        Ok(&self.targets[entry.target])
    }

    /// The config a job was started with.
    pub fn config(&self, job_id: &str) -> Result<&JobConfig> {
        Ok(&self.entry(job_id)?.config)
    }

    /// Delete a finished job's keys from the store. Results stay available.
    pub async fn discard(&mut self, job_id: &str) -> Result<()> {
        if !self.is_complete(job_id).await? {
            anyhow::bail!("job {} is not complete", job_id);
        }
        let entry = self.entry(job_id)?;
        if entry.discarded {
            return Ok(());
        }
        let shard_count = entry.config.shard_count;
        for k in 0..shard_count {
            if !get_flag(&*self.store, &keys::merged(job_id, k)).await? {
                anyhow::bail!("job {} shard {} not merged yet; poll first", job_id, k);
            }
        }
        for key in keys::all_for_job(job_id, shard_count) {
            self.store.remove(&key).await?;
        }
        if let Some(entry) = self.jobs.get_mut(job_id) {
            entry.discarded = true;
        }
        tracing::debug!(job_id, "job keys discarded");
        Ok(())
    }

    fn entry(&self, job_id: &str) -> Result<&JobEntry> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))
    }
}

/// Set a job's abort flag directly in the store (usable from another process).
pub async fn request_abort<S: CoordinationStore>(store: &S, job_id: &str) -> Result<()> {
    set_json(store, &keys::abort(job_id), &true).await?;
    tracing::info!(job_id, "abort requested");
    Ok(())
}
