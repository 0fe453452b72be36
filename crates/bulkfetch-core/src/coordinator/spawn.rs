//! Launching shard workers: as tokio tasks or as child processes.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use crate::fetch::Fetcher;
use crate::store::CoordinationStore;
use crate::worker::{run_shard, ShardExit};

/// Starts one shard worker for a job. Must not block on the worker; the
/// coordinator learns about progress only through the store.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, job_id: &str, shard_idx: usize) -> Result<()>;
}

/// Runs each shard worker as a tokio task sharing the coordinator's store.
pub struct TaskSpawner<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
}

impl<S, F> TaskSpawner<S, F> {
    pub fn new(store: Arc<S>, fetcher: Arc<F>) -> Self {
        Self { store, fetcher }
    }
}

impl<S: CoordinationStore, F: Fetcher> WorkerSpawner for TaskSpawner<S, F> {
    fn spawn(&self, job_id: &str, shard_idx: usize) -> Result<()> {
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            match run_shard(&*store, fetcher, &job_id, shard_idx).await {
                Ok(ShardExit::Completed { done, failed }) => {
                    tracing::debug!(job_id, shard = shard_idx, done, failed, "worker task finished");
                }
                Ok(ShardExit::Aborted { done }) => {
                    tracing::debug!(job_id, shard = shard_idx, done, "worker task aborted");
                }
                Err(e) => {
                    tracing::error!(job_id, shard = shard_idx, "shard worker failed: {:#}", e);
                }
            }
        });
        Ok(())
    }
}

/// Runs each shard worker as a child process:
/// `<program> worker --store <db> --job <id> --shard <k> [extra args]`.
/// The store must be a file every process can open (SQLite).
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    store_path: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            store_path: store_path.into(),
            extra_args: Vec::new(),
        }
    }

    /// Arguments appended after the shard flag (e.g. extractor selection).
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Full argument list for one worker.
    pub fn args_for(&self, job_id: &str, shard_idx: usize) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "--store".to_string(),
            self.store_path.to_string_lossy().into_owned(),
            "--job".to_string(),
            job_id.to_string(),
            "--shard".to_string(),
            shard_idx.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, job_id: &str, shard_idx: usize) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(self.args_for(job_id, shard_idx))
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn worker {}", self.program.display()))?;
        let job_id = job_id.to_string();
        tracing::debug!(job_id, shard = shard_idx, pid = child.id(), "worker process started");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    tracing::warn!(job_id, shard = shard_idx, %status, "worker process exited");
                }
                Err(e) => {
                    tracing::warn!(job_id, shard = shard_idx, "worker process wait: {}", e);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_args_name_job_and_shard() {
        let spawner = ProcessSpawner::new("/usr/bin/bulkfetch", "/tmp/coord.db")
            .with_args(["--extract", "text"]);
        assert_eq!(
            spawner.args_for("job-1", 3),
            vec![
                "worker",
                "--store",
                "/tmp/coord.db",
                "--job",
                "job-1",
                "--shard",
                "3",
                "--extract",
                "text"
            ]
        );
    }
}
