//! `bulkfetch worker` – one shard worker in its own process.

use anyhow::Result;
use bulkfetch_core::config::BulkConfig;
use bulkfetch_core::store::SqliteStore;
use bulkfetch_core::worker::{run_shard, ShardExit};
use std::path::Path;
use std::sync::Arc;

use crate::cli::ExtractKind;

pub async fn run_worker(
    cfg: &BulkConfig,
    store: &Path,
    job_id: &str,
    shard_idx: usize,
    extract: ExtractKind,
) -> Result<()> {
    let store = SqliteStore::open_at(store).await?;
    let fetcher = Arc::new(extract.fetcher(cfg.user_agent.clone()));
    match run_shard(&store, fetcher, job_id, shard_idx).await? {
        ShardExit::Completed { done, failed } => {
            tracing::info!(job_id, shard = shard_idx, done, failed, "worker process finished");
        }
        ShardExit::Aborted { done } => {
            tracing::info!(job_id, shard = shard_idx, done, "worker process aborted");
        }
    }
    Ok(())
}
