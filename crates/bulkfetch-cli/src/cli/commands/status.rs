//! `bulkfetch status` – per-shard progress of a job, or the list of jobs.

use anyhow::Result;
use bulkfetch_core::model::{ErrorRecord, JobSpec, ShardProgress};
use bulkfetch_core::progress::JobProgress;
use bulkfetch_core::store::{get_flag, get_json, keys, SqliteStore};
use std::path::Path;

use super::open_store;

pub async fn run_status(store: Option<&Path>, job_id: Option<&str>) -> Result<()> {
    let store = open_store(store).await?;
    match job_id {
        Some(id) => show_job(&store, id).await,
        None => list_jobs(&store).await,
    }
}

async fn list_jobs(store: &SqliteStore) -> Result<()> {
    let jobs: Vec<String> = store
        .keys_with_prefix("job/")
        .await?
        .into_iter()
        .filter_map(|key| job_of_spec_key(&key).map(str::to_string))
        .collect();
    if jobs.is_empty() {
        println!("No jobs in store.");
        return Ok(());
    }
    println!("{:<28} {:<8} {:<8} {}", "JOB", "ATTEMPT", "SHARDS", "ITEMS");
    for id in jobs {
        if let Some(spec) = get_json::<_, JobSpec>(store, &keys::spec(&id)).await? {
            println!(
                "{:<28} {:<8} {:<8} {}",
                id,
                spec.config.attempt,
                spec.config.shard_count,
                spec.items.len()
            );
        }
    }
    Ok(())
}

async fn show_job(store: &SqliteStore, job_id: &str) -> Result<()> {
    let spec: JobSpec = get_json(store, &keys::spec(job_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {} not found in store", job_id))?;
    let aborted = get_flag(store, &keys::abort(job_id)).await?;

    println!(
        "job {}  attempt {}  {} item(s){}",
        job_id,
        spec.config.attempt,
        spec.items.len(),
        if aborted { "  [abort requested]" } else { "" }
    );
    println!("{:<6} {:<12} {:<8} {:<6} {}", "SHARD", "PROGRESS", "ERRORS", "DONE", "MERGED");

    let mut all = Vec::with_capacity(spec.config.shard_count);
    for k in 0..spec.config.shard_count {
        let progress: ShardProgress = get_json(store, &keys::progress(job_id, k))
            .await?
            .unwrap_or_default();
        let errors: Vec<ErrorRecord> = get_json(store, &keys::errors(job_id, k))
            .await?
            .unwrap_or_default();
        let done = get_flag(store, &keys::done(job_id, k)).await?;
        let merged = get_flag(store, &keys::merged(job_id, k)).await?;
        println!(
            "{:<6} {:<12} {:<8} {:<6} {}",
            k,
            format!("{}/{}", progress.done, progress.total),
            errors.len(),
            yes_no(done),
            yes_no(merged)
        );
        all.push(progress);
    }

    let total = JobProgress::aggregate(&all, 0.0);
    println!("{}/{} ({}%)", total.done_all, total.total_all, total.percent());
    Ok(())
}

fn job_of_spec_key(key: &str) -> Option<&str> {
    key.strip_prefix("job/")?.strip_suffix("/spec")
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
