//! `bulkfetch run` – start a job, poll it to completion, run retry rounds, emit results.

use anyhow::{Context, Result};
use bulkfetch_core::config::{BulkConfig, StoreBackend};
use bulkfetch_core::coordinator::{
    JobCoordinator, MergedResults, ProcessSpawner, TaskSpawner, WorkerSpawner,
};
use bulkfetch_core::model::{JobConfig, WorkItem};
use bulkfetch_core::progress::JobProgress;
use bulkfetch_core::store::{CoordinationStore, MemoryStore, SqliteStore};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cli::RunArgs;

/// How the CLI waits on a job and its retry rounds.
struct Waiting {
    poll: Duration,
    deadline: Option<(Instant, u64)>,
    retry_rounds: u32,
}

pub async fn run_job(cfg: &BulkConfig, args: RunArgs) -> Result<()> {
    let items = read_items(&args.input)?;
    let config = job_config(cfg, &args);
    let waiting = Waiting {
        poll: Duration::from_millis(cfg.poll_interval_ms.max(10)),
        deadline: args
            .timeout
            .map(|secs| (Instant::now() + Duration::from_secs(secs), secs)),
        retry_rounds: args.retry_rounds,
    };
    let fetcher = Arc::new(args.extract.fetcher(cfg.user_agent.clone()));
    let use_sqlite = args.processes
        || args.store.is_some()
        || cfg.store_backend == Some(StoreBackend::Sqlite);

    let results = if !use_sqlite {
        let store = Arc::new(MemoryStore::new());
        let spawner = TaskSpawner::new(Arc::clone(&store), fetcher);
        drive(JobCoordinator::new(store, spawner), items, config, &waiting).await?
    } else {
        let path = match &args.store {
            Some(p) => p.clone(),
            None => SqliteStore::default_path()?,
        };
        let store = Arc::new(SqliteStore::open_at(&path).await?);
        if args.processes {
            let exe = std::env::current_exe().context("locate bulkfetch executable")?;
            let spawner = ProcessSpawner::new(exe, path.clone())
                .with_args(["--extract", args.extract.as_arg()]);
            drive(JobCoordinator::new(store, spawner), items, config, &waiting).await?
        } else {
            let spawner = TaskSpawner::new(Arc::clone(&store), fetcher);
            drive(JobCoordinator::new(store, spawner), items, config, &waiting).await?
        }
    };

    let lines = result_lines(&results);
    let failed = lines.iter().filter(|l| !l["error"].is_null()).count();
    match args.out.as_deref() {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
            write_lines(BufWriter::new(file), &lines)?;
            eprintln!("Wrote {} result(s) to {}.", lines.len(), path.display());
        }
        None => write_lines(io::stdout().lock(), &lines)?,
    }
    eprintln!("{} item(s), {} failed.", lines.len(), failed);
    Ok(())
}

/// Start the job, wait for it, then run retry jobs over failed items until
/// none are left or the rounds are used up. Job keys are discarded at the end.
async fn drive<S, W>(
    mut coord: JobCoordinator<S, W>,
    items: Vec<WorkItem>,
    config: JobConfig,
    waiting: &Waiting,
) -> Result<MergedResults>
where
    S: CoordinationStore,
    W: WorkerSpawner,
{
    let total = items.len();
    let root = coord.start_job(items, config).await?;
    eprintln!("Job {} started: {} item(s).", root, total);
    wait_complete(&mut coord, &root, waiting).await?;

    // Each round derives from the previous one so `attempt` keeps climbing.
    let mut jobs = vec![root.clone()];
    let mut last = root.clone();
    for round in 1..=waiting.retry_rounds {
        let retry_items = coord.build_retry_job(&last, |_| false).await?;
        if retry_items.is_empty() {
            break;
        }
        eprintln!("Retry round {}: {} item(s).", round, retry_items.len());
        last = coord.start_retry_job(&last, retry_items).await?;
        wait_complete(&mut coord, &last, waiting).await?;
        jobs.push(last.clone());
    }

    for id in &jobs {
        coord.discard(id).await?;
    }
    Ok(coord.results(&root)?.clone())
}

async fn wait_complete<S, W>(
    coord: &mut JobCoordinator<S, W>,
    job_id: &str,
    waiting: &Waiting,
) -> Result<()>
where
    S: CoordinationStore,
    W: WorkerSpawner,
{
    let mut ticker = tokio::time::interval(waiting.poll);
    let mut last_done = None;
    loop {
        ticker.tick().await;
        let status = coord.poll_once(job_id).await?;
        for e in &status.new_errors {
            eprintln!(
                "  [shard {}] {}: {} ({} ms)",
                e.shard_idx, e.resource, e.reason, e.duration_ms
            );
        }
        if last_done != Some(status.progress.done_all) {
            eprintln!("  {}", progress_line(&status.progress));
            last_done = Some(status.progress.done_all);
        }
        if status.complete {
            return Ok(());
        }
        if let Some((deadline, secs)) = waiting.deadline {
            if Instant::now() >= deadline {
                coord.abort(job_id).await?;
                anyhow::bail!("job {} not finished after {}s; abort requested", job_id, secs);
            }
        }
    }
}

fn progress_line(p: &JobProgress) -> String {
    format!(
        "{}/{} ({}%)  {:.1} items/s  ETA {:.0}s",
        p.done_all,
        p.total_all,
        p.percent(),
        p.items_per_sec(),
        p.eta_secs()
    )
}

fn job_config(cfg: &BulkConfig, args: &RunArgs) -> JobConfig {
    let mut settings = cfg.clone();
    if let Some(n) = args.shards {
        settings.shard_count = n;
    }
    if let Some(n) = args.pool {
        settings.pool_size = n;
    }
    if let Some(ms) = args.delay_ms {
        settings.inter_dispatch_delay_ms = ms;
    }
    if let Some(secs) = args.fetch_timeout {
        settings.fetch_timeout_secs = secs;
    }
    for field in &args.required_fields {
        if !settings.required_fields.contains(field) {
            settings.required_fields.push(field.clone());
        }
    }
    JobConfig::from_settings(&settings)
}

fn read_items(path: &Path) -> Result<Vec<WorkItem>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(WorkItem::from_resources(parse_resources(&text)))
}

/// One resource per line; blank lines and `#` comments are skipped.
fn parse_resources(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}

/// One JSON object per original index, in input order.
fn result_lines(results: &MergedResults) -> Vec<Value> {
    results
        .entries()
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let resource = results.item(index).map(|i| i.resource.as_str()).unwrap_or("");
            match entry {
                Some(e) => json!({
                    "index": index,
                    "resource": resource,
                    "record": e.record,
                    "error": e.error,
                }),
                None => json!({
                    "index": index,
                    "resource": resource,
                    "record": {},
                    "error": "not fetched",
                }),
            }
        })
        .collect()
}

fn write_lines<W: Write>(mut out: W, lines: &[Value]) -> Result<()> {
    for line in lines {
        serde_json::to_writer(&mut out, line)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
