//! `bulkfetch abort` – set a job's abort flag.

use anyhow::Result;
use bulkfetch_core::coordinator::request_abort;
use std::path::Path;

use super::open_store;

pub async fn run_abort(store: Option<&Path>, job_id: &str) -> Result<()> {
    let store = open_store(store).await?;
    request_abort(&store, job_id).await?;
    println!("Abort requested for job {}.", job_id);
    Ok(())
}
