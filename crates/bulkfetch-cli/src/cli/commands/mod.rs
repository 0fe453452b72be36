//! CLI command handlers, one file per subcommand.

mod abort;
mod run;
mod status;
mod worker;

pub use abort::run_abort;
pub use run::run_job;
pub use status::run_status;
pub use worker::run_worker;

use anyhow::Result;
use bulkfetch_core::store::SqliteStore;
use std::path::Path;

/// Open the store at `path`, or the default state-dir store.
async fn open_store(path: Option<&Path>) -> Result<SqliteStore> {
    match path {
        Some(p) => SqliteStore::open_at(p).await,
        None => SqliteStore::open_default().await,
    }
}
