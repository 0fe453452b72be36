//! Sharded bulk-fetch job coordinator.
//!
//! A job's work items are partitioned across shard workers, each running a
//! bounded concurrency pool of fetches. Workers report progress, errors and
//! results through a shared [`store::CoordinationStore`]; the
//! [`coordinator::JobCoordinator`] polls it, merges each finished shard into
//! one index-ordered result array exactly once, and can build retry-jobs for
//! the items that failed.

pub mod config;
pub mod logging;

pub mod coordinator;
pub mod fetch;
pub mod model;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod store;
pub mod worker;
