//! Coordination store: the only channel between the coordinator and shard workers.
//!
//! Plain get/set/remove over string keys with JSON values. There are no
//! transactions and no notifications; every consumer polls. The key layout
//! in [`keys`] gives each key one writer while the job runs:
//!
//! | key                              | writer while running |
//! |----------------------------------|----------------------|
//! | `job/<id>/spec`                  | coordinator          |
//! | `job/<id>/abort`                 | coordinator          |
//! | `job/<id>/shard/<k>/merged`      | coordinator          |
//! | `job/<id>/shard/<k>/progress`    | shard `k`            |
//! | `job/<id>/shard/<k>/errors`      | shard `k`            |
//! | `job/<id>/shard/<k>/result`      | shard `k`            |
//! | `job/<id>/shard/<k>/done`        | shard `k`            |
//!
//! Before that, when a job or retry-job is launched, the coordinator writes
//! every key of the job (clearing `result`) and only then spawns workers. A
//! job with no items gets no workers; the coordinator publishes its empty
//! `result` and `done` itself. Discarding removes all keys once every shard
//! is merged.

pub mod keys;
mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Shared key-value store. Atomic per key only.
pub trait CoordinationStore: Send + Sync + 'static {
    /// Value stored at `key`, or `None` if absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Overwrite `key` with `value`.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete `key`; absent keys are not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<S: CoordinationStore> CoordinationStore for Arc<S> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).remove(key)
    }
}

/// Read and decode a JSON value.
pub async fn get_json<S, T>(store: &S, key: &str) -> Result<Option<T>>
where
    S: CoordinationStore,
    T: DeserializeOwned,
{
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(&bytes).with_context(|| format!("decode {}", key))?;
    Ok(Some(value))
}

/// Encode and write a JSON value.
pub async fn set_json<S, T>(store: &S, key: &str, value: &T) -> Result<()>
where
    S: CoordinationStore,
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes).await
}

/// Boolean flag; absent reads as `false`.
pub async fn get_flag<S: CoordinationStore>(store: &S, key: &str) -> Result<bool> {
    Ok(get_json::<S, bool>(store, key).await?.unwrap_or(false))
}
