//! Bounded-parallelism executor used inside one shard worker.
//!
//! Keeps at most `pool_size` fetches in flight; when one settles the owner
//! calls `refill` to start the next queued item. The pool never looks at the
//! abort flag: the shard worker checks it before each refill, which keeps the
//! pool a plain scheduler.
//!
//! Dispatches are staggered by `dispatch_delay * (position mod pool_size)` so
//! a fresh batch does not hit the remote in one synchronized burst.
//!
//! Each fetch runs in its own task; a panicking fetch settles as a
//! `JoinError` at its position instead of taking the pool down.

use anyhow::Result;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

use crate::model::WorkItem;

/// A settled fetch: position in the pool's item list and the fetch's output,
/// or the join error if the fetch task panicked.
pub type Settled<T> = (usize, Result<T, JoinError>);

/// Queue of pending items plus the set of in-flight fetches.
/// Outcomes are keyed by position in the item list the pool was built from.
pub struct ConcurrencyPool<T> {
    queue: VecDeque<(usize, WorkItem)>,
    pool_size: usize,
    dispatch_delay: Duration,
    in_flight: JoinSet<Settled<T>>,
}

impl<T: Send + 'static> ConcurrencyPool<T> {
    pub fn new(items: Vec<WorkItem>, pool_size: usize, dispatch_delay: Duration) -> Self {
        Self {
            queue: items.into_iter().enumerate().collect(),
            pool_size: pool_size.max(1),
            dispatch_delay,
            in_flight: JoinSet::new(),
        }
    }

    /// Fetches currently in flight (always `<= pool_size`).
    pub fn active(&self) -> usize {
        self.in_flight.len()
    }

    /// Items not yet dispatched.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Start queued items until `pool_size` are in flight or the queue is
    /// empty. Returns how many were dispatched.
    pub fn refill<F, Fut>(&mut self, fetch: &F) -> usize
    where
        F: Fn(WorkItem) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut dispatched = 0;
        while self.in_flight.len() < self.pool_size {
            let Some((pos, item)) = self.queue.pop_front() else {
                break;
            };
            let stagger = self
                .dispatch_delay
                .saturating_mul((pos % self.pool_size) as u32);
            let fut = fetch(item);
            self.in_flight.spawn(async move {
                if !stagger.is_zero() {
                    tokio::time::sleep(stagger).await;
                }
                (pos, tokio::spawn(fut).await)
            });
            dispatched += 1;
        }
        dispatched
    }

    /// Wait for the next in-flight fetch to settle. `None` when nothing is in
    /// flight. The outer `Err` means the dispatch task itself was lost.
    pub async fn next_settled(&mut self) -> Option<Result<Settled<T>>> {
        let res = self.in_flight.join_next().await?;
        Some(res.map_err(|e| anyhow::anyhow!("dispatch task join: {}", e)))
    }
}

/// Run every item to completion with at most `pool_size` in flight.
/// Resolves only after every item has settled; a panicked fetch is kept as
/// its `JoinError`.
pub async fn run<T, F, Fut>(
    items: Vec<WorkItem>,
    pool_size: usize,
    dispatch_delay: Duration,
    fetch: F,
) -> Result<BTreeMap<usize, Result<T, JoinError>>>
where
    T: Send + 'static,
    F: Fn(WorkItem) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let mut pool = ConcurrencyPool::new(items, pool_size, dispatch_delay);
    let mut out = BTreeMap::new();
    pool.refill(&fetch);
    while let Some(settled) = pool.next_settled().await {
        let (pos, outcome) = settled?;
        out.insert(pos, outcome);
        pool.refill(&fetch);
    }
    Ok(out)
}
