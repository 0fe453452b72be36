//! Index-ordered result array shared by a job and its retry-jobs.

use std::collections::BTreeSet;

use crate::model::{Record, ResultEntry, WorkItem};
use crate::store::{get_flag, get_json, keys, set_json, CoordinationStore};

/// Final results, one slot per original index. `None` is pending.
#[derive(Debug, Clone)]
pub struct MergedResults {
    items: Vec<WorkItem>,
    entries: Vec<Option<ResultEntry>>,
}

impl MergedResults {
    /// Empty array for `items`, which must be numbered `0..items.len()`.
    pub fn new(items: Vec<WorkItem>) -> Self {
        let entries = vec![None; items.len()];
        Self { items, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResultEntry> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub fn entries(&self) -> &[Option<ResultEntry>] {
        &self.entries
    }

    /// The original work item at `index`.
    pub fn item(&self, index: usize) -> Option<&WorkItem> {
        self.items.get(index)
    }

    /// Slots still pending.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| e.is_none()).count()
    }

    /// Write `entries` into their slots. Only indices in `allowed` (the items
    /// of the job being merged) are written; anything else is skipped.
    /// Returns the number of slots written.
    pub fn apply(&mut self, entries: Vec<ResultEntry>, allowed: &BTreeSet<usize>) -> usize {
        let mut written = 0;
        for entry in entries {
            let idx = entry.original_index;
            if idx >= self.entries.len() || !allowed.contains(&idx) {
                tracing::warn!(index = idx, "ignoring result for index outside the job");
                continue;
            }
            self.entries[idx] = Some(entry);
            written += 1;
        }
        written
    }

    /// Indices that are pending, carry an error, or whose record `is_bad`.
    pub fn failed_indices<P>(&self, is_bad: P) -> Vec<usize>
    where
        P: Fn(&Record) -> bool,
    {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| match e {
                None => true,
                Some(entry) => entry.is_error() || is_bad(&entry.record),
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Work items for `failed_indices`, with resource and original index unchanged.
    pub fn retry_items<P>(&self, is_bad: P) -> Vec<WorkItem>
    where
        P: Fn(&Record) -> bool,
    {
        self.failed_indices(is_bad)
            .into_iter()
            .filter_map(|i| self.items.get(i).cloned())
            .collect()
    }

    /// Records in index order; pending or failed slots yield an empty record.
    pub fn records(&self) -> Vec<Record> {
        self.entries
            .iter()
            .map(|e| e.as_ref().map(|e| e.record.clone()).unwrap_or_default())
            .collect()
    }
}

/// One shard as seen by a single `merge_shard` call. Each flag comes from
/// exactly one store read, so `merged` never runs ahead of `done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ShardMerge {
    pub done: bool,
    /// Merged by this call or an earlier one.
    pub merged: bool,
    /// Merged by this call.
    pub merged_now: bool,
}

/// Merge one shard's published result at most once.
///
/// Reads `done` and `merged`; if the shard is done and not yet merged, folds
/// its result into `target` and then sets `merged`. A done shard whose result
/// is not visible yet is left for the next poll.
pub(crate) async fn merge_shard<S: CoordinationStore>(
    store: &S,
    job_id: &str,
    shard: usize,
    target: &mut MergedResults,
    allowed: &BTreeSet<usize>,
) -> anyhow::Result<ShardMerge> {
    if !get_flag(store, &keys::done(job_id, shard)).await? {
        return Ok(ShardMerge::default());
    }
    if get_flag(store, &keys::merged(job_id, shard)).await? {
        return Ok(ShardMerge {
            done: true,
            merged: true,
            merged_now: false,
        });
    }
    let Some(entries) = get_json::<S, Vec<ResultEntry>>(store, &keys::result(job_id, shard)).await?
    else {
        tracing::debug!(job_id, shard, "shard done but result not visible yet");
        return Ok(ShardMerge {
            done: true,
            ..ShardMerge::default()
        });
    };
    let written = target.apply(entries, allowed);
    set_json(store, &keys::merged(job_id, shard), &true).await?;
    tracing::debug!(job_id, shard, written, "merged shard result");
    Ok(ShardMerge {
        done: true,
        merged: true,
        merged_now: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(idx: usize, value: &str) -> ResultEntry {
        let mut record = Record::new();
        record.insert("v".into(), json!(value));
        ResultEntry {
            original_index: idx,
            record,
            error: None,
        }
    }

    fn failed(idx: usize) -> ResultEntry {
        ResultEntry {
            original_index: idx,
            record: Record::new(),
            error: Some("timeout after 10ms".into()),
        }
    }

    fn all(n: usize) -> BTreeSet<usize> {
        (0..n).collect()
    }

    #[test]
    fn apply_writes_by_index_regardless_of_order() {
        let mut m = MergedResults::new(WorkItem::from_resources(["a", "b", "c"]));
        assert_eq!(m.pending(), 3);
        m.apply(vec![entry(2, "C"), entry(0, "A")], &all(3));
        assert_eq!(m.pending(), 1);
        assert_eq!(m.get(0).unwrap().record["v"], json!("A"));
        assert!(m.get(1).is_none());
        assert_eq!(m.get(2).unwrap().record["v"], json!("C"));
    }

    #[test]
    fn apply_skips_indices_outside_the_job() {
        let mut m = MergedResults::new(WorkItem::from_resources(["a", "b"]));
        let allowed: BTreeSet<usize> = [1].into_iter().collect();
        let written = m.apply(vec![entry(0, "x"), entry(1, "B"), entry(9, "z")], &allowed);
        assert_eq!(written, 1);
        assert!(m.get(0).is_none());
    }

    #[test]
    fn failed_indices_cover_pending_errors_and_bad_records() {
        let mut m = MergedResults::new(WorkItem::from_resources(["a", "b", "c", "d", "e"]));
        m.apply(
            vec![entry(0, "A"), failed(1), entry(2, ""), entry(4, "E")],
            &all(5),
        );
        let bad = |r: &Record| r.get("v").and_then(|v| v.as_str()) == Some("");
        assert_eq!(m.failed_indices(bad), vec![1, 2, 3]);

        let items = m.retry_items(bad);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].original_index, 1);
        assert_eq!(items[0].resource, "b");
        assert_eq!(items[2].resource, "d");
    }

    #[test]
    fn records_fill_gaps_with_empty() {
        let mut m = MergedResults::new(WorkItem::from_resources(["a", "b"]));
        m.apply(vec![entry(1, "B")], &all(2));
        let recs = m.records();
        assert!(recs[0].is_empty());
        assert_eq!(recs[1]["v"], json!("B"));
    }
}
