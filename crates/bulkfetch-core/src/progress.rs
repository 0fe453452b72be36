//! Aggregate progress across shards (items done, rate, ETA).
//!
//! Rate = done_all / elapsed, ETA = (total_all - done_all) / rate.

use crate::model::ShardProgress;

/// Snapshot of a job's progress summed over all shards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobProgress {
    /// Items settled (success or failure) across all shards.
    pub done_all: usize,
    /// Items assigned across all shards.
    pub total_all: usize,
    /// Seconds since the coordinator started the job.
    pub elapsed_secs: f64,
}

impl JobProgress {
    /// Sum per-shard progress.
    pub fn aggregate<'a, I>(shards: I, elapsed_secs: f64) -> Self
    where
        I: IntoIterator<Item = &'a ShardProgress>,
    {
        let (done_all, total_all) = shards
            .into_iter()
            .fold((0, 0), |(d, t), p| (d + p.done, t + p.total));
        Self {
            done_all,
            total_all,
            elapsed_secs,
        }
    }

    /// Items per second (0 if elapsed is 0).
    pub fn items_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.done_all as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining; 0 when the rate is still 0.
    pub fn eta_secs(&self) -> f64 {
        let speed = self.items_per_sec();
        if speed <= 0.0 {
            return 0.0;
        }
        self.total_all.saturating_sub(self.done_all) as f64 / speed
    }

    /// Percent complete, rounded. An empty job is 100%.
    pub fn percent(&self) -> u32 {
        if self.total_all == 0 {
            return 100;
        }
        ((self.done_all as f64 / self.total_all as f64) * 100.0)
            .round()
            .min(100.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_shards_and_rounds_percent() {
        let shards = [
            ShardProgress { done: 5, total: 7 },
            ShardProgress { done: 3, total: 4 },
        ];
        let p = JobProgress::aggregate(&shards, 2.0);
        assert_eq!(p.done_all, 8);
        assert_eq!(p.total_all, 11);
        assert_eq!(p.percent(), 73);
        assert!((p.items_per_sec() - 4.0).abs() < 1e-9);
        assert!((p.eta_secs() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_speed_means_zero_eta() {
        let p = JobProgress::aggregate(&[ShardProgress { done: 0, total: 10 }], 3.0);
        assert_eq!(p.items_per_sec(), 0.0);
        assert_eq!(p.eta_secs(), 0.0);
        let p = JobProgress::aggregate(&[ShardProgress { done: 1, total: 10 }], 0.0);
        assert_eq!(p.eta_secs(), 0.0);
    }

    #[test]
    fn empty_job_is_complete() {
        let p = JobProgress::aggregate(std::iter::empty(), 0.0);
        assert_eq!(p.percent(), 100);
        assert_eq!(p.eta_secs(), 0.0);
    }
}
