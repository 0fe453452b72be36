//! Key layout for job state in the coordination store.

pub fn spec(job_id: &str) -> String {
    format!("job/{}/spec", job_id)
}

pub fn abort(job_id: &str) -> String {
    format!("job/{}/abort", job_id)
}

pub fn progress(job_id: &str, shard: usize) -> String {
    shard_key(job_id, shard, "progress")
}

pub fn errors(job_id: &str, shard: usize) -> String {
    shard_key(job_id, shard, "errors")
}

pub fn result(job_id: &str, shard: usize) -> String {
    shard_key(job_id, shard, "result")
}

pub fn done(job_id: &str, shard: usize) -> String {
    shard_key(job_id, shard, "done")
}

pub fn merged(job_id: &str, shard: usize) -> String {
    shard_key(job_id, shard, "merged")
}

/// Every key a job with `shard_count` shards may have written.
pub fn all_for_job(job_id: &str, shard_count: usize) -> Vec<String> {
    let mut out = vec![spec(job_id), abort(job_id)];
    for k in 0..shard_count {
        out.extend([
            progress(job_id, k),
            errors(job_id, k),
            result(job_id, k),
            done(job_id, k),
            merged(job_id, k),
        ]);
    }
    out
}

fn shard_key(job_id: &str, shard: usize, leaf: &str) -> String {
    format!("job/{}/shard/{}/{}", job_id, shard, leaf)
}
