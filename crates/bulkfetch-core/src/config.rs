use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per item (including the first). 1 disables in-place retry.
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 10,
        }
    }
}

/// Coordination store backend: in-process memory (workers are tasks) or a
/// SQLite file (workers may be separate processes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Global configuration loaded from `~/.config/bulkfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Number of shard workers per job.
    pub shard_count: usize,
    /// Concurrent fetches inside one shard worker.
    pub pool_size: usize,
    /// Stagger between dispatches, multiplied by (position mod pool_size).
    pub inter_dispatch_delay_ms: u64,
    /// Deadline for one fetch operation.
    pub fetch_timeout_secs: u64,
    /// How often the coordinator re-reads shard state.
    pub poll_interval_ms: u64,
    /// Record fields an extracted record must carry to count as a success.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Store backend: "memory" (default) or "sqlite".
    #[serde(default)]
    pub store_backend: Option<StoreBackend>,
    /// Optional User-Agent header for the curl fetcher.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            pool_size: 6,
            inter_dispatch_delay_ms: 150,
            fetch_timeout_secs: 20,
            poll_interval_ms: 400,
            required_fields: Vec::new(),
            retry: None,
            store_backend: None,
            user_agent: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bulkfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BulkConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BulkConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BulkConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = BulkConfig::default();
        assert_eq!(cfg.shard_count, 4);
        assert_eq!(cfg.pool_size, 6);
        assert_eq!(cfg.poll_interval_ms, 400);
        assert!(cfg.required_fields.is_empty());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = BulkConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: BulkConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.shard_count, cfg.shard_count);
        assert_eq!(parsed.pool_size, cfg.pool_size);
        assert_eq!(parsed.inter_dispatch_delay_ms, cfg.inter_dispatch_delay_ms);
        assert_eq!(parsed.fetch_timeout_secs, cfg.fetch_timeout_secs);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            shard_count = 8
            pool_size = 3
            inter_dispatch_delay_ms = 0
            fetch_timeout_secs = 5
            poll_interval_ms = 100
            required_fields = ["title", "price"]
        "#;
        let cfg: BulkConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.shard_count, 8);
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.required_fields, vec!["title", "price"]);
        assert!(cfg.retry.is_none());
        assert!(cfg.store_backend.is_none());
    }

    #[test]
    fn config_toml_store_backend_and_retry() {
        let toml = r#"
            shard_count = 2
            pool_size = 4
            inter_dispatch_delay_ms = 50
            fetch_timeout_secs = 10
            poll_interval_ms = 400
            store_backend = "sqlite"

            [retry]
            max_attempts = 1
            base_delay_secs = 0.5
            max_delay_secs = 15
        "#;
        let cfg: BulkConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.store_backend, Some(StoreBackend::Sqlite));
        let retry = cfg.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 1);
        assert!((retry.base_delay_secs - 0.5).abs() < 1e-9);
        assert_eq!(retry.max_delay_secs, 15);
    }
}
