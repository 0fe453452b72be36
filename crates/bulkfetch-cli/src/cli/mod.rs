//! CLI for bulkfetch sharded fetch jobs.

mod commands;

use anyhow::Result;
use bulkfetch_core::config;
use bulkfetch_core::fetch::{CurlFetcher, JsonExtractor, TextExtractor};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use commands::{run_abort, run_job, run_status, run_worker};

#[derive(Debug, Parser)]
#[command(name = "bulkfetch")]
#[command(about = "bulkfetch: sharded bulk fetching with ordered merge and retry rounds", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch every resource listed in a file (one per line) and print merged results.
    Run(RunArgs),

    /// Run one shard worker of a job stored in a SQLite store (used by --processes).
    Worker {
        /// SQLite coordination store.
        #[arg(long, value_name = "DB")]
        store: PathBuf,
        /// Job identifier.
        #[arg(long)]
        job: String,
        /// Shard index (0-based).
        #[arg(long)]
        shard: usize,
        /// How response bodies become records.
        #[arg(long, value_enum, default_value_t = ExtractKind::Json)]
        extract: ExtractKind,
    },

    /// Ask every worker of a job to stop before its next dispatch.
    Abort {
        /// SQLite coordination store (default: state dir).
        #[arg(long, value_name = "DB")]
        store: Option<PathBuf>,
        /// Job identifier.
        job: String,
    },

    /// Show per-shard progress of a job, or list jobs in the store.
    Status {
        /// SQLite coordination store (default: state dir).
        #[arg(long, value_name = "DB")]
        store: Option<PathBuf>,
        /// Job identifier; omit to list jobs.
        job: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// File with one resource (URL) per line; blank lines and `#` comments are skipped.
    pub input: PathBuf,
    /// Number of shard workers (overrides config).
    #[arg(long, value_name = "N")]
    pub shards: Option<usize>,
    /// Concurrent fetches per shard (overrides config).
    #[arg(long, value_name = "N")]
    pub pool: Option<usize>,
    /// Dispatch stagger in milliseconds (overrides config).
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,
    /// Deadline for one fetch in seconds (overrides config).
    #[arg(long, value_name = "SECS")]
    pub fetch_timeout: Option<u64>,
    /// Abort the job if it has not finished after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    /// Run up to N retry jobs over failed items.
    #[arg(long, default_value = "0", value_name = "N")]
    pub retry_rounds: u32,
    /// Field the extracted record must carry (repeatable; added to config).
    #[arg(long = "require", value_name = "FIELD")]
    pub required_fields: Vec<String>,
    /// Write merged results as JSON lines to this file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    /// Run shard workers as child processes over a SQLite store.
    #[arg(long)]
    pub processes: bool,
    /// SQLite coordination store (default: state dir). Implies the sqlite backend.
    #[arg(long, value_name = "DB")]
    pub store: Option<PathBuf>,
    /// How response bodies become records.
    #[arg(long, value_enum, default_value_t = ExtractKind::Json)]
    pub extract: ExtractKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractKind {
    /// Top-level JSON object becomes the record.
    Json,
    /// Raw body under "body".
    Text,
}

impl ExtractKind {
    pub fn fetcher(self, user_agent: Option<String>) -> CurlFetcher {
        let fetcher = match self {
            ExtractKind::Json => CurlFetcher::new(JsonExtractor),
            ExtractKind::Text => CurlFetcher::new(TextExtractor),
        };
        fetcher.with_user_agent(user_agent)
    }

    pub fn as_arg(self) -> &'static str {
        match self {
            ExtractKind::Json => "json",
            ExtractKind::Text => "text",
        }
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run(args) => run_job(&cfg, args).await?,
            CliCommand::Worker {
                store,
                job,
                shard,
                extract,
            } => run_worker(&cfg, &store, &job, shard, extract).await?,
            CliCommand::Abort { store, job } => run_abort(store.as_deref(), &job).await?,
            CliCommand::Status { store, job } => run_status(store.as_deref(), job.as_deref()).await?,
        }

        Ok(())
    }
}
