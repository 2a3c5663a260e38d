//! Operator controls. Every crawl flag can also come from a `CMP_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    CrawlConfig, DedupPolicy, FetchConfig, RetryPolicy, SourceMode, SpecialtySelection,
    StoreConfig, DEFAULT_BASE_URL, DEFAULT_USER_AGENT,
};
use crate::Result;

#[derive(Debug, Parser)]
#[command(name = "cmp_scrap")]
#[command(about = "Crawl doctor records from the CMP directory")]
#[command(version)]
pub struct Cli {
    /// Verbosity level (-v for debug output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl specialties and doctors into the store
    Crawl(CrawlArgs),
    /// List the specialties with their indices and exit
    Specialties(SourceArgs),
    /// Remove deceased doctors from an existing store
    Prune(StoreArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Read saved HTML pages instead of making HTTP requests
    #[arg(long, env = "CMP_LOCAL")]
    pub local: bool,

    /// Directory searched for saved pages by file name
    #[arg(long, env = "CMP_LOCAL_ROOT", default_value = ".")]
    pub local_root: PathBuf,

    /// Base URL of the directory
    #[arg(long, env = "CMP_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Landing page locator (URL or file), overriding the default for the mode
    #[arg(long, env = "CMP_LANDING")]
    pub landing: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, env = "CMP_CONNECT_TIMEOUT", default_value_t = 10.0)]
    pub connect_timeout: f64,

    /// Read timeout in seconds
    #[arg(long, env = "CMP_READ_TIMEOUT", default_value_t = 30.0)]
    pub read_timeout: f64,

    /// Attempts per request on timeouts and connection failures
    #[arg(long, env = "CMP_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Base wait between attempts in seconds, multiplied by the attempt number
    #[arg(long, env = "CMP_RETRY_DELAY", default_value_t = 2.0)]
    pub retry_delay: f64,
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Output CSV file
    #[arg(long, env = "CMP_OUTPUT_CSV", default_value = "doctors_data.csv")]
    pub output_csv: PathBuf,

    /// Output JSON file (used with --save-json)
    #[arg(long, env = "CMP_OUTPUT_JSON", default_value = "doctors_data.json")]
    pub output_json: PathBuf,

    /// Also keep the JSON store
    #[arg(long, env = "CMP_SAVE_JSON")]
    pub save_json: bool,
}

impl StoreArgs {
    pub fn store_config(&self, flush_threshold: usize) -> StoreConfig {
        StoreConfig {
            csv_path: self.output_csv.clone(),
            json_path: self.save_json.then(|| self.output_json.clone()),
            flush_threshold,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CrawlArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Start from this specialty index (for resuming)
    #[arg(long, env = "CMP_START", default_value_t = 0)]
    pub start: usize,

    /// Maximum number of specialties to process
    #[arg(long, env = "CMP_MAX")]
    pub max: Option<usize>,

    /// Process only this specialty index (0-based)
    #[arg(long, env = "CMP_SPECIALTY_INDEX")]
    pub specialty_index: Option<usize>,

    /// Delay between requests in seconds
    #[arg(long, env = "CMP_DELAY", default_value_t = 1.0)]
    pub delay: f64,

    /// Number of parallel workers for doctor pages
    #[arg(long, env = "CMP_WORKERS", default_value_t = 3)]
    pub workers: usize,

    /// Save every N new records
    #[arg(long, env = "CMP_SAVE_INTERVAL", default_value_t = 30)]
    pub save_interval: usize,

    /// Fetch every doctor even if already handled in this run
    #[arg(long, env = "CMP_NO_CHECK_DUPLICATES")]
    pub no_check_duplicates: bool,

    /// Skip doctors already present in the loaded store
    #[arg(long, env = "CMP_SEED_FROM_EXISTING")]
    pub seed_from_existing: bool,
}

impl SourceArgs {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: secs(self.connect_timeout),
            read_timeout: secs(self.read_timeout),
            accept_invalid_certs: true,
            retry: RetryPolicy {
                max_attempts: self.retries.max(1),
                base_delay: secs(self.retry_delay),
            },
        }
    }

    pub fn mode(&self) -> SourceMode {
        if self.local {
            SourceMode::Local {
                root: self.local_root.clone(),
            }
        } else {
            SourceMode::Remote
        }
    }

    /// Config for commands that only read the landing page.
    pub fn crawl_config(&self) -> Result<CrawlConfig> {
        let mut config = CrawlConfig::new(&self.base_url)?;
        config.mode = self.mode();
        config.landing = self.landing.clone();
        config.fetch = self.fetch_config();
        Ok(config)
    }
}

impl CrawlArgs {
    pub fn crawl_config(&self) -> Result<CrawlConfig> {
        let mut config = self.source.crawl_config()?;
        config.selection = SpecialtySelection {
            index: self.specialty_index,
            start: self.start,
            max: self.max,
        };
        config.delay = secs(self.delay);
        config.workers = self.workers.max(1);
        config.dedup = DedupPolicy {
            enabled: !self.no_check_duplicates,
            seed_from_existing: self.seed_from_existing,
        };
        config.store = self.store.store_config(self.save_interval.max(1));
        Ok(config)
    }
}

/// Seconds from the command line; negative or NaN input counts as zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
