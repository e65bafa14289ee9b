//! # CLI Interface
//!
//! Defines the command-line argument structure for `tally` using `clap`
//! derive. Supports four subcommands: `run`, `init`, `status`, and
//! `version`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use tally_wallet::WalletConfig;

use crate::logging::LogFormat;

/// Tally wallet daemon.
///
/// Runs one ecash wallet against a development mint and serves it over a
/// REST/WebSocket API with Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "tally",
    about = "Multi-mint ecash wallet daemon",
    version,
    propagate_version = true
)]
pub struct TallyCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the wallet daemon.
    Run(RunArgs),
    /// Create the data directory and a fresh owner identity.
    Init(InitArgs),
    /// Query the status of a running daemon.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory holding the owner identity and the wallet database.
    #[arg(long, short = 'd', env = "TALLY_DATA_DIR", default_value = ".tally")]
    pub data_dir: PathBuf,

    /// Owner identity. Read from `<data_dir>/owner` when omitted.
    #[arg(long, env = "TALLY_OWNER")]
    pub owner: Option<String>,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "TALLY_API_PORT", default_value_t = 3338)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TALLY_METRICS_PORT", default_value_t = 3339)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "TALLY_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Mints registered when the wallet is created.
    #[arg(long = "mint", env = "TALLY_MINTS", value_delimiter = ',')]
    pub mints: Vec<String>,

    /// Seconds between settlement polls.
    #[arg(long, env = "TALLY_POLL_INTERVAL", default_value_t = 5)]
    pub poll_interval: u64,

    /// Polls per invoice before it is dropped.
    #[arg(long, env = "TALLY_MAX_POLL_ATTEMPTS", default_value_t = 60)]
    pub max_poll_attempts: u32,

    /// Lightning fee reserve in basis points.
    #[arg(long, env = "TALLY_FEE_RESERVE_BPS", default_value_t = 100)]
    pub fee_reserve_bps: u64,

    /// Timeout for a single mint call, in seconds.
    #[arg(long, env = "TALLY_MINT_TIMEOUT", default_value_t = 30)]
    pub mint_timeout: u64,

    /// Development mint: quotes settle on their own after this many seconds.
    #[arg(long, env = "TALLY_DEV_AUTO_SETTLE")]
    pub dev_auto_settle: Option<u64>,

    /// Development mint: flat fee charged on every melt.
    #[arg(long, env = "TALLY_DEV_MELT_FEE", default_value_t = 0)]
    pub dev_melt_fee: u64,
}

impl RunArgs {
    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }

    /// Maps the arguments onto a [`WalletConfig`].
    pub fn wallet_config(&self) -> WalletConfig {
        WalletConfig {
            poll_interval: Duration::from_secs(self.poll_interval.max(1)),
            max_poll_attempts: self.max_poll_attempts.max(1),
            fee_reserve_bps: self.fee_reserve_bps,
            mint_timeout: Duration::from_secs(self.mint_timeout.max(1)),
            default_mints: self.mints.clone(),
            ..WalletConfig::default()
        }
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "TALLY_DATA_DIR", default_value = ".tally")]
    pub data_dir: PathBuf,

    /// Replace an existing owner identity.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running daemon.
    #[arg(long, env = "TALLY_API_URL", default_value = "http://127.0.0.1:3338")]
    pub api_url: String,
}
