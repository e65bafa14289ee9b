// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tally Wallet Daemon
//!
//! Entry point for the `tally` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the wallet session, and serves the HTTP/WS
//! API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the daemon
//! - `init`   : create the data directory and an owner identity
//! - `status` : query a running daemon's status endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use rand::RngCore;
use tokio::signal;

use tally_wallet::{DevMint, SledStore, WalletSession};

use cli::{Commands, TallyCli};
use logging::LogFormat;
use metrics::WalletMetrics;

/// File under the data directory holding the owner identity.
const OWNER_FILE: &str = "owner";

/// Capacity of the API's payment notice queue.
const NOTICE_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TallyCli::parse();

    match cli.command {
        Commands::Run(args) => run_daemon(args).await,
        Commands::Init(args) => init_data_dir(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the wallet and serves the API and metrics until a shutdown
/// signal arrives.
async fn run_daemon(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "tally=info,tally_wallet=info,tower_http=info",
        args.log_format(),
    );

    let owner = resolve_owner(&args)?;
    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        owner = %owner,
        "starting tally"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("wallets");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = Arc::new(
        SledStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Mint ---
    let mut dev = DevMint::new().with_melt_fee(args.dev_melt_fee);
    if let Some(secs) = args.dev_auto_settle {
        dev = dev.with_auto_settle(Duration::from_secs(secs));
    }

    // --- Wallet session ---
    let session = WalletSession::open(owner, args.wallet_config(), Arc::new(dev), store.clone())
        .await
        .context("failed to load wallet")?;
    let wallet = session.wallet().clone();

    let (notices, notice_rx) = tally_wallet::receipts::channel(NOTICE_QUEUE_CAPACITY);
    wallet.listen_for_payments(notice_rx);

    // --- Metrics ---
    let wallet_metrics =
        Arc::new(WalletMetrics::new().context("failed to create metrics registry")?);
    let tracker = metrics::track(wallet.clone(), Arc::clone(&wallet_metrics));

    // --- API server ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        wallet,
        notices,
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!(addr = %api_addr, "API server listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&wallet_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!(addr = %metrics_addr, "metrics server listening");

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracker.abort();
    session.logout().await;
    store.flush().context("failed to flush database")?;
    tracing::info!("tally stopped");
    Ok(())
}

/// The owner identity: `--owner`, else the one written by `tally init`.
fn resolve_owner(args: &cli::RunArgs) -> Result<String> {
    if let Some(owner) = args.owner.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        return Ok(owner.to_string());
    }
    read_owner(&args.data_dir)?.ok_or_else(|| {
        anyhow!(
            "no owner identity in {}; run `tally init` first or pass --owner",
            args.data_dir.display()
        )
    })
}

fn read_owner(data_dir: &Path) -> Result<Option<String>> {
    let path = data_dir.join(OWNER_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let owner = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let owner = owner.trim();
    if owner.is_empty() {
        bail!("owner file {} is empty", path.display());
    }
    Ok(Some(owner.to_string()))
}

/// Creates the data directory and writes a random owner identity.
fn init_data_dir(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("tally=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    if !args.force {
        if let Some(existing) = read_owner(data_dir)? {
            bail!(
                "{} already has owner {existing}; pass --force to replace it",
                data_dir.display()
            );
        }
    }

    let mut id = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id);
    let owner = hex::encode(id);

    let path = data_dir.join(OWNER_FILE);
    std::fs::write(&path, &owner)
        .with_context(|| format!("failed to write owner identity to {}", path.display()))?;
    tracing::info!(owner = %owner, path = %path.display(), "owner identity created");

    println!("Data directory initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Owner          : {owner}");
    Ok(())
}

/// Queries a running daemon's status endpoint and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{body}");
    Ok(())
}

/// Plain HTTP/1.1 GET over a tokio TCP stream. Only `http://` URLs.
async fn http_get(url: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| anyhow!("only http:// URLs are supported: {url}"))?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let addr = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };

    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());
    Ok(body)
}

fn print_version() {
    println!("tally {}", env!("CARGO_PKG_VERSION"));
    println!("book  v{}", tally_wallet::config::BOOK_VERSION);
}

/// Waits for SIGINT or SIGTERM. Only Ctrl+C on non-Unix platforms.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_owner(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join(OWNER_FILE), "abc123\n").unwrap();
        assert_eq!(read_owner(dir.path()).unwrap().as_deref(), Some("abc123"));

        std::fs::write(dir.path().join(OWNER_FILE), "  ").unwrap();
        assert!(read_owner(dir.path()).is_err());
    }
}
