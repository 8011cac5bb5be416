//! museum-reset - clear ingested kiosk data
//!
//! Deletes every row from `rating`, `call_assistance` and
//! `call_emergency` in one transaction, and optionally empties the
//! rejection log.

use anyhow::Context;
use clap::Parser;
use museum_ingest::infra::logging::init_tracing;
use museum_ingest::infra::Config;
use museum_ingest::io::reporter::truncate_log;
use museum_ingest::io::PostgresGateway;
use std::path::PathBuf;
use tracing::info;

/// Clear ingested kiosk data
#[derive(Parser, Debug)]
#[command(name = "museum-reset", version, about)]
struct ResetArgs {
    /// Rejection log to truncate
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ResetArgs::parse();

    let mut config = Config::load_from_path(&args.config);
    init_tracing(config.log_format());
    config.apply_env();

    info!(git_hash = %env!("GIT_HASH"), db_host = %config.database().host, "museum-reset starting");

    if let Some(path) = &args.log {
        truncate_log(path).with_context(|| format!("cannot truncate {}", path.display()))?;
        info!(path = %path.display(), "rejection_log_truncated");
    }

    let mut gateway = PostgresGateway::connect(config.database())
        .await
        .context("database setup failed")?;
    gateway.reset_tables().await.context("reset failed")?;

    println!("--- DELETED ---");
    Ok(())
}
