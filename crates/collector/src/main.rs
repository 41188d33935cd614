use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vodsync_collector::Collector;
use vodsync_collector::config::CollectorConfig;

/// Collect remote VOD catalogs into a local snapshot database
#[derive(Parser, Debug)]
#[command(name = "vodsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk every source's full listing
    Full,

    /// Collect items updated within the last N hours
    Incremental {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Refresh detail fields of records already collected
    DetailsOnly,

    /// Put the previous snapshot back into serving
    Restore,

    /// Suggest local categories for a source's remote categories
    Suggest {
        /// Id prefix of the source, e.g. `wj_`
        #[arg(long, value_name = "PREFIX")]
        source: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CollectorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(data_dir = %config.data_dir.display(), catalog = %config.catalog, "configuration loaded");

    let collector = Collector::new(config).context("failed to build collector")?;

    match cli.command {
        Command::Full => print(&collector.run_full_collection().await.context("full collection failed")?),
        Command::Incremental { hours } => print(
            &collector
                .run_incremental_collection(hours)
                .await
                .context("incremental collection failed")?,
        ),
        Command::DetailsOnly => print(
            &collector
                .run_details_only_collection()
                .await
                .context("details collection failed")?,
        ),
        Command::Restore => print(&collector.restore().await.context("restore failed")?),
        Command::Suggest { source } => print(
            &collector
                .suggest_categories(&source)
                .await
                .with_context(|| format!("failed to suggest categories for {source}"))?,
        ),
    }
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode result")?;
    println!("{json}");
    Ok(())
}
