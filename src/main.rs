// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gd_audio_cache::config::{Config, DEFAULT_CONFIG_FILE};
use gd_audio_cache::refresh::{run_in_task, RefreshTrigger, Refresher};
use gd_audio_cache::scheduler::{self, RefreshSchedule};
use gd_audio_cache::server::Server;

#[derive(Parser)]
#[command(name = "gd-audio-cache")]
#[command(version, about = "Caching proxy for level songs and sound effects", long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Do not refresh the cache when the server starts
    #[arg(long)]
    no_startup_refresh: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the cache and refresh it on schedule (default)
    Serve,
    /// Run a single refresh in the foreground and exit
    Refresh,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(&cli.config)?;
    let refresher = Arc::new(Refresher::from_config(&config));
    refresher
        .store()
        .ensure_dirs()
        .await
        .context("Failed to create cache directories")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, refresher, !cli.no_startup_refresh).await,
        Commands::Refresh => refresh_once(refresher).await,
    }
}

async fn serve(config: Config, refresher: Arc<Refresher>, startup_refresh: bool) -> Result<()> {
    let schedule = RefreshSchedule::parse(&config.refresh_interval)?;
    scheduler::spawn(Arc::clone(&refresher), schedule);

    if startup_refresh {
        let refresher = Arc::clone(&refresher);
        tokio::spawn(async move {
            run_in_task(refresher, RefreshTrigger::Startup).await;
        });
    }

    Server::from_config(&config, refresher).start().await
}

async fn refresh_once(refresher: Arc<Refresher>) -> Result<()> {
    let outcome = run_in_task(refresher, RefreshTrigger::Manual)
        .await
        .context("Refresh task did not complete")?;
    if let Some(report) = outcome.report() {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}
