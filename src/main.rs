//! quakesph - Philippine earthquake dashboard for your terminal.
//!
//! Polls the USGS and EMSC event services, merges and deduplicates their
//! reports, and keeps a map, table, legend and distance-to-you line in sync
//! with the result.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

mod bands;
mod cli;
mod client;
mod config;
mod dedup;
mod errors;
mod feeds;
mod filters;
mod lifecycle;
mod map;
mod models;
mod output;
mod place;
mod present;
mod proximity;
mod reconcile;
mod session;

use cli::{Cli, Command};
use client::FeedClient;
use config::{DashboardConfig, INITIAL_ZOOM};
use map::TraceMap;
use output::Format;
use session::Session;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command {
        Command::Watch(args) => {
            let config = args.to_config();
            run_to_completion(runtime, cmd_watch(config, args.dashboard.format))
        }
        Command::Once(args) => {
            let config = args.to_config();
            run_to_completion(runtime, cmd_once(config, args.format))
        }
    }
}

/// Drive `future` to completion, then drop the runtime without waiting on
/// blocking-pool work. A pending stdin read never finishes on its own.
fn run_to_completion<F: Future>(runtime: tokio::runtime::Runtime, future: F) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    output
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn new_session(config: DashboardConfig) -> Result<(Session<TraceMap>, session::Inbox)> {
    let client = Arc::new(FeedClient::new().context("failed to create feed client")?);
    let adapters = feeds::default_adapters(&client);
    let map = TraceMap::new(&config.bbox, INITIAL_ZOOM);
    Ok(Session::new(config, client, adapters, map))
}

/// Execute the `watch` command - live dashboard.
async fn cmd_watch(config: DashboardConfig, format: Format) -> Result<()> {
    info!(
        "watching {} (reload every {}s); type 'quit' to stop",
        config.bbox,
        config.refresh_interval.as_secs()
    );

    let (session, inbox) = new_session(config)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    session
        .run(inbox, format, &mut handle)
        .await
        .context("dashboard stopped")?;
    Ok(())
}

/// Execute the `once` command - single load.
async fn cmd_once(config: DashboardConfig, format: Format) -> Result<()> {
    let (mut session, mut inbox) = new_session(config)?;
    session
        .load_once(&mut inbox)
        .await
        .context("failed to load earthquakes")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    session.write_output(&mut handle, format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_exit_does_not_wait_for_blocking_reads() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let started = Instant::now();
        let answer = run_to_completion(runtime, async {
            // stands in for a stdin read nobody answers
            drop(tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_secs(30));
            }));
            tokio::task::yield_now().await;
            42
        });

        assert_eq!(answer, 42);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
