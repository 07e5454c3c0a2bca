//! mediadrop - fetch media with yt-dlp through a web form
//!
//! Entry point: parses arguments, sets up logging and configuration, and
//! dispatches to the server, a one-off fetch, or the tool check.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediadrop::cli::{Args, Commands};
use mediadrop::config::Config;
use mediadrop::relay::Relay;
use mediadrop::request::{AudioFormat, DownloadRequest, Mode, Quality};
use mediadrop::server;

const DEFAULT_CONFIG_FILE: &str = "mediadrop.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = setup_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env()?;

    match args.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let ip: IpAddr = config.server.bind
                .parse()
                .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
            let addr = SocketAddr::new(ip, config.server.port);

            let relay = Arc::new(Relay::new(config));
            if let Err(e) = relay.downloader().check_availability().await {
                warn!("Downloader check failed, requests will fail until fixed: {}", e);
            }

            server::run_server(addr, relay).await?;
        }
        Commands::Fetch { url, mode, quality, audio_format, output_dir } => {
            let request = DownloadRequest::new(url)
                .with_mode(Mode::from_hint(&mode))
                .with_quality(Quality::from_hint(&quality))
                .with_audio_format(AudioFormat::from_hint(&audio_format));

            tokio::fs::create_dir_all(&output_dir)
                .await
                .with_context(|| format!("Cannot create {}", output_dir.display()))?;

            let relay = Relay::new(config);

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")?);
            spinner.set_message(format!("Fetching {}", request.url));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let result = relay.fetch(&request).await;
            spinner.finish_and_clear();

            let target = result?.persist_to(&output_dir).await?;
            println!("{}", target.display());
        }
        Commands::Check => {
            let relay = Relay::new(config);
            let (downloader, encoder) = relay.downloader().get_version_info().await?;
            println!("Downloader: {}", downloader);
            println!("Encoder:    {}", encoder);
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".mediadrop").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "mediadrop.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("mediadrop.log").display());

    Ok(guard)
}
