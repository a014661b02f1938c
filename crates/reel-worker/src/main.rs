//! Highlight reel worker binary.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::{FfmpegEncoder, FfmpegRunner, StitchOptions};
use reel_queue::WorkQueue;
use reel_store::StateStore;
use reel_worker::config::PathsConfig;
use reel_worker::{
    backfill, state_file_from_env, Analyzer, Executor, ExecutorOptions, GeminiAnalyzer, Pipeline,
    PipelineOptions, Publisher, WorkerConfig, YouTubePublisher,
};

#[derive(Parser)]
#[command(author, version, about = "Turns raw videos dropped in a folder into highlight reels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process unfinished files, then watch the folder for new ones
    Start,
    /// Mark every untracked video in the folder as already uploaded
    Backfill,
    /// List every tracked file and its status
    Status,
    /// Forget a file so the next run processes it from scratch
    Retry {
        /// File name inside the watched folder
        file: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("Failed to install rustls crypto provider");
        std::process::exit(1);
    }

    if let Err(e) = run(cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "reel=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Start => start().await,
        Commands::Backfill => {
            let paths = PathsConfig::from_env()?;
            let store = StateStore::new(&paths.state_file);
            let marked = backfill(&store, &paths.watch_dir)
                .await
                .context("backfill failed")?;
            println!("Marked {} file(s) as uploaded", marked);
            Ok(())
        }
        Commands::Status => {
            let store = StateStore::new(state_file_from_env());
            let records = store.all().await.context("failed to read state")?;
            if records.is_empty() {
                println!("No tracked files");
                return Ok(());
            }
            println!("{:<40} {:<20} {:<25} ERROR", "FILE", "STATUS", "UPDATED");
            for (name, record) in &records {
                println!(
                    "{:<40} {:<20} {:<25} {}",
                    name,
                    record.status.to_string(),
                    record.last_updated.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    record.error_message.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Commands::Retry { file } => {
            let store = StateStore::new(state_file_from_env());
            if store.remove(&file).await.context("failed to update state")? {
                println!("{} will be reprocessed on the next run", file);
            } else {
                println!("{} is not tracked", file);
            }
            Ok(())
        }
    }
}

async fn start() -> anyhow::Result<()> {
    info!("Starting reel-worker");

    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    tokio::fs::create_dir_all(&config.paths.output_dir)
        .await
        .with_context(|| format!("cannot create {}", config.paths.output_dir.display()))?;

    let runner = match &config.ffmpeg_path {
        Some(path) => FfmpegRunner::new(path),
        None => FfmpegRunner::from_path().context("FFmpeg is required")?,
    };
    info!(ffmpeg = %runner.binary().display(), "Using FFmpeg");

    let analyzer: Arc<dyn Analyzer> = Arc::new(GeminiAnalyzer::new(&config.gemini)?);
    let publisher: Option<Arc<dyn Publisher>> = match &config.youtube {
        Some(youtube) => Some(Arc::new(YouTubePublisher::new(youtube)?)),
        None => {
            info!("YOUTUBE_ACCESS_TOKEN not set, montages will not be uploaded");
            None
        }
    };

    let store = Arc::new(StateStore::new(&config.paths.state_file));
    let pipeline = Pipeline::new(
        store,
        analyzer,
        Arc::new(FfmpegEncoder::new(runner)),
        publisher,
        PipelineOptions {
            watch_dir: config.paths.watch_dir.clone(),
            output_dir: config.paths.output_dir.clone(),
            stage_timeout: config.stage_timeout,
            stitch: StitchOptions::default(),
        },
    );

    let executor = Executor::new(
        Arc::new(pipeline),
        WorkQueue::new(config.max_concurrent)?,
        ExecutorOptions {
            watch_dir: config.paths.watch_dir.clone(),
            stability: config.stability.clone(),
            shutdown_timeout: config.shutdown_timeout,
        },
    );

    executor
        .run(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await?;

    info!("Worker shutdown complete");
    Ok(())
}
