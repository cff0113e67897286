//! subtrans - Subtitle Auto-Translation Service
//!
//! Server entry point: wires the database, scheduler, watcher supervisor,
//! and HTTP/WebSocket surface together, then serves until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use subtrans::api::{self, AppState};
use subtrans::cli::Args;
use subtrans::config::{ServerConfig, SettingsStore};
use subtrans::db;
use subtrans::events::ProgressBus;
use subtrans::media::{FfmpegToolbox, MediaToolbox};
use subtrans::pipeline::PipelineContext;
use subtrans::scheduler::{PipelineRunner, TaskScheduler};
use subtrans::skip::SkipOracle;
use subtrans::watcher::WatcherSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting subtrans v{}", env!("CARGO_PKG_VERSION"));

    let mut server_config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        server_config.bind = bind;
    }
    if let Some(data_dir) = args.data_dir {
        server_config.data_dir = data_dir;
    }

    std::fs::create_dir_all(server_config.scratch_root())
        .with_context(|| format!("creating {}", server_config.scratch_root().display()))?;

    // The pipeline is useless without its external tools; fail fast.
    let toolbox = FfmpegToolbox::default();
    toolbox
        .check_available()
        .await
        .context("ffmpeg, ffprobe, and mkvmerge must be on PATH")?;
    let toolbox: Arc<dyn MediaToolbox> = Arc::new(toolbox);

    let pool = db::init_pool(&server_config.db_path()).await?;
    info!(db = %server_config.db_path().display(), "Database ready");

    let settings = Arc::new(SettingsStore::load(pool.clone()).await?);
    let bus = ProgressBus::default();

    let pipeline_ctx = PipelineContext {
        db: pool.clone(),
        bus: bus.clone(),
        settings: settings.clone(),
        toolbox: toolbox.clone(),
        scratch_root: server_config.scratch_root(),
    };
    let scheduler = TaskScheduler::new(
        pool.clone(),
        bus.clone(),
        settings.clone(),
        Arc::new(PipelineRunner { ctx: pipeline_ctx }),
        server_config.scratch_root(),
    );
    scheduler.start().await?;

    let oracle = Arc::new(SkipOracle::new(pool.clone(), toolbox.clone()));
    let supervisor = WatcherSupervisor::new(
        pool.clone(),
        scheduler.clone(),
        oracle.clone(),
        settings.clone(),
    );
    supervisor.start().await?;

    let state = AppState {
        db: pool,
        settings,
        scheduler: scheduler.clone(),
        supervisor,
        oracle,
        toolbox,
        bus,
    };
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&server_config.bind)
        .await
        .with_context(|| format!("binding {}", server_config.bind))?;
    info!("Listening on http://{}", server_config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: running tasks checkpoint and pause before we exit.
    scheduler.shutdown().await;
    info!("subtrans stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("Shutdown signal received");
}
