//! NERVE - live GPU spot, weather and carbon feed
//!
//! ## Usage
//!
//! ```bash
//! # Run the feed: scheduler + HTTP routes + WebSocket at /ws/feed
//! nerve serve --listen 0.0.0.0:8000
//!
//! # One scrape cycle, snapshot printed as JSON
//! nerve scrape-once
//!
//! # Show configured regions
//! nerve regions --config ./nerve.json
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use nerve_feed::server::{self, AppState};
use nerve_feed::{
    CycleOrchestrator, CycleRunner, EventBroadcaster, FeedConfig, FeedQuery, Scheduler,
    SnapshotCache,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// NERVE: live signal feed for GPU placement
#[derive(Parser)]
#[command(name = "nerve")]
#[command(about = "Live GPU spot price, weather and carbon feed", long_about = None)]
struct Cli {
    /// JSON config file (absent keys keep built-in defaults)
    #[arg(long, global = true, env = "NERVE_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between scrape cycles
    #[arg(long, global = true, env = "NERVE_SCRAPE_INTERVAL")]
    interval: Option<u64>,

    /// Address the HTTP/WebSocket server binds to
    #[arg(long, global = true, env = "NERVE_LISTEN")]
    listen: Option<String>,

    /// Broadcast queue capacity
    #[arg(long, global = true, env = "NERVE_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    /// Also write daily rolling log files here
    #[arg(long, global = true, env = "NERVE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and serve the feed (default)
    Serve,

    /// Run a single scrape cycle and print the snapshot
    ScrapeOnce {
        /// Print the cycle report instead of the snapshot
        #[arg(long)]
        report: bool,
    },

    /// List configured regions
    Regions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::ScrapeOnce { report } => scrape_once(config, report).await,
        Commands::Regions => {
            list_regions(&config);
            Ok(())
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "nerve.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nerve=info,nerve_feed=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Defaults, then the config file, then CLI/env flags
fn load_config(cli: &Cli) -> anyhow::Result<FeedConfig> {
    let mut config = match &cli.config {
        Some(path) => FeedConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FeedConfig::default(),
    };

    if let Some(secs) = cli.interval {
        config = config.with_scrape_interval(secs);
    }
    if let Some(listen) = &cli.listen {
        config = config.with_listen(listen.clone());
    }
    if let Some(capacity) = cli.queue_capacity {
        config = config.with_broadcast_capacity(capacity);
    }

    config.validate()?;
    Ok(config)
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("nerve-feed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

fn new_cache(config: &FeedConfig) -> Arc<SnapshotCache> {
    Arc::new(SnapshotCache::new(
        config.error_ring_capacity,
        config.status_error_count,
        config.history_capacity,
    ))
}

async fn serve(config: FeedConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    let cache = new_cache(&config);
    let (broadcaster, dispatcher) =
        EventBroadcaster::channel(config.broadcast_capacity, config.send_timeout());
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let orchestrator: Arc<dyn CycleRunner> = Arc::new(CycleOrchestrator::from_config(
        &config,
        http_client()?,
        cache.clone(),
        broadcaster.clone(),
    ));

    info!(
        regions = config.regions.len(),
        interval_secs = config.scrape_interval_secs,
        "Running initial scrape cycle"
    );
    let scheduler = Scheduler::start(orchestrator, config.scrape_interval()).await;
    let scheduler_running = Arc::new(AtomicBool::new(true));

    let query = FeedQuery::new(cache, config.regions.clone(), broadcaster);
    let state = AppState::new(query, scheduler_running.clone());

    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    scheduler.stop().await;
    scheduler_running.store(false, Ordering::Relaxed);
    dispatcher_task.abort();
    info!("NERVE feed stopped");
    Ok(())
}

async fn scrape_once(config: FeedConfig, report_only: bool) -> anyhow::Result<()> {
    let cache = new_cache(&config);
    let (broadcaster, _dispatcher) =
        EventBroadcaster::channel(config.broadcast_capacity, config.send_timeout());
    let orchestrator =
        CycleOrchestrator::from_config(&config, http_client()?, cache.clone(), broadcaster);

    let report = orchestrator.run_cycle().await?;
    let output = if report_only {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string_pretty(&cache.snapshot().await)?
    };
    println!("{}", output);
    Ok(())
}

fn list_regions(config: &FeedConfig) {
    println!(
        "{:<16} {:<18} {:<24} {:>9} {:>9}  {:<4}  AZs",
        "ID", "NAME", "LOCATION", "LAT", "LNG", "LIVE"
    );
    for region in &config.regions {
        let azs: Vec<&str> = region.azs.iter().map(|az| az.id.as_str()).collect();
        println!(
            "{:<16} {:<18} {:<24} {:>9.4} {:>9.4}  {:<4}  {}",
            region.id,
            region.name,
            region.location,
            region.lat,
            region.lng,
            if region.live_carbon { "yes" } else { "no" },
            azs.join(", ")
        );
    }
}
