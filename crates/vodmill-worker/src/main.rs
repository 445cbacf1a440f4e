//! Encoding worker binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vodmill_models::{ChunkPolicy, Codec, ProfileCatalog};
use vodmill_queue::{JobScheduler, SchedulerConfig};
use vodmill_remote::{
    AgentInfo, AgentRegistry, GatewayConfig, HttpAgentClient, RemoteGateway,
};
use vodmill_state::{init_pool, StateTracker};
use vodmill_worker::{
    Assembler, FfmpegEngine, OutputLayout, RemoteEngine, TaskExecutor, WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vodmill=info".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

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

    info!("Starting vodmill-worker");

    if let Err(e) = vodmill_media::check_ffmpeg() {
        error!("ffmpeg is not available: {}", e);
        std::process::exit(1);
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let db_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "/var/lib/vodmill/state.db".to_string());
    let pool = match init_pool(&db_path) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to open state database: {}", e);
            std::process::exit(1);
        }
    };
    let tracker = Arc::new(StateTracker::new(pool));
    let scheduler = Arc::new(JobScheduler::new(tracker.clone(), SchedulerConfig::from_env()));

    // Requeue whatever a previous process left behind
    match scheduler.recover() {
        Ok(report) => info!(
            requeued = report.requeued_pending,
            recovered = report.recovered_running,
            exhausted = report.failed_permanently,
            "Recovery complete"
        ),
        Err(e) => {
            error!("Startup recovery failed: {}", e);
            std::process::exit(1);
        }
    }

    let catalog = ProfileCatalog::standard();
    let layout = OutputLayout::new(config.output_dir.clone());
    let assembler = Arc::new(Assembler::new(tracker.clone(), catalog.clone(), layout));

    let local = Arc::new(FfmpegEngine::new(config.engine_timeout));
    let remote = build_remote_engine().await;

    let executor = Arc::new(TaskExecutor::new(
        config,
        scheduler.clone(),
        local,
        remote,
        assembler,
        catalog,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    executor.run(shutdown_rx).await;

    info!("Worker shutdown complete");
}

/// Build the remote gateway from `REMOTE_AGENTS`, a comma-separated list of
/// `name=base_url` pairs. Absent or empty means local-only operation.
async fn build_remote_engine() -> Option<Arc<RemoteEngine>> {
    let spec = std::env::var("REMOTE_AGENTS").ok()?;
    if spec.trim().is_empty() {
        return None;
    }

    let client = match HttpAgentClient::new(Duration::from_secs(30)) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            warn!("Remote agent client unavailable, running local-only: {}", e);
            return None;
        }
    };

    let capacity = std::env::var("REMOTE_AGENT_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2);

    let registry = AgentRegistry::new();
    let mut registered = 0usize;
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((name, base_url)) = entry.split_once('=') else {
            warn!(entry, "Ignoring malformed REMOTE_AGENTS entry");
            continue;
        };
        registry
            .register(AgentInfo::new(
                name.trim(),
                base_url.trim(),
                vec![Codec::H264, Codec::Hevc],
                capacity,
            ))
            .await;
        registered += 1;
    }
    if registered == 0 {
        return None;
    }
    info!(agents = registered, "Remote capacity enabled");

    let gateway = Arc::new(RemoteGateway::new(
        registry,
        client,
        GatewayConfig::default(),
    ));
    Some(Arc::new(RemoteEngine::new(gateway)))
}
