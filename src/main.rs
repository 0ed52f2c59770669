use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden::api;
use warden::config::WardenConfig;
use warden::control::ControlLoop;
use warden::process::{Monitor, Supervisor};
use warden::state::{FileStore, MemoryStore, Store};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about = "Process supervisor with rule-based scaling", long_about = None)]
struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address for the HTTP API
    #[arg(short, long)]
    bind: Option<String>,

    /// JSON state file; records live in memory only when unset
    #[arg(short, long)]
    state: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let store: Arc<dyn Store> = match &config.state_path {
        Some(path) => {
            info!("Using state file {}", path.display());
            Arc::new(FileStore::open(path)?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let supervisor = Supervisor::new(store, &config);

    let recovered = supervisor.recover().await?;
    if recovered > 0 {
        info!("Restored {} processes from previous state", recovered);
    }

    let control = ControlLoop::new(supervisor.clone(), Monitor::with_sysinfo());
    let ticker = supervisor
        .scheduler()
        .spawn_ticker(config.monitoring_interval(), control);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Warden listening on {}", listener.local_addr()?);

    axum::serve(listener, api::router(supervisor.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully...");

    // Let an in-flight tick finish before stopping processes
    supervisor.scheduler().shutdown();
    if let Err(e) = ticker.await {
        warn!("Control loop ended abnormally: {}", e);
    }
    supervisor.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<WardenConfig> {
    let mut config = match &args.config {
        Some(path) => WardenConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => WardenConfig::default(),
    };

    config.apply_env()?;

    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(state) = &args.state {
        config.state_path = Some(state.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
