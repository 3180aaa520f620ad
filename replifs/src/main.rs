mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, ServeArgs, WorkerArgs};
use replifs::cadapter::consensus::BlockStateMachine;
use replifs::cadapter::etcd;
use replifs::config::{BackendConfig, Config, default_storage_dir, load_config, parse_hosts};
use replifs::daemon::{server, worker};
use replifs::vfs::FileSystem;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Worker(args) => run_worker(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let cfg = resolve_config(args)?;
    let backend = cfg
        .backend
        .build()
        .await
        .context("failed to initialize block backend")?;
    let fs = Arc::new(FileSystem::new(backend, &cfg.owner, &cfg.group));

    let listener = TcpListener::bind(&cfg.addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.addr))?;
    tokio::select! {
        res = server::serve(listener, fs) => res.context("namespace server failed")?,
        _ = shutdown_signal() => {}
    }
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    let dir = args.storage_dir.unwrap_or_else(default_storage_dir);
    let machine = Arc::new(
        BlockStateMachine::open(&dir)
            .await
            .with_context(|| format!("failed to open storage directory {}", dir.display()))?,
    );
    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    tokio::select! {
        res = worker::run_worker(listener, machine) => res.context("block worker failed")?,
        _ = shutdown_signal() => {}
    }
    Ok(())
}

/// Config file values, then flags and environment on top.
fn resolve_config(args: ServeArgs) -> anyhow::Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(addr) = args.addr {
        cfg.addr = addr;
    }
    if let Some(owner) = args.owner {
        cfg.owner = owner;
    }
    if let Some(group) = args.group {
        cfg.group = group;
    }
    if let Some(hosts) = args.hosts {
        cfg.backend = BackendConfig::DualReplica {
            hosts: parse_hosts(&hosts),
        };
    }
    if let Some(endpoints) = args.etcd_endpoints {
        cfg.backend = BackendConfig::Consensus {
            endpoints: parse_hosts(&endpoints),
            prefix: etcd::DEFAULT_PREFIX.to_string(),
        };
    }
    Ok(cfg)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
