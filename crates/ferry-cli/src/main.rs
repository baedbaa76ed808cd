//! `ferry` binary.
//!
//! ```text
//! ferry serve   # HTTP API only
//! ferry work    # workers + reaper only
//! ferry run     # both in one process (required for memory://)
//! ```
//!
//! Settings come from `FERRY_*` environment variables.

mod http;
mod tasks;

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ferry_core::{
    FerryConfig, InMemoryStore, JobStore, Producer, ReaperLoop, RedisStore, WorkerGroup,
    observability,
};

const USAGE: &str = "usage: ferry <serve|work|run>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Work,
    Run,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serve" => Ok(Self::Serve),
            "work" => Ok(Self::Work),
            "run" => Ok(Self::Run),
            other => Err(format!("unknown command {other:?}")),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    observability::init();

    let command = match std::env::args().nth(1).as_deref().map(Command::from_str) {
        Some(Ok(command)) => command,
        Some(Err(err)) => {
            eprintln!("{err}\n{USAGE}");
            return ExitCode::from(2);
        }
        None => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(()) => {
            tracing::info!("ferry stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = ?err, "ferry failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    let config = FerryConfig::from_env().context("invalid configuration")?;
    if config.uses_memory_store() && command != Command::Run {
        bail!("memory:// is private to one process; use `ferry run`");
    }

    let store = open_store(&config)
        .await
        .with_context(|| format!("connecting to job store at {}", config.store_address))?;

    match command {
        Command::Serve => serve(&config, store).await,
        Command::Work => {
            let workers = start_workers(&config, Arc::clone(&store))?;
            shutdown_signal().await;
            workers.stop().await;
            Ok(())
        }
        Command::Run => {
            let workers = start_workers(&config, Arc::clone(&store))?;
            let served = serve(&config, store).await;
            workers.stop().await;
            served
        }
    }
}

async fn open_store(config: &FerryConfig) -> ferry_core::Result<Arc<dyn JobStore>> {
    if config.uses_memory_store() {
        tracing::warn!("using the in-memory store; jobs are lost on exit");
        return Ok(Arc::new(InMemoryStore::new(config.lease_timeout)));
    }
    let store =
        RedisStore::connect(&config.store_address, &config.namespace, config.lease_timeout).await?;
    Ok(Arc::new(store))
}

/// HTTP API until ctrl-c.
async fn serve(config: &FerryConfig, store: Arc<dyn JobStore>) -> anyhow::Result<()> {
    let state = http::AppState {
        producer: Producer::new(Arc::clone(&store), config.max_attempts),
        store,
    };

    let listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    Ok(())
}

struct RunningWorkers {
    group: WorkerGroup,
    reaper: JoinHandle<()>,
}

impl RunningWorkers {
    async fn stop(self) {
        tracing::info!(workers = self.group.len(), "stopping workers");
        self.group.shutdown_and_join().await;
        if let Err(err) = self.reaper.await {
            tracing::error!(error = %err, "reaper task panicked");
        }
    }
}

fn start_workers(config: &FerryConfig, store: Arc<dyn JobStore>) -> anyhow::Result<RunningWorkers> {
    let app = tasks::builder(config.worker_settings())?.build()?;
    let group = app.spawn(config.workers, Arc::clone(&store));

    let reaper = ReaperLoop::new(store, config.reaper_interval);
    let shutdown = group.subscribe();
    let reaper = tokio::spawn(async move { reaper.run(shutdown).await });

    Ok(RunningWorkers { group, reaper })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
