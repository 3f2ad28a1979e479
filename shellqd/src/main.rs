//! `shellqd`: the job engine daemon.
//!
//! Runs the worker over a jobs directory and serves the control API. On
//! SIGINT/SIGTERM the active job (if any) is killed and filed as failed,
//! then the process exits.

mod routes;
mod shutdown;
mod state;

use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use shellq::engine::Engine;
use shellq::io::config::{JOBS_DIR_ENV, load_config, resolve_config_path, resolve_jobs_dir};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "shellqd")]
#[command(about = "Runs queued shell jobs one at a time")]
struct Args {
    /// Jobs directory (defaults to `~/.shellq/jobs`)
    #[arg(long, env = JOBS_DIR_ENV)]
    jobs_dir: Option<PathBuf>,

    /// Config file (defaults to `<jobs-dir>/shellq.toml`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control API address, overriding the config
    #[arg(long)]
    bind: Option<String>,

    /// Interpreter for job scripts, overriding the config
    #[arg(long)]
    shell: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    shellq::logging::init("info");
    let args = Args::parse();

    let jobs_dir = resolve_jobs_dir(args.jobs_dir)?;
    let config_path = resolve_config_path(&jobs_dir, args.config);
    let mut config = load_config(&config_path)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(shell) = args.shell {
        config.shell = shell;
    }
    config.validate()?;
    let addr = config.bind_addr()?;

    let engine = Engine::new(&jobs_dir, config);
    engine
        .init()
        .with_context(|| format!("prepare jobs directory {}", jobs_dir.display()))?;
    info!(jobs_dir = %jobs_dir.display(), config = %config_path.display(), "starting shellqd");

    let shutdown = shutdown::install_shutdown_handler()?;

    let app = Router::new()
        .merge(routes::api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(engine.cancel.clone(), engine.active.clone()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "listening");

    let server_token = shutdown.clone();
    tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await });
        if let Err(err) = server.await {
            error!(err = %err, "control API stopped");
        }
    });

    let worker = engine.worker();
    let worker_token = shutdown.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_token).await });

    shutdown.cancelled().await;
    match engine.interrupt() {
        Some(report) => match report.moved {
            Ok(_) => info!(job = %report.job, "interrupted job filed as failed"),
            Err(err) => error!(job = %report.job, err = %err, "interrupted job left under running"),
        },
        None => info!("idle at shutdown"),
    }
    worker_task.abort();
    if let Err(err) = worker_task.await {
        if err.is_panic() {
            error!(err = %err, "worker panicked");
        }
    }
    info!("shellqd exiting");
    Ok(())
}
