mod api;
mod cli;
mod worker;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use streamq_core::domain::TaskId;
use streamq_core::impls::RedisStreamQueue;
use streamq_core::observability;
use streamq_core::ports::{DeadLetterLog, Queue};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    observability::init(cli.log_format);

    let store = RedisStreamQueue::connect(&cli.redis_url, cli.queue.to_config())
        .await
        .with_context(|| format!("connecting to {}", cli.redis_url))?;
    let store = Arc::new(store);

    match cli.command {
        Command::Api { port, host } => {
            let state = api::AppState::new(store);
            api::serve(state, &host, port, shutdown_signal()).await
        }
        Command::Worker(args) => worker::run(store, &args, shutdown_signal()).await,
        Command::Task { id } => {
            let task = store
                .get(&TaskId::new(id.clone()))
                .await?
                .with_context(|| format!("task {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::DeadLetters { limit } => {
            for dead in store.dead_letters(limit).await? {
                println!("{}", serde_json::to_string(&dead)?);
            }
            Ok(())
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
