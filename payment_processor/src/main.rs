mod config;
mod consumer;
mod intake;
mod retry;
mod state;
#[cfg(test)]
mod testing;

use common::RequestQueue;
use dotenv::dotenv;
use pretty_env_logger::env_logger::{Builder, Env};
use tokio::sync::watch;

use crate::config::AppConfig;

fn startup_error(stage: &str, e: anyhow::Error) -> std::io::Error {
    log::error!("{} failed: {:#}", stage, e);
    std::io::Error::other(e.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    if cli::run_cli().await {
        return Ok(());
    }

    let logger_env = Env::default().default_filter_or("info");
    let mut logger_builder = Builder::from_env(logger_env);
    logger_builder.init();

    log::info!("Transaction processor starting");

    let config = AppConfig::from_env().map_err(|e| startup_error("Configuration loading", e))?;

    let state = config
        .create_app_state()
        .await
        .map_err(|e| startup_error("Application initialization", e))?;

    let queue = RequestQueue::connect(&config.rabbitmq_url, &config.queue_name)
        .await
        .map_err(|e| startup_error("Queue connection", e))?;

    log::info!("Successfully connected to RabbitMQ and database");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = tokio::spawn(state.scheduler(&config).run(shutdown_rx.clone()));

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => log::info!("Shutdown requested, finishing in-flight work"),
                Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
            }
            let _ = shutdown_tx.send(true);
        });
    }

    let pipeline = state.pipeline();
    let consumed = consumer::consume(&queue, &pipeline, shutdown_rx).await;
    if let Err(e) = &consumed {
        log::error!("Queue consumer stopped: {:#}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        log::error!("Retry scheduler task stopped unexpectedly: {:?}", e);
    }

    queue.close().await;
    state.db.close().await;
    log::info!("Transaction processor stopped");

    consumed.map_err(|e| std::io::Error::other(e.to_string()))
}
