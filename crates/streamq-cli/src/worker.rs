//! Worker process: demo handlers plus the scheduler/consumer wiring.

use std::sync::Arc;

use async_trait::async_trait;
use streamq_core::app::{HandlerRegistry, TaskHandler, WorkerGroup, WorkerOptions};
use streamq_core::domain::{HandlerError, Task};
use streamq_core::impls::RedisStreamQueue;
use streamq_core::ports::{Bootstrap, SystemClock};

use crate::cli::WorkerArgs;

pub const DEMO_FAIL: &str = "demo.fail";

/// Fails while the task has fewer than two recorded attempts, then succeeds.
pub struct DemoFailHandler;

#[async_trait]
impl TaskHandler for DemoFailHandler {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        if task.attempts < 2 {
            return Err(HandlerError::new(format!(
                "simulated failure (attempts={})",
                task.attempts
            )));
        }
        tracing::info!(task_id = %task.id, attempts = task.attempts, "demo task recovered");
        Ok(())
    }
}

/// Accepts any task and logs it.
pub struct LoggingHandler;

#[async_trait]
impl TaskHandler for LoggingHandler {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            payload = ?task.payload,
            "processing task"
        );
        Ok(())
    }
}

pub fn demo_registry() -> anyhow::Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(DEMO_FAIL, Arc::new(DemoFailHandler))?;
    registry.set_fallback(Arc::new(LoggingHandler));
    Ok(registry)
}

/// Run until `shutdown` resolves, then let in-flight handlers finish.
pub async fn run(
    store: Arc<RedisStreamQueue>,
    args: &WorkerArgs,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    store.ensure_group().await?;

    let options = WorkerOptions {
        consumer: args.consumer_config(),
        scheduler: args.scheduler_config(),
        concurrency: args.concurrency,
        clock: Arc::new(SystemClock),
    };
    let group = WorkerGroup::spawn(store, Arc::new(demo_registry()?), options);
    tracing::info!(consumer = %args.consumer, concurrency = args.concurrency, "worker running");

    shutdown.await;
    tracing::info!("shutdown requested, waiting for in-flight tasks");
    group.shutdown_and_join().await;
    Ok(())
}
