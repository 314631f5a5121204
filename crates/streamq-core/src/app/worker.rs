use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::consumer::Consumer;
use super::handler::TaskHandler;
use super::scheduler::Scheduler;
use super::shutdown::{Shutdown, ShutdownTrigger};
use crate::config::{ConsumerConfig, SchedulerConfig};
use crate::domain::StreamqError;
use crate::ports::{Clock, DelayIndex, Queue, SystemClock};

/// Worker group handle: one scheduler plus N consumer identities.
/// - `shutdown()` か handle の drop でループ全体が止まる
/// - 実行中の handler は中断しない（次の claim をしなくなるだけ）
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct WorkerGroup {
    trigger: ShutdownTrigger,
    joins: Vec<JoinHandle<Result<(), StreamqError>>>,
}

/// Consumer identities: `base`, `base-2`, `base-3`, ...
pub fn consumer_names(base: &str, n: usize) -> Vec<String> {
    (0..n.max(1))
        .map(|i| match i {
            0 => base.to_string(),
            i => format!("{base}-{}", i + 1),
        })
        .collect()
}

#[derive(Clone)]
pub struct WorkerOptions {
    pub consumer: ConsumerConfig,
    pub scheduler: SchedulerConfig,
    pub concurrency: usize,
    pub clock: Arc<dyn Clock>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            consumer: ConsumerConfig::default(),
            scheduler: SchedulerConfig::default(),
            concurrency: 1,
            clock: Arc::new(SystemClock),
        }
    }
}

impl WorkerGroup {
    /// Spawn the scheduler and `options.concurrency` consumers.
    pub fn spawn<S>(store: Arc<S>, handler: Arc<dyn TaskHandler>, options: WorkerOptions) -> Self
    where
        S: Queue + DelayIndex + 'static,
    {
        let (trigger, shutdown) = ShutdownTrigger::new();
        let mut joins = Vec::with_capacity(options.concurrency.max(1) + 1);

        let scheduler = Scheduler::new(Arc::clone(&store), options.scheduler.clone())
            .with_clock(Arc::clone(&options.clock));
        joins.push(spawn_loop("scheduler".to_string(), shutdown.clone(), move |s| async move {
            scheduler.run(s).await
        }));

        for name in consumer_names(&options.consumer.consumer_name, options.concurrency) {
            let config = ConsumerConfig {
                consumer_name: name.clone(),
                ..options.consumer.clone()
            };
            let queue: Arc<dyn Queue> = store.clone();
            let consumer = Consumer::new(queue, Arc::clone(&handler), config)
                .with_clock(Arc::clone(&options.clock));
            joins.push(spawn_loop(name, shutdown.clone(), move |s| async move {
                consumer.run(s).await
            }));
        }

        Self { trigger, joins }
    }

    /// Request shutdown for all loops.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// Shutdown and wait for every loop to return.
    pub async fn shutdown_and_join(self) {
        self.shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker loop panicked");
            }
        }
        info!("worker group stopped");
    }
}

fn spawn_loop<F, Fut>(name: String, shutdown: Shutdown, run: F) -> JoinHandle<Result<(), StreamqError>>
where
    F: FnOnce(Shutdown) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), StreamqError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = run(shutdown).await;
        match &result {
            Err(StreamqError::Cancelled) => info!(worker = %name, "loop stopped"),
            Err(e) => error!(worker = %name, error = %e, "loop failed"),
            Ok(()) => {}
        }
        result
    })
}
