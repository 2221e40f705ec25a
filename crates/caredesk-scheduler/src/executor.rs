//! Task executor — the background loop that fires due tasks.
//!
//! One executor per process polls the store for due tasks, dispatches each
//! to its registered handler strictly sequentially, applies the outcome to
//! the task state machine, and persists the result. Shutdown is a watch
//! channel checked between tasks and during sleeps; an in-flight handler is
//! allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use caredesk_core::config::SchedulerConfig;
use caredesk_core::time::now_ms;
use caredesk_core::Result;

use crate::registry::HandlerRegistry;
use crate::store::TaskStore;
use crate::task::{TaskPhase, TaskStatus};

/// Loop timing knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Max due tasks fetched per tick.
    pub batch_limit: usize,
    /// Throttle between tasks within one tick.
    pub task_delay: Duration,
    /// Sleep after a tick that executed nothing.
    pub idle_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_limit: 10,
            task_delay: Duration::from_millis(250),
            idle_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&SchedulerConfig> for ExecutorConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            batch_limit: config.batch_limit,
            task_delay: Duration::from_millis(config.task_delay_ms),
            idle_delay: Duration::from_millis(config.idle_delay_ms),
        }
    }
}

/// The polling executor. Build it, then [`TaskExecutor::spawn`] it.
pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    config: ExecutorConfig,
}

/// Handle to a spawned executor.
pub struct ExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Request shutdown and wait for the loop to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self { store, registry, config }
    }

    /// Start the background loop.
    pub fn spawn(self) -> ExecutorHandle {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx));
        ExecutorHandle { shutdown, join }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Task executor started (batch {}, throttle {:?}, idle {:?})",
            self.config.batch_limit,
            self.config.task_delay,
            self.config.idle_delay
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let executed = match self.run_tick(&mut shutdown).await {
                Ok(executed) => executed,
                Err(e) => {
                    // A broken tick never kills the loop; bookkeeping resets
                    // and the next poll starts clean.
                    tracing::error!("Error occurred while executing task batch: {e}");
                    0
                }
            };

            if executed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Task executor stopped");
    }

    /// One poll tick: fetch a due batch and dispatch it sequentially.
    /// Returns the number of tasks processed.
    async fn run_tick(&self, shutdown: &mut watch::Receiver<bool>) -> Result<usize> {
        let batch = self.store.find_due_batch(
            TaskStatus::Active,
            TaskPhase::Recurring,
            now_ms(),
            self.config.batch_limit,
        )?;

        let mut executed = 0;
        for mut task in batch {
            match self.registry.resolve(&task.handler) {
                None => {
                    tracing::error!(
                        "Invalid or missing handler [{}], task [{}] will be suspended",
                        task.handler,
                        task.id
                    );
                    task.move_to_next_state(TaskStatus::Suspended, None, now_ms());
                    self.store.save(&task)?;
                }
                Some(handler) => match handler.execute(&task).await {
                    Ok(outcome) => {
                        tracing::debug!(
                            "🔔 Task [{}] executed, outcome [{}]",
                            task.id,
                            outcome.as_str()
                        );
                        task.move_to_next_state(TaskStatus::Active, Some(outcome), now_ms());
                        self.store.save(&task)?;
                    }
                    Err(e) => {
                        // Infrastructure failure, not a business outcome: the
                        // task keeps its due time and retries next poll.
                        tracing::error!(
                            "Handler [{}] failed for task [{}], cycle skipped: {e}",
                            task.handler,
                            task.id
                        );
                    }
                },
            }

            executed += 1;

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.task_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        Ok(executed)
    }
}
