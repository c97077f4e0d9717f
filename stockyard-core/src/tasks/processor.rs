use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::{ExecutionOutcome, TaskExecutor};
use crate::config::ProcessorConfig;

/// Auto-mode loop. Each iteration checks the mode flag, asks the executor
/// for one task and picks the next delay from the outcome.
///
/// Stopping the loop never aborts a task that is mid-execution; the loop
/// only exits between attempts.
pub struct TaskProcessor {
    executor: Arc<TaskExecutor>,
    config: ProcessorConfig,
    auto_mode: watch::Receiver<bool>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("config", &self.config)
            .field("auto_mode", &*self.auto_mode.borrow())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskProcessor {
    pub fn new(
        executor: Arc<TaskExecutor>,
        config: ProcessorConfig,
        auto_mode: watch::Receiver<bool>,
    ) -> Self {
        Self {
            executor,
            config,
            auto_mode,
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the loop. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let mut auto_mode = self.auto_mode.clone();
        let wake = Arc::clone(&self.wake);
        let shutdown = self.shutdown.clone();

        *handle = Some(tokio::spawn(async move {
            tracing::info!("task processor started");
            let mut delay = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("task processor shutting down");
                        break;
                    }
                    changed = auto_mode.changed() => {
                        if changed.is_err() {
                            tracing::debug!("auto-mode source dropped, stopping processor");
                            break;
                        }
                    }
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }

                delay = if *auto_mode.borrow_and_update() {
                    next_delay(&config, executor.run_next().await)
                } else {
                    config.poll_interval()
                };
            }
        }));
    }

    /// Cancel the loop and wait for it to exit. A task already running is
    /// allowed to finish first.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "task processor join failed");
        }
    }

    /// Skip the current delay, e.g. after a submission.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }
}

fn next_delay(
    config: &ProcessorConfig,
    outcome: crate::error::Result<ExecutionOutcome>,
) -> Duration {
    match outcome {
        Ok(ExecutionOutcome::Idle) => config.idle_interval(),
        Ok(ExecutionOutcome::Busy) | Ok(ExecutionOutcome::ClaimConflict(_)) => {
            config.poll_interval()
        }
        Ok(_) => config.rearm_delay(),
        Err(err) => {
            tracing::error!(error = %err, "task processor iteration failed");
            config.error_backoff()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_model::TaskId;

    #[test]
    fn delay_follows_outcome() {
        let config = ProcessorConfig::default();
        assert_eq!(
            next_delay(&config, Ok(ExecutionOutcome::Idle)),
            Duration::from_secs(3)
        );
        assert_eq!(
            next_delay(&config, Ok(ExecutionOutcome::Busy)),
            Duration::from_secs(2)
        );
        assert_eq!(
            next_delay(&config, Ok(ExecutionOutcome::Completed(TaskId::new()))),
            Duration::from_millis(200)
        );
        assert_eq!(
            next_delay(
                &config,
                Err(crate::error::EngineError::Store("down".into()))
            ),
            Duration::from_secs(5)
        );
    }
}
