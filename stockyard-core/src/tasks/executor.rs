use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stockyard_model::{TaskId, TaskRecord, TaskStatus};

use super::handlers::{HandlerContext, HandlerRegistry};
use crate::device::Baseline;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

const FINISH_ATTEMPTS: u32 = 3;
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Result of one executor attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Nothing pending.
    Idle,
    /// A task is already executing here or is PROCESSING in the store.
    Busy,
    /// The selected task was claimed by someone else first.
    ClaimConflict(TaskId),
    Completed(TaskId),
    Failed { id: TaskId, error: String },
    /// Retired kind removed from the queue.
    Cancelled(TaskId),
}

impl ExecutionOutcome {
    /// Whether a task reached a terminal state in this attempt.
    pub fn ran_task(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Completed(_)
                | ExecutionOutcome::Failed { .. }
                | ExecutionOutcome::Cancelled(_)
        )
    }
}

struct ExecutingGuard<'a>(&'a AtomicBool);

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Claims at most one task at a time, runs its handler, enforces the
/// completion barrier and finalizes status.
pub struct TaskExecutor {
    ctx: HandlerContext,
    registry: Arc<HandlerRegistry>,
    executing: AtomicBool,
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("registry", &self.registry)
            .field("executing", &self.executing.load(Ordering::SeqCst))
            .finish()
    }
}

impl TaskExecutor {
    pub fn new(ctx: HandlerContext, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            ctx,
            registry,
            executing: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// Select, claim and run the next pending task.
    ///
    /// Store errors before the claim bubble up so the caller can back off.
    /// After the claim the task always ends COMPLETED or FAILED unless the
    /// store refuses every attempt to record it. Task failures are persisted
    /// and reported as [`ExecutionOutcome::Failed`].
    pub async fn run_next(&self) -> Result<ExecutionOutcome> {
        if self
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(ExecutionOutcome::Busy);
        }
        let _guard = ExecutingGuard(&self.executing);

        let tasks = &self.ctx.tasks;
        if tasks.count_processing().await? > 0 {
            return Ok(ExecutionOutcome::Busy);
        }
        let Some(next) = tasks.next_pending().await? else {
            return Ok(ExecutionOutcome::Idle);
        };

        if self.ctx.config.tasks.is_retired(next.kind()) {
            return self.retire(next).await;
        }

        // Captured before the claim so any report during execution counts.
        let baseline = self.ctx.device.baseline();

        let Some(task) = tasks.try_claim(next.id).await? else {
            tracing::debug!(task_id = %next.id, "task already claimed, skipping");
            return Ok(ExecutionOutcome::ClaimConflict(next.id));
        };
        tracing::info!(
            task_id = %task.id,
            kind = %task.kind(),
            priority = %task.priority,
            "task claimed"
        );
        self.announce(&task).await;

        let message = match self.execute(&task, &baseline).await {
            Ok(()) => match self.finish(task.id, TaskStatus::Completed, None).await {
                Ok(done) => {
                    self.announce(&done).await;
                    if let Err(err) = tasks.remove(task.id).await {
                        tracing::warn!(task_id = %task.id, error = %err, "failed to remove completed task");
                    }
                    tracing::info!(task_id = %task.id, kind = %task.kind(), "task completed");
                    return Ok(ExecutionOutcome::Completed(task.id));
                }
                Err(err) => {
                    tracing::error!(
                        task_id = %task.id,
                        kind = %task.kind(),
                        error = %err,
                        "task ran but its completion could not be recorded"
                    );
                    format!("completion could not be recorded: {err}")
                }
            },
            Err(err) => {
                let message = err.to_string();
                tracing::error!(
                    task_id = %task.id,
                    kind = %task.kind(),
                    device_failure = err.is_device_failure(),
                    error = %message,
                    "task failed"
                );
                message
            }
        };

        // A claimed task must leave PROCESSING or the queue stalls behind it.
        let failed = self
            .finish(task.id, TaskStatus::Failed, Some(message.clone()))
            .await?;
        self.announce(&failed).await;
        Ok(ExecutionOutcome::Failed {
            id: task.id,
            error: message,
        })
    }

    /// Record a terminal status, retrying store errors a few times.
    async fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord> {
        let mut attempt = 1;
        loop {
            match self.ctx.tasks.finish(id, status, message.clone()).await {
                Ok(record) => return Ok(record),
                Err(err) if attempt < FINISH_ATTEMPTS => {
                    tracing::warn!(
                        task_id = %id,
                        status = %status,
                        attempt,
                        error = %err,
                        "failed to record task status, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(FINISH_RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Task updates are informational; a failed publish never changes the
    /// outcome.
    async fn announce(&self, task: &TaskRecord) {
        if let Err(err) = self.ctx.events.publish(EngineEvent::task(task)).await {
            tracing::warn!(task_id = %task.id, error = %err, "failed to publish task update");
        }
    }

    async fn execute(&self, task: &TaskRecord, baseline: &Baseline) -> Result<()> {
        let kind = task.kind();
        let handler = self
            .registry
            .get(kind)
            .ok_or(EngineError::NoHandler(kind))?;

        handler.run(task, &self.ctx).await?;

        self.ctx
            .device
            .wait_for_ready(self.ctx.config.device.barrier_timeout())
            .await?;

        if self.ctx.config.tasks.is_device_driven(kind) {
            let now = self.ctx.device.telemetry().snapshot();
            let fresh_update = now.sequence > baseline.sequence
                || now.received_at.is_some_and(|at| {
                    at >= baseline.at || baseline.snapshot_at.is_some_and(|before| at > before)
                });
            let op_changed = !now.operation.is_empty() && now.operation != baseline.tag;
            if !fresh_update && !op_changed {
                return Err(EngineError::NoFreshTelemetry { kind });
            }
        }
        Ok(())
    }

    async fn retire(&self, task: TaskRecord) -> Result<ExecutionOutcome> {
        let kind = task.kind();
        let tasks = &self.ctx.tasks;
        let Some(cancelled) = tasks
            .cancel(task.id, &EngineError::TaskKindRetired(kind).to_string())
            .await?
        else {
            return Ok(ExecutionOutcome::ClaimConflict(task.id));
        };
        self.announce(&cancelled).await;
        tasks.remove(task.id).await?;
        tracing::info!(task_id = %task.id, kind = %kind, "retired task kind removed from queue");
        Ok(ExecutionOutcome::Cancelled(task.id))
    }
}
