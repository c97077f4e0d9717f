use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use stockyard_model::{TaskId, TaskProgress, TaskRecord, TaskStatus};
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};

/// Abstracts task persistence and ordering for the executor.
///
/// `try_claim` is the only path from `PENDING` to `PROCESSING` and must be a
/// conditional update: when two claimants race on one task, exactly one gets
/// the record back.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: TaskRecord) -> Result<()>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    /// Tasks in drain order: active first, by priority then creation time.
    async fn list(&self) -> Result<Vec<TaskRecord>>;

    /// Highest-priority `PENDING` task, earliest created among equals.
    async fn next_pending(&self) -> Result<Option<TaskRecord>>;

    async fn count_processing(&self) -> Result<usize>;

    /// Conditional `PENDING -> PROCESSING`. `Ok(None)` when the condition
    /// failed, which callers treat as benign.
    async fn try_claim(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    async fn update_progress(&self, id: TaskId, progress: TaskProgress) -> Result<()>;

    /// Record a terminal status and return the updated task.
    async fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<TaskRecord>;

    async fn remove(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    /// Select and claim in one step. Default implementation composes
    /// `next_pending` and `try_claim`.
    async fn claim_next(&self) -> Result<Option<TaskRecord>> {
        match self.next_pending().await? {
            Some(task) => self.try_claim(task.id).await,
            None => Ok(None),
        }
    }

    /// Cancel a task that has not started. Returns `Ok(None)` when the task
    /// is no longer pending.
    async fn cancel(&self, id: TaskId, reason: &str) -> Result<Option<TaskRecord>> {
        match self.get(id).await? {
            Some(task) if task.status == TaskStatus::Pending => self
                .finish(id, TaskStatus::Cancelled, Some(reason.to_string()))
                .await
                .map(Some),
            Some(_) => Ok(None),
            None => Err(EngineError::NotFound(format!("task {id}"))),
        }
    }
}

fn drain_order(a: &TaskRecord, b: &TaskRecord) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// In-memory task store. A single mutex makes every operation atomic.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl fmt::Debug for MemoryTaskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.tasks.try_lock().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("MemoryTaskStore").field("len", &len).finish()
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: TaskRecord) -> Result<()> {
        self.tasks.lock().await.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut all: Vec<_> = self.tasks.lock().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.status
                .is_terminal()
                .cmp(&b.status.is_terminal())
                .then_with(|| drain_order(a, b))
        });
        Ok(all)
    }

    async fn next_pending(&self) -> Result<Option<TaskRecord>> {
        Ok(self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by(|a, b| drain_order(a, b))
            .cloned())
    }

    async fn count_processing(&self) -> Result<usize> {
        Ok(self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Processing)
            .count())
    }

    async fn try_claim(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let mut tasks = self.tasks.lock().await;
        if tasks.values().any(|t| t.status == TaskStatus::Processing) {
            return Ok(None);
        }
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                let now = Utc::now();
                task.status = TaskStatus::Processing;
                task.started_at = Some(now);
                task.updated_at = now;
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_progress(&self, id: TaskId, progress: TaskProgress) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("task {id}")))?;
        task.progress = Some(progress);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<TaskRecord> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("task {id}")))?;
        let now = Utc::now();
        task.status = status;
        task.error_message = error_message;
        task.updated_at = now;
        if status.is_terminal() {
            task.completed_at = Some(now);
        }
        Ok(task.clone())
    }

    async fn remove(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.tasks.lock().await.remove(&id))
    }
}
