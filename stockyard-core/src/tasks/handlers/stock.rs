use async_trait::async_trait;
use stockyard_model::{TaskKind, TaskPayload, TaskProgress, TaskRecord};

use super::{HandlerContext, TaskHandler, wrong_payload};
use crate::error::Result;

const RUN_DONE: &str = "STOCK_QTY_DONE";

/// Hands a quantity to the controller's conveyor state machine and waits for
/// the run to end. Each placement the controller reports along the way is
/// recorded during ingestion, which also advances this task's progress.
#[derive(Debug, Default)]
pub struct StockFromConveyorHandler;

#[async_trait]
impl TaskHandler for StockFromConveyorHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::StockFromConveyor
    }

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()> {
        let TaskPayload::StockFromConveyor(job) = &task.payload else {
            return Err(wrong_payload(self.kind(), task));
        };
        let total = job.quantity.max(1);
        let budget = ctx.config.device.stock_timeout(total);

        ctx.tasks
            .update_progress(task.id, TaskProgress { processed: 0, total })
            .await?;

        let device = &ctx.device;
        let baseline = device.baseline();
        device.issue(&format!("STOCK_QTY:{total}")).await?;
        let outcome = device
            .wait_for_fresh_event(RUN_DONE, &baseline, budget)
            .await
            .map(|_| ());

        device.issue_best_effort("STOCK_QTY:0").await;
        let processed = ctx
            .tasks
            .get(task.id)
            .await?
            .and_then(|record| record.progress)
            .map_or(0, |progress| progress.processed);
        tracing::info!(task_id = %task.id, processed, total, "stocking run finished");
        outcome
    }
}
