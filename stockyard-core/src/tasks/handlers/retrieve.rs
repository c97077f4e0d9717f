use async_trait::async_trait;
use stockyard_model::{
    Cell, CellContents, CellCoord, ProductLocationEntry, RetrieveTarget, TaskKind, TaskPayload,
    TaskRecord,
};

use super::{HandlerContext, TaskHandler, wrong_payload};
use crate::error::{EngineError, Result};

/// Pick from a cell, return home, carry to the loading zone, return home.
#[derive(Debug, Default)]
pub struct RetrieveToLoadingHandler;

#[async_trait]
impl TaskHandler for RetrieveToLoadingHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::RetrieveToLoading
    }

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()> {
        let TaskPayload::RetrieveToLoading(job) = &task.payload else {
            return Err(wrong_payload(self.kind(), task));
        };
        let cell = match job.target {
            RetrieveTarget::Cell(coord) => ctx.inventory.cell(coord).await?,
            RetrieveTarget::Product(product) => ctx
                .inventory
                .find_product(product)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("product {product} in any cell")))?,
        };
        let contents = stored_contents(&cell)?;
        let args = cell.coord.device_args();
        let timeout = ctx.config.device.action_timeout();

        ctx.device
            .issue_and_wait_fresh(&format!("TAKE {args}"), "PICK_FROM_CELL_DONE", timeout)
            .await?;
        ctx.home().await?;
        ctx.device
            .issue_and_wait_fresh(
                &format!("MOVE_TO_LOADING:{args}"),
                "MOVE_TO_LOADING_COMPLETE",
                timeout,
            )
            .await?;
        ctx.home().await?;

        deliver_to_loading_zone(task, ctx, cell.coord, contents).await
    }
}

/// Single combined move from a cell straight to the loading zone.
#[derive(Debug, Default)]
pub struct MoveToLoadingHandler;

#[async_trait]
impl TaskHandler for MoveToLoadingHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::MoveToLoading
    }

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()> {
        let TaskPayload::MoveToLoading(job) = &task.payload else {
            return Err(wrong_payload(self.kind(), task));
        };
        let cell = ctx.inventory.cell(job.cell).await?;
        let contents = stored_contents(&cell)?;

        ctx.device
            .issue_and_wait_fresh(
                &format!("MOVE_TO_LOADING:{}", cell.coord.device_args()),
                "MOVE_TO_LOADING_COMPLETE",
                ctx.config.device.move_timeout(),
            )
            .await?;

        deliver_to_loading_zone(task, ctx, cell.coord, contents).await
    }
}

fn stored_contents(cell: &Cell) -> Result<CellContents> {
    cell.contents
        .clone()
        .filter(|_| cell.holds_product())
        .ok_or_else(|| EngineError::InvalidPayload(format!("cell {} holds no product", cell.coord)))
}

async fn deliver_to_loading_zone(
    task: &TaskRecord,
    ctx: &HandlerContext,
    from: CellCoord,
    contents: CellContents,
) -> Result<()> {
    let product_id = contents.product_id();
    let rfid = contents.product.rfid_uid.clone();
    ctx.set_cell_contents(from, None).await?;
    ctx.set_loading_zone(Some(contents)).await?;
    ctx.audit(
        task,
        ProductLocationEntry::in_loading_zone(product_id).with_rfid(rfid),
    )
    .await;
    tracing::info!(task_id = %task.id, cell = %from, product_id = %product_id, "product moved to loading zone");
    Ok(())
}
