use async_trait::async_trait;
use stockyard_model::{CellStatus, ProductLocationEntry, TaskKind, TaskPayload, TaskRecord};

use super::{HandlerContext, TaskHandler, wrong_payload};
use crate::error::{EngineError, Result};

/// Put the loading-zone item back into a cell: the requested one, or the
/// first EMPTY cell in row-major order.
#[derive(Debug, Default)]
pub struct LoadReturnHandler;

#[async_trait]
impl TaskHandler for LoadReturnHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::LoadReturn
    }

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()> {
        let TaskPayload::LoadReturn(job) = &task.payload else {
            return Err(wrong_payload(self.kind(), task));
        };

        let target = match job.return_to {
            Some(coord) => {
                let cell = ctx.inventory.cell(coord).await?;
                if cell.status != CellStatus::Empty {
                    return Err(EngineError::InvalidPayload(format!(
                        "return target {coord} is {}",
                        cell.status
                    )));
                }
                coord
            }
            None => ctx
                .inventory
                .cells()
                .await?
                .into_iter()
                .find(|cell| cell.status == CellStatus::Empty)
                .map(|cell| cell.coord)
                .ok_or_else(|| EngineError::NotFound("empty cell for return".into()))?,
        };

        let zone = ctx.inventory.loading_zone().await?;
        ctx.device
            .issue_and_wait_fresh(
                &format!("LOAD_RETURN_TO:{}", target.device_args()),
                "LOAD_RETURN_COMPLETE",
                ctx.config.device.return_timeout(),
            )
            .await?;

        ctx.set_loading_zone(None).await?;
        if let Some(contents) = zone.contents {
            let product_id = contents.product_id();
            let rfid = contents.product.rfid_uid.clone();
            ctx.set_cell_contents(target, Some(contents)).await?;
            ctx.audit(
                task,
                ProductLocationEntry::in_cell(product_id, target, "RETURNED").with_rfid(rfid),
            )
            .await;
        }
        tracing::info!(task_id = %task.id, cell = %target, "loading zone returned to storage");
        Ok(())
    }
}
