use async_trait::async_trait;
use stockyard_model::{TaskKind, TaskRecord};

use super::{HandlerContext, TaskHandler};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::inventory::InventoryReport;

/// Builds an inventory report from the stores and publishes it. Does not
/// touch the device.
#[derive(Debug, Default)]
pub struct InventoryCheckHandler;

#[async_trait]
impl TaskHandler for InventoryCheckHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::InventoryCheck
    }

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()> {
        let cells = ctx.inventory.cells().await?;
        let zone = ctx.inventory.loading_zone().await?;
        let conveyor_has_product = ctx.device.telemetry().snapshot().product_on_conveyor();

        let report = InventoryReport::build(cells, zone, conveyor_has_product);
        tracing::info!(
            task_id = %task.id,
            occupied = report.summary.occupied_cells,
            empty = report.summary.empty_cells,
            "inventory check complete"
        );
        ctx.events
            .publish(EngineEvent::InventoryReport { report })
            .await
    }
}
