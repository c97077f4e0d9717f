//! Per-kind task handlers and the registry the executor dispatches through.
//!
//! Handlers drive the device through [`DeviceLink`] command/wait cycles and
//! perform the inventory writes for their kind. They never finalize the
//! task; the executor owns status transitions.

mod inventory_check;
mod load_return;
mod reorganize;
mod retrieve;
mod stock;

pub use inventory_check::InventoryCheckHandler;
pub use load_return::LoadReturnHandler;
pub use reorganize::{
    PlannedMove, ReorganizationPlan, ReorganizeHandler, plan_compaction, plan_layout,
};
pub use retrieve::{MoveToLoadingHandler, RetrieveToLoadingHandler};
pub use stock::StockFromConveyorHandler;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use stockyard_model::{Cell, CellContents, CellCoord, ProductLocationEntry, TaskKind, TaskRecord};

use crate::config::EngineConfig;
use crate::device::DeviceLink;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventPublisher};
use crate::inventory::{CellView, InventoryStore};
use crate::tasks::TaskStore;

/// Shared dependencies handed to every handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<EngineConfig>,
    pub device: Arc<DeviceLink>,
    pub inventory: Arc<dyn InventoryStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub events: Arc<dyn EventPublisher>,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("device", &self.device)
            .field(
                "inventory_type",
                &std::any::type_name_of_val(self.inventory.as_ref()),
            )
            .field("tasks_type", &std::any::type_name_of_val(self.tasks.as_ref()))
            .finish()
    }
}

impl HandlerContext {
    /// Persist one cell and tell observers.
    pub async fn write_cell(&self, cell: Cell) -> Result<()> {
        self.inventory.put_cell(cell.clone()).await?;
        let stored = self.inventory.cell(cell.coord).await?;
        self.events
            .publish(EngineEvent::CellUpdated {
                cell: CellView::plain(stored),
            })
            .await
    }

    pub async fn set_cell_contents(
        &self,
        coord: CellCoord,
        contents: Option<CellContents>,
    ) -> Result<()> {
        let cell = match contents {
            Some(contents) => Cell::occupied(coord, contents),
            None => Cell::empty(coord),
        };
        self.write_cell(cell).await
    }

    /// Relocate a cell's contents atomically and tell observers about both
    /// cells.
    pub async fn move_cell(&self, from: CellCoord, to: CellCoord) -> Result<()> {
        let (source, target) = self.inventory.move_contents(from, to).await?;
        for cell in [target, source] {
            self.events
                .publish(EngineEvent::CellUpdated {
                    cell: CellView::plain(cell),
                })
                .await?;
        }
        Ok(())
    }

    pub async fn set_loading_zone(&self, contents: Option<CellContents>) -> Result<()> {
        self.inventory.set_loading_zone(contents).await?;
        let zone = self.inventory.loading_zone().await?;
        self.events
            .publish(EngineEvent::LoadingZoneUpdated { zone })
            .await
    }

    /// Append to the location audit. Audit failures are logged, not raised.
    pub async fn audit(&self, task: &TaskRecord, entry: ProductLocationEntry) {
        if let Err(err) = self.inventory.append_location(entry.for_task(task.id)).await {
            tracing::warn!(task_id = %task.id, error = %err, "failed to append location audit");
        }
    }

    /// `HOME`, then wait for a ready report newer than the command.
    pub async fn home(&self) -> Result<()> {
        let baseline = self.device.baseline();
        self.device.issue("HOME").await?;
        self.device
            .wait_for_fresh_ready(&baseline, self.config.device.ready_timeout())
            .await
    }
}

fn wrong_payload(kind: TaskKind, task: &TaskRecord) -> EngineError {
    EngineError::InvalidPayload(format!("{kind} handler received {}", task.kind()))
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()>;
}

/// Maps each task kind to the handler that executes it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(TaskKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with a handler for every task kind.
    pub fn standard() -> Self {
        Self::empty()
            .with(Arc::new(StockFromConveyorHandler))
            .with(Arc::new(RetrieveToLoadingHandler))
            .with(Arc::new(MoveToLoadingHandler))
            .with(Arc::new(InventoryCheckHandler))
            .with(Arc::new(ReorganizeHandler))
            .with(Arc::new(LoadReturnHandler))
    }

    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn without(mut self, kind: TaskKind) -> Self {
        self.handlers.remove(&kind);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }
}
