//! Inventory changes the controller announces on its own.
//!
//! Each mapping fires on the report that introduces its operation tag, so a
//! heartbeat repeating the tag never writes twice. Running these at
//! ingestion means every report is seen even when a waiter only observes the
//! latest snapshot.

use stockyard_model::{
    Cell, CellContents, GridDims, ProductLocationEntry, TaskKind, TaskProgress, TaskRecord,
    TaskStatus, TelemetrySnapshot,
};

use crate::error::Result;
use crate::events::{EngineEvent, EventPublisher};
use crate::inventory::{CellView, InventoryStore};
use crate::tasks::TaskStore;

pub(crate) const ITEM_STOCKED: &str = "AUTO_STOCK_COMPLETE";
pub(crate) const PRODUCT_IN_LOADING: &str = "PRODUCT_IN_LOADING";
pub(crate) const LOADING_TAKEN: &str = "LOADING_TAKE_COMPLETE";

/// Borrowed view of the stores a report may touch.
pub(crate) struct ReportTracker<'a> {
    pub dims: GridDims,
    pub inventory: &'a dyn InventoryStore,
    pub tasks: &'a dyn TaskStore,
    pub events: &'a dyn EventPublisher,
}

impl ReportTracker<'_> {
    /// Apply every mapping `snapshot` triggers relative to `previous`.
    /// Failures are logged and the remaining mappings still run.
    pub async fn apply(&self, previous: &TelemetrySnapshot, snapshot: &TelemetrySnapshot) {
        if let Err(err) = self.follow_zone_sensor(previous, snapshot).await {
            tracing::warn!(error = %err, "loading zone sensor sync skipped");
        }

        if snapshot.operation_changes <= previous.operation_changes {
            return;
        }
        let operation = snapshot.operation.as_str();
        if operation.contains(PRODUCT_IN_LOADING)
            && let Err(err) = self.product_in_loading(snapshot).await
        {
            tracing::warn!(error = %err, operation, "loading zone product update skipped");
        }
        if operation.contains(LOADING_TAKEN)
            && let Err(err) = self.loading_taken().await
        {
            tracing::warn!(error = %err, operation, "loading zone clear skipped");
        }
        if operation.contains(ITEM_STOCKED)
            && let Err(err) = self.item_stocked(snapshot).await
        {
            tracing::warn!(error = %err, operation, "stock placement skipped");
        }
    }

    /// Empty sensor demotes the zone record. A rising edge with a scanned
    /// tag and no task in flight caches the product placed by hand.
    async fn follow_zone_sensor(
        &self,
        previous: &TelemetrySnapshot,
        snapshot: &TelemetrySnapshot,
    ) -> Result<()> {
        let zone = self.inventory.loading_zone().await?;
        if !snapshot.loading_zone_occupied {
            if zone.is_occupied() {
                tracing::warn!("loading zone sensor reports empty, clearing loading zone record");
                self.set_zone(None).await?;
            }
            return Ok(());
        }

        if previous.loading_zone_occupied || zone.is_occupied() {
            return Ok(());
        }
        let Some(rfid) = snapshot.rfid.as_deref().and_then(usable_rfid) else {
            return Ok(());
        };
        if self.tasks.count_processing().await? > 0 {
            return Ok(());
        }

        let product = self.inventory.ensure_product(rfid).await?;
        let product_id = product.id;
        self.set_zone(Some(CellContents::single(product))).await?;
        self.audit(
            ProductLocationEntry::in_loading_zone(product_id).with_rfid(Some(rfid.to_string())),
            None,
        )
        .await;
        tracing::info!(rfid, product_id = %product_id, "cached product placed in loading zone");
        Ok(())
    }

    async fn product_in_loading(&self, snapshot: &TelemetrySnapshot) -> Result<()> {
        let Some(rfid) = snapshot
            .tagged_rfid(PRODUCT_IN_LOADING)
            .filter(|tag| usable_rfid(tag).is_some())
        else {
            tracing::warn!(operation = %snapshot.operation, "loading zone report without rfid");
            return Ok(());
        };

        let product = self.inventory.ensure_product(&rfid).await?;
        let product_id = product.id;
        self.set_zone(Some(CellContents::single(product))).await?;
        let task = self.active_task(None).await?;
        self.audit(
            ProductLocationEntry::in_loading_zone(product_id).with_rfid(Some(rfid)),
            task.as_ref(),
        )
        .await;
        Ok(())
    }

    async fn loading_taken(&self) -> Result<()> {
        if self.inventory.loading_zone().await?.is_occupied() {
            tracing::info!("controller took the loading zone product");
        }
        self.set_zone(None).await
    }

    async fn item_stocked(&self, snapshot: &TelemetrySnapshot) -> Result<()> {
        let cell = snapshot
            .parsed_target_cell()
            .filter(|cell| self.dims.contains(*cell));
        let rfid = snapshot
            .tagged_rfid(ITEM_STOCKED)
            .filter(|tag| usable_rfid(tag).is_some());
        let (Some(cell), Some(rfid)) = (cell, rfid) else {
            tracing::warn!(
                operation = %snapshot.operation,
                target = ?snapshot.target_cell,
                "stock completion without target cell or rfid, skipping placement"
            );
            return Ok(());
        };

        let product = self.inventory.ensure_product(&rfid).await?;
        let product_id = product.id;
        self.inventory
            .put_cell(Cell::occupied(cell, CellContents::single(product)))
            .await?;
        let stored = self.inventory.cell(cell).await?;
        self.publish(EngineEvent::CellUpdated {
            cell: CellView::plain(stored),
        })
        .await;

        let task = self.active_task(Some(TaskKind::StockFromConveyor)).await?;
        self.audit(
            ProductLocationEntry::in_cell(product_id, cell, "STOCKED").with_rfid(Some(rfid)),
            task.as_ref(),
        )
        .await;
        if let Some(task) = &task {
            let progress = task.progress.unwrap_or(TaskProgress {
                processed: 0,
                total: 1,
            });
            let processed = progress.processed.saturating_add(1);
            self.tasks
                .update_progress(
                    task.id,
                    TaskProgress {
                        processed,
                        total: progress.total.max(processed),
                    },
                )
                .await?;
        }
        tracing::info!(
            task_id = ?task.as_ref().map(|t| t.id),
            cell = %cell,
            product_id = %product_id,
            "stocked item"
        );
        Ok(())
    }

    /// The PROCESSING task, optionally restricted to one kind.
    async fn active_task(&self, kind: Option<TaskKind>) -> Result<Option<TaskRecord>> {
        Ok(self.tasks.list().await?.into_iter().find(|task| {
            task.status == TaskStatus::Processing && kind.is_none_or(|kind| task.kind() == kind)
        }))
    }

    async fn set_zone(&self, contents: Option<CellContents>) -> Result<()> {
        self.inventory.set_loading_zone(contents).await?;
        let zone = self.inventory.loading_zone().await?;
        self.publish(EngineEvent::LoadingZoneUpdated { zone }).await;
        Ok(())
    }

    async fn audit(&self, entry: ProductLocationEntry, task: Option<&TaskRecord>) {
        let entry = match task {
            Some(task) => entry.for_task(task.id),
            None => entry,
        };
        if let Err(err) = self.inventory.append_location(entry).await {
            tracing::warn!(error = %err, "failed to append location audit");
        }
    }

    async fn publish(&self, event: EngineEvent) {
        if let Err(err) = self.events.publish(event).await {
            tracing::warn!(error = %err, "failed to publish tracking event");
        }
    }
}

/// Scanners report `0` or `null` when nothing is in range.
fn usable_rfid(raw: &str) -> Option<&str> {
    let tag = raw.trim();
    (!tag.is_empty() && tag != "0" && !tag.eq_ignore_ascii_case("null")).then_some(tag)
}
