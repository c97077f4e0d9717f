//! The engine facade: wires telemetry, device link, stores, executor and
//! processor together and exposes the operations producers call.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use stockyard_model::{
    Cell, CellContents, CellCoord, ProductLocationEntry, ProductRef, StorageStrategy, TaskId,
    TaskRecord, TaskRequest, TelemetryReport, TelemetrySnapshot,
};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::device::{DeviceLink, DeviceTransport};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventPublisher, EventStream, InProcEventBus};
use crate::inventory::{CellView, InventoryStore, MemoryInventory, WarehouseSnapshot};
use crate::occupancy::OccupancyReconciler;
use crate::tasks::{
    ExecutionOutcome, HandlerContext, HandlerRegistry, MemoryTaskStore, TaskExecutor,
    TaskProcessor, TaskStore,
};
use crate::telemetry::TelemetryStore;
use crate::tracking::ReportTracker;

/// Manual intervention on a single cell, performed outside any task.
#[derive(Clone, Debug)]
pub enum CellAction {
    Place { product: ProductRef, quantity: u32 },
    Take,
}

pub struct WarehouseEngine {
    config: Arc<EngineConfig>,
    telemetry: Arc<TelemetryStore>,
    device: Arc<DeviceLink>,
    inventory: Arc<dyn InventoryStore>,
    tasks: Arc<dyn TaskStore>,
    events: Arc<InProcEventBus>,
    reconciler: OccupancyReconciler,
    executor: Arc<TaskExecutor>,
    processor: TaskProcessor,
    auto_mode: watch::Sender<bool>,
    strategy: watch::Sender<StorageStrategy>,
    last_snapshot: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WarehouseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseEngine")
            .field("device", &self.device)
            .field(
                "inventory_type",
                &std::any::type_name_of_val(self.inventory.as_ref()),
            )
            .field("tasks_type", &std::any::type_name_of_val(self.tasks.as_ref()))
            .field("auto_mode", &*self.auto_mode.borrow())
            .field("strategy", &*self.strategy.borrow())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl WarehouseEngine {
    pub fn builder(config: EngineConfig) -> WarehouseEngineBuilder {
        WarehouseEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn device(&self) -> &Arc<DeviceLink> {
        &self.device
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryStore> {
        &self.inventory
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn reconciler(&self) -> &OccupancyReconciler {
        &self.reconciler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Apply one telemetry report: replace the snapshot, run occupancy
    /// reconciliation, follow the loading-zone sensor and the controller's
    /// strategy, then notify observers.
    pub async fn ingest_report(&self, report: TelemetryReport) -> Result<Arc<TelemetrySnapshot>> {
        let previous = self.telemetry.snapshot();
        let snapshot = self.telemetry.ingest(report);
        let now = Instant::now();

        match self
            .reconciler
            .reconcile(&snapshot, now, self.inventory.as_ref(), self.events.as_ref())
            .await
        {
            Ok(cleared) if !cleared.is_empty() => {
                tracing::debug!(cleared = cleared.len(), "occupancy reconciliation cleared cells");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "occupancy reconciliation failed, continuing ingestion");
            }
        }

        ReportTracker {
            dims: self.config.grid,
            inventory: self.inventory.as_ref(),
            tasks: self.tasks.as_ref(),
            events: self.events.as_ref(),
        }
        .apply(&previous, &snapshot)
        .await;

        if let Some(reported) = snapshot.storage_strategy
            && self.strategy.send_if_modified(|current| {
                let changed = *current != reported;
                *current = reported;
                changed
            })
        {
            tracing::info!(strategy = %reported, "storage strategy changed by controller");
            self.events
                .publish(EngineEvent::StrategyChanged { strategy: reported })
                .await?;
        }

        self.events
            .publish(EngineEvent::SensorUpdated {
                snapshot: (*snapshot).clone(),
            })
            .await?;

        let due = {
            let mut last = self.last_snapshot.lock().await;
            let due = last.is_none_or(|at| {
                now.saturating_duration_since(at) >= self.config.events.snapshot_min_gap()
            });
            if due {
                *last = Some(now);
            }
            due
        };
        if due {
            let snapshot = self.warehouse_snapshot().await?;
            self.events
                .publish(EngineEvent::WarehouseSnapshot { snapshot })
                .await?;
        }

        Ok(snapshot)
    }

    /// Feed reports from a channel into [`WarehouseEngine::ingest_report`]
    /// until the channel closes or the engine shuts down.
    pub async fn spawn_telemetry_pump(
        self: &Arc<Self>,
        mut reports: mpsc::Receiver<TelemetryReport>,
    ) {
        let engine = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    report = reports.recv() => {
                        let Some(report) = report else {
                            tracing::debug!("telemetry source closed");
                            break;
                        };
                        if let Err(err) = engine.ingest_report(report).await {
                            tracing::error!(error = %err, "failed to ingest telemetry report");
                        }
                    }
                }
            }
        });
        self.pumps.lock().await.push(handle);
    }

    /// Cells with the live sensor overlay, plus the loading zone.
    pub async fn warehouse_snapshot(&self) -> Result<WarehouseSnapshot> {
        let cells = self.inventory.cells().await?;
        let telemetry = self.telemetry.snapshot();
        Ok(WarehouseSnapshot {
            cells: self.reconciler.live_view(cells, &telemetry).await,
            loading_zone: self.inventory.loading_zone().await?,
            taken_at: Utc::now(),
        })
    }

    pub fn storage_strategy(&self) -> StorageStrategy {
        *self.strategy.borrow()
    }

    /// Switch placement policy. The controller is told best-effort; the
    /// engine-side value changes regardless.
    pub async fn set_storage_strategy(&self, strategy: StorageStrategy) -> Result<()> {
        self.device
            .issue_best_effort(&format!("STRATEGY {}", strategy.device_token()))
            .await;
        self.strategy.send_replace(strategy);
        tracing::info!(strategy = %strategy, "storage strategy set");
        self.events
            .publish(EngineEvent::StrategyChanged { strategy })
            .await
    }

    /// Validate and enqueue a task request.
    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskRecord> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::Cancelled("engine is shutting down".to_string()));
        }
        let payload = request.validate(self.config.grid)?;
        let kind = payload.kind();
        if self.config.tasks.is_retired(kind) {
            return Err(EngineError::TaskKindRetired(kind));
        }

        let task = TaskRecord::new(payload, request.priority.unwrap_or_default())
            .with_strategy(request.storage_strategy.unwrap_or(self.storage_strategy()));
        self.tasks.insert(task.clone()).await?;
        tracing::info!(
            task_id = %task.id,
            kind = %kind,
            priority = %task.priority,
            "task queued"
        );
        self.events.publish(EngineEvent::task(&task)).await?;
        self.processor.nudge();
        Ok(task)
    }

    pub async fn cancel_task(&self, id: TaskId) -> Result<TaskRecord> {
        let cancelled = self
            .tasks
            .cancel(id, "Cancelled by operator")
            .await?
            .ok_or(EngineError::NotPending(id))?;
        self.events.publish(EngineEvent::task(&cancelled)).await?;
        tracing::info!(task_id = %id, "task cancelled");
        Ok(cancelled)
    }

    pub async fn tasks(&self) -> Result<Vec<TaskRecord>> {
        self.tasks.list().await
    }

    /// Record a manual place or take. The cell's sensor history is reset so
    /// stale readings do not immediately undo the change.
    pub async fn cell_action(&self, coord: CellCoord, action: CellAction) -> Result<Cell> {
        let coord = self.config.grid.check(coord)?;
        let cell = match action {
            CellAction::Place { product, quantity } => {
                let entry = ProductLocationEntry::in_cell(product.id, coord, "MANUAL_PLACE")
                    .with_rfid(product.rfid_uid.clone());
                let cell = Cell::occupied(
                    coord,
                    CellContents {
                        product,
                        quantity: quantity.max(1),
                    },
                );
                self.inventory.put_cell(cell).await?;
                if let Err(err) = self.inventory.append_location(entry).await {
                    tracing::warn!(cell = %coord, error = %err, "failed to append location audit");
                }
                self.inventory.cell(coord).await?
            }
            CellAction::Take => {
                self.inventory.put_cell(Cell::empty(coord)).await?;
                self.inventory.cell(coord).await?
            }
        };
        self.reconciler.reset_cell(coord).await;
        tracing::info!(cell = %coord, status = %cell.status, "manual cell action recorded");
        self.events
            .publish(EngineEvent::CellUpdated {
                cell: CellView::plain(cell.clone()),
            })
            .await?;
        Ok(cell)
    }

    pub fn auto_mode(&self) -> bool {
        *self.auto_mode.borrow()
    }

    pub async fn set_auto_mode(&self, enabled: bool) -> Result<()> {
        let changed = self.auto_mode.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
        if changed {
            tracing::info!(enabled, "auto mode changed");
            self.events
                .publish(EngineEvent::AutoModeChanged { enabled })
                .await?;
        }
        Ok(())
    }

    /// Run one executor attempt outside the processor loop.
    pub async fn run_next_task(&self) -> Result<ExecutionOutcome> {
        self.executor.run_next().await
    }

    /// Start the auto-mode processor loop.
    pub async fn start(&self) {
        self.processor.start().await;
    }

    /// Stop the processor and telemetry pumps. An in-flight task finishes
    /// before this returns.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.processor.stop().await;
        let pumps = std::mem::take(&mut *self.pumps.lock().await);
        for pump in pumps {
            if let Err(err) = pump.await {
                tracing::warn!(error = %err, "telemetry pump join failed");
            }
        }
        tracing::info!("warehouse engine stopped");
    }
}

impl EventStream for WarehouseEngine {
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.subscribe()
    }
}

/// Assembles a [`WarehouseEngine`]. Only the device transport is required;
/// stores and the event bus default to their in-memory versions.
pub struct WarehouseEngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn DeviceTransport>>,
    inventory: Option<Arc<dyn InventoryStore>>,
    tasks: Option<Arc<dyn TaskStore>>,
    events: Option<Arc<InProcEventBus>>,
    registry: Option<HandlerRegistry>,
}

impl fmt::Debug for WarehouseEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseEngineBuilder")
            .field("config", &self.config)
            .field("transport_set", &self.transport.is_some())
            .field("inventory_set", &self.inventory.is_some())
            .field("tasks_set", &self.tasks.is_some())
            .field("events_set", &self.events.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

impl WarehouseEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            transport: None,
            inventory: None,
            tasks: None,
            events: None,
            registry: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn DeviceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn InventoryStore>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_events(mut self, events: Arc<InProcEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<WarehouseEngine> {
        let transport = self
            .transport
            .ok_or_else(|| EngineError::Misconfigured("device transport missing".to_string()))?;
        let config = Arc::new(self.config);
        let grid = config.grid;
        if grid.rows == 0 || grid.cols == 0 {
            return Err(EngineError::Misconfigured(format!(
                "grid must have at least one cell, got {}x{}",
                grid.rows, grid.cols
            )));
        }

        let telemetry = Arc::new(TelemetryStore::new(grid));
        let device = Arc::new(DeviceLink::new(
            transport,
            Arc::clone(&telemetry),
            config.device.clone(),
        ));
        let inventory = self
            .inventory
            .unwrap_or_else(|| Arc::new(MemoryInventory::new(grid)) as Arc<dyn InventoryStore>);
        let tasks = self
            .tasks
            .unwrap_or_else(|| Arc::new(MemoryTaskStore::new()) as Arc<dyn TaskStore>);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InProcEventBus::new(config.events.channel_capacity)));
        let registry = Arc::new(self.registry.unwrap_or_else(HandlerRegistry::standard));

        let ctx = HandlerContext {
            config: Arc::clone(&config),
            device: Arc::clone(&device),
            inventory: Arc::clone(&inventory),
            tasks: Arc::clone(&tasks),
            events: Arc::clone(&events) as Arc<dyn EventPublisher>,
        };
        let executor = Arc::new(TaskExecutor::new(ctx, registry));

        let (auto_mode, auto_rx) = watch::channel(config.processor.auto_mode);
        let processor =
            TaskProcessor::new(Arc::clone(&executor), config.processor.clone(), auto_rx);
        let (strategy, _) = watch::channel(config.storage_strategy);

        Ok(WarehouseEngine {
            reconciler: OccupancyReconciler::new(config.occupancy.clone()),
            config,
            telemetry,
            device,
            inventory,
            tasks,
            events,
            executor,
            processor,
            auto_mode,
            strategy,
            last_snapshot: Mutex::new(None),
            shutdown: CancellationToken::new(),
            pumps: Mutex::new(Vec::new()),
        })
    }
}
