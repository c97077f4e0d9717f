mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stockyard_core::device::{DeviceTransport, SimulatedDevice};
use stockyard_core::tasks::{
    HandlerContext, HandlerRegistry, MemoryTaskStore, TaskHandler, TaskStore,
};
use stockyard_core::{EngineConfig, EngineError, EngineEvent, ExecutionOutcome, WarehouseEngine};
use stockyard_model::{
    CellCoord, CellStatus, LocationStatus, StorageStrategy, TaskId, TaskKind, TaskPayload,
    TaskPriority, TaskProgress, TaskRecord, TaskRequest, TaskStatus, TelemetryReport,
};
use tokio::sync::{Mutex, mpsc};

use support::{harness, harness_with, settle};

#[tokio::test(start_paused = true)]
async fn retrieve_moves_product_to_loading_zone() {
    let h = harness(&[CellCoord::new(1, 1)]).await;
    let task = h
        .engine
        .submit_task(TaskRequest::new("RETRIEVE").with_cell(CellCoord::new(1, 1)))
        .await
        .unwrap();

    let outcome = h.engine.run_next_task().await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Completed(task.id));

    assert_eq!(
        h.device.commands().await,
        ["TAKE 1 1", "HOME", "MOVE_TO_LOADING:1 1", "HOME"]
    );
    let cell = h.engine.inventory().cell(CellCoord::new(1, 1)).await.unwrap();
    assert_eq!(cell.status, CellStatus::Empty);
    let zone = h.engine.inventory().loading_zone().await.unwrap();
    assert_eq!(
        zone.contents.map(|c| c.product_id()),
        Some(h.products[0])
    );
    let audit = h.engine.inventory().locations().await.unwrap();
    assert!(audit.iter().any(|entry| {
        entry.status == LocationStatus::InLoadingZone && entry.task_id == Some(task.id)
    }));
    assert!(h.engine.tasks().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retrieve_by_product_finds_its_cell() {
    let h = harness(&[CellCoord::new(1, 1), CellCoord::new(3, 4)]).await;
    h.engine
        .submit_task(TaskRequest::new("RETRIEVE_TO_LOADING").with_product(h.products[1]))
        .await
        .unwrap();

    let outcome = h.engine.run_next_task().await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    assert_eq!(h.device.commands().await[0], "TAKE 4 3");
    assert!(h.device.loading_zone_occupied().await);
}

#[tokio::test(start_paused = true)]
async fn stock_records_every_reported_placement() {
    let config = EngineConfig::default();
    let (device, reports) = SimulatedDevice::builder(config.grid)
        .with_step(Duration::from_millis(100))
        .with_conveyor(["RFID-A".to_string(), "RFID-B".to_string()])
        .build();
    let engine = Arc::new(
        WarehouseEngine::builder(config)
            .with_transport(Arc::new(device.clone()))
            .build()
            .unwrap(),
    );
    engine.spawn_telemetry_pump(reports).await;

    let task = engine
        .submit_task(TaskRequest::new("STOCK").with_quantity(2))
        .await
        .unwrap();
    assert_eq!(
        engine.run_next_task().await.unwrap(),
        ExecutionOutcome::Completed(task.id)
    );

    assert_eq!(device.commands().await, ["STOCK_QTY:2", "STOCK_QTY:0"]);
    let first = engine.inventory().cell(CellCoord::new(1, 1)).await.unwrap();
    let second = engine.inventory().cell(CellCoord::new(1, 2)).await.unwrap();
    assert_eq!(first.status, CellStatus::Occupied);
    assert_eq!(
        first.contents.unwrap().product.rfid_uid.as_deref(),
        Some("RFID-A")
    );
    assert_eq!(
        second.contents.unwrap().product.rfid_uid.as_deref(),
        Some("RFID-B")
    );
    let stocked: Vec<_> = engine
        .inventory()
        .locations()
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.action == "STOCKED")
        .collect();
    assert_eq!(stocked.len(), 2);
    assert!(stocked.iter().all(|entry| entry.task_id == Some(task.id)));
}

/// Controller that answers `STOCK_QTY:n` with a placement immediately
/// followed by the end of the run.
struct BurstController {
    reports: mpsc::Sender<TelemetryReport>,
    commands: Mutex<Vec<String>>,
}

#[async_trait]
impl DeviceTransport for BurstController {
    async fn send(&self, command: &str) -> stockyard_core::Result<String> {
        self.commands.lock().await.push(command.to_string());
        if command.starts_with("STOCK_QTY:") && command != "STOCK_QTY:0" {
            let burst = [
                ("AUTO_STOCK_COMPLETE:TAG-X", Some("C1:R1")),
                ("STOCK_QTY_DONE", None),
            ];
            for (operation, target) in burst {
                let report = TelemetryReport {
                    current_operation: Some(operation.into()),
                    arm_status: Some("READY".into()),
                    target_cell: target.map(Into::into),
                    ..TelemetryReport::default()
                };
                self.reports
                    .send(report)
                    .await
                    .map_err(|_| EngineError::DeviceUnreachable("report channel closed".into()))?;
            }
        }
        Ok("OK".into())
    }
}

#[tokio::test(start_paused = true)]
async fn placement_reported_back_to_back_with_run_end_is_kept() {
    let (tx, rx) = mpsc::channel(16);
    let controller = Arc::new(BurstController {
        reports: tx,
        commands: Mutex::new(Vec::new()),
    });
    let engine = Arc::new(
        WarehouseEngine::builder(EngineConfig::default())
            .with_transport(controller.clone())
            .build()
            .unwrap(),
    );
    engine.spawn_telemetry_pump(rx).await;
    let mut events = engine.subscribe();

    let task = engine
        .submit_task(TaskRequest::new("STOCK").with_quantity(1))
        .await
        .unwrap();
    assert_eq!(
        engine.run_next_task().await.unwrap(),
        ExecutionOutcome::Completed(task.id)
    );

    let cell = engine.inventory().cell(CellCoord::new(1, 1)).await.unwrap();
    assert_eq!(cell.status, CellStatus::Occupied);
    assert_eq!(
        cell.contents.unwrap().product.rfid_uid.as_deref(),
        Some("TAG-X")
    );
    assert_eq!(
        *controller.commands.lock().await,
        ["STOCK_QTY:1", "STOCK_QTY:0"]
    );

    let mut progress = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::TaskUpdated { task: update } = event
            && update.status == TaskStatus::Completed
        {
            progress = update.progress;
        }
    }
    assert_eq!(
        progress,
        Some(TaskProgress {
            processed: 1,
            total: 1
        })
    );
}

#[tokio::test(start_paused = true)]
async fn consecutive_moves_to_loading_both_complete() {
    let (first, second) = (CellCoord::new(1, 1), CellCoord::new(1, 2));
    let h = harness(&[first, second]).await;
    for cell in [first, second] {
        h.engine
            .submit_task(TaskRequest::new("MOVE").with_cell(cell))
            .await
            .unwrap();
    }

    for _ in 0..2 {
        let outcome = h.engine.run_next_task().await.unwrap();
        assert!(
            matches!(outcome, ExecutionOutcome::Completed(_)),
            "{outcome:?}"
        );
    }
    assert_eq!(
        h.device.commands().await,
        ["MOVE_TO_LOADING:1 1", "MOVE_TO_LOADING:2 1"]
    );
    let zone = h.engine.inventory().loading_zone().await.unwrap();
    assert_eq!(zone.contents.map(|c| c.product_id()), Some(h.products[1]));
}

#[tokio::test(start_paused = true)]
async fn load_return_fills_nearest_empty_cell() {
    let h = harness(&[CellCoord::new(1, 1)]).await;
    h.engine
        .submit_task(TaskRequest::new("MOVE").with_cell(CellCoord::new(1, 1)))
        .await
        .unwrap();
    assert!(h.engine.run_next_task().await.unwrap().ran_task());
    assert!(h.engine.inventory().loading_zone().await.unwrap().is_occupied());

    h.engine
        .submit_task(TaskRequest::new("LOAD_RETURN"))
        .await
        .unwrap();
    assert!(matches!(
        h.engine.run_next_task().await.unwrap(),
        ExecutionOutcome::Completed(_)
    ));

    let cell = h.engine.inventory().cell(CellCoord::new(1, 1)).await.unwrap();
    assert_eq!(cell.product_id(), Some(h.products[0]));
    assert!(!h.engine.inventory().loading_zone().await.unwrap().is_occupied());
    assert_eq!(
        h.device.commands().await.last().map(String::as_str),
        Some("LOAD_RETURN_TO:1 1")
    );
}

#[tokio::test(start_paused = true)]
async fn inventory_check_publishes_a_report() {
    let h = harness(&[CellCoord::new(2, 2)]).await;
    let mut events = h.engine.subscribe();
    h.engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK"))
        .await
        .unwrap();
    assert!(h.engine.run_next_task().await.unwrap().ran_task());

    let report = loop {
        match events.recv().await.unwrap() {
            EngineEvent::InventoryReport { report } => break report,
            _ => continue,
        }
    };
    assert_eq!(report.summary.total_cells, 12);
    assert_eq!(report.summary.occupied_cells, 1);
    assert!(h.device.commands().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn device_going_offline_mid_wait_fails_the_task() {
    let h = harness(&[CellCoord::new(1, 1)]).await;
    let task = h
        .engine
        .submit_task(TaskRequest::new("RETRIEVE").with_cell(CellCoord::new(1, 1)))
        .await
        .unwrap();

    let engine = Arc::clone(&h.engine);
    let started = tokio::time::Instant::now();
    let run = tokio::spawn(async move { engine.run_next_task().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.device.set_reachable(false);

    let outcome = run.await.unwrap().unwrap();
    let ExecutionOutcome::Failed { id, error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(id, task.id);
    assert!(error.contains("PICK_FROM_CELL_DONE"), "{error}");
    assert!(started.elapsed() <= h.engine.config().device.action_timeout() + Duration::from_secs(1));

    let stored = h.engine.task_store().get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(error.as_str()));
    // Nothing was written for the aborted retrieval.
    let cell = h.engine.inventory().cell(CellCoord::new(1, 1)).await.unwrap();
    assert_eq!(cell.product_id(), Some(h.products[0]));
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_fails_on_first_command() {
    let h = harness(&[CellCoord::new(1, 1)]).await;
    h.device.set_reachable(false);
    h.engine
        .submit_task(TaskRequest::new("MOVE").with_cell(CellCoord::new(1, 1)))
        .await
        .unwrap();

    let ExecutionOutcome::Failed { error, .. } = h.engine.run_next_task().await.unwrap() else {
        panic!("expected failure");
    };
    assert!(error.contains("unreachable"), "{error}");
}

#[derive(Debug)]
struct SilentMove;

#[async_trait]
impl TaskHandler for SilentMove {
    fn kind(&self) -> TaskKind {
        TaskKind::MoveToLoading
    }

    async fn run(&self, _task: &TaskRecord, _ctx: &HandlerContext) -> stockyard_core::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn device_task_without_fresh_telemetry_fails() {
    let config = EngineConfig::default();
    let (device, _reports) = SimulatedDevice::builder(config.grid).build();
    let engine = WarehouseEngine::builder(config)
        .with_transport(Arc::new(device))
        .with_registry(HandlerRegistry::standard().with(Arc::new(SilentMove)))
        .build()
        .unwrap();

    let task = engine
        .submit_task(TaskRequest::new("MOVE").with_cell(CellCoord::new(2, 2)))
        .await
        .unwrap();
    let ExecutionOutcome::Failed { id, error } = engine.run_next_task().await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(id, task.id);
    assert!(error.contains("no fresh telemetry"), "{error}");
    assert_eq!(
        engine.task_store().get(id).await.unwrap().unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn missing_handler_fails_the_task() {
    let config = EngineConfig::default();
    let (device, _reports) = SimulatedDevice::builder(config.grid).build();
    let engine = WarehouseEngine::builder(config)
        .with_transport(Arc::new(device))
        .with_registry(HandlerRegistry::standard().without(TaskKind::InventoryCheck))
        .build()
        .unwrap();

    engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK"))
        .await
        .unwrap();
    let ExecutionOutcome::Failed { error, .. } = engine.run_next_task().await.unwrap() else {
        panic!("expected failure");
    };
    assert!(error.contains("no handler"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn retired_kind_is_cancelled_and_removed() {
    let mut config = EngineConfig::default();
    config.tasks.retired_kinds = vec![TaskKind::InventoryCheck];
    let h = harness_with(config, &[], &[]).await;
    let mut events = h.engine.subscribe();

    let err = h
        .engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TaskKindRetired(TaskKind::InventoryCheck)));

    // Queued before the kind was retired.
    let queued = TaskRecord::new(TaskPayload::InventoryCheck, TaskPriority::Medium);
    h.engine.task_store().insert(queued.clone()).await.unwrap();

    assert_eq!(
        h.engine.run_next_task().await.unwrap(),
        ExecutionOutcome::Cancelled(queued.id)
    );
    assert!(h.engine.tasks().await.unwrap().is_empty());
    let cancelled = loop {
        if let EngineEvent::TaskUpdated { task } = events.recv().await.unwrap() {
            break task;
        }
    };
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.error_message.as_deref(), Some("task type INVENTORY_CHECK is disabled"));
}

#[tokio::test]
async fn invalid_requests_are_rejected_at_submission() {
    let h = harness(&[]).await;
    let err = h
        .engine
        .submit_task(TaskRequest::new("TELEPORT"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTaskType(_)));

    let err = h.engine.submit_task(TaskRequest::new("MOVE")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidPayload(_)));

    let err = h
        .engine
        .submit_task(TaskRequest::new("MOVE").with_cell(CellCoord::new(4, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidPayload(_)));
    assert!(h.engine.tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn pending_task_can_be_cancelled_by_operator() {
    let h = harness(&[]).await;
    let task = h
        .engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK").with_priority(TaskPriority::Low))
        .await
        .unwrap();
    let cancelled = h.engine.cancel_task(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(h.engine.run_next_task().await.unwrap(), ExecutionOutcome::Idle);
    assert!(matches!(
        h.engine.cancel_task(task.id).await.unwrap_err(),
        EngineError::NotPending(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn processor_drains_queue_only_in_auto_mode() {
    let h = harness(&[]).await;
    for _ in 0..2 {
        h.engine
            .submit_task(TaskRequest::new("INVENTORY_CHECK"))
            .await
            .unwrap();
    }
    h.engine.start().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.engine.tasks().await.unwrap().len(), 2);

    h.engine.set_auto_mode(true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.engine.tasks().await.unwrap().is_empty());

    h.engine.shutdown().await;
    assert!(matches!(
        h.engine
            .submit_task(TaskRequest::new("INVENTORY_CHECK"))
            .await
            .unwrap_err(),
        EngineError::Cancelled(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn storage_strategy_follows_operator_and_controller() {
    let h = harness(&[]).await;
    let mut events = h.engine.subscribe();

    h.engine
        .set_storage_strategy(StorageStrategy::Fixed)
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.engine.storage_strategy(), StorageStrategy::Fixed);
    assert_eq!(h.device.commands().await, ["STRATEGY FIXED"]);

    h.engine
        .ingest_report(TelemetryReport {
            storage_strategy: Some("AI".into()),
            ..TelemetryReport::default()
        })
        .await
        .unwrap();
    assert_eq!(h.engine.storage_strategy(), StorageStrategy::AiOptimized);

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::StrategyChanged { strategy } = event {
            changes.push(strategy);
        }
    }
    assert_eq!(
        changes,
        [StorageStrategy::Fixed, StorageStrategy::AiOptimized]
    );
}

/// Task store whose first `failures` calls to `finish` fail.
struct FlakyFinish {
    inner: MemoryTaskStore,
    failures: AtomicUsize,
}

impl FlakyFinish {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryTaskStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl TaskStore for FlakyFinish {
    async fn insert(&self, task: TaskRecord) -> stockyard_core::Result<()> {
        self.inner.insert(task).await
    }

    async fn get(&self, id: TaskId) -> stockyard_core::Result<Option<TaskRecord>> {
        self.inner.get(id).await
    }

    async fn list(&self) -> stockyard_core::Result<Vec<TaskRecord>> {
        self.inner.list().await
    }

    async fn next_pending(&self) -> stockyard_core::Result<Option<TaskRecord>> {
        self.inner.next_pending().await
    }

    async fn count_processing(&self) -> stockyard_core::Result<usize> {
        self.inner.count_processing().await
    }

    async fn try_claim(&self, id: TaskId) -> stockyard_core::Result<Option<TaskRecord>> {
        self.inner.try_claim(id).await
    }

    async fn update_progress(
        &self,
        id: TaskId,
        progress: TaskProgress,
    ) -> stockyard_core::Result<()> {
        self.inner.update_progress(id, progress).await
    }

    async fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> stockyard_core::Result<TaskRecord> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Store("write conflict".into()));
        }
        self.inner.finish(id, status, error_message).await
    }

    async fn remove(&self, id: TaskId) -> stockyard_core::Result<Option<TaskRecord>> {
        self.inner.remove(id).await
    }
}

fn engine_with_tasks(tasks: Arc<dyn TaskStore>) -> WarehouseEngine {
    let config = EngineConfig::default();
    let (device, _reports) = SimulatedDevice::builder(config.grid).build();
    WarehouseEngine::builder(config)
        .with_transport(Arc::new(device))
        .with_tasks(tasks)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn transient_finish_error_is_retried() {
    let engine = engine_with_tasks(Arc::new(FlakyFinish::new(1)));
    let task = engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK"))
        .await
        .unwrap();
    assert_eq!(
        engine.run_next_task().await.unwrap(),
        ExecutionOutcome::Completed(task.id)
    );
    assert!(engine.tasks().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unrecordable_completion_fails_the_task_instead_of_stalling() {
    // Every completion attempt fails; the fallback FAILED write succeeds.
    let engine = engine_with_tasks(Arc::new(FlakyFinish::new(3)));
    let first = engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK"))
        .await
        .unwrap();
    let second = engine
        .submit_task(TaskRequest::new("INVENTORY_CHECK"))
        .await
        .unwrap();

    let ExecutionOutcome::Failed { id, error } = engine.run_next_task().await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(id, first.id);
    assert!(error.contains("could not be recorded"), "{error}");
    let stored = engine.task_store().get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(engine.task_store().count_processing().await.unwrap(), 0);

    assert_eq!(
        engine.run_next_task().await.unwrap(),
        ExecutionOutcome::Completed(second.id)
    );
}
