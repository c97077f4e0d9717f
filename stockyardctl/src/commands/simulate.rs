use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use stockyard_config::StockyardConfig;
use stockyard_core::device::SimulatedDevice;
use stockyard_core::inventory::{MemoryInventory, WarehouseSnapshot};
use stockyard_core::{ExecutionOutcome, WarehouseEngine};
use stockyard_model::{CellStatus, ProductId, ProductRef, TaskId, TaskKind};

use crate::cli::SimulateArgs;

pub async fn run(args: SimulateArgs, config: StockyardConfig) -> Result<()> {
    let grid = config.engine.grid;
    let step = args
        .step_ms
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| config.device.simulated_step());

    let (device, reports) = SimulatedDevice::builder(grid)
        .with_step(step)
        .with_occupied(args.stored.iter().copied())
        .with_conveyor(args.conveyor.iter().cloned())
        .build();

    let inventory = Arc::new(MemoryInventory::new(grid));
    for (i, cell) in args.stored.iter().enumerate() {
        let product = ProductRef::new(ProductId::new())
            .with_rfid(format!("SEED-{:02}", i + 1))
            .with_name(format!("Seed {}", i + 1));
        inventory
            .seed(*cell, product)
            .await
            .with_context(|| format!("cannot seed {cell}"))?;
    }

    let engine = Arc::new(
        WarehouseEngine::builder(config.engine)
            .with_transport(Arc::new(device.clone()))
            .with_inventory(inventory)
            .build()?,
    );
    engine.spawn_telemetry_pump(reports).await;
    device.heartbeat().await;

    let mut kinds: HashMap<TaskId, TaskKind> = HashMap::new();
    for request in args.tasks {
        let task = engine.submit_task(request).await?;
        kinds.insert(task.id, task.kind());
    }

    loop {
        let outcome = engine.run_next_task().await?;
        let kind = |id: &TaskId| kinds.get(id).map(TaskKind::as_str).unwrap_or("UNKNOWN");
        match &outcome {
            ExecutionOutcome::Idle => break,
            ExecutionOutcome::Completed(id) => println!("COMPLETED {} {id}", kind(id)),
            ExecutionOutcome::Cancelled(id) => println!("CANCELLED {} {id}", kind(id)),
            ExecutionOutcome::Failed { id, error } => {
                println!("FAILED {} {id}: {error}", kind(id));
            }
            // Nothing else claims in this process; a failed task stays
            // PROCESSING only if the store could not record the failure.
            ExecutionOutcome::Busy | ExecutionOutcome::ClaimConflict(_) => {
                tracing::warn!(?outcome, "executor did not claim, stopping");
                break;
            }
        }
    }

    let snapshot = engine.warehouse_snapshot().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_grid(&snapshot);
    }
    tracing::debug!(commands = ?device.commands().await, "simulated controller log");
    engine.shutdown().await;
    Ok(())
}

fn print_grid(snapshot: &WarehouseSnapshot) {
    let mut rows: Vec<(u8, Vec<String>)> = Vec::new();
    for view in &snapshot.cells {
        let mark = match view.display_status {
            CellStatus::Occupied => "X",
            CellStatus::Empty => ".",
            CellStatus::Reserved => "R",
            CellStatus::Maintenance => "M",
        };
        match rows.last_mut() {
            Some((row, marks)) if *row == view.cell.coord.row => marks.push(mark.to_string()),
            _ => rows.push((view.cell.coord.row, vec![mark.to_string()])),
        }
    }
    for (row, marks) in rows {
        println!("R{row} {}", marks.join(" "));
    }
    let zone = if snapshot.loading_zone.is_occupied() {
        "occupied"
    } else {
        "empty"
    };
    println!("loading zone: {zone}");
}
