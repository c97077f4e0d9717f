//! Shared harness for engine integration tests: an engine wired to the
//! simulated controller and an in-memory inventory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stockyard_core::device::SimulatedDevice;
use stockyard_core::inventory::MemoryInventory;
use stockyard_core::{EngineConfig, WarehouseEngine};
use stockyard_model::{CellCoord, ProductId, ProductRef};

pub struct Harness {
    pub engine: Arc<WarehouseEngine>,
    pub device: SimulatedDevice,
    pub inventory: Arc<MemoryInventory>,
    /// Products seeded into `stored` cells, in the same order.
    pub products: Vec<ProductId>,
}

/// Build an engine whose inventory and simulated sensors agree on `stored`.
pub async fn harness(stored: &[CellCoord]) -> Harness {
    harness_with(EngineConfig::default(), stored, stored).await
}

/// Like [`harness`] but the simulated sensors may disagree with the records.
pub async fn harness_with(
    config: EngineConfig,
    recorded: &[CellCoord],
    sensed: &[CellCoord],
) -> Harness {
    let (device, reports) = SimulatedDevice::builder(config.grid)
        .with_step(Duration::from_millis(100))
        .with_occupied(sensed.iter().copied())
        .build();

    let inventory = Arc::new(MemoryInventory::new(config.grid));
    let mut products = Vec::new();
    for (i, coord) in recorded.iter().enumerate() {
        let product = ProductRef::new(ProductId::new())
            .with_rfid(format!("TAG-{i}"))
            .with_name(format!("Product {i}"));
        products.push(product.id);
        inventory.seed(*coord, product).await.unwrap();
    }

    let engine = Arc::new(
        WarehouseEngine::builder(config)
            .with_transport(Arc::new(device.clone()))
            .with_inventory(inventory.clone())
            .build()
            .unwrap(),
    );
    engine.spawn_telemetry_pump(reports).await;

    Harness {
        engine,
        device,
        inventory,
        products,
    }
}

/// Let queued telemetry reach the engine. Under a paused clock the sleep
/// only completes once every other task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Push one report from the simulator and wait for it to be ingested.
pub async fn heartbeat(harness: &Harness) {
    harness.device.heartbeat().await;
    settle().await;
}
