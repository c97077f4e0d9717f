//! State-delta notifications pushed to observers.
//!
//! Delivery is best-effort: a publish never fails because nobody is
//! listening, and slow subscribers see `Lagged` rather than back-pressuring
//! the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stockyard_model::{LoadingZone, StorageStrategy, TaskRecord, TelemetrySnapshot};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::inventory::{CellView, InventoryReport, WarehouseSnapshot};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TaskUpdated { task: TaskRecord },
    CellUpdated { cell: CellView },
    LoadingZoneUpdated { zone: LoadingZone },
    SensorUpdated { snapshot: TelemetrySnapshot },
    WarehouseSnapshot { snapshot: WarehouseSnapshot },
    StrategyChanged { strategy: StorageStrategy },
    InventoryReport { report: InventoryReport },
    AutoModeChanged { enabled: bool },
}

impl EngineEvent {
    pub fn task(task: &TaskRecord) -> Self {
        EngineEvent::TaskUpdated { task: task.clone() }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EngineEvent) -> Result<()>;
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Debug)]
pub struct InProcEventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for InProcEventBus {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Lets callers hold an event source without naming the concrete bus.
pub trait EventStream {
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent>;
}

impl EventStream for InProcEventBus {
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InProcEventBus::new(4);
        bus.publish(EngineEvent::AutoModeChanged { enabled: true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = InProcEventBus::new(4);
        let mut rx = bus.subscribe_events();
        bus.publish(EngineEvent::AutoModeChanged { enabled: true })
            .await
            .unwrap();
        bus.publish(EngineEvent::StrategyChanged {
            strategy: StorageStrategy::Fixed,
        })
        .await
        .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::AutoModeChanged { enabled: true }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::StrategyChanged {
                strategy: StorageStrategy::Fixed
            }
        ));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(EngineEvent::AutoModeChanged { enabled: false }).unwrap();
        assert_eq!(value["type"], "auto_mode_changed");
        assert_eq!(value["enabled"], false);
    }
}
