use std::time::Duration;

use serde::{Deserialize, Serialize};
use stockyard_model::{GridDims, StorageStrategy, TaskKind};

/// Knobs that tune the engine.
///
/// Every field carries a default so deployments only spell out what they
/// change; a bare `[engine]` table is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Placement policy in effect until the controller or an operator changes it.
    pub storage_strategy: StorageStrategy,
    /// Auto-mode processor cadence.
    pub processor: ProcessorConfig,
    /// Command and wait timings for the controller link.
    pub device: DeviceTimings,
    /// Occupancy filter and reconciliation thresholds.
    pub occupancy: OccupancyConfig,
    /// Which task kinds are disabled or require proof of execution.
    pub tasks: TaskPolicy,
    /// Rack dimensions.
    pub grid: GridDims,
    /// In-process event fan-out.
    pub events: EventsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Re-check cadence while auto mode is off or another task is running.
    pub poll_interval_ms: u64,
    /// Delay after finding no pending task.
    pub idle_interval_ms: u64,
    /// Delay after a store error before polling again.
    pub error_backoff_ms: u64,
    /// Delay after an attempt before trying the next task.
    pub rearm_delay_ms: u64,
    /// Start with auto mode enabled.
    pub auto_mode: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            idle_interval_ms: 3_000,
            error_backoff_ms: 5_000,
            rearm_delay_ms: 200,
            auto_mode: false,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(self.rearm_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTimings {
    /// Per-command transport timeout.
    pub command_timeout_ms: u64,
    /// Fallback re-check cadence for waits when no telemetry arrives.
    pub poll_interval_ms: u64,
    /// Clock skew accepted when comparing telemetry to a wait baseline.
    pub freshness_tolerance_ms: u64,
    /// Readiness wait after `HOME` inside handlers.
    pub ready_timeout_ms: u64,
    /// Readiness barrier the executor applies after every handler.
    pub barrier_timeout_ms: u64,
    /// Single pick or drop.
    pub action_timeout_ms: u64,
    /// Pick-and-place moves and direct loading-zone moves.
    pub move_timeout_ms: u64,
    /// Loading zone back into a cell.
    pub return_timeout_ms: u64,
    /// Budget per item when stocking from the conveyor.
    pub stock_item_timeout_ms: u64,
    /// Floor for the whole stocking run.
    pub stock_min_timeout_ms: u64,
    /// Pause between reorganization moves.
    pub settle_delay_ms: u64,
}

impl Default for DeviceTimings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 10_000,
            poll_interval_ms: 200,
            freshness_tolerance_ms: 50,
            ready_timeout_ms: 60_000,
            barrier_timeout_ms: 120_000,
            action_timeout_ms: 60_000,
            move_timeout_ms: 120_000,
            return_timeout_ms: 90_000,
            stock_item_timeout_ms: 120_000,
            stock_min_timeout_ms: 90_000,
            settle_delay_ms: 500,
        }
    }
}

impl DeviceTimings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn freshness_tolerance(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.freshness_tolerance_ms).unwrap_or(i64::MAX))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn return_timeout(&self) -> Duration {
        Duration::from_millis(self.return_timeout_ms)
    }

    /// Whole-run budget for stocking `quantity` items.
    pub fn stock_timeout(&self, quantity: u32) -> Duration {
        let per_item = self.stock_item_timeout_ms.saturating_mul(u64::from(quantity));
        Duration::from_millis(per_item.max(self.stock_min_timeout_ms))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    /// A False reading within this window of the last True is read as True.
    pub hold_window_ms: u64,
    /// Consecutive differing readings needed to flip the confirmed state.
    pub confirm_threshold: u8,
    /// Consecutive raw-False reports that clear a persisted OCCUPIED cell.
    pub clear_threshold: u8,
    /// Saturation point of the raw-False counter.
    pub false_count_cap: u8,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            hold_window_ms: 4_000,
            confirm_threshold: 3,
            clear_threshold: 2,
            false_count_cap: 10,
        }
    }
}

impl OccupancyConfig {
    pub fn hold_window(&self) -> Duration {
        Duration::from_millis(self.hold_window_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPolicy {
    /// Kinds cancelled and removed when they reach the head of the queue.
    pub retired_kinds: Vec<TaskKind>,
    /// Kinds that must show fresh telemetry before they may complete.
    pub device_driven_kinds: Vec<TaskKind>,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            retired_kinds: Vec::new(),
            device_driven_kinds: TaskKind::ALL
                .into_iter()
                .filter(TaskKind::moves_hardware)
                .collect(),
        }
    }
}

impl TaskPolicy {
    pub fn is_retired(&self, kind: TaskKind) -> bool {
        self.retired_kinds.contains(&kind)
    }

    pub fn is_device_driven(&self, kind: TaskKind) -> bool {
        self.device_driven_kinds.contains(&kind)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast buffer; slow subscribers lag past this many events.
    pub channel_capacity: usize,
    /// Minimum gap between warehouse snapshots triggered by telemetry.
    pub snapshot_min_gap_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            snapshot_min_gap_ms: 500,
        }
    }
}

impl EventsConfig {
    pub fn snapshot_min_gap(&self) -> Duration {
        Duration::from_millis(self.snapshot_min_gap_ms)
    }
}
