//! Task orchestration and hardware-state synchronization for a robotic
//! storage grid.
//!
//! The controller is reachable only through fire-and-forget text commands and
//! a telemetry stream. [`WarehouseEngine`] ties the pieces together:
//!
//! - [`telemetry::TelemetryStore`] holds the latest snapshot and wakes waiters.
//! - [`device::DeviceLink`] issues commands and waits for *fresh* telemetry.
//! - [`occupancy::OccupancyReconciler`] debounces the occupancy sensors and
//!   demotes records the sensors contradict.
//! - Placements and loading-zone changes the controller announces on its own
//!   are applied while each report is ingested.
//! - [`tasks`] holds the single-flight executor, per-kind handlers, the
//!   reorganization planner and the auto-mode processor loop.
//! - [`events`] fans state deltas out to observers.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod inventory;
pub mod occupancy;
pub mod tasks;
pub mod telemetry;
mod tracking;

pub use config::EngineConfig;
pub use engine::{CellAction, WarehouseEngine, WarehouseEngineBuilder};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventPublisher, EventStream, InProcEventBus};
pub use tasks::ExecutionOutcome;
