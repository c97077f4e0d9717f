//! Core data model definitions shared across Stockyard crates.
//!
//! Everything here is plain data: identifiers, the task envelope and its
//! validated payloads, grid cells, device telemetry, and the audit records the
//! engine appends when products move. Behaviour lives in `stockyard-core`.

pub mod cell;
pub mod error;
pub mod grid;
pub mod ids;
pub mod location;
pub mod strategy;
pub mod task;
pub mod telemetry;

pub use cell::{Cell, CellContents, CellStatus, LoadingZone, ProductRef};
pub use error::{ModelError, Result as ModelResult};
pub use grid::{CellCoord, GRID_COLS, GRID_ROWS, GridDims, ScanOrder};
pub use ids::{ProductId, TaskId};
pub use location::{LocationStatus, ProductLocationEntry};
pub use strategy::StorageStrategy;
pub use task::{
    LoadReturnTask, MoveToLoadingTask, ReorganizeTask, RetrieveTarget,
    RetrieveToLoadingTask, StockFromConveyorTask, TaskKind, TaskPayload,
    TaskPriority, TaskProgress, TaskRecord, TaskRequest, TaskStatus,
};
pub use telemetry::{
    ConveyorState, OccupancyMatrix, TelemetryReport, TelemetrySnapshot,
};
