//! Device telemetry as it arrives on the wire and as the engine stores it.
//!
//! The controller firmware is loose about shapes: the occupancy matrix may be
//! a nested array or a list of `{row, col, occupied}` entries, and string
//! fields may be missing entirely. [`TelemetryReport::into_snapshot`] absorbs
//! all of that so nothing downstream sees a partial report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::grid::{CellCoord, GridDims};
use crate::strategy::StorageStrategy;

/// Conveyor belt state as reported by the controller.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConveyorState {
    #[default]
    Idle,
    Running,
    Stopped,
    #[serde(untagged)]
    Other(String),
}

impl ConveyorState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "IDLE" => ConveyorState::Idle,
            "RUNNING" | "MOVING" => ConveyorState::Running,
            "STOPPED" => ConveyorState::Stopped,
            other => ConveyorState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ConveyorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConveyorState::Idle => write!(f, "IDLE"),
            ConveyorState::Running => write!(f, "RUNNING"),
            ConveyorState::Stopped => write!(f, "STOPPED"),
            ConveyorState::Other(raw) => f.write_str(raw),
        }
    }
}

/// Raw per-cell occupancy as the IR sensors reported it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OccupancyMatrix {
    pub rows: u8,
    pub cols: u8,
    cells: Vec<bool>,
}

impl OccupancyMatrix {
    pub fn empty(dims: GridDims) -> Self {
        Self {
            rows: dims.rows,
            cols: dims.cols,
            cells: vec![false; dims.cell_count()],
        }
    }

    pub fn dims(&self) -> GridDims {
        GridDims {
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Reading for a 1-based coordinate. Out-of-grid reads as unoccupied.
    pub fn get(&self, coord: CellCoord) -> bool {
        if !self.dims().contains(coord) {
            return false;
        }
        let (r, c) = coord.index();
        self.cells[r * usize::from(self.cols) + c]
    }

    pub fn set(&mut self, coord: CellCoord, occupied: bool) {
        if !self.dims().contains(coord) {
            return;
        }
        let (r, c) = coord.index();
        self.cells[r * usize::from(self.cols) + c] = occupied;
    }

    /// Accepts either a `rows x cols` nested array of truthy values or a list
    /// of 1-based `{row, col, occupied}` objects. Anything else yields an
    /// all-false grid.
    pub fn from_json_value(value: Option<&Value>, dims: GridDims) -> Self {
        let mut matrix = Self::empty(dims);
        let Some(Value::Array(items)) = value else {
            return matrix;
        };

        let nested = items.len() == usize::from(dims.rows)
            && items.first().is_some_and(Value::is_array);
        if nested {
            for (r, row) in items.iter().enumerate() {
                let Some(row) = row.as_array() else { continue };
                for c in 0..usize::from(dims.cols) {
                    let occupied = row.get(c).is_some_and(truthy);
                    // r and c are bounded by the u8 dimensions
                    matrix.set(CellCoord::new(r as u8 + 1, c as u8 + 1), occupied);
                }
            }
            return matrix;
        }

        if items.first().is_some_and(Value::is_object) {
            for item in items {
                let row = item.get("row").and_then(number_field);
                let col = item.get("col").and_then(number_field);
                if let (Some(row), Some(col)) = (row, col) {
                    let occupied = item.get("occupied").is_some_and(truthy);
                    matrix.set(CellCoord::new(row, col), occupied);
                }
            }
        }
        matrix
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellCoord, bool)> + '_ {
        self.dims().coords().map(move |coord| (coord, self.get(coord)))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn number_field(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One telemetry report as posted by the controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    #[serde(default)]
    pub ldr1: bool,
    #[serde(default)]
    pub ldr2: bool,
    #[serde(default)]
    pub rfid: Option<String>,
    #[serde(default)]
    pub conveyor_state: Option<String>,
    #[serde(default)]
    pub arm_status: Option<String>,
    #[serde(default)]
    pub current_operation: Option<String>,
    #[serde(default)]
    pub loading_zone_occupied: bool,
    #[serde(default)]
    pub storage_strategy: Option<String>,
    #[serde(default)]
    pub cells: Option<Value>,
    #[serde(default)]
    pub target_cell: Option<String>,
}

impl TelemetryReport {
    /// Normalise into a stored snapshot stamped with `received_at`.
    pub fn into_snapshot(self, dims: GridDims, received_at: DateTime<Utc>) -> TelemetrySnapshot {
        let occupancy = OccupancyMatrix::from_json_value(self.cells.as_ref(), dims);
        TelemetrySnapshot {
            ldr1: self.ldr1,
            ldr2: self.ldr2,
            rfid: self.rfid.filter(|tag| !tag.trim().is_empty()),
            conveyor_state: self
                .conveyor_state
                .as_deref()
                .map(ConveyorState::parse)
                .unwrap_or_default(),
            arm_status: self
                .arm_status
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "READY".to_string()),
            operation: self.current_operation.unwrap_or_default(),
            loading_zone_occupied: self.loading_zone_occupied,
            storage_strategy: self
                .storage_strategy
                .as_deref()
                .and_then(StorageStrategy::normalize),
            occupancy,
            target_cell: self.target_cell.filter(|s| !s.trim().is_empty()),
            received_at: Some(received_at),
            sequence: 0,
            operation_changes: 0,
        }
    }
}

/// Latest normalised device state. Replaced wholesale on every report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub ldr1: bool,
    pub ldr2: bool,
    pub rfid: Option<String>,
    pub conveyor_state: ConveyorState,
    pub arm_status: String,
    /// Operation tag, the primary progress signal.
    pub operation: String,
    pub loading_zone_occupied: bool,
    pub storage_strategy: Option<StorageStrategy>,
    pub occupancy: OccupancyMatrix,
    pub target_cell: Option<String>,
    /// `None` until the first report arrives.
    pub received_at: Option<DateTime<Utc>>,
    /// Arrival counter assigned by the telemetry store; 0 before any report.
    #[serde(default)]
    pub sequence: u64,
    /// How many arrivals so far carried a different operation tag than the
    /// one before them. Also assigned by the telemetry store.
    #[serde(default)]
    pub operation_changes: u64,
}

impl TelemetrySnapshot {
    /// State before any report has been received.
    pub fn initial(dims: GridDims) -> Self {
        Self {
            ldr1: false,
            ldr2: false,
            rfid: None,
            conveyor_state: ConveyorState::Idle,
            arm_status: "READY".to_string(),
            operation: String::new(),
            loading_zone_occupied: false,
            storage_strategy: None,
            occupancy: OccupancyMatrix::empty(dims),
            target_cell: None,
            received_at: None,
            sequence: 0,
            operation_changes: 0,
        }
    }

    /// Arm reports it can take a new command.
    pub fn arm_ready(&self) -> bool {
        let status = self.arm_status.to_ascii_uppercase();
        status.contains("READY") || status.contains("IDLE")
    }

    pub fn product_on_conveyor(&self) -> bool {
        self.ldr1 || self.ldr2
    }

    /// Cell named in `target_cell`. The firmware sends column first, in
    /// forms like `C2:R1`, `2 1` or `2,1`.
    pub fn parsed_target_cell(&self) -> Option<CellCoord> {
        let raw = self.target_cell.as_deref()?;
        let mut numbers = raw
            .split(|ch: char| !ch.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse::<u8>().ok());
        let col = numbers.next()?;
        let row = numbers.next()?;
        Some(CellCoord::new(row, col))
    }

    /// RFID carried after `marker:` in the operation tag, falling back to the
    /// last scanned tag.
    pub fn tagged_rfid(&self, marker: &str) -> Option<String> {
        let idx = self.operation.find(marker)?;
        let suffix = self.operation[idx + marker.len()..]
            .trim_start_matches(':')
            .trim();
        if suffix.is_empty() {
            self.rfid.clone()
        } else {
            Some(suffix.to_string())
        }
    }
}
