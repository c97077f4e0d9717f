//! Grid geometry: coordinates, dimensions, and canonical scan orders.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{ModelError, Result};

/// Rows in the physical storage rack.
pub const GRID_ROWS: u8 = 3;
/// Columns in the physical storage rack.
pub const GRID_COLS: u8 = 4;

/// 1-based `(row, col)` address of a storage cell.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u8,
    pub col: u8,
}

impl CellCoord {
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    /// Zero-based `(row, col)` indices into an occupancy matrix.
    pub fn index(&self) -> (usize, usize) {
        (
            usize::from(self.row.saturating_sub(1)),
            usize::from(self.col.saturating_sub(1)),
        )
    }

    /// Device commands address cells column first.
    pub fn device_args(&self) -> String {
        format!("{} {}", self.col, self.row)
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}C{}", self.row, self.col)
    }
}

/// Rack dimensions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDims {
    pub rows: u8,
    pub cols: u8,
}

impl Default for GridDims {
    fn default() -> Self {
        Self {
            rows: GRID_ROWS,
            cols: GRID_COLS,
        }
    }
}

impl GridDims {
    pub fn contains(&self, coord: CellCoord) -> bool {
        (1..=self.rows).contains(&coord.row) && (1..=self.cols).contains(&coord.col)
    }

    pub fn check(&self, coord: CellCoord) -> Result<CellCoord> {
        if self.contains(coord) {
            Ok(coord)
        } else {
            Err(ModelError::OutOfGrid {
                row: coord.row,
                col: coord.col,
                rows: self.rows,
                cols: self.cols,
            })
        }
    }

    pub fn cell_count(&self) -> usize {
        usize::from(self.rows) * usize::from(self.cols)
    }

    /// Every coordinate in row-major order.
    pub fn coords(self) -> impl Iterator<Item = CellCoord> {
        (1..=self.rows).flat_map(move |row| (1..=self.cols).map(move |col| CellCoord::new(row, col)))
    }
}

/// Canonical order used when compacting the rack.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOrder {
    #[default]
    RowMajor,
    ColumnMajor,
}

impl ScanOrder {
    /// Lenient parse used for loosely typed task parameters: anything
    /// mentioning "ROW" is row-major, anything mentioning "COL" column-major.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.contains("ROW") {
            Some(ScanOrder::RowMajor)
        } else if upper.contains("COL") {
            Some(ScanOrder::ColumnMajor)
        } else {
            None
        }
    }

    pub fn compare(&self, a: &CellCoord, b: &CellCoord) -> Ordering {
        match self {
            ScanOrder::RowMajor => (a.row, a.col).cmp(&(b.row, b.col)),
            ScanOrder::ColumnMajor => (a.col, a.row).cmp(&(b.col, b.row)),
        }
    }
}
