//! Persisted inventory: cells, the loading zone, products and the location
//! audit trail.
//!
//! The engine only ever performs single narrow writes through this trait and
//! never holds a lock across a device wait.

mod memory;

pub use memory::MemoryInventory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockyard_model::{
    Cell, CellContents, CellCoord, CellStatus, LoadingZone, ProductId, ProductLocationEntry,
    ProductRef,
};

use crate::error::Result;

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// All cells in row-major order.
    async fn cells(&self) -> Result<Vec<Cell>>;

    async fn cell(&self, coord: CellCoord) -> Result<Cell>;

    /// First cell (row-major) holding `product`.
    async fn find_product(&self, product: ProductId) -> Result<Option<Cell>>;

    /// Overwrite status and contents of one cell.
    async fn put_cell(&self, cell: Cell) -> Result<()>;

    /// Conditionally clear a cell that is still OCCUPIED. Returns whether a
    /// write happened.
    async fn clear_if_occupied(&self, coord: CellCoord) -> Result<bool>;

    /// Move the contents of `from` into `to` as one write, leaving `from`
    /// EMPTY. Fails without changing anything when `from` holds no product.
    /// Returns the stored `(from, to)` cells.
    async fn move_contents(&self, from: CellCoord, to: CellCoord) -> Result<(Cell, Cell)>;

    async fn loading_zone(&self) -> Result<LoadingZone>;

    async fn set_loading_zone(&self, contents: Option<CellContents>) -> Result<()>;

    /// Resolve a product by RFID, registering it when first seen.
    async fn ensure_product(&self, rfid: &str) -> Result<ProductRef>;

    async fn product(&self, id: ProductId) -> Result<Option<ProductRef>>;

    async fn append_location(&self, entry: ProductLocationEntry) -> Result<()>;

    async fn locations(&self) -> Result<Vec<ProductLocationEntry>>;
}

/// A cell as shown to observers: the authoritative record plus what the
/// sensors currently suggest. Display fields never feed back into storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellView {
    #[serde(flatten)]
    pub cell: Cell,
    pub display_status: CellStatus,
    pub sensor_occupied: bool,
    /// Debounced sensor state, once the cell has been observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_occupied: Option<bool>,
}

impl CellView {
    /// View with no sensor opinion.
    pub fn plain(cell: Cell) -> Self {
        Self {
            display_status: cell.status,
            sensor_occupied: cell.status == CellStatus::Occupied,
            confirmed_occupied: None,
            cell,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarehouseSnapshot {
    pub cells: Vec<CellView>,
    pub loading_zone: LoadingZone,
    pub taken_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub total_cells: usize,
    pub occupied_cells: usize,
    pub empty_cells: usize,
    pub reserved_cells: usize,
    pub maintenance_cells: usize,
    pub loading_zone_occupied: bool,
    pub conveyor_has_product: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryReport {
    pub generated_at: DateTime<Utc>,
    pub cells: Vec<Cell>,
    pub loading_zone: LoadingZone,
    pub summary: InventorySummary,
}

impl InventoryReport {
    pub fn build(cells: Vec<Cell>, loading_zone: LoadingZone, conveyor_has_product: bool) -> Self {
        let count = |status: CellStatus| cells.iter().filter(|c| c.status == status).count();
        let summary = InventorySummary {
            total_cells: cells.len(),
            occupied_cells: count(CellStatus::Occupied),
            empty_cells: count(CellStatus::Empty),
            reserved_cells: count(CellStatus::Reserved),
            maintenance_cells: count(CellStatus::Maintenance),
            loading_zone_occupied: loading_zone.is_occupied(),
            conveyor_has_product,
        };
        Self {
            generated_at: Utc::now(),
            cells,
            loading_zone,
            summary,
        }
    }
}
