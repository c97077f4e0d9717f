use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use stockyard_model::{
    Cell, CellContents, CellCoord, CellStatus, GridDims, LoadingZone, ProductId,
    ProductLocationEntry, ProductRef,
};
use tokio::sync::Mutex;

use super::InventoryStore;
use crate::error::{EngineError, Result};

#[derive(Debug, Default)]
struct Tables {
    cells: HashMap<CellCoord, Cell>,
    loading_zone: LoadingZone,
    products: HashMap<ProductId, ProductRef>,
    locations: Vec<ProductLocationEntry>,
}

/// Process-local inventory used by tests and the simulator.
#[derive(Debug)]
pub struct MemoryInventory {
    dims: GridDims,
    tables: Mutex<Tables>,
}

impl MemoryInventory {
    /// Every cell of the grid starts EMPTY.
    pub fn new(dims: GridDims) -> Self {
        let cells = dims.coords().map(|coord| (coord, Cell::empty(coord))).collect();
        Self {
            dims,
            tables: Mutex::new(Tables {
                cells,
                ..Tables::default()
            }),
        }
    }

    /// Seed a cell as OCCUPIED with `product`, registering the product.
    pub async fn seed(&self, coord: CellCoord, product: ProductRef) -> Result<()> {
        let coord = self.dims.check(coord)?;
        let mut tables = self.tables.lock().await;
        tables.products.insert(product.id, product.clone());
        tables
            .cells
            .insert(coord, Cell::occupied(coord, CellContents::single(product)));
        Ok(())
    }

    /// Mark a cell with a non-storage status such as MAINTENANCE.
    pub async fn set_status(&self, coord: CellCoord, status: CellStatus) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let cell = tables
            .cells
            .get_mut(&coord)
            .ok_or_else(|| EngineError::NotFound(format!("cell {coord}")))?;
        cell.status = status;
        cell.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn cells(&self) -> Result<Vec<Cell>> {
        let tables = self.tables.lock().await;
        Ok(self
            .dims
            .coords()
            .filter_map(|coord| tables.cells.get(&coord).cloned())
            .collect())
    }

    async fn cell(&self, coord: CellCoord) -> Result<Cell> {
        self.tables
            .lock()
            .await
            .cells
            .get(&coord)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("cell {coord}")))
    }

    async fn find_product(&self, product: ProductId) -> Result<Option<Cell>> {
        let tables = self.tables.lock().await;
        Ok(self
            .dims
            .coords()
            .filter_map(|coord| tables.cells.get(&coord))
            .find(|cell| cell.holds_product() && cell.product_id() == Some(product))
            .cloned())
    }

    async fn put_cell(&self, mut cell: Cell) -> Result<()> {
        let coord = self.dims.check(cell.coord)?;
        let mut tables = self.tables.lock().await;
        if let Some(contents) = &cell.contents {
            tables
                .products
                .entry(contents.product.id)
                .or_insert_with(|| contents.product.clone());
        }
        cell.updated_at = Utc::now();
        tables.cells.insert(coord, cell);
        Ok(())
    }

    async fn clear_if_occupied(&self, coord: CellCoord) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.cells.get_mut(&coord) {
            Some(cell) if cell.status == CellStatus::Occupied => {
                cell.status = CellStatus::Empty;
                cell.contents = None;
                cell.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::NotFound(format!("cell {coord}"))),
        }
    }

    async fn move_contents(&self, from: CellCoord, to: CellCoord) -> Result<(Cell, Cell)> {
        let from = self.dims.check(from)?;
        let to = self.dims.check(to)?;
        let mut tables = self.tables.lock().await;
        let contents = tables
            .cells
            .get(&from)
            .filter(|cell| cell.holds_product())
            .and_then(|cell| cell.contents.clone())
            .ok_or_else(|| EngineError::NotFound(format!("product in cell {from}")))?;

        let source = Cell::empty(from);
        let target = Cell::occupied(to, contents);
        tables.cells.insert(from, source.clone());
        tables.cells.insert(to, target.clone());
        Ok((source, target))
    }

    async fn loading_zone(&self) -> Result<LoadingZone> {
        Ok(self.tables.lock().await.loading_zone.clone())
    }

    async fn set_loading_zone(&self, contents: Option<CellContents>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.loading_zone = LoadingZone {
            contents,
            updated_at: Utc::now(),
        };
        Ok(())
    }

    async fn ensure_product(&self, rfid: &str) -> Result<ProductRef> {
        let rfid = rfid.trim();
        if rfid.is_empty() {
            return Err(EngineError::InvalidPayload("empty rfid tag".into()));
        }
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables
            .products
            .values()
            .find(|p| p.rfid_uid.as_deref() == Some(rfid))
        {
            return Ok(existing.clone());
        }
        let product = ProductRef::new(ProductId::new())
            .with_rfid(rfid)
            .with_name(format!("RFID {rfid}"));
        tables.products.insert(product.id, product.clone());
        tracing::info!(rfid, product_id = %product.id, "registered product from rfid");
        Ok(product)
    }

    async fn product(&self, id: ProductId) -> Result<Option<ProductRef>> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn append_location(&self, entry: ProductLocationEntry) -> Result<()> {
        self.tables.lock().await.locations.push(entry);
        Ok(())
    }

    async fn locations(&self) -> Result<Vec<ProductLocationEntry>> {
        Ok(self.tables.lock().await.locations.clone())
    }
}
