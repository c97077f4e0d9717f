use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::grid::CellCoord;
use crate::ids::ProductId;

/// Authoritative occupancy of a storage cell.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellStatus {
    Empty,
    Occupied,
    Reserved,
    Maintenance,
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellStatus::Empty => write!(f, "EMPTY"),
            CellStatus::Occupied => write!(f, "OCCUPIED"),
            CellStatus::Reserved => write!(f, "RESERVED"),
            CellStatus::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// Product identity plus the display fields cached alongside it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfid_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ProductRef {
    pub fn new(id: ProductId) -> Self {
        Self {
            id,
            rfid_uid: None,
            name: None,
        }
    }

    pub fn with_rfid(mut self, rfid: impl Into<String>) -> Self {
        self.rfid_uid = Some(rfid.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// What physically sits in a cell or in the loading zone.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellContents {
    pub product: ProductRef,
    pub quantity: u32,
}

impl CellContents {
    pub fn single(product: ProductRef) -> Self {
        Self {
            product,
            quantity: 1,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product.id
    }
}

/// Persisted record for one storage cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cell {
    pub coord: CellCoord,
    pub status: CellStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<CellContents>,
    pub updated_at: DateTime<Utc>,
}

impl Cell {
    pub fn empty(coord: CellCoord) -> Self {
        Self {
            coord,
            status: CellStatus::Empty,
            contents: None,
            updated_at: Utc::now(),
        }
    }

    pub fn occupied(coord: CellCoord, contents: CellContents) -> Self {
        Self {
            coord,
            status: CellStatus::Occupied,
            contents: Some(contents),
            updated_at: Utc::now(),
        }
    }

    pub fn label(&self) -> String {
        self.coord.to_string()
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.contents.as_ref().map(CellContents::product_id)
    }

    /// Occupied with a known product; the only state a move can start from.
    pub fn holds_product(&self) -> bool {
        self.status == CellStatus::Occupied && self.contents.is_some()
    }
}

/// The single hand-off slot between the arm and the operator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadingZone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<CellContents>,
    pub updated_at: DateTime<Utc>,
}

impl Default for LoadingZone {
    fn default() -> Self {
        Self {
            contents: None,
            updated_at: Utc::now(),
        }
    }
}

impl LoadingZone {
    pub fn is_occupied(&self) -> bool {
        self.contents.is_some()
    }
}
