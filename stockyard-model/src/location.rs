use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::CellCoord;
use crate::ids::{ProductId, TaskId};

/// Where a product was last seen.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationStatus {
    InCell,
    InLoadingZone,
    OnConveyor,
}

/// Append-only audit entry written whenever a product changes place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductLocationEntry {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfid_uid: Option<String>,
    pub status: LocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<CellCoord>,
    /// Free-form reason (`STOCKED`, `REORGANIZED`, ...).
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub recorded_at: DateTime<Utc>,
}

impl ProductLocationEntry {
    pub fn in_cell(product_id: ProductId, cell: CellCoord, action: impl Into<String>) -> Self {
        Self {
            product_id,
            rfid_uid: None,
            status: LocationStatus::InCell,
            cell: Some(cell),
            action: action.into(),
            task_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn in_loading_zone(product_id: ProductId) -> Self {
        Self {
            product_id,
            rfid_uid: None,
            status: LocationStatus::InLoadingZone,
            cell: None,
            action: "IN_LOADING_ZONE".to_string(),
            task_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_rfid(mut self, rfid: Option<String>) -> Self {
        self.rfid_uid = rfid;
        self
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}
