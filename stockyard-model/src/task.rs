use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, Result};
use crate::grid::{CellCoord, GridDims, ScanOrder};
use crate::ids::{ProductId, TaskId};
use crate::strategy::StorageStrategy;

/// Priority bands. Declaration order doubles as drain order: the queue
/// always takes the greatest priority first.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "LOW"),
            TaskPriority::Medium => write!(f, "MEDIUM"),
            TaskPriority::High => write!(f, "HIGH"),
            TaskPriority::Urgent => write!(f, "URGENT"),
        }
    }
}

impl FromStr for TaskPriority {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            "URGENT" => Ok(TaskPriority::Urgent),
            other => Err(ModelError::InvalidPriority(other.to_string())),
        }
    }
}

/// Lifecycle states. Only the executor moves a task out of `Pending`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Processing => write!(f, "PROCESSING"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Distinguishes the handlers the executor can dispatch to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    StockFromConveyor,
    RetrieveToLoading,
    MoveToLoading,
    InventoryCheck,
    ReorganizeWarehouse,
    LoadReturn,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::StockFromConveyor,
        TaskKind::RetrieveToLoading,
        TaskKind::MoveToLoading,
        TaskKind::InventoryCheck,
        TaskKind::ReorganizeWarehouse,
        TaskKind::LoadReturn,
    ];

    /// Resolves the producer-facing type string, including the short legacy
    /// aliases (`STOCK`, `RETRIEVE`, `MOVE`, `ORGANIZE`).
    pub fn from_type_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOCK" | "STOCK_FROM_CONVEYOR" => Ok(TaskKind::StockFromConveyor),
            "RETRIEVE" | "RETRIEVE_TO_LOADING" => Ok(TaskKind::RetrieveToLoading),
            "MOVE" | "MOVE_TO_LOADING" => Ok(TaskKind::MoveToLoading),
            "INVENTORY_CHECK" => Ok(TaskKind::InventoryCheck),
            "ORGANIZE" | "REORGANIZE_WAREHOUSE" => Ok(TaskKind::ReorganizeWarehouse),
            "LOAD_RETURN" => Ok(TaskKind::LoadReturn),
            other => Err(ModelError::InvalidTaskType(other.to_string())),
        }
    }

    /// Kinds that physically move the arm or conveyor.
    pub fn moves_hardware(&self) -> bool {
        !matches!(self, TaskKind::InventoryCheck)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::StockFromConveyor => "STOCK_FROM_CONVEYOR",
            TaskKind::RetrieveToLoading => "RETRIEVE_TO_LOADING",
            TaskKind::MoveToLoading => "MOVE_TO_LOADING",
            TaskKind::InventoryCheck => "INVENTORY_CHECK",
            TaskKind::ReorganizeWarehouse => "REORGANIZE_WAREHOUSE",
            TaskKind::LoadReturn => "LOAD_RETURN",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload per task kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum TaskPayload {
    StockFromConveyor(StockFromConveyorTask),
    RetrieveToLoading(RetrieveToLoadingTask),
    MoveToLoading(MoveToLoadingTask),
    InventoryCheck,
    ReorganizeWarehouse(ReorganizeTask),
    LoadReturn(LoadReturnTask),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::StockFromConveyor(_) => TaskKind::StockFromConveyor,
            TaskPayload::RetrieveToLoading(_) => TaskKind::RetrieveToLoading,
            TaskPayload::MoveToLoading(_) => TaskKind::MoveToLoading,
            TaskPayload::InventoryCheck => TaskKind::InventoryCheck,
            TaskPayload::ReorganizeWarehouse(_) => TaskKind::ReorganizeWarehouse,
            TaskPayload::LoadReturn(_) => TaskKind::LoadReturn,
        }
    }

    /// Cell the task is about, when it names one.
    pub fn cell(&self) -> Option<CellCoord> {
        match self {
            TaskPayload::RetrieveToLoading(RetrieveToLoadingTask {
                target: RetrieveTarget::Cell(cell),
            }) => Some(*cell),
            TaskPayload::MoveToLoading(job) => Some(job.cell),
            TaskPayload::LoadReturn(job) => job.return_to,
            _ => None,
        }
    }
}

/// Pull `quantity` items off the conveyor and let the controller place them.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StockFromConveyorTask {
    pub quantity: u32,
}

/// Source of a retrieval: an explicit cell or the first cell holding a product.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieveTarget {
    Cell(CellCoord),
    Product(ProductId),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RetrieveToLoadingTask {
    pub target: RetrieveTarget,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MoveToLoadingTask {
    pub cell: CellCoord,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReorganizeTask {
    pub order: ScanOrder,
}

/// Put the loading-zone product back. `None` means the nearest empty cell.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LoadReturnTask {
    #[serde(default)]
    pub return_to: Option<CellCoord>,
}

/// Loosely typed request as a producer submits it. Validated into a
/// [`TaskPayload`] before anything is queued.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub cell: Option<CellCoord>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub storage_strategy: Option<StorageStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_cell(mut self, cell: CellCoord) -> Self {
        self.cell = Some(cell);
        self
    }

    pub fn with_product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Resolve the type string and check the fields each kind requires.
    pub fn validate(&self, dims: GridDims) -> Result<TaskPayload> {
        let kind = TaskKind::from_type_str(&self.task_type)?;
        let cell = self.cell.map(|c| dims.check(c)).transpose()?;

        let payload = match kind {
            TaskKind::StockFromConveyor => {
                TaskPayload::StockFromConveyor(StockFromConveyorTask {
                    quantity: self.quantity.unwrap_or(1).max(1),
                })
            }
            TaskKind::RetrieveToLoading => {
                let target = match (cell, self.product_id) {
                    (Some(cell), _) => RetrieveTarget::Cell(cell),
                    (None, Some(product)) => RetrieveTarget::Product(product),
                    (None, None) => {
                        return Err(ModelError::InvalidPayload(
                            "retrieve requires a cell or a product".into(),
                        ));
                    }
                };
                TaskPayload::RetrieveToLoading(RetrieveToLoadingTask { target })
            }
            TaskKind::MoveToLoading => {
                let cell = cell.ok_or_else(|| {
                    ModelError::InvalidPayload("move to loading requires a cell".into())
                })?;
                TaskPayload::MoveToLoading(MoveToLoadingTask { cell })
            }
            TaskKind::InventoryCheck => TaskPayload::InventoryCheck,
            TaskKind::ReorganizeWarehouse => {
                let order = self
                    .parameters
                    .as_ref()
                    .and_then(|p| p.get("order").or_else(|| p.get("mode")))
                    .and_then(Value::as_str)
                    .and_then(ScanOrder::parse_loose)
                    .unwrap_or_default();
                TaskPayload::ReorganizeWarehouse(ReorganizeTask { order })
            }
            TaskKind::LoadReturn => TaskPayload::LoadReturn(LoadReturnTask { return_to: cell }),
        };
        Ok(payload)
    }
}

/// Items processed so far for multi-item tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub processed: u32,
    pub total: u32,
}

/// Envelope stored for each task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub storage_strategy: StorageStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(payload: TaskPayload, priority: TaskPriority) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            payload,
            priority,
            status: TaskStatus::Pending,
            storage_strategy: StorageStrategy::default(),
            progress: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn with_strategy(mut self, strategy: StorageStrategy) -> Self {
        self.storage_strategy = strategy;
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}
