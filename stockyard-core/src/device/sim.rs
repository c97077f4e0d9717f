//! In-process stand-in for the controller.
//!
//! Interprets the same command vocabulary as the firmware, mutates a small
//! physical model, and emits telemetry reports on a channel the way the real
//! controller posts them. Used by integration tests and `stockyardctl simulate`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stockyard_model::{CellCoord, GridDims, OccupancyMatrix, StorageStrategy, TelemetryReport};
use tokio::sync::{Mutex, mpsc};

use super::DeviceTransport;
use crate::error::{EngineError, Result};

#[derive(Debug)]
struct SimState {
    occupancy: OccupancyMatrix,
    loading_zone_occupied: bool,
    arm_status: String,
    operation: String,
    rfid: Option<String>,
    target_cell: Option<String>,
    strategy: StorageStrategy,
    conveyor: VecDeque<String>,
    generated: u32,
}

impl SimState {
    fn report(&self) -> TelemetryReport {
        let dims = self.occupancy.dims();
        let grid: Vec<Value> = (1..=dims.rows)
            .map(|row| {
                Value::Array(
                    (1..=dims.cols)
                        .map(|col| Value::Bool(self.occupancy.get(CellCoord::new(row, col))))
                        .collect(),
                )
            })
            .collect();
        TelemetryReport {
            ldr1: !self.conveyor.is_empty(),
            ldr2: false,
            rfid: self.rfid.clone(),
            conveyor_state: Some(if self.conveyor.is_empty() { "IDLE" } else { "RUNNING" }.into()),
            arm_status: Some(self.arm_status.clone()),
            current_operation: Some(self.operation.clone()),
            loading_zone_occupied: self.loading_zone_occupied,
            storage_strategy: Some(self.strategy.device_token().to_string()),
            cells: Some(Value::Array(grid)),
            target_cell: self.target_cell.clone(),
        }
    }

    fn begin(&mut self, operation: &str) {
        self.arm_status = "BUSY".into();
        self.operation = operation.into();
    }

    fn finish(&mut self, operation: impl Into<String>) {
        self.arm_status = "READY".into();
        self.operation = operation.into();
    }

    fn first_empty(&self) -> Option<CellCoord> {
        self.occupancy
            .iter()
            .find_map(|(coord, occupied)| (!occupied).then_some(coord))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SimCommand {
    Take(CellCoord),
    Place(CellCoord),
    Home,
    MoveToLoading(CellCoord),
    LoadReturnTo(CellCoord),
    StockQty(u32),
    Strategy(StorageStrategy),
    Notice,
}

impl SimCommand {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("TAKE ") {
            return parse_cell(rest).map(SimCommand::Take);
        }
        if let Some(rest) = raw.strip_prefix("PLACE ") {
            return parse_cell(rest).map(SimCommand::Place);
        }
        if let Some(rest) = raw.strip_prefix("MOVE_TO_LOADING:") {
            return parse_cell(rest).map(SimCommand::MoveToLoading);
        }
        if let Some(rest) = raw.strip_prefix("LOAD_RETURN_TO:") {
            return parse_cell(rest).map(SimCommand::LoadReturnTo);
        }
        if let Some(rest) = raw.strip_prefix("STOCK_QTY:") {
            return rest.trim().parse().ok().map(SimCommand::StockQty);
        }
        if let Some(rest) = raw.strip_prefix("STRATEGY ") {
            return StorageStrategy::normalize(rest).map(SimCommand::Strategy);
        }
        match raw {
            "HOME" => Some(SimCommand::Home),
            "REORGANIZE_WAREHOUSE_COMPLETE" => Some(SimCommand::Notice),
            _ => None,
        }
    }
}

/// `"<col> <row>"` as the firmware expects it.
fn parse_cell(args: &str) -> Option<CellCoord> {
    let mut parts = args.split_whitespace().map(str::parse::<u8>);
    let col = parts.next()?.ok()?;
    let row = parts.next()?.ok()?;
    Some(CellCoord::new(row, col))
}

struct SimInner {
    state: Mutex<SimState>,
    reachable: AtomicBool,
    step: Duration,
    reports: mpsc::Sender<TelemetryReport>,
    commands: mpsc::UnboundedSender<SimCommand>,
    log: Mutex<Vec<String>>,
}

impl SimInner {
    async fn emit(&self) {
        if !self.reachable.load(Ordering::SeqCst) {
            return;
        }
        let report = self.state.lock().await.report();
        let _ = self.reports.send(report).await;
    }

    async fn pause(&self) {
        tokio::time::sleep(self.step).await;
    }

    async fn run(self: Arc<Self>, command: SimCommand) {
        match command {
            SimCommand::Take(cell) => {
                self.motion("TAKING", "PICK_FROM_CELL_DONE", |s| s.occupancy.set(cell, false))
                    .await;
            }
            SimCommand::Place(cell) => {
                self.motion("PLACING", "PLACE_COMPLETE", |s| s.occupancy.set(cell, true))
                    .await;
            }
            SimCommand::Home => {
                self.motion("HOMING", "HOME_COMPLETE", |_| {}).await;
            }
            SimCommand::MoveToLoading(cell) => {
                self.motion("MOVING_TO_LOADING", "MOVE_TO_LOADING_COMPLETE", |s| {
                    s.occupancy.set(cell, false);
                    s.loading_zone_occupied = true;
                })
                .await;
            }
            SimCommand::LoadReturnTo(cell) => {
                self.motion("LOAD_RETURNING", "LOAD_RETURN_COMPLETE", |s| {
                    s.loading_zone_occupied = false;
                    s.occupancy.set(cell, true);
                })
                .await;
            }
            SimCommand::StockQty(0) => {}
            SimCommand::StockQty(quantity) => self.stock(quantity).await,
            SimCommand::Strategy(strategy) => {
                self.state.lock().await.strategy = strategy;
                self.emit().await;
            }
            SimCommand::Notice => {}
        }
    }

    async fn motion<F>(&self, busy: &str, done: &str, apply: F)
    where
        F: FnOnce(&mut SimState),
    {
        self.state.lock().await.begin(busy);
        self.emit().await;
        self.pause().await;
        {
            let mut state = self.state.lock().await;
            apply(&mut state);
            state.finish(done);
        }
        self.emit().await;
    }

    async fn stock(&self, quantity: u32) {
        for _ in 0..quantity {
            {
                let mut state = self.state.lock().await;
                if state.first_empty().is_none() {
                    break;
                }
                state.begin("AUTO_STOCK_RUNNING");
            }
            self.emit().await;
            self.pause().await;
            {
                let mut state = self.state.lock().await;
                let Some(cell) = state.first_empty() else { break };
                let tag = match state.conveyor.pop_front() {
                    Some(tag) => tag,
                    None => {
                        state.generated += 1;
                        format!("SIM-{:04}", state.generated)
                    }
                };
                state.occupancy.set(cell, true);
                state.rfid = Some(tag.clone());
                state.target_cell = Some(format!("C{}:R{}", cell.col, cell.row));
                state.finish(format!("AUTO_STOCK_COMPLETE:{tag}"));
            }
            self.emit().await;
            self.pause().await;
        }
        self.state.lock().await.finish("STOCK_QTY_DONE");
        self.emit().await;
    }
}

/// Simulated controller. Cloning shares the same physical model.
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<SimInner>,
}

impl fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("reachable", &self.inner.reachable.load(Ordering::SeqCst))
            .field("step", &self.inner.step)
            .finish()
    }
}

impl SimulatedDevice {
    pub fn builder(dims: GridDims) -> SimulatedDeviceBuilder {
        SimulatedDeviceBuilder::new(dims)
    }

    /// An unreachable device refuses commands and drops pending reports.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub async fn commands(&self) -> Vec<String> {
        self.inner.log.lock().await.clone()
    }

    pub async fn occupancy(&self) -> OccupancyMatrix {
        self.inner.state.lock().await.occupancy.clone()
    }

    pub async fn loading_zone_occupied(&self) -> bool {
        self.inner.state.lock().await.loading_zone_occupied
    }

    /// Queue an RFID tag on the conveyor for the next stocking run.
    pub async fn feed_conveyor(&self, rfid: impl Into<String>) {
        self.inner.state.lock().await.conveyor.push_back(rfid.into());
    }

    /// Physically add or remove an item without the arm.
    pub async fn set_cell_sensor(&self, cell: CellCoord, occupied: bool) {
        self.inner.state.lock().await.occupancy.set(cell, occupied);
    }

    pub async fn set_loading_zone(&self, occupied: bool) {
        self.inner.state.lock().await.loading_zone_occupied = occupied;
    }

    /// Emit a report reflecting the current model.
    pub async fn heartbeat(&self) {
        self.inner.emit().await;
    }
}

#[async_trait]
impl DeviceTransport for SimulatedDevice {
    async fn send(&self, command: &str) -> Result<String> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(EngineError::DeviceUnreachable(
                "simulated controller is offline".into(),
            ));
        }
        self.inner.log.lock().await.push(command.to_string());

        let parsed = SimCommand::parse(command).ok_or_else(|| EngineError::CommandRejected {
            command: command.to_string(),
            reason: "unknown command".into(),
        })?;
        self.inner
            .commands
            .send(parsed)
            .map_err(|_| EngineError::DeviceUnreachable("simulated controller stopped".into()))?;
        Ok("OK".into())
    }
}

#[derive(Debug)]
pub struct SimulatedDeviceBuilder {
    dims: GridDims,
    step: Duration,
    occupied: Vec<CellCoord>,
    loading_zone_occupied: bool,
    conveyor: Vec<String>,
    channel_capacity: usize,
}

impl SimulatedDeviceBuilder {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            step: Duration::from_millis(250),
            occupied: Vec::new(),
            loading_zone_occupied: false,
            conveyor: Vec::new(),
            channel_capacity: 64,
        }
    }

    /// Time each physical action takes.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn with_occupied(mut self, cells: impl IntoIterator<Item = CellCoord>) -> Self {
        self.occupied.extend(cells);
        self
    }

    pub fn with_loading_zone_occupied(mut self, occupied: bool) -> Self {
        self.loading_zone_occupied = occupied;
        self
    }

    pub fn with_conveyor(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.conveyor.extend(tags);
        self
    }

    /// Returns the device and the receiving end of its telemetry stream.
    ///
    /// Commands execute one at a time in arrival order on a worker task, so
    /// this must be called from within a tokio runtime.
    pub fn build(self) -> (SimulatedDevice, mpsc::Receiver<TelemetryReport>) {
        let (reports, rx) = mpsc::channel(self.channel_capacity.max(1));
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let mut occupancy = OccupancyMatrix::empty(self.dims);
        for cell in self.occupied {
            occupancy.set(cell, true);
        }
        let state = SimState {
            occupancy,
            loading_zone_occupied: self.loading_zone_occupied,
            arm_status: "READY".into(),
            operation: String::new(),
            rfid: None,
            target_cell: None,
            strategy: StorageStrategy::default(),
            conveyor: self.conveyor.into(),
            generated: 0,
        };
        let device = SimulatedDevice {
            inner: Arc::new(SimInner {
                state: Mutex::new(state),
                reachable: AtomicBool::new(true),
                step: self.step,
                reports,
                commands,
                log: Mutex::new(Vec::new()),
            }),
        };

        let worker = device.inner.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                worker.clone().run(command).await;
            }
        });
        (device, rx)
    }
}
