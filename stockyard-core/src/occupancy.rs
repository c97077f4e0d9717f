//! Sensor fusion for the per-cell IR occupancy readings.
//!
//! Two independent mechanisms run on every report:
//!
//! * a debounce filter (hold window plus confirm counter) that yields the
//!   confirmed per-cell state shown to observers, and
//! * a raw-False counter that corrects persisted OCCUPIED cells the sensors
//!   have consistently seen empty.
//!
//! The correction only ever demotes. A sensor reading is never enough to mark
//! a cell OCCUPIED, because only the task that placed the item knows what it
//! is. Demotion trusts the sensors over the record, so a misbehaving IR
//! sensor can erase inventory. Every demotion is logged at `warn`.

use std::collections::HashMap;

use stockyard_model::{Cell, CellCoord, CellStatus, TelemetrySnapshot};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::OccupancyConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventPublisher};
use crate::inventory::{CellView, InventoryStore};

/// Debounce state for one cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OccupancyMemory {
    pub occupied: bool,
    /// Last effective reading, `None` before the first observation.
    pub last_raw: Option<bool>,
    pub confirm: u8,
    pub last_true_at: Option<Instant>,
}

/// Hold-window and confirm-counter debounce over raw readings.
#[derive(Debug)]
pub struct OccupancyFilter {
    config: OccupancyConfig,
    cells: HashMap<CellCoord, OccupancyMemory>,
}

impl OccupancyFilter {
    pub fn new(config: OccupancyConfig) -> Self {
        Self {
            config,
            cells: HashMap::new(),
        }
    }

    /// Feed one raw reading and return the confirmed state.
    pub fn observe(&mut self, coord: CellCoord, raw: bool, now: Instant) -> bool {
        let hold = self.config.hold_window();
        let threshold = self.config.confirm_threshold.max(1);
        let mem = self.cells.entry(coord).or_default();

        if raw {
            mem.last_true_at = Some(now);
        }
        let effective = raw
            || mem
                .last_true_at
                .is_some_and(|at| now.saturating_duration_since(at) <= hold);

        match mem.last_raw {
            None => {
                mem.last_raw = Some(effective);
                mem.occupied = effective;
                mem.confirm = 0;
            }
            Some(last) if last != effective => {
                mem.last_raw = Some(effective);
                mem.confirm = 1;
            }
            Some(_) if mem.occupied != effective => {
                mem.confirm = mem.confirm.saturating_add(1);
                if mem.confirm >= threshold {
                    mem.occupied = effective;
                    mem.confirm = 0;
                }
            }
            Some(_) => mem.confirm = 0,
        }
        mem.occupied
    }

    pub fn confirmed(&self, coord: CellCoord) -> Option<bool> {
        self.cells
            .get(&coord)
            .filter(|mem| mem.last_raw.is_some())
            .map(|mem| mem.occupied)
    }

    pub fn memory(&self, coord: CellCoord) -> Option<OccupancyMemory> {
        self.cells.get(&coord).copied()
    }

    /// Forget everything about a cell, as after a manual clear.
    pub fn reset(&mut self, coord: CellCoord) {
        self.cells.insert(coord, OccupancyMemory::default());
    }
}

#[derive(Debug)]
struct ReconcilerState {
    filter: OccupancyFilter,
    false_counts: HashMap<CellCoord, u8>,
}

/// Applies the occupancy filter and the demotion rule to each report.
#[derive(Debug)]
pub struct OccupancyReconciler {
    config: OccupancyConfig,
    state: Mutex<ReconcilerState>,
}

impl OccupancyReconciler {
    pub fn new(config: OccupancyConfig) -> Self {
        Self {
            state: Mutex::new(ReconcilerState {
                filter: OccupancyFilter::new(config.clone()),
                false_counts: HashMap::new(),
            }),
            config,
        }
    }

    /// Update filter and counters from a snapshot and return the cells whose
    /// raw reading has been False at least `clear_threshold` times in a row.
    pub async fn observe(&self, snapshot: &TelemetrySnapshot, now: Instant) -> Vec<CellCoord> {
        let cap = self.config.false_count_cap.max(self.config.clear_threshold);
        let mut state = self.state.lock().await;
        let mut stable_empty = Vec::new();
        for (coord, raw) in snapshot.occupancy.iter() {
            state.filter.observe(coord, raw, now);
            let count = state.false_counts.entry(coord).or_default();
            if raw {
                *count = 0;
            } else {
                *count = count.saturating_add(1).min(cap);
                if *count >= self.config.clear_threshold {
                    stable_empty.push(coord);
                }
            }
        }
        stable_empty
    }

    /// Demote persisted OCCUPIED cells the sensors consistently see empty.
    /// Returns the cells that were cleared.
    pub async fn reconcile(
        &self,
        snapshot: &TelemetrySnapshot,
        now: Instant,
        inventory: &dyn InventoryStore,
        events: &dyn EventPublisher,
    ) -> Result<Vec<CellCoord>> {
        let stable_empty = self.observe(snapshot, now).await;
        if stable_empty.is_empty() {
            return Ok(Vec::new());
        }

        let mut cleared = Vec::new();
        for cell in inventory.cells().await? {
            if cell.status != CellStatus::Occupied || !stable_empty.contains(&cell.coord) {
                continue;
            }
            if inventory.clear_if_occupied(cell.coord).await? {
                tracing::warn!(
                    cell = %cell.coord,
                    product_id = ?cell.product_id(),
                    "sensors report occupied cell empty, clearing record"
                );
                let cleared_cell = inventory.cell(cell.coord).await?;
                events
                    .publish(EngineEvent::CellUpdated {
                        cell: CellView::plain(cleared_cell),
                    })
                    .await?;
                cleared.push(cell.coord);
            }
        }
        Ok(cleared)
    }

    pub async fn reset_cell(&self, coord: CellCoord) {
        let mut state = self.state.lock().await;
        state.filter.reset(coord);
        state.false_counts.remove(&coord);
    }

    pub async fn confirmed(&self, coord: CellCoord) -> Option<bool> {
        self.state.lock().await.filter.confirmed(coord)
    }

    /// Overlay the live sensor picture on persisted cells. Authoritative
    /// status is left untouched.
    pub async fn live_view(&self, cells: Vec<Cell>, snapshot: &TelemetrySnapshot) -> Vec<CellView> {
        let state = self.state.lock().await;
        cells
            .into_iter()
            .map(|mut cell| {
                let sensor_occupied = snapshot.occupancy.get(cell.coord);
                let false_count = state.false_counts.get(&cell.coord).copied().unwrap_or(0);
                let confirmed_occupied = state.filter.confirmed(cell.coord);

                let stable_empty = !sensor_occupied && false_count >= self.config.clear_threshold;
                let display_status = if stable_empty {
                    cell.contents = None;
                    CellStatus::Empty
                } else if cell.status == CellStatus::Empty && sensor_occupied {
                    CellStatus::Occupied
                } else {
                    cell.status
                };
                CellView {
                    cell,
                    display_status,
                    sensor_occupied,
                    confirmed_occupied,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn filter() -> OccupancyFilter {
        OccupancyFilter::new(OccupancyConfig::default())
    }

    #[test]
    fn brief_dropout_inside_hold_window_is_ignored() {
        let mut f = filter();
        let cell = CellCoord::new(1, 1);
        let t0 = Instant::now();
        assert!(f.observe(cell, true, t0));
        assert!(f.observe(cell, false, t0 + Duration::from_secs(1)));
        assert_eq!(f.memory(cell).unwrap().confirm, 0);
    }

    #[test]
    fn three_consecutive_differing_readings_flip_state() {
        let mut f = filter();
        let cell = CellCoord::new(2, 2);
        let t0 = Instant::now();
        assert!(f.observe(cell, true, t0));

        let later = t0 + Duration::from_secs(5);
        assert!(f.observe(cell, false, later));
        assert!(f.observe(cell, false, later + Duration::from_millis(200)));
        assert!(!f.observe(cell, false, later + Duration::from_millis(400)));
    }

    #[test]
    fn interrupted_run_restarts_the_count() {
        let mut f = filter();
        let cell = CellCoord::new(3, 4);
        let t0 = Instant::now();
        assert!(!f.observe(cell, false, t0));
        assert!(!f.observe(cell, true, t0 + Duration::from_millis(100)));
        assert!(!f.observe(cell, true, t0 + Duration::from_millis(200)));
        // A False inside the hold window counts as True, so the run continues.
        assert!(f.observe(cell, false, t0 + Duration::from_millis(300)));
    }

    #[test]
    fn reset_forgets_confirmed_state() {
        let mut f = filter();
        let cell = CellCoord::new(1, 3);
        f.observe(cell, true, Instant::now());
        f.reset(cell);
        assert_eq!(f.confirmed(cell), None);
        assert_eq!(f.memory(cell), Some(OccupancyMemory::default()));
    }
}
