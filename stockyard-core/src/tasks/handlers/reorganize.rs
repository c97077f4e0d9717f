//! Compacts stored products into the leading cells of a scan order.
//!
//! Planning is pure: the planner stages every move against an in-memory copy
//! of the layout, so infeasibility surfaces before the arm moves at all.
//! Execution then replays the plan one pick-and-place at a time, persisting
//! both cells after each physical move.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use stockyard_model::{
    Cell, CellContents, CellCoord, CellStatus, ProductId, ProductLocationEntry, ScanOrder,
    TaskKind, TaskPayload, TaskRecord,
};

use super::{HandlerContext, TaskHandler, wrong_payload};
use crate::error::{EngineError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
    pub from: CellCoord,
    pub to: CellCoord,
    pub contents: CellContents,
    /// Clears a slot for another product rather than placing into a slot.
    pub to_buffer: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReorganizationPlan {
    pub order: ScanOrder,
    /// `(slot, product)` pairs the plan establishes.
    pub targets: Vec<(CellCoord, ProductId)>,
    pub moves: Vec<PlannedMove>,
}

impl ReorganizationPlan {
    pub fn is_noop(&self) -> bool {
        self.moves.is_empty()
    }
}

/// Cells that take part in reorganization, in scan order. OCCUPIED cells
/// without a known product and non-storage statuses are left alone.
fn eligible(cells: &[Cell], order: ScanOrder) -> Vec<&Cell> {
    let mut eligible: Vec<&Cell> = cells
        .iter()
        .filter(|c| c.status == CellStatus::Empty || c.holds_product())
        .collect();
    eligible.sort_by(|a, b| order.compare(&a.coord, &b.coord));
    eligible
}

/// Plan moving the `n` stored products into the first `n` eligible cells,
/// keeping their relative scan order.
pub fn plan_compaction(cells: &[Cell], order: ScanOrder) -> Result<ReorganizationPlan> {
    let eligible = eligible(cells, order);
    let products: Vec<ProductId> = eligible.iter().filter_map(|c| c.product_id()).collect();
    let targets: Vec<(CellCoord, ProductId)> = eligible
        .iter()
        .map(|c| c.coord)
        .zip(products)
        .collect();
    plan_layout(cells, &targets, order)
}

/// Plan the moves that make each `(slot, product)` target hold, using one
/// EMPTY cell as a buffer when a slot is taken by another product.
pub fn plan_layout(
    cells: &[Cell],
    targets: &[(CellCoord, ProductId)],
    order: ScanOrder,
) -> Result<ReorganizationPlan> {
    let eligible = eligible(cells, order);
    let scan: Vec<CellCoord> = eligible.iter().map(|c| c.coord).collect();
    let mut staged: HashMap<CellCoord, Option<CellContents>> = eligible
        .iter()
        .map(|c| (c.coord, c.contents.clone().filter(|_| c.holds_product())))
        .collect();

    let holds = |staged: &HashMap<CellCoord, Option<CellContents>>, slot: CellCoord| {
        staged
            .get(&slot)
            .and_then(|c| c.as_ref())
            .map(CellContents::product_id)
    };

    for (slot, product) in targets {
        if !staged.contains_key(slot) {
            return Err(EngineError::ReorganizationInfeasible(format!(
                "slot {slot} is not available for storage"
            )));
        }
        if !scan.iter().any(|c| holds(&staged, *c) == Some(*product)) {
            return Err(EngineError::ReorganizationInfeasible(format!(
                "product {product} is not stored in any cell"
            )));
        }
    }

    let needs_move = targets
        .iter()
        .any(|(slot, product)| holds(&staged, *slot) != Some(*product));
    let has_empty = staged.values().any(Option::is_none);
    if needs_move && !has_empty {
        return Err(EngineError::ReorganizationInfeasible(
            "warehouse full: one EMPTY cell is required as a buffer".into(),
        ));
    }

    let slots: HashSet<CellCoord> = targets.iter().map(|(slot, _)| *slot).collect();
    let mut moves = Vec::new();

    for (slot, product) in targets.iter().copied() {
        if holds(&staged, slot) == Some(product) {
            continue;
        }
        let Some(source) = scan
            .iter()
            .copied()
            .find(|c| holds(&staged, *c) == Some(product))
        else {
            continue;
        };

        if holds(&staged, slot).is_some() {
            let buffer = scan
                .iter()
                .copied()
                .find(|c| staged[c].is_none() && !slots.contains(c))
                .or_else(|| {
                    scan.iter()
                        .copied()
                        .find(|c| staged[c].is_none() && *c != slot)
                })
                .ok_or_else(|| {
                    EngineError::ReorganizationInfeasible(format!(
                        "no buffer cell free to clear {slot}"
                    ))
                })?;
            let displaced = staged.insert(slot, None).flatten();
            if let Some(contents) = displaced {
                staged.insert(buffer, Some(contents.clone()));
                moves.push(PlannedMove {
                    from: slot,
                    to: buffer,
                    contents,
                    to_buffer: true,
                });
            }
        }

        if let Some(contents) = staged.insert(source, None).flatten() {
            staged.insert(slot, Some(contents.clone()));
            moves.push(PlannedMove {
                from: source,
                to: slot,
                contents,
                to_buffer: false,
            });
        }
    }

    Ok(ReorganizationPlan {
        order,
        targets: targets.to_vec(),
        moves,
    })
}

#[derive(Debug, Default)]
pub struct ReorganizeHandler;

#[async_trait]
impl TaskHandler for ReorganizeHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ReorganizeWarehouse
    }

    async fn run(&self, task: &TaskRecord, ctx: &HandlerContext) -> Result<()> {
        let TaskPayload::ReorganizeWarehouse(job) = &task.payload else {
            return Err(wrong_payload(self.kind(), task));
        };

        let cells = ctx.inventory.cells().await?;
        let plan = plan_compaction(&cells, job.order)?;
        tracing::info!(
            task_id = %task.id,
            order = ?plan.order,
            moves = plan.moves.len(),
            "reorganization planned"
        );

        let timeout = ctx.config.device.move_timeout();
        for step in &plan.moves {
            ctx.device
                .issue_and_wait_fresh(
                    &format!("TAKE {}", step.from.device_args()),
                    "PICK_FROM_CELL_DONE",
                    timeout,
                )
                .await?;
            ctx.device
                .issue_and_wait_fresh(
                    &format!("PLACE {}", step.to.device_args()),
                    "PLACE_COMPLETE",
                    timeout,
                )
                .await?;

            ctx.move_cell(step.from, step.to).await?;
            ctx.audit(
                task,
                ProductLocationEntry::in_cell(step.contents.product_id(), step.to, "REORGANIZED")
                    .with_rfid(step.contents.product.rfid_uid.clone()),
            )
            .await;
            tracing::debug!(task_id = %task.id, from = %step.from, to = %step.to, "moved");

            tokio::time::sleep(ctx.config.device.settle_delay()).await;
        }

        if let Err(err) = ctx.home().await {
            tracing::warn!(task_id = %task.id, error = %err, "return home after reorganization failed");
        }
        ctx.device.issue("REORGANIZE_WAREHOUSE_COMPLETE").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_model::{GridDims, ProductRef};

    fn grid() -> Vec<Cell> {
        GridDims::default().coords().map(Cell::empty).collect()
    }

    fn put(cells: &mut [Cell], coord: CellCoord) -> ProductId {
        let product = ProductRef::new(ProductId::new());
        let id = product.id;
        let slot = cells.iter_mut().find(|c| c.coord == coord).unwrap();
        *slot = Cell::occupied(coord, CellContents::single(product));
        id
    }

    #[test]
    fn compact_grid_needs_no_moves() {
        let mut cells = grid();
        put(&mut cells, CellCoord::new(1, 1));
        put(&mut cells, CellCoord::new(1, 2));
        let plan = plan_compaction(&cells, ScanOrder::RowMajor).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn column_major_uses_column_slots() {
        let mut cells = grid();
        put(&mut cells, CellCoord::new(1, 1));
        let b = put(&mut cells, CellCoord::new(1, 2));
        let plan = plan_compaction(&cells, ScanOrder::ColumnMajor).unwrap();
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].from, CellCoord::new(1, 2));
        assert_eq!(plan.moves[0].to, CellCoord::new(2, 1));
        assert_eq!(plan.moves[0].contents.product_id(), b);
    }

    #[test]
    fn full_grid_out_of_order_is_infeasible() {
        let mut cells = grid();
        let coords: Vec<_> = GridDims::default().coords().collect();
        let ids: Vec<_> = coords.iter().map(|c| put(&mut cells, *c)).collect();
        let mut targets: Vec<_> = coords.iter().copied().zip(ids).collect();
        targets.swap(0, 1);
        let swapped: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(i, (_, p))| (coords[i], *p))
            .collect();
        let err = plan_layout(&cells, &swapped, ScanOrder::RowMajor).unwrap_err();
        assert!(matches!(err, EngineError::ReorganizationInfeasible(_)));
    }

    #[test]
    fn maintenance_cells_are_skipped() {
        let mut cells = grid();
        cells[1].status = CellStatus::Maintenance;
        put(&mut cells, CellCoord::new(1, 3));
        put(&mut cells, CellCoord::new(1, 1));
        let plan = plan_compaction(&cells, ScanOrder::RowMajor).unwrap();
        assert!(plan.is_noop());
    }
}
