use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use stockyard_config::StockyardConfig;
use stockyard_core::tasks::handlers::{ReorganizationPlan, plan_compaction, plan_layout};
use stockyard_model::{Cell, CellContents, CellCoord, ProductId, ProductRef, ScanOrder};

use crate::cli::PlanArgs;

pub fn run(args: PlanArgs, config: &StockyardConfig) -> Result<()> {
    let grid = config.engine.grid;
    let order = ScanOrder::from(args.order);

    let mut ids: HashMap<String, ProductId> = HashMap::new();
    let mut labels: HashMap<ProductId, String> = HashMap::new();
    let mut stored: HashMap<CellCoord, ProductRef> = HashMap::new();
    for placement in &args.stored {
        let cell = grid
            .check(placement.cell)
            .with_context(|| format!("stored product {}", placement.label))?;
        if ids.contains_key(&placement.label) {
            bail!("product {} is stored twice", placement.label);
        }
        let product = ProductRef::new(ProductId::new()).with_name(placement.label.clone());
        ids.insert(placement.label.clone(), product.id);
        labels.insert(product.id, placement.label.clone());
        if stored.insert(cell, product).is_some() {
            bail!("cell {cell} is listed twice");
        }
    }

    let cells: Vec<Cell> = grid
        .coords()
        .map(|coord| match stored.remove(&coord) {
            Some(product) => Cell::occupied(coord, CellContents::single(product)),
            None => Cell::empty(coord),
        })
        .collect();

    let plan = if args.targets.is_empty() {
        plan_compaction(&cells, order)?
    } else {
        let targets = args
            .targets
            .iter()
            .map(|target| {
                ids.get(&target.label)
                    .map(|id| (target.cell, *id))
                    .with_context(|| format!("target {} is not a stored product", target.label))
            })
            .collect::<Result<Vec<_>>>()?;
        plan_layout(&cells, &targets, order)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan, &labels);
    }
    Ok(())
}

fn print_plan(plan: &ReorganizationPlan, labels: &HashMap<ProductId, String>) {
    if plan.is_noop() {
        println!("already in place");
    }
    for step in &plan.moves {
        let label = labels
            .get(&step.contents.product_id())
            .map(String::as_str)
            .unwrap_or("?");
        let note = if step.to_buffer { " (buffer)" } else { "" };
        println!("move {label} {} -> {}{note}", step.from, step.to);
    }
    println!("{} move(s)", plan.moves.len());
}
