use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use stockyard_model::{CellCoord, ScanOrder, TaskRequest};

#[derive(Parser)]
#[command(
    name = "stockyardctl",
    version,
    about = "Drive and inspect the Stockyard storage-grid engine"
)]
pub struct Cli {
    /// Config file (TOML or JSON). Defaults to $STOCKYARD_CONFIG_PATH,
    /// $STOCKYARD_CONFIG_JSON, then ./stockyard.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run tasks against the in-process simulated controller
    Simulate(SimulateArgs),
    /// Compute a reorganization plan without moving anything
    Plan(PlanArgs),
    /// Send one raw command to the configured controller
    Send(SendArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Cell that starts stocked, as ROW:COL (repeatable)
    #[arg(long = "stored", value_name = "ROW:COL", value_parser = parse_cell)]
    pub stored: Vec<CellCoord>,
    /// RFID tag waiting on the conveyor (repeatable)
    #[arg(long = "conveyor", value_name = "TAG")]
    pub conveyor: Vec<String>,
    /// Task to queue as KIND[=QTY][@ROW:COL], e.g. stock=2, retrieve@1:1,
    /// organize (repeatable, runs in priority order)
    #[arg(long = "task", value_name = "SPEC", value_parser = parse_task)]
    pub tasks: Vec<TaskRequest>,
    /// Duration of one simulated arm action in milliseconds
    #[arg(long)]
    pub step_ms: Option<u64>,
    /// Print the final warehouse snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Stored product as LABEL@ROW:COL (repeatable)
    #[arg(long = "stored", value_name = "LABEL@ROW:COL", value_parser = parse_placement)]
    pub stored: Vec<Placement>,
    /// Required end position as LABEL@ROW:COL; defaults to compaction
    #[arg(long = "target", value_name = "LABEL@ROW:COL", value_parser = parse_placement)]
    pub targets: Vec<Placement>,
    /// Canonical scan order
    #[arg(long, value_enum, default_value = "row")]
    pub order: OrderArg,
    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SendArgs {
    /// Command text, e.g. `HOME` or `TAKE 2 1`
    #[arg(required = true, num_args = 1.., value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Print JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OrderArg {
    Row,
    Column,
}

impl From<OrderArg> for ScanOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Row => ScanOrder::RowMajor,
            OrderArg::Column => ScanOrder::ColumnMajor,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Placement {
    pub label: String,
    pub cell: CellCoord,
}

pub fn parse_cell(raw: &str) -> Result<CellCoord, String> {
    let (row, col) = raw
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("expected ROW:COL, got `{raw}`"))?;
    let row = row.trim().parse().map_err(|_| format!("bad row in `{raw}`"))?;
    let col = col.trim().parse().map_err(|_| format!("bad column in `{raw}`"))?;
    Ok(CellCoord::new(row, col))
}

fn parse_placement(raw: &str) -> Result<Placement, String> {
    let (label, cell) = raw
        .split_once('@')
        .ok_or_else(|| format!("expected LABEL@ROW:COL, got `{raw}`"))?;
    if label.trim().is_empty() {
        return Err(format!("missing label in `{raw}`"));
    }
    Ok(Placement {
        label: label.trim().to_string(),
        cell: parse_cell(cell)?,
    })
}

fn parse_task(raw: &str) -> Result<TaskRequest, String> {
    let (head, cell) = match raw.split_once('@') {
        Some((head, cell)) => (head, Some(parse_cell(cell)?)),
        None => (raw, None),
    };
    let (kind, quantity) = match head.split_once('=') {
        Some((kind, qty)) => (
            kind,
            Some(
                qty.trim()
                    .parse::<u32>()
                    .map_err(|_| format!("bad quantity in `{raw}`"))?,
            ),
        ),
        None => (head, None),
    };

    let mut request = TaskRequest::new(kind.trim());
    if let Some(cell) = cell {
        request = request.with_cell(cell);
    }
    if let Some(quantity) = quantity {
        request = request.with_quantity(quantity);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_spec_carries_quantity_and_cell() {
        let request = parse_task("stock=3").unwrap();
        assert_eq!(request.task_type, "stock");
        assert_eq!(request.quantity, Some(3));

        let request = parse_task("retrieve@2:4").unwrap();
        assert_eq!(request.cell, Some(CellCoord::new(2, 4)));
        assert!(parse_task("stock=many").is_err());
    }

    #[test]
    fn placement_needs_label_and_cell() {
        let placement = parse_placement("B@2:3").unwrap();
        assert_eq!(placement.label, "B");
        assert_eq!(placement.cell, CellCoord::new(2, 3));
        assert!(parse_placement("@1:1").is_err());
        assert!(parse_placement("B").is_err());
    }
}
