use clap::Args;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use sharpe_qp_core::market_data::{CsvMarketData, MarketDataProvider, MarketSnapshotInput};
use sharpe_qp_core::optimizer::ClarabelSolver;
use sharpe_qp_core::sink::write_portfolio_csv_file;
use sharpe_qp_core::workspace::{OptimizationWorkspace, WorkspaceConfig};

use crate::input;

/// Arguments for optimizing a universe loaded from CSV files
#[derive(Args)]
pub struct OptimizeArgs {
    /// Constituents CSV with a `Ticker` column
    #[arg(long)]
    pub components: String,

    /// Price history CSV with a `Date` column and one column per ticker
    #[arg(long)]
    pub prices: String,

    /// Workspace config file (JSON, or YAML by extension)
    #[arg(long)]
    pub config: Option<String>,

    /// Seed for the alpha noise generator
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Override the initial capital
    #[arg(long)]
    pub initial_capital: Option<Decimal>,

    /// Override the per-asset weight cap
    #[arg(long)]
    pub max_weight: Option<f64>,

    /// Override the turnover limit
    #[arg(long)]
    pub turnover_limit: Option<f64>,

    /// Write the final portfolio as `ticker,value` CSV
    #[arg(long)]
    pub write: Option<String>,
}

/// Arguments for optimizing an explicit market snapshot
#[derive(Args)]
pub struct SolveArgs {
    /// Path to JSON input file (reads stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Write the final portfolio as `ticker,value` CSV
    #[arg(long)]
    pub write: Option<String>,
}

/// JSON accepted by `solve`: a snapshot plus an optional config block.
#[derive(Debug, Deserialize)]
struct SolveInput {
    #[serde(flatten)]
    snapshot: MarketSnapshotInput,
    #[serde(default)]
    config: WorkspaceConfig,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut config: WorkspaceConfig = match &args.config {
        Some(path) => input::file::read_config(path)?,
        None => WorkspaceConfig::default(),
    };
    if let Some(capital) = args.initial_capital {
        config.initial_capital = capital;
    }
    if let Some(cap) = args.max_weight {
        config.max_weight = cap;
    }
    if let Some(limit) = args.turnover_limit {
        config.turnover_limit = limit;
    }

    let components = input::file::resolve_path(&args.components)?;
    let prices = input::file::resolve_path(&args.prices)?;
    let market = CsvMarketData::load(components, prices, args.seed, config.risk_free_rate)?;
    run_workspace(market, config, args.write.as_deref())
}

pub fn run_solve(args: SolveArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let solve_input: SolveInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        data
    } else {
        return Err("--input <file.json> or stdin required for solve".into());
    };

    let market = solve_input.snapshot.into_provider()?;
    run_workspace(market, solve_input.config, args.write.as_deref())
}

fn run_workspace<P: MarketDataProvider>(
    market: P,
    config: WorkspaceConfig,
    write: Option<&str>,
) -> Result<Value, Box<dyn std::error::Error>> {
    debug!(?config, "Workspace config");
    let mut workspace = OptimizationWorkspace::new(market, ClarabelSolver, config)?;
    let result = workspace.run()?;
    if let (Some(path), Some(portfolio)) = (write, workspace.portfolio()) {
        write_portfolio_csv_file(portfolio, path)?;
    }
    Ok(serde_json::to_value(result)?)
}
