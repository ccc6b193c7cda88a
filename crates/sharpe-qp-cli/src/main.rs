mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::optimize::{OptimizeArgs, SolveArgs};

/// Sharpe-ratio maximizing portfolio construction
#[derive(Parser)]
#[command(
    name = "sharpe-qp",
    version,
    about = "Sharpe-ratio maximizing portfolio construction",
    long_about = "Builds a long-only portfolio that maximizes the Sharpe ratio under a \
                  per-asset weight cap and a turnover limit, by solving the homogenized \
                  convex QP and mapping its solution back to weights."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "sharpe_qp_core=debug")
    #[arg(long, default_value = "info", global = true)]
    log: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a universe from constituent and price CSV files
    Optimize(OptimizeArgs),
    /// Optimize an explicit alpha/covariance snapshot (JSON file or stdin)
    Solve(SolveArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Solve(args) => commands::optimize::run_solve(args),
        Commands::Version => {
            println!("sharpe-qp {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
