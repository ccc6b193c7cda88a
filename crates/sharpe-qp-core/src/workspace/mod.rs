pub mod formulation;

pub use formulation::{
    formulate_sharpe_qp, homogenized_sharpe, normalize_by_sum, portfolio_variance, sharpe_ratio,
    turnover, SharpeQpParams, SLACK_VARIABLE, WEIGHTS_VARIABLE,
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::SharpeQpError;
use crate::market_data::{AssetVector, MarketDataProvider};
use crate::optimizer::{Optimizer, QpSolver, SolveSummary, SolverSettings, MAX_SOLVE_ATTEMPTS};
use crate::portfolio::Portfolio;
use crate::types::{with_metadata, AssetId, ComputationOutput, Money, Rate};
use crate::SharpeQpResult;

/// Relative gap between the direct and homogenized Sharpe ratios above
/// which the back-cast adds a warning.
pub const SHARPE_MISMATCH_TOLERANCE: f64 = 1e-3;

const TURNOVER_SLACK: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Run parameters. Every field has a default so partial config files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub initial_capital: Money,
    /// Per-asset weight cap.
    pub max_weight: f64,
    /// Bound on `sum |w - w0|`.
    pub turnover_limit: f64,
    /// Per-period rate subtracted from alpha.
    pub risk_free_rate: Rate,
    pub solver: SolverSettings,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000000),
            max_weight: 0.03,
            turnover_limit: 0.15,
            risk_free_rate: 0.03 / 250.0,
            solver: SolverSettings::default(),
        }
    }
}

impl WorkspaceConfig {
    pub fn validate(&self) -> SharpeQpResult<()> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(invalid("initial_capital", "Must be positive"));
        }
        if !(self.max_weight > 0.0 && self.max_weight <= 1.0) {
            return Err(invalid("max_weight", "Must lie in (0, 1]"));
        }
        if !self.turnover_limit.is_finite() || self.turnover_limit < 0.0 {
            return Err(invalid("turnover_limit", "Must be finite and non-negative"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(invalid("risk_free_rate", "Must be finite"));
        }
        self.solver.validate()
    }
}

fn invalid(field: &str, reason: &str) -> SharpeQpError {
    SharpeQpError::InvalidInput {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Lifecycle position of a workspace. Each step runs once, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    Initialized,
    Optimized,
    BackcastDone,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Initialized => "initialized",
            Phase::Optimized => "optimized",
            Phase::BackcastDone => "back-cast",
        };
        f.write_str(s)
    }
}

/// One asset of the final portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAllocation {
    pub asset: AssetId,
    /// Optimizer weight before monetary rounding.
    pub weight: f64,
    pub value: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackcastReport {
    pub allocations: Vec<AssetAllocation>,
    /// `1 / √objective`.
    pub sharpe_ratio: f64,
    /// Optimal `xᵀZx` of the homogenized problem.
    pub objective: f64,
    /// `vᵀw / √(wᵀZw)` evaluated on the back-cast weights.
    pub direct_sharpe_ratio: Option<f64>,
    pub expected_excess_return: f64,
    pub volatility: f64,
    pub turnover: f64,
    pub total_value: Money,
    pub solve: SolveSummary,
}

/// Drives one initialize → optimize → back-cast run.
pub struct OptimizationWorkspace<P: MarketDataProvider, S: QpSolver> {
    config: WorkspaceConfig,
    provider: P,
    solver: S,
    phase: Phase,
    portfolio: Option<Portfolio>,
    optimizer: Optimizer,
    anchor: Vec<f64>,
    excess_return: Vec<f64>,
    summary: Option<SolveSummary>,
    warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl<P: MarketDataProvider, S: QpSolver> OptimizationWorkspace<P, S> {
    pub fn new(provider: P, solver: S, config: WorkspaceConfig) -> SharpeQpResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            solver,
            phase: Phase::Created,
            portfolio: None,
            optimizer: Optimizer::new(),
            anchor: Vec::new(),
            excess_return: Vec::new(),
            summary: None,
            warnings: Vec::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn portfolio(&self) -> Option<&Portfolio> {
        self.portfolio.as_ref()
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Build the equal-weight starting portfolio over the provider's universe.
    pub fn initialize_portfolio(&mut self) -> SharpeQpResult<&Portfolio> {
        self.expect_phase(Phase::Created, "initialize the portfolio")?;
        let mut portfolio = Portfolio::new(
            self.config.initial_capital,
            self.provider.universe().to_vec(),
        )?;
        let weights = portfolio.equal_weights();
        portfolio.construct(&weights);
        info!(
            n_assets = portfolio.universe().len(),
            capital = %portfolio.capital(),
            "Portfolio initialized"
        );
        self.phase = Phase::Initialized;
        Ok(&*self.portfolio.insert(portfolio))
    }

    /// Validate market inputs, formulate the homogenized QP against the
    /// current weights and run the retry loop.
    ///
    /// Exhausting the attempts is not an error here; it surfaces at
    /// [`Self::backcast`].
    pub fn optimize(&mut self) -> SharpeQpResult<&SolveSummary> {
        self.expect_phase(Phase::Initialized, "optimize")?;
        let portfolio = self.portfolio.as_ref().ok_or_else(|| SharpeQpError::PhaseOrder {
            operation: "optimize".into(),
            phase: self.phase.to_string(),
        })?;
        let universe = portfolio.universe();

        let covariance = self.provider.covariance();
        if covariance.assets() != universe {
            return Err(SharpeQpError::InvalidInput {
                field: "covariance".into(),
                reason: "Asset order does not match the portfolio universe".into(),
            });
        }
        covariance.validate_psd()?;

        let alpha = self.provider.alpha();
        let mut excess_return = Vec::with_capacity(universe.len());
        for asset in universe {
            let a = *alpha.get(asset).ok_or_else(|| SharpeQpError::MissingAlpha {
                asset: asset.clone(),
            })?;
            if !a.is_finite() {
                return Err(SharpeQpError::InvalidInput {
                    field: format!("alpha[{}]", asset),
                    reason: format!("Non-finite value {}", a),
                });
            }
            excess_return.push(a - self.config.risk_free_rate);
        }

        let anchor = portfolio
            .weight_vector()
            .ok_or_else(|| SharpeQpError::DivisionByZero {
                context: "current portfolio weights".into(),
            })?;

        formulate_sharpe_qp(
            &mut self.optimizer,
            &SharpeQpParams {
                excess_return: &excess_return,
                covariance: covariance.matrix(),
                anchor: &anchor,
                max_weight: self.config.max_weight,
                turnover_limit: self.config.turnover_limit,
            },
        )?;

        let summary = self.optimizer.solve(&self.solver, &self.config.solver)?;
        self.anchor = anchor;
        self.excess_return = excess_return;
        self.phase = Phase::Optimized;
        Ok(&*self.summary.insert(summary))
    }

    /// Map the homogenized solution back to weights and rebuild the portfolio.
    pub fn backcast(&mut self) -> SharpeQpResult<BackcastReport> {
        self.expect_phase(Phase::Optimized, "back-cast")?;
        let summary = self.summary.clone().ok_or_else(|| SharpeQpError::PhaseOrder {
            operation: "back-cast".into(),
            phase: self.phase.to_string(),
        })?;
        let output = self.optimizer.output().ok_or(SharpeQpError::NoSolution {
            attempts: summary.attempts,
        })?;
        let x = output.variables.get(WEIGHTS_VARIABLE).ok_or_else(|| {
            SharpeQpError::DegenerateSolution(format!("Missing variable '{}'", WEIGHTS_VARIABLE))
        })?;

        let sharpe = homogenized_sharpe(output.objective)?;
        let w = normalize_by_sum(x)?;

        let covariance = self.provider.covariance().matrix();
        let expected_excess_return: f64 =
            self.excess_return.iter().zip(&w).map(|(v, w)| v * w).sum();
        let volatility = portfolio_variance(covariance, &w).max(0.0).sqrt();
        let direct = sharpe_ratio(&self.excess_return, covariance, &w);
        let realized_turnover = turnover(&w, &self.anchor);

        match direct {
            Some(d) if ((d - sharpe) / sharpe).abs() > SHARPE_MISMATCH_TOLERANCE => {
                let msg = format!(
                    "Direct Sharpe ratio {:.6} differs from 1/sqrt(objective) {:.6}",
                    d, sharpe
                );
                warn!("{}", msg);
                self.warnings.push(msg);
            }
            None => {
                let msg = "Back-cast portfolio has zero volatility".to_string();
                warn!("{}", msg);
                self.warnings.push(msg);
            }
            _ => {}
        }
        if realized_turnover > self.config.turnover_limit + TURNOVER_SLACK {
            let msg = format!(
                "Turnover {:.6} exceeds limit {:.6}",
                realized_turnover, self.config.turnover_limit
            );
            warn!("{}", msg);
            self.warnings.push(msg);
        }

        let portfolio = self.portfolio.as_mut().ok_or_else(|| SharpeQpError::PhaseOrder {
            operation: "back-cast".into(),
            phase: Phase::Created.to_string(),
        })?;
        let weights: AssetVector = portfolio
            .universe()
            .iter()
            .cloned()
            .zip(w.iter().copied())
            .collect();
        portfolio.construct(&weights);

        let allocations = weights
            .iter()
            .map(|(asset, weight)| AssetAllocation {
                asset: asset.clone(),
                weight: *weight,
                value: portfolio.value().get(asset).copied().unwrap_or(Decimal::ZERO),
            })
            .collect();
        info!(weights = ?weights, "Final weights");
        info!(sharpe_ratio = sharpe, "Sharpe ratio");

        self.phase = Phase::BackcastDone;
        Ok(BackcastReport {
            allocations,
            sharpe_ratio: sharpe,
            objective: output.objective,
            direct_sharpe_ratio: direct,
            expected_excess_return,
            volatility,
            turnover: realized_turnover,
            total_value: portfolio.total_value(),
            solve: summary,
        })
    }

    /// Run all three phases and wrap the report in the standard envelope.
    pub fn run(&mut self) -> SharpeQpResult<ComputationOutput<BackcastReport>> {
        let start = Instant::now();
        self.initialize_portfolio()?;
        self.optimize()?;
        let report = self.backcast()?;

        let assumptions = serde_json::json!({
            "n_assets": report.allocations.len(),
            "initial_capital": self.config.initial_capital.to_string(),
            "max_weight": self.config.max_weight,
            "turnover_limit": self.config.turnover_limit,
            "risk_free_rate": self.config.risk_free_rate,
            "solver": self.solver.name(),
            "max_solve_attempts": MAX_SOLVE_ATTEMPTS,
        });
        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Homogenized Sharpe-ratio QP",
            &assumptions,
            self.warnings.clone(),
            elapsed,
            report,
        ))
    }

    fn expect_phase(&self, expected: Phase, operation: &str) -> SharpeQpResult<()> {
        if self.phase != expected {
            return Err(SharpeQpError::PhaseOrder {
                operation: operation.into(),
                phase: self.phase.to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{CovarianceMatrix, InMemoryMarketData};
    use crate::optimizer::{OptimizationProblem, SolveOutcome, SolveStatus};

    struct Fixed(Vec<f64>, f64);

    impl QpSolver for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn solve(&self, problem: &OptimizationProblem, _: &SolverSettings) -> SolveOutcome {
            let mut x = self.0.clone();
            x.resize(problem.num_variables(), 0.0);
            SolveOutcome::optimal(x, self.1)
        }
    }

    struct Never;

    impl QpSolver for Never {
        fn name(&self) -> &str {
            "never"
        }

        fn solve(&self, _: &OptimizationProblem, _: &SolverSettings) -> SolveOutcome {
            SolveOutcome::failed(SolveStatus::Infeasible, "infeasible")
        }
    }

    fn market() -> InMemoryMarketData {
        let assets = vec!["A".to_string(), "B".to_string()];
        let cov = CovarianceMatrix::from_diagonal(assets.clone(), &[0.04, 0.04]).unwrap();
        let alpha = assets.into_iter().zip([0.02, 0.02]).collect();
        InMemoryMarketData::new(alpha, cov).unwrap()
    }

    fn config() -> WorkspaceConfig {
        WorkspaceConfig {
            initial_capital: dec!(1000),
            max_weight: 1.0,
            risk_free_rate: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_order_enforced() {
        let mut ws = OptimizationWorkspace::new(market(), Never, config()).unwrap();
        assert!(matches!(ws.optimize(), Err(SharpeQpError::PhaseOrder { .. })));
        assert!(matches!(ws.backcast(), Err(SharpeQpError::PhaseOrder { .. })));
        ws.initialize_portfolio().unwrap();
        assert!(matches!(
            ws.initialize_portfolio(),
            Err(SharpeQpError::PhaseOrder { .. })
        ));
    }

    #[test]
    fn test_no_solution_is_fatal_at_backcast() {
        let mut ws = OptimizationWorkspace::new(market(), Never, config()).unwrap();
        ws.initialize_portfolio().unwrap();
        let summary = ws.optimize().unwrap().clone();
        assert_eq!(summary.attempts, MAX_SOLVE_ATTEMPTS);
        assert!(matches!(
            ws.backcast(),
            Err(SharpeQpError::NoSolution { attempts: 3 })
        ));
        // Initial equal-weight portfolio untouched.
        assert_eq!(ws.portfolio().unwrap().value()["A"], dec!(500));
    }

    #[test]
    fn test_backcast_from_fixed_solution() {
        // x = (25, 25): vᵀx = 1, xᵀZx = 50, Sharpe = 1/√50
        let mut ws =
            OptimizationWorkspace::new(market(), Fixed(vec![25.0, 25.0], 50.0), config()).unwrap();
        let out = ws.run().unwrap();
        let report = out.result;
        assert!((report.sharpe_ratio - 1.0 / 50f64.sqrt()).abs() < 1e-12);
        assert!((report.direct_sharpe_ratio.unwrap() - report.sharpe_ratio).abs() < 1e-9);
        assert_eq!(report.total_value, dec!(1000));
        assert_eq!(report.turnover, 0.0);
        assert!(out.warnings.is_empty());
        assert_eq!(ws.phase(), Phase::BackcastDone);
    }

    #[test]
    fn test_degenerate_objective() {
        let mut ws =
            OptimizationWorkspace::new(market(), Fixed(vec![25.0, 25.0], 0.0), config()).unwrap();
        ws.initialize_portfolio().unwrap();
        ws.optimize().unwrap();
        assert!(matches!(
            ws.backcast(),
            Err(SharpeQpError::DegenerateObjective { .. })
        ));
    }

    #[test]
    fn test_mismatch_warning() {
        let mut ws =
            OptimizationWorkspace::new(market(), Fixed(vec![25.0, 25.0], 10.0), config()).unwrap();
        let out = ws.run().unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("Direct Sharpe")));
    }

    #[test]
    fn test_missing_alpha() {
        let assets = vec!["A".to_string(), "B".to_string()];
        let cov = CovarianceMatrix::from_diagonal(assets, &[0.04, 0.04]).unwrap();
        let alpha = [("A".to_string(), 0.01)].into_iter().collect();
        let md = InMemoryMarketData::new(alpha, cov).unwrap();
        let mut ws = OptimizationWorkspace::new(md, Never, config()).unwrap();
        ws.initialize_portfolio().unwrap();
        assert!(matches!(
            ws.optimize(),
            Err(SharpeQpError::MissingAlpha { ref asset }) if asset == "B"
        ));
    }

    #[test]
    fn test_config_validation() {
        let bad = WorkspaceConfig {
            max_weight: 0.0,
            ..Default::default()
        };
        assert!(OptimizationWorkspace::new(market(), Never, bad).is_err());
        let cfg: WorkspaceConfig = serde_json::from_str(r#"{"turnover_limit": 0.3}"#).unwrap();
        assert_eq!(cfg.turnover_limit, 0.3);
        assert_eq!(cfg.initial_capital, dec!(10000000));
    }
}
