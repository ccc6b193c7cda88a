#![cfg(feature = "clarabel")]

use rust_decimal_macros::dec;
use sharpe_qp_core::market_data::{CovarianceMatrix, InMemoryMarketData, MarketSnapshotInput};
use sharpe_qp_core::optimizer::{ClarabelSolver, MAX_SOLVE_ATTEMPTS};
use sharpe_qp_core::workspace::{OptimizationWorkspace, Phase, WorkspaceConfig};
use sharpe_qp_core::SharpeQpError;

const TOL: f64 = 1e-4;

fn abc_market() -> InMemoryMarketData {
    let assets = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    let cov = CovarianceMatrix::from_diagonal(assets.clone(), &[0.0004, 0.0009, 0.0001]).unwrap();
    let alpha = assets.into_iter().zip([0.001, 0.002, 0.0015]).collect();
    InMemoryMarketData::new(alpha, cov).unwrap()
}

fn config(max_weight: f64) -> WorkspaceConfig {
    WorkspaceConfig {
        initial_capital: dec!(1000000),
        max_weight,
        ..Default::default()
    }
}

#[test]
fn test_end_to_end_three_assets() {
    let mut ws = OptimizationWorkspace::new(abc_market(), ClarabelSolver, config(1.0)).unwrap();
    let output = ws.run().unwrap();
    let report = &output.result;

    let w: Vec<f64> = report.allocations.iter().map(|a| a.weight).collect();
    assert_eq!(w.len(), 3);
    assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    for wi in &w {
        assert!(*wi >= -TOL && *wi <= 1.0 + TOL, "weight {} outside box", wi);
    }
    // C has the best return per unit of risk, B the worst.
    assert!(w[2] > w[1]);

    let turnover: f64 = w.iter().map(|wi| (wi - 1.0 / 3.0).abs()).sum();
    assert!(turnover <= 0.15 + TOL, "turnover {}", turnover);
    assert!((report.turnover - turnover).abs() < 1e-12);

    // Equal weighting gives 0.00138 / sqrt(0.0014 / 9) ≈ 0.1106.
    assert!(report.sharpe_ratio > 0.1106);
    let direct = report.direct_sharpe_ratio.unwrap();
    assert!(((direct - report.sharpe_ratio) / report.sharpe_ratio).abs() < 1e-3);
    assert!(output.warnings.is_empty(), "{:?}", output.warnings);

    assert_eq!(report.solve.attempts, 1);
    assert_eq!(ws.phase(), Phase::BackcastDone);
    let values = ws.portfolio().unwrap().value();
    assert!(values["C"] > values["B"]);
    assert_eq!(output.metadata.precision, "ieee754_f64");
}

#[test]
fn test_weight_cap_respected() {
    let mut ws = OptimizationWorkspace::new(abc_market(), ClarabelSolver, config(0.4)).unwrap();
    let report = ws.run().unwrap().result;
    for a in &report.allocations {
        assert!(a.weight <= 0.4 + TOL, "{} weight {}", a.asset, a.weight);
    }
}

#[test]
fn test_infeasible_box_gives_no_solution() {
    // Three assets capped at 3% each cannot sum to one.
    let mut ws = OptimizationWorkspace::new(abc_market(), ClarabelSolver, config(0.03)).unwrap();
    ws.initialize_portfolio().unwrap();
    let summary = ws.optimize().unwrap();
    assert_eq!(summary.attempts, MAX_SOLVE_ATTEMPTS);
    assert!(!summary.status.is_optimal());
    assert!(matches!(
        ws.backcast(),
        Err(SharpeQpError::NoSolution { attempts: 3 })
    ));
}

#[test]
fn test_indefinite_covariance_rejected() {
    let snapshot = MarketSnapshotInput {
        assets: vec!["A".into(), "B".into()],
        alpha: vec![0.001, 0.002],
        covariance_matrix: vec![vec![0.0001, 0.01], vec![0.01, 0.0001]],
    };
    let md = snapshot.into_provider().unwrap();
    let mut ws = OptimizationWorkspace::new(md, ClarabelSolver, config(1.0)).unwrap();
    ws.initialize_portfolio().unwrap();
    assert!(matches!(
        ws.optimize(),
        Err(SharpeQpError::CovarianceNotPsd { .. })
    ));
}
