//! Homogenized form of the maximum-Sharpe problem.
//!
//! Maximizing `vᵀw / √(wᵀZw)` over `sum(w) = 1` is not convex. Writing
//! `x = a·w` and fixing the scale with `vᵀx = 1` turns it into
//!
//! ```text
//! minimize    xᵀZx
//! subject to  vᵀx = 1
//!             0 <= x_i <= u·sum(x)
//!             sum_i |x_i - w0_i·sum(x)| <= τ·sum(x)
//! ```
//!
//! whose optimum maps back through `w* = x*/sum(x*)` with Sharpe ratio
//! `1/√(x*ᵀZx*)`. The absolute values are linearized with one slack per
//! asset.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::SharpeQpError;
use crate::optimizer::{
    ConstraintGroup, LinearConstraint, LinearExpr, Optimizer, QuadraticExpr, Sense,
};
use crate::SharpeQpResult;

pub const WEIGHTS_VARIABLE: &str = "transformed_weights";
pub const SLACK_VARIABLE: &str = "turnover_slack";

/// Inputs to [`formulate_sharpe_qp`], all in universe order.
#[derive(Debug, Clone, Copy)]
pub struct SharpeQpParams<'a> {
    /// `alpha - risk_free_rate` per asset.
    pub excess_return: &'a [f64],
    pub covariance: &'a DMatrix<f64>,
    /// Current weights; the turnover reference point.
    pub anchor: &'a [f64],
    pub max_weight: f64,
    pub turnover_limit: f64,
}

/// Declare variables, constraint groups and the objective on `optimizer`.
pub fn formulate_sharpe_qp(optimizer: &mut Optimizer, params: &SharpeQpParams) -> SharpeQpResult<()> {
    let n = params.excess_return.len();
    if params.anchor.len() != n || params.covariance.nrows() != n {
        return Err(SharpeQpError::InvalidInput {
            field: "formulation".into(),
            reason: format!(
                "Dimension mismatch: {} excess returns, {} anchor weights, {}x{} covariance",
                n,
                params.anchor.len(),
                params.covariance.nrows(),
                params.covariance.ncols()
            ),
        });
    }
    if !params.excess_return.iter().any(|v| *v > 0.0) {
        warn!("No asset has positive excess return; the normalization row cannot be met");
    }
    if params.max_weight * (n as f64) < 1.0 {
        warn!(
            max_weight = params.max_weight,
            n_assets = n,
            "Weight cap times universe size is below one; the box is infeasible"
        );
    }

    let x = optimizer.add_variable(WEIGHTS_VARIABLE, n)?;
    let t = optimizer.add_variable(SLACK_VARIABLE, n)?;
    let scale = x.sum();

    let mut bounds = Vec::with_capacity(2 * n);
    for i in 0..n {
        bounds.push(LinearConstraint::ge(x.at(i), LinearExpr::zero()));
        bounds.push(LinearConstraint::le(
            x.at(i),
            scale.clone() * params.max_weight,
        ));
    }
    optimizer.add_constraint(ConstraintGroup::BoxBounds, bounds);

    optimizer.add_constraint(
        ConstraintGroup::Normalization,
        vec![LinearConstraint::eq(
            x.dot(params.excess_return),
            LinearExpr::constant(1.0),
        )],
    );

    let mut turnover = Vec::with_capacity(2 * n + 1);
    for i in 0..n {
        let deviation = x.at(i) - scale.clone() * params.anchor[i];
        turnover.push(LinearConstraint::le(deviation.clone(), t.at(i)));
        turnover.push(LinearConstraint::le(-deviation, t.at(i)));
    }
    turnover.push(LinearConstraint::le(
        t.sum(),
        scale.clone() * params.turnover_limit,
    ));
    optimizer.add_constraint(ConstraintGroup::Turnover, turnover);

    optimizer.create_objective(
        QuadraticExpr::quad_form(&x, params.covariance)?,
        Sense::Minimize,
    );
    debug!(n_assets = n, "Formulated homogenized Sharpe QP");
    Ok(())
}

/// `x / sum(x)`. Fails when the sum is not a positive finite number.
pub fn normalize_by_sum(x: &[f64]) -> SharpeQpResult<Vec<f64>> {
    let total: f64 = x.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(SharpeQpError::DegenerateSolution(format!(
            "Transformed weights sum to {}",
            total
        )));
    }
    Ok(x.iter().map(|v| v / total).collect())
}

/// Sharpe ratio implied by the homogenized objective `xᵀZx`.
pub fn homogenized_sharpe(objective: f64) -> SharpeQpResult<f64> {
    if !objective.is_finite() || objective <= 0.0 {
        return Err(SharpeQpError::DegenerateObjective { objective });
    }
    Ok(1.0 / objective.sqrt())
}

/// `vᵀw / √(wᵀZw)`, or `None` for a zero-risk portfolio.
pub fn sharpe_ratio(excess_return: &[f64], covariance: &DMatrix<f64>, w: &[f64]) -> Option<f64> {
    let ret: f64 = excess_return.iter().zip(w).map(|(v, w)| v * w).sum();
    let vol = portfolio_variance(covariance, w).max(0.0).sqrt();
    (vol > 0.0).then(|| ret / vol)
}

/// `wᵀZw`.
pub fn portfolio_variance(covariance: &DMatrix<f64>, w: &[f64]) -> f64 {
    let w = DVector::from_column_slice(w);
    w.dot(&(covariance * &w))
}

/// `sum_i |w_i - anchor_i|`.
pub fn turnover(w: &[f64], anchor: &[f64]) -> f64 {
    w.iter().zip(anchor).map(|(a, b)| (a - b).abs()).sum()
}
