use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

use super::problem::{ConstraintKind, LinearConstraint, OptimizationProblem, QuadraticExpr};
use super::settings::SolverSettings;
use super::solver::{QpSolver, SolveOutcome, SolveStatus};

/// Interior-point QP backend built on Clarabel.
///
/// Clarabel minimizes `½xᵀPx + qᵀx` subject to `Ax + s = b`, `s ∈ K`.
/// Equality rows go into a zero cone, inequality rows into the
/// nonnegative orthant. Only `max_iter`, `eps_abs`, `eps_rel`, `verbose`
/// and `time_limit` have Clarabel counterparts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelSolver;

impl QpSolver for ClarabelSolver {
    fn name(&self) -> &str {
        "clarabel"
    }

    fn solve(&self, problem: &OptimizationProblem, settings: &SolverSettings) -> SolveOutcome {
        let n = problem.num_variables();
        let objective = problem.objective().minimization_form();
        let p = hessian_upper(&objective, n);
        let mut q = vec![0.0; n];
        for (k, c) in objective.linear().terms() {
            q[k] = c;
        }
        let (a, b, cones) = constraint_system(problem.constraints(), n);
        debug!(
            variables = n,
            rows = b.len(),
            p_nnz = p.nzval.len(),
            a_nnz = a.nzval.len(),
            "Assembled Clarabel problem"
        );

        let clarabel_settings = match DefaultSettingsBuilder::default()
            .max_iter(settings.max_iter)
            .verbose(settings.verbose)
            .tol_gap_abs(settings.eps_abs)
            .tol_gap_rel(settings.eps_rel)
            .tol_feas(settings.eps_abs)
            .time_limit(settings.time_limit.unwrap_or(f64::INFINITY))
            .build()
        {
            Ok(s) => s,
            Err(e) => return SolveOutcome::error(format!("Invalid Clarabel settings: {}", e)),
        };

        let run = catch_unwind(AssertUnwindSafe(|| {
            let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, clarabel_settings)
                .map_err(|e| format!("Failed to create solver: {:?}", e))?;
            solver.solve();
            Ok::<_, String>((solver.solution.status, solver.solution.x.clone()))
        }));
        let (status, x) = match run {
            Ok(Ok(result)) => result,
            Ok(Err(msg)) => return SolveOutcome::error(msg),
            Err(_) => return SolveOutcome::error("Clarabel panicked during solve"),
        };

        if x.len() != n || x.iter().any(|v| !v.is_finite()) {
            return SolveOutcome::error(format!("Non-finite solution with status {:?}", status));
        }
        SolveOutcome {
            status: map_status(status),
            objective_value: Some(problem.objective().evaluate(&x)),
            solution: Some(x),
            message: Some(format!("{:?}", status)),
        }
    }
}

fn map_status(status: SolverStatus) -> SolveStatus {
    #[allow(unreachable_patterns)]
    match status {
        SolverStatus::Solved => SolveStatus::Optimal,
        SolverStatus::AlmostSolved => SolveStatus::Inaccurate,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            SolveStatus::Infeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            SolveStatus::Unbounded
        }
        SolverStatus::MaxIterations | SolverStatus::MaxTime => SolveStatus::MaxIterations,
        _ => SolveStatus::Error,
    }
}

/// Upper triangle of `P` in CSC form. A term `q_ij x_i x_j` contributes
/// `2 q_ii` on the diagonal and `q_ij` off it.
fn hessian_upper(objective: &QuadraticExpr, n: usize) -> CscMatrix<f64> {
    let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (i, j, c) in objective.quadratic_terms() {
        let value = if i == j { 2.0 * c } else { c };
        columns[j].push((i, value));
    }
    into_csc(n, n, columns)
}

fn constraint_system(
    constraints: &[LinearConstraint],
    n: usize,
) -> (CscMatrix<f64>, Vec<f64>, Vec<SupportedConeT<f64>>) {
    let equalities = constraints
        .iter()
        .filter(|c| c.kind() == ConstraintKind::Equal);
    let inequalities = constraints
        .iter()
        .filter(|c| c.kind() == ConstraintKind::LessEqual);
    let n_eq = equalities.clone().count();

    // Row `a·x + c (==|<=) 0` becomes `a·x + s = -c`.
    let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut b = Vec::with_capacity(constraints.len());
    for (row, c) in equalities.chain(inequalities).enumerate() {
        for (k, coeff) in c.expr().terms() {
            columns[k].push((row, coeff));
        }
        b.push(-c.expr().constant_term());
    }

    let mut cones = Vec::new();
    if n_eq > 0 {
        cones.push(ZeroConeT(n_eq));
    }
    if b.len() > n_eq {
        cones.push(NonnegativeConeT(b.len() - n_eq));
    }
    (into_csc(b.len(), n, columns), b, cones)
}

fn into_csc(m: usize, n: usize, mut columns: Vec<Vec<(usize, f64)>>) -> CscMatrix<f64> {
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for col in columns.iter_mut() {
        col.sort_by_key(|(row, _)| *row);
        for (row, v) in col.iter() {
            rowval.push(*row);
            nzval.push(*v);
        }
        colptr.push(rowval.len());
    }
    CscMatrix::new(m, n, colptr, rowval, nzval)
}
