use serde::{Deserialize, Serialize};
use std::fmt;

use super::problem::OptimizationProblem;
use super::settings::SolverSettings;

/// Terminal status of one solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    MaxIterations,
    Inaccurate,
    /// Numerical breakdown inside the backend.
    Error,
}

impl SolveStatus {
    pub fn is_optimal(self) -> bool {
        self == SolveStatus::Optimal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Unbounded => "unbounded",
            SolveStatus::MaxIterations => "max_iterations",
            SolveStatus::Inaccurate => "inaccurate",
            SolveStatus::Error => "error",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a backend reports back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// Primal values for every flattened variable, when the backend produced any.
    pub solution: Option<Vec<f64>>,
    pub objective_value: Option<f64>,
    pub message: Option<String>,
}

impl SolveOutcome {
    pub fn optimal(solution: Vec<f64>, objective_value: f64) -> Self {
        Self {
            status: SolveStatus::Optimal,
            solution: Some(solution),
            objective_value: Some(objective_value),
            message: None,
        }
    }

    pub fn failed(status: SolveStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            solution: None,
            objective_value: None,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::failed(SolveStatus::Error, message)
    }
}

/// A convex QP backend. Failures are reported through [`SolveOutcome`],
/// never by panicking or returning `Err`.
pub trait QpSolver {
    fn name(&self) -> &str;

    fn solve(&self, problem: &OptimizationProblem, settings: &SolverSettings) -> SolveOutcome;
}

impl<S: QpSolver + ?Sized> QpSolver for &S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&self, problem: &OptimizationProblem, settings: &SolverSettings) -> SolveOutcome {
        (**self).solve(problem, settings)
    }
}

impl<S: QpSolver + ?Sized> QpSolver for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&self, problem: &OptimizationProblem, settings: &SolverSettings) -> SolveOutcome {
        (**self).solve(problem, settings)
    }
}
