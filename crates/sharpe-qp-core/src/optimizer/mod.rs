//! Generic QP container and the bounded-retry solve protocol.
//!
//! Callers declare named variable blocks, register constraints under a
//! [`ConstraintGroup`] and set one objective. [`Optimizer::solve`] then
//! assembles a fresh [`OptimizationProblem`] per attempt and hands it to a
//! [`QpSolver`] backend, stopping at the first optimal result or after
//! [`MAX_SOLVE_ATTEMPTS`].

#[cfg(feature = "clarabel")]
pub mod clarabel_backend;
pub mod problem;
pub mod settings;
pub mod solver;

#[cfg(feature = "clarabel")]
pub use clarabel_backend::ClarabelSolver;
pub use problem::{
    ConstraintGroup, ConstraintKind, LinearConstraint, LinearExpr, Objective,
    OptimizationProblem, QuadraticExpr, Sense, Variable,
};
pub use settings::SolverSettings;
pub use solver::{QpSolver, SolveOutcome, SolveStatus};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::SharpeQpError;
use crate::SharpeQpResult;

/// Attempts per [`Optimizer::solve`] call. Settings are identical on every attempt.
pub const MAX_SOLVE_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of the retry loop. Exhausting the budget is not an error here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    pub attempts: u32,
    /// Status of the last attempt.
    pub status: SolveStatus,
    pub constraint_groups: Vec<ConstraintGroup>,
    /// One line per failed attempt.
    pub diagnostics: Vec<String>,
}

/// Solution values keyed by declared variable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOutput {
    pub variables: BTreeMap<String, Vec<f64>>,
    pub objective: f64,
}

#[derive(Debug, Clone)]
struct SolvedState {
    status: SolveStatus,
    solution: Vec<f64>,
    objective_value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    variables: Vec<Variable>,
    num_variables: usize,
    constraints: BTreeMap<ConstraintGroup, Vec<LinearConstraint>>,
    objective: Option<Objective>,
    solved: Option<SolvedState>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a block of `len` scalar variables.
    pub fn add_variable(&mut self, name: &str, len: usize) -> SharpeQpResult<Variable> {
        if len == 0 {
            return Err(SharpeQpError::InvalidInput {
                field: name.into(),
                reason: "Variable must have at least one element".into(),
            });
        }
        if self.variable(name).is_some() {
            return Err(SharpeQpError::InvalidInput {
                field: name.into(),
                reason: "Variable already declared".into(),
            });
        }
        let var = Variable::new(name.to_string(), self.num_variables, len);
        self.num_variables += len;
        self.variables.push(var.clone());
        debug!(name, len, "Declared variable");
        Ok(var)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Register `constraints` under `group`, replacing whatever the group held.
    pub fn add_constraint(&mut self, group: ConstraintGroup, constraints: Vec<LinearConstraint>) {
        if self.constraints.insert(group, constraints).is_some() {
            debug!(%group, "Replaced constraint group");
        }
    }

    pub fn remove_constraint(&mut self, group: ConstraintGroup) -> Option<Vec<LinearConstraint>> {
        self.constraints.remove(&group)
    }

    pub fn constraint_groups(&self) -> Vec<ConstraintGroup> {
        self.constraints.keys().copied().collect()
    }

    pub fn create_objective(&mut self, expr: impl Into<QuadraticExpr>, sense: Sense) {
        self.objective = Some(Objective {
            expr: expr.into(),
            sense,
        });
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    /// Flatten the current declarations into one problem instance, groups
    /// in [`ConstraintGroup`] order.
    pub fn problem(&self) -> SharpeQpResult<OptimizationProblem> {
        let objective = self.objective.clone().ok_or_else(|| SharpeQpError::InvalidInput {
            field: "objective".into(),
            reason: "No objective has been set".into(),
        })?;
        let constraints = self.constraints.values().flatten().cloned().collect();
        OptimizationProblem::new(self.num_variables, objective, constraints)
    }

    /// Run up to [`MAX_SOLVE_ATTEMPTS`] attempts against `solver`.
    ///
    /// Only malformed problems and invalid settings are `Err`. Backend
    /// failures and non-optimal terminations each consume one attempt.
    pub fn solve(
        &mut self,
        solver: &dyn QpSolver,
        settings: &SolverSettings,
    ) -> SharpeQpResult<SolveSummary> {
        settings.validate()?;
        let groups = self.constraint_groups();
        let group_names: Vec<&str> = groups.iter().map(|g| g.as_str()).collect();
        debug!(?settings, backend = solver.name(), "Solver settings");

        self.solved = None;
        let mut diagnostics = Vec::new();
        let mut status = SolveStatus::Error;
        let mut attempts = 0;

        while attempts < MAX_SOLVE_ATTEMPTS {
            attempts += 1;
            let problem = self.problem()?;
            info!(
                attempt = attempts,
                constraints = ?group_names,
                variables = problem.num_variables(),
                "Solving problem"
            );

            let outcome = solver.solve(&problem, settings);
            status = outcome.status;
            self.solved = match outcome.solution {
                Some(x) if x.len() == problem.num_variables() => {
                    let objective_value = outcome
                        .objective_value
                        .unwrap_or_else(|| problem.objective().evaluate(&x));
                    Some(SolvedState {
                        status,
                        solution: x,
                        objective_value,
                    })
                }
                Some(x) => {
                    status = SolveStatus::Error;
                    warn!(
                        expected = problem.num_variables(),
                        got = x.len(),
                        "Solver returned a solution of the wrong size"
                    );
                    None
                }
                None => None,
            };

            if status.is_optimal() && self.solved.is_some() {
                info!(attempt = attempts, "Problem solved");
                break;
            }
            if status.is_optimal() {
                status = SolveStatus::Error;
            }
            let line = format!(
                "attempt {}: {}{}",
                attempts,
                status,
                outcome
                    .message
                    .as_deref()
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            );
            warn!(attempt = attempts, %status, "Problem not solved");
            diagnostics.push(line);
        }

        if !status.is_optimal() {
            warn!(attempts, "Solve attempts exhausted without an optimal solution");
        }
        Ok(SolveSummary {
            attempts,
            status,
            constraint_groups: groups,
            diagnostics,
        })
    }

    /// Variable values and objective, present only when the last attempt
    /// was optimal.
    pub fn output(&self) -> Option<OptimizerOutput> {
        let solved = self.solved.as_ref().filter(|s| s.status.is_optimal())?;
        let variables = self
            .variables
            .iter()
            .map(|v| (v.name().to_string(), solved.solution[v.range()].to_vec()))
            .collect();
        Some(OptimizerOutput {
            variables,
            objective: solved.objective_value,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
