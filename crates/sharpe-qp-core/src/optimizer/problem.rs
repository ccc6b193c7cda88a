use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Range, Sub};

use crate::error::SharpeQpError;
use crate::SharpeQpResult;

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A named block of contiguous scalar decision variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    name: String,
    offset: usize,
    len: usize,
}

impl Variable {
    pub(crate) fn new(name: String, offset: usize, len: usize) -> Self {
        Self { name, offset, len }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Column of element `i` in the flattened problem.
    pub fn index(&self, i: usize) -> usize {
        debug_assert!(i < self.len, "{}[{}] out of range", self.name, i);
        self.offset + i
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// `x_i` as an expression.
    pub fn at(&self, i: usize) -> LinearExpr {
        LinearExpr::term(self.index(i), 1.0)
    }

    /// `sum_i x_i`.
    pub fn sum(&self) -> LinearExpr {
        self.dot(&vec![1.0; self.len])
    }

    /// `sum_i c_i x_i`.
    pub fn dot(&self, coeffs: &[f64]) -> LinearExpr {
        debug_assert_eq!(coeffs.len(), self.len);
        let mut expr = LinearExpr::zero();
        for (i, c) in coeffs.iter().enumerate() {
            expr.add_term(self.index(i), *c);
        }
        expr
    }
}

// ---------------------------------------------------------------------------
// Linear expressions
// ---------------------------------------------------------------------------

/// Sparse affine expression `sum_k a_k x_k + c`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<usize, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(c: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: c,
        }
    }

    pub fn term(index: usize, coeff: f64) -> Self {
        let mut expr = Self::zero();
        expr.add_term(index, coeff);
        expr
    }

    pub fn add_term(&mut self, index: usize, coeff: f64) {
        if coeff == 0.0 {
            return;
        }
        let entry = self.terms.entry(index).or_insert(0.0);
        *entry += coeff;
        if *entry == 0.0 {
            self.terms.remove(&index);
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.terms.iter().map(|(k, v)| (*k, *v))
    }

    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    pub fn max_index(&self) -> Option<usize> {
        self.terms.keys().next_back().copied()
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(k, v)| v * x[*k])
            .sum::<f64>()
            + self.constant
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: LinearExpr) -> LinearExpr {
        for (k, v) in rhs.terms {
            self.add_term(k, v);
        }
        self.constant += rhs.constant;
        self
    }
}

impl Sub for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: LinearExpr) -> LinearExpr {
        self + (-rhs)
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> LinearExpr {
        self * -1.0
    }
}

impl Mul<f64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(mut self, k: f64) -> LinearExpr {
        if k == 0.0 {
            return LinearExpr::zero();
        }
        for v in self.terms.values_mut() {
            *v *= k;
        }
        self.constant *= k;
        self
    }
}

// ---------------------------------------------------------------------------
// Quadratic expressions
// ---------------------------------------------------------------------------

/// `sum_{i<=j} q_ij x_i x_j + linear`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadraticExpr {
    quadratic: BTreeMap<(usize, usize), f64>,
    linear: LinearExpr,
}

impl QuadraticExpr {
    /// `xᵀ M x` over a variable block. `M` must be square with the block's size.
    pub fn quad_form(var: &Variable, matrix: &DMatrix<f64>) -> SharpeQpResult<Self> {
        if matrix.nrows() != var.len() || matrix.ncols() != var.len() {
            return Err(SharpeQpError::InvalidInput {
                field: "quad_form".into(),
                reason: format!(
                    "Matrix is {}x{} but {} has {} elements",
                    matrix.nrows(),
                    matrix.ncols(),
                    var.name(),
                    var.len()
                ),
            });
        }
        let mut expr = Self::default();
        for i in 0..var.len() {
            for j in 0..var.len() {
                expr.add_product(var.index(i), var.index(j), matrix[(i, j)]);
            }
        }
        Ok(expr)
    }

    /// Add `coeff * x_i * x_j`.
    pub fn add_product(&mut self, i: usize, j: usize, coeff: f64) {
        if coeff == 0.0 {
            return;
        }
        let key = if i <= j { (i, j) } else { (j, i) };
        *self.quadratic.entry(key).or_insert(0.0) += coeff;
    }

    /// Upper-triangular `(i, j, q_ij)` with `i <= j`.
    pub fn quadratic_terms(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.quadratic.iter().map(|((i, j), v)| (*i, *j, *v))
    }

    pub fn linear(&self) -> &LinearExpr {
        &self.linear
    }

    pub fn is_linear(&self) -> bool {
        self.quadratic.values().all(|v| *v == 0.0)
    }

    pub fn max_index(&self) -> Option<usize> {
        let quad = self.quadratic.keys().map(|(_, j)| *j).max();
        quad.max(self.linear.max_index())
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.quadratic
            .iter()
            .map(|((i, j), v)| v * x[*i] * x[*j])
            .sum::<f64>()
            + self.linear.evaluate(x)
    }
}

impl From<LinearExpr> for QuadraticExpr {
    fn from(linear: LinearExpr) -> Self {
        Self {
            quadratic: BTreeMap::new(),
            linear,
        }
    }
}

impl Neg for QuadraticExpr {
    type Output = QuadraticExpr;

    fn neg(mut self) -> QuadraticExpr {
        for v in self.quadratic.values_mut() {
            *v = -*v;
        }
        self.linear = -self.linear;
        self
    }
}

// ---------------------------------------------------------------------------
// Objective
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub expr: QuadraticExpr,
    pub sense: Sense,
}

impl Objective {
    /// The expression to minimize: negated when maximizing.
    pub fn minimization_form(&self) -> QuadraticExpr {
        match self.sense {
            Sense::Minimize => self.expr.clone(),
            Sense::Maximize => -self.expr.clone(),
        }
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.expr.evaluate(x)
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.expr.is_linear() {
            "linear"
        } else {
            "quadratic"
        };
        let sense = match self.sense {
            Sense::Minimize => "minimize",
            Sense::Maximize => "maximize",
        };
        write!(f, "{} {}", sense, kind)
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `expr == 0`
    Equal,
    /// `expr <= 0`
    LessEqual,
}

/// A single affine constraint, stored as `expr (==|<=) 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    expr: LinearExpr,
    kind: ConstraintKind,
}

impl LinearConstraint {
    pub fn eq(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        Self {
            expr: lhs - rhs,
            kind: ConstraintKind::Equal,
        }
    }

    pub fn le(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        Self {
            expr: lhs - rhs,
            kind: ConstraintKind::LessEqual,
        }
    }

    pub fn ge(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        Self::le(rhs, lhs)
    }

    pub fn expr(&self) -> &LinearExpr {
        &self.expr
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    /// Amount by which `x` violates the constraint (zero when satisfied).
    pub fn violation(&self, x: &[f64]) -> f64 {
        let v = self.expr.evaluate(x);
        match self.kind {
            ConstraintKind::Equal => v.abs(),
            ConstraintKind::LessEqual => v.max(0.0),
        }
    }
}

/// Semantic constraint groups. Groups are flattened in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintGroup {
    BoxBounds,
    Normalization,
    Turnover,
}

impl ConstraintGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintGroup::BoxBounds => "box_bounds",
            ConstraintGroup::Normalization => "normalization",
            ConstraintGroup::Turnover => "turnover",
        }
    }
}

impl fmt::Display for ConstraintGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Flattened problem
// ---------------------------------------------------------------------------

/// One self-contained problem instance handed to a solver backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationProblem {
    num_variables: usize,
    objective: Objective,
    constraints: Vec<LinearConstraint>,
}

impl OptimizationProblem {
    pub fn new(
        num_variables: usize,
        objective: Objective,
        constraints: Vec<LinearConstraint>,
    ) -> SharpeQpResult<Self> {
        let out_of_range = |idx: Option<usize>| idx.is_some_and(|k| k >= num_variables);
        if out_of_range(objective.expr.max_index()) {
            return Err(SharpeQpError::InvalidInput {
                field: "objective".into(),
                reason: "References an undeclared variable".into(),
            });
        }
        if let Some(pos) = constraints
            .iter()
            .position(|c| out_of_range(c.expr.max_index()))
        {
            return Err(SharpeQpError::InvalidInput {
                field: format!("constraints[{}]", pos),
                reason: "References an undeclared variable".into(),
            });
        }
        Ok(Self {
            num_variables,
            objective,
            constraints,
        })
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn max_violation(&self, x: &[f64]) -> f64 {
        self.constraints
            .iter()
            .map(|c| c.violation(x))
            .fold(0.0, f64::max)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
