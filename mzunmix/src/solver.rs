//! Non-negative, L1-regularized least squares solvers.
//!
//! Every solver minimizes
//!
//! ```math
//! \frac{1}{2}\|y - X\beta\|_2^2 + \lambda \|\beta\|_1 \quad \text{s.t. } \beta \ge 0
//! ```
//!
//! Under the sign constraint the penalty reduces to $`\lambda \sum_k \beta_k`$, a uniform
//! shrinkage of every coefficient. The problem is convex, so every solver reaches the
//! same objective value up to the convergence tolerance, though when columns are
//! collinear the minimizing $`\beta`$ itself need not be unique.
use nalgebra::{DMatrix, DVector};

use crate::errors::{ConfigurationError, DeconvolutionError};

/// Coefficients below this are treated as exactly zero when counting the
/// active set
pub const ACTIVE_THRESHOLD: f64 = 1e-12;

/// Columns whose entries all differ by less than this are treated as identical
pub const IDENTICAL_COLUMN_TOLERANCE: f64 = 1e-12;

/// Shared stopping rules for iterative solvers
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverParams {
    /// The maximum number of iterations (sweeps for coordinate descent)
    pub max_iterations: usize,
    /// The largest tolerated violation of the KKT optimality conditions
    pub tolerance: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            tolerance: 1e-10,
        }
    }
}

impl SolverParams {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_iterations == 0 {
            Err(ConfigurationError::InvalidIterationBudget)
        } else if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            Err(ConfigurationError::InvalidConvergenceTolerance(self.tolerance))
        } else {
            Ok(())
        }
    }
}

/// The result of a single solve at a fixed regularization strength
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    /// The non-negative coefficients, one per design matrix column
    pub beta: DVector<f64>,
    /// The number of iterations performed
    pub iterations: usize,
    /// Whether the KKT violation fell below the tolerance
    pub converged: bool,
    /// The largest KKT violation of `beta`
    pub kkt_violation: f64,
    /// The residual sum of squares $`\|y - X\beta\|_2^2`$
    pub rss: f64,
    /// The penalized objective value
    pub objective: f64,
}

impl SolverOutcome {
    fn zero(design: &DMatrix<f64>, response: &DVector<f64>) -> Self {
        let rss = response.norm_squared();
        Self {
            beta: DVector::zeros(design.ncols()),
            iterations: 0,
            converged: true,
            kkt_violation: 0.0,
            rss,
            objective: 0.5 * rss,
        }
    }

    /// The number of coefficients above [`ACTIVE_THRESHOLD`]
    pub fn active_count(&self) -> usize {
        self.beta.iter().filter(|b| **b > ACTIVE_THRESHOLD).count()
    }
}

/// Check that `design` and `response` describe the same channels
pub fn check_dimensions(
    design: &DMatrix<f64>,
    response: &DVector<f64>,
) -> Result<(), DeconvolutionError> {
    if design.nrows() != response.len() {
        Err(DeconvolutionError::DimensionMismatch {
            spectrum_id: None,
            rows: design.nrows(),
            columns: design.ncols(),
            response_len: response.len(),
        })
    } else {
        Ok(())
    }
}

/// The penalized objective $`\frac{1}{2}\|y - X\beta\|^2 + \lambda\sum\beta`$ and the
/// residual sum of squares of `beta`
pub fn objective(
    design: &DMatrix<f64>,
    response: &DVector<f64>,
    beta: &DVector<f64>,
    lambda: f64,
) -> (f64, f64) {
    let rss = (response - design * beta).norm_squared();
    (0.5 * rss + lambda * beta.sum(), rss)
}

/// The normal equations $`G = X^TX`$, $`c = X^Ty`$ shared by the solvers
#[derive(Debug, Clone)]
struct GramSystem {
    gram: DMatrix<f64>,
    xty: DVector<f64>,
    /// Columns with a non-zero norm. The rest are fixed at zero.
    active: Vec<bool>,
}

impl GramSystem {
    fn new(design: &DMatrix<f64>, response: &DVector<f64>) -> Self {
        let gram = design.tr_mul(design);
        let xty = design.tr_mul(response);
        let active = (0..gram.ncols()).map(|j| gram[(j, j)] > 0.0).collect();
        Self { gram, xty, active }
    }

    fn len(&self) -> usize {
        self.xty.len()
    }

    /// The gradient of the penalized objective, $`G\beta - c + \lambda`$
    fn gradient(&self, beta: &DVector<f64>, lambda: f64) -> DVector<f64> {
        let mut grad = &self.gram * beta - &self.xty;
        grad.add_scalar_mut(lambda);
        grad
    }

    /// A Gershgorin bound on the largest eigenvalue of the Gram matrix
    fn lipschitz(&self) -> f64 {
        self.gram
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    fn project(&self, beta: &mut DVector<f64>) {
        for (b, active) in beta.iter_mut().zip(self.active.iter()) {
            if !*active || *b < 0.0 {
                *b = 0.0;
            }
        }
    }

    fn kkt_violation_from_gradient(&self, beta: &DVector<f64>, grad: &DVector<f64>) -> f64 {
        beta.iter()
            .zip(grad.iter())
            .zip(self.active.iter())
            .filter(|(_, active)| **active)
            .map(|((b, g), _)| if *b > 0.0 { g.abs() } else { (-g).max(0.0) })
            .fold(0.0, f64::max)
    }

    fn kkt_violation(&self, beta: &DVector<f64>, lambda: f64) -> f64 {
        let grad = self.gradient(beta, lambda);
        self.kkt_violation_from_gradient(beta, &grad)
    }

    /// The KKT violation and the penalized objective of `beta`, the latter
    /// offset by the constant $`\frac{1}{2}\|y\|^2`$
    fn evaluate(&self, beta: &DVector<f64>, lambda: f64) -> (f64, f64) {
        let g_beta = &self.gram * beta;
        let objective = 0.5 * beta.dot(&g_beta) - self.xty.dot(beta) + lambda * beta.sum();
        let mut grad = g_beta - &self.xty;
        grad.add_scalar_mut(lambda);
        (self.kkt_violation_from_gradient(beta, &grad), objective)
    }
}

/// Groups of two or more non-zero columns of `design` with identical entries
fn identical_column_groups(design: &DMatrix<f64>) -> Vec<Vec<usize>> {
    let k = design.ncols();
    let mut grouped = vec![false; k];
    let mut groups = Vec::new();
    for i in 0..k {
        if grouped[i] || design.column(i).amax() == 0.0 {
            continue;
        }
        let mut group = vec![i];
        for j in (i + 1)..k {
            if grouped[j] {
                continue;
            }
            if (design.column(i) - design.column(j)).amax() <= IDENTICAL_COLUMN_TOLERANCE {
                grouped[j] = true;
                group.push(j);
            }
        }
        if group.len() > 1 {
            groups.push(group);
        }
    }
    groups
}

/// Spread the total weight of each group of identical columns evenly over
/// its members. $`X\beta`$ and $`\sum\beta`$ are unchanged.
///
/// Returns whether any group was found.
fn balance_identical_columns(design: &DMatrix<f64>, beta: &mut DVector<f64>) -> bool {
    let groups = identical_column_groups(design);
    for group in groups.iter() {
        let share = group.iter().map(|j| beta[*j]).sum::<f64>() / group.len() as f64;
        for j in group.iter() {
            beta[*j] = share;
        }
    }
    !groups.is_empty()
}

/// A strategy for solving the non-negative LASSO problem
pub trait SparseSolver {
    /// Minimize the penalized objective for `design` and `response` at `lambda`.
    ///
    /// Returns the best iterate even if the iteration budget runs out before
    /// convergence, with [`SolverOutcome::converged`] unset.
    fn solve(
        &self,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
    ) -> Result<SolverOutcome, DeconvolutionError>;

    fn params(&self) -> &SolverParams;
}

/// Accelerated projected gradient descent (FISTA) with adaptive restart.
///
/// Starting from zero, collinear columns receive identical updates, so
/// identical candidates split their shared signal evenly.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProjectedGradientSolver {
    pub params: SolverParams,
}

impl ProjectedGradientSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }
}

impl SparseSolver for ProjectedGradientSolver {
    fn solve(
        &self,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
    ) -> Result<SolverOutcome, DeconvolutionError> {
        check_dimensions(design, response)?;
        if design.nrows() == 0 || design.ncols() == 0 {
            return Ok(SolverOutcome::zero(design, response));
        }
        let system = GramSystem::new(design, response);
        let lipschitz = system.lipschitz();
        if lipschitz <= 0.0 {
            return Ok(SolverOutcome::zero(design, response));
        }
        let step = lipschitz.recip();

        let mut beta = DVector::<f64>::zeros(system.len());
        let mut momentum = beta.clone();
        let mut t = 1.0f64;
        let mut iterations = 0;
        let (mut violation, start) = system.evaluate(&beta, lambda);
        // The lowest-objective iterate so far, returned if the budget runs out
        let mut best = (start, beta.clone(), violation);

        while violation > self.params.tolerance && iterations < self.params.max_iterations {
            iterations += 1;
            let grad = system.gradient(&momentum, lambda);
            let mut next = &momentum - grad * step;
            system.project(&mut next);

            // Drop the momentum whenever it points uphill
            if (&momentum - &next).dot(&(&next - &beta)) > 0.0 {
                t = 1.0;
                momentum.copy_from(&next);
            } else {
                let t_next = (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0;
                momentum = &next + (&next - &beta) * ((t - 1.0) / t_next);
                t = t_next;
            }
            beta = next;
            let (current_violation, current) = system.evaluate(&beta, lambda);
            violation = current_violation;
            if current < best.0 {
                best = (current, beta.clone(), violation);
            }
        }

        let converged = violation <= self.params.tolerance;
        if !converged {
            (_, beta, violation) = best;
            tracing::trace!(
                "Projected gradient stopped after {iterations} iterations with KKT violation {violation:0.3e}"
            );
        }
        let (objective, rss) = objective(design, response, &beta, lambda);
        Ok(SolverOutcome {
            beta,
            iterations,
            converged,
            kkt_violation: violation,
            rss,
            objective,
        })
    }

    fn params(&self) -> &SolverParams {
        &self.params
    }
}

/// Cyclic coordinate descent with non-negative soft thresholding.
///
/// Each coordinate update is
/// ```math
/// \beta_j \leftarrow \max\left(0, \beta_j - \frac{(G\beta)_j - c_j + \lambda}{G_{jj}}\right)
/// ```
///
/// The sweep order favors earlier columns, so after the sweeps the weight of
/// each group of identical columns is split evenly among them.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoordinateDescentSolver {
    pub params: SolverParams,
}

impl CoordinateDescentSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }
}

impl SparseSolver for CoordinateDescentSolver {
    fn solve(
        &self,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
    ) -> Result<SolverOutcome, DeconvolutionError> {
        check_dimensions(design, response)?;
        if design.nrows() == 0 || design.ncols() == 0 {
            return Ok(SolverOutcome::zero(design, response));
        }
        let system = GramSystem::new(design, response);
        let k = system.len();

        let mut beta = DVector::<f64>::zeros(k);
        // Running value of G * beta
        let mut g_beta = DVector::<f64>::zeros(k);
        let mut iterations = 0;
        let mut violation = system.kkt_violation(&beta, lambda);

        while violation > self.params.tolerance && iterations < self.params.max_iterations {
            iterations += 1;
            for j in (0..k).filter(|j| system.active[*j]) {
                let diag = system.gram[(j, j)];
                let grad_j = g_beta[j] - system.xty[j] + lambda;
                let updated = (beta[j] - grad_j / diag).max(0.0);
                let delta = updated - beta[j];
                if delta != 0.0 {
                    beta[j] = updated;
                    g_beta.axpy(delta, &system.gram.column(j), 1.0);
                }
            }
            let mut grad = &g_beta - &system.xty;
            grad.add_scalar_mut(lambda);
            violation = system.kkt_violation_from_gradient(&beta, &grad);
        }
        if balance_identical_columns(design, &mut beta) {
            violation = system.kkt_violation(&beta, lambda);
        }

        let (objective, rss) = objective(design, response, &beta, lambda);
        let converged = violation <= self.params.tolerance;
        if !converged {
            tracing::trace!(
                "Coordinate descent stopped after {iterations} sweeps with KKT violation {violation:0.3e}"
            );
        }
        Ok(SolverOutcome {
            beta,
            iterations,
            converged,
            kkt_violation: violation,
            rss,
            objective,
        })
    }

    fn params(&self) -> &SolverParams {
        &self.params
    }
}

/// An algebraic data structure for choosing a [`SparseSolver`] at runtime
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverLike {
    ProjectedGradient(ProjectedGradientSolver),
    CoordinateDescent(CoordinateDescentSolver),
}

impl Default for SolverLike {
    fn default() -> Self {
        Self::ProjectedGradient(ProjectedGradientSolver::default())
    }
}

impl From<ProjectedGradientSolver> for SolverLike {
    fn from(value: ProjectedGradientSolver) -> Self {
        Self::ProjectedGradient(value)
    }
}

impl From<CoordinateDescentSolver> for SolverLike {
    fn from(value: CoordinateDescentSolver) -> Self {
        Self::CoordinateDescent(value)
    }
}

impl SparseSolver for SolverLike {
    fn solve(
        &self,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
    ) -> Result<SolverOutcome, DeconvolutionError> {
        match self {
            SolverLike::ProjectedGradient(s) => s.solve(design, response, lambda),
            SolverLike::CoordinateDescent(s) => s.solve(design, response, lambda),
        }
    }

    fn params(&self) -> &SolverParams {
        match self {
            SolverLike::ProjectedGradient(s) => s.params(),
            SolverLike::CoordinateDescent(s) => s.params(),
        }
    }
}
