//! Selection of the regularization strength λ from a fixed grid.
use std::fmt::Display;

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::errors::{ConfigurationError, DeconvolutionError};
use crate::solver::{SolverOutcome, SparseSolver};

/// Scores closer than this are considered tied
pub const SCORE_TIE_TOLERANCE: f64 = 1e-12;

/// A sorted, de-duplicated set of non-negative regularization strengths
/// which always includes the unregularized fit, λ = 0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<f64>", into = "Vec<f64>"))]
pub struct LambdaGrid {
    values: Vec<f64>,
}

impl LambdaGrid {
    pub fn new(mut values: Vec<f64>) -> Result<Self, ConfigurationError> {
        if values.is_empty() {
            return Err(ConfigurationError::EmptyLambdaGrid);
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(ConfigurationError::InvalidLambda(*bad));
        }
        if !values.iter().any(|v| *v == 0.0) {
            return Err(ConfigurationError::MissingZeroLambda);
        }
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        // Collapse -0.0 into 0.0 so the grid prints cleanly
        for v in values.iter_mut() {
            *v = v.abs();
        }
        Ok(Self { values })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, f64>> {
        self.values.iter().copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

impl Default for LambdaGrid {
    fn default() -> Self {
        Self {
            values: vec![0.0, 1e-4, 1e-3, 1e-2, 1e-1],
        }
    }
}

impl TryFrom<Vec<f64>> for LambdaGrid {
    type Error = ConfigurationError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LambdaGrid> for Vec<f64> {
    fn from(value: LambdaGrid) -> Self {
        value.values
    }
}

impl Display for LambdaGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.values.iter().join(","))
    }
}

/// A criterion value, and whether every solve behind it converged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriterionScore {
    pub value: f64,
    pub converged: bool,
}

impl CriterionScore {
    pub fn new(value: f64, converged: bool) -> Self {
        Self { value, converged }
    }
}

/// A rule for scoring a fit at one regularization strength. Lower scores
/// are better.
pub trait SelectionCriterion {
    fn score<S: SparseSolver>(
        &self,
        solver: &S,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
        fit: &SolverOutcome,
    ) -> Result<CriterionScore, DeconvolutionError>;

    fn name(&self) -> &'static str;

    /// Check the criterion's own settings before any spectrum is scored
    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

/// Likelihood-based criteria which trade the residual error against the
/// number of non-zero coefficients.
///
/// ```math
/// M \ln\left(\max\left(\frac{RSS}{M}, 10^{-12}\right)\right) + p \cdot df
/// ```
///
/// where $`p = \ln M`$ for BIC and $`p = 2`$ for AIC.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InformationCriterion {
    #[default]
    Bic,
    Aic,
}

impl InformationCriterion {
    fn penalty(&self, n: f64) -> f64 {
        match self {
            InformationCriterion::Bic => n.ln(),
            InformationCriterion::Aic => 2.0,
        }
    }
}

impl SelectionCriterion for InformationCriterion {
    fn score<S: SparseSolver>(
        &self,
        _solver: &S,
        design: &DMatrix<f64>,
        _response: &DVector<f64>,
        _lambda: f64,
        fit: &SolverOutcome,
    ) -> Result<CriterionScore, DeconvolutionError> {
        let m = design.nrows();
        if m == 0 {
            return Ok(CriterionScore::new(0.0, fit.converged));
        }
        let n = m as f64;
        let df = fit.active_count() as f64;
        let value = n * (fit.rss / n).max(1e-12).ln() + self.penalty(n) * df;
        Ok(CriterionScore::new(value, fit.converged))
    }

    fn name(&self) -> &'static str {
        match self {
            InformationCriterion::Bic => "bic",
            InformationCriterion::Aic => "aic",
        }
    }
}

/// K-fold cross-validation over mass channels.
///
/// Channel `i` is held out in fold `i mod folds`, so the split depends only on
/// the channel order. With fewer channels than folds every channel is its own
/// fold, and with fewer than two channels the in-sample mean squared error
/// is used instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrossValidation {
    pub folds: usize,
}

impl Default for CrossValidation {
    fn default() -> Self {
        Self { folds: 5 }
    }
}

impl CrossValidation {
    pub fn new(folds: usize) -> Result<Self, ConfigurationError> {
        if folds < 2 {
            Err(ConfigurationError::InvalidFolds(folds))
        } else {
            Ok(Self { folds })
        }
    }
}

impl SelectionCriterion for CrossValidation {
    fn score<S: SparseSolver>(
        &self,
        solver: &S,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
        fit: &SolverOutcome,
    ) -> Result<CriterionScore, DeconvolutionError> {
        let m = design.nrows();
        if m < 2 {
            return Ok(CriterionScore::new(fit.rss / m.max(1) as f64, fit.converged));
        }
        let folds = self.folds.clamp(2, m);
        let mut squared_error = 0.0;
        let mut converged = true;
        for fold in 0..folds {
            let (held_out, kept): (Vec<usize>, Vec<usize>) =
                (0..m).partition(|i| i % folds == fold);
            let train_x = design.select_rows(kept.iter());
            let train_y = response.select_rows(kept.iter());
            let outcome = solver.solve(&train_x, &train_y, lambda)?;
            if !outcome.converged {
                tracing::trace!(
                    "Fold {fold} of {folds} did not converge at λ={lambda} after {} iterations",
                    outcome.iterations
                );
                converged = false;
            }
            let predicted = design.select_rows(held_out.iter()) * &outcome.beta;
            squared_error += (response.select_rows(held_out.iter()) - predicted).norm_squared();
        }
        Ok(CriterionScore::new(squared_error / m as f64, converged))
    }

    fn name(&self) -> &'static str {
        "cv"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        Self::new(self.folds).map(|_| ())
    }
}

/// An algebraic data structure for choosing a [`SelectionCriterion`] at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CriterionLike {
    Information(InformationCriterion),
    CrossValidation(CrossValidation),
}

impl Default for CriterionLike {
    fn default() -> Self {
        Self::Information(InformationCriterion::default())
    }
}

impl From<InformationCriterion> for CriterionLike {
    fn from(value: InformationCriterion) -> Self {
        Self::Information(value)
    }
}

impl From<CrossValidation> for CriterionLike {
    fn from(value: CrossValidation) -> Self {
        Self::CrossValidation(value)
    }
}

impl SelectionCriterion for CriterionLike {
    fn score<S: SparseSolver>(
        &self,
        solver: &S,
        design: &DMatrix<f64>,
        response: &DVector<f64>,
        lambda: f64,
        fit: &SolverOutcome,
    ) -> Result<CriterionScore, DeconvolutionError> {
        match self {
            CriterionLike::Information(c) => c.score(solver, design, response, lambda, fit),
            CriterionLike::CrossValidation(c) => c.score(solver, design, response, lambda, fit),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CriterionLike::Information(c) => c.name(),
            CriterionLike::CrossValidation(c) => c.name(),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            CriterionLike::Information(c) => c.validate(),
            CriterionLike::CrossValidation(c) => c.validate(),
        }
    }
}

/// The criterion value of one grid point
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LambdaScore {
    pub lambda: f64,
    pub score: f64,
    /// The number of non-zero coefficients at this λ
    pub active: usize,
    /// Whether the full-data fit and any solves the criterion made converged
    pub converged: bool,
}

/// The outcome of a grid search
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSelection {
    pub lambda: f64,
    /// The full-data fit at the chosen λ
    pub fit: SolverOutcome,
    /// Every grid point's score, in grid order
    pub path: Vec<LambdaScore>,
}

/// Fit every λ in `grid` on the full data, score it with `criterion` and keep
/// the lowest-scoring fit.
///
/// Each λ is fit independently from zero. Ties go to the smaller λ.
pub fn select_lambda<S: SparseSolver, C: SelectionCriterion>(
    solver: &S,
    criterion: &C,
    grid: &LambdaGrid,
    design: &DMatrix<f64>,
    response: &DVector<f64>,
) -> Result<LambdaSelection, DeconvolutionError> {
    let mut best: Option<(f64, f64, SolverOutcome)> = None;
    let mut path = Vec::with_capacity(grid.len());
    for lambda in grid.iter() {
        let fit = solver.solve(design, response, lambda)?;
        let CriterionScore { value: score, converged } =
            criterion.score(solver, design, response, lambda, &fit)?;
        tracing::trace!(
            "{} at λ={lambda}: {score:0.4} with {} active",
            criterion.name(),
            fit.active_count()
        );
        path.push(LambdaScore {
            lambda,
            score,
            active: fit.active_count(),
            converged: fit.converged && converged,
        });
        let better = match &best {
            None => true,
            Some((_, best_score, _)) => {
                score.is_finite()
                    && (!best_score.is_finite() || score < best_score - SCORE_TIE_TOLERANCE)
            }
        };
        if better {
            best = Some((lambda, score, fit));
        }
    }
    match best {
        Some((lambda, _, fit)) => Ok(LambdaSelection { lambda, fit, path }),
        // Unreachable, grids are never empty
        None => Ok(LambdaSelection {
            lambda: 0.0,
            fit: solver.solve(design, response, 0.0)?,
            path,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solver::{CoordinateDescentSolver, ProjectedGradientSolver, SolverParams};

    #[test]
    fn test_grid_validation() {
        assert_eq!(
            LambdaGrid::new(vec![]),
            Err(ConfigurationError::EmptyLambdaGrid)
        );
        assert_eq!(
            LambdaGrid::new(vec![0.0, -1.0]),
            Err(ConfigurationError::InvalidLambda(-1.0))
        );
        assert!(matches!(
            LambdaGrid::new(vec![0.0, f64::NAN]),
            Err(ConfigurationError::InvalidLambda(_))
        ));
        assert_eq!(
            LambdaGrid::new(vec![0.1, 0.01]),
            Err(ConfigurationError::MissingZeroLambda)
        );
        let grid = LambdaGrid::new(vec![0.1, 0.0, 0.01, 0.1]).unwrap();
        assert_eq!(grid.as_slice(), &[0.0, 0.01, 0.1]);
        assert_eq!(grid.to_string(), "0,0.01,0.1");
        assert_eq!(LambdaGrid::default().len(), 5);
    }

    #[test]
    fn test_cross_validation_folds() {
        assert_eq!(
            CrossValidation::new(1),
            Err(ConfigurationError::InvalidFolds(1))
        );
        assert_eq!(CrossValidation::new(3).unwrap().folds, 3);
    }

    fn noisy_problem() -> (DMatrix<f64>, DVector<f64>) {
        // Two real components plus one decoy that only explains noise
        let a = DVector::from_vec(vec![0.4, 0.3, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let b = DVector::from_vec(vec![0.0, 0.0, 0.2, 0.4, 0.4, 0.0, 0.0, 0.0]);
        let decoy = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.0]);
        let x = DMatrix::from_columns(&[a.clone(), b.clone(), decoy]);
        let mut y = a * 0.6 + b * 0.4;
        y[5] += 0.002;
        y[7] += 0.003;
        let s = y.sum();
        (x, y / s)
    }

    #[test]
    fn test_bic_prefers_sparse_fit() {
        let (x, y) = noisy_problem();
        let grid = LambdaGrid::new(vec![0.0, 1e-4, 1e-3, 1e-2, 1e-1]).unwrap();
        let solver = ProjectedGradientSolver::default();
        let selection =
            select_lambda(&solver, &InformationCriterion::Bic, &grid, &x, &y).unwrap();
        assert_eq!(selection.path.len(), grid.len());
        let chosen = selection
            .path
            .iter()
            .find(|p| p.lambda == selection.lambda)
            .unwrap();
        let best = selection
            .path
            .iter()
            .map(|p| p.score)
            .fold(f64::INFINITY, f64::min);
        assert!(chosen.score <= best + SCORE_TIE_TOLERANCE);
        assert!(selection.fit.beta.iter().all(|b| *b >= 0.0));
        assert!(selection.fit.beta[0] > selection.fit.beta[1]);
    }

    #[test]
    fn test_ties_favor_smaller_lambda() {
        // A zero response gives every λ the same floor score
        let x = DMatrix::from_columns(&[DVector::from_vec(vec![0.5, 0.5])]);
        let y = DVector::from_vec(vec![0.0, 0.0]);
        let grid = LambdaGrid::default();
        let selection = select_lambda(
            &ProjectedGradientSolver::default(),
            &InformationCriterion::Aic,
            &grid,
            &x,
            &y,
        )
        .unwrap();
        assert_eq!(selection.lambda, 0.0);
        assert!(selection
            .path
            .windows(2)
            .all(|w| (w[0].score - w[1].score).abs() < SCORE_TIE_TOLERANCE));
    }

    #[test]
    fn test_exact_fit_any_grid() {
        let col = DVector::from_vec(vec![0.2, 0.5, 0.3]);
        let x = DMatrix::from_columns(&[col.clone()]);
        for grid in [
            LambdaGrid::new(vec![0.0]).unwrap(),
            LambdaGrid::default(),
            LambdaGrid::new(vec![0.0, 1e-6]).unwrap(),
        ] {
            let selection = select_lambda(
                &ProjectedGradientSolver::default(),
                &InformationCriterion::Bic,
                &grid,
                &x,
                &col,
            )
            .unwrap();
            assert_eq!(selection.lambda, 0.0);
            assert!((selection.fit.beta[0] - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cross_validation_is_deterministic() {
        let (x, y) = noisy_problem();
        let grid = LambdaGrid::default();
        let criterion = CriterionLike::from(CrossValidation::new(3).unwrap());
        let solver = CoordinateDescentSolver::default();
        let a = select_lambda(&solver, &criterion, &grid, &x, &y).unwrap();
        let b = select_lambda(&solver, &criterion, &grid, &x, &y).unwrap();
        assert_eq!(a, b);
        assert!(a.path.iter().all(|p| p.score.is_finite() && p.score >= 0.0));
    }

    #[test]
    fn test_cross_validation_small_inputs() {
        let criterion = CrossValidation::new(5).unwrap();
        let solver = ProjectedGradientSolver::default();

        // One channel falls back to the in-sample error
        let x = DMatrix::from_columns(&[DVector::from_vec(vec![1.0])]);
        let y = DVector::from_vec(vec![1.0]);
        let fit = solver.solve(&x, &y, 0.0).unwrap();
        let score = criterion.score(&solver, &x, &y, 0.0, &fit).unwrap();
        assert!(score.value.abs() < 1e-12);
        assert!(score.converged);

        // Fewer channels than folds is leave-one-out
        let x = DMatrix::from_columns(&[DVector::from_vec(vec![0.5, 0.5, 0.0])]);
        let y = DVector::from_vec(vec![0.5, 0.5, 0.0]);
        let fit = solver.solve(&x, &y, 0.0).unwrap();
        let score = criterion.score(&solver, &x, &y, 0.0, &fit).unwrap();
        assert!(score.value.abs() < 1e-12);
    }

    #[test]
    fn test_unconverged_folds_are_flagged() {
        let (x, y) = noisy_problem();
        let grid = LambdaGrid::new(vec![0.0]).unwrap();
        let criterion = CrossValidation::new(2).unwrap();

        let solver = ProjectedGradientSolver::default();
        let selection = select_lambda(&solver, &criterion, &grid, &x, &y).unwrap();
        assert!(selection.fit.converged);
        assert!(selection.path[0].converged);

        // A single iteration cannot reach the tolerance on any fold
        let solver = ProjectedGradientSolver::new(SolverParams::new(1, 1e-14));
        let fit = solver.solve(&x, &y, 0.0).unwrap();
        let score = criterion.score(&solver, &x, &y, 0.0, &fit).unwrap();
        assert!(!score.converged);
        assert!(score.value.is_finite());
        let selection = select_lambda(&solver, &criterion, &grid, &x, &y).unwrap();
        assert!(!selection.path[0].converged);
    }
}
