use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use mzunmix::{
    CenterPolicy, ConfigurationError, CoordinateDescentSolver, CriterionLike, CrossValidation,
    DeconvolutionEngine, DeconvolutionParams, InformationCriterion, LambdaGrid,
    ProjectedGradientSolver, SolverLike, SolverParams,
};

use crate::types::EngineType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgSolver {
    #[default]
    /// Accelerated projected gradient descent
    ProjectedGradient,
    /// Cyclic coordinate descent
    CoordinateDescent,
}

impl Display for ArgSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ArgSolver::ProjectedGradient => "projected-gradient",
            ArgSolver::CoordinateDescent => "coordinate-descent",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgCriterion {
    #[default]
    /// Bayesian information criterion
    Bic,
    /// Akaike information criterion
    Aic,
    /// K-fold cross-validation over mass channels
    Cv,
}

impl Display for ArgCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ArgCriterion::Bic => "bic",
            ArgCriterion::Aic => "aic",
            ArgCriterion::Cv => "cv",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgCenterPolicy {
    #[default]
    /// The channel center is the mean of its members
    RunningMean,
    /// The channel center stays at its first member
    Anchor,
}

impl From<ArgCenterPolicy> for CenterPolicy {
    fn from(value: ArgCenterPolicy) -> Self {
        match value {
            ArgCenterPolicy::RunningMean => CenterPolicy::RunningMean,
            ArgCenterPolicy::Anchor => CenterPolicy::Anchor,
        }
    }
}

impl Display for ArgCenterPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ArgCenterPolicy::RunningMean => "running-mean",
            ArgCenterPolicy::Anchor => "anchor",
        };
        f.write_str(label)
    }
}

/// Everything needed to build a [`DeconvolutionEngine`] from loosely typed settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineBuilderParams {
    pub tolerance_ppm: f64,
    pub lambda_grid: Vec<f64>,
    pub min_candidates: usize,
    pub center_policy: ArgCenterPolicy,
    pub mz_range: Option<(f64, f64)>,
    pub solver: ArgSolver,
    pub solver_params: SolverParams,
    pub criterion: ArgCriterion,
    pub cv_folds: usize,
}

impl Default for EngineBuilderParams {
    fn default() -> Self {
        let params = DeconvolutionParams::default();
        Self {
            tolerance_ppm: params.tolerance_ppm,
            lambda_grid: params.lambda_grid.into(),
            min_candidates: params.min_candidates,
            center_policy: ArgCenterPolicy::default(),
            mz_range: params.mz_range,
            solver: ArgSolver::default(),
            solver_params: SolverParams::default(),
            criterion: ArgCriterion::default(),
            cv_folds: CrossValidation::default().folds,
        }
    }
}

impl EngineBuilderParams {
    pub fn make_params(&self) -> Result<DeconvolutionParams, ConfigurationError> {
        let params = DeconvolutionParams::new(
            self.tolerance_ppm,
            LambdaGrid::new(self.lambda_grid.clone())?,
            self.min_candidates,
            self.center_policy.into(),
            self.mz_range,
        );
        params.validate()?;
        Ok(params)
    }

    pub fn make_solver(&self) -> SolverLike {
        match self.solver {
            ArgSolver::ProjectedGradient => {
                ProjectedGradientSolver::new(self.solver_params).into()
            }
            ArgSolver::CoordinateDescent => {
                CoordinateDescentSolver::new(self.solver_params).into()
            }
        }
    }

    pub fn make_criterion(&self) -> Result<CriterionLike, ConfigurationError> {
        let criterion = match self.criterion {
            ArgCriterion::Bic => InformationCriterion::Bic.into(),
            ArgCriterion::Aic => InformationCriterion::Aic.into(),
            ArgCriterion::Cv => CrossValidation::new(self.cv_folds)?.into(),
        };
        Ok(criterion)
    }

    pub fn build_engine(&self) -> Result<EngineType, ConfigurationError> {
        DeconvolutionEngine::new(
            self.make_params()?,
            self.make_solver(),
            self.make_criterion()?,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_default_engine() {
        let engine = EngineBuilderParams::default().build_engine().unwrap();
        assert_eq!(engine.params(), &DeconvolutionParams::default());
        assert_eq!(engine.criterion(), &CriterionLike::default());
    }

    #[test]
    fn test_build_rejects_bad_settings() {
        let builder = EngineBuilderParams {
            lambda_grid: vec![0.1, 0.2],
            ..Default::default()
        };
        assert_eq!(
            builder.build_engine().err(),
            Some(ConfigurationError::MissingZeroLambda)
        );

        let builder = EngineBuilderParams {
            criterion: ArgCriterion::Cv,
            cv_folds: 1,
            ..Default::default()
        };
        assert_eq!(
            builder.build_engine().err(),
            Some(ConfigurationError::InvalidFolds(1))
        );

        let builder = EngineBuilderParams {
            solver: ArgSolver::CoordinateDescent,
            solver_params: SolverParams::new(10, -1.0),
            ..Default::default()
        };
        assert_eq!(
            builder.build_engine().err(),
            Some(ConfigurationError::InvalidConvergenceTolerance(-1.0))
        );
    }
}
