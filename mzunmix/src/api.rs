//! High level APIs for running deconvolution on chimeric spectra
use std::borrow::Cow;

use mzpeaks::Tolerance;

use crate::{
    channels::{cluster_channels, CenterPolicy},
    errors::{ConfigurationError, DeconvolutionError, DegenerateInput},
    peaks::{Candidate, ChimericSpectrum, PredictedSpectrum},
    projection::{build_design_matrix, project_observed, DesignMatrix, ResponseVector},
    quality::{evaluate_fit, ground_truth_counts, QualityMetrics},
    selection::{select_lambda, CriterionLike, LambdaGrid, SelectionCriterion},
    solution::{DeconvolutionRecord, FitResult, FitStatus},
    solver::{SolverLike, SparseSolver},
};

/// The per-spectrum settings shared by every strategy
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeconvolutionParams {
    /// The mass accuracy used to build channels and assign peaks, in ppm
    pub tolerance_ppm: f64,
    /// The regularization strengths to choose from
    pub lambda_grid: LambdaGrid,
    /// Spectra with fewer candidates than this are skipped
    pub min_candidates: usize,
    /// How a channel's center moves as it absorbs values
    pub center_policy: CenterPolicy,
    /// Predicted peaks outside this m/z interval are ignored. The upper bound
    /// may be infinite.
    pub mz_range: Option<(f64, f64)>,
}

impl Default for DeconvolutionParams {
    fn default() -> Self {
        Self {
            tolerance_ppm: 20.0,
            lambda_grid: LambdaGrid::default(),
            min_candidates: 2,
            center_policy: CenterPolicy::default(),
            mz_range: None,
        }
    }
}

impl DeconvolutionParams {
    pub fn new(
        tolerance_ppm: f64,
        lambda_grid: LambdaGrid,
        min_candidates: usize,
        center_policy: CenterPolicy,
        mz_range: Option<(f64, f64)>,
    ) -> Self {
        Self {
            tolerance_ppm,
            lambda_grid,
            min_candidates,
            center_policy,
            mz_range,
        }
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance::PPM(self.tolerance_ppm)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.tolerance_ppm.is_finite() && self.tolerance_ppm > 0.0) {
            return Err(ConfigurationError::NonPositiveTolerance(self.tolerance_ppm));
        }
        if self.lambda_grid.is_empty() {
            return Err(ConfigurationError::EmptyLambdaGrid);
        }
        if self.min_candidates == 0 {
            return Err(ConfigurationError::InvalidMinCandidates);
        }
        if let Some((lo, hi)) = self.mz_range {
            if !(lo.is_finite() && lo >= 0.0 && lo < hi) {
                return Err(ConfigurationError::InvalidMzRange(lo, hi));
            }
        }
        Ok(())
    }

    /// Restrict each candidate's predicted peaks to [`DeconvolutionParams::mz_range`],
    /// keeping every candidate in place even when none of its peaks remain
    fn windowed<'a>(&self, candidates: &'a [Candidate]) -> Cow<'a, [Candidate]> {
        match self.mz_range {
            None => Cow::Borrowed(candidates),
            Some((lo, hi)) => Cow::Owned(
                candidates
                    .iter()
                    .map(|c| {
                        let spectrum: PredictedSpectrum = c
                            .spectrum
                            .iter()
                            .filter(|p| p.mz >= lo && p.mz <= hi)
                            .copied()
                            .collect();
                        if spectrum.is_empty() {
                            tracing::debug!("Candidate {} has no peaks in {lo}-{hi}", c.id);
                        }
                        Candidate {
                            id: c.id.clone(),
                            spectrum,
                            matched_fragments: c.matched_fragments,
                        }
                    })
                    .collect(),
            ),
        }
    }
}

/// Every intermediate product of one spectrum's deconvolution
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFit {
    pub design: DesignMatrix,
    pub response: ResponseVector,
    pub fit: FitResult,
    pub quality: QualityMetrics,
    /// The fragment-count ground truth per candidate
    pub ground_truth: Vec<u32>,
}

/// A configured, immutable deconvolution pipeline.
///
/// The type is templated on the solver and selection criterion strategies, which
/// default to runtime-selectable wrappers. An engine holds no per-spectrum state so
/// it can be cloned freely across worker threads.
#[derive(Debug, Clone)]
pub struct DeconvolutionEngine<
    S: SparseSolver = SolverLike,
    C: SelectionCriterion = CriterionLike,
> {
    params: DeconvolutionParams,
    /// The strategy for solving the non-negative LASSO problem
    solver: S,
    /// The strategy for choosing the regularization strength
    criterion: C,
}

impl Default for DeconvolutionEngine {
    fn default() -> Self {
        Self {
            params: DeconvolutionParams::default(),
            solver: SolverLike::default(),
            criterion: CriterionLike::default(),
        }
    }
}

impl<S: SparseSolver, C: SelectionCriterion> DeconvolutionEngine<S, C> {
    /// Create a new [`DeconvolutionEngine`], checking every setting up front
    pub fn new(
        params: DeconvolutionParams,
        solver: S,
        criterion: C,
    ) -> Result<Self, ConfigurationError> {
        params.validate()?;
        solver.params().validate()?;
        criterion.validate()?;
        Ok(Self {
            params,
            solver,
            criterion,
        })
    }

    pub fn params(&self) -> &DeconvolutionParams {
        &self.params
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn criterion(&self) -> &C {
        &self.criterion
    }

    /// Run every stage on `spectrum`, returning the intermediate products.
    ///
    /// Unlike [`DeconvolutionEngine::deconvolve`], degenerate input is reported
    /// as an error.
    pub fn fit(&self, spectrum: &ChimericSpectrum) -> Result<SpectrumFit, DeconvolutionError> {
        let n_candidates = spectrum.candidate_count();
        if n_candidates == 0 || n_candidates < self.params.min_candidates {
            return Err(DegenerateInput::TooFewCandidates {
                found: n_candidates,
                required: self.params.min_candidates.max(1),
            }
            .into());
        }
        if spectrum.observed.is_empty() {
            return Err(DegenerateInput::NoObservedPeaks.into());
        }

        let tolerance = self.params.tolerance();
        let candidates = self.params.windowed(&spectrum.candidates);
        let channels = cluster_channels(
            candidates
                .iter()
                .flat_map(|c| c.spectrum.iter().map(|p| p.mz)),
            tolerance,
            self.params.center_policy,
        );
        if channels.is_empty() {
            return Err(DegenerateInput::NoChannels.into());
        }

        let design = build_design_matrix(&channels, &candidates);
        let response = project_observed(&channels, &spectrum.observed);
        if !response.has_signal() {
            return Err(DegenerateInput::ZeroResponse.into());
        }
        tracing::trace!(
            "Built a {}x{} design matrix for {}",
            design.nrows(),
            design.ncols(),
            spectrum.spectrum_id
        );

        let selection = select_lambda(
            &self.solver,
            &self.criterion,
            &self.params.lambda_grid,
            design.matrix(),
            response.values(),
        )?;

        let status = FitStatus::from(&selection.fit);
        if let FitStatus::NotConverged { kkt_violation } = status {
            tracing::warn!(
                "{} did not converge at λ={} after {} iterations (KKT violation {:0.3e}), marking low confidence",
                spectrum.spectrum_id,
                selection.lambda,
                selection.fit.iterations,
                kkt_violation,
            );
        }

        let reconstruction = design.reconstruct(&selection.fit.beta);
        let ground_truth = ground_truth_counts(&candidates, &spectrum.observed, tolerance);
        let quality = evaluate_fit(
            &selection.fit.beta,
            &reconstruction,
            response.values(),
            &ground_truth,
            response.projection.unassigned_fraction(),
        );

        let fit = FitResult {
            beta: selection.fit.beta,
            channels,
            lambda: selection.lambda,
            reconstruction,
            status,
            objective: selection.fit.objective,
            iterations: selection.fit.iterations,
            path: selection.path,
        };

        Ok(SpectrumFit {
            design,
            response,
            fit,
            quality,
            ground_truth,
        })
    }

    /// Deconvolve one chimeric spectrum into per-candidate contributions.
    ///
    /// Degenerate spectra produce a skipped record rather than an error. Only
    /// contract violations like [`DeconvolutionError::DimensionMismatch`] are
    /// returned as errors, tagged with the spectrum's identifier.
    #[tracing::instrument(level = "debug", skip_all, fields(spectrum_id = %spectrum.spectrum_id))]
    pub fn deconvolve(
        &self,
        spectrum: &ChimericSpectrum,
    ) -> Result<DeconvolutionRecord, DeconvolutionError> {
        match self.fit(spectrum) {
            Ok(solved) => Ok(DeconvolutionRecord::from_fit(
                spectrum.spectrum_id.as_str(),
                spectrum.candidates.iter().map(|c| c.id.clone()),
                &solved.fit,
                &solved.quality,
                &solved.ground_truth,
            )),
            Err(DeconvolutionError::Degenerate(reason)) => {
                tracing::debug!("Skipping {}: {reason}", spectrum.spectrum_id);
                Ok(DeconvolutionRecord::skipped(
                    spectrum.spectrum_id.as_str(),
                    reason,
                ))
            }
            Err(e) => Err(e.with_spectrum_id(&spectrum.spectrum_id)),
        }
    }
}

/// A single-shot deconvolution of one chimeric spectrum.
///
/// # Arguments
/// - `spectrum`: The observed scan and its candidates
/// - `params`: The per-spectrum settings
/// - `solver`: The strategy for solving the non-negative LASSO problem
/// - `criterion`: The strategy for choosing the regularization strength
///
/// # Note
/// This validates the configuration on every call. Create a [`DeconvolutionEngine`]
/// when processing many spectra with the same settings.
pub fn deconvolve_spectrum<S: SparseSolver, C: SelectionCriterion>(
    spectrum: &ChimericSpectrum,
    params: DeconvolutionParams,
    solver: S,
    criterion: C,
) -> Result<DeconvolutionRecord, DeconvolutionError> {
    let engine = DeconvolutionEngine::new(params, solver, criterion)?;
    engine.deconvolve(spectrum)
}
