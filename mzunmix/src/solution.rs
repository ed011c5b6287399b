use std::fmt::Display;

use nalgebra::DVector;

use crate::channels::ChannelSet;
use crate::errors::DegenerateInput;
use crate::quality::{Concordance, QualityMetrics};
use crate::selection::LambdaScore;
use crate::solver::SolverOutcome;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FitStatus {
    #[default]
    Converged,
    /// The iteration budget ran out. The coefficients are the last iterate.
    NotConverged { kkt_violation: f64 },
}

impl FitStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

impl From<&SolverOutcome> for FitStatus {
    fn from(value: &SolverOutcome) -> Self {
        if value.converged {
            Self::Converged
        } else {
            Self::NotConverged {
                kkt_violation: value.kkt_violation,
            }
        }
    }
}

/// The fitted state of one spectrum at the selected regularization strength
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub beta: DVector<f64>,
    pub channels: ChannelSet,
    pub lambda: f64,
    /// `Xβ`
    pub reconstruction: DVector<f64>,
    pub status: FitStatus,
    pub objective: f64,
    pub iterations: usize,
    /// The criterion score of every λ that was tried
    pub path: Vec<LambdaScore>,
}

impl FitResult {
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RecordStatus {
    #[default]
    Fitted,
    LowConfidence,
    Skipped,
}

impl RecordStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Fitted => "fitted",
            RecordStatus::LowConfidence => "low-confidence",
            RecordStatus::Skipped => "skipped",
        }
    }
}

impl Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One candidate's estimated contribution to a chimeric spectrum
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidateContribution {
    pub id: String,
    pub coefficient: f64,
    /// `β / Σβ`
    pub share: f64,
    pub ground_truth_count: u32,
    pub ground_truth_share: f64,
}

/// The output row of one spectrum
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeconvolutionRecord {
    pub spectrum_id: String,
    pub status: RecordStatus,
    pub skip_reason: Option<DegenerateInput>,
    pub lambda: Option<f64>,
    pub contributions: Vec<CandidateContribution>,
    pub cosine: Option<f64>,
    pub concordance: Concordance,
    pub n_channels: usize,
    pub unassigned_fraction: Option<f64>,
    pub rss: Option<f64>,
    pub iterations: usize,
}

impl DeconvolutionRecord {
    /// A sentinel record for a spectrum that could not be deconvolved
    pub fn skipped(spectrum_id: impl Into<String>, reason: DegenerateInput) -> Self {
        Self {
            spectrum_id: spectrum_id.into(),
            status: RecordStatus::Skipped,
            skip_reason: Some(reason),
            lambda: None,
            contributions: Vec::new(),
            cosine: None,
            concordance: Concordance::default(),
            n_channels: 0,
            unassigned_fraction: None,
            rss: None,
            iterations: 0,
        }
    }

    /// Assemble the record of a completed fit
    pub fn from_fit(
        spectrum_id: impl Into<String>,
        candidate_ids: impl IntoIterator<Item = String>,
        fit: &FitResult,
        quality: &QualityMetrics,
        ground_truth: &[u32],
    ) -> Self {
        let contributions = candidate_ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| CandidateContribution {
                id,
                coefficient: fit.beta.get(i).copied().unwrap_or_default(),
                share: quality.shares.get(i).copied().unwrap_or_default(),
                ground_truth_count: ground_truth.get(i).copied().unwrap_or_default(),
                ground_truth_share: quality.ground_truth_shares.get(i).copied().unwrap_or_default(),
            })
            .collect();
        let status = if fit.is_converged() {
            RecordStatus::Fitted
        } else {
            RecordStatus::LowConfidence
        };
        Self {
            spectrum_id: spectrum_id.into(),
            status,
            skip_reason: None,
            lambda: Some(fit.lambda),
            contributions,
            cosine: Some(quality.cosine),
            concordance: quality.concordance,
            n_channels: fit.channels.len(),
            unassigned_fraction: Some(quality.unassigned_fraction),
            rss: Some(quality.rss),
            iterations: fit.iterations,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == RecordStatus::Skipped
    }

    /// The coefficients in candidate order
    pub fn coefficients(&self) -> Vec<f64> {
        self.contributions.iter().map(|c| c.coefficient).collect()
    }
}
