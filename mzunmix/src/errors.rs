/*! Errors that might occur while configuring or running a deconvolution */
use thiserror::Error;

/// Reasons a spectrum is unfit for deconvolution. These are recorded on the
/// spectrum's output record and never interrupt sibling spectra.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DegenerateInput {
    #[error("Found {found} candidates, but at least {required} are required")]
    TooFewCandidates { found: usize, required: usize },
    #[error("The observed spectrum has no peaks")]
    NoObservedPeaks,
    #[error("No predicted peaks were available to build mass channels from")]
    NoChannels,
    #[error("No observed intensity was assigned to any mass channel")]
    ZeroResponse,
}

impl DegenerateInput {
    /// A short, stable label for tabulating skip reasons
    pub fn label(&self) -> &'static str {
        match self {
            DegenerateInput::TooFewCandidates { .. } => "too-few-candidates",
            DegenerateInput::NoObservedPeaks => "no-observed-peaks",
            DegenerateInput::NoChannels => "no-channels",
            DegenerateInput::ZeroResponse => "zero-response",
        }
    }
}

/// An error that might occur during deconvolution
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeconvolutionError {
    #[error("Spectrum is unfit for deconvolution: {0}")]
    Degenerate(#[from] DegenerateInput),
    #[error(
        "Design matrix of shape {rows}x{columns} does not match response vector of length {response_len} (spectrum {spectrum_id:?})"
    )]
    DimensionMismatch {
        spectrum_id: Option<String>,
        rows: usize,
        columns: usize,
        response_len: usize,
    },
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl DeconvolutionError {
    /// Attach a spectrum identifier to a contract violation that was raised
    /// without one
    pub fn with_spectrum_id(self, id: &str) -> Self {
        match self {
            DeconvolutionError::DimensionMismatch {
                spectrum_id: None,
                rows,
                columns,
                response_len,
            } => DeconvolutionError::DimensionMismatch {
                spectrum_id: Some(id.to_string()),
                rows,
                columns,
                response_len,
            },
            e => e,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate(_))
    }
}

/// An invalid engine configuration, detected before any spectrum is processed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("The m/z tolerance must be positive and finite, got {0} ppm")]
    NonPositiveTolerance(f64),
    #[error("The regularization grid is empty")]
    EmptyLambdaGrid,
    #[error("Regularization strengths must be finite and non-negative, got {0}")]
    InvalidLambda(f64),
    #[error("The regularization grid must include 0")]
    MissingZeroLambda,
    #[error("The minimum candidate count must be at least 1")]
    InvalidMinCandidates,
    #[error("Cross-validation requires at least 2 folds, got {0}")]
    InvalidFolds(usize),
    #[error("The solver iteration budget must be at least 1")]
    InvalidIterationBudget,
    #[error("The convergence tolerance must be positive and finite, got {0}")]
    InvalidConvergenceTolerance(f64),
    #[error("Invalid m/z range {0}-{1}")]
    InvalidMzRange(f64, f64),
}
