//! Deconvolution of chimeric tandem mass spectra into per-candidate contributions.
//!
//! The predicted fragment spectra of every candidate peptide assigned to a scan are
//! merged into a shared set of mass channels, the observed spectrum and each candidate
//! are projected onto those channels, and a non-negative, L1-regularized least squares
//! fit estimates how much of the observed signal each candidate explains.
//!
//! The main entry point is [`DeconvolutionEngine`], or [`deconvolve_spectrum`] for
//! one-off use.
pub mod api;
pub mod channels;
pub mod errors;
pub mod peaks;
pub mod projection;
pub mod quality;
pub mod selection;
pub mod solution;
pub mod solver;

pub use crate::api::{deconvolve_spectrum, DeconvolutionEngine, DeconvolutionParams, SpectrumFit};
pub use crate::channels::{cluster_channels, CenterPolicy, ChannelSet, MassChannel};
pub use crate::errors::{ConfigurationError, DeconvolutionError, DegenerateInput};
pub use crate::peaks::{Candidate, ChimericSpectrum, ObservedSpectrum, Peak, PredictedSpectrum};
pub use crate::projection::{DesignMatrix, ResponseVector};
pub use crate::quality::{Concordance, QualityMetrics};
pub use crate::selection::{
    CriterionLike, CriterionScore, CrossValidation, InformationCriterion, LambdaGrid,
    SelectionCriterion,
};
pub use crate::solution::{
    CandidateContribution, DeconvolutionRecord, FitResult, FitStatus, RecordStatus,
};
pub use crate::solver::{
    CoordinateDescentSolver, ProjectedGradientSolver, SolverLike, SolverParams, SparseSolver,
};
