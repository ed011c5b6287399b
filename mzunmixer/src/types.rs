use mzunmix::{CriterionLike, DeconvolutionEngine, DeconvolutionRecord, SolverLike};

pub(crate) type EngineType = DeconvolutionEngine<SolverLike, CriterionLike>;
pub(crate) type RecordResult = (usize, DeconvolutionRecord);
pub(crate) const BUFFER_SIZE: usize = 10_000;
