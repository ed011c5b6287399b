mod args;
mod driver;
mod mz_range;
mod proc;
mod progress;
mod reader;
mod types;
mod write;

pub use args::*;
pub use driver::{MZUnmixer, MZUnmixerError};
pub use mz_range::{MzRange, MzRangeParseError};
pub use progress::ProgressRecord;
pub use reader::{open_input, CandidateRecord, SpectrumReader, SpectrumRecord};
pub use write::{JsonLinesWriter, OutputFormat, OutputHandle, OutputStream, RecordWriter, TsvWriter};
