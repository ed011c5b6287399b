use std::any::Any;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use mzunmix::{ConfigurationError, DeconvolutionError, LambdaGrid, SolverParams};

use crate::args::{ArgCenterPolicy, ArgCriterion, ArgSolver, EngineBuilderParams};
use crate::mz_range::MzRange;
use crate::proc::prepare_processing;
use crate::reader::{open_input, SpectrumReader};
use crate::types::{EngineType, BUFFER_SIZE};
use crate::write::{
    collate_results, write_output, JsonLinesWriter, OutputFormat, OutputHandle, RecordWriter,
    TsvWriter,
};

fn positive_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if !(value.is_finite() && value > 0.0) {
        Err(format!("`{s}` is not a positive number"))
    } else {
        Ok(value)
    }
}

#[derive(Debug, Error)]
pub enum MZUnmixerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to open input {0}: {1}")]
    InputError(String, #[source] io::Error),
    #[error("The output file format for {0} was either unknown or not supported")]
    OutputFormatUnknownOrNotSupportedError(String),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        ConfigurationError,
    ),
    #[error("Deconvolution halted: {0}")]
    DeconvolutionError(
        #[source]
        #[from]
        DeconvolutionError,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigExtractionError(
        #[source]
        #[from]
        Box<figment::Error>,
    ),
    #[error("The {0} task panicked, output is incomplete: {1}")]
    TaskPanicked(&'static str, String),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown cause".to_string()
    }
}

/// Turn a failed join of `task` into an error, logging it as it happens
fn task_panicked(task: &'static str, payload: Box<dyn Any + Send>) -> MZUnmixerError {
    let err = MZUnmixerError::TaskPanicked(task, panic_message(payload));
    error!("{err}");
    err
}

impl From<figment::Error> for MZUnmixerError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigExtractionError(Box::new(value))
    }
}

fn default_lambda_grid() -> Vec<f64> {
    LambdaGrid::default().into()
}

/// Deconvolution of chimeric tandem mass spectra into per-peptide contributions.
///
/// Read a JSON Lines stream of observed spectra and their candidate peptides'
/// predicted spectra, estimate how much of each observed spectrum every candidate
/// explains, and write a table of contributions and fit quality metrics.
#[derive(Parser, Debug, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZUnmixer {
    /// The path to read the input spectra from, or if '-' is passed, read from STDIN.
    ///
    /// Gzip compressed input is detected automatically.
    #[arg()]
    pub input_file: PathBuf,

    /// The path to write the output file to, or if '-' is passed, write TSV to STDOUT.
    ///
    /// The format is inferred from the extension: `.tsv` or `.jsonl`, optionally
    /// followed by `.gz` to compress the output.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzunmixer.toml` in the working directory.
    /// Environment variables prefixed with `MZUNMIXER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The size of the buffer for queueing writing of results to the output stream.
    #[arg(short = 'w', long = "write-buffer-size", default_value_t = BUFFER_SIZE)]
    pub write_buffer_size: usize,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(short = 't', long = "threads", default_value_t = -1)]
    pub threads: i32,

    /// The mass accuracy, in parts-per-million, used to merge predicted peaks into
    /// mass channels and to assign observed peaks to them
    #[arg(
        short = 'p',
        long = "tolerance-ppm",
        default_value_t = 20.0,
        value_parser = positive_float
    )]
    pub tolerance_ppm: f64,

    /// The regularization strengths to choose from, comma separated. Must include 0.
    #[arg(
        short = 'L',
        long = "lambda-grid",
        value_delimiter = ',',
        default_values_t = default_lambda_grid()
    )]
    pub lambda_grid: Vec<f64>,

    /// Spectra with fewer candidates than this are skipped
    #[arg(short = 'k', long = "min-candidates", default_value_t = 2)]
    pub min_candidates: usize,

    /// How to choose the regularization strength
    #[arg(short = 'c', long = "criterion", default_value_t = ArgCriterion::default())]
    pub criterion: ArgCriterion,

    /// The number of folds when choosing the regularization strength by cross-validation
    #[arg(long = "cv-folds", default_value_t = 5)]
    pub cv_folds: usize,

    /// The algorithm used to solve the non-negative LASSO problem
    #[arg(short = 's', long = "solver", default_value_t = ArgSolver::default())]
    pub solver: ArgSolver,

    /// How a mass channel's center moves as it absorbs predicted peaks
    #[arg(long = "center-policy", default_value_t = ArgCenterPolicy::default())]
    pub center_policy: ArgCenterPolicy,

    /// The solver's iteration budget per regularization strength
    #[arg(long = "max-iterations", default_value_t = 20_000)]
    pub max_iterations: usize,

    /// The solver's convergence tolerance on the optimality conditions
    #[arg(
        long = "convergence-tolerance",
        default_value_t = 1e-10,
        value_parser = positive_float
    )]
    pub convergence_tolerance: f64,

    /// The m/z range of predicted peaks to consider, denoted (start?)-(stop?)
    #[arg(
        short = 'r',
        long = "mz-range",
        value_parser = MzRange::from_str,
        value_name = "BEGIN-END",
        long_help = r#"The m/z range of predicted peaks to consider, denoted (start?)-(stop?)

If a start is not specified, the range begins at 0.
If a stop is not specified, the range has no upper bound.
"#
    )]
    pub mz_range: Option<MzRange>,
}

impl MZUnmixer {
    fn create_threadpool(&self) -> io::Result<rayon::ThreadPool> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(io::Error::other)
    }

    pub fn engine_params(&self) -> EngineBuilderParams {
        EngineBuilderParams {
            tolerance_ppm: self.tolerance_ppm,
            lambda_grid: self.lambda_grid.clone(),
            min_candidates: self.min_candidates,
            center_policy: self.center_policy,
            mz_range: self.mz_range.map(|r| r.into()),
            solver: self.solver,
            solver_params: SolverParams::new(self.max_iterations, self.convergence_tolerance),
            criterion: self.criterion,
            cv_folds: self.cv_folds,
        }
    }

    pub fn main(&self) -> Result<(), MZUnmixerError> {
        info!(
            "mzunmixer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.output_file.display());
        let engine = self.engine_params().build_engine()?;
        debug!(
            "Solver: {} | Criterion: {} | λ grid: {}",
            self.solver,
            self.criterion,
            engine.params().lambda_grid
        );
        self.reader_then(engine)
    }

    fn reader_then(&self, engine: EngineType) -> Result<(), MZUnmixerError> {
        let handle = open_input(&self.input_file).map_err(|e| {
            MZUnmixerError::InputError(self.input_file.display().to_string(), e)
        })?;
        let reader = SpectrumReader::new(handle);
        self.writer_then(reader, engine)
    }

    fn writer_then<R: BufRead + Send + 'static>(
        &self,
        reader: SpectrumReader<R>,
        engine: EngineType,
    ) -> Result<(), MZUnmixerError> {
        let format = OutputFormat::infer(&self.output_file).ok_or_else(|| {
            MZUnmixerError::OutputFormatUnknownOrNotSupportedError(
                self.output_file.display().to_string(),
            )
        })?;
        debug!("Writing {format:?} output");
        let handle = OutputHandle::create(&self.output_file)?;
        let writer: Box<dyn RecordWriter> = match format {
            OutputFormat::Tsv => Box::new(TsvWriter::new(handle)),
            OutputFormat::JsonLines => Box::new(JsonLinesWriter::new(handle)),
        };
        self.run_workflow(reader, writer, engine)
    }

    fn run_workflow<R: BufRead + Send + 'static, W: RecordWriter + 'static>(
        &self,
        reader: SpectrumReader<R>,
        writer: W,
        engine: EngineType,
    ) -> Result<(), MZUnmixerError> {
        let buffer_size = self.write_buffer_size.max(1);
        let (send_solved, recv_solved) = crossbeam_channel::bounded(buffer_size);
        let (send_collated, recv_collated) = crossbeam_channel::bounded(buffer_size);

        let pool = self.create_threadpool()?;
        let unreadable = reader.unreadable_counter();

        let start = Instant::now();
        let read_task =
            thread::spawn(move || pool.install(|| prepare_processing(reader, engine, send_solved)));

        let collate_task = thread::spawn(move || collate_results(recv_solved, send_collated));

        let write_task = thread::spawn(move || write_output(writer, recv_collated));

        let mut outcome = Ok(());
        match read_task.join() {
            Ok(Ok(mut prog)) => {
                prog.unreadable = unreadable.load(Ordering::SeqCst);
                info!("Spectra: {}", prog.spectra);
                info!(
                    "Fitted: {} | Low Confidence: {} | Skipped: {} | Unreadable: {}",
                    prog.fitted, prog.low_confidence, prog.skipped, prog.unreadable
                );
                for (reason, count) in prog.skip_reasons() {
                    if count > 0 {
                        info!("Skipped ({reason}): {count}");
                    }
                }
                info!("Candidates: {}", prog.candidates);
            }
            Ok(Err(e)) => {
                outcome = Err(MZUnmixerError::from(e));
            }
            Err(e) => {
                outcome = Err(task_panicked("reader", e));
            }
        }
        let processing_elapsed = start.elapsed();

        if let Err(e) = collate_task.join() {
            let err = task_panicked("collator", e);
            outcome = outcome.and(Err(err));
        }

        match write_task.join() {
            Ok(o) => {
                if let Err(e) = o {
                    outcome = outcome.and(Err(e.into()));
                }
            }
            Err(e) => {
                let err = task_panicked("writer", e);
                outcome = outcome.and(Err(err));
            }
        }

        let elapsed = start.elapsed();
        if (elapsed.as_secs_f64() - processing_elapsed.as_secs_f64()) > 2.0 {
            info!("Total Elapsed Time: {:0.3?}", elapsed);
        }
        outcome
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = MZUnmixer::parse_from([
            "mzunmixer",
            "input.jsonl",
            "-o",
            "out.tsv",
            "-L",
            "0,0.01,0.1",
            "-c",
            "cv",
            "-s",
            "coordinate-descent",
            "-r",
            "150-2000",
        ]);
        assert_eq!(args.lambda_grid, vec![0.0, 0.01, 0.1]);
        assert_eq!(args.criterion, ArgCriterion::Cv);
        assert_eq!(args.solver, ArgSolver::CoordinateDescent);
        assert_eq!(args.mz_range, Some(MzRange::new(150.0, 2000.0)));
        assert_eq!(args.tolerance_ppm, 20.0);

        let builder = args.engine_params();
        assert_eq!(builder.mz_range, Some((150.0, 2000.0)));
        assert_eq!(builder.solver_params.max_iterations, 20_000);
        assert!(builder.build_engine().is_ok());
    }

    /// An input stream that fails hard partway through
    struct ExplodingInput {
        served: bool,
    }

    impl io::Read for ExplodingInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.fill_buf()?.len().min(buf.len());
            buf[..n].copy_from_slice(&self.fill_buf()?[..n]);
            self.consume(n);
            Ok(n)
        }
    }

    impl BufRead for ExplodingInput {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            if self.served {
                panic!("input exploded");
            }
            Ok(br#"{"spectrum_id": "scan=1", "peaks": [[100.0, 1.0]], "candidates": []}
"#)
        }

        fn consume(&mut self, _amt: usize) {
            self.served = true;
        }
    }

    #[test]
    fn test_reader_panic_fails_run() {
        let args = MZUnmixer::parse_from(["mzunmixer", "-", "-t", "1"]);
        let engine = args.engine_params().build_engine().unwrap();
        let reader = SpectrumReader::new(ExplodingInput { served: false });
        let writer = TsvWriter::new(Vec::<u8>::new());
        match args.run_workflow(reader, writer, engine) {
            Err(MZUnmixerError::TaskPanicked(task, msg)) => {
                assert_eq!(task, "reader");
                assert!(msg.contains("input exploded"), "{msg}");
            }
            other => panic!("Expected a panicked task, got {other:?}"),
        }
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(3u8)), "unknown cause");
    }

    #[test]
    fn test_default_grid() {
        let args = MZUnmixer::parse_from(["mzunmixer", "-"]);
        assert_eq!(args.lambda_grid, default_lambda_grid());
        assert_eq!(args.output_file, PathBuf::from("-"));
        assert_eq!(args.criterion, ArgCriterion::Bic);
    }
}
