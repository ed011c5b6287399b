use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::Sender;
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use mzunmix::{ChimericSpectrum, DeconvolutionError};

use crate::progress::ProgressRecord;
use crate::types::{EngineType, RecordResult};

/// Deconvolve every spectrum from `reader` on the current thread pool, sending
/// each record tagged with its input position to `sender`.
///
/// Records arrive at `sender` in completion order, not input order. A contract
/// violation in any spectrum halts the batch and is returned.
pub fn prepare_processing<I: Iterator<Item = ChimericSpectrum> + Send>(
    reader: I,
    engine: EngineType,
    sender: Sender<RecordResult>,
) -> Result<ProgressRecord, DeconvolutionError> {
    let init_counter = AtomicU32::new(0);
    let started = Instant::now();

    let prog = reader
        .enumerate()
        .par_bridge()
        .map_init(
            || {
                init_counter.fetch_add(1, Ordering::AcqRel);
                engine.clone()
            },
            |engine, (spectrum_idx, spectrum)| {
                trace!("Processing spectrum {spectrum_idx}");
                engine
                    .deconvolve(&spectrum)
                    .map(|record| (spectrum_idx, record))
            },
        )
        .map(|result| {
            result.map(|(spectrum_idx, record)| {
                if tracing::event_enabled!(tracing::Level::TRACE) {
                    let tid = thread::current().id();
                    trace!(
                        "{tid:?}: Sending spectrum {spectrum_idx} ({})",
                        record.spectrum_id
                    );
                }
                let prog = ProgressRecord::from(&record);
                if let Err(e) = sender.send((spectrum_idx, record)) {
                    warn!("Failed to send record: {}", e);
                }
                prog
            })
        })
        .try_fold(ProgressRecord::default, |acc, prog| prog.map(|p| acc + p))
        .try_reduce(ProgressRecord::default, |a, b| Ok(a + b))?;

    let elapsed = started.elapsed();
    debug!(
        "{} workers run for deconvolution",
        init_counter.load(Ordering::SeqCst)
    );
    let spectra_per_second = prog.spectra as f64 / elapsed.as_secs_f64().max(1e-9);
    info!(
        "Elapsed Time: {:0.3?} ({:0.2} spectra/sec)",
        elapsed, spectra_per_second
    );
    Ok(prog)
}

#[cfg(test)]
mod test {
    use super::*;
    use mzunmix::{Candidate, ObservedSpectrum, PredictedSpectrum};

    fn spectrum(i: usize) -> ChimericSpectrum {
        let a = PredictedSpectrum::from_pairs([(100.0, 1.0), (200.0, 1.0)]);
        let b = PredictedSpectrum::from_pairs([(150.0, 1.0), (250.0, 1.0)]);
        let observed = if i % 3 == 0 {
            ObservedSpectrum::default()
        } else {
            ObservedSpectrum::from_pairs([(100.0, 2.0), (150.0, 1.0), (200.0, 2.0), (250.0, 1.0)])
        };
        ChimericSpectrum::new(
            format!("scan={i}"),
            observed,
            vec![Candidate::new("A", a), Candidate::new("B", b)],
        )
    }

    #[test_log::test]
    fn test_process_batch() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let prog = prepare_processing(
            (0..12).map(spectrum),
            EngineType::default(),
            sender,
        )
        .unwrap();
        assert_eq!(prog.spectra, 12);
        assert_eq!(prog.skipped, 4);
        assert_eq!(prog.no_observed_peaks, 4);
        assert_eq!(prog.fitted + prog.low_confidence, 8);

        let mut received: Vec<_> = receiver.iter().collect();
        received.sort_by_key(|(i, _)| *i);
        assert_eq!(received.len(), 12);
        for (i, (idx, record)) in received.iter().enumerate() {
            assert_eq!(i, *idx);
            assert_eq!(record.spectrum_id, format!("scan={i}"));
        }
    }
}
