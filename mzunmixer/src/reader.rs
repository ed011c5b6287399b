use std::fs::File;
use std::io::{self, prelude::*, BufReader};
use std::path::Path;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use mzunmix::{Candidate, ChimericSpectrum, ObservedSpectrum, PredictedSpectrum};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One candidate as it appears in the input stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub peaks: Vec<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_fragments: Option<u32>,
}

impl From<CandidateRecord> for Candidate {
    fn from(value: CandidateRecord) -> Self {
        let spectrum = PredictedSpectrum::from_pairs(value.peaks);
        Candidate {
            id: value.id,
            spectrum,
            matched_fragments: value.matched_fragments,
        }
    }
}

/// One line of the input stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRecord {
    pub spectrum_id: String,
    #[serde(default)]
    pub peaks: Vec<(f64, f64)>,
    #[serde(default)]
    pub candidates: Vec<CandidateRecord>,
}

impl From<SpectrumRecord> for ChimericSpectrum {
    fn from(value: SpectrumRecord) -> Self {
        let observed = ObservedSpectrum::from_pairs(value.peaks);
        ChimericSpectrum::new(
            value.spectrum_id,
            observed,
            value.candidates.into_iter().map(Candidate::from).collect(),
        )
    }
}

pub fn is_gzipped(header: &[u8]) -> bool {
    header.starts_with(&GZIP_MAGIC)
}

/// Open `path` for reading, or STDIN when `path` is `-`, decompressing
/// transparently if the stream starts with a gzip header.
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let raw: Box<dyn Read + Send> = if path.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path)?)
    };
    let mut handle = BufReader::with_capacity(2usize.pow(20), raw);
    if is_gzipped(handle.fill_buf()?) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(handle))))
    } else {
        Ok(Box::new(handle))
    }
}

/// Reads [`ChimericSpectrum`] records from a JSON Lines stream.
///
/// Blank lines are ignored. Lines that fail to parse are logged, counted and
/// skipped. A read error ends the stream.
pub struct SpectrumReader<R: BufRead> {
    handle: R,
    buffer: Vec<u8>,
    line_number: usize,
    unreadable: Arc<AtomicUsize>,
}

impl<R: BufRead> SpectrumReader<R> {
    pub fn new(handle: R) -> Self {
        Self {
            handle,
            buffer: Vec::new(),
            line_number: 0,
            unreadable: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A shared handle on the count of lines skipped so far
    pub fn unreadable_counter(&self) -> Arc<AtomicUsize> {
        self.unreadable.clone()
    }

    pub fn unreadable(&self) -> usize {
        self.unreadable.load(Ordering::SeqCst)
    }

    fn read_next(&mut self) -> Option<ChimericSpectrum> {
        loop {
            self.buffer.clear();
            match self.handle.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to read input after line {}: {e}",
                        self.line_number
                    );
                    self.unreadable.fetch_add(1, Ordering::SeqCst);
                    return None;
                }
            }
            if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match serde_json::from_slice::<SpectrumRecord>(&self.buffer) {
                Ok(record) => return Some(record.into()),
                Err(e) => {
                    warn!("Skipping unreadable line {}: {e}", self.line_number);
                    self.unreadable.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for SpectrumReader<R> {
    type Item = ChimericSpectrum;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::{write::GzEncoder, Compression};

    const TEXT: &str = concat!(
        r#"{"spectrum_id": "scan=1", "peaks": [[100.0, 5.0], [200.0, 3.0]], "candidates": [{"id": "PEPTIDE", "peaks": [[100.0, 1.0]], "matched_fragments": 4}]}"#,
        "\n",
        "\n",
        "this is not json\n",
        r#"{"spectrum_id": "scan=2", "candidates": []}"#,
        "\n",
    );

    #[test]
    fn test_read_lines() {
        let mut reader = SpectrumReader::new(io::Cursor::new(TEXT.as_bytes()));
        let first = reader.next().unwrap();
        assert_eq!(first.spectrum_id, "scan=1");
        assert_eq!(first.observed.len(), 2);
        assert_eq!(first.candidates[0].matched_fragments, Some(4));
        assert_eq!(first.candidates[0].spectrum.len(), 1);

        let second = reader.next().unwrap();
        assert_eq!(second.spectrum_id, "scan=2");
        assert!(second.observed.is_empty());
        assert_eq!(second.candidate_count(), 0);

        assert!(reader.next().is_none());
        assert_eq!(reader.unreadable(), 1);
    }

    #[test]
    fn test_read_gzip() -> io::Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(TEXT.as_bytes())?;
        let compressed = encoder.finish()?;
        assert!(is_gzipped(&compressed));
        assert!(!is_gzipped(TEXT.as_bytes()));

        let handle = BufReader::new(MultiGzDecoder::new(io::Cursor::new(compressed)));
        let reader = SpectrumReader::new(handle);
        assert_eq!(reader.count(), 2);
        Ok(())
    }

    #[test]
    fn test_open_missing() {
        assert!(open_input(Path::new("not_real.jsonl")).is_err());
    }
}
