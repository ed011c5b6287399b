use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, prelude::*, BufWriter};
use std::path::Path;

use crossbeam_channel::{Receiver, Sender};
use flate2::{write::GzEncoder, Compression};
use itertools::Itertools;
use tracing::{debug, error, info};

use mzunmix::DeconvolutionRecord;

use crate::types::{RecordResult, BUFFER_SIZE};

/// Restores the input order of records completed out of order
#[derive(Debug)]
pub(crate) struct Collator<T> {
    pub waiting: BTreeMap<usize, T>,
    pub next_key: usize,
}

impl<T> Default for Collator<T> {
    fn default() -> Self {
        Self {
            waiting: BTreeMap::new(),
            next_key: 0,
        }
    }
}

impl<T> Collator<T> {
    pub fn receive(&mut self, key: usize, item: T) {
        self.waiting.insert(key, item);
    }

    pub fn has_next(&self) -> bool {
        self.waiting.contains_key(&self.next_key)
    }

    pub fn try_next(&mut self) -> Option<(usize, T)> {
        let key = self.next_key;
        let item = self.waiting.remove(&key)?;
        self.next_key += 1;
        Some((key, item))
    }
}

/// Forward records from `receiver` to `sender` in input order.
///
/// Once `receiver` disconnects, anything still held back by a gap in the
/// sequence is flushed in key order.
pub(crate) fn collate_results(receiver: Receiver<RecordResult>, sender: Sender<RecordResult>) {
    let mut collator = Collator::default();
    let mut warned_at = BUFFER_SIZE;

    while let Ok((idx, record)) = receiver.recv() {
        collator.receive(idx, record);
        while let Some((idx, record)) = collator.try_next() {
            if let Err(e) = sender.send((idx, record)) {
                error!("Failed to send {idx} for writing: {e}");
                return;
            }
        }
        let n = collator.waiting.len();
        if n >= warned_at {
            info!(
                "Collator holding {n} entries, next key {} ({})",
                collator.next_key,
                collator.has_next()
            );
            warned_at = n * 2;
        }
    }
    let n = collator.waiting.len();
    if n > 0 {
        debug!("Draining output queue, {n} items");
    }
    for (idx, record) in std::mem::take(&mut collator.waiting) {
        if let Err(e) = sender.send((idx, record)) {
            error!("Failed to send {idx} for writing: {e}");
            break;
        }
    }
    debug!("Record collator done");
}

/// A byte stream that may need an explicit trailer written on completion
pub trait OutputStream: Write + Send {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl OutputStream for Vec<u8> {}

/// The destination of an output file
pub enum OutputHandle {
    Stdout(BufWriter<io::Stdout>),
    File(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputHandle {
    /// Open `path` for writing, or STDOUT when `path` is `-`. Paths ending in
    /// `.gz` are gzip compressed.
    pub fn create(path: &Path) -> io::Result<Self> {
        if path.as_os_str() == "-" {
            return Ok(Self::Stdout(BufWriter::new(io::stdout())));
        }
        let handle = BufWriter::new(File::create(path)?);
        if is_gzip_path(path) {
            Ok(Self::Gzip(GzEncoder::new(handle, Compression::default())))
        } else {
            Ok(Self::File(handle))
        }
    }
}

impl Write for OutputHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(w) => w.write(buf),
            Self::File(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

impl OutputStream for OutputHandle {
    fn finish(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
            _ => self.flush(),
        }
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tsv,
    JsonLines,
}

impl OutputFormat {
    /// Guess the output format from a path's extension, looking past a
    /// trailing `.gz`. `-` means TSV on STDOUT.
    pub fn infer(path: &Path) -> Option<Self> {
        if path.as_os_str() == "-" {
            return Some(Self::Tsv);
        }
        let inner = if is_gzip_path(path) {
            Path::new(path.file_stem()?)
        } else {
            path
        };
        let ext = inner.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tsv" | "txt" => Some(Self::Tsv),
            "jsonl" | "json" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

pub trait RecordWriter: Send {
    fn write_record(&mut self, record: &DeconvolutionRecord) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

impl<W: RecordWriter + ?Sized> RecordWriter for Box<W> {
    fn write_record(&mut self, record: &DeconvolutionRecord) -> io::Result<()> {
        (**self).write_record(record)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

const TSV_HEADER: [&str; 16] = [
    "spectrum_id",
    "status",
    "skip_reason",
    "lambda",
    "candidate_id",
    "coefficient",
    "share",
    "ground_truth_count",
    "ground_truth_share",
    "cosine",
    "spearman",
    "pearson",
    "n_channels",
    "unassigned_fraction",
    "rss",
    "iterations",
];

fn opt_to_string(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes one row per spectrum and candidate. Skipped spectra get a single
/// row with the candidate fields left empty.
pub struct TsvWriter<W: OutputStream> {
    handle: W,
    header_written: bool,
}

impl<W: OutputStream> TsvWriter<W> {
    pub fn new(handle: W) -> Self {
        Self {
            handle,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.handle
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.handle, "{}", TSV_HEADER.iter().join("\t"))?;
        self.header_written = true;
        Ok(())
    }

    fn write_row(
        &mut self,
        record: &DeconvolutionRecord,
        candidate: [String; 5],
    ) -> io::Result<()> {
        let skip_reason = record
            .skip_reason
            .as_ref()
            .map(|r| r.label())
            .unwrap_or_default();
        let [candidate_id, coefficient, share, ground_truth_count, ground_truth_share] =
            candidate;
        let row = [
            record.spectrum_id.clone(),
            record.status.to_string(),
            skip_reason.to_string(),
            opt_to_string(record.lambda),
            candidate_id,
            coefficient,
            share,
            ground_truth_count,
            ground_truth_share,
            opt_to_string(record.cosine),
            opt_to_string(record.concordance.spearman),
            opt_to_string(record.concordance.pearson),
            record.n_channels.to_string(),
            opt_to_string(record.unassigned_fraction),
            opt_to_string(record.rss),
            record.iterations.to_string(),
        ];
        writeln!(self.handle, "{}", row.iter().join("\t"))
    }
}

impl<W: OutputStream> RecordWriter for TsvWriter<W> {
    fn write_record(&mut self, record: &DeconvolutionRecord) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        if record.contributions.is_empty() {
            return self.write_row(record, Default::default());
        }
        for c in record.contributions.iter() {
            self.write_row(
                record,
                [
                    c.id.clone(),
                    c.coefficient.to_string(),
                    c.share.to_string(),
                    c.ground_truth_count.to_string(),
                    c.ground_truth_share.to_string(),
                ],
            )?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        self.handle.finish()
    }
}

/// Writes one JSON object per record per line
pub struct JsonLinesWriter<W: OutputStream> {
    handle: W,
}

impl<W: OutputStream> JsonLinesWriter<W> {
    pub fn new(handle: W) -> Self {
        Self { handle }
    }

    pub fn into_inner(self) -> W {
        self.handle
    }
}

impl<W: OutputStream> RecordWriter for JsonLinesWriter<W> {
    fn write_record(&mut self, record: &DeconvolutionRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.handle, record)?;
        self.handle.write_all(b"\n")
    }

    fn close(&mut self) -> io::Result<()> {
        self.handle.finish()
    }
}

pub fn write_output<S: RecordWriter>(
    mut writer: S,
    receiver: Receiver<RecordResult>,
) -> io::Result<()> {
    let mut checkpoint = 0usize;
    let mut record_counter = 0usize;
    while let Ok((idx, record)) = receiver.recv() {
        record_counter += 1;
        if idx.saturating_sub(checkpoint) >= 1000 {
            let queue_size = receiver.len();
            info!(
                "Completed Spectrum {} | {queue_size} items in the write queue",
                idx + 1
            );
            checkpoint = idx;
        }
        writer.write_record(&record)?;
    }
    info!("Finished | Spectra={record_counter}");
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use mzunmix::{
        CandidateContribution, Concordance, DegenerateInput, RecordStatus,
    };

    fn fitted(id: &str) -> DeconvolutionRecord {
        DeconvolutionRecord {
            spectrum_id: id.to_string(),
            status: RecordStatus::Fitted,
            skip_reason: None,
            lambda: Some(0.0),
            contributions: vec![
                CandidateContribution {
                    id: "A".into(),
                    coefficient: 0.75,
                    share: 0.75,
                    ground_truth_count: 3,
                    ground_truth_share: 0.75,
                },
                CandidateContribution {
                    id: "B".into(),
                    coefficient: 0.25,
                    share: 0.25,
                    ground_truth_count: 1,
                    ground_truth_share: 0.25,
                },
            ],
            cosine: Some(1.0),
            concordance: Concordance {
                spearman: Some(1.0),
                pearson: Some(1.0),
            },
            n_channels: 4,
            unassigned_fraction: Some(0.0),
            rss: Some(0.0),
            iterations: 12,
        }
    }

    #[test]
    fn test_collator() {
        let mut collator = Collator::default();
        collator.receive(1, "b");
        assert!(!collator.has_next());
        assert!(collator.try_next().is_none());
        collator.receive(0, "a");
        assert_eq!(collator.try_next(), Some((0, "a")));
        assert_eq!(collator.try_next(), Some((1, "b")));
        assert!(collator.try_next().is_none());
        assert_eq!(collator.next_key, 2);
    }

    #[test_log::test]
    fn test_collate_results_restores_order() {
        let (send_in, recv_in) = crossbeam_channel::unbounded();
        let (send_out, recv_out) = crossbeam_channel::unbounded();
        for i in [3usize, 0, 2, 1, 5] {
            send_in.send((i, fitted(&i.to_string()))).unwrap();
        }
        drop(send_in);
        collate_results(recv_in, send_out);
        let order: Vec<usize> = recv_out.iter().map(|(i, _)| i).collect();
        // 4 never arrives, so 5 is flushed at the end
        assert_eq!(order, vec![0, 1, 2, 3, 5]);
    }

    #[test]
    fn test_infer_format() {
        assert_eq!(OutputFormat::infer(Path::new("-")), Some(OutputFormat::Tsv));
        assert_eq!(OutputFormat::infer(Path::new("out.tsv")), Some(OutputFormat::Tsv));
        assert_eq!(
            OutputFormat::infer(Path::new("out.tsv.gz")),
            Some(OutputFormat::Tsv)
        );
        assert_eq!(
            OutputFormat::infer(Path::new("dir/out.JSONL")),
            Some(OutputFormat::JsonLines)
        );
        assert_eq!(
            OutputFormat::infer(Path::new("out.json.gz")),
            Some(OutputFormat::JsonLines)
        );
        assert_eq!(OutputFormat::infer(Path::new("out.mzML")), None);
        assert_eq!(OutputFormat::infer(Path::new("out")), None);
    }

    #[test]
    fn test_tsv_writer() -> io::Result<()> {
        let mut writer = TsvWriter::new(Vec::new());
        writer.write_record(&fitted("scan=1"))?;
        writer.write_record(&DeconvolutionRecord::skipped(
            "scan=2",
            DegenerateInput::NoObservedPeaks,
        ))?;
        writer.close()?;
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].split('\t').count(), TSV_HEADER.len());
        assert!(lines[1].starts_with("scan=1\tfitted\t\t0\tA\t0.75\t0.75\t3\t0.75\t1\t"));
        assert!(lines[2].starts_with("scan=1\tfitted\t\t0\tB\t0.25"));
        let skipped: Vec<_> = lines[3].split('\t').collect();
        assert_eq!(skipped.len(), TSV_HEADER.len());
        assert_eq!(skipped[1], "skipped");
        assert_eq!(skipped[2], "no-observed-peaks");
        assert!(skipped[4..12].iter().all(|f| f.is_empty()));
        Ok(())
    }

    #[test]
    fn test_jsonl_writer() -> io::Result<()> {
        let mut writer = JsonLinesWriter::new(Vec::new());
        let record = fitted("scan=1");
        writer.write_record(&record)?;
        writer.close()?;
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let decoded: DeconvolutionRecord = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(decoded, record);
        Ok(())
    }
}
