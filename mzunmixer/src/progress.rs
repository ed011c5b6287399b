use std::ops::{Add, AddAssign};

use mzunmix::{DeconvolutionRecord, DegenerateInput, RecordStatus};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub spectra: usize,
    pub fitted: usize,
    pub low_confidence: usize,
    pub skipped: usize,
    pub too_few_candidates: usize,
    pub no_observed_peaks: usize,
    pub no_channels: usize,
    pub zero_response: usize,
    pub candidates: usize,
    pub unreadable: usize,
}

impl ProgressRecord {
    /// The count of skipped spectra per reason, labeled
    pub fn skip_reasons(&self) -> [(&'static str, usize); 4] {
        [
            ("too-few-candidates", self.too_few_candidates),
            ("no-observed-peaks", self.no_observed_peaks),
            ("no-channels", self.no_channels),
            ("zero-response", self.zero_response),
        ]
    }
}

impl From<&DeconvolutionRecord> for ProgressRecord {
    fn from(record: &DeconvolutionRecord) -> Self {
        let mut prog = ProgressRecord {
            spectra: 1,
            candidates: record.contributions.len(),
            ..Default::default()
        };
        match record.status {
            RecordStatus::Fitted => prog.fitted += 1,
            RecordStatus::LowConfidence => prog.low_confidence += 1,
            RecordStatus::Skipped => {
                prog.skipped += 1;
                match record.skip_reason {
                    Some(DegenerateInput::TooFewCandidates { .. }) => prog.too_few_candidates += 1,
                    Some(DegenerateInput::NoObservedPeaks) => prog.no_observed_peaks += 1,
                    Some(DegenerateInput::NoChannels) => prog.no_channels += 1,
                    Some(DegenerateInput::ZeroResponse) => prog.zero_response += 1,
                    None => {}
                }
            }
        }
        prog
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.spectra += rhs.spectra;
        self.fitted += rhs.fitted;
        self.low_confidence += rhs.low_confidence;
        self.skipped += rhs.skipped;
        self.too_few_candidates += rhs.too_few_candidates;
        self.no_observed_peaks += rhs.no_observed_peaks;
        self.no_channels += rhs.no_channels;
        self.zero_response += rhs.zero_response;
        self.candidates += rhs.candidates;
        self.unreadable += rhs.unreadable;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_accumulate() {
        let skipped = DeconvolutionRecord::skipped("a", DegenerateInput::ZeroResponse);
        let mut total = ProgressRecord::from(&skipped);
        total += ProgressRecord::from(&DeconvolutionRecord::skipped(
            "b",
            DegenerateInput::NoObservedPeaks,
        ));
        assert_eq!(total.spectra, 2);
        assert_eq!(total.skipped, 2);
        assert_eq!(total.zero_response, 1);
        assert_eq!(total.no_observed_peaks, 1);
        assert_eq!(total.fitted, 0);
        assert_eq!(total.skip_reasons()[3], ("zero-response", 1));
    }
}
