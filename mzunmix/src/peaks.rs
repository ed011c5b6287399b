//! Peak lists for predicted and observed fragment spectra.
use std::cmp::Ordering;

use mzpeaks::{CoordinateLike, MZ};

/// A single (m/z, intensity) pair, either predicted for a candidate
/// peptide or measured in a chimeric scan.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

impl Peak {
    #[inline]
    pub fn new(mz: f64, intensity: f64) -> Self {
        Self { mz, intensity }
    }

    /// Whether the peak has a finite, non-negative m/z and intensity
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.mz.is_finite() && self.intensity.is_finite() && self.mz >= 0.0 && self.intensity >= 0.0
    }
}

impl PartialOrd for Peak {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.mz
                .total_cmp(&other.mz)
                .then_with(|| self.intensity.total_cmp(&other.intensity)),
        )
    }
}

impl CoordinateLike<MZ> for Peak {
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl From<(f64, f64)> for Peak {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl From<[f64; 2]> for Peak {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

fn prepare_peaks(mut peaks: Vec<Peak>) -> Vec<Peak> {
    let n_before = peaks.len();
    peaks.retain(Peak::is_valid);
    if peaks.len() != n_before {
        tracing::trace!("Dropped {} invalid peaks", n_before - peaks.len());
    }
    peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    peaks
}

macro_rules! peak_list {
    ($name:ident) => {
        impl $name {
            /// Build a peak list, dropping non-finite or negative peaks and
            /// sorting the rest by m/z.
            pub fn new(peaks: Vec<Peak>) -> Self {
                Self {
                    peaks: prepare_peaks(peaks),
                }
            }

            pub fn from_pairs<I: IntoIterator<Item = (f64, f64)>>(pairs: I) -> Self {
                Self::new(pairs.into_iter().map(Peak::from).collect())
            }

            #[inline]
            pub fn len(&self) -> usize {
                self.peaks.len()
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.peaks.is_empty()
            }

            #[inline]
            pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
                self.peaks.iter()
            }

            #[inline]
            pub fn as_slice(&self) -> &[Peak] {
                &self.peaks
            }

            /// The summed intensity of the peak list
            pub fn tic(&self) -> f64 {
                self.peaks.iter().map(|p| p.intensity).sum()
            }
        }

        impl FromIterator<Peak> for $name {
            fn from_iter<T: IntoIterator<Item = Peak>>(iter: T) -> Self {
                Self::new(iter.into_iter().collect())
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = &'a Peak;
            type IntoIter = std::slice::Iter<'a, Peak>;

            fn into_iter(self) -> Self::IntoIter {
                self.peaks.iter()
            }
        }
    };
}

/// The predicted fragment spectrum of one candidate peptide. Intensities
/// are relative and need not sum to one.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredictedSpectrum {
    peaks: Vec<Peak>,
}

peak_list!(PredictedSpectrum);

/// The measured peak list of one chimeric scan.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservedSpectrum {
    peaks: Vec<Peak>,
}

peak_list!(ObservedSpectrum);

/// A peptide-spectrum match assigned to a chimeric scan, together with
/// its predicted fragment spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Candidate {
    /// The identifier the candidate's coefficient is reported under
    pub id: String,
    pub spectrum: PredictedSpectrum,
    /// The number of fragment ions matched by the upstream search engine,
    /// if known. Used as ground truth for concordance.
    pub matched_fragments: Option<u32>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, spectrum: PredictedSpectrum) -> Self {
        Self {
            id: id.into(),
            spectrum,
            matched_fragments: None,
        }
    }

    pub fn with_matched_fragments(mut self, matched_fragments: u32) -> Self {
        self.matched_fragments = Some(matched_fragments);
        self
    }
}

/// One unit of deconvolution work: an observed scan and the candidates
/// assigned to it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChimericSpectrum {
    pub spectrum_id: String,
    pub observed: ObservedSpectrum,
    pub candidates: Vec<Candidate>,
}

impl ChimericSpectrum {
    pub fn new(
        spectrum_id: impl Into<String>,
        observed: ObservedSpectrum,
        candidates: Vec<Candidate>,
    ) -> Self {
        Self {
            spectrum_id: spectrum_id.into(),
            observed,
            candidates,
        }
    }

    /// The number of candidates, `K`
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// All predicted m/z values across all candidates, in candidate order
    pub fn predicted_mzs(&self) -> impl Iterator<Item = f64> + '_ {
        self.candidates
            .iter()
            .flat_map(|c| c.spectrum.iter().map(|p| p.mz))
    }
}

#[cfg(test)]
mod test {
    use mzpeaks::MZLocated;

    use super::*;

    #[test]
    fn test_sorted_and_filtered() {
        let spec = PredictedSpectrum::from_pairs([
            (500.0, 1.0),
            (f64::NAN, 2.0),
            (200.0, 3.0),
            (300.0, -1.0),
        ]);
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.as_slice()[0].mz(), 200.0);
        assert_eq!(spec.as_slice()[1].mz(), 500.0);
        assert_eq!(spec.tic(), 4.0);
    }

    #[test]
    fn test_predicted_mzs() {
        let record = ChimericSpectrum::new(
            "run1::10",
            ObservedSpectrum::from_pairs([(100.0, 1.0)]),
            vec![
                Candidate::new("A", PredictedSpectrum::from_pairs([(100.0, 1.0), (150.0, 1.0)])),
                Candidate::new("B", PredictedSpectrum::from_pairs([(120.0, 1.0)])),
            ],
        );
        let mzs: Vec<_> = record.predicted_mzs().collect();
        assert_eq!(mzs, vec![100.0, 150.0, 120.0]);
        assert_eq!(record.candidate_count(), 2);
    }
}
