//! Projection of peak lists onto a [`ChannelSet`], producing the response
//! vector `y` from the observed spectrum and the design matrix `X` from the
//! candidates' predicted spectra.
use nalgebra::{DMatrix, DVector};

use crate::channels::ChannelSet;
use crate::peaks::{Candidate, ObservedSpectrum, Peak};

/// The result of summing a peak list's intensities into channels
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProjection {
    /// Per-channel intensity, L1-normalized unless no intensity was assigned
    pub values: DVector<f64>,
    /// The raw intensity that landed in some channel
    pub assigned_intensity: f64,
    /// The raw intensity of peaks outside every channel's tolerance
    pub unassigned_intensity: f64,
    /// The number of peaks outside every channel's tolerance
    pub unassigned_peaks: usize,
}

impl ChannelProjection {
    /// Whether the projection carries any signal in this channel space
    pub fn has_signal(&self) -> bool {
        self.assigned_intensity > 0.0
    }

    /// The fraction of the input's intensity which could not be placed in
    /// any channel
    pub fn unassigned_fraction(&self) -> f64 {
        let total = self.assigned_intensity + self.unassigned_intensity;
        if total > 0.0 {
            self.unassigned_intensity / total
        } else {
            0.0
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Sum peak intensities into their assigned channels and L1-normalize.
///
/// Peaks outside every channel's tolerance are dropped and counted. If no
/// intensity is assigned the zero vector is returned.
pub fn project_peaks<'a, I: IntoIterator<Item = &'a Peak>>(
    channels: &ChannelSet,
    peaks: I,
) -> ChannelProjection {
    let mut values = DVector::<f64>::zeros(channels.len());
    let mut unassigned_intensity = 0.0;
    let mut unassigned_peaks = 0;
    for peak in peaks {
        match channels.assign(peak.mz) {
            Some(i) => values[i] += peak.intensity,
            None => {
                unassigned_intensity += peak.intensity;
                unassigned_peaks += 1;
            }
        }
    }
    let assigned_intensity = values.sum();
    if assigned_intensity > 0.0 {
        values /= assigned_intensity;
    } else {
        values.fill(0.0);
    }
    ChannelProjection {
        values,
        assigned_intensity,
        unassigned_intensity,
        unassigned_peaks,
    }
}

/// The observed intensities over the mass channels, `y`
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseVector {
    pub projection: ChannelProjection,
}

impl ResponseVector {
    #[inline]
    pub fn values(&self) -> &DVector<f64> {
        &self.projection.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.projection.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.projection.is_empty()
    }

    pub fn has_signal(&self) -> bool {
        self.projection.has_signal()
    }
}

impl From<DVector<f64>> for ResponseVector {
    fn from(values: DVector<f64>) -> Self {
        let assigned_intensity = values.sum();
        Self {
            projection: ChannelProjection {
                values,
                assigned_intensity,
                unassigned_intensity: 0.0,
                unassigned_peaks: 0,
            },
        }
    }
}

/// Project the observed spectrum onto the channels
pub fn project_observed(channels: &ChannelSet, observed: &ObservedSpectrum) -> ResponseVector {
    ResponseVector {
        projection: project_peaks(channels, observed),
    }
}

/// The channels-by-candidates matrix of normalized predicted intensities, `X`.
///
/// Column `k` always corresponds to the `k`th candidate, even when that
/// candidate contributes no signal and its column is all zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    /// Whether each column carries any signal
    signal: Vec<bool>,
}

impl DesignMatrix {
    pub fn from_columns(columns: Vec<ChannelProjection>, n_channels: usize) -> Self {
        let mut matrix = DMatrix::<f64>::zeros(n_channels, columns.len());
        let signal = columns.iter().map(|c| c.has_signal()).collect();
        for (j, column) in columns.into_iter().enumerate() {
            matrix.set_column(j, &column.values);
        }
        Self { matrix, signal }
    }

    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// The number of mass channels, `M`
    #[inline]
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    /// The number of candidates, `K`
    #[inline]
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn column_has_signal(&self, index: usize) -> bool {
        self.signal.get(index).copied().unwrap_or(false)
    }

    /// Compute `X β`
    pub fn reconstruct(&self, beta: &DVector<f64>) -> DVector<f64> {
        &self.matrix * beta
    }
}

impl From<DMatrix<f64>> for DesignMatrix {
    fn from(matrix: DMatrix<f64>) -> Self {
        let signal = matrix.column_iter().map(|c| c.sum() > 0.0).collect();
        Self { matrix, signal }
    }
}

/// Project every candidate's predicted spectrum onto the channels, one
/// column per candidate in candidate order.
pub fn build_design_matrix(channels: &ChannelSet, candidates: &[Candidate]) -> DesignMatrix {
    let columns = candidates
        .iter()
        .map(|c| {
            let column = project_peaks(channels, &c.spectrum);
            if !column.has_signal() {
                tracing::debug!("Candidate {} contributes no signal to any channel", c.id);
            }
            column
        })
        .collect();
    DesignMatrix::from_columns(columns, channels.len())
}
