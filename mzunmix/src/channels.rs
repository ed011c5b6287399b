//! Tolerance-based clustering of predicted m/z values into shared mass channels.
//!
//! All candidates' predicted fragment m/z values are merged into a single ordered
//! set of [`MassChannel`]s which serves as the common coordinate system for the
//! design matrix and the response vector.
use mzpeaks::coordinate::Span1D;
use mzpeaks::{CoordinateLike, Tolerance, MZ};

/// How a channel's representative center moves as it absorbs values
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CenterPolicy {
    /// The center is the mean of all values absorbed so far. Long chains of
    /// closely spaced values may drift the channel's span past the nominal
    /// tolerance.
    #[default]
    RunningMean,
    /// The center is the first, smallest value absorbed. Every member is
    /// within tolerance of the center.
    Anchor,
}

/// A bucket of m/z space shared by all candidates of one spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MassChannel {
    /// The smallest m/z absorbed
    pub start: f64,
    /// The largest m/z absorbed
    pub end: f64,
    /// The representative m/z of the channel
    pub center: f64,
    /// The number of values absorbed
    pub size: usize,
}

impl MassChannel {
    fn seed(mz: f64) -> Self {
        Self {
            start: mz,
            end: mz,
            center: mz,
            size: 1,
        }
    }

    fn absorb(&mut self, mz: f64, policy: CenterPolicy) {
        self.size += 1;
        self.start = self.start.min(mz);
        self.end = self.end.max(mz);
        if let CenterPolicy::RunningMean = policy {
            self.center += (mz - self.center) / self.size as f64;
        }
    }

    /// The interval a peak must fall in to be assigned to this channel:
    /// the member span, widened to at least the tolerance around the center.
    pub fn acceptance_bounds(&self, tolerance: Tolerance) -> (f64, f64) {
        let (lo, hi) = tolerance.bounds(self.center);
        (lo.min(self.start), hi.max(self.end))
    }

    pub fn accepts(&self, mz: f64, tolerance: Tolerance) -> bool {
        let (lo, hi) = self.acceptance_bounds(tolerance);
        mz >= lo && mz <= hi
    }

    /// The absolute width of the member span
    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

impl PartialOrd for MassChannel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.center.partial_cmp(&other.center)
    }
}

impl CoordinateLike<MZ> for MassChannel {
    fn coordinate(&self) -> f64 {
        self.center
    }
}

impl Span1D for MassChannel {
    type DimType = f64;

    fn start(&self) -> Self::DimType {
        self.start
    }

    fn end(&self) -> Self::DimType {
        self.end
    }
}

/// An ordered, disjoint set of [`MassChannel`]s together with the tolerance
/// they were built with.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet {
    channels: Vec<MassChannel>,
    tolerance: Tolerance,
}

impl ChannelSet {
    pub fn empty(tolerance: Tolerance) -> Self {
        Self {
            channels: Vec::new(),
            tolerance,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[inline]
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, MassChannel> {
        self.channels.iter()
    }

    pub fn as_slice(&self) -> &[MassChannel] {
        &self.channels
    }

    pub fn get(&self, index: usize) -> Option<&MassChannel> {
        self.channels.get(index)
    }

    /// Find the channel a peak at `mz` belongs to: the channel with the
    /// nearest center among those whose acceptance bounds contain `mz`.
    /// Equidistant channels resolve to the lower index.
    pub fn assign(&self, mz: f64) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }
        let split = self.channels.partition_point(|c| c.center < mz);
        let mut best: Option<(usize, f64)> = None;
        let consider = |i: usize, best: &mut Option<(usize, f64)>| {
            let channel = &self.channels[i];
            if !channel.accepts(mz, self.tolerance) {
                return false;
            }
            let dist = (channel.center - mz).abs();
            match best {
                Some((j, d)) if dist > *d || (dist == *d && *j < i) => {}
                _ => *best = Some((i, dist)),
            }
            true
        };

        // Acceptance windows are contiguous around `split`, so walking outwards
        // can stop at the first channel that rejects the peak on each side.
        for i in (0..split).rev() {
            if !consider(i, &mut best) {
                break;
            }
        }
        for i in split..self.channels.len() {
            if !consider(i, &mut best) {
                break;
            }
        }
        best.map(|(i, _)| i)
    }
}

impl<'a> IntoIterator for &'a ChannelSet {
    type Item = &'a MassChannel;
    type IntoIter = std::slice::Iter<'a, MassChannel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

/// Merge m/z values into mass channels with a greedy single pass.
///
/// Values are sorted ascending and scanned once. A value joins the current
/// channel when it lies within `tolerance` of the channel's current center,
/// inclusive of the boundary, and otherwise opens a new channel. The result
/// is deterministic for a given multiset of values regardless of input order.
#[tracing::instrument(level = "trace", skip(mzs))]
pub fn cluster_channels<I: IntoIterator<Item = f64>>(
    mzs: I,
    tolerance: Tolerance,
    policy: CenterPolicy,
) -> ChannelSet {
    let mut values: Vec<f64> = mzs.into_iter().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));

    let mut channels: Vec<MassChannel> = Vec::new();
    let mut values = values.into_iter();
    let Some(first) = values.next() else {
        return ChannelSet::empty(tolerance);
    };
    let last = values.fold(MassChannel::seed(first), |mut current, mz| {
        if tolerance.test(mz, current.center) {
            current.absorb(mz, policy);
            current
        } else {
            channels.push(current);
            MassChannel::seed(mz)
        }
    });
    channels.push(last);
    tracing::trace!("Built {} channels", channels.len());
    ChannelSet {
        channels,
        tolerance,
    }
}
