use std::{error::Error, fmt::Display, num::ParseFloatError, ops::Range, str::FromStr};

use mzpeaks::coordinate::Span1D;
use serde::{Deserialize, Serialize};

/// An m/z acquisition window. Predicted peaks outside it are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MzRange {
    pub start: f64,
    pub end: f64,
}

impl MzRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

impl Span1D for MzRange {
    type DimType = f64;

    fn start(&self) -> Self::DimType {
        self.start
    }

    fn end(&self) -> Self::DimType {
        self.end
    }
}

impl Default for MzRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: f64::INFINITY,
        }
    }
}

impl Display for MzRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub enum MzRangeParseError {
    MalformedStart(ParseFloatError),
    MalformedEnd(ParseFloatError),
}

impl Display for MzRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MzRangeParseError::MalformedStart(e) => {
                write!(f, "Failed to parse m/z range start {e}")
            }
            MzRangeParseError::MalformedEnd(e) => {
                write!(f, "Failed to parse m/z range end {e}")
            }
        }
    }
}

impl Error for MzRangeParseError {}

impl FromStr for MzRange {
    type Err = MzRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut tokens = if s.contains(' ') {
            s.split(' ')
        } else if s.contains(':') {
            s.split(':')
        } else {
            s.split('-')
        };
        let start_s = tokens.next().unwrap_or_default();
        let start = if start_s.is_empty() {
            0.0
        } else {
            start_s.parse().map_err(MzRangeParseError::MalformedStart)?
        };
        let end_s = tokens.next().unwrap_or_default();
        let end = if end_s.is_empty() {
            f64::INFINITY
        } else {
            end_s.parse().map_err(MzRangeParseError::MalformedEnd)?
        };
        Ok(MzRange { start, end })
    }
}

impl From<Range<f64>> for MzRange {
    fn from(value: Range<f64>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl From<(f64, f64)> for MzRange {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl From<MzRange> for (f64, f64) {
    fn from(value: MzRange) -> Self {
        (value.start, value.end)
    }
}
