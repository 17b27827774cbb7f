//! Intensity histograms of the spatial representation.
//!
//! Histograms are computed once at import time and persisted next to the
//! role files, so intensity statistics can be served without touching the
//! pixels again.
//!
//! ```text
//!  build (engine)                     query (blob + binning)
//!  ─────────────────                  ──────────────────────────────
//!  thumbnail per (z, t)               HistogramBlob::open(path)
//!    │ count per channel                │ index only
//!    ▼                                  ▼
//!  plane:c:z:t ──sum z,t──► channel:c   get(scope) ── one range read
//!                  ──sum c──► image       │
//!    │                                    ▼
//!    ▼                                  bin_histogram(n_bins, full_range)
//!  tmp_histogram ──rename──► histogram
//! ```
//!
//! A histogram of `2^significant_bits` raw bins is kept per scope. Scopes
//! that carry no extra information are not stored: plane scopes when the
//! image has a single plane per channel, channel scopes when it also has a
//! single channel. Lookups fall back to the broader scope.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HistogramError;

mod binning;
mod blob;
mod engine;

pub use binning::{bin_histogram, is_power_of_two, parse_n_bins, BinnedHistogram};
pub use blob::{HistogramBlob, BLOB_MAGIC};
pub use engine::{build, HISTOGRAM_STEM, MAX_PIXELS_COMPLETE, THUMBNAIL_LENGTH};

// =============================================================================
// Mode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistogramMode {
    /// Counts from a reduced-resolution read, scaled to the full pixel count
    Fast,
    /// Counts from every pixel
    Complete,
}

impl fmt::Display for HistogramMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistogramMode::Fast => f.write_str("FAST"),
            HistogramMode::Complete => f.write_str("COMPLETE"),
        }
    }
}

// =============================================================================
// Scope
// =============================================================================

/// Key of one stored histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HistogramScope {
    Image,
    Channel(usize),
    Plane { c: usize, z: usize, t: usize },
}

impl HistogramScope {
    /// The scope this one falls back to when it was not stored.
    pub fn broader(self) -> Option<HistogramScope> {
        match self {
            HistogramScope::Image => None,
            HistogramScope::Channel(_) => Some(HistogramScope::Image),
            HistogramScope::Plane { c, .. } => Some(HistogramScope::Channel(c)),
        }
    }
}

impl fmt::Display for HistogramScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistogramScope::Image => f.write_str("image"),
            HistogramScope::Channel(c) => write!(f, "channel:{c}"),
            HistogramScope::Plane { c, z, t } => write!(f, "plane:{c}:{z}:{t}"),
        }
    }
}

impl FromStr for HistogramScope {
    type Err = HistogramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || HistogramError::UnknownScope(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        let index = |i: usize| -> Result<usize, HistogramError> {
            parts
                .get(i)
                .and_then(|p| p.parse().ok())
                .ok_or_else(unknown)
        };

        match (parts[0], parts.len()) {
            ("image", 1) => Ok(HistogramScope::Image),
            ("channel", 2) => Ok(HistogramScope::Channel(index(1)?)),
            ("plane", 4) => Ok(HistogramScope::Plane {
                c: index(1)?,
                z: index(2)?,
                t: index(3)?,
            }),
            _ => Err(unknown()),
        }
    }
}

// =============================================================================
// Stored histogram
// =============================================================================

/// Raw bins of one scope with their bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeHistogram {
    pub bins: Vec<u64>,

    /// Index of the first non-empty bin
    pub first_bin: usize,

    /// Index of the last non-empty bin
    pub last_bin: usize,

    /// Declared intensity range, `0..=2^bits - 1`
    pub range: (u64, u64),
}

impl ScopeHistogram {
    pub fn new(bins: Vec<u64>, significant_bits: u8) -> Self {
        let (first_bin, last_bin) = tight_bounds(&bins);
        Self {
            bins,
            first_bin,
            last_bin,
            range: (0, (1u64 << significant_bits) - 1),
        }
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.first_bin, self.last_bin)
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }
}

/// First and last non-zero bin. An empty histogram spans every bin.
pub fn tight_bounds(bins: &[u64]) -> (usize, usize) {
    let last_index = bins.len().saturating_sub(1);
    let first = bins.iter().position(|&b| b != 0).unwrap_or(0);
    let last = bins.iter().rposition(|&b| b != 0).unwrap_or(last_index);
    (first, last)
}

/// Plane layout of the image a histogram was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramShape {
    pub n_channels: usize,
    pub depth: usize,
    pub duration: usize,
}

impl HistogramShape {
    /// Whether `scope` addresses a plane or channel of this shape.
    pub fn contains(&self, scope: HistogramScope) -> bool {
        match scope {
            HistogramScope::Image => true,
            HistogramScope::Channel(c) => c < self.n_channels,
            HistogramScope::Plane { c, z, t } => {
                c < self.n_channels && z < self.depth && t < self.duration
            }
        }
    }

    pub fn stores_planes(&self) -> bool {
        self.depth > 1 || self.duration > 1
    }

    pub fn stores_channels(&self) -> bool {
        self.stores_planes() || self.n_channels > 1
    }
}
