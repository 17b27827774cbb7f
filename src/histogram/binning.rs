//! Query-time reduction of a stored histogram.

use serde::Serialize;

use crate::error::HistogramError;

use super::{tight_bounds, ScopeHistogram};

/// A histogram as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinnedHistogram {
    pub histogram: Vec<u64>,

    /// Bounds in output bins
    pub first_bin: usize,
    pub last_bin: usize,

    /// Stored tight bounds, in raw intensity values
    pub minimum: usize,
    pub maximum: usize,

    /// Bin count of the full-range histogram
    pub n_bins: usize,
}

pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Clamp a requested bin count to the raw histogram length.
pub fn parse_n_bins(requested: usize, length: usize) -> usize {
    requested.min(length)
}

/// Reduce `histogram` to `n_bins` bins.
///
/// Each output bin sums `L / n_bins` contiguous raw bins. `n_bins` must be
/// a power of two dividing the raw length `L`. When `n_bins == L` the stored
/// bounds are kept; otherwise they are recomputed on the reduced bins.
/// Unless `full_range` is set, the result is truncated to the bounds.
pub fn bin_histogram(
    histogram: &ScopeHistogram,
    n_bins: usize,
    full_range: bool,
) -> Result<BinnedHistogram, HistogramError> {
    let length = histogram.bins.len();
    let invalid = || HistogramError::InvalidBinCount { n_bins, length };

    if !is_power_of_two(n_bins) || n_bins > length || length % n_bins != 0 {
        return Err(invalid());
    }

    let (bins, (first_bin, last_bin)) = if n_bins == length {
        (histogram.bins.clone(), histogram.bounds())
    } else {
        let width = length / n_bins;
        let reduced: Vec<u64> = histogram
            .bins
            .chunks_exact(width)
            .map(|chunk| chunk.iter().sum())
            .collect();
        let bounds = tight_bounds(&reduced);
        (reduced, bounds)
    };

    let histogram_out = if full_range {
        bins
    } else {
        bins[first_bin..=last_bin].to_vec()
    };

    Ok(BinnedHistogram {
        histogram: histogram_out,
        first_bin,
        last_bin,
        minimum: histogram.first_bin,
        maximum: histogram.last_bin,
        n_bins,
    })
}
