use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::HistogramError;
use crate::image::Image;

use super::blob::HistogramBlob;
use super::{HistogramMode, HistogramScope, HistogramShape, ScopeHistogram};

/// File name of the histogram blob inside `processed/`.
pub const HISTOGRAM_STEM: &str = "histogram";

/// Images with fewer pixels than this are always counted completely.
pub const MAX_PIXELS_COMPLETE: u64 = 1024 * 1024;

/// Longest side of the reduced read used by FAST histograms.
pub const THUMBNAIL_LENGTH: u32 = 1024;

/// Build and persist the histograms of `image` at `output`.
///
/// The blob is staged as `tmp_<name>` and renamed into place once complete.
/// An existing blob is an error unless `overwrite` is set.
pub async fn build(
    image: &Image,
    output: &Path,
    mode: HistogramMode,
    overwrite: bool,
) -> Result<HistogramBlob, HistogramError> {
    let unavailable = |reason: String| HistogramError::SourceUnavailable {
        path: image.path().to_path_buf(),
        reason,
    };
    let main = image
        .main_metadata()
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let n_values = 1usize << main.significant_bits;
    let n_pixels = main.n_pixels();
    let (mode, read_length) = if n_pixels < MAX_PIXELS_COMPLETE {
        (HistogramMode::Complete, THUMBNAIL_LENGTH)
    } else {
        match mode {
            HistogramMode::Fast => (HistogramMode::Fast, THUMBNAIL_LENGTH),
            HistogramMode::Complete => (HistogramMode::Complete, main.width.max(main.height)),
        }
    };

    if !overwrite && tokio::fs::try_exists(output).await.unwrap_or(false) {
        return Err(HistogramError::AlreadyExists {
            path: output.to_path_buf(),
        });
    }

    let shape = HistogramShape {
        n_channels: main.n_channels,
        depth: main.depth as usize,
        duration: main.duration as usize,
    };

    let mut planes: BTreeMap<(usize, usize, usize), Vec<u64>> = BTreeMap::new();
    for t in 0..shape.duration {
        for z in 0..shape.depth {
            let thumb = image
                .read_thumbnail(read_length, z as u32, t as u32)
                .await
                .map_err(|e| unavailable(e.to_string()))?;
            if thumb.channels != shape.n_channels || thumb.n_pixels() == 0 {
                return Err(unavailable(format!(
                    "plane z={z} t={t} has {} channels, expected {}",
                    thumb.channels, shape.n_channels
                )));
            }

            let ratio = n_pixels as f64 / thumb.n_pixels() as f64;
            for c in 0..shape.n_channels {
                let mut counts = vec![0u64; n_values];
                for value in thumb.channel_values(c) {
                    counts[(value as usize).min(n_values - 1)] += 1;
                }
                if ratio != 1.0 {
                    counts
                        .iter_mut()
                        .for_each(|n| *n = (*n as f64 * ratio).round() as u64);
                }
                planes.insert((c, z, t), counts);
            }
        }
    }

    let scopes = aggregate(&planes, shape, n_values, main.significant_bits);
    let bytes = HistogramBlob::encode(mode, main.significant_bits, shape, &scopes)?;

    let tmp = staging_path(output);
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| HistogramError::Io(format!("{}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, output)
        .await
        .map_err(|e| HistogramError::Io(format!("{}: {e}", output.display())))?;

    info!(
        path = %output.display(),
        mode = %mode,
        scopes = scopes.len(),
        bytes = bytes.len(),
        "histogram written"
    );
    HistogramBlob::open(output).await
}

/// Sum plane counts into channel and image scopes, dropping redundant ones.
fn aggregate(
    planes: &BTreeMap<(usize, usize, usize), Vec<u64>>,
    shape: HistogramShape,
    n_values: usize,
    significant_bits: u8,
) -> BTreeMap<HistogramScope, ScopeHistogram> {
    let mut channels = vec![vec![0u64; n_values]; shape.n_channels];
    for (&(c, _, _), counts) in planes {
        add_into(&mut channels[c], counts);
    }
    let mut image = vec![0u64; n_values];
    for counts in &channels {
        add_into(&mut image, counts);
    }

    let mut scopes = BTreeMap::new();
    if shape.stores_planes() {
        for (&(c, z, t), counts) in planes {
            scopes.insert(
                HistogramScope::Plane { c, z, t },
                ScopeHistogram::new(counts.clone(), significant_bits),
            );
        }
    }
    if shape.stores_channels() {
        for (c, counts) in channels.into_iter().enumerate() {
            scopes.insert(
                HistogramScope::Channel(c),
                ScopeHistogram::new(counts, significant_bits),
            );
        }
    }
    scopes.insert(
        HistogramScope::Image,
        ScopeHistogram::new(image, significant_bits),
    );

    debug!(stored = scopes.len(), ?shape, "histogram scopes aggregated");
    scopes
}

fn add_into(total: &mut [u64], counts: &[u64]) {
    total.iter_mut().zip(counts).for_each(|(t, c)| *t += c);
}

fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| HISTOGRAM_STEM.to_string());
    output.with_file_name(format!("tmp_{name}"))
}
