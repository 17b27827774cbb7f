//! Persisted histogram blob.
//!
//! ```text
//! offset 0    magic "WSIHIST1"
//! offset 8    index length N (u64 LE)
//! offset 16   JSON index: mode, bits, shape, scope key -> {offset, n_bins, bounds}
//! offset 16+N bins of every stored scope, u64 LE, back to back
//! ```
//!
//! Opening a blob reads the index only. Each scope is then fetched with a
//! single range read of its own bins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HistogramError, IoError};
use crate::io::{read_u64_le, LocalFileReader, RangeReader};

use super::{HistogramMode, HistogramScope, HistogramShape, ScopeHistogram};

pub const BLOB_MAGIC: &[u8; 8] = b"WSIHIST1";

const PREAMBLE_LEN: u64 = 16;

/// Widest sample type a blob may describe.
pub const MAX_SIGNIFICANT_BITS: u8 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EntryIndex {
    /// Byte offset from the start of the bin payload
    offset: u64,
    n_bins: usize,
    first_bin: usize,
    last_bin: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BlobIndex {
    mode: HistogramMode,
    significant_bits: u8,
    shape: HistogramShape,
    entries: BTreeMap<String, EntryIndex>,
}

/// Read access to a histogram blob.
pub struct HistogramBlob {
    path: PathBuf,
    reader: LocalFileReader,
    index: BlobIndex,
    payload_start: u64,
}

impl HistogramBlob {
    /// Serialize `scopes` into the blob layout.
    pub fn encode(
        mode: HistogramMode,
        significant_bits: u8,
        shape: HistogramShape,
        scopes: &BTreeMap<HistogramScope, ScopeHistogram>,
    ) -> Result<Vec<u8>, HistogramError> {
        let mut entries = BTreeMap::new();
        let mut payload = Vec::new();

        for (scope, histogram) in scopes {
            entries.insert(
                scope.to_string(),
                EntryIndex {
                    offset: payload.len() as u64,
                    n_bins: histogram.bins.len(),
                    first_bin: histogram.first_bin,
                    last_bin: histogram.last_bin,
                },
            );
            payload.extend(histogram.bins.iter().flat_map(|b| b.to_le_bytes()));
        }

        let index = serde_json::to_vec(&BlobIndex {
            mode,
            significant_bits,
            shape,
            entries,
        })
        .map_err(|e| HistogramError::Io(format!("cannot encode histogram index: {e}")))?;

        let mut out = Vec::with_capacity(PREAMBLE_LEN as usize + index.len() + payload.len());
        out.extend_from_slice(BLOB_MAGIC);
        out.extend_from_slice(&(index.len() as u64).to_le_bytes());
        out.extend_from_slice(&index);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Open a blob and read its index.
    pub async fn open(path: &Path) -> Result<Self, HistogramError> {
        let reader = LocalFileReader::open(path)
            .await
            .map_err(|e| HistogramError::Io(e.to_string()))?;
        let corrupt = |reason: String| HistogramError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let preamble = reader
            .read_exact_at(0, PREAMBLE_LEN as usize)
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        if &preamble[..8] != BLOB_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let index_len = read_u64_le(&preamble[8..16]);
        if PREAMBLE_LEN.saturating_add(index_len) > reader.size() {
            return Err(corrupt(format!("index of {index_len} bytes exceeds the file")));
        }

        let raw_index = reader
            .read_exact_at(PREAMBLE_LEN, index_len as usize)
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        let index: BlobIndex =
            serde_json::from_slice(&raw_index).map_err(|e| corrupt(e.to_string()))?;

        if index.significant_bits == 0 || index.significant_bits > MAX_SIGNIFICANT_BITS {
            return Err(corrupt(format!(
                "{} significant bits",
                index.significant_bits
            )));
        }
        let n_values = 1usize << index.significant_bits;
        if let Some((key, entry)) = index.entries.iter().find(|(_, e)| e.n_bins != n_values) {
            return Err(corrupt(format!(
                "{key}: {} bins, expected {n_values}",
                entry.n_bins
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            index,
            payload_start: PREAMBLE_LEN + index_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> HistogramMode {
        self.index.mode
    }

    pub fn significant_bits(&self) -> u8 {
        self.index.significant_bits
    }

    pub fn shape(&self) -> HistogramShape {
        self.index.shape
    }

    /// Number of raw bins per scope.
    pub fn n_values(&self) -> usize {
        1usize << self.index.significant_bits
    }

    /// Scopes physically present in the blob.
    pub fn stored_scopes(&self) -> Vec<HistogramScope> {
        self.index
            .entries
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect()
    }

    /// The stored scope answering for `scope`, after fallback.
    pub fn resolve(&self, scope: HistogramScope) -> Result<HistogramScope, HistogramError> {
        self.resolve_entry(scope).map(|(resolved, _)| resolved)
    }

    fn resolve_entry(
        &self,
        scope: HistogramScope,
    ) -> Result<(HistogramScope, &EntryIndex), HistogramError> {
        if !self.index.shape.contains(scope) {
            return Err(HistogramError::UnknownScope(scope.to_string()));
        }

        let mut current = Some(scope);
        while let Some(candidate) = current {
            if let Some(entry) = self.index.entries.get(&candidate.to_string()) {
                return Ok((candidate, entry));
            }
            current = candidate.broader();
        }
        Err(HistogramError::UnknownScope(scope.to_string()))
    }

    /// Read the histogram of `scope`.
    pub async fn get(&self, scope: HistogramScope) -> Result<ScopeHistogram, HistogramError> {
        let (_, entry) = self.resolve_entry(scope)?;
        let bins = self
            .read_bins(entry)
            .await
            .map_err(|e| HistogramError::Corrupt {
                path: self.path.clone(),
                reason: format!("{scope}: {e}"),
            })?;

        let range = (0, self.n_values() as u64 - 1);
        if entry.last_bin >= bins.len().max(1) || entry.first_bin > entry.last_bin {
            return Err(HistogramError::Corrupt {
                path: self.path.clone(),
                reason: format!("{scope}: bounds out of range"),
            });
        }
        Ok(ScopeHistogram {
            bins,
            first_bin: entry.first_bin,
            last_bin: entry.last_bin,
            range,
        })
    }

    async fn read_bins(&self, entry: &EntryIndex) -> Result<Vec<u64>, IoError> {
        let out_of_bounds = || IoError::RangeOutOfBounds {
            offset: entry.offset,
            requested: entry.n_bins as u64,
            size: self.reader.size(),
        };
        let start = self
            .payload_start
            .checked_add(entry.offset)
            .ok_or_else(out_of_bounds)?;
        let len = entry.n_bins.checked_mul(8).ok_or_else(out_of_bounds)?;
        let bytes = self.reader.read_exact_at(start, len).await?;
        Ok(bytes.chunks_exact(8).map(read_u64_le).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scopes(entries: &[(HistogramScope, Vec<u64>)]) -> BTreeMap<HistogramScope, ScopeHistogram> {
        entries
            .iter()
            .map(|(scope, bins)| (*scope, ScopeHistogram::new(bins.clone(), 2)))
            .collect()
    }

    async fn written(dir: &TempDir, shape: HistogramShape, map: &BTreeMap<HistogramScope, ScopeHistogram>) -> HistogramBlob {
        let path = dir.path().join("histogram");
        let bytes = HistogramBlob::encode(HistogramMode::Fast, 2, shape, map).unwrap();
        std::fs::write(&path, bytes).unwrap();
        HistogramBlob::open(&path).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_by_key() {
        let dir = TempDir::new().unwrap();
        let shape = HistogramShape { n_channels: 2, depth: 1, duration: 1 };
        let map = scopes(&[
            (HistogramScope::Image, vec![1, 2, 3, 0]),
            (HistogramScope::Channel(0), vec![1, 2, 0, 0]),
            (HistogramScope::Channel(1), vec![0, 0, 3, 0]),
        ]);
        let blob = written(&dir, shape, &map).await;

        assert_eq!(blob.mode(), HistogramMode::Fast);
        assert_eq!(blob.n_values(), 4);
        assert_eq!(blob.stored_scopes().len(), 3);

        let c1 = blob.get(HistogramScope::Channel(1)).await.unwrap();
        assert_eq!(c1.bins, vec![0, 0, 3, 0]);
        assert_eq!(c1.bounds(), (2, 2));
        assert_eq!(c1.range, (0, 3));
    }

    #[tokio::test]
    async fn test_fallback_to_broader_scope() {
        let dir = TempDir::new().unwrap();
        let shape = HistogramShape { n_channels: 1, depth: 1, duration: 1 };
        let map = scopes(&[(HistogramScope::Image, vec![0, 5, 5, 0])]);
        let blob = written(&dir, shape, &map).await;

        let plane = HistogramScope::Plane { c: 0, z: 0, t: 0 };
        assert_eq!(blob.resolve(plane).unwrap(), HistogramScope::Image);
        assert_eq!(blob.get(plane).await.unwrap().bins, vec![0, 5, 5, 0]);

        assert!(matches!(
            blob.get(HistogramScope::Channel(1)).await,
            Err(HistogramError::UnknownScope(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_implausible_index() {
        let dir = TempDir::new().unwrap();
        let shape = HistogramShape { n_channels: 1, depth: 1, duration: 1 };
        let map = scopes(&[(HistogramScope::Image, vec![0, 5, 5, 0])]);
        let path = dir.path().join("histogram");

        // Bit depths that would overflow the bin count
        for bits in [0, 17, 64, 255] {
            let bytes = HistogramBlob::encode(HistogramMode::Fast, bits, shape, &map).unwrap();
            std::fs::write(&path, bytes).unwrap();
            assert!(
                matches!(
                    HistogramBlob::open(&path).await,
                    Err(HistogramError::Corrupt { .. })
                ),
                "{bits} bits accepted"
            );
        }

        // Entries must hold exactly 2^bits bins
        let bytes = HistogramBlob::encode(HistogramMode::Fast, 3, shape, &map).unwrap();
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            HistogramBlob::open(&path).await,
            Err(HistogramError::Corrupt { reason, .. }) if reason.contains("expected 8")
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let shape = HistogramShape { n_channels: 1, depth: 1, duration: 1 };
        let map = scopes(&[(HistogramScope::Image, vec![0, 5, 5, 0])]);
        let path = dir.path().join("histogram");
        let bytes = HistogramBlob::encode(HistogramMode::Fast, 2, shape, &map).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

        let blob = HistogramBlob::open(&path).await.unwrap();
        assert!(matches!(
            blob.get(HistogramScope::Image).await,
            Err(HistogramError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("histogram");
        std::fs::write(&path, b"this is not a histogram blob").unwrap();

        assert!(matches!(
            HistogramBlob::open(&path).await,
            Err(HistogramError::Corrupt { .. })
        ));
    }
}
