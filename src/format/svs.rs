//! Aperio SVS format.
//!
//! SVS files are tiled pyramidal TIFFs whose base ImageDescription starts
//! with an Aperio marker and carries the scan metadata:
//!
//! ```text
//! Aperio Image Library v12.0.15
//! 46920x33600 (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.499|Date = 12/29/09|Time = 09:59:15
//! ```
//!
//! Besides the pyramid, SVS files store a thumbnail (the first untiled IFD
//! after the base), a label and a macro image. Tiles are usually JPEG
//! abbreviated streams completed by the JPEGTables tag.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::FormatError;
use crate::pyramid::Pyramid;

use super::metadata::{FullMetadata, MainMetadata, MetadataStore, MetadataValue, Objective};
use super::pixels::Raster;
use super::pyrtiff::PyramidalTiffImage;
use super::tiff::{is_tiff_header, TiffTag};
use super::{FormatPlugin, ImageFormat};

pub const SVS_IDENTIFIER: &str = "SVS";

const APERIO_MARKER: &str = "Aperio";

// =============================================================================
// SVS Metadata
// =============================================================================

/// Parsed Aperio ImageDescription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel
    pub mpp: Option<f64>,

    /// Objective magnification (e.g., 20, 40)
    pub magnification: Option<f64>,

    pub vendor: Option<String>,

    /// Combined `Date` and `Time` fields
    pub acquired: Option<NaiveDateTime>,

    pub scanner_id: Option<String>,

    /// Every `key = value` pair
    pub properties: BTreeMap<String, String>,
}

impl SvsMetadata {
    /// Parse metadata from an ImageDescription string.
    ///
    /// The first line identifies the format, subsequent parts are
    /// pipe-separated with `key = value` pairs.
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata::default();

        if description.contains(APERIO_MARKER) {
            metadata.vendor = Some(APERIO_MARKER.to_string());
        }

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            metadata
                .properties
                .insert(key.to_string(), value.to_string());

            match key {
                "MPP" => metadata.mpp = value.parse().ok(),
                "AppMag" => metadata.magnification = value.parse().ok(),
                "ScanScope ID" => metadata.scanner_id = Some(value.to_string()),
                _ => {}
            }
        }

        metadata.acquired = Self::parse_acquired(
            metadata.properties.get("Date").map(String::as_str),
            metadata.properties.get("Time").map(String::as_str),
        );
        metadata
    }

    fn parse_acquired(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
        let date = NaiveDate::parse_from_str(date?, "%m/%d/%y").ok()?;
        let time = match time.and_then(|t| NaiveTime::parse_from_str(t, "%H:%M:%S").ok()) {
            Some(time) => time,
            None => NaiveTime::from_hms_opt(0, 0, 0)?,
        };
        Some(date.and_time(time))
    }

    pub fn is_aperio(&self) -> bool {
        self.vendor.is_some()
    }
}

// =============================================================================
// Plugin
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct SvsPlugin;

#[async_trait]
impl FormatPlugin for SvsPlugin {
    fn identifier(&self) -> &'static str {
        SVS_IDENTIFIER
    }

    fn name(&self) -> &'static str {
        "Aperio SVS"
    }

    fn is_spatial(&self) -> bool {
        true
    }

    /// The Aperio marker lies past the signature window, so only the TIFF
    /// header is checked here; `probe` confirms the vendor.
    fn signature_matches(&self, signature: &[u8]) -> bool {
        is_tiff_header(signature)
    }

    async fn probe(&self, path: &Path) -> Result<Box<dyn ImageFormat>, FormatError> {
        let inner = PyramidalTiffImage::open(path, SVS_IDENTIFIER).await?;
        let description = inner
            .ascii_tag(TiffTag::ImageDescription)
            .await?
            .unwrap_or_default();

        let metadata = SvsMetadata::parse(&description);
        if !metadata.is_aperio() {
            return Err(FormatError::UnsupportedFormat {
                reason: "ImageDescription has no Aperio marker".to_string(),
            });
        }
        Ok(Box::new(SvsImage { inner, metadata }))
    }
}

// =============================================================================
// Opened file
// =============================================================================

pub struct SvsImage {
    inner: PyramidalTiffImage,
    metadata: SvsMetadata,
}

impl SvsImage {
    pub fn metadata(&self) -> &SvsMetadata {
        &self.metadata
    }
}

#[async_trait]
impl ImageFormat for SvsImage {
    fn identifier(&self) -> &'static str {
        SVS_IDENTIFIER
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn is_spatial(&self) -> bool {
        true
    }

    async fn main_metadata(&self) -> Result<MainMetadata, FormatError> {
        self.inner.main_metadata().await
    }

    async fn full_metadata(&self) -> Result<FullMetadata, FormatError> {
        let mut full = self.inner.tiff_full_metadata().await?;

        if let Some(mpp) = self.metadata.mpp {
            full.physical_size_x = Some(mpp);
            full.physical_size_y = Some(mpp);
        }
        if self.metadata.acquired.is_some() {
            full.acquisition_datetime = self.metadata.acquired;
        }
        full.objective = Objective {
            nominal_magnification: self.metadata.magnification,
            calibrated_magnification: None,
        };
        if full.microscope.model.is_none() {
            full.microscope.model = self.metadata.scanner_id.clone();
        }
        Ok(full)
    }

    async fn raw_metadata(&self) -> Result<MetadataStore, FormatError> {
        let mut store = self.inner.tiff_raw_metadata().await?;
        for (key, value) in &self.metadata.properties {
            store.set("APERIO", key, MetadataValue::parse(value));
        }
        Ok(store)
    }

    async fn native_pyramid(&self) -> Result<Option<Pyramid>, FormatError> {
        self.inner.native_pyramid().await
    }

    async fn read_thumbnail(&self, max_length: u32, z: u32, t: u32) -> Result<Raster, FormatError> {
        self.inner.read_thumbnail(max_length, z, t).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // SvsMetadata parsing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_metadata_basic() {
        let description = "Aperio Image Library v12.0.15\n46920x33600 (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.499";

        let metadata = SvsMetadata::parse(description);

        assert_eq!(metadata.vendor, Some("Aperio".to_string()));
        assert!((metadata.mpp.unwrap() - 0.499).abs() < 0.001);
        assert!((metadata.magnification.unwrap() - 20.0).abs() < 0.1);
        assert!(metadata.acquired.is_none());
    }

    #[test]
    fn test_parse_metadata_date_time() {
        let description =
            "Aperio Image Library v10.0.51\n1000x800|Date = 12/29/09|Time = 09:59:15|ScanScope ID = SS1234";

        let metadata = SvsMetadata::parse(description);

        assert_eq!(
            metadata.acquired.map(|d| d.to_string()),
            Some("2009-12-29 09:59:15".to_string())
        );
        assert_eq!(metadata.scanner_id.as_deref(), Some("SS1234"));
        assert_eq!(metadata.properties.get("Date").map(String::as_str), Some("12/29/09"));
    }

    #[test]
    fn test_parse_metadata_invalid_values() {
        let description = "Aperio Image Library|MPP = invalid|AppMag = 20|Date = someday";

        let metadata = SvsMetadata::parse(description);

        assert!(metadata.mpp.is_none());
        assert!(metadata.acquired.is_none());
        assert!((metadata.magnification.unwrap() - 20.0).abs() < 0.1);
    }

    #[test]
    fn test_parse_metadata_non_aperio() {
        let metadata = SvsMetadata::parse("Generic TIFF image\nSome other format");
        assert!(!metadata.is_aperio());
        assert!(metadata.properties.is_empty());
    }

    // -------------------------------------------------------------------------
    // Plugin tests
    // -------------------------------------------------------------------------

    async fn write_tiff(dir: &tempfile::TempDir, description: &str) -> std::path::PathBuf {
        let path = dir.path().join("slide.svs");
        let mut raster = Raster::new(640, 480, 3, 8);
        raster.samples.iter_mut().for_each(|s| *s = 128);
        let pyramid = Pyramid::synthesize_normalized(640, 480, 256, 256);
        crate::format::tiff::write_pyramidal_tiff(&path, &raster, &pyramid, Some(description))
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_probe_aperio_tiff() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tiff(
            &dir,
            "Aperio Image Library v12.0.15\n640x480|AppMag = 40|MPP = 0.25|Date = 01/02/21|Time = 03:04:05",
        )
        .await;

        let image = SvsPlugin.probe(&path).await.unwrap();
        assert_eq!(image.identifier(), "SVS");

        let full = image.full_metadata().await.unwrap();
        assert_eq!(full.physical_size_x, Some(0.25));
        assert_eq!(full.objective.nominal_magnification, Some(40.0));
        assert_eq!(
            full.acquisition_datetime.map(|d| d.to_string()),
            Some("2021-01-02 03:04:05".to_string())
        );

        let raw = image.raw_metadata().await.unwrap();
        assert_eq!(raw.get("APERIO.AppMag"), Some(&MetadataValue::Integer(40)));
        assert!(raw.get("TIFF.ImageWidth").is_some());
    }

    #[tokio::test]
    async fn test_probe_rejects_plain_tiff() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tiff(&dir, "just a tiff").await;

        assert!(matches!(
            SvsPlugin.probe(&path).await,
            Err(FormatError::UnsupportedFormat { .. })
        ));
    }
}
