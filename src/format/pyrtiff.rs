//! Tiled pyramidal TIFF.
//!
//! Any TIFF whose largest directory is tiled with JPEG or uncompressed tiles
//! qualifies. This is also the target format of raster conversions, so the
//! files produced by [`write_pyramidal_tiff`](super::tiff::write_pyramidal_tiff)
//! always probe successfully here.
//!
//! [`PyramidalTiffImage`] holds the parsed layout and the shared TIFF
//! metadata logic; the SVS plugin wraps it and adds Aperio specifics.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::FormatError;
use crate::io::{LocalFileReader, RangeReader};
use crate::pyramid::Pyramid;

use super::metadata::{
    parse_tiff_datetime, AssociatedImage, FullMetadata, MainMetadata, MetadataStore,
    MetadataValue, Microscope,
};
use super::pixels::Raster;
use super::tiff::{is_tiff_header, AssociatedKind, FieldType, Ifd, TiffPyramid, TiffTag, ValueReader};
use super::{check_single_plane, FormatPlugin, ImageFormat};

pub const PYRTIFF_IDENTIFIER: &str = "PYRTIFF";

/// ResolutionUnit values
const RESOLUTION_UNIT_INCH: u32 = 2;
const RESOLUTION_UNIT_CENTIMETER: u32 = 3;

// =============================================================================
// Plugin
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct PyramidalTiffPlugin;

#[async_trait]
impl FormatPlugin for PyramidalTiffPlugin {
    fn identifier(&self) -> &'static str {
        PYRTIFF_IDENTIFIER
    }

    fn name(&self) -> &'static str {
        "Pyramidal TIFF"
    }

    fn is_spatial(&self) -> bool {
        true
    }

    fn signature_matches(&self, signature: &[u8]) -> bool {
        is_tiff_header(signature)
    }

    async fn probe(&self, path: &Path) -> Result<Box<dyn ImageFormat>, FormatError> {
        let image = PyramidalTiffImage::open(path, PYRTIFF_IDENTIFIER).await?;
        Ok(Box::new(image))
    }
}

// =============================================================================
// Opened file
// =============================================================================

pub struct PyramidalTiffImage {
    identifier: &'static str,
    path: PathBuf,
    reader: LocalFileReader,
    layout: TiffPyramid,
}

impl PyramidalTiffImage {
    /// Parse the TIFF layout and make sure its base level is decodable.
    pub async fn open(path: &Path, identifier: &'static str) -> Result<Self, FormatError> {
        let reader = LocalFileReader::open(path).await?;
        let layout = TiffPyramid::parse(&reader).await?;
        layout.base().check_decodable()?;

        Ok(Self {
            identifier,
            path: path.to_path_buf(),
            reader,
            layout,
        })
    }

    pub fn layout(&self) -> &TiffPyramid {
        &self.layout
    }

    fn base_ifd(&self) -> &Ifd {
        &self.layout.ifds[self.layout.base().ifd_index]
    }

    /// ASCII value of a base-level tag.
    pub async fn ascii_tag(&self, tag: TiffTag) -> Result<Option<String>, FormatError> {
        let Some(entry) = self.base_ifd().get_entry_by_tag(tag) else {
            return Ok(None);
        };
        let values = ValueReader::new(&self.reader, &self.layout.header);
        let text = values.read_string(entry).await?;
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }

    async fn rational_tag(&self, tag: TiffTag) -> Result<Option<f64>, FormatError> {
        let Some(entry) = self.base_ifd().get_entry_by_tag(tag) else {
            return Ok(None);
        };
        let values = ValueReader::new(&self.reader, &self.layout.header);
        Ok(values.read_rational(entry).await?)
    }

    /// Micrometers per pixel from a resolution tag and ResolutionUnit.
    async fn physical_size(&self, tag: TiffTag) -> Result<Option<f64>, FormatError> {
        let order = self.layout.header.byte_order;
        let unit = self
            .base_ifd()
            .inline_u32(TiffTag::ResolutionUnit, order)
            .unwrap_or(RESOLUTION_UNIT_INCH);
        let microns_per_unit = match unit {
            RESOLUTION_UNIT_INCH => 25_400.0,
            RESOLUTION_UNIT_CENTIMETER => 10_000.0,
            _ => return Ok(None),
        };

        Ok(self
            .rational_tag(tag)
            .await?
            .filter(|pixels_per_unit| *pixels_per_unit > 0.0)
            .map(|pixels_per_unit| microns_per_unit / pixels_per_unit))
    }

    pub fn associated_image(&self, kind: AssociatedKind) -> Option<AssociatedImage> {
        self.layout.associated(kind).map(|a| AssociatedImage {
            width: a.width,
            height: a.height,
            n_channels: a.samples_per_pixel as usize,
        })
    }

    /// Metadata every TIFF can provide through standard tags.
    pub async fn tiff_full_metadata(&self) -> Result<FullMetadata, FormatError> {
        let acquisition_datetime = self
            .ascii_tag(TiffTag::DateTime)
            .await?
            .and_then(|value| parse_tiff_datetime(&value));

        Ok(FullMetadata {
            physical_size_x: self.physical_size(TiffTag::XResolution).await?,
            physical_size_y: self.physical_size(TiffTag::YResolution).await?,
            physical_size_z: None,
            frame_rate: None,
            description: self.ascii_tag(TiffTag::ImageDescription).await?,
            acquisition_datetime,
            objective: Default::default(),
            microscope: Microscope {
                model: self.ascii_tag(TiffTag::Model).await?,
            },
            associated_thumb: self.associated_image(AssociatedKind::Thumbnail),
            associated_label: self.associated_image(AssociatedKind::Label),
            associated_macro: self.associated_image(AssociatedKind::Macro),
        })
    }

    /// Scalar and text tags of the base level, under the `TIFF` namespace.
    pub async fn tiff_raw_metadata(&self) -> Result<MetadataStore, FormatError> {
        let values = ValueReader::new(&self.reader, &self.layout.header);
        let mut store = MetadataStore::new();

        for entry in &self.base_ifd().entries {
            let Some(tag) = entry.tag() else {
                continue;
            };
            let value = match entry.field_type {
                Some(FieldType::Ascii) => MetadataValue::Text(values.read_string(entry).await?),
                Some(FieldType::Rational) => match values.read_rational(entry).await? {
                    Some(v) => MetadataValue::Decimal(v),
                    None => continue,
                },
                Some(FieldType::Byte | FieldType::Short | FieldType::Long | FieldType::Long8)
                    if entry.count == 1 =>
                {
                    MetadataValue::Integer(values.read_first_u64(entry).await? as i64)
                }
                _ => continue,
            };
            store.set("TIFF", tag.name(), value);
        }
        Ok(store)
    }
}

#[async_trait]
impl ImageFormat for PyramidalTiffImage {
    fn identifier(&self) -> &'static str {
        self.identifier
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_spatial(&self) -> bool {
        true
    }

    async fn main_metadata(&self) -> Result<MainMetadata, FormatError> {
        let base = self.layout.base();
        MainMetadata::interleaved(
            base.width,
            base.height,
            base.samples_per_pixel as usize,
            base.bits_per_sample as u8,
        )
        .ok_or_else(|| FormatError::UnsupportedFormat {
            reason: format!("{} bits per sample", base.bits_per_sample),
        })
    }

    async fn full_metadata(&self) -> Result<FullMetadata, FormatError> {
        self.tiff_full_metadata().await
    }

    async fn raw_metadata(&self) -> Result<MetadataStore, FormatError> {
        self.tiff_raw_metadata().await
    }

    async fn native_pyramid(&self) -> Result<Option<Pyramid>, FormatError> {
        Ok(Some(Pyramid::from_native_tiers(
            &self.layout.tier_descriptors(),
        )))
    }

    async fn read_thumbnail(&self, max_length: u32, z: u32, t: u32) -> Result<Raster, FormatError> {
        check_single_plane(z, t)?;
        let level = self.layout.level_for_length(max_length);
        tracing::debug!(
            file = self.reader.identifier(),
            level,
            max_length,
            "reading thumbnail level"
        );
        let raster = self.layout.read_level(&self.reader, level).await?;
        Ok(raster.downscale_to_fit(max_length))
    }
}
