//! Single-resolution raster formats decoded with the `image` crate.
//!
//! PNG, JPEG, BMP and PPM files hold one plane without tiles. Small files
//! are spatial as they are, with a single tier; anything reaching 1024 pixels
//! on a side is converted to a pyramidal TIFF before tiles are requested
//! from it.
//!
//! Probing only decodes the header. Pixel data is decoded on demand, so a
//! truncated file is recognised here and fails later, when its pixels are
//! first needed.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{ImageDecoder, ImageReader};
use tracing::debug;

use crate::error::FormatError;
use crate::pyramid::Pyramid;

use super::metadata::{FullMetadata, MainMetadata, MetadataStore, MetadataValue};
use super::pixels::Raster;
use super::pyrtiff::PYRTIFF_IDENTIFIER;
use super::tiff::{write_pyramidal_tiff_with, TileEncoding};
use super::{check_single_plane, ConversionOptions, FormatPlugin, ImageFormat};

/// Images reaching this length on either side are converted.
pub const CONVERSION_THRESHOLD: u32 = 1024;

const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];
const BMP_SIGNATURE: &[u8] = b"BM";

// =============================================================================
// Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterKind {
    Png,
    Jpeg,
    Bmp,
    Ppm,
}

impl RasterKind {
    pub const ALL: [RasterKind; 4] = [
        RasterKind::Png,
        RasterKind::Jpeg,
        RasterKind::Bmp,
        RasterKind::Ppm,
    ];

    pub const fn identifier(self) -> &'static str {
        match self {
            RasterKind::Png => "PNG",
            RasterKind::Jpeg => "JPEG",
            RasterKind::Bmp => "BMP",
            RasterKind::Ppm => "PPM",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RasterKind::Png => "Portable Network Graphics",
            RasterKind::Jpeg => "JPEG",
            RasterKind::Bmp => "Windows Bitmap",
            RasterKind::Ppm => "Portable Pixmap",
        }
    }

    fn image_format(self) -> image::ImageFormat {
        match self {
            RasterKind::Png => image::ImageFormat::Png,
            RasterKind::Jpeg => image::ImageFormat::Jpeg,
            RasterKind::Bmp => image::ImageFormat::Bmp,
            RasterKind::Ppm => image::ImageFormat::Pnm,
        }
    }

    pub fn signature_matches(self, signature: &[u8]) -> bool {
        match self {
            RasterKind::Png => signature.starts_with(PNG_SIGNATURE),
            RasterKind::Jpeg => signature.starts_with(JPEG_SIGNATURE),
            RasterKind::Bmp => signature.starts_with(BMP_SIGNATURE),
            RasterKind::Ppm => signature.starts_with(b"P3") || signature.starts_with(b"P6"),
        }
    }
}

// =============================================================================
// Plugin
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RasterPlugin {
    kind: RasterKind,
}

impl RasterPlugin {
    pub const fn new(kind: RasterKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl FormatPlugin for RasterPlugin {
    fn identifier(&self) -> &'static str {
        self.kind.identifier()
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn is_spatial(&self) -> bool {
        true
    }

    fn signature_matches(&self, signature: &[u8]) -> bool {
        self.kind.signature_matches(signature)
    }

    async fn probe(&self, path: &Path) -> Result<Box<dyn ImageFormat>, FormatError> {
        let kind = self.kind;
        let owned = path.to_path_buf();
        let header = tokio::task::spawn_blocking(move || read_header(&owned, kind))
            .await
            .map_err(|e| FormatError::Decode(format!("header task failed: {e}")))??;

        Ok(Box::new(RasterImage {
            kind,
            path: path.to_path_buf(),
            header,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RasterHeader {
    width: u32,
    height: u32,
    channels: usize,
    bits: u8,
}

fn open_reader(path: &Path, kind: RasterKind) -> Result<ImageReader<BufReader<File>>, FormatError> {
    let file = File::open(path).map_err(|e| FormatError::Decode(format!("{}: {e}", path.display())))?;
    Ok(ImageReader::with_format(BufReader::new(file), kind.image_format()))
}

fn read_header(path: &Path, kind: RasterKind) -> Result<RasterHeader, FormatError> {
    let decoder = open_reader(path, kind)?
        .into_decoder()
        .map_err(|e| FormatError::UnsupportedFormat {
            reason: format!("{} header: {e}", kind.identifier()),
        })?;

    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let channels = color.channel_count() as usize;
    let bits = (color.bits_per_pixel() / color.channel_count().max(1) as u16) as u8;

    if width == 0 || height == 0 {
        return Err(FormatError::UnsupportedFormat {
            reason: "empty image".to_string(),
        });
    }
    Ok(RasterHeader {
        width,
        height,
        channels,
        bits,
    })
}

fn decode(path: &Path, kind: RasterKind) -> Result<Raster, FormatError> {
    let image = open_reader(path, kind)?
        .decode()
        .map_err(|e| FormatError::Decode(format!("{}: {e}", path.display())))?;
    Ok(Raster::from_dynamic(image))
}

// =============================================================================
// Opened file
// =============================================================================

pub struct RasterImage {
    kind: RasterKind,
    path: PathBuf,
    header: RasterHeader,
}

impl RasterImage {
    pub fn kind(&self) -> RasterKind {
        self.kind
    }

    /// Decode every pixel on the blocking pool.
    pub async fn decode(&self) -> Result<Raster, FormatError> {
        let (path, kind) = (self.path.clone(), self.kind);
        tokio::task::spawn_blocking(move || decode(&path, kind))
            .await
            .map_err(|e| FormatError::Decode(format!("decode task failed: {e}")))?
    }
}

#[async_trait]
impl ImageFormat for RasterImage {
    fn identifier(&self) -> &'static str {
        self.kind.identifier()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_spatial(&self) -> bool {
        !self.need_conversion()
    }

    fn need_conversion(&self) -> bool {
        !(self.header.width < CONVERSION_THRESHOLD && self.header.height < CONVERSION_THRESHOLD)
    }

    fn conversion_format(&self) -> Option<&'static str> {
        Some(PYRTIFF_IDENTIFIER)
    }

    async fn convert(&self, target: &Path, options: &ConversionOptions) -> Result<bool, FormatError> {
        let raster = self.decode().await?;
        let pyramid = Pyramid::synthesize_normalized(
            raster.width,
            raster.height,
            options.min_tier_dim,
            options.tile_size,
        );
        debug!(
            source = %self.path.display(),
            target = %target.display(),
            tiers = pyramid.n_levels(),
            "writing pyramidal TIFF"
        );

        // JPEG only fits 8-bit gray or RGB; anything else stays raw
        let encoding = match options.jpeg_quality {
            Some(quality) if raster.bits == 8 && matches!(raster.channels, 1 | 3) => {
                TileEncoding::Jpeg { quality }
            }
            _ => TileEncoding::Raw,
        };
        let description = format!("converted from {}", self.kind.identifier());
        let owned = target.to_path_buf();
        tokio::task::spawn_blocking(move || {
            write_pyramidal_tiff_with(&owned, &raster, &pyramid, Some(&description), encoding)
        })
        .await
        .map_err(|e| FormatError::Conversion(format!("writer task failed: {e}")))?
        .map_err(|e| FormatError::Conversion(e.to_string()))?;

        Ok(tokio::fs::try_exists(target).await.unwrap_or(false))
    }

    async fn main_metadata(&self) -> Result<MainMetadata, FormatError> {
        let h = self.header;
        MainMetadata::interleaved(h.width, h.height, h.channels, h.bits).ok_or_else(|| {
            FormatError::UnsupportedFormat {
                reason: format!("{} bits per sample", h.bits),
            }
        })
    }

    async fn full_metadata(&self) -> Result<FullMetadata, FormatError> {
        Ok(FullMetadata::default())
    }

    async fn raw_metadata(&self) -> Result<MetadataStore, FormatError> {
        let namespace = self.kind.identifier();
        let mut store = MetadataStore::new();
        store.set(namespace, "Width", MetadataValue::Integer(self.header.width as i64));
        store.set(namespace, "Height", MetadataValue::Integer(self.header.height as i64));
        store.set(namespace, "Channels", MetadataValue::Integer(self.header.channels as i64));
        store.set(namespace, "BitsPerSample", MetadataValue::Integer(self.header.bits as i64));
        Ok(store)
    }

    async fn read_thumbnail(&self, max_length: u32, z: u32, t: u32) -> Result<Raster, FormatError> {
        check_single_plane(z, t)?;
        Ok(self.decode().await?.downscale_to_fit(max_length))
    }
}
