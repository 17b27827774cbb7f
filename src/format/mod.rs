//! Format plugin contract and concrete formats.
//!
//! A [`FormatPlugin`] recognises files of one format; probing a file yields
//! an [`ImageFormat`], the opened view the rest of the crate works with.
//!
//! ```text
//! FormatRegistry::identify(path)
//!     │
//!     ├─ signature_matches(first 262 bytes)   cheap, per plugin
//!     └─ probe(path) -> Box<dyn ImageFormat>  full parse, first success wins
//! ```
//!
//! # Supported formats
//!
//! | Identifier | Spatial | Conversion            |
//! |------------|---------|-----------------------|
//! | `SVS`      | yes     | none                  |
//! | `PYRTIFF`  | yes     | none                  |
//! | `PNG`      | small   | `PYRTIFF` when large  |
//! | `JPEG`     | small   | `PYRTIFF` when large  |
//! | `BMP`      | small   | `PYRTIFF` when large  |
//! | `PPM`      | small   | `PYRTIFF` when large  |

use std::path::Path;

use async_trait::async_trait;

use crate::error::FormatError;
use crate::pyramid::{Pyramid, DEFAULT_MIN_TIER_DIM, DEFAULT_TILE_SIZE};

pub mod jpeg;
pub mod metadata;
pub mod pixels;
pub mod pyrtiff;
pub mod raster;
pub mod registry;
pub mod svs;
pub mod tiff;

pub use metadata::{
    AssociatedImage, FullMetadata, ImageChannel, MainMetadata, MetadataStore, MetadataValue,
    Microscope, Objective, PixelType,
};
pub use pixels::Raster;
pub use pyrtiff::{PyramidalTiffImage, PyramidalTiffPlugin};
pub use raster::{RasterImage, RasterKind, RasterPlugin};
pub use registry::FormatRegistry;
pub use svs::{SvsImage, SvsMetadata, SvsPlugin};

// =============================================================================
// Conversion options
// =============================================================================

/// Shape of the pyramidal file written by a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionOptions {
    pub tile_size: u32,
    pub min_tier_dim: u32,

    /// JPEG quality of converted 8-bit gray or RGB tiles; raw tiles when unset
    pub jpeg_quality: Option<u8>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            min_tier_dim: DEFAULT_MIN_TIER_DIM,
            jpeg_quality: None,
        }
    }
}

// =============================================================================
// Plugin traits
// =============================================================================

/// A registered format: identification and opening.
#[async_trait]
pub trait FormatPlugin: Send + Sync {
    /// Short upper-case identifier used in role file names (`original.SVS`).
    fn identifier(&self) -> &'static str;

    /// Human readable name.
    fn name(&self) -> &'static str;

    /// Whether files of this format may serve tiled reads as they are.
    fn is_spatial(&self) -> bool;

    /// Cheap check over the leading bytes of a file.
    ///
    /// `signature` holds up to [`SIGNATURE_LEN`](crate::io::SIGNATURE_LEN)
    /// bytes; shorter files give shorter slices.
    fn signature_matches(&self, signature: &[u8]) -> bool;

    /// Parse enough of `path` to confirm the format and open it.
    ///
    /// Probing reads the file but never modifies it.
    async fn probe(&self, path: &Path) -> Result<Box<dyn ImageFormat>, FormatError>;
}

/// An opened file of a known format.
///
/// Metadata accessors are independent of each other so that the integrity
/// check can report every failing attribute, not only the first one.
#[async_trait]
pub trait ImageFormat: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn path(&self) -> &Path;

    /// Whether this file serves tiled reads without conversion.
    fn is_spatial(&self) -> bool;

    /// Whether the file must be converted before it can serve tiles.
    fn need_conversion(&self) -> bool {
        false
    }

    /// Identifier of the format produced by [`convert`](Self::convert).
    fn conversion_format(&self) -> Option<&'static str> {
        None
    }

    /// Write the converted representation to `target`.
    ///
    /// Returns `Ok(false)` when the converter ran but produced nothing usable.
    async fn convert(
        &self,
        _target: &Path,
        _options: &ConversionOptions,
    ) -> Result<bool, FormatError> {
        Err(FormatError::Conversion(format!(
            "{} files are not convertible",
            self.identifier()
        )))
    }

    async fn main_metadata(&self) -> Result<MainMetadata, FormatError>;

    async fn full_metadata(&self) -> Result<FullMetadata, FormatError>;

    async fn raw_metadata(&self) -> Result<MetadataStore, FormatError>;

    /// Tiers stored in the file, if the format has any.
    async fn native_pyramid(&self) -> Result<Option<Pyramid>, FormatError> {
        Ok(None)
    }

    /// Decode plane (`z`, `t`) with its longest side at most `max_length`.
    async fn read_thumbnail(&self, max_length: u32, z: u32, t: u32) -> Result<Raster, FormatError>;
}

/// Reject planes other than (0, 0) for single-plane formats.
pub(crate) fn check_single_plane(z: u32, t: u32) -> Result<(), FormatError> {
    if z != 0 || t != 0 {
        return Err(FormatError::UnsupportedFormat {
            reason: format!("plane z={z} t={t} requested from a single-plane image"),
        });
    }
    Ok(())
}
