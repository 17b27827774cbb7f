//! An opened representation with memoized attributes.
//!
//! [`Image`] wraps the [`ImageFormat`] a file was identified as. Each
//! metadata group and pyramid is computed at most once per instance, in a
//! `OnceCell`; failures are memoized as well so that repeated accesses report
//! the same error without re-parsing.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{FormatError, IntegrityError};
use crate::format::{
    AssociatedImage, ConversionOptions, FullMetadata, ImageChannel, ImageFormat, MainMetadata,
    Microscope, MetadataStore, Objective, PixelType, Raster,
};
use crate::pyramid::{Pyramid, DEFAULT_MIN_TIER_DIM, DEFAULT_TILE_SIZE};

/// An attribute evaluated by [`Image::check_integrity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityAttribute {
    Width,
    Height,
    Depth,
    Duration,
    NChannels,
    PixelType,
    PhysicalSizeX,
    PhysicalSizeY,
    PhysicalSizeZ,
    FrameRate,
    Description,
    AcquisitionDatetime,
    Channels,
    Objective,
    Microscope,
    AssociatedThumb,
    AssociatedLabel,
    AssociatedMacro,
    RawMetadata,
    Pyramid,
}

impl IntegrityAttribute {
    /// Evaluation order.
    pub const ALL: [IntegrityAttribute; 20] = [
        Self::Width,
        Self::Height,
        Self::Depth,
        Self::Duration,
        Self::NChannels,
        Self::PixelType,
        Self::PhysicalSizeX,
        Self::PhysicalSizeY,
        Self::PhysicalSizeZ,
        Self::FrameRate,
        Self::Description,
        Self::AcquisitionDatetime,
        Self::Channels,
        Self::Objective,
        Self::Microscope,
        Self::AssociatedThumb,
        Self::AssociatedLabel,
        Self::AssociatedMacro,
        Self::RawMetadata,
        Self::Pyramid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Width => "width",
            Self::Height => "height",
            Self::Depth => "depth",
            Self::Duration => "duration",
            Self::NChannels => "n_channels",
            Self::PixelType => "pixel_type",
            Self::PhysicalSizeX => "physical_size_x",
            Self::PhysicalSizeY => "physical_size_y",
            Self::PhysicalSizeZ => "physical_size_z",
            Self::FrameRate => "frame_rate",
            Self::Description => "description",
            Self::AcquisitionDatetime => "acquisition_datetime",
            Self::Channels => "channels",
            Self::Objective => "objective",
            Self::Microscope => "microscope",
            Self::AssociatedThumb => "associated_thumb",
            Self::AssociatedLabel => "associated_label",
            Self::AssociatedMacro => "associated_macro",
            Self::RawMetadata => "raw_metadata",
            Self::Pyramid => "pyramid",
        }
    }
}

impl std::fmt::Display for IntegrityAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type Memo<T> = OnceCell<Result<T, FormatError>>;

pub struct Image {
    format: Box<dyn ImageFormat>,
    min_tier_dim: u32,
    tile_size: u32,
    main: Memo<MainMetadata>,
    full: Memo<FullMetadata>,
    raw: Memo<MetadataStore>,
    pyramid: Memo<Pyramid>,
    normalized_pyramid: Memo<Pyramid>,
}

impl Image {
    pub fn new(format: Box<dyn ImageFormat>) -> Self {
        Self::with_tiling(format, DEFAULT_MIN_TIER_DIM, DEFAULT_TILE_SIZE)
    }

    /// Image whose normalized pyramid uses the given tiling.
    pub fn with_tiling(format: Box<dyn ImageFormat>, min_tier_dim: u32, tile_size: u32) -> Self {
        Self {
            format,
            min_tier_dim,
            tile_size,
            main: OnceCell::new(),
            full: OnceCell::new(),
            raw: OnceCell::new(),
            pyramid: OnceCell::new(),
            normalized_pyramid: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.format.path()
    }

    pub fn format(&self) -> &dyn ImageFormat {
        self.format.as_ref()
    }

    pub fn identifier(&self) -> &'static str {
        self.format.identifier()
    }

    pub fn is_spatial(&self) -> bool {
        self.format.is_spatial()
    }

    pub fn need_conversion(&self) -> bool {
        self.format.need_conversion()
    }

    pub fn conversion_format(&self) -> Option<&'static str> {
        self.format.conversion_format()
    }

    pub async fn convert(&self, target: &Path, options: &ConversionOptions) -> Result<bool, FormatError> {
        self.format.convert(target, options).await
    }

    // -------------------------------------------------------------------------
    // Metadata groups
    // -------------------------------------------------------------------------

    pub async fn main_metadata(&self) -> Result<&MainMetadata, FormatError> {
        self.main
            .get_or_init(|| self.format.main_metadata())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    pub async fn full_metadata(&self) -> Result<&FullMetadata, FormatError> {
        self.full
            .get_or_init(|| self.format.full_metadata())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    pub async fn raw_metadata(&self) -> Result<&MetadataStore, FormatError> {
        self.raw
            .get_or_init(|| self.format.raw_metadata())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    pub async fn width(&self) -> Result<u32, FormatError> {
        Ok(self.main_metadata().await?.width)
    }

    pub async fn height(&self) -> Result<u32, FormatError> {
        Ok(self.main_metadata().await?.height)
    }

    pub async fn depth(&self) -> Result<u32, FormatError> {
        Ok(self.main_metadata().await?.depth)
    }

    pub async fn duration(&self) -> Result<u32, FormatError> {
        Ok(self.main_metadata().await?.duration)
    }

    pub async fn n_channels(&self) -> Result<usize, FormatError> {
        Ok(self.main_metadata().await?.n_channels)
    }

    pub async fn n_pixels(&self) -> Result<u64, FormatError> {
        Ok(self.main_metadata().await?.n_pixels())
    }

    pub async fn pixel_type(&self) -> Result<PixelType, FormatError> {
        Ok(self.main_metadata().await?.pixel_type)
    }

    pub async fn significant_bits(&self) -> Result<u8, FormatError> {
        Ok(self.main_metadata().await?.significant_bits)
    }

    pub async fn channels(&self) -> Result<&[ImageChannel], FormatError> {
        Ok(&self.main_metadata().await?.channels)
    }

    pub async fn physical_size_x(&self) -> Result<Option<f64>, FormatError> {
        Ok(self.full_metadata().await?.physical_size_x)
    }

    pub async fn physical_size_y(&self) -> Result<Option<f64>, FormatError> {
        Ok(self.full_metadata().await?.physical_size_y)
    }

    pub async fn physical_size_z(&self) -> Result<Option<f64>, FormatError> {
        Ok(self.full_metadata().await?.physical_size_z)
    }

    pub async fn frame_rate(&self) -> Result<Option<f64>, FormatError> {
        Ok(self.full_metadata().await?.frame_rate)
    }

    pub async fn description(&self) -> Result<Option<&str>, FormatError> {
        Ok(self.full_metadata().await?.description.as_deref())
    }

    pub async fn acquisition_datetime(&self) -> Result<Option<NaiveDateTime>, FormatError> {
        Ok(self.full_metadata().await?.acquisition_datetime)
    }

    pub async fn objective(&self) -> Result<&Objective, FormatError> {
        Ok(&self.full_metadata().await?.objective)
    }

    pub async fn microscope(&self) -> Result<&Microscope, FormatError> {
        Ok(&self.full_metadata().await?.microscope)
    }

    pub async fn associated_thumb(&self) -> Result<Option<&AssociatedImage>, FormatError> {
        Ok(self.full_metadata().await?.associated_thumb.as_ref())
    }

    pub async fn associated_label(&self) -> Result<Option<&AssociatedImage>, FormatError> {
        Ok(self.full_metadata().await?.associated_label.as_ref())
    }

    pub async fn associated_macro(&self) -> Result<Option<&AssociatedImage>, FormatError> {
        Ok(self.full_metadata().await?.associated_macro.as_ref())
    }

    // -------------------------------------------------------------------------
    // Pyramids
    // -------------------------------------------------------------------------

    /// Tiers the file stores; a single full-resolution tier when it has none.
    pub async fn pyramid(&self) -> Result<&Pyramid, FormatError> {
        self.pyramid
            .get_or_init(|| async {
                match self.format.native_pyramid().await? {
                    Some(pyramid) if !pyramid.is_empty() => Ok(pyramid),
                    _ => {
                        let main = self.main_metadata().await?;
                        let mut single = Pyramid::new();
                        single.insert_tier(main.width, main.height, self.tile_size, self.tile_size);
                        Ok(single)
                    }
                }
            })
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Deterministic pyramid derived from the base dimensions only.
    pub async fn normalized_pyramid(&self) -> Result<&Pyramid, FormatError> {
        self.normalized_pyramid
            .get_or_init(|| async {
                let main = self.main_metadata().await?;
                Ok(Pyramid::synthesize_normalized(
                    main.width,
                    main.height,
                    self.min_tier_dim,
                    self.tile_size,
                ))
            })
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    pub async fn is_pyramid_normalized(&self) -> Result<bool, FormatError> {
        Ok(self
            .pyramid()
            .await?
            .is_normalized(self.min_tier_dim, self.tile_size))
    }

    pub async fn read_thumbnail(&self, max_length: u32, z: u32, t: u32) -> Result<Raster, FormatError> {
        self.format.read_thumbnail(max_length, z, t).await
    }

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------

    async fn evaluate(&self, attribute: IntegrityAttribute) -> Result<(), FormatError> {
        use IntegrityAttribute as A;
        match attribute {
            A::Width => self.width().await.map(drop),
            A::Height => self.height().await.map(drop),
            A::Depth => self.depth().await.map(drop),
            A::Duration => self.duration().await.map(drop),
            A::NChannels => self.n_channels().await.map(drop),
            A::PixelType => self.pixel_type().await.map(drop),
            A::PhysicalSizeX => self.physical_size_x().await.map(drop),
            A::PhysicalSizeY => self.physical_size_y().await.map(drop),
            A::PhysicalSizeZ => self.physical_size_z().await.map(drop),
            A::FrameRate => self.frame_rate().await.map(drop),
            A::Description => self.description().await.map(drop),
            A::AcquisitionDatetime => self.acquisition_datetime().await.map(drop),
            A::Channels => self.channels().await.map(drop),
            A::Objective => self.objective().await.map(drop),
            A::Microscope => self.microscope().await.map(drop),
            A::AssociatedThumb => self.associated_thumb().await.map(drop),
            A::AssociatedLabel => self.associated_label().await.map(drop),
            A::AssociatedMacro => self.associated_macro().await.map(drop),
            A::RawMetadata => self.raw_metadata().await.map(drop),
            A::Pyramid => self.pyramid().await.map(drop),
        }
    }

    /// Evaluate every integrity attribute and collect the failures.
    ///
    /// In lazy mode evaluation stops at the first failure.
    pub async fn check_integrity(&self, lazy: bool) -> Vec<IntegrityError> {
        let mut errors = Vec::new();
        for attribute in IntegrityAttribute::ALL {
            if let Err(error) = self.evaluate(attribute).await {
                errors.push(IntegrityError {
                    attribute: attribute.as_str(),
                    error,
                });
                if lazy {
                    break;
                }
            }
        }
        errors
    }

    /// Snapshot of the main attributes, for reporting.
    pub async fn summary(&self) -> Result<ImageSummary, FormatError> {
        let main = self.main_metadata().await?;
        let full = self.full_metadata().await?;
        let pyramid = self.pyramid().await?;

        Ok(ImageSummary {
            path: self.path().display().to_string(),
            format: self.identifier(),
            width: main.width,
            height: main.height,
            depth: main.depth,
            duration: main.duration,
            n_channels: main.n_channels,
            pixel_type: main.pixel_type,
            significant_bits: main.significant_bits,
            physical_size_x: full.physical_size_x,
            physical_size_y: full.physical_size_y,
            acquisition_datetime: full.acquisition_datetime,
            n_tiers: pyramid.n_levels(),
        })
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("path", &self.path())
            .field("format", &self.identifier())
            .finish()
    }
}

/// Main attributes of an imported image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSummary {
    pub path: String,
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub duration: u32,
    pub n_channels: usize,
    pub pixel_type: PixelType,
    pub significant_bits: u8,
    pub physical_size_x: Option<f64>,
    pub physical_size_y: Option<f64>,
    pub acquisition_datetime: Option<NaiveDateTime>,
    pub n_tiers: usize,
}
