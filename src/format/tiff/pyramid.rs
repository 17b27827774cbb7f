//! Classification of TIFF directories into pyramid levels and associated
//! images, and tile decoding.
//!
//! # Identification
//!
//! - Tiled IFDs are pyramid candidates. The largest one is level 0; the
//!   others are kept when strictly smaller than the previously kept level.
//! - Untiled IFDs are associated images. Their role comes from the
//!   ImageDescription (`label`, `macro`) or, for the first untiled IFD after
//!   the base, the thumbnail convention used by SVS.

use bytes::Bytes;
use tracing::debug;

use crate::error::{FormatError, TiffError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::pixels::Raster;
use crate::io::RangeReader;
use crate::pyramid::TierDescriptor;

use super::parser::{Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

/// Safety limit on the IFD chain length
const MAX_IFDS: usize = 100;

// =============================================================================
// TiffLevel
// =============================================================================

/// A tiled resolution level with its tile index loaded.
#[derive(Debug, Clone)]
pub struct TiffLevel {
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub compression: u16,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub planar_configuration: u16,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TiffLevel {
    async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
        ifd_index: usize,
    ) -> Result<Self, TiffError> {
        let order = header.byte_order;
        let values = ValueReader::new(reader, header);

        let width = ifd
            .image_width(order)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .image_height(order)
            .ok_or(TiffError::MissingTag("ImageLength"))?;
        let tile_width = ifd
            .tile_width(order)
            .ok_or(TiffError::MissingTag("TileWidth"))?;
        let tile_height = ifd
            .tile_height(order)
            .ok_or(TiffError::MissingTag("TileLength"))?;
        if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("empty level {width}x{height} with {tile_width}x{tile_height} tiles"),
            });
        }

        let compression = ifd.inline_u32(TiffTag::Compression, order).unwrap_or(1) as u16;
        let samples_per_pixel = ifd.inline_u32(TiffTag::SamplesPerPixel, order).unwrap_or(1) as u16;
        let planar_configuration =
            ifd.inline_u32(TiffTag::PlanarConfiguration, order).unwrap_or(1) as u16;
        let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => values.read_first_u64(entry).await? as u16,
            None => 1,
        };

        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::TileOffsets)
            .ok_or(TiffError::MissingTag("TileOffsets"))?;
        let counts_entry = ifd
            .get_entry_by_tag(TiffTag::TileByteCounts)
            .ok_or(TiffError::MissingTag("TileByteCounts"))?;
        let tile_offsets = values.read_u64_array(offsets_entry).await?;
        let tile_byte_counts = values.read_u64_array(counts_entry).await?;

        let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        let level = Self {
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            compression,
            samples_per_pixel,
            bits_per_sample,
            planar_configuration,
            tile_offsets,
            tile_byte_counts,
            jpeg_tables,
        };

        let expected = level.tile_count() as usize;
        if level.tile_offsets.len() < expected || level.tile_byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "expected {expected} tiles, found {} offsets and {} byte counts",
                    level.tile_offsets.len(),
                    level.tile_byte_counts.len()
                ),
            });
        }
        Ok(level)
    }

    #[inline]
    pub fn tiles_x(&self) -> u32 {
        self.width.div_ceil(self.tile_width)
    }

    #[inline]
    pub fn tiles_y(&self) -> u32 {
        self.height.div_ceil(self.tile_height)
    }

    #[inline]
    pub fn tile_count(&self) -> u32 {
        self.tiles_x() * self.tiles_y()
    }

    /// Offset and length of a tile, None when out of range.
    pub fn tile_location(&self, tile_x: u32, tile_y: u32) -> Option<(u64, u64)> {
        if tile_x >= self.tiles_x() || tile_y >= self.tiles_y() {
            return None;
        }
        let index = (tile_y * self.tiles_x() + tile_x) as usize;
        Some((
            *self.tile_offsets.get(index)?,
            *self.tile_byte_counts.get(index)?,
        ))
    }

    /// Reject layouts the tile decoder cannot handle.
    pub fn check_decodable(&self) -> Result<(), TiffError> {
        let compression = Compression::from_u16(self.compression);
        if !compression.map(|c| c.is_supported()).unwrap_or(false) {
            return Err(TiffError::UnsupportedCompression(
                compression
                    .map(|c| c.name().to_string())
                    .unwrap_or_else(|| format!("code {}", self.compression)),
            ));
        }
        if self.planar_configuration != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: "PlanarConfiguration",
                message: "only chunky (1) planar configuration is supported".to_string(),
            });
        }
        if self.bits_per_sample != 8 && self.bits_per_sample != 16 {
            return Err(TiffError::InvalidTagValue {
                tag: "BitsPerSample",
                message: format!("unsupported bit depth {}", self.bits_per_sample),
            });
        }
        Ok(())
    }

    pub fn descriptor(&self, base_width: u32) -> TierDescriptor {
        TierDescriptor {
            width: self.width,
            height: self.height,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            downsample: Some(base_width as f64 / self.width as f64),
        }
    }
}

// =============================================================================
// Associated images
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociatedKind {
    Thumbnail,
    Label,
    Macro,
}

/// An untiled IFD stored next to the pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedIfd {
    pub kind: AssociatedKind,
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// A TIFF file's directories, split into pyramid levels and associated images.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub ifds: Vec<Ifd>,

    /// Sorted by decreasing size, level 0 first
    pub levels: Vec<TiffLevel>,

    pub associated: Vec<AssociatedIfd>,
}

impl TiffPyramid {
    /// Parse the header and every IFD, then classify them.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header).await?;

        let mut levels = Vec::new();
        for (index, ifd) in ifds.iter().enumerate() {
            if ifd.is_tiled() {
                levels.push(TiffLevel::load(reader, &header, ifd, index).await?);
            }
        }
        if levels.is_empty() {
            return Err(if ifds.iter().any(|i| i.has_tag(TiffTag::StripOffsets)) {
                TiffError::StripOrganization
            } else {
                TiffError::MissingTag("TileWidth")
            });
        }
        levels.sort_by_key(|l| std::cmp::Reverse(l.width as u64 * l.height as u64));
        let levels = Self::filter_levels(levels);

        let associated = Self::classify_associated(reader, &header, &ifds, levels[0].ifd_index).await;

        debug!(
            file = reader.identifier(),
            ifds = ifds.len(),
            levels = levels.len(),
            associated = associated.len(),
            "parsed TIFF layout"
        );

        Ok(Self {
            header,
            ifds,
            levels,
            associated,
        })
    }

    async fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut seen = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if seen.contains(&offset) {
                break;
            }
            seen.push(offset);
            let ifd = Ifd::read(reader, header, offset).await?;
            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }
        Ok(ifds)
    }

    /// Keep strictly decreasing levels only.
    fn filter_levels(sorted: Vec<TiffLevel>) -> Vec<TiffLevel> {
        let mut kept: Vec<TiffLevel> = Vec::with_capacity(sorted.len());
        for level in sorted {
            match kept.last() {
                Some(last) if level.width >= last.width || level.height >= last.height => {}
                _ => kept.push(level),
            }
        }
        kept
    }

    async fn classify_associated<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifds: &[Ifd],
        base_index: usize,
    ) -> Vec<AssociatedIfd> {
        let order = header.byte_order;
        let values = ValueReader::new(reader, header);
        let mut associated = Vec::new();

        for (index, ifd) in ifds.iter().enumerate() {
            if ifd.is_tiled() {
                continue;
            }
            let (Some(width), Some(height)) = (ifd.image_width(order), ifd.image_height(order))
            else {
                continue;
            };

            let description = match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
                Some(entry) => values.read_string(entry).await.unwrap_or_default(),
                None => String::new(),
            };
            let lower = description.to_lowercase();
            let kind = if lower.contains("label") {
                AssociatedKind::Label
            } else if lower.contains("macro") {
                AssociatedKind::Macro
            } else if index == base_index + 1 {
                AssociatedKind::Thumbnail
            } else {
                continue;
            };

            associated.push(AssociatedIfd {
                kind,
                ifd_index: index,
                width,
                height,
                samples_per_pixel: ifd.inline_u32(TiffTag::SamplesPerPixel, order).unwrap_or(1)
                    as u16,
            });
        }
        associated
    }

    pub fn base(&self) -> &TiffLevel {
        &self.levels[0]
    }

    pub fn first_ifd(&self) -> &Ifd {
        &self.ifds[0]
    }

    pub fn tier_descriptors(&self) -> Vec<TierDescriptor> {
        let base_width = self.base().width;
        self.levels.iter().map(|l| l.descriptor(base_width)).collect()
    }

    pub fn associated(&self, kind: AssociatedKind) -> Option<&AssociatedIfd> {
        self.associated.iter().find(|a| a.kind == kind)
    }

    /// Index of the smallest level whose longest side still reaches
    /// `max_length`, or the largest level when none is that big.
    pub fn level_for_length(&self, max_length: u32) -> usize {
        self.levels
            .iter()
            .rposition(|l| l.width.max(l.height) >= max_length)
            .unwrap_or(0)
    }

    /// Decode every tile of a level into one raster.
    pub async fn read_level<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        level_index: usize,
    ) -> Result<Raster, FormatError> {
        let level = self
            .levels
            .get(level_index)
            .ok_or(FormatError::MissingMetadata("pyramid level"))?;
        level.check_decodable()?;

        let mut raster = Raster::new(
            level.width,
            level.height,
            level.samples_per_pixel as usize,
            level.bits_per_sample as u8,
        );

        for ty in 0..level.tiles_y() {
            for tx in 0..level.tiles_x() {
                let tile = self.read_tile(reader, level, tx, ty).await?;
                raster.blit(&tile, tx * level.tile_width, ty * level.tile_height);
            }
        }
        Ok(raster)
    }

    async fn read_tile<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        level: &TiffLevel,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Raster, FormatError> {
        let (offset, length) = level
            .tile_location(tile_x, tile_y)
            .ok_or(FormatError::MissingMetadata("tile location"))?;
        let data = reader.read_exact_at(offset, length as usize).await?;

        if level.compression == Compression::Jpeg as u16 {
            let stream = prepare_tile_jpeg(level.jpeg_tables.as_deref(), &data);
            let decoded = image::load_from_memory_with_format(&stream, image::ImageFormat::Jpeg)
                .map_err(|e| FormatError::Decode(format!("JPEG tile ({tile_x}, {tile_y}): {e}")))?;
            let mut tile = Raster::from_dynamic(decoded);
            if tile.channels != level.samples_per_pixel as usize {
                return Err(FormatError::Decode(format!(
                    "JPEG tile has {} channels, level declares {}",
                    tile.channels, level.samples_per_pixel
                )));
            }
            tile.bits = level.bits_per_sample as u8;
            return Ok(tile);
        }

        let channels = level.samples_per_pixel as usize;
        let expected = level.tile_width as usize * level.tile_height as usize * channels;
        let samples: Vec<u16> = if level.bits_per_sample == 16 {
            data.chunks_exact(2)
                .map(|b| self.header.byte_order.read_u16(b))
                .collect()
        } else {
            data.iter().map(|&b| b as u16).collect()
        };
        if samples.len() < expected {
            return Err(FormatError::Decode(format!(
                "tile ({tile_x}, {tile_y}) holds {} samples, expected {expected}",
                samples.len()
            )));
        }

        Ok(Raster {
            width: level.tile_width,
            height: level.tile_height,
            channels,
            bits: level.bits_per_sample as u8,
            samples: samples[..expected].to_vec(),
        })
    }
}
