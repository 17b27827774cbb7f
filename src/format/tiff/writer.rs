//! Tiled pyramidal TIFF writer.
//!
//! Produces a classic little-endian TIFF with one IFD per pyramid tier,
//! chunky tiles and the tags the reader in this module needs. Tiles are
//! stored raw or as abbreviated JPEG streams whose tables live once per tier
//! in `JPEGTables`, the layout Aperio scanners write.
//!
//! ```text
//! header | tier 0 tiles | tier 0 arrays | IFD 0 | tier 1 tiles | ... | IFD n
//!            ^ IFD 0 next-offset is patched once IFD 1 is placed
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::TiffError;
use crate::format::jpeg::split_jpeg_tables;
use crate::format::pixels::Raster;
use crate::pyramid::Pyramid;

use super::tags::{Compression, FieldType, TiffTag};

const SOFTWARE: &str = concat!("wsi-ingest ", env!("CARGO_PKG_VERSION"));

/// Extra sample meaning "unassociated alpha"
const EXTRA_SAMPLE_ALPHA: u16 = 2;

/// How tile pixels are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileEncoding {
    #[default]
    Raw,
    /// Baseline JPEG at `quality` (1-100); 8-bit gray or RGB only
    Jpeg { quality: u8 },
}

impl TileEncoding {
    fn compression(self) -> Compression {
        match self {
            TileEncoding::Raw => Compression::None,
            TileEncoding::Jpeg { .. } => Compression::Jpeg,
        }
    }
}

struct Entry {
    tag: TiffTag,
    field_type: FieldType,
    count: u32,
    data: Vec<u8>,
}

impl Entry {
    fn shorts(tag: TiffTag, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: FieldType::Short,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn longs(tag: TiffTag, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: FieldType::Long,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn undefined(tag: TiffTag, data: Vec<u8>) -> Self {
        Self {
            tag,
            field_type: FieldType::Undefined,
            count: data.len() as u32,
            data,
        }
    }

    fn ascii(tag: TiffTag, value: &str) -> Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            field_type: FieldType::Ascii,
            count: data.len() as u32,
            data,
        }
    }
}

/// Write `base` and the reduced tiers of `pyramid` to `path`, uncompressed.
///
/// Every tier after the first must be reachable from the previous one by
/// repeated halving, which holds for normalized pyramids.
pub fn write_pyramidal_tiff(
    path: &Path,
    base: &Raster,
    pyramid: &Pyramid,
    description: Option<&str>,
) -> Result<(), TiffError> {
    write_pyramidal_tiff_with(path, base, pyramid, description, TileEncoding::Raw)
}

pub fn write_pyramidal_tiff_with(
    path: &Path,
    base: &Raster,
    pyramid: &Pyramid,
    description: Option<&str>,
    encoding: TileEncoding,
) -> Result<(), TiffError> {
    let file = File::create(path).map_err(write_error)?;
    let mut out = BufWriter::new(file);
    write_tiff(&mut out, base, pyramid, description, encoding)?;
    out.flush().map_err(write_error)?;
    out.get_ref().sync_all().map_err(write_error)
}

/// Serialize into any seekable sink.
pub fn write_tiff<W: Write + Seek>(
    out: &mut W,
    base: &Raster,
    pyramid: &Pyramid,
    description: Option<&str>,
    encoding: TileEncoding,
) -> Result<(), TiffError> {
    if base.bits != 8 && base.bits != 16 {
        return Err(TiffError::Write(format!("unsupported bit depth {}", base.bits)));
    }
    if let TileEncoding::Jpeg { quality } = encoding {
        if base.bits != 8 || !matches!(base.channels, 1 | 3) {
            return Err(TiffError::Write(format!(
                "JPEG tiles need 8-bit gray or RGB, got {} channel(s) of {} bits",
                base.channels, base.bits
            )));
        }
        if !(1..=100).contains(&quality) {
            return Err(TiffError::Write(format!("JPEG quality {quality} outside 1-100")));
        }
    }
    if pyramid.base().map(|t| (t.width, t.height)) != Some((base.width, base.height)) {
        return Err(TiffError::Write(
            "pyramid base does not match the raster dimensions".to_string(),
        ));
    }

    out.write_all(&[0x49, 0x49, 0x2A, 0x00, 0, 0, 0, 0])
        .map_err(write_error)?;
    let mut pos: u64 = 8;
    let mut next_pointer_at: u64 = 4;

    let mut current = base.clone();
    for (level, tier) in pyramid.iter().enumerate() {
        while current.width > tier.width && current.height > tier.height {
            current = current.halve();
        }
        if (current.width, current.height) != (tier.width, tier.height) {
            return Err(TiffError::Write(format!(
                "tier {level} ({}x{}) is not a halving of the previous tier",
                tier.width, tier.height
            )));
        }

        let written = write_tiles(
            out,
            &mut pos,
            &current,
            tier.tile_width,
            tier.tile_height,
            encoding,
        )?;

        let mut entries = level_entries(
            &current,
            tier.tile_width,
            tier.tile_height,
            level > 0,
            encoding.compression(),
        );
        entries.push(Entry::longs(TiffTag::TileOffsets, &written.offsets));
        entries.push(Entry::longs(TiffTag::TileByteCounts, &written.counts));
        if let Some(tables) = written.jpeg_tables {
            entries.push(Entry::undefined(TiffTag::JpegTables, tables));
        }
        if level == 0 {
            if let Some(text) = description {
                entries.push(Entry::ascii(TiffTag::ImageDescription, text));
            }
        }
        entries.sort_by_key(|e| e.tag.as_u16());

        let ifd_offset = write_ifd(out, &mut pos, &entries)?;

        out.seek(SeekFrom::Start(next_pointer_at)).map_err(write_error)?;
        out.write_all(&to_u32(ifd_offset)?.to_le_bytes())
            .map_err(write_error)?;
        out.seek(SeekFrom::Start(pos)).map_err(write_error)?;
        next_pointer_at = ifd_offset + 2 + 12 * entries.len() as u64;
    }
    Ok(())
}

fn level_entries(
    raster: &Raster,
    tile_width: u32,
    tile_height: u32,
    reduced: bool,
    compression: Compression,
) -> Vec<Entry> {
    let spp = raster.channels as u16;
    let photometric = if spp >= 3 { 2 } else { 1 };

    let mut entries = vec![
        Entry::longs(TiffTag::NewSubfileType, &[u32::from(reduced)]),
        Entry::longs(TiffTag::ImageWidth, &[raster.width]),
        Entry::longs(TiffTag::ImageLength, &[raster.height]),
        Entry::shorts(TiffTag::BitsPerSample, &vec![raster.bits as u16; spp as usize]),
        Entry::shorts(TiffTag::Compression, &[compression as u16]),
        Entry::shorts(TiffTag::PhotometricInterpretation, &[photometric]),
        Entry::shorts(TiffTag::SamplesPerPixel, &[spp]),
        Entry::shorts(TiffTag::PlanarConfiguration, &[1]),
        Entry::ascii(TiffTag::Software, SOFTWARE),
        Entry::longs(TiffTag::TileWidth, &[tile_width]),
        Entry::longs(TiffTag::TileLength, &[tile_height]),
        Entry::shorts(TiffTag::SampleFormat, &vec![1; spp as usize]),
    ];
    if spp == 2 || spp == 4 {
        entries.push(Entry::shorts(TiffTag::ExtraSamples, &[EXTRA_SAMPLE_ALPHA]));
    }
    entries
}

struct WrittenTiles {
    offsets: Vec<u32>,
    counts: Vec<u32>,
    jpeg_tables: Option<Vec<u8>>,
}

fn write_tiles<W: Write>(
    out: &mut W,
    pos: &mut u64,
    raster: &Raster,
    tile_width: u32,
    tile_height: u32,
    encoding: TileEncoding,
) -> Result<WrittenTiles, TiffError> {
    let tiles_x = raster.width.div_ceil(tile_width);
    let tiles_y = raster.height.div_ceil(tile_height);
    let mut written = WrittenTiles {
        offsets: Vec::with_capacity((tiles_x * tiles_y) as usize),
        counts: Vec::with_capacity((tiles_x * tiles_y) as usize),
        jpeg_tables: None,
    };

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let samples = raster.tile_samples(tx * tile_width, ty * tile_height, tile_width, tile_height);
            let bytes: Vec<u8> = match encoding {
                TileEncoding::Raw if raster.bits == 16 => {
                    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
                }
                TileEncoding::Raw => samples.iter().map(|&s| s as u8).collect(),
                TileEncoding::Jpeg { quality } => {
                    let stream =
                        encode_jpeg_tile(&samples, raster.channels, tile_width, tile_height, quality)?;
                    abbreviate(stream, &mut written.jpeg_tables)
                }
            };

            written.offsets.push(to_u32(*pos)?);
            written.counts.push(bytes.len() as u32);
            out.write_all(&bytes).map_err(write_error)?;
            *pos += bytes.len() as u64;
        }
    }
    Ok(written)
}

fn encode_jpeg_tile(
    samples: &[u16],
    channels: usize,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, TiffError> {
    let color = if channels == 1 {
        ExtendedColorType::L8
    } else {
        ExtendedColorType::Rgb8
    };
    let pixels: Vec<u8> = samples.iter().map(|&s| s as u8).collect();
    let mut stream = Vec::new();
    JpegEncoder::new_with_quality(&mut stream, quality)
        .encode(&pixels, width, height, color)
        .map_err(|e| TiffError::Write(format!("JPEG tile: {e}")))?;
    Ok(stream)
}

/// Strip the tables shared by the tier from a tile stream.
///
/// The first tile fixes the tier's tables; a tile whose tables differ keeps
/// its complete stream, which readers decode as is.
fn abbreviate(stream: Vec<u8>, shared: &mut Option<Vec<u8>>) -> Vec<u8> {
    let Some((tables, tile)) = split_jpeg_tables(&stream) else {
        return stream;
    };
    match shared {
        Some(existing) if existing[..] != tables[..] => stream,
        Some(_) => tile.to_vec(),
        None => {
            *shared = Some(tables.to_vec());
            tile.to_vec()
        }
    }
}

/// Write out-of-line values then the directory itself. Returns the IFD offset.
fn write_ifd<W: Write>(out: &mut W, pos: &mut u64, entries: &[Entry]) -> Result<u64, TiffError> {
    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            fields.push(inline);
        } else {
            align_word(out, pos)?;
            fields.push(to_u32(*pos)?.to_le_bytes());
            out.write_all(&entry.data).map_err(write_error)?;
            *pos += entry.data.len() as u64;
        }
    }

    align_word(out, pos)?;
    let ifd_offset = *pos;

    let mut ifd = Vec::with_capacity(2 + 12 * entries.len() + 4);
    ifd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (entry, field) in entries.iter().zip(&fields) {
        ifd.extend_from_slice(&entry.tag.as_u16().to_le_bytes());
        ifd.extend_from_slice(&(entry.field_type as u16).to_le_bytes());
        ifd.extend_from_slice(&entry.count.to_le_bytes());
        ifd.extend_from_slice(field);
    }
    ifd.extend_from_slice(&[0, 0, 0, 0]);

    out.write_all(&ifd).map_err(write_error)?;
    *pos += ifd.len() as u64;
    Ok(ifd_offset)
}

fn align_word<W: Write>(out: &mut W, pos: &mut u64) -> Result<(), TiffError> {
    if *pos % 2 == 1 {
        out.write_all(&[0]).map_err(write_error)?;
        *pos += 1;
    }
    Ok(())
}

fn to_u32(offset: u64) -> Result<u32, TiffError> {
    u32::try_from(offset)
        .map_err(|_| TiffError::Write("file exceeds the 4 GiB classic TIFF limit".to_string()))
}

fn write_error(err: std::io::Error) -> TiffError {
    TiffError::Write(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tiff::TiffPyramid;
    use crate::io::LocalFileReader;

    fn checker(width: u32, height: u32, channels: usize, bits: u8) -> Raster {
        let mut r = Raster::new(width, height, channels, bits);
        for (i, s) in r.samples.iter_mut().enumerate() {
            *s = (i % 251) as u16;
        }
        r
    }

    #[tokio::test]
    async fn test_written_file_parses_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.tif");
        let raster = checker(600, 520, 3, 8);
        let pyramid = Pyramid::synthesize_normalized(600, 520, 256, 256);

        write_pyramidal_tiff(&path, &raster, &pyramid, Some("converted")).unwrap();

        let reader = LocalFileReader::open(&path).await.unwrap();
        let parsed = TiffPyramid::parse(&reader).await.unwrap();
        let dims: Vec<(u32, u32)> = parsed.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(dims, vec![(600, 520), (300, 260), (150, 130)]);
        assert_eq!(parsed.base().samples_per_pixel, 3);
        assert_eq!(parsed.base().tile_count(), 9);

        let decoded = parsed.read_level(&reader, 0).await.unwrap();
        assert_eq!(decoded, raster);
    }

    #[tokio::test]
    async fn test_sixteen_bit_gray() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gray16.tif");
        let mut raster = Raster::new(40, 30, 1, 16);
        raster.samples.iter_mut().enumerate().for_each(|(i, s)| *s = (i * 50) as u16);
        let pyramid = Pyramid::synthesize_normalized(40, 30, 256, 256);

        write_pyramidal_tiff(&path, &raster, &pyramid, None).unwrap();

        let reader = LocalFileReader::open(&path).await.unwrap();
        let parsed = TiffPyramid::parse(&reader).await.unwrap();
        assert_eq!(parsed.levels.len(), 1);
        assert_eq!(parsed.base().bits_per_sample, 16);
        assert_eq!(parsed.read_level(&reader, 0).await.unwrap(), raster);
    }

    #[tokio::test]
    async fn test_jpeg_tiles_share_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jpeg.tif");
        let mut raster = Raster::new(600, 300, 3, 8);
        raster.samples.iter_mut().for_each(|s| *s = 120);
        let pyramid = Pyramid::synthesize_normalized(600, 300, 256, 256);

        write_pyramidal_tiff_with(&path, &raster, &pyramid, None, TileEncoding::Jpeg { quality: 90 })
            .unwrap();

        let reader = LocalFileReader::open(&path).await.unwrap();
        let parsed = TiffPyramid::parse(&reader).await.unwrap();
        assert_eq!(parsed.levels.len(), 2);
        for level in &parsed.levels {
            assert_eq!(level.compression, Compression::Jpeg as u16);
            assert!(level.jpeg_tables.is_some());
        }

        let decoded = parsed.read_level(&reader, 0).await.unwrap();
        assert_eq!((decoded.width, decoded.height, decoded.channels), (600, 300, 3));
        // Lossy, but a flat image survives almost unchanged
        assert!(decoded.samples.iter().all(|&s| s.abs_diff(120) <= 3));
    }

    #[test]
    fn test_jpeg_rejects_sixteen_bits() {
        let raster = Raster::new(40, 30, 1, 16);
        let pyramid = Pyramid::synthesize_normalized(40, 30, 256, 256);
        let mut sink = std::io::Cursor::new(Vec::new());
        assert!(matches!(
            write_tiff(&mut sink, &raster, &pyramid, None, TileEncoding::Jpeg { quality: 80 }),
            Err(TiffError::Write(_))
        ));
    }

    #[test]
    fn test_rejects_mismatched_pyramid() {
        let raster = checker(100, 100, 1, 8);
        let pyramid = Pyramid::synthesize_normalized(200, 200, 256, 256);
        let mut sink = std::io::Cursor::new(Vec::new());
        assert!(matches!(
            write_tiff(&mut sink, &raster, &pyramid, None, TileEncoding::Raw),
            Err(TiffError::Write(_))
        ));
    }
}
