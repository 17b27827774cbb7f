//! TIFF tag, field type and compression vocabulary.
//!
//! Only the identifiers the importer reads or writes are defined here; other
//! tags are carried as raw entries and ignored.

// =============================================================================
// Field Types
// =============================================================================

/// Encoding of an IFD entry's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,

    /// Two LONGs: numerator, denominator
    Rational = 5,

    Undefined = 7,

    /// BigTIFF only
    Long8 = 16,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational | FieldType::Long8 => 8,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Whether `count` values fit in the entry's value field.
    ///
    /// The field is 4 bytes wide in classic TIFF and 8 in BigTIFF.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        self.size_in_bytes() as u64 * count <= threshold
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tag IDs the importer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    /// 0 for full resolution images, bit 0 set for reduced resolution
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,

    /// Carries vendor metadata (Aperio key=value pairs)
    ImageDescription = 270,
    Make = 271,
    Model = 272,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    ResolutionUnit = 296,
    Software = 305,

    /// "YYYY:MM:DD HH:MM:SS"
    DateTime = 306,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    ExtraSamples = 338,
    SampleFormat = 339,

    /// Shared quantization and Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,
}

impl TiffTag {
    /// Returns `None` for tags outside the vocabulary.
    pub fn from_u16(value: u16) -> Option<Self> {
        let tag = match value {
            254 => TiffTag::NewSubfileType,
            256 => TiffTag::ImageWidth,
            257 => TiffTag::ImageLength,
            258 => TiffTag::BitsPerSample,
            259 => TiffTag::Compression,
            262 => TiffTag::PhotometricInterpretation,
            270 => TiffTag::ImageDescription,
            271 => TiffTag::Make,
            272 => TiffTag::Model,
            273 => TiffTag::StripOffsets,
            277 => TiffTag::SamplesPerPixel,
            278 => TiffTag::RowsPerStrip,
            279 => TiffTag::StripByteCounts,
            282 => TiffTag::XResolution,
            283 => TiffTag::YResolution,
            284 => TiffTag::PlanarConfiguration,
            296 => TiffTag::ResolutionUnit,
            305 => TiffTag::Software,
            306 => TiffTag::DateTime,
            322 => TiffTag::TileWidth,
            323 => TiffTag::TileLength,
            324 => TiffTag::TileOffsets,
            325 => TiffTag::TileByteCounts,
            338 => TiffTag::ExtraSamples,
            339 => TiffTag::SampleFormat,
            347 => TiffTag::JpegTables,
            _ => return None,
        };
        Some(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Name used in raw metadata keys and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::Make => "Make",
            TiffTag::Model => "Model",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::XResolution => "XResolution",
            TiffTag::YResolution => "YResolution",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::ResolutionUnit => "ResolutionUnit",
            TiffTag::Software => "Software",
            TiffTag::DateTime => "DateTime",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::ExtraSamples => "ExtraSamples",
            TiffTag::SampleFormat => "SampleFormat",
            TiffTag::JpegTables => "JPEGTables",
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Compression schemes found in slide files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    OldJpeg = 6,
    Jpeg = 7,
    Deflate = 8,
    AdobeDeflate = 32946,
    Jpeg2000 = 33003,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            6 => Some(Compression::OldJpeg),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            32946 => Some(Compression::AdobeDeflate),
            33003 => Some(Compression::Jpeg2000),
            _ => None,
        }
    }

    /// Tiles with this compression can be decoded for histograms.
    #[inline]
    pub const fn is_supported(self) -> bool {
        matches!(self, Compression::None | Compression::Jpeg)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::OldJpeg => "Old JPEG",
            Compression::Jpeg => "JPEG",
            Compression::Deflate => "Deflate",
            Compression::AdobeDeflate => "Adobe Deflate",
            Compression::Jpeg2000 => "JPEG 2000",
        }
    }
}
