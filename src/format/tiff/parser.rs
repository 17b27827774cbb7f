//! TIFF header and IFD parsing.
//!
//! # Header layout
//! ```text
//! Classic (8 bytes)        BigTIFF (16 bytes)
//! 0-1  II or MM            0-1   II or MM
//! 2-3  42                  2-3   43
//! 4-7  first IFD offset    4-5   offset size (8)
//!                          6-7   reserved
//!                          8-15  first IFD offset
//! ```
//!
//! # IFD layout
//! ```text
//! entry count (u16 | u64)
//! entries     (12 | 20 bytes each: tag, type, count, value-or-offset)
//! next IFD    (u32 | u64, 0 terminates the chain)
//! ```

use crate::error::TiffError;
use crate::io::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};

use super::tags::{FieldType, TiffTag};

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

pub const TIFF_HEADER_SIZE: usize = 8;
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries per IFD; anything larger is treated as corruption.
const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// ByteOrder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II"
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the first bytes of a file.
    ///
    /// `bytes` should hold 16 bytes when available so BigTIFF headers parse;
    /// `file_size` bounds the first IFD offset.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// 12 bytes classic, 20 bytes BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of offsets, counts and inline value fields.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    #[inline]
    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

/// Quick signature check used before full parsing.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let byte_order = match u16::from_le_bytes([bytes[0], bytes[1]]) {
        BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
        BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
        _ => return false,
    };
    matches!(byte_order.read_u16(&bytes[2..4]), VERSION_TIFF | VERSION_BIGTIFF)
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One raw IFD entry. Values are decoded lazily by `ValueReader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,

    /// The raw value-or-offset field (4 or 8 bytes)
    pub value_offset_bytes: Vec<u8>,

    pub is_inline: bool,
}

impl IfdEntry {
    pub fn tag(&self) -> Option<TiffTag> {
        TiffTag::from_u16(self.tag_id)
    }

    /// Total size of the entry's values, None for unknown field types.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|t| t.size_in_bytes() as u64 * self.count)
    }

    /// Interpret the value field as a file offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Decode a single inline SHORT/LONG/LONG8 value.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_offset_bytes)),
            FieldType::Byte => Some(self.value_offset_bytes[0] as u64),
            _ => None,
        }
    }

    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u64(byte_order).and_then(|v| u32::try_from(v).ok())
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Read the IFD located at `offset`.
    pub async fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if offset + count_size as u64 > reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_bytes = reader.read_exact_at(offset, count_size).await?;
        let count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)
        } else {
            header.byte_order.read_u16(&count_bytes) as u64
        };
        if count == 0 || count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("implausible entry count {count} at offset {offset}"),
            });
        }

        let entry_size = header.ifd_entry_size();
        let body_len = count as usize * entry_size + header.offset_size();
        let body = reader
            .read_exact_at(offset + count_size as u64, body_len)
            .await?;

        let entries = body
            .chunks_exact(entry_size)
            .take(count as usize)
            .map(|raw| Self::parse_entry(raw, header))
            .collect();
        let next_ifd_offset = header.read_offset(&body[count as usize * entry_size..]);

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    fn parse_entry(raw: &[u8], header: &TiffHeader) -> IfdEntry {
        let byte_order = header.byte_order;
        let tag_id = byte_order.read_u16(&raw[0..2]);
        let field_type_raw = byte_order.read_u16(&raw[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_offset_bytes) = if header.is_bigtiff {
            (byte_order.read_u64(&raw[4..12]), raw[12..20].to_vec())
        } else {
            (byte_order.read_u32(&raw[4..8]) as u64, raw[8..12].to_vec())
        };

        let is_inline = field_type
            .map(|t| t.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag.as_u16())
    }

    pub fn has_tag(&self, tag: TiffTag) -> bool {
        self.get_entry_by_tag(tag).is_some()
    }

    /// Inline scalar value of a tag, if present and inline.
    pub fn inline_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::ImageWidth, byte_order)
    }

    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::ImageLength, byte_order)
    }

    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::TileWidth, byte_order)
    }

    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::TileLength, byte_order)
    }

    pub fn is_tiled(&self) -> bool {
        self.has_tag(TiffTag::TileWidth) && self.has_tag(TiffTag::TileOffsets)
    }
}

// =============================================================================
// Tests
// =============================================================================
