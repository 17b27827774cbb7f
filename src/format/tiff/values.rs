//! Decoding of IFD entry values.
//!
//! Small values live inline in the entry; anything larger sits at an offset
//! and is fetched with one range read, arrays included.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Reads tag values respecting the file's byte order and TIFF flavour.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw bytes of an entry's values, inline or fetched.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header.byte_order);
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// All values of a BYTE/SHORT/LONG/LONG8 entry widened to u64.
    ///
    /// TileOffsets and TileByteCounts go through here.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        parse_u64_array(&bytes, entry.count as usize, field_type, self.byte_order()).ok_or_else(
            || TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected an integer type, got {:?}", field_type),
            },
        )
    }

    /// First value of an integer entry (BitsPerSample repeats per sample).
    pub async fn read_first_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.byte_order()) {
            return Ok(value);
        }
        self.read_u64_array(entry)
            .await?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "empty value".to_string(),
            })
    }

    /// NUL-terminated ASCII value.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected Ascii, got type {}", entry.field_type_raw),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// First RATIONAL value as a float. None on a zero denominator.
    pub async fn read_rational(&self, entry: &IfdEntry) -> Result<Option<f64>, TiffError> {
        if entry.field_type != Some(FieldType::Rational) || entry.count == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "expected a Rational".to_string(),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let numerator = self.byte_order().read_u32(&bytes[0..4]);
        let denominator = self.byte_order().read_u32(&bytes[4..8]);
        if denominator == 0 {
            return Ok(None);
        }
        Ok(Some(numerator as f64 / denominator as f64))
    }
}

fn tag_name(entry: &IfdEntry) -> &'static str {
    entry.tag().map(|t| t.name()).unwrap_or("unknown")
}

/// Decode `count` integers of `field_type` from raw bytes.
///
/// Returns None for non-integer types. Truncated input yields fewer values.
pub fn parse_u64_array(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> Option<Vec<u64>> {
    let width = match field_type {
        FieldType::Byte | FieldType::Short | FieldType::Long | FieldType::Long8 => {
            field_type.size_in_bytes()
        }
        _ => return None,
    };

    let values = bytes
        .chunks_exact(width)
        .take(count)
        .map(|chunk| match field_type {
            FieldType::Byte => chunk[0] as u64,
            FieldType::Short => byte_order.read_u16(chunk) as u64,
            FieldType::Long => byte_order.read_u32(chunk) as u64,
            _ => byte_order.read_u64(chunk),
        })
        .collect();
    Some(values)
}
