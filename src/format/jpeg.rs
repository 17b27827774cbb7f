//! JPEG tile stream preparation.
//!
//! Tiled TIFFs (Aperio SVS in particular) often store "abbreviated" JPEG
//! tiles: the quantization (DQT) and Huffman (DHT) tables are written once in
//! the `JPEGTables` tag instead of in every tile. Before a tile can be handed
//! to a decoder the two streams are spliced:
//!
//! ```text
//! tables: SOI DQT DHT EOI        tile: SOI SOF SOS ... EOI
//! merged: SOI DQT DHT SOF SOS ... EOI
//! ```

use bytes::{Bytes, BytesMut};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// Whether the stream reaches its scan without defining any tables.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            DQT | DHT => return false,
            SOS => return true,
            // Fill bytes and standalone markers carry no length
            0xFF | 0x00 | 0xD0..=0xD9 => pos += 2,
            _ if pos + 3 < data.len() => {
                let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + length;
            }
            _ => pos += 2,
        }
    }
    false
}

/// Splice shared tables in front of an abbreviated tile.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile_data.strip_prefix(&SOI).unwrap_or(tile_data);

    let mut merged = BytesMut::with_capacity(tables.len() + tile.len());
    merged.extend_from_slice(tables);
    merged.extend_from_slice(tile);
    merged.freeze()
}

/// Split a complete stream into a `JPEGTables` blob and an abbreviated tile.
///
/// The blob holds the DQT and DHT segments between SOI and EOI; the tile
/// keeps every other segment. Returns `None` when the stream is not a
/// well-formed sequence of segments up to its scan.
pub fn split_jpeg_tables(stream: &[u8]) -> Option<(Bytes, Bytes)> {
    if stream.len() < 4 || stream[0..2] != SOI {
        return None;
    }

    let mut tables = BytesMut::from(&SOI[..]);
    let mut tile = BytesMut::from(&SOI[..]);
    let mut pos = 2;
    while pos + 4 <= stream.len() {
        if stream[pos] != 0xFF {
            return None;
        }
        let marker = stream[pos + 1];
        if marker == SOS {
            tile.extend_from_slice(&stream[pos..]);
            tables.extend_from_slice(&EOI);
            return Some((tables.freeze(), tile.freeze()));
        }

        let length = u16::from_be_bytes([stream[pos + 2], stream[pos + 3]]) as usize;
        let end = pos + 2 + length;
        let segment = stream.get(pos..end)?;
        match marker {
            DQT | DHT => tables.extend_from_slice(segment),
            _ => tile.extend_from_slice(segment),
        }
        pos = end;
    }
    None
}

/// Return a stream a standard decoder accepts, merging tables only when the
/// tile needs them.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8]) -> Bytes {
    match tables {
        Some(tables) if is_abbreviated_stream(tile_data) => merge_jpeg_tables(tables, tile_data),
        _ => Bytes::copy_from_slice(tile_data),
    }
}
