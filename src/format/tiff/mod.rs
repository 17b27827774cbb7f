//! TIFF container support.
//!
//! Reading covers classic TIFF and BigTIFF in either byte order: headers and
//! IFD chains are parsed from a [`RangeReader`](crate::io::RangeReader), tiled
//! directories become pyramid levels, untiled ones associated images. Writing
//! produces classic tiled pyramidal TIFFs used as the spatial representation
//! of converted uploads.

mod parser;
mod pyramid;
mod tags;
mod values;
mod writer;

pub use parser::{
    is_tiff_header, ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use pyramid::{AssociatedIfd, AssociatedKind, TiffLevel, TiffPyramid};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
pub use writer::{write_pyramidal_tiff, write_pyramidal_tiff_with, write_tiff, TileEncoding};
